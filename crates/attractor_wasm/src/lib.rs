//! WASM bindings exposing the attractor registry and integrator to the web front end.

mod request;
mod system;

pub use request::{IntegrationRequest, SystemDescription, TrajectoryColumns};
pub use system::{describe_system, integrate, list_systems, summarize};
