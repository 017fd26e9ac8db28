/// The `attractor_core` crate simulates the Lorenz, Rössler and Thomas systems.
///
/// Key components:
/// - **Registry**: the closed set of supported vector fields with their parameters,
///   admissible ranges, default initial states and LaTeX equations.
/// - **Solvers**: Dormand-Prince 5(4) with step-size control and dense output.
/// - **Integrator**: samples a solution onto a uniform time grid and reports failures
///   with the last time the state was valid.
/// - **Analysis**: projections, per-variable series and descriptive statistics.
pub mod analysis;
pub mod error;
pub mod integrator;
pub mod registry;
pub mod solvers;
pub mod traits;

pub use error::{AttractorError, AttractorResult, FailureReason, ParameterIssue};
pub use integrator::{
    integrate, integrate_by_name, integrate_with, IntegrationReport, IntegratorSettings,
    Sample, TimeGrid, Trajectory,
};
pub use registry::{get, list_systems, ParameterSet, State, SystemKind, SystemSpec};
