//! Plain-Rust request layer behind the `wasm_bindgen` exports.

use anyhow::{bail, Context, Result};
use attractor_core::analysis::{summarize, Axis, TrajectorySummary};
use attractor_core::registry::{self, ParameterSpec};
use attractor_core::{integrate_by_name, ParameterSet, State, Trajectory};
use serde::{Deserialize, Serialize};

/// Everything the front end needs to build controls for one system.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemDescription {
    pub name: &'static str,
    pub title: &'static str,
    pub variables: [&'static str; 3],
    pub parameters: &'static [ParameterSpec],
    pub equations: &'static str,
    pub default_initial_state: State,
    pub default_t_end: f64,
    pub default_dt: f64,
    pub default_sample_count: usize,
}

impl SystemDescription {
    pub fn lookup(name: &str) -> Result<Self> {
        let spec = registry::get(name)?;
        Ok(Self {
            name: spec.name,
            title: spec.title,
            variables: spec.variables,
            parameters: spec.parameters,
            equations: spec.equations,
            default_initial_state: spec.default_initial_state,
            default_t_end: spec.default_t_end,
            default_dt: spec.default_dt,
            default_sample_count: spec.default_sample_count(),
        })
    }
}

/// One integration call as received from JavaScript.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationRequest {
    pub system: String,
    #[serde(default)]
    pub params: ParameterSet,
    pub initial: Vec<f64>,
    pub t_end: f64,
    pub sample_count: usize,
}

impl IntegrationRequest {
    fn initial_state(&self) -> Result<State> {
        match self.initial.as_slice() {
            &[x, y, z] => Ok([x, y, z]),
            other => bail!("Initial state must have 3 components, got {}.", other.len()),
        }
    }

    pub fn trajectory(&self) -> Result<Trajectory> {
        let initial = self.initial_state()?;
        let trajectory = integrate_by_name(
            &self.system,
            &self.params,
            initial,
            self.t_end,
            self.sample_count,
        )
        .with_context(|| format!("Failed to integrate {}", self.system))?;
        Ok(trajectory)
    }

    pub fn columns(&self) -> Result<TrajectoryColumns> {
        Ok(TrajectoryColumns::from(&self.trajectory()?))
    }

    pub fn summary(&self) -> Result<TrajectorySummary> {
        let trajectory = self.trajectory()?;
        Ok(summarize(&trajectory)?)
    }
}

/// Column-major trajectory layout, one array per plotted series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrajectoryColumns {
    pub times: Vec<f64>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
}

impl From<&Trajectory> for TrajectoryColumns {
    fn from(trajectory: &Trajectory) -> Self {
        Self {
            times: trajectory.times(),
            x: trajectory.series(Axis::X),
            y: trajectory.series(Axis::Y),
            z: trajectory.series(Axis::Z),
        }
    }
}
