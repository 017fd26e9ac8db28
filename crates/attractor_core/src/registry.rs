//! Vector field registry.
//!
//! The set of supported systems is closed: each one is a [`SystemKind`] variant with a
//! matching constant [`SystemSpec`] entry in [`SYSTEMS`]. Lookup by name goes through
//! [`get`], which never allocates and never mutates anything.

use crate::error::{AttractorError, AttractorResult, ParameterIssue};
use crate::traits::{DynamicalSystem, Scalar};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Caller-supplied parameter overrides for one integration run.
pub type ParameterSet = BTreeMap<String, f64>;

/// State of a three-dimensional system.
pub type State = [f64; 3];

pub const VARIABLES: [&str; 3] = ["x", "y", "z"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemKind {
    Lorenz,
    Rossler,
    Thomas,
}

impl SystemKind {
    pub const ALL: [SystemKind; 3] = [SystemKind::Lorenz, SystemKind::Rossler, SystemKind::Thomas];

    pub fn name(self) -> &'static str {
        match self {
            SystemKind::Lorenz => "lorenz",
            SystemKind::Rossler => "rossler",
            SystemKind::Thomas => "thomas",
        }
    }

    pub fn spec(self) -> &'static SystemSpec {
        match self {
            SystemKind::Lorenz => &SYSTEMS[0],
            SystemKind::Rossler => &SYSTEMS[1],
            SystemKind::Thomas => &SYSTEMS[2],
        }
    }

    /// Evaluates the vector field. `p` holds parameter values in declared order.
    pub fn derivative<T: Scalar>(self, x: &[T], p: &[T], out: &mut [T]) {
        match self {
            SystemKind::Lorenz => {
                let (sigma, rho, beta) = (p[0], p[1], p[2]);
                out[0] = sigma * (x[1] - x[0]);
                out[1] = x[0] * (rho - x[2]) - x[1];
                out[2] = x[0] * x[1] - beta * x[2];
            }
            SystemKind::Rossler => {
                let (a, b, c) = (p[0], p[1], p[2]);
                out[0] = -x[1] - x[2];
                out[1] = x[0] + a * x[1];
                out[2] = b + x[2] * (x[0] - c);
            }
            SystemKind::Thomas => {
                let b = p[0];
                out[0] = x[1].sin() - b * x[0];
                out[1] = x[2].sin() - b * x[1];
                out[2] = x[0].sin() - b * x[2];
            }
        }
    }
}

impl fmt::Display for SystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SystemKind {
    type Err = AttractorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        match key.as_str() {
            "lorenz" => Ok(SystemKind::Lorenz),
            "rossler" | "rössler" => Ok(SystemKind::Rossler),
            "thomas" => Ok(SystemKind::Thomas),
            _ => Err(AttractorError::UnknownSystem {
                name: s.to_string(),
            }),
        }
    }
}

/// A named parameter with its default value and admissible inclusive range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub symbol: &'static str,
    pub default: f64,
    pub min: f64,
    pub max: f64,
}

impl ParameterSpec {
    fn check(&self, value: f64) -> Result<f64, ParameterIssue> {
        if !value.is_finite() {
            return Err(ParameterIssue::NonFinite(value));
        }
        if value < self.min || value > self.max {
            return Err(ParameterIssue::OutOfRange {
                value,
                min: self.min,
                max: self.max,
            });
        }
        Ok(value)
    }
}

/// Immutable description of one dynamical system.
#[derive(Debug, Serialize)]
pub struct SystemSpec {
    pub kind: SystemKind,
    pub name: &'static str,
    pub title: &'static str,
    pub variables: [&'static str; 3],
    pub parameters: &'static [ParameterSpec],
    /// LaTeX source of the equations, one aligned row per variable.
    pub equations: &'static str,
    pub default_initial_state: State,
    pub default_t_end: f64,
    pub default_dt: f64,
}

pub static SYSTEMS: [SystemSpec; 3] = [
    SystemSpec {
        kind: SystemKind::Lorenz,
        name: "lorenz",
        title: "Lorenz Attractor",
        variables: VARIABLES,
        parameters: &[
            ParameterSpec {
                name: "sigma",
                symbol: "\\sigma",
                default: 10.0,
                min: 0.1,
                max: 50.0,
            },
            ParameterSpec {
                name: "rho",
                symbol: "\\rho",
                default: 28.0,
                min: 0.1,
                max: 100.0,
            },
            ParameterSpec {
                name: "beta",
                symbol: "\\beta",
                default: 8.0 / 3.0,
                min: 0.1,
                max: 20.0,
            },
        ],
        equations: "\\begin{aligned}\n\
                    \\frac{dx}{dt} &= \\sigma(y - x) \\\\\n\
                    \\frac{dy}{dt} &= x(\\rho - z) - y \\\\\n\
                    \\frac{dz}{dt} &= xy - \\beta z\n\
                    \\end{aligned}",
        default_initial_state: [1.0, 1.0, 1.0],
        default_t_end: 50.0,
        default_dt: 0.01,
    },
    SystemSpec {
        kind: SystemKind::Rossler,
        name: "rossler",
        title: "Rössler Attractor",
        variables: VARIABLES,
        parameters: &[
            ParameterSpec {
                name: "a",
                symbol: "a",
                default: 0.2,
                min: 0.0,
                max: 1.0,
            },
            ParameterSpec {
                name: "b",
                symbol: "b",
                default: 0.2,
                min: 0.0,
                max: 2.0,
            },
            ParameterSpec {
                name: "c",
                symbol: "c",
                default: 5.7,
                min: 0.0,
                max: 20.0,
            },
        ],
        equations: "\\begin{aligned}\n\
                    \\frac{dx}{dt} &= -y - z \\\\\n\
                    \\frac{dy}{dt} &= x + ay \\\\\n\
                    \\frac{dz}{dt} &= b + z(x - c)\n\
                    \\end{aligned}",
        default_initial_state: [1.0, 1.0, 1.0],
        default_t_end: 100.0,
        default_dt: 0.01,
    },
    SystemSpec {
        kind: SystemKind::Thomas,
        name: "thomas",
        title: "Thomas Cyclically Symmetric Attractor",
        variables: VARIABLES,
        parameters: &[ParameterSpec {
            name: "b",
            symbol: "b",
            default: 0.19,
            min: 0.0,
            max: 1.0,
        }],
        equations: "\\begin{aligned}\n\
                    \\frac{dx}{dt} &= \\sin(y) - bx \\\\\n\
                    \\frac{dy}{dt} &= \\sin(z) - by \\\\\n\
                    \\frac{dz}{dt} &= \\sin(x) - bz\n\
                    \\end{aligned}",
        default_initial_state: [1.1, 1.1, -0.01],
        default_t_end: 500.0,
        default_dt: 0.05,
    },
];

/// Names of every registered system.
pub fn list_systems() -> BTreeSet<&'static str> {
    SYSTEMS.iter().map(|spec| spec.name).collect()
}

/// Looks up a system by name.
pub fn get(name: &str) -> AttractorResult<&'static SystemSpec> {
    name.parse::<SystemKind>().map(SystemKind::spec)
}

impl SystemSpec {
    pub fn default_parameters(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.default).collect()
    }

    /// Validates caller overrides and returns the full parameter vector in declared order.
    /// Names absent from `overrides` take their default value.
    pub fn resolve_parameters(&self, overrides: &ParameterSet) -> AttractorResult<Vec<f64>> {
        let mut values = self.default_parameters();
        for (name, &value) in overrides {
            let index = self
                .parameters
                .iter()
                .position(|p| p.name == name.as_str())
                .ok_or_else(|| self.parameter_error(name, ParameterIssue::Unknown))?;
            values[index] = self.parameters[index]
                .check(value)
                .map_err(|issue| self.parameter_error(name, issue))?;
        }
        Ok(values)
    }

    fn parameter_error(&self, name: &str, issue: ParameterIssue) -> AttractorError {
        AttractorError::InvalidParameter {
            system: self.name,
            name: name.to_string(),
            issue,
        }
    }

    /// Binds resolved parameter values, producing a vector field the solver can step.
    pub fn bind<T: Scalar>(&self, values: &[f64]) -> AttractorResult<VectorField<T>> {
        if values.len() != self.parameters.len() {
            return Err(AttractorError::invalid_input(format!(
                "{} expects {} parameter values, got {}",
                self.name,
                self.parameters.len(),
                values.len()
            )));
        }
        Ok(VectorField {
            kind: self.kind,
            params: values.iter().map(|&v| T::lit(v)).collect(),
        })
    }

    /// Evaluates dx/dt at `state` with `params` overriding the defaults.
    pub fn derivative(&self, state: &State, params: &ParameterSet) -> AttractorResult<State> {
        let values = self.resolve_parameters(params)?;
        let mut out = [0.0; 3];
        self.kind.derivative(state, &values, &mut out);
        Ok(out)
    }

    /// Sample count that reproduces a grid of spacing `default_dt` over `default_t_end`.
    pub fn default_sample_count(&self) -> usize {
        samples_for_step(self.default_t_end, self.default_dt)
    }
}

pub(crate) fn samples_for_step(t_end: f64, dt: f64) -> usize {
    ((t_end / dt).round() as usize).saturating_add(1).max(2)
}

/// A registered system bound to concrete parameter values.
#[derive(Debug, Clone)]
pub struct VectorField<T: Scalar> {
    pub kind: SystemKind,
    pub params: Vec<T>,
}

impl<T: Scalar> DynamicalSystem<T> for VectorField<T> {
    fn dimension(&self) -> usize {
        3
    }

    fn apply(&self, _t: T, x: &[T], out: &mut [T]) {
        self.kind.derivative(x, &self.params, out);
    }
}
