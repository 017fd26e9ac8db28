//! Error types for registry lookup and trajectory integration.

use std::fmt;
use thiserror::Error;

/// Why a supplied parameter was rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterIssue {
    /// The name is not declared by the system.
    Unknown,
    /// The value is NaN or infinite.
    NonFinite(f64),
    /// The value lies outside the admissible range.
    OutOfRange { value: f64, min: f64, max: f64 },
}

impl fmt::Display for ParameterIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterIssue::Unknown => write!(f, "not a parameter of this system"),
            ParameterIssue::NonFinite(value) => write!(f, "value {value} is not finite"),
            ParameterIssue::OutOfRange { value, min, max } => {
                write!(f, "value {value} outside [{min}, {max}]")
            }
        }
    }
}

/// Why the solver stopped before reaching the end of the time grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// A stage, step, or sampled state contained NaN or infinity.
    NonFinite,
    /// The step size shrank below what floating point can resolve at the current time.
    StepSizeUnderflow,
    /// The configured step-count ceiling was hit.
    StepLimit,
    /// The configured wall-clock deadline passed.
    Deadline,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::NonFinite => "non-finite state",
            FailureReason::StepSizeUnderflow => "step size underflow",
            FailureReason::StepLimit => "step limit exceeded",
            FailureReason::Deadline => "deadline exceeded",
        };
        f.write_str(text)
    }
}

/// Errors surfaced by the registry and the integrator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttractorError {
    #[error("Unknown system: {name}")]
    UnknownSystem { name: String },

    #[error("Invalid parameter '{name}' for {system}: {issue}")]
    InvalidParameter {
        system: &'static str,
        name: String,
        issue: ParameterIssue,
    },

    #[error("Invalid input: {what}")]
    InvalidInput { what: String },

    #[error("Integration failed at t = {last_valid_time}: {reason}")]
    IntegrationFailure {
        last_valid_time: f64,
        reason: FailureReason,
    },
}

impl AttractorError {
    pub(crate) fn invalid_input(what: impl Into<String>) -> Self {
        AttractorError::InvalidInput { what: what.into() }
    }
}

pub type AttractorResult<T> = Result<T, AttractorError>;
