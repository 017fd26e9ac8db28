//! Views and summary statistics derived from a computed trajectory.

use crate::error::{AttractorError, AttractorResult};
use crate::integrator::Trajectory;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Coordinate plane for a 2D view of the phase portrait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plane {
    Xy,
    Xz,
    Yz,
}

impl Plane {
    pub fn axes(self) -> (Axis, Axis) {
        match self {
            Plane::Xy => (Axis::X, Axis::Y),
            Plane::Xz => (Axis::X, Axis::Z),
            Plane::Yz => (Axis::Y, Axis::Z),
        }
    }
}

impl Trajectory {
    pub fn times(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.t).collect()
    }

    /// Values of one variable over time.
    pub fn series(&self, axis: Axis) -> Vec<f64> {
        let idx = axis.index();
        self.samples.iter().map(|s| s.state[idx]).collect()
    }

    /// Phase portrait projected onto `plane`, as (horizontal, vertical) pairs.
    pub fn projection(&self, plane: Plane) -> Vec<(f64, f64)> {
        let (h, v) = plane.axes();
        self.samples
            .iter()
            .map(|s| (s.state[h.index()], s.state[v.index()]))
            .collect()
    }
}

/// Descriptive statistics of one variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation (n - 1 in the denominator); NaN for fewer than two values.
    pub std: f64,
    pub min: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrajectorySummary {
    pub t: ColumnSummary,
    pub x: ColumnSummary,
    pub y: ColumnSummary,
    pub z: ColumnSummary,
}

pub fn summarize(trajectory: &Trajectory) -> AttractorResult<TrajectorySummary> {
    if trajectory.is_empty() {
        return Err(AttractorError::invalid_input("cannot summarize an empty trajectory"));
    }
    Ok(TrajectorySummary {
        t: describe(trajectory.times()),
        x: describe(trajectory.series(Axis::X)),
        y: describe(trajectory.series(Axis::Y)),
        z: describe(trajectory.series(Axis::Z)),
    })
}

fn describe(mut values: Vec<f64>) -> ColumnSummary {
    let count = values.len();
    let n = count as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = if count > 1 {
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        f64::NAN
    };

    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    ColumnSummary {
        count,
        mean,
        std,
        min: values[0],
        q25: quantile(&values, 0.25),
        median: quantile(&values, 0.5),
        q75: quantile(&values, 0.75),
        max: values[count - 1],
    }
}

/// Linear-interpolation quantile of sorted, non-empty data.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Euclidean distance between corresponding samples of two trajectories on the same grid.
pub fn separation(a: &Trajectory, b: &Trajectory) -> AttractorResult<Vec<f64>> {
    if a.len() != b.len() {
        return Err(AttractorError::invalid_input(format!(
            "trajectories have {} and {} samples",
            a.len(),
            b.len()
        )));
    }
    a.samples
        .iter()
        .zip(&b.samples)
        .map(|(p, q)| {
            if p.t != q.t {
                return Err(AttractorError::invalid_input(format!(
                    "sample times differ: {} vs {}",
                    p.t, q.t
                )));
            }
            Ok((Vector3::from(p.state) - Vector3::from(q.state)).norm())
        })
        .collect()
}
