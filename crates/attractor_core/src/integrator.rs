//! Trajectory integration on a uniform output grid.
//!
//! The solver runs adaptive Dormand-Prince steps internally and reports the solution
//! only at the grid points, evaluated through the continuous extension of whichever
//! step covers each point. The output therefore always has exactly `sample_count`
//! rows regardless of how the step size adapted.

use crate::error::{AttractorError, AttractorResult, FailureReason};
use crate::registry::{self, samples_for_step, ParameterSet, State, SystemKind, SystemSpec};
use crate::solvers::{Dopri5, StepStats, Tolerances};
use crate::traits::DynamicalSystem;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, debug_span, warn};

/// Absolute error tolerance used for every run.
pub const ABSOLUTE_TOLERANCE: f64 = 1e-8;
/// Relative error tolerance used for every run.
pub const RELATIVE_TOLERANCE: f64 = 1e-8;

/// Resource ceilings for a single integration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IntegratorSettings {
    /// Maximum number of attempted solver steps (accepted plus rejected).
    pub max_steps: u64,
    /// Largest accepted `sample_count`.
    pub max_samples: usize,
    /// Wall-clock budget. Must stay `None` on targets without a monotonic clock.
    #[serde(default)]
    pub deadline: Option<Duration>,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            max_steps: 5_000_000,
            max_samples: 2_000_000,
            deadline: None,
        }
    }
}

/// Uniformly spaced sample times over `[0, t_end]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeGrid {
    times: Vec<f64>,
}

impl TimeGrid {
    pub fn new(t_end: f64, sample_count: usize) -> AttractorResult<Self> {
        if !t_end.is_finite() || t_end <= 0.0 {
            return Err(AttractorError::invalid_input(format!(
                "t_end must be positive and finite, got {t_end}"
            )));
        }
        if sample_count < 2 {
            return Err(AttractorError::invalid_input(format!(
                "sample_count must be at least 2, got {sample_count}"
            )));
        }

        let intervals = (sample_count - 1) as f64;
        let mut times: Vec<f64> = (0..sample_count)
            .map(|i| t_end * (i as f64 / intervals))
            .collect();
        times[sample_count - 1] = t_end;

        if times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(AttractorError::invalid_input(format!(
                "{sample_count} samples over [0, {t_end}] are not distinguishable in floating point"
            )));
        }
        Ok(Self { times })
    }

    /// Grid with spacing `dt` (rounded so that `t_end` is hit exactly).
    pub fn from_step(t_end: f64, dt: f64) -> AttractorResult<Self> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(AttractorError::invalid_input(format!(
                "time step must be positive and finite, got {dt}"
            )));
        }
        if dt > t_end {
            return Err(AttractorError::invalid_input(format!(
                "time step {dt} exceeds t_end {t_end}"
            )));
        }
        Self::new(t_end, samples_for_step(t_end, dt))
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn t_end(&self) -> f64 {
        self.times[self.times.len() - 1]
    }
}

/// One row of a trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub t: f64,
    pub state: State,
}

/// Solution values on a [`TimeGrid`], one sample per grid point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory {
    pub system: SystemKind,
    pub samples: Vec<Sample>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&Sample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }
}

/// A trajectory together with solver counters.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrationReport {
    pub trajectory: Trajectory,
    pub stats: StepStats,
}

/// Integrates `spec` from `initial` over `[0, t_end]` and samples `sample_count` points.
pub fn integrate(
    spec: &SystemSpec,
    params: &ParameterSet,
    initial: State,
    t_end: f64,
    sample_count: usize,
) -> AttractorResult<Trajectory> {
    integrate_with(
        spec,
        params,
        initial,
        t_end,
        sample_count,
        &IntegratorSettings::default(),
    )
    .map(|report| report.trajectory)
}

/// Registry lookup followed by [`integrate`].
pub fn integrate_by_name(
    system_name: &str,
    params: &ParameterSet,
    initial: State,
    t_end: f64,
    sample_count: usize,
) -> AttractorResult<Trajectory> {
    let spec = registry::get(system_name)?;
    integrate(spec, params, initial, t_end, sample_count)
}

/// [`integrate`] with explicit resource ceilings; also returns solver statistics.
pub fn integrate_with(
    spec: &SystemSpec,
    params: &ParameterSet,
    initial: State,
    t_end: f64,
    sample_count: usize,
    settings: &IntegratorSettings,
) -> AttractorResult<IntegrationReport> {
    if initial.iter().any(|v| !v.is_finite()) {
        return Err(AttractorError::invalid_input(format!(
            "initial state must be finite, got {initial:?}"
        )));
    }
    let values = spec.resolve_parameters(params)?;
    let field = spec.bind::<f64>(&values)?;
    if sample_count > settings.max_samples {
        return Err(AttractorError::invalid_input(format!(
            "sample_count {sample_count} exceeds limit {}",
            settings.max_samples
        )));
    }
    let grid = TimeGrid::new(t_end, sample_count)?;

    let span = debug_span!("integrate", system = spec.name, t_end, sample_count);
    let _enter = span.enter();

    let deadline = settings.deadline.map(|budget| Instant::now() + budget);
    let times = grid.times();
    let mut samples = Vec::with_capacity(times.len());
    samples.push(Sample {
        t: 0.0,
        state: initial,
    });

    let mut solver = Dopri5::new(
        field.dimension(),
        Tolerances::new(ABSOLUTE_TOLERANCE, RELATIVE_TOLERANCE),
    );
    let mut y = initial.to_vec();
    let mut t = 0.0;
    solver.prime(&field, t, &y);
    let mut h = solver.initial_step(&field, t, &y, t_end);

    let mut next = 1;
    let mut attempts = 0u64;
    let mut last_non_finite = false;
    let mut scratch = [0.0; 3];

    while next < times.len() {
        if attempts >= settings.max_steps {
            return Err(failure(t, FailureReason::StepLimit, solver.stats));
        }
        if deadline.is_some_and(|limit| Instant::now() >= limit) {
            return Err(failure(t, FailureReason::Deadline, solver.stats));
        }

        let final_step = t + 1.01 * h >= t_end;
        let h_try = if final_step { t_end - t } else { h };
        if !(h_try > min_step(t, t_end)) {
            let reason = if last_non_finite {
                FailureReason::NonFinite
            } else {
                FailureReason::StepSizeUnderflow
            };
            return Err(failure(t, reason, solver.stats));
        }

        let attempt = solver.try_step(&field, t, &y, h_try);
        attempts += 1;
        last_non_finite = !attempt.is_finite();

        if attempt.accepted {
            let t_new = if final_step { t_end } else { t + h_try };
            while next < times.len() && times[next] <= t_new {
                let tk = times[next];
                if tk == t_new {
                    scratch.copy_from_slice(solver.accepted_state());
                } else {
                    solver.interpolate(tk, &mut scratch);
                }
                if scratch.iter().any(|v| !v.is_finite()) {
                    return Err(failure(t, FailureReason::NonFinite, solver.stats));
                }
                samples.push(Sample {
                    t: tk,
                    state: scratch,
                });
                next += 1;
            }
            solver.commit(&mut y);
            t = t_new;
        }
        h = attempt.h_next;
    }

    debug!(
        accepted = solver.stats.accepted_steps,
        rejected = solver.stats.rejected_steps,
        fn_evals = solver.stats.fn_evals,
        "integration finished"
    );

    Ok(IntegrationReport {
        trajectory: Trajectory {
            system: spec.kind,
            samples,
        },
        stats: solver.stats,
    })
}

fn failure(last_valid_time: f64, reason: FailureReason, stats: StepStats) -> AttractorError {
    warn!(
        last_valid_time,
        %reason,
        accepted = stats.accepted_steps,
        rejected = stats.rejected_steps,
        "integration failed"
    );
    AttractorError::IntegrationFailure {
        last_valid_time,
        reason,
    }
}

/// Smallest resolvable step at `t`, relative to the horizon so short runs are not cut off.
fn min_step(t: f64, t_end: f64) -> f64 {
    16.0 * f64::EPSILON * t.abs().max(t_end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SYSTEMS;
    use proptest::prelude::*;

    fn lorenz() -> &'static SystemSpec {
        registry::get("lorenz").expect("lorenz is registered")
    }

    fn distance(a: &State, b: &State) -> f64 {
        a.iter()
            .zip(b)
            .map(|(p, q)| (p - q).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    #[test]
    fn time_grid_spans_interval_uniformly() {
        let grid = TimeGrid::new(2.0, 5).expect("grid");
        assert_eq!(grid.times(), &[0.0, 0.5, 1.0, 1.5, 2.0]);
        assert_eq!(grid.t_end(), 2.0);
    }

    #[test]
    fn time_grid_rejects_bad_inputs() {
        assert!(TimeGrid::new(0.0, 10).is_err());
        assert!(TimeGrid::new(-1.0, 10).is_err());
        assert!(TimeGrid::new(f64::INFINITY, 10).is_err());
        assert!(TimeGrid::new(1.0, 1).is_err());
        assert!(TimeGrid::new(1e-320, 1000).is_ok());
        let err = TimeGrid::new(1e-322, 1000)
            .expect_err("20 subnormal steps cannot hold 1000 points");
        assert!(
            matches!(err, AttractorError::InvalidInput { .. }),
            "unexpected: {err}"
        );
    }

    #[test]
    fn time_grid_from_step_hits_endpoint() {
        let grid = TimeGrid::from_step(50.0, 0.01).expect("grid");
        assert_eq!(grid.len(), 5001);
        assert_eq!(grid.t_end(), 50.0);
        assert!((grid.times()[1] - 0.01).abs() < 1e-15);
        assert!(TimeGrid::from_step(1.0, 0.0).is_err());
        assert!(TimeGrid::from_step(1.0, 2.0).is_err());
    }

    #[test]
    fn two_samples_start_at_initial_state_for_every_system() {
        for spec in &SYSTEMS {
            let initial = spec.default_initial_state;
            let trajectory =
                integrate(spec, &ParameterSet::new(), initial, 1.0, 2).expect("integration");
            assert_eq!(trajectory.len(), 2);
            assert_eq!(trajectory.samples[0].state, initial, "{}", spec.name);
            assert_eq!(trajectory.samples[0].t, 0.0);
            assert_eq!(trajectory.samples[1].t, 1.0);
        }
    }

    #[test]
    fn tiny_horizon_reaches_t_end() {
        for t_end in [1e-15, 3e-15, 1e-300] {
            let trajectory =
                integrate_by_name("lorenz", &ParameterSet::new(), [1.0, 1.0, 1.0], t_end, 2)
                    .expect("short horizon should integrate");
            assert_eq!(trajectory.len(), 2);
            assert_eq!(trajectory.samples[1].t, t_end);
            assert!(trajectory.samples[1].state.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn short_lorenz_run_stays_finite() {
        let trajectory = integrate_by_name("lorenz", &ParameterSet::new(), [1.0, 1.0, 1.0], 1.0, 100)
            .expect("lorenz over one time unit should integrate");
        assert_eq!(trajectory.len(), 100);
        assert_eq!(trajectory.system, SystemKind::Lorenz);
        for sample in &trajectory.samples {
            assert!(sample.state.iter().all(|v| v.is_finite()), "t = {}", sample.t);
        }
    }

    #[test]
    fn linear_regime_matches_closed_form() {
        // Rossler with the x-y subsystem decoupled: z stays at 0 when b = 0 and z(0) = 0,
        // leaving x' = -y, y' = x (for a = 0), a pure rotation.
        let spec = registry::get("rossler").expect("rossler");
        let params: ParameterSet = [("a", 0.0), ("b", 0.0)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let trajectory = integrate(spec, &params, [1.0, 0.0, 0.0], 6.0, 61).expect("integration");
        for sample in &trajectory.samples {
            assert!((sample.state[0] - sample.t.cos()).abs() < 1e-6, "x({})", sample.t);
            assert!((sample.state[1] - sample.t.sin()).abs() < 1e-6, "y({})", sample.t);
            assert_eq!(sample.state[2], 0.0);
        }
    }

    #[test]
    fn identical_requests_are_bitwise_identical() {
        let params: ParameterSet = [("rho".to_string(), 35.0)].into_iter().collect();
        let a = integrate(lorenz(), &params, [0.5, -1.0, 20.0], 10.0, 500).expect("first run");
        let b = integrate(lorenz(), &params, [0.5, -1.0, 20.0], 10.0, 500).expect("second run");
        assert_eq!(a, b);
    }

    #[test]
    fn nearby_lorenz_states_diverge() {
        let a = integrate(lorenz(), &ParameterSet::new(), [1.0, 1.0, 1.0], 40.0, 401)
            .expect("reference run");
        let b = integrate(lorenz(), &ParameterSet::new(), [1.0 + 1e-6, 1.0, 1.0], 40.0, 401)
            .expect("perturbed run");
        let early = distance(&a.samples[10].state, &b.samples[10].state);
        assert!(early < 1e-3, "separated too early: {early}");
        let late = a.samples[300..]
            .iter()
            .zip(&b.samples[300..])
            .map(|(p, q)| distance(&p.state, &q.state))
            .fold(0.0, f64::max);
        assert!(late > 5.0, "separation over the last quarter only {late}");
    }

    #[test]
    fn unknown_system_is_rejected() {
        let err = integrate_by_name("unknown_system", &ParameterSet::new(), [1.0; 3], 1.0, 10)
            .expect_err("lookup should fail");
        assert!(matches!(err, AttractorError::UnknownSystem { .. }));
    }

    #[test]
    fn unknown_parameter_is_rejected() {
        let params: ParameterSet = [("not_a_param".to_string(), 1.0)].into_iter().collect();
        let err = integrate_by_name("lorenz", &params, [1.0, 1.0, 1.0], 1.0, 10)
            .expect_err("parameter should be rejected");
        assert!(matches!(err, AttractorError::InvalidParameter { .. }));
    }

    #[test]
    fn invalid_inputs_are_rejected_before_solving() {
        let none = ParameterSet::new();
        for (initial, t_end, count) in [
            ([f64::NAN, 0.0, 0.0], 1.0, 10),
            ([1.0, 1.0, 1.0], 0.0, 10),
            ([1.0, 1.0, 1.0], 1.0, 1),
        ] {
            let err = integrate(lorenz(), &none, initial, t_end, count).expect_err("invalid input");
            assert!(
                matches!(err, AttractorError::InvalidInput { .. }),
                "unexpected: {err}"
            );
        }
    }

    #[test]
    fn sample_ceiling_is_enforced() {
        let settings = IntegratorSettings {
            max_samples: 100,
            ..IntegratorSettings::default()
        };
        let err = integrate_with(lorenz(), &ParameterSet::new(), [1.0; 3], 1.0, 101, &settings)
            .expect_err("too many samples");
        assert!(err.to_string().contains("exceeds limit"), "unexpected: {err}");
    }

    #[test]
    fn step_ceiling_fails_with_last_valid_time() {
        let settings = IntegratorSettings {
            max_steps: 3,
            ..IntegratorSettings::default()
        };
        let err = integrate_with(lorenz(), &ParameterSet::new(), [1.0; 3], 50.0, 100, &settings)
            .expect_err("three steps cannot reach t = 50");
        match err {
            AttractorError::IntegrationFailure {
                last_valid_time,
                reason,
            } => {
                assert_eq!(reason, FailureReason::StepLimit);
                assert!((0.0..50.0).contains(&last_valid_time));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn expired_deadline_aborts() {
        let settings = IntegratorSettings {
            deadline: Some(Duration::ZERO),
            ..IntegratorSettings::default()
        };
        let err = integrate_with(lorenz(), &ParameterSet::new(), [1.0; 3], 10.0, 100, &settings)
            .expect_err("zero budget");
        assert_eq!(
            err,
            AttractorError::IntegrationFailure {
                last_valid_time: 0.0,
                reason: FailureReason::Deadline,
            }
        );
    }

    #[test]
    fn overflowing_state_reports_non_finite_failure() {
        let err = integrate(lorenz(), &ParameterSet::new(), [1e200, 1e200, 1e200], 1.0, 10)
            .expect_err("state overflows immediately");
        assert_eq!(
            err,
            AttractorError::IntegrationFailure {
                last_valid_time: 0.0,
                reason: FailureReason::NonFinite,
            }
        );
    }

    #[test]
    fn report_counts_solver_work() {
        let report = integrate_with(
            lorenz(),
            &ParameterSet::new(),
            [1.0; 3],
            5.0,
            50,
            &IntegratorSettings::default(),
        )
        .expect("integration");
        assert!(report.stats.accepted_steps > 0);
        assert!(report.stats.fn_evals >= 6 * report.stats.accepted_steps);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn trajectory_matches_grid(
            system in 0usize..3,
            t_end in 0.1f64..5.0,
            sample_count in 2usize..300,
            x0 in -2.0f64..2.0,
        ) {
            let spec = &SYSTEMS[system];
            let initial = [x0, 0.5, 0.25];
            let trajectory = integrate(spec, &ParameterSet::new(), initial, t_end, sample_count)
                .expect("integration");
            prop_assert_eq!(trajectory.len(), sample_count);
            prop_assert_eq!(trajectory.samples[0].state, initial);
            prop_assert_eq!(trajectory.samples[0].t, 0.0);
            prop_assert_eq!(trajectory.samples[sample_count - 1].t, t_end);
            for pair in trajectory.samples.windows(2) {
                prop_assert!(pair[1].t > pair[0].t);
            }
            for sample in &trajectory.samples {
                prop_assert!(sample.state.iter().all(|v| v.is_finite()));
            }
        }
    }
}
