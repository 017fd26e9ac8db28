use crate::traits::{DynamicalSystem, Scalar};

// Dormand-Prince 5(4) tableau.
const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;

const A21: f64 = 1.0 / 5.0;

const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;

const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;

const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;

const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;

// 5th order weights; row 7 of the tableau (FSAL).
const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

// Difference between the 5th and embedded 4th order weights.
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

// Continuous extension coefficients (Hairer, Norsett & Wanner).
const D1: f64 = -12715105075.0 / 11282082432.0;
const D3: f64 = 87487479700.0 / 32700410799.0;
const D4: f64 = -10690763975.0 / 1880347072.0;
const D5: f64 = 701980252875.0 / 199316789632.0;
const D6: f64 = -1453857185.0 / 822651844.0;
const D7: f64 = 69997945.0 / 29380423.0;

/// Absolute and relative error tolerances.
///
/// The weighted error of a step is `|y5 - y4| / (atol + rtol * max(|y_old|, |y_new|))`,
/// combined as an RMS norm over the components.
#[derive(Debug, Clone, Copy)]
pub struct Tolerances<T: Scalar> {
    pub atol: T,
    pub rtol: T,
}

impl<T: Scalar> Tolerances<T> {
    pub fn new(atol: f64, rtol: f64) -> Self {
        Self {
            atol: T::lit(atol),
            rtol: T::lit(rtol),
        }
    }
}

/// Step-size controller: h_new = safety * h * err^(-1/5), clamped.
#[derive(Debug, Clone, Copy)]
pub struct StepController {
    pub safety: f64,
    pub min_factor: f64,
    pub max_factor: f64,
}

impl Default for StepController {
    fn default() -> Self {
        Self {
            safety: 0.9,
            min_factor: 0.2,
            max_factor: 10.0,
        }
    }
}

impl StepController {
    fn factor<T: Scalar>(&self, error: T, after_reject: bool) -> T {
        let max = if after_reject { T::one() } else { T::lit(self.max_factor) };
        if error == T::zero() {
            return max;
        }
        let factor = T::lit(self.safety) * error.powf(T::lit(-0.2));
        factor.max(T::lit(self.min_factor)).min(max)
    }
}

/// Counters collected while stepping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StepStats {
    pub fn_evals: u64,
    pub accepted_steps: u64,
    pub rejected_steps: u64,
}

/// Outcome of one attempted step.
#[derive(Debug, Clone, Copy)]
pub struct StepAttempt<T: Scalar> {
    pub accepted: bool,
    /// Weighted RMS error estimate; NaN when a stage produced non-finite values.
    pub error: T,
    /// Suggested magnitude for the next attempt.
    pub h_next: T,
}

impl<T: Scalar> StepAttempt<T> {
    pub fn is_finite(&self) -> bool {
        self.error.is_finite()
    }
}

/// Dormand-Prince 5(4) adaptive solver with FSAL and dense output.
///
/// Usage: [`prime`](Self::prime) once at the initial point, then repeatedly
/// [`try_step`](Self::try_step). After an accepted attempt the solution on
/// `[t, t + h]` can be sampled with [`interpolate`](Self::interpolate) until
/// [`commit`](Self::commit) advances the caller's state.
pub struct Dopri5<T: Scalar> {
    tol: Tolerances<T>,
    controller: StepController,
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    k5: Vec<T>,
    k6: Vec<T>,
    k7: Vec<T>,
    tmp: Vec<T>,
    y_new: Vec<T>,
    rcont: [Vec<T>; 5],
    t_old: T,
    h_old: T,
    last_rejected: bool,
    pub stats: StepStats,
}

impl<T: Scalar> Dopri5<T> {
    pub fn new(dim: usize, tol: Tolerances<T>) -> Self {
        let z = T::zero();
        Self {
            tol,
            controller: StepController::default(),
            k1: vec![z; dim],
            k2: vec![z; dim],
            k3: vec![z; dim],
            k4: vec![z; dim],
            k5: vec![z; dim],
            k6: vec![z; dim],
            k7: vec![z; dim],
            tmp: vec![z; dim],
            y_new: vec![z; dim],
            rcont: [
                vec![z; dim],
                vec![z; dim],
                vec![z; dim],
                vec![z; dim],
                vec![z; dim],
            ],
            t_old: z,
            h_old: z,
            last_rejected: false,
            stats: StepStats::default(),
        }
    }

    /// Evaluates the derivative at the starting point.
    pub fn prime(&mut self, system: &impl DynamicalSystem<T>, t: T, y: &[T]) {
        system.apply(t, y, &mut self.k1);
        self.stats.fn_evals += 1;
        self.last_rejected = false;
    }

    /// Automatic initial step size selection. Requires [`prime`](Self::prime).
    pub fn initial_step(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: T,
        y: &[T],
        h_max: T,
    ) -> T {
        let tiny = T::lit(1e-10);
        let mut dnf = T::zero();
        let mut dny = T::zero();
        for i in 0..y.len() {
            let sk = self.tol.atol + self.tol.rtol * y[i].abs();
            dnf = dnf + (self.k1[i] / sk).powi(2);
            dny = dny + (y[i] / sk).powi(2);
        }
        let mut h = if dnf <= tiny || dny <= tiny {
            T::lit(1e-6)
        } else {
            (dny / dnf).sqrt() * T::lit(0.01)
        };
        h = h.min(h_max);

        // Explicit Euler probe for the second derivative.
        for i in 0..y.len() {
            self.tmp[i] = y[i] + h * self.k1[i];
        }
        system.apply(t + h, &self.tmp, &mut self.k2);
        self.stats.fn_evals += 1;

        let mut der2 = T::zero();
        for i in 0..y.len() {
            let sk = self.tol.atol + self.tol.rtol * y[i].abs();
            der2 = der2 + ((self.k2[i] - self.k1[i]) / sk).powi(2);
        }
        let der2 = der2.sqrt() / h;
        let der12 = der2.abs().max(dnf.sqrt());
        let h1 = if der12 <= T::lit(1e-15) {
            T::lit(1e-6).max(h * T::lit(1e-3))
        } else {
            (T::lit(0.01) / der12).powf(T::lit(0.2))
        };

        let h = (h * T::lit(100.0)).min(h1).min(h_max);
        if h.is_finite() && h > T::zero() {
            h
        } else {
            T::lit(1e-6).min(h_max)
        }
    }

    /// Attempts a step of size `h` from `(t, y)`.
    ///
    /// On acceptance the new state is held internally and dense output is ready for
    /// `[t, t + h]`; `y` is left untouched until [`commit`](Self::commit).
    pub fn try_step(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: T,
        y: &[T],
        h: T,
    ) -> StepAttempt<T> {
        let n = y.len();

        // k2
        for i in 0..n {
            self.tmp[i] = y[i] + h * (T::lit(A21) * self.k1[i]);
        }
        system.apply(t + T::lit(C2) * h, &self.tmp, &mut self.k2);

        // k3
        for i in 0..n {
            self.tmp[i] = y[i] + h * (T::lit(A31) * self.k1[i] + T::lit(A32) * self.k2[i]);
        }
        system.apply(t + T::lit(C3) * h, &self.tmp, &mut self.k3);

        // k4
        for i in 0..n {
            self.tmp[i] = y[i]
                + h * (T::lit(A41) * self.k1[i]
                    + T::lit(A42) * self.k2[i]
                    + T::lit(A43) * self.k3[i]);
        }
        system.apply(t + T::lit(C4) * h, &self.tmp, &mut self.k4);

        // k5
        for i in 0..n {
            self.tmp[i] = y[i]
                + h * (T::lit(A51) * self.k1[i]
                    + T::lit(A52) * self.k2[i]
                    + T::lit(A53) * self.k3[i]
                    + T::lit(A54) * self.k4[i]);
        }
        system.apply(t + T::lit(C5) * h, &self.tmp, &mut self.k5);

        // k6
        for i in 0..n {
            self.tmp[i] = y[i]
                + h * (T::lit(A61) * self.k1[i]
                    + T::lit(A62) * self.k2[i]
                    + T::lit(A63) * self.k3[i]
                    + T::lit(A64) * self.k4[i]
                    + T::lit(A65) * self.k5[i]);
        }
        system.apply(t + h, &self.tmp, &mut self.k6);

        // 5th order solution
        for i in 0..n {
            self.y_new[i] = y[i]
                + h * (T::lit(B1) * self.k1[i]
                    + T::lit(B3) * self.k3[i]
                    + T::lit(B4) * self.k4[i]
                    + T::lit(B5) * self.k5[i]
                    + T::lit(B6) * self.k6[i]);
        }

        // k7 = f(t + h, y_new), reused as k1 of the next step
        system.apply(t + h, &self.y_new, &mut self.k7);
        self.stats.fn_evals += 6;

        let error = self.error_norm(y, h);
        let finite = error.is_finite() && self.y_new.iter().all(|v| v.is_finite());
        let accepted = finite && error <= T::one();

        let h_next = if finite {
            h.abs() * self.controller.factor(error, self.last_rejected)
        } else {
            h.abs() * T::lit(self.controller.min_factor)
        };

        if accepted {
            self.stats.accepted_steps += 1;
            self.prepare_dense(t, y, h);
        } else {
            self.stats.rejected_steps += 1;
        }
        self.last_rejected = !accepted;

        StepAttempt {
            accepted,
            error: if finite { error } else { T::nan() },
            h_next,
        }
    }

    fn error_norm(&self, y: &[T], h: T) -> T {
        let n = y.len();
        let mut sum = T::zero();
        for i in 0..n {
            let err_i = h
                * (T::lit(E1) * self.k1[i]
                    + T::lit(E3) * self.k3[i]
                    + T::lit(E4) * self.k4[i]
                    + T::lit(E5) * self.k5[i]
                    + T::lit(E6) * self.k6[i]
                    + T::lit(E7) * self.k7[i]);
            let sk = self.tol.atol + self.tol.rtol * y[i].abs().max(self.y_new[i].abs());
            sum = sum + (err_i / sk).powi(2);
        }
        (sum / T::lit(n.max(1) as f64)).sqrt()
    }

    fn prepare_dense(&mut self, t: T, y: &[T], h: T) {
        for i in 0..y.len() {
            let ydiff = self.y_new[i] - y[i];
            let bspl = h * self.k1[i] - ydiff;
            self.rcont[0][i] = y[i];
            self.rcont[1][i] = ydiff;
            self.rcont[2][i] = bspl;
            self.rcont[3][i] = ydiff - h * self.k7[i] - bspl;
            self.rcont[4][i] = h
                * (T::lit(D1) * self.k1[i]
                    + T::lit(D3) * self.k3[i]
                    + T::lit(D4) * self.k4[i]
                    + T::lit(D5) * self.k5[i]
                    + T::lit(D6) * self.k6[i]
                    + T::lit(D7) * self.k7[i]);
        }
        self.t_old = t;
        self.h_old = h;
    }

    /// Evaluates the continuous extension of the last accepted step at `t`.
    pub fn interpolate(&self, t: T, out: &mut [T]) {
        let theta = (t - self.t_old) / self.h_old;
        let theta1 = T::one() - theta;
        let [r0, r1, r2, r3, r4] = &self.rcont;
        for i in 0..out.len() {
            out[i] = r0[i] + theta * (r1[i] + theta1 * (r2[i] + theta * (r3[i] + theta1 * r4[i])));
        }
    }

    /// State at the end of the last accepted step.
    pub fn accepted_state(&self) -> &[T] {
        &self.y_new
    }

    /// Moves the accepted state into `y` and carries k7 over as the next k1.
    pub fn commit(&mut self, y: &mut [T]) {
        y.copy_from_slice(&self.y_new);
        std::mem::swap(&mut self.k1, &mut self.k7);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Decay {
        rate: f64,
    }

    impl DynamicalSystem<f64> for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = -self.rate * x[0];
        }
    }

    struct Oscillator;

    impl DynamicalSystem<f64> for Oscillator {
        fn dimension(&self) -> usize {
            2
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = x[1];
            out[1] = -x[0];
        }
    }

    struct Blowup;

    impl DynamicalSystem<f64> for Blowup {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, _x: &[f64], out: &mut [f64]) {
            out[0] = f64::NAN;
        }
    }

    fn run_to(system: &impl DynamicalSystem<f64>, y0: &[f64], t_end: f64) -> (Vec<f64>, StepStats) {
        let mut solver = Dopri5::new(y0.len(), Tolerances::new(1e-10, 1e-10));
        let mut y = y0.to_vec();
        let mut t = 0.0;
        solver.prime(system, t, &y);
        let mut h = solver.initial_step(system, t, &y, t_end);
        while t < t_end {
            h = h.min(t_end - t);
            let attempt = solver.try_step(system, t, &y, h);
            assert!(attempt.is_finite(), "unexpected non-finite step");
            if attempt.accepted {
                solver.commit(&mut y);
                t += h;
            }
            h = attempt.h_next;
        }
        (y, solver.stats)
    }

    #[test]
    fn dopri5_matches_exponential_decay() {
        let (y, stats) = run_to(&Decay { rate: 0.7 }, &[2.0], 3.0);
        let exact = 2.0 * (-0.7f64 * 3.0).exp();
        assert!((y[0] - exact).abs() < 1e-8, "got {}, want {}", y[0], exact);
        assert!(stats.accepted_steps > 0);
        assert_eq!(
            stats.fn_evals,
            2 + 6 * (stats.accepted_steps + stats.rejected_steps)
        );
    }

    #[test]
    fn dopri5_conserves_oscillator_amplitude() {
        let t_end = 4.0 * std::f64::consts::PI;
        let (y, _) = run_to(&Oscillator, &[1.0, 0.0], t_end);
        assert!((y[0] - 1.0).abs() < 1e-7, "x = {}", y[0]);
        assert!(y[1].abs() < 1e-7, "v = {}", y[1]);
    }

    #[test]
    fn dense_output_tracks_exact_solution_inside_step() {
        let system = Oscillator;
        let mut solver = Dopri5::new(2, Tolerances::new(1e-10, 1e-10));
        let y = [1.0, 0.0];
        solver.prime(&system, 0.0, &y);
        let attempt = solver.try_step(&system, 0.0, &y, 0.02);
        assert!(attempt.accepted, "small step should be accepted");

        let mut out = [0.0; 2];
        for &t in &[0.0, 0.005, 0.01, 0.016, 0.02] {
            solver.interpolate(t, &mut out);
            assert!((out[0] - t.cos()).abs() < 1e-9, "x({t}) = {}", out[0]);
            assert!((out[1] + t.sin()).abs() < 1e-9, "v({t}) = {}", out[1]);
        }
        solver.interpolate(0.0, &mut out);
        assert_eq!(out, y);
    }

    #[test]
    fn oversized_step_is_rejected_and_shrunk() {
        let system = Oscillator;
        let mut solver = Dopri5::new(2, Tolerances::new(1e-12, 1e-12));
        let y = [1.0, 0.0];
        solver.prime(&system, 0.0, &y);
        let attempt = solver.try_step(&system, 0.0, &y, 3.0);
        assert!(!attempt.accepted);
        assert!(attempt.h_next < 3.0);
        assert_eq!(solver.stats.rejected_steps, 1);
    }

    #[test]
    fn non_finite_stage_is_reported() {
        let system = Blowup;
        let mut solver = Dopri5::new(1, Tolerances::new(1e-8, 1e-8));
        solver.prime(&system, 0.0, &[1.0]);
        let attempt = solver.try_step(&system, 0.0, &[1.0], 0.1);
        assert!(!attempt.accepted);
        assert!(!attempt.is_finite());
        assert!((attempt.h_next - 0.02).abs() < 1e-15);
    }

    #[test]
    fn initial_step_is_positive_and_bounded() {
        let system = Decay { rate: 1.0 };
        let mut solver = Dopri5::new(1, Tolerances::new(1e-8, 1e-8));
        solver.prime(&system, 0.0, &[1.0]);
        let h = solver.initial_step(&system, 0.0, &[1.0], 0.5);
        assert!(h > 0.0 && h <= 0.5, "h = {h}");
    }
}
