//! Numerical integration methods
//!
//! Fixed-step RK4 (used for horizon rollouts and the default plant) and an
//! adaptive Runge-Kutta-Fehlberg 4(5) scheme for the plant when a tolerance
//! driven step is preferred.

use nalgebra::SVector;

/// Smallest step the adaptive integrator will shrink to [s]
pub const MIN_ADAPTIVE_STEP: f64 = 1e-9;

/// Rejections allowed per adaptive step before the small step is accepted
const MAX_REJECTIONS: usize = 32;

/// Generic RK4 integrator for any state vector
///
/// Solves dx/dt = f(t, x) using the classic 4th-order Runge-Kutta method.
///
/// # Arguments
/// * `x` - Current state
/// * `t` - Current time
/// * `dt` - Time step
/// * `f` - Derivative function f(t, x) -> dx/dt
pub fn rk4<const N: usize, F>(
    x: &SVector<f64, N>,
    t: f64,
    dt: f64,
    f: F,
) -> SVector<f64, N>
where
    F: Fn(f64, &SVector<f64, N>) -> SVector<f64, N>,
{
    let k1 = f(t, x);
    let k2 = f(t + dt / 2.0, &(x + k1 * dt / 2.0));
    let k3 = f(t + dt / 2.0, &(x + k2 * dt / 2.0));
    let k4 = f(t + dt, &(x + k3 * dt));

    x + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0)
}

/// Integrate over `dt` with `substeps` equal RK4 steps
///
/// A `substeps` of zero is treated as one.
pub fn rk4_substeps<const N: usize, F>(
    x: &SVector<f64, N>,
    t: f64,
    dt: f64,
    substeps: usize,
    f: F,
) -> SVector<f64, N>
where
    F: Fn(f64, &SVector<f64, N>) -> SVector<f64, N>,
{
    let n = substeps.max(1);
    let h = dt / n as f64;
    let mut state = *x;
    for i in 0..n {
        state = rk4(&state, t + i as f64 * h, h, &f);
    }
    state
}

/// One adaptive Runge-Kutta-Fehlberg step
///
/// Estimates the local error from the embedded 4th/5th order pair and shrinks
/// the step until the error is below `tol` (or the step reaches
/// [`MIN_ADAPTIVE_STEP`]).
///
/// # Returns
/// (new_state, actual_dt_used, suggested_next_dt)
///
/// A non-finite error estimate is returned as-is; callers check the state.
pub fn rkf45<const N: usize, F>(
    x: &SVector<f64, N>,
    t: f64,
    dt: f64,
    tol: f64,
    f: F,
) -> (SVector<f64, N>, f64, f64)
where
    F: Fn(f64, &SVector<f64, N>) -> SVector<f64, N>,
{
    let mut h = dt;

    for _ in 0..MAX_REJECTIONS {
        let (x5, error) = fehlberg_step(x, t, h, &f);

        if !error.is_finite() {
            return (x5, h, h);
        }

        let s = if error > 1e-14 {
            0.84 * (tol * h / error).powf(0.25)
        } else {
            2.0
        };

        if error < tol || h <= MIN_ADAPTIVE_STEP {
            let next = (s * h).clamp(h * 0.1, h * 4.0);
            return (x5, h, next);
        }

        h = (h * s.clamp(0.1, 0.5)).max(MIN_ADAPTIVE_STEP);
    }

    let (x5, _) = fehlberg_step(x, t, h, &f);
    (x5, h, h)
}

/// Integrate across the whole interval `dt` with adaptive RKF45 steps
///
/// Returns the state at `t + dt` and the last suggested step size.
pub fn rkf45_interval<const N: usize, F>(
    x: &SVector<f64, N>,
    t: f64,
    dt: f64,
    initial_step: f64,
    tol: f64,
    f: F,
) -> (SVector<f64, N>, f64)
where
    F: Fn(f64, &SVector<f64, N>) -> SVector<f64, N>,
{
    let mut state = *x;
    let mut elapsed = 0.0;
    let mut h = initial_step.min(dt).max(MIN_ADAPTIVE_STEP);

    while dt - elapsed > MIN_ADAPTIVE_STEP {
        let step = h.min(dt - elapsed);
        let (next, used, suggested) = rkf45(&state, t + elapsed, step, tol, &f);
        state = next;
        elapsed += used;
        h = suggested;

        if !state.iter().all(|v| v.is_finite()) {
            break;
        }
    }

    (state, h)
}

/// Fehlberg tableau: returns the 5th order solution and the error estimate
fn fehlberg_step<const N: usize, F>(
    x: &SVector<f64, N>,
    t: f64,
    dt: f64,
    f: &F,
) -> (SVector<f64, N>, f64)
where
    F: Fn(f64, &SVector<f64, N>) -> SVector<f64, N>,
{
    let k1 = f(t, x);
    let k2 = f(t + dt / 4.0, &(x + k1 * dt / 4.0));
    let k3 = f(
        t + 3.0 * dt / 8.0,
        &(x + k1 * (3.0 * dt / 32.0) + k2 * (9.0 * dt / 32.0)),
    );
    let k4 = f(
        t + 12.0 * dt / 13.0,
        &(x + k1 * (1932.0 * dt / 2197.0) - k2 * (7200.0 * dt / 2197.0) + k3 * (7296.0 * dt / 2197.0)),
    );
    let k5 = f(
        t + dt,
        &(x + k1 * (439.0 * dt / 216.0) - k2 * (8.0 * dt) + k3 * (3680.0 * dt / 513.0) - k4 * (845.0 * dt / 4104.0)),
    );
    let k6 = f(
        t + dt / 2.0,
        &(x - k1 * (8.0 * dt / 27.0) + k2 * (2.0 * dt) - k3 * (3544.0 * dt / 2565.0) + k4 * (1859.0 * dt / 4104.0) - k5 * (11.0 * dt / 40.0)),
    );

    let x4 = x + (k1 * (25.0 / 216.0) + k3 * (1408.0 / 2565.0) + k4 * (2197.0 / 4104.0) - k5 * (1.0 / 5.0)) * dt;
    let x5 = x + (k1 * (16.0 / 135.0) + k3 * (6656.0 / 12825.0) + k4 * (28561.0 / 56430.0) - k5 * (9.0 / 50.0) + k6 * (2.0 / 55.0)) * dt;

    (x5, (x5 - x4).norm())
}
