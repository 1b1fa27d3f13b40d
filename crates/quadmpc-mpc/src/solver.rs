//! Real-time iteration solver
//!
//! [`OcpSolver`] is the seam between the controller and the numerical
//! method. The built-in [`GaussNewtonSolver`] performs one damped
//! Gauss-Newton step per call on the single-shooting least-squares problem
//! assembled by [`OcpProblem`]:
//!
//! ```text
//! U = (vu₀, ..., vu_{N-1})                 decision variables (4N)
//! r(U) = residuals(rollout(x₀, U))         stacked weighted residuals
//! J = ∂r/∂U                                 central finite differences
//! (JᵀJ + λ D) ΔU = -Jᵀr                      Levenberg-Marquardt, D = diag(JᵀJ)
//! ΔU ← ΔU · min(1, Δmax / ‖ΔU‖∞)             step cap
//! U ← U + α ΔU,  α ∈ {1, ½, ¼, ...}          until ½‖r‖² decreases
//! ```
//!
//! The warm start (shifted previous plan) makes successive calls converge
//! across control ticks instead of within one.

use std::time::Instant;

use log::{debug, trace};
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use quadmpc_core::{CommandVector, StateVector, COMMAND_DIM};

use crate::config::SolverConfig;
use crate::horizon::Horizon;
use crate::ocp::{OcpProblem, Rollout};

/// Solver errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SolverError {
    #[error("Non-finite {0} encountered")]
    NonFinite(&'static str),
    #[error("Normal equations are not positive definite")]
    Factorization,
    #[error("Initial state violates {constraint} by {violation:.3e}")]
    Infeasible { constraint: String, violation: f64 },
    #[error("Invalid horizon: expected {expected} intervals, got {got}")]
    HorizonMismatch { expected: usize, got: usize },
}

impl SolverError {
    /// Status code reported for this error
    pub fn status(&self) -> SolverStatus {
        match self {
            SolverError::NonFinite(_) => SolverStatus::NanDetected,
            SolverError::Factorization => SolverStatus::QpFailure,
            SolverError::Infeasible { .. } => SolverStatus::Infeasible,
            SolverError::HorizonMismatch { .. } => SolverStatus::Unknown,
        }
    }
}

/// Solver status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum SolverStatus {
    #[default]
    Unknown = -1,
    Success = 0,
    NanDetected = 1,
    MinStep = 3,
    QpFailure = 4,
    Ready = 5,
    Infeasible = 9,
}

impl From<i32> for SolverStatus {
    fn from(code: i32) -> Self {
        match code {
            0 => SolverStatus::Success,
            1 => SolverStatus::NanDetected,
            3 => SolverStatus::MinStep,
            4 => SolverStatus::QpFailure,
            5 => SolverStatus::Ready,
            9 => SolverStatus::Infeasible,
            _ => SolverStatus::Unknown,
        }
    }
}

impl SolverStatus {
    /// Iteration produced a usable plan
    pub fn is_usable(self) -> bool {
        matches!(self, SolverStatus::Success | SolverStatus::MinStep)
    }
}

/// Statistics of a single iteration
#[derive(Debug, Clone, Default)]
pub struct SolveStatistics {
    pub status: SolverStatus,
    /// Iterations performed (at most one per call)
    pub iterations: usize,
    /// Trial step sizes evaluated
    pub line_search_steps: usize,
    /// Whether a step was taken
    pub step_accepted: bool,
    /// ‖α ΔU‖ of the accepted step
    pub step_norm: f64,
    /// ½‖r‖² before the iteration
    pub initial_objective: f64,
    /// ½‖r‖² of the plan written back
    pub objective: f64,
    /// Worst path-constraint violation along the predicted trajectory
    pub max_violation: f64,
    /// Damping after the iteration
    pub damping: f64,
    /// Wall time [ms]
    pub solve_time_ms: f64,
}

/// One-iteration OCP solver
pub trait OcpSolver {
    /// Size internal buffers for `problem`
    fn prepare(&mut self, _problem: &OcpProblem) -> Result<(), SolverError> {
        Ok(())
    }

    /// Improve the plan in `horizon` for the measured state `x0`
    ///
    /// On error the horizon must be left untouched.
    fn iterate(
        &mut self,
        problem: &OcpProblem,
        horizon: &mut Horizon,
        x0: &StateVector,
    ) -> Result<SolveStatistics, SolverError>;

    /// Forget warm-start data such as adaptive damping
    fn reset(&mut self) {}
}

/// Damped Gauss-Newton real-time iteration
#[derive(Debug, Clone)]
pub struct GaussNewtonSolver {
    settings: SolverConfig,
    damping: f64,
    jacobian: DMatrix<f64>,
    residual: Vec<f64>,
    plus: Vec<f64>,
    minus: Vec<f64>,
}

impl GaussNewtonSolver {
    pub fn new(settings: SolverConfig) -> Self {
        let damping = settings.initial_damping;
        Self {
            settings,
            damping,
            jacobian: DMatrix::zeros(0, 0),
            residual: Vec::new(),
            plus: Vec::new(),
            minus: Vec::new(),
        }
    }

    /// Solver set up from the problem's solver section
    pub fn for_problem(problem: &OcpProblem) -> Self {
        let mut solver = Self::new(problem.config().solver.clone());
        solver.resize(problem);
        solver
    }

    pub fn damping(&self) -> f64 {
        self.damping
    }

    fn resize(&mut self, problem: &OcpProblem) {
        let rows = problem.residual_len();
        let cols = problem.num_nodes() * COMMAND_DIM;
        if self.jacobian.shape() != (rows, cols) {
            self.jacobian = DMatrix::zeros(rows, cols);
            self.residual = vec![0.0; rows];
            self.plus = vec![0.0; rows];
            self.minus = vec![0.0; rows];
        }
    }

    /// Reject measured states that already violate a path constraint
    fn check_initial_state(&self, problem: &OcpProblem, x0: &StateVector) -> Result<(), SolverError> {
        if !x0.iter().all(|v| v.is_finite()) {
            return Err(SolverError::NonFinite("measured state"));
        }
        let eval = problem.evaluate_constraints(x0);
        if eval.max_violation > self.settings.infeasibility_tolerance {
            let (name, violation) = eval.worst().unwrap_or(("unknown", eval.max_violation));
            return Err(SolverError::Infeasible {
                constraint: name.to_string(),
                violation,
            });
        }
        Ok(())
    }

    /// Central finite-difference Jacobian around `commands`
    fn fill_jacobian(&mut self, problem: &OcpProblem, x0: &StateVector, commands: &[CommandVector]) {
        let mut trial = commands.to_vec();
        let cols = commands.len() * COMMAND_DIM;

        for j in 0..cols {
            let (k, i) = (j / COMMAND_DIM, j % COMMAND_DIM);
            let base = commands[k][i];
            let h = self.settings.finite_difference_step * (1.0 + base.abs());

            trial[k][i] = base + h;
            problem.residuals(&problem.rollout(x0, &trial), &mut self.plus);
            trial[k][i] = base - h;
            problem.residuals(&problem.rollout(x0, &trial), &mut self.minus);
            trial[k][i] = base;

            let scale = 0.5 / h;
            for (row, (p, m)) in self.plus.iter().zip(&self.minus).enumerate() {
                self.jacobian[(row, j)] = (p - m) * scale;
            }
        }
    }
}

impl OcpSolver for GaussNewtonSolver {
    fn prepare(&mut self, problem: &OcpProblem) -> Result<(), SolverError> {
        self.resize(problem);
        debug!(
            "Gauss-Newton workspace: {} residuals x {} variables",
            self.jacobian.nrows(),
            self.jacobian.ncols()
        );
        Ok(())
    }

    fn iterate(
        &mut self,
        problem: &OcpProblem,
        horizon: &mut Horizon,
        x0: &StateVector,
    ) -> Result<SolveStatistics, SolverError> {
        let started = Instant::now();
        let n = problem.num_nodes();
        if horizon.num_intervals() != n {
            return Err(SolverError::HorizonMismatch {
                expected: n,
                got: horizon.num_intervals(),
            });
        }
        self.check_initial_state(problem, x0)?;
        self.resize(problem);

        // Linearize around the admissible version of the warm start
        let base = problem.rollout(x0, horizon.commands());
        problem.residuals(&base, &mut self.residual);
        if !self.residual.iter().all(|v| v.is_finite()) {
            return Err(SolverError::NonFinite("residual"));
        }
        let phi0 = half_squared_norm(&self.residual);

        self.fill_jacobian(problem, x0, &base.commands);
        if !self.jacobian.iter().all(|v| v.is_finite()) {
            return Err(SolverError::NonFinite("jacobian"));
        }

        let r = DVector::from_column_slice(&self.residual);
        let jtj = self.jacobian.tr_mul(&self.jacobian);
        let gradient = self.jacobian.tr_mul(&r);

        // Marquardt scaling with a floor for columns the projection froze
        let floor = (jtj.diagonal().max() * 1e-12).max(f64::MIN_POSITIVE);
        let mut normal = jtj.clone();
        for i in 0..normal.nrows() {
            normal[(i, i)] += self.damping * jtj[(i, i)].max(floor);
        }
        let cholesky = normal.cholesky().ok_or(SolverError::Factorization)?;
        let mut step = cholesky.solve(&(-&gradient));
        if !step.iter().all(|v| v.is_finite()) {
            return Err(SolverError::NonFinite("step"));
        }

        // Keeps the plan within reach of its linearization
        let largest = step.amax();
        if largest > self.settings.max_step {
            step *= self.settings.max_step / largest;
            trace!("Step capped from {:.3e} to {:.3e}", largest, self.settings.max_step);
        }

        let mut stats = SolveStatistics {
            iterations: 1,
            initial_objective: phi0,
            ..Default::default()
        };

        // Nothing left to gain from this linearization
        let predicted = -gradient.dot(&step) - 0.5 * step.dot(&(&jtj * &step));
        if predicted <= f64::EPSILON * phi0.max(f64::MIN_POSITIVE) {
            horizon.set_plan(&base.states, &base.commands);
            stats.status = SolverStatus::Success;
            stats.objective = phi0;
            stats.max_violation = problem.max_violation(&base);
            stats.damping = self.damping;
            stats.solve_time_ms = started.elapsed().as_secs_f64() * 1e3;
            trace!("Converged plan, objective {:.3e}", phi0);
            return Ok(stats);
        }

        let mut accepted: Option<(Rollout, f64, f64)> = None;
        let mut trial = base.commands.clone();
        let mut alpha = 1.0;
        for _ in 0..self.settings.max_line_search_steps.max(1) {
            stats.line_search_steps += 1;
            for (k, command) in trial.iter_mut().enumerate() {
                for i in 0..COMMAND_DIM {
                    command[i] = base.commands[k][i] + alpha * step[k * COMMAND_DIM + i];
                }
            }
            let candidate = problem.rollout(x0, &trial);
            let phi = problem.objective(&candidate);
            if phi.is_finite() && phi < phi0 {
                accepted = Some((candidate, phi, alpha));
                break;
            }
            alpha *= 0.5;
        }

        let plan = match accepted {
            Some((rollout, phi, alpha)) => {
                self.damping = (self.damping * 0.5).max(self.settings.min_damping);
                stats.status = SolverStatus::Success;
                stats.step_accepted = true;
                stats.step_norm = alpha * step.norm();
                stats.objective = phi;
                rollout
            }
            None => {
                self.damping = (self.damping * 10.0).min(self.settings.max_damping);
                stats.status = SolverStatus::MinStep;
                stats.objective = phi0;
                base
            }
        };

        horizon.set_plan(&plan.states, &plan.commands);
        stats.max_violation = problem.max_violation(&plan);
        stats.damping = self.damping;
        stats.solve_time_ms = started.elapsed().as_secs_f64() * 1e3;

        trace!(
            "RTI step: objective {:.3e} -> {:.3e}, {} trial(s), damping {:.1e}",
            phi0,
            stats.objective,
            stats.line_search_steps,
            self.damping
        );
        Ok(stats)
    }

    fn reset(&mut self) {
        self.damping = self.settings.initial_damping;
    }
}

fn half_squared_norm(r: &[f64]) -> f64 {
    0.5 * r.iter().map(|v| v * v).sum::<f64>()
}
