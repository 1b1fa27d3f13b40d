//! Receding-horizon controller
//!
//! Wraps an [`OcpSolver`] in the real-time iteration loop: every call to
//! [`RecedingHorizonController::step`] shifts the plan to the current time,
//! runs exactly one solver iteration from the measured state and outputs
//! the first planned command. When an iteration fails the previous command
//! is held and the failure is reported to the caller.

use log::{debug, error, info, warn};
use thiserror::Error;

use quadmpc_core::dynamics::{Command, VehicleState};

use crate::config::ConfigError;
use crate::horizon::Horizon;
use crate::ocp::{OcpProblem, Reference};
use crate::solver::{GaussNewtonSolver, OcpSolver, SolveStatistics, SolverError, SolverStatus};

/// Rejected initial state
#[derive(Debug, Error, PartialEq)]
pub enum InitializationError {
    #[error("Initial state contains non-finite values")]
    NonFinite,
    #[error("Initial pitch {theta:.3} rad exceeds limit {limit:.3} rad")]
    PitchOutOfBounds { theta: f64, limit: f64 },
    #[error("Rotor {index} speed {value:.2} outside [{min}, {max}]")]
    ActuatorOutOfBand { index: usize, value: f64, min: f64, max: f64 },
    #[error("Initial time is not finite")]
    InvalidTime,
}

/// Controller errors
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Controller stepped before initialization")]
    NotInitialized,
    #[error("Time went backwards: {requested} < {previous}")]
    NonMonotonicTime { previous: f64, requested: f64 },
    #[error("Initialization failed: {0}")]
    Initialization(#[from] InitializationError),
    /// Iteration failed; the previous command is still applied
    #[error("Solver iteration failed ({status:?}), holding last command")]
    Solve {
        status: SolverStatus,
        #[source]
        source: SolverError,
    },
    #[error("{failures} consecutive solver failures")]
    FailureLimitExceeded {
        failures: usize,
        #[source]
        last: SolverError,
    },
}

impl ControllerError {
    /// The loop cannot continue on this controller
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ControllerError::Solve { .. })
    }
}

/// Controller lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No initial state yet
    Uninitialized,
    /// Seeded, no successful step yet
    Initialized,
    /// At least one successful step
    Stepping,
}

/// Real-time iteration MPC controller
///
/// Owns its problem, solver and horizon; nothing is shared between
/// controllers.
pub struct RecedingHorizonController<S: OcpSolver = GaussNewtonSolver> {
    problem: OcpProblem,
    solver: S,
    horizon: Horizon,
    state: ControllerState,
    output: Command,
    last_time: f64,
    consecutive_failures: usize,
    last_status: SolverStatus,
    last_stats: SolveStatistics,
}

impl RecedingHorizonController<GaussNewtonSolver> {
    /// Controller with the built-in Gauss-Newton solver
    pub fn new(problem: OcpProblem) -> Result<Self, ConfigError> {
        let solver = GaussNewtonSolver::for_problem(&problem);
        Self::with_solver(problem, solver)
    }
}

impl<S: OcpSolver> RecedingHorizonController<S> {
    pub fn with_solver(problem: OcpProblem, mut solver: S) -> Result<Self, ConfigError> {
        solver
            .prepare(&problem)
            .map_err(|e| ConfigError::InvalidSolver(e.to_string()))?;

        let hover = VehicleState::hover(Default::default(), problem.params());
        let horizon = Horizon::seeded(0.0, &hover, problem.intervals());

        Ok(Self {
            problem,
            solver,
            horizon,
            state: ControllerState::Uninitialized,
            output: Command::zero(),
            last_time: 0.0,
            consecutive_failures: 0,
            last_status: SolverStatus::Unknown,
            last_stats: SolveStatistics::default(),
        })
    }

    /// Seed the horizon with `state` at time `t0`
    ///
    /// Valid from any lifecycle state; a seeded controller starts over.
    pub fn initialize(&mut self, t0: f64, state: &VehicleState) -> Result<(), ControllerError> {
        self.check_initial_state(t0, state)?;

        self.horizon.reseed(t0, state);
        self.solver.reset();
        self.output = Command::zero();
        self.last_time = t0;
        self.consecutive_failures = 0;
        self.last_status = SolverStatus::Ready;
        self.last_stats = SolveStatistics::default();
        self.state = ControllerState::Initialized;

        info!(
            "Controller initialized at t={:.3}s, position ({:.2}, {:.2}, {:.2})",
            t0, state.position.x, state.position.y, state.position.z
        );
        Ok(())
    }

    fn check_initial_state(&self, t0: f64, state: &VehicleState) -> Result<(), InitializationError> {
        if !t0.is_finite() {
            return Err(InitializationError::InvalidTime);
        }
        if !state.is_finite() {
            return Err(InitializationError::NonFinite);
        }

        let limit = self.problem.constraints().pitch_limit();
        if state.theta().abs() > limit {
            return Err(InitializationError::PitchOutOfBounds {
                theta: state.theta(),
                limit,
            });
        }

        let limits = self.problem.limits();
        for (index, value) in state.actuators.iter().enumerate() {
            if *value < limits.min || *value > limits.max {
                return Err(InitializationError::ActuatorOutOfBand {
                    index,
                    value: *value,
                    min: limits.min,
                    max: limits.max,
                });
            }
        }
        Ok(())
    }

    /// One real-time iteration at time `t` from the measured state
    ///
    /// Returns the new command. On [`ControllerError::Solve`] the previous
    /// command stays in effect and [`Self::command`] still returns it.
    pub fn step(&mut self, t: f64, measured: &VehicleState) -> Result<Command, ControllerError> {
        if self.state == ControllerState::Uninitialized {
            return Err(ControllerError::NotInitialized);
        }
        // Equal times are allowed (repeated iteration at the same instant)
        if !(t >= self.last_time) {
            return Err(ControllerError::NonMonotonicTime {
                previous: self.last_time,
                requested: t,
            });
        }

        self.horizon.shift_to(t);
        self.last_time = t;

        let x0 = measured.to_vector();
        match self.solver.iterate(&self.problem, &mut self.horizon, &x0) {
            Ok(stats) => {
                self.output = self.horizon.first_command();
                self.consecutive_failures = 0;
                self.last_status = stats.status;
                self.state = ControllerState::Stepping;
                debug!(
                    "t={:.3}s objective {:.3e} violation {:.2e} in {:.2}ms",
                    t, stats.objective, stats.max_violation, stats.solve_time_ms
                );
                self.last_stats = stats;
                Ok(self.output)
            }
            Err(source) => {
                self.consecutive_failures += 1;
                let status = source.status();
                self.last_status = status;

                let limit = self.problem.config().solver.max_consecutive_failures;
                if self.consecutive_failures >= limit {
                    error!(
                        "Solver failed {} times in a row at t={:.3}s: {}",
                        self.consecutive_failures, t, source
                    );
                    return Err(ControllerError::FailureLimitExceeded {
                        failures: self.consecutive_failures,
                        last: source,
                    });
                }

                warn!(
                    "Solver failure {}/{} at t={:.3}s ({}), holding last command",
                    self.consecutive_failures, limit, t, source
                );
                Err(ControllerError::Solve { status, source })
            }
        }
    }

    /// Replace the tracking reference; used from the next step on
    pub fn set_reference(&mut self, reference: Reference) {
        self.problem.set_reference(reference);
    }

    pub fn reference(&self) -> &Reference {
        self.problem.reference()
    }

    /// Command currently applied
    pub fn command(&self) -> Command {
        self.output
    }

    /// Predicted state at stage `k` of the current plan
    pub fn predicted_state(&self, k: usize) -> Option<VehicleState> {
        self.horizon.state(k)
    }

    pub fn horizon(&self) -> &Horizon {
        &self.horizon
    }

    pub fn problem(&self) -> &OcpProblem {
        &self.problem
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    /// Lifecycle state
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Status of the last iteration
    pub fn status(&self) -> SolverStatus {
        self.last_status
    }

    /// Statistics of the last successful iteration
    pub fn statistics(&self) -> &SolveStatistics {
        &self.last_stats
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures
    }

    /// Back to [`ControllerState::Uninitialized`]
    pub fn reset(&mut self) {
        let hover = VehicleState::hover(Default::default(), self.problem.params());
        self.horizon.reseed(0.0, &hover);
        self.solver.reset();
        self.output = Command::zero();
        self.last_time = 0.0;
        self.consecutive_failures = 0;
        self.last_status = SolverStatus::Unknown;
        self.last_stats = SolveStatistics::default();
        self.state = ControllerState::Uninitialized;
    }
}
