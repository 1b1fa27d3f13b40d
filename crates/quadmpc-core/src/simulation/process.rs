//! Ground-truth process loop
//!
//! Owns the true vehicle state and advances it by a variable timestep with
//! the most recently applied command held constant over the step.

use log::{debug, warn};
use thiserror::Error;

use crate::dynamics::{Command, QuadrotorDynamics, QuadrotorParams, VehicleState};
use crate::math::{rk4_substeps, rkf45_interval};

use super::{IntegratorKind, SimConfig, SimConfigError, SimHistory};

/// Plant integration errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IntegrationError {
    #[error("Timestep must be finite, got {0}")]
    NonFiniteTimestep(f64),
    #[error("Integrated state became non-finite after t = {time:.3} s")]
    Diverged { time: f64 },
}

/// Ground-truth simulation of one vehicle
#[derive(Debug, Clone)]
pub struct ProcessLoop {
    dynamics: QuadrotorDynamics,
    integrator: IntegratorKind,
    min_dt: f64,
    state: VehicleState,
    time: f64,
    command: Command,
    /// Step size carried between adaptive advances
    adaptive_step: f64,
    clamped_steps: usize,
    history: Option<SimHistory>,
}

impl ProcessLoop {
    /// Start at the configured hover state, t = 0
    pub fn new(config: &SimConfig) -> Result<Self, SimConfigError> {
        Self::with_state(config, config.initial_state())
    }

    /// Start from an arbitrary state, t = 0
    ///
    /// The config is validated first, so `min_dt` is known to be positive.
    pub fn with_state(config: &SimConfig, state: VehicleState) -> Result<Self, SimConfigError> {
        config.validate()?;
        let mut history = config.record_history.then(SimHistory::default);
        if let Some(h) = history.as_mut() {
            h.record(0.0, &state, &Command::zero());
        }

        Ok(Self {
            dynamics: QuadrotorDynamics::new(config.plant.clone()),
            integrator: config.integrator,
            min_dt: config.min_dt,
            state,
            time: 0.0,
            command: Command::zero(),
            adaptive_step: config.dt,
            clamped_steps: 0,
            history,
        })
    }

    /// Current ground-truth state
    pub fn state(&self) -> &VehicleState {
        &self.state
    }

    /// Accumulated simulation time [s]
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Last applied command
    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn params(&self) -> &QuadrotorParams {
        &self.dynamics.params
    }

    pub fn history(&self) -> Option<&SimHistory> {
        self.history.as_ref()
    }

    /// Steps whose dt had to be raised to the minimum
    pub fn clamped_steps(&self) -> usize {
        self.clamped_steps
    }

    /// Overwrite the state (e.g. scenario reset); time is kept
    pub fn set_state(&mut self, state: VehicleState) {
        self.state = state;
    }

    /// Effective step for a requested `dt`
    ///
    /// Zero, negative and sub-resolution steps are raised to `min_dt`.
    pub fn effective_dt(&self, dt: f64) -> Result<f64, IntegrationError> {
        if !dt.is_finite() {
            return Err(IntegrationError::NonFiniteTimestep(dt));
        }
        Ok(dt.max(self.min_dt))
    }

    /// Advance the plant by `dt` under `command`
    ///
    /// On error the state and time are left untouched.
    pub fn advance(&mut self, dt: f64, command: &Command) -> Result<&VehicleState, IntegrationError> {
        let step = self.effective_dt(dt)?;
        if step > dt {
            self.clamped_steps += 1;
            if self.clamped_steps == 1 {
                warn!("Process step {:.2e} s raised to minimum {:.2e} s", dt, step);
            } else {
                debug!("Process step {:.2e} s clamped ({} so far)", dt, self.clamped_steps);
            }
        }

        let x0 = self.state.to_vector();
        let vu = *command.as_vector();
        let dynamics = &self.dynamics;
        let f = |_t: f64, x: &crate::StateVector| dynamics.derivative(x, &vu);

        let x1 = match self.integrator {
            IntegratorKind::Rk4 { substeps } => rk4_substeps(&x0, self.time, step, substeps, f),
            IntegratorKind::Rkf45 { tolerance } => {
                let (x1, next) = rkf45_interval(&x0, self.time, step, self.adaptive_step, tolerance, f);
                self.adaptive_step = next;
                x1
            }
        };

        if !x1.iter().all(|v| v.is_finite()) {
            return Err(IntegrationError::Diverged { time: self.time });
        }

        self.state = VehicleState::from_vector(&x1);
        self.time += step;
        self.command = *command;

        if let Some(history) = self.history.as_mut() {
            history.record(self.time, &self.state, command);
        }

        Ok(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn rk4_config() -> SimConfig {
        SimConfig {
            integrator: IntegratorKind::Rk4 { substeps: 10 },
            ..Default::default()
        }
    }

    #[test]
    fn test_hover_stays_put() {
        for config in [rk4_config(), SimConfig::default()] {
            let mut process = ProcessLoop::new(&config).unwrap();
            for _ in 0..50 {
                process.advance(0.02, &Command::zero()).unwrap();
            }
            assert_relative_eq!(process.time(), 1.0, epsilon = 1e-9);
            assert_relative_eq!(process.state().position, Vector3::zeros(), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_rotors_off_is_free_fall() {
        let config = rk4_config();
        let state = VehicleState::default();
        let mut process = ProcessLoop::with_state(&config, state).unwrap();

        process.advance(1.0, &Command::zero()).unwrap();
        // Zero rotor speed: pure gravity
        assert_relative_eq!(process.state().position.z, -0.5 * 9.81, epsilon = 1e-9);
        assert_relative_eq!(process.state().velocity.z, -9.81, epsilon = 1e-9);
    }

    #[test]
    fn test_command_ramps_actuators() {
        let mut process = ProcessLoop::new(&rk4_config()).unwrap();
        let start = process.state().actuators;
        process.advance(0.1, &Command::new(10.0, 0.0, -10.0, 0.0)).unwrap();

        let u = process.state().actuators;
        assert_relative_eq!(u[0], start[0] + 1.0, epsilon = 1e-9);
        assert_relative_eq!(u[2], start[2] - 1.0, epsilon = 1e-9);
        assert_eq!(*process.command(), Command::new(10.0, 0.0, -10.0, 0.0));
    }

    #[test]
    fn test_non_positive_dt_is_clamped() {
        let config = rk4_config();
        let mut process = ProcessLoop::new(&config).unwrap();

        process.advance(0.0, &Command::zero()).unwrap();
        process.advance(-0.5, &Command::zero()).unwrap();

        assert_eq!(process.clamped_steps(), 2);
        assert_relative_eq!(process.time(), 2.0 * config.min_dt);
    }

    #[test]
    fn test_rejects_zero_min_dt() {
        let config = SimConfig {
            min_dt: 0.0,
            ..rk4_config()
        };
        assert!(matches!(ProcessLoop::new(&config), Err(SimConfigError::Invalid(_))));

        let config = SimConfig {
            dt: 1e-6,
            ..rk4_config()
        };
        assert!(ProcessLoop::with_state(&config, VehicleState::default()).is_err());
    }

    #[test]
    fn test_non_finite_dt_is_an_error() {
        let mut process = ProcessLoop::new(&rk4_config()).unwrap();
        let before = *process.state();

        let err = process.advance(f64::NAN, &Command::zero()).unwrap_err();
        assert!(matches!(err, IntegrationError::NonFiniteTimestep(_)));
        assert_eq!(*process.state(), before);
        assert_eq!(process.time(), 0.0);
    }

    #[test]
    fn test_divergence_leaves_state_untouched() {
        let mut process = ProcessLoop::new(&rk4_config()).unwrap();
        let before = *process.state();

        let err = process
            .advance(0.1, &Command::new(f64::INFINITY, 0.0, 0.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, IntegrationError::Diverged { .. }));
        assert_eq!(*process.state(), before);
    }

    #[test]
    fn test_history_records_every_advance() {
        let mut process = ProcessLoop::new(&rk4_config()).unwrap();
        for _ in 0..5 {
            process.advance(0.2, &Command::zero()).unwrap();
        }
        let history = process.history().unwrap();
        assert_eq!(history.len(), 6);
        assert_relative_eq!(history.duration(), 1.0, epsilon = 1e-12);
    }
}
