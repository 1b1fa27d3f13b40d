//! Controller configuration
//!
//! Horizon, cost weights, bounds and solver settings for the receding-horizon
//! controller. All sections default to the position-tracking setup and may be
//! partially overridden from TOML.

use std::path::{Path, PathBuf};

use log::warn;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use quadmpc_core::environment::WorkspaceBounds;

/// Malformed problem setup; the controller must be rebuilt
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid horizon: {0}")]
    InvalidHorizon(String),
    #[error("Invalid cost weights: {0}")]
    InvalidWeights(String),
    #[error("Invalid bounds: {0}")]
    InvalidBounds(String),
    #[error("Invalid solver settings: {0}")]
    InvalidSolver(String),
    #[error("Invalid obstacle field: {0}")]
    InvalidObstacles(String),
    #[error("Invalid vehicle parameters")]
    InvalidParams,
    #[error("Invalid reference: {0}")]
    InvalidReference(String),
    #[error("Reference must have {expected} components, got {got}")]
    ReferenceDimension { expected: usize, got: usize },
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse controller config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Main controller configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// OCP horizon configuration
    pub horizon: HorizonConfig,
    /// Cost function weights
    pub weights: CostWeights,
    /// State and command bounds
    pub bounds: BoundsConfig,
    /// Solver configuration
    pub solver: SolverConfig,
}

impl ControllerConfig {
    /// Climb-to-waypoint setup: 8 s horizon over 20 nodes, tracks position
    pub fn position_tracking() -> Self {
        Self::default()
    }

    /// Joystick-style setup: 1 s horizon over 3 nodes, tracks velocity inside a room
    pub fn velocity_tracking() -> Self {
        Self {
            horizon: HorizonConfig {
                num_nodes: 3,
                horizon_time: 1.0,
                non_uniform: false,
                integrator_substeps: 4,
            },
            weights: CostWeights {
                mode: TrackingMode::Velocity,
                primary: Vector3::repeat(1e-1),
                command: 1e-9,
                angular_rate: Vector3::repeat(1e-1),
                terminal_scale: 1.0,
                constraint_penalty: 100.0,
            },
            bounds: BoundsConfig {
                command_max: 200.0,
                workspace: Some(WorkspaceBounds::room()),
                ..BoundsConfig::default()
            },
            solver: SolverConfig {
                control_period: 0.05,
                ..SolverConfig::default()
            },
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.horizon.validate()?;
        self.weights.validate()?;
        self.bounds.validate()?;
        self.solver.validate()
    }
}

/// Horizon configuration for OCP
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HorizonConfig {
    /// Number of shooting intervals N (N + 1 stages)
    pub num_nodes: usize,
    /// Total horizon time T [s]
    pub horizon_time: f64,
    /// Grow intervals linearly along the horizon (last ≈ 2x first)
    pub non_uniform: bool,
    /// RK4 steps per interval in rollouts
    pub integrator_substeps: usize,
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            num_nodes: 20,          // solve cost grows roughly with N²
            horizon_time: 8.0,
            non_uniform: false,
            integrator_substeps: 4,
        }
    }
}

impl HorizonConfig {
    /// Compute time intervals for each segment
    pub fn compute_intervals(&self) -> Vec<f64> {
        if !self.non_uniform || self.num_nodes < 2 {
            let dt = self.horizon_time / self.num_nodes.max(1) as f64;
            return vec![dt; self.num_nodes];
        }

        // dt_k = dt_0 + k δ with dt_{N-1} = 2 dt_0 and Σ dt_k = T
        let n = self.num_nodes as f64;
        let dt_0 = self.horizon_time / (1.5 * n);
        let delta = dt_0 / (n - 1.0);

        (0..self.num_nodes)
            .map(|k| dt_0 + k as f64 * delta)
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_nodes == 0 {
            return Err(ConfigError::InvalidHorizon("num_nodes must be at least 1".into()));
        }
        if !(self.horizon_time.is_finite() && self.horizon_time > 0.0) {
            return Err(ConfigError::InvalidHorizon(format!(
                "horizon_time must be positive, got {}",
                self.horizon_time
            )));
        }
        if self.integrator_substeps == 0 {
            return Err(ConfigError::InvalidHorizon("integrator_substeps must be at least 1".into()));
        }
        Ok(())
    }
}

/// Quantity tracked by the first three outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Reference holds a target position
    Position,
    /// Reference holds a target velocity
    Velocity,
}

/// Least-squares weights on h = (primary, vu, pqr)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    /// What the primary outputs track
    pub mode: TrackingMode,
    /// Position (or velocity) weight
    pub primary: Vector3<f64>,
    /// Rotor acceleration weight, applied to all four commands
    pub command: f64,
    /// Body rate weight (p, q, r)
    pub angular_rate: Vector3<f64>,
    /// Multiplier on the terminal node's primary and rate terms
    pub terminal_scale: f64,
    /// Quadratic penalty on pitch, obstacle and workspace violations
    pub constraint_penalty: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            mode: TrackingMode::Position,
            primary: Vector3::repeat(1e-5),
            // Light jerk penalty; much lower and the rotors chatter
            command: 1e-9,
            // Two orders above position keeps the attitude loop damped
            angular_rate: Vector3::repeat(1e-3),
            terminal_scale: 1.0,
            constraint_penalty: 1.0,
        }
    }
}

impl CostWeights {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let all = self
            .primary
            .iter()
            .chain(self.angular_rate.iter())
            .copied()
            .chain([self.command, self.terminal_scale]);
        for w in all {
            if !(w.is_finite() && w >= 0.0) {
                return Err(ConfigError::InvalidWeights(format!("weights must be non-negative, got {w}")));
            }
        }
        if !(self.constraint_penalty.is_finite() && self.constraint_penalty > 0.0) {
            return Err(ConfigError::InvalidWeights(format!(
                "constraint_penalty must be positive, got {}",
                self.constraint_penalty
            )));
        }

        if self.mode == TrackingMode::Position {
            let rate = self.angular_rate.min();
            let primary = self.primary.max();
            if primary > 0.0 && rate < 100.0 * primary {
                warn!(
                    "Angular-rate weight {:.1e} is less than 100x position weight {:.1e}; closed loop may oscillate",
                    rate, primary
                );
            }
        }
        Ok(())
    }
}

/// Constraint bounds configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundsConfig {
    /// Lowest rotor speed
    pub actuator_min: f64,
    /// Highest rotor speed
    pub actuator_max: f64,
    /// Largest |vu| (rotor acceleration)
    pub command_max: f64,
    /// Largest |theta| [rad], keeps the Euler kinematics away from cos θ = 0
    pub pitch_limit: f64,
    /// Distance the plan keeps inside every path constraint [m or rad]
    ///
    /// Penalized constraints are only met approximately; the backoff keeps
    /// those small violations on the safe side of the true bound.
    pub constraint_backoff: f64,
    /// Optional room the vehicle must stay inside
    pub workspace: Option<WorkspaceBounds>,
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            actuator_min: 16.0,
            actuator_max: 95.0,
            command_max: 100.0,
            pitch_limit: 1.0,
            constraint_backoff: 0.1,
            workspace: None,
        }
    }
}

impl BoundsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.actuator_min.is_finite() && self.actuator_max.is_finite())
            || self.actuator_min < 0.0
            || self.actuator_min >= self.actuator_max
        {
            return Err(ConfigError::InvalidBounds(format!(
                "actuator band [{}, {}] is empty or negative",
                self.actuator_min, self.actuator_max
            )));
        }
        if !(self.command_max.is_finite() && self.command_max > 0.0) {
            return Err(ConfigError::InvalidBounds(format!(
                "command_max must be positive, got {}",
                self.command_max
            )));
        }
        if !(self.pitch_limit > 0.0 && self.pitch_limit < std::f64::consts::FRAC_PI_2) {
            return Err(ConfigError::InvalidBounds(format!(
                "pitch_limit must lie in (0, π/2), got {}",
                self.pitch_limit
            )));
        }
        if !(self.constraint_backoff >= 0.0 && self.constraint_backoff < self.pitch_limit) {
            return Err(ConfigError::InvalidBounds(format!(
                "constraint_backoff must lie in [0, pitch_limit), got {}",
                self.constraint_backoff
            )));
        }
        if let Some(ws) = &self.workspace {
            if !ws.is_valid() {
                return Err(ConfigError::InvalidBounds("workspace is inverted or non-finite".into()));
            }
        }
        Ok(())
    }
}

/// Solver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Control period of the surrounding loop [s]
    pub control_period: f64,
    /// Initial Levenberg-Marquardt damping
    pub initial_damping: f64,
    /// Damping floor
    pub min_damping: f64,
    /// Damping ceiling
    pub max_damping: f64,
    /// Halvings tried before a step is rejected
    pub max_line_search_steps: usize,
    /// Largest change of any single planned command per iteration [rad/s²]
    pub max_step: f64,
    /// Relative perturbation for finite-difference Jacobians
    pub finite_difference_step: f64,
    /// Violation at the measured state above which the problem is infeasible
    pub infeasibility_tolerance: f64,
    /// Consecutive failed iterations before the controller gives up
    pub max_consecutive_failures: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            control_period: 0.2,
            initial_damping: 1e-3,
            // Pure Gauss-Newton steps overshoot once a penalty switches on
            min_damping: 1e-4,
            max_damping: 1e6,
            max_line_search_steps: 10,
            max_step: 50.0,
            finite_difference_step: 1e-6,
            infeasibility_tolerance: 1e-3,
            max_consecutive_failures: 10,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("control_period", self.control_period),
            ("initial_damping", self.initial_damping),
            ("min_damping", self.min_damping),
            ("max_damping", self.max_damping),
            ("max_step", self.max_step),
            ("finite_difference_step", self.finite_difference_step),
            ("infeasibility_tolerance", self.infeasibility_tolerance),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::InvalidSolver(format!("{name} must be positive, got {value}")));
            }
        }
        if self.min_damping > self.max_damping {
            return Err(ConfigError::InvalidSolver("min_damping exceeds max_damping".into()));
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::InvalidSolver("max_consecutive_failures must be at least 1".into()));
        }
        Ok(())
    }
}
