//! Optimal Control Problem (OCP) definition
//!
//! Receding-horizon tracking problem over N shooting intervals:
//!
//! ```text
//! minimize    Σₖ dtₖ ‖h(xₖ, vuₖ) - y_ref‖²_W + ‖h_N(x_N) - y_ref,N‖²_{W_N}
//!             + ρ Σₛ Σⱼ min(0, gⱼ(x(tₛ)) - b)²
//! subject to  x₀ = x_measured
//!             xₖ₊₁ = F(xₖ, vuₖ, dtₖ)          (RK4 over the quadrotor model)
//!             |vuₖ| <= vu_max, u_min <= u <= u_max
//! ```
//!
//! with outputs `h = (position or velocity, vu, pqr)` and terminal outputs
//! `h_N = (position or velocity, pqr)`. The path constraints `g` (pitch,
//! obstacles, workspace) enter through a quadratic penalty with backoff `b`,
//! sampled at every integrator substep `tₛ` after the measured state so that
//! nothing slips through between nodes. The command bounds are enforced by
//! projection during rollout.

use log::debug;
use nalgebra::{SVector, Vector3, Vector4};
use serde::{Deserialize, Serialize};

use quadmpc_core::dynamics::{index, QuadrotorDynamics, QuadrotorParams};
use quadmpc_core::environment::{EllipticCylinder, Environment, Obstacle, ObstacleField, WorkspaceBounds};
use quadmpc_core::math::rk4;
use quadmpc_core::{CommandVector, StateVector};

use crate::config::{ConfigError, ControllerConfig, TrackingMode};
use crate::constraints::{ActuatorLimits, ConstraintEvaluation, PathConstraints};

/// Number of tracked outputs per stage
pub const OUTPUT_DIM: usize = 10;

/// Number of tracked outputs at the terminal node (no command term)
pub const TERMINAL_OUTPUT_DIM: usize = 6;

pub type OutputVector = SVector<f64, OUTPUT_DIM>;

/// Tracking reference, shared by every stage of the horizon
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    /// Target position (or velocity in velocity tracking)
    pub primary: Vector3<f64>,
    /// Target rotor accelerations, normally zero
    pub command: Vector4<f64>,
    /// Target body rates, normally zero
    pub angular_rate: Vector3<f64>,
}

impl Default for Reference {
    fn default() -> Self {
        Self {
            primary: Vector3::zeros(),
            command: Vector4::zeros(),
            angular_rate: Vector3::zeros(),
        }
    }
}

impl Reference {
    /// Hold `target` with zero commands and rates
    pub fn new(target: Vector3<f64>) -> Self {
        Self {
            primary: target,
            ..Default::default()
        }
    }

    /// Ordered like the stage outputs: primary, vu1..vu4, p, q, r
    pub fn to_vector(&self) -> OutputVector {
        let mut y = OutputVector::zeros();
        y.fixed_rows_mut::<3>(0).copy_from(&self.primary);
        y.fixed_rows_mut::<4>(3).copy_from(&self.command);
        y.fixed_rows_mut::<3>(7).copy_from(&self.angular_rate);
        y
    }

    /// Parse a flat reference; anything but ten finite values is rejected
    pub fn from_slice(values: &[f64]) -> Result<Self, ConfigError> {
        if values.len() != OUTPUT_DIM {
            return Err(ConfigError::ReferenceDimension {
                expected: OUTPUT_DIM,
                got: values.len(),
            });
        }
        let reference = Self {
            primary: Vector3::new(values[0], values[1], values[2]),
            command: Vector4::new(values[3], values[4], values[5], values[6]),
            angular_rate: Vector3::new(values[7], values[8], values[9]),
        };
        if !reference.is_finite() {
            return Err(ConfigError::InvalidReference("non-finite component".into()));
        }
        Ok(reference)
    }

    pub fn is_finite(&self) -> bool {
        self.to_vector().iter().all(|v| v.is_finite())
    }
}

/// Forward simulation of a command sequence
#[derive(Debug, Clone)]
pub struct Rollout {
    /// N + 1 states, starting at the measured state
    pub states: Vec<StateVector>,
    /// N commands after projection onto the admissible set
    pub commands: Vec<CommandVector>,
    /// State after every integrator substep, N · substeps entries; the last
    /// sample of each interval is its end node
    pub samples: Vec<StateVector>,
}

/// Fully specified tracking problem
#[derive(Debug, Clone)]
pub struct OcpProblem {
    config: ControllerConfig,
    dynamics: QuadrotorDynamics,
    constraints: PathConstraints,
    limits: ActuatorLimits,
    intervals: Vec<f64>,
    reference: Reference,
}

impl OcpProblem {
    /// Number of shooting intervals N
    pub fn num_nodes(&self) -> usize {
        self.intervals.len()
    }

    /// Interval lengths dt₀..dt_{N-1}
    pub fn intervals(&self) -> &[f64] {
        &self.intervals
    }

    pub fn horizon_time(&self) -> f64 {
        self.intervals.iter().sum()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn params(&self) -> &QuadrotorParams {
        &self.dynamics.params
    }

    pub fn dynamics(&self) -> &QuadrotorDynamics {
        &self.dynamics
    }

    pub fn constraints(&self) -> &PathConstraints {
        &self.constraints
    }

    pub fn limits(&self) -> &ActuatorLimits {
        &self.limits
    }

    pub fn mode(&self) -> TrackingMode {
        self.config.weights.mode
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    pub fn set_reference(&mut self, reference: Reference) {
        self.reference = reference;
    }

    /// Stage outputs h(x, vu)
    pub fn output(&self, x: &StateVector, vu: &CommandVector) -> OutputVector {
        let primary = match self.mode() {
            TrackingMode::Position => index::X,
            TrackingMode::Velocity => index::VX,
        };
        let mut y = OutputVector::zeros();
        y.fixed_rows_mut::<3>(0).copy_from(&x.fixed_rows::<3>(primary));
        y.fixed_rows_mut::<4>(3).copy_from(vu);
        y.fixed_rows_mut::<3>(7).copy_from(&x.fixed_rows::<3>(index::P));
        y
    }

    /// RK4 steps per interval
    pub fn substeps(&self) -> usize {
        self.config.horizon.integrator_substeps.max(1)
    }

    /// Propagate `x` across interval `k` with a held command, appending the
    /// state after each substep to `samples`
    pub fn propagate(
        &self,
        x: &StateVector,
        vu: &CommandVector,
        k: usize,
        samples: &mut Vec<StateVector>,
    ) -> StateVector {
        let dynamics = &self.dynamics;
        let f = |_: f64, x: &StateVector| dynamics.derivative(x, vu);
        let substeps = self.substeps();
        let h = self.intervals[k] / substeps as f64;

        let mut state = *x;
        for i in 0..substeps {
            state = rk4(&state, i as f64 * h, h, &f);
            samples.push(state);
        }
        state
    }

    /// Simulate from `x0`, projecting each command onto the admissible set
    /// for the rotor speeds reached at its stage
    pub fn rollout(&self, x0: &StateVector, commands: &[CommandVector]) -> Rollout {
        let n = self.num_nodes();
        let mut states = Vec::with_capacity(n + 1);
        let mut projected = Vec::with_capacity(n);
        let mut samples = Vec::with_capacity(n * self.substeps());
        states.push(*x0);

        let mut x = *x0;
        for k in 0..n {
            let raw = commands.get(k).copied().unwrap_or_else(CommandVector::zeros);
            let actuators = x.fixed_rows::<4>(index::U1).into_owned();
            let vu = self.limits.project(&actuators, &raw, self.intervals[k]);
            x = self.propagate(&x, &vu, k, &mut samples);
            states.push(x);
            projected.push(vu);
        }

        Rollout {
            states,
            commands: projected,
            samples,
        }
    }

    /// Points along the horizon where path constraints are penalized
    pub fn constraint_samples(&self) -> usize {
        self.num_nodes() * self.substeps()
    }

    /// Length of the stacked residual vector
    pub fn residual_len(&self) -> usize {
        self.num_nodes() * OUTPUT_DIM + TERMINAL_OUTPUT_DIM + self.constraint_samples() * self.constraints.count()
    }

    /// Stack weighted tracking and penalty residuals so that the objective
    /// is ½‖r‖²
    ///
    /// `out` must hold [`Self::residual_len`] entries.
    pub fn residuals(&self, rollout: &Rollout, out: &mut [f64]) {
        let w = &self.config.weights;
        let stage_weights = stage_weight_vector(w.primary, w.command, w.angular_rate);
        let y_ref = self.reference.to_vector();
        let mut i = 0;

        for (k, dt) in self.intervals.iter().enumerate() {
            let y = self.output(&rollout.states[k], &rollout.commands[k]);
            for j in 0..OUTPUT_DIM {
                out[i] = (2.0 * stage_weights[j] * dt).sqrt() * (y[j] - y_ref[j]);
                i += 1;
            }
        }

        // Terminal node: primary and rates only
        let terminal = self.output(&rollout.states[self.num_nodes()], &CommandVector::zeros());
        for j in (0..3).chain(7..OUTPUT_DIM) {
            out[i] = (2.0 * stage_weights[j] * w.terminal_scale).sqrt() * (terminal[j] - y_ref[j]);
            i += 1;
        }

        // Node 0 is the measured state and cannot be changed
        let rho = (2.0 * w.constraint_penalty).sqrt();
        for x in &rollout.samples {
            self.constraints.for_each_shortfall(x, |v| {
                out[i] = rho * v;
                i += 1;
            });
        }
    }

    /// ½‖r‖² for a rollout
    pub fn objective(&self, rollout: &Rollout) -> f64 {
        let mut r = vec![0.0; self.residual_len()];
        self.residuals(rollout, &mut r);
        0.5 * r.iter().map(|v| v * v).sum::<f64>()
    }

    /// Worst path-constraint violation along the predicted trajectory,
    /// ignoring the backoff
    pub fn max_violation(&self, rollout: &Rollout) -> f64 {
        rollout
            .samples
            .iter()
            .map(|x| self.constraints.evaluate(x).max_violation)
            .fold(0.0, f64::max)
    }

    /// Path constraints at a single state
    pub fn evaluate_constraints(&self, x: &StateVector) -> ConstraintEvaluation {
        self.constraints.evaluate(x)
    }
}

/// Diagonal of the stage weight matrix W in output order
fn stage_weight_vector(primary: Vector3<f64>, command: f64, rate: Vector3<f64>) -> OutputVector {
    let mut w = OutputVector::zeros();
    w.fixed_rows_mut::<3>(0).copy_from(&primary);
    w.fixed_rows_mut::<4>(3).fill(command);
    w.fixed_rows_mut::<3>(7).copy_from(&rate);
    w
}

/// Builder for [`OcpProblem`]
pub struct OcpBuilder {
    config: ControllerConfig,
    params: QuadrotorParams,
    obstacles: ObstacleField,
    workspace: Option<WorkspaceBounds>,
    reference: Reference,
}

impl OcpBuilder {
    pub fn new(config: ControllerConfig) -> Self {
        let workspace = config.bounds.workspace;
        Self {
            config,
            params: QuadrotorParams::default(),
            obstacles: ObstacleField::default(),
            workspace,
            reference: Reference::default(),
        }
    }

    /// Vehicle parameters of the prediction model
    pub fn with_params(mut self, params: QuadrotorParams) -> Self {
        self.params = params;
        self
    }

    /// Capsule obstacles
    pub fn with_obstacles(mut self, obstacles: Vec<Obstacle>) -> Self {
        self.obstacles.capsules = obstacles;
        self
    }

    /// Elliptic-cylinder obstacles
    pub fn with_elliptic(mut self, elliptic: Vec<EllipticCylinder>) -> Self {
        self.obstacles.elliptic = elliptic;
        self
    }

    /// Extra clearance kept from every capsule
    pub fn with_safety_margin(mut self, margin: f64) -> Self {
        self.obstacles.safety_margin = margin;
        self
    }

    pub fn with_obstacle_field(mut self, field: ObstacleField) -> Self {
        self.obstacles = field;
        self
    }

    /// Obstacles and, if present, the workspace of a loaded environment
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.obstacles = environment.obstacles;
        if environment.workspace.is_some() {
            self.workspace = environment.workspace;
        }
        self
    }

    pub fn with_workspace(mut self, workspace: Option<WorkspaceBounds>) -> Self {
        self.workspace = workspace;
        self
    }

    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = reference;
        self
    }

    pub fn build(mut self) -> Result<OcpProblem, ConfigError> {
        self.config.bounds.workspace = self.workspace;
        self.config.validate()?;
        if !self.params.is_valid() {
            return Err(ConfigError::InvalidParams);
        }
        if !self.obstacles.is_valid() {
            return Err(ConfigError::InvalidObstacles(
                "obstacles need finite geometry and non-negative radii and margin".into(),
            ));
        }
        if !self.reference.is_finite() {
            return Err(ConfigError::InvalidReference("non-finite component".into()));
        }

        let intervals = self.config.horizon.compute_intervals();
        let limits = ActuatorLimits::from_bounds(&self.config.bounds);
        let constraints = PathConstraints::new(self.config.bounds.pitch_limit, self.obstacles, self.workspace)
            .with_backoff(self.config.bounds.constraint_backoff);

        debug!(
            "Built OCP: N={}, T={:.2}s, {} path constraints per stage, {:?} tracking",
            intervals.len(),
            self.config.horizon.horizon_time,
            constraints.count(),
            self.config.weights.mode
        );

        Ok(OcpProblem {
            dynamics: QuadrotorDynamics::new(self.params),
            constraints,
            limits,
            intervals,
            reference: self.reference,
            config: self.config,
        })
    }
}
