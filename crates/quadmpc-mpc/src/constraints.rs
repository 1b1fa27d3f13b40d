//! Path constraints for the OCP
//!
//! Hard bounds are enforced by construction:
//! - Command magnitude |vu| <= vu_max
//! - Rotor speed band u_min <= u <= u_max (through the command projection)
//!
//! Soft path constraints are expressed as margins `g(x) >= 0` and penalized
//! by the solver:
//! - Pitch bound |θ| <= θ_max
//! - Obstacle clearance for every capsule and elliptic cylinder
//! - Optional workspace box
//!
//! Every margin is in metres or radians. The solver penalizes
//! `min(0, g - backoff)`, so the plan stays `backoff` inside each bound while
//! feasibility of the measured state is judged on `g` itself.

use nalgebra::Vector4;

use quadmpc_core::dynamics::index;
use quadmpc_core::environment::{ObstacleField, WorkspaceBounds};
use quadmpc_core::{CommandVector, StateVector};

use crate::config::BoundsConfig;

/// Result of constraint evaluation
#[derive(Debug, Clone)]
pub struct ConstraintEvaluation {
    /// Constraint values (negative = satisfied, positive = violated)
    pub values: Vec<f64>,
    /// Names for debugging
    pub names: Vec<String>,
    /// Whether all constraints are satisfied
    pub all_satisfied: bool,
    /// Maximum violation (0 if all satisfied)
    pub max_violation: f64,
}

impl ConstraintEvaluation {
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            names: Vec::new(),
            all_satisfied: true,
            max_violation: 0.0,
        }
    }

    pub fn add(&mut self, name: &str, value: f64) {
        self.names.push(name.to_string());
        self.values.push(value);
        if value > 0.0 || value.is_nan() {
            self.all_satisfied = false;
            self.max_violation = self.max_violation.max(if value.is_nan() { f64::INFINITY } else { value });
        }
    }

    /// Name of the most violated constraint
    pub fn worst(&self) -> Option<(&str, f64)> {
        self.names
            .iter()
            .zip(&self.values)
            .filter(|(_, v)| **v > 0.0 || v.is_nan())
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(n, v)| (n.as_str(), *v))
    }
}

impl Default for ConstraintEvaluation {
    fn default() -> Self {
        Self::new()
    }
}

/// Rotor speed band and command limit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorLimits {
    pub min: f64,
    pub max: f64,
    pub command_max: f64,
}

impl ActuatorLimits {
    pub fn from_bounds(bounds: &BoundsConfig) -> Self {
        Self {
            min: bounds.actuator_min,
            max: bounds.actuator_max,
            command_max: bounds.command_max,
        }
    }

    /// Clamp a command so that it is admissible and keeps the rotor speeds
    /// inside the band over a zero-order hold of length `dt`
    ///
    /// Per rotor the admissible interval is
    ///
    /// ```text
    /// [max(-vu_max, (u_min - u) / dt), min(vu_max, (u_max - u) / dt)]
    /// ```
    ///
    /// If the rotor already sits outside the band the interval is empty; the
    /// command then drives it back as fast as allowed.
    pub fn project(&self, actuators: &Vector4<f64>, command: &CommandVector, dt: f64) -> CommandVector {
        let cmax = self.command_max;
        if dt <= 0.0 {
            return command.map(|v| v.clamp(-cmax, cmax));
        }

        let mut out = *command;
        for i in 0..4 {
            let lo = (-cmax).max((self.min - actuators[i]) / dt);
            let hi = cmax.min((self.max - actuators[i]) / dt);
            out[i] = if lo <= hi {
                out[i].clamp(lo, hi)
            } else if actuators[i] < self.min {
                cmax
            } else {
                -cmax
            };
        }
        out
    }

    /// Rotor speeds inside the band, up to `tol`
    pub fn contains(&self, actuators: &Vector4<f64>, tol: f64) -> bool {
        actuators.iter().all(|u| *u >= self.min - tol && *u <= self.max + tol)
    }
}

/// Soft path constraints at a single stage
#[derive(Debug, Clone)]
pub struct PathConstraints {
    pitch_limit: f64,
    obstacles: ObstacleField,
    workspace: Option<WorkspaceBounds>,
    backoff: f64,
}

impl PathConstraints {
    pub fn new(pitch_limit: f64, obstacles: ObstacleField, workspace: Option<WorkspaceBounds>) -> Self {
        Self {
            pitch_limit,
            obstacles,
            workspace,
            backoff: 0.0,
        }
    }

    /// Distance the plan keeps inside every margin
    pub fn with_backoff(mut self, backoff: f64) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn pitch_limit(&self) -> f64 {
        self.pitch_limit
    }

    pub fn backoff(&self) -> f64 {
        self.backoff
    }

    pub fn obstacles(&self) -> &ObstacleField {
        &self.obstacles
    }

    pub fn workspace(&self) -> Option<&WorkspaceBounds> {
        self.workspace.as_ref()
    }

    /// Number of margins per stage
    pub fn count(&self) -> usize {
        2 + self.obstacles.len() + if self.workspace.is_some() { 6 } else { 0 }
    }

    /// Visit each margin `g(x)` (satisfied when `g >= 0`) in a fixed order:
    /// pitch upper, pitch lower, obstacles, workspace
    ///
    /// Margins are raw; the backoff is left to the caller.
    pub fn for_each_margin(&self, x: &StateVector, mut f: impl FnMut(f64)) {
        let theta = x[index::THETA];
        f(self.pitch_limit - theta);
        f(theta + self.pitch_limit);

        let position = x.fixed_rows::<3>(index::X).into_owned();
        for clearance in self.obstacles.clearances(&position) {
            f(clearance);
        }

        if let Some(ws) = &self.workspace {
            for margin in ws.margins(&position) {
                f(margin);
            }
        }
    }

    /// Penalty value `min(0, g - backoff)` of each margin, same order as
    /// [`Self::for_each_margin`]
    pub fn for_each_shortfall(&self, x: &StateVector, mut f: impl FnMut(f64)) {
        let backoff = self.backoff;
        self.for_each_margin(x, |g| f((g - backoff).min(0.0)));
    }

    /// Evaluate all path constraints at a given state
    pub fn evaluate(&self, x: &StateVector) -> ConstraintEvaluation {
        let mut eval = ConstraintEvaluation::new();
        let mut k = 0;
        let capsules = self.obstacles.capsules.len();
        let obstacles = self.obstacles.len();

        self.for_each_margin(x, |g| {
            let name = match k {
                0 => "pitch_upper".to_string(),
                1 => "pitch_lower".to_string(),
                k if k < 2 + capsules => format!("obstacle_{}", k - 2),
                k if k < 2 + obstacles => format!("elliptic_{}", k - 2 - capsules),
                k => format!("workspace_{}", WORKSPACE_FACES[(k - 2 - obstacles) % 6]),
            };
            eval.add(&name, -g);
            k += 1;
        });

        eval
    }
}

const WORKSPACE_FACES: [&str; 6] = ["x_min", "y_min", "z_min", "x_max", "y_max", "z_max"];
