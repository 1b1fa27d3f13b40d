//! # quadmpc core
//!
//! Vehicle model and plant simulation for the quadrotor receding-horizon
//! controller.
//!
//! ## Modules
//!
//! - [`math`]: Numerical integrators and rotation helpers
//! - [`dynamics`]: 16-state quadrotor model driven by rotor accelerations
//! - [`environment`]: Capsule and elliptic-cylinder obstacles, room bounds, persistence
//! - [`simulation`]: Process loop that owns the ground-truth state

pub mod math;
pub mod dynamics;
pub mod environment;
pub mod simulation;

use nalgebra::{SVector, Vector4};

/// Full 16-component vehicle state vector
pub type StateVector = SVector<f64, STATE_DIM>;

/// Rotor acceleration command vector
pub type CommandVector = Vector4<f64>;

/// Number of state components
pub const STATE_DIM: usize = 16;

/// Number of command components
pub const COMMAND_DIM: usize = 4;

/// Gravity constant [m/s²]
pub const GRAVITY: f64 = 9.81;
