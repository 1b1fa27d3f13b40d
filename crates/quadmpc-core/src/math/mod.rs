//! Mathematical utilities
//!
//! Runge-Kutta integrators for the vehicle ODE and the rotation helpers
//! needed to place the vehicle and obstacles in a scene.

pub mod rotation;
pub mod integrator;

pub use rotation::*;
pub use integrator::*;
