//! Vehicle dynamics
//!
//! The quadrotor model shared by the process loop (ground truth) and the
//! controller's horizon rollouts.

pub mod quadrotor;

pub use quadrotor::*;
