//! Process simulation
//!
//! The ground-truth side of the closed loop: integrates the vehicle model
//! under the applied command and hands the new state back to the controller.

pub mod config;
pub mod process;
pub mod clock;
pub mod history;

pub use config::*;
pub use process::*;
pub use clock::*;
pub use history::*;
