//! # quadmpc mpc
//!
//! Receding-horizon controller for a quadrotor with obstacle avoidance,
//! solved by real-time iteration: one warm-started Gauss-Newton step per
//! control tick.
//!
//! ## Architecture
//!
//! ```text
//! Setpoint ──► ReferenceManager ──► RecedingHorizonController ──► ProcessLoop
//!                   │                   │   (OcpProblem, Horizon,       │
//!                   │                   │    OcpSolver)                 │
//!                   └──── DirectionIndicator ──► DroneViewer ◄── state ─┘
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Horizon, weights, bounds and solver settings
//! - [`ocp`]: Tracking problem, rollout and residuals
//! - [`constraints`]: Command projection and path-constraint margins
//! - [`horizon`]: Plan storage and time shifting
//! - [`solver`]: `OcpSolver` trait and the Gauss-Newton RTI solver
//! - [`controller`]: Controller state machine and fail-safe command hold
//! - [`reference`]: Setpoint to reference mapping
//! - [`scene`], [`viewer`]: Rendering abstraction and vehicle display
//! - [`closed_loop`]: Controller, plant and display wired together

pub mod config;
pub mod ocp;
pub mod constraints;
pub mod horizon;
pub mod solver;
pub mod controller;
pub mod reference;
pub mod scene;
pub mod viewer;
pub mod closed_loop;

pub use config::{BoundsConfig, ConfigError, ControllerConfig, CostWeights, HorizonConfig, SolverConfig, TrackingMode};
pub use ocp::{OcpBuilder, OcpProblem, Reference};
pub use horizon::Horizon;
pub use solver::{GaussNewtonSolver, OcpSolver, SolveStatistics, SolverError, SolverStatus};
pub use controller::{ControllerError, ControllerState, InitializationError, RecedingHorizonController};
pub use reference::{DirectionIndicator, FixedSetpoint, ReferenceManager, ReferenceUpdate, ScriptedSetpoints, Setpoint, SetpointMapping, SetpointSource};
pub use scene::{Geometry, NullScene, RecordingScene, SceneSink};
pub use viewer::DroneViewer;
pub use closed_loop::{ClosedLoop, LoopError, TickReport};
