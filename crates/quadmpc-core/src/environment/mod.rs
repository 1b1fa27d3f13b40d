//! Static environment
//!
//! Obstacles the controller must avoid, the optional room the vehicle is
//! confined to, and their on-disk representation.

pub mod obstacle;
pub mod bounds;
pub mod persistence;

use std::path::PathBuf;

use thiserror::Error;

pub use obstacle::{Axis, Clearance, EllipticCylinder, Obstacle, ObstacleField};
pub use bounds::WorkspaceBounds;
pub use persistence::{load, load_environment, save, save_environment};

/// Environment loading/saving errors
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("Failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse environment document: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to encode environment document: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("Obstacle {index} is invalid (non-finite endpoint or negative radius)")]
    InvalidObstacle { index: usize },
    #[error("Safety margin must be finite and non-negative, got {0}")]
    InvalidMargin(f64),
    #[error("Workspace bounds are inverted or non-finite")]
    InvalidWorkspace,
}

/// Obstacle field plus optional room bounds
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    pub obstacles: ObstacleField,
    pub workspace: Option<WorkspaceBounds>,
}

impl Environment {
    pub fn new(obstacles: ObstacleField) -> Self {
        Self {
            obstacles,
            workspace: None,
        }
    }

    pub fn with_workspace(mut self, workspace: WorkspaceBounds) -> Self {
        self.workspace = Some(workspace);
        self
    }

    /// Check every obstacle and the workspace
    pub fn validate(&self) -> Result<(), EnvironmentError> {
        if let Some(index) = self.obstacles.capsules.iter().position(|o| !o.is_valid()) {
            return Err(EnvironmentError::InvalidObstacle { index });
        }
        if let Some(i) = self.obstacles.elliptic.iter().position(|e| !e.is_valid()) {
            return Err(EnvironmentError::InvalidObstacle {
                index: self.obstacles.capsules.len() + i,
            });
        }
        if !self.obstacles.safety_margin.is_finite() || self.obstacles.safety_margin < 0.0 {
            return Err(EnvironmentError::InvalidMargin(self.obstacles.safety_margin));
        }
        match self.workspace {
            Some(ws) if !ws.is_valid() => Err(EnvironmentError::InvalidWorkspace),
            _ => Ok(()),
        }
    }
}
