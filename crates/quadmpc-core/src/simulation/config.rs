//! Simulation configuration

use std::path::Path;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dynamics::{QuadrotorParams, VehicleState};

/// Plant integration scheme
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegratorKind {
    /// Fixed number of RK4 steps per advance
    Rk4 { substeps: usize },
    /// Adaptive Runge-Kutta-Fehlberg 4(5)
    Rkf45 { tolerance: f64 },
}

impl Default for IntegratorKind {
    fn default() -> Self {
        IntegratorKind::Rkf45 { tolerance: 1e-8 }
    }
}

/// Simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Fixed tick length for stepped runs [s]
    pub dt: f64,
    /// Smallest accepted step; shorter (or non-positive) steps are clamped [s]
    pub min_dt: f64,
    /// Plant integrator
    pub integrator: IntegratorKind,
    /// Plant parameters (may differ from the controller's model)
    pub plant: QuadrotorParams,
    /// Initial hover position [m]
    pub initial_position: Vector3<f64>,
    /// Record every tick into a [`SimHistory`](super::SimHistory)
    pub record_history: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            dt: 0.2,       // one controller tick
            min_dt: 1e-4,  // below typical clock resolution of a busy loop
            integrator: IntegratorKind::default(),
            plant: QuadrotorParams::default(),
            initial_position: Vector3::zeros(),
            record_history: true,
        }
    }
}

/// Simulation configuration errors
#[derive(Debug, Error)]
pub enum SimConfigError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse simulation config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid simulation config: {0}")]
    Invalid(String),
}

impl SimConfig {
    /// Hover state at the configured position
    pub fn initial_state(&self) -> VehicleState {
        VehicleState::hover(self.initial_position, &self.plant)
    }

    pub fn validate(&self) -> Result<(), SimConfigError> {
        if !(self.min_dt.is_finite() && self.min_dt > 0.0) {
            return Err(SimConfigError::Invalid(format!("min_dt must be positive, got {}", self.min_dt)));
        }
        if !(self.dt.is_finite() && self.dt >= self.min_dt) {
            return Err(SimConfigError::Invalid(format!("dt must be at least min_dt, got {}", self.dt)));
        }
        match self.integrator {
            IntegratorKind::Rk4 { substeps: 0 } => {
                return Err(SimConfigError::Invalid("rk4 needs at least one substep".into()));
            }
            IntegratorKind::Rkf45 { tolerance } if !(tolerance.is_finite() && tolerance > 0.0) => {
                return Err(SimConfigError::Invalid(format!("rkf45 tolerance must be positive, got {tolerance}")));
            }
            _ => {}
        }
        if !self.plant.is_valid() {
            return Err(SimConfigError::Invalid("plant parameters must be positive and finite".into()));
        }
        Ok(())
    }

    pub fn from_toml_str(text: &str) -> Result<Self, SimConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SimConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SimConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn test_toml_overrides() {
        let config = SimConfig::from_toml_str(
            r#"
            dt = 0.05
            initial_position = [0.0, 0.0, 1.0]

            [integrator]
            kind = "rk4"
            substeps = 8

            [plant]
            mass = 1.1
            "#,
        )
        .unwrap();

        assert_eq!(config.dt, 0.05);
        assert_eq!(config.integrator, IntegratorKind::Rk4 { substeps: 8 });
        assert_eq!(config.plant.mass, 1.1);
        assert_eq!(config.plant.arm_length, 0.25);
        assert_eq!(config.initial_state().position.z, 1.0);
    }

    #[test]
    fn test_rejects_zero_substeps() {
        let result = SimConfig::from_toml_str(
            r#"
            [integrator]
            kind = "rk4"
            substeps = 0
            "#,
        );
        assert!(matches!(result, Err(SimConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_non_positive_min_dt() {
        let config = SimConfig {
            min_dt: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
