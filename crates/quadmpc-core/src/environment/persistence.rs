//! Obstacle persistence
//!
//! Environments are stored as TOML:
//!
//! ```toml
//! safety_margin = 1.0
//!
//! [[obstacles]]
//! start = [0.0, 0.0, 0.0]
//! end = [0.0, 0.0, 10.0]
//! radius = 1.5
//!
//! [workspace]
//! min = [-15.0, -15.0, 1.0]
//! max = [15.0, 15.0, 15.0]
//! ```
//!
//! Floats are written in shortest round-trip form, so `load(save(x)) == x`.

use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use super::{EllipticCylinder, Environment, EnvironmentError, Obstacle, ObstacleField, WorkspaceBounds};

/// On-disk layout; scalar keys precede tables
#[derive(Debug, Default, Serialize, Deserialize)]
struct EnvironmentDocument {
    #[serde(default)]
    safety_margin: f64,
    #[serde(default)]
    obstacles: Vec<Obstacle>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    elliptic: Vec<EllipticCylinder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    workspace: Option<WorkspaceBounds>,
}

impl From<EnvironmentDocument> for Environment {
    fn from(doc: EnvironmentDocument) -> Self {
        Self {
            obstacles: ObstacleField {
                capsules: doc.obstacles,
                elliptic: doc.elliptic,
                safety_margin: doc.safety_margin,
            },
            workspace: doc.workspace,
        }
    }
}

impl From<&Environment> for EnvironmentDocument {
    fn from(env: &Environment) -> Self {
        Self {
            safety_margin: env.obstacles.safety_margin,
            obstacles: env.obstacles.capsules.clone(),
            elliptic: env.obstacles.elliptic.clone(),
            workspace: env.workspace,
        }
    }
}

/// Parse an environment document and validate it
pub fn parse_environment(text: &str) -> Result<Environment, EnvironmentError> {
    let doc: EnvironmentDocument = toml::from_str(text)?;
    let env = Environment::from(doc);
    env.validate()?;
    Ok(env)
}

/// Encode an environment document
pub fn encode_environment(env: &Environment) -> Result<String, EnvironmentError> {
    Ok(toml::to_string(&EnvironmentDocument::from(env))?)
}

/// Load a full environment (obstacles, margin, workspace)
pub fn load_environment(path: impl AsRef<Path>) -> Result<Environment, EnvironmentError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| EnvironmentError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let env = parse_environment(&text)?;
    info!(
        "Loaded {} capsule(s) and {} elliptic cylinder(s) from {:?}",
        env.obstacles.capsules.len(),
        env.obstacles.elliptic.len(),
        path
    );
    Ok(env)
}

/// Save a full environment
pub fn save_environment(path: impl AsRef<Path>, env: &Environment) -> Result<(), EnvironmentError> {
    let path = path.as_ref();
    let text = encode_environment(env)?;
    fs::write(path, text).map_err(|source| EnvironmentError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the capsule list from an environment file
pub fn load(path: impl AsRef<Path>) -> Result<Vec<Obstacle>, EnvironmentError> {
    Ok(load_environment(path)?.obstacles.capsules)
}

/// Save a capsule list as an environment file
pub fn save(path: impl AsRef<Path>, obstacles: &[Obstacle]) -> Result<(), EnvironmentError> {
    let env = Environment::new(ObstacleField::new(obstacles.to_vec(), 0.0));
    save_environment(path, &env)
}
