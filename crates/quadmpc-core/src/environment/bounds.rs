//! Axis-aligned flight volume

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Room the vehicle must stay inside
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceBounds {
    /// Lower corner [m]
    pub min: Vector3<f64>,
    /// Upper corner [m]
    pub max: Vector3<f64>,
}

impl Default for WorkspaceBounds {
    fn default() -> Self {
        Self::room()
    }
}

impl WorkspaceBounds {
    pub fn new(min: Vector3<f64>, max: Vector3<f64>) -> Self {
        Self { min, max }
    }

    /// 30 m square room, floor margin of 1 m, ceiling at 15 m
    pub fn room() -> Self {
        Self {
            min: Vector3::new(-15.0, -15.0, 1.0),
            max: Vector3::new(15.0, 15.0, 15.0),
        }
    }

    /// Signed distances to the six faces (x-, y-, z-, x+, y+, z+), >= 0 inside
    pub fn margins(&self, point: &Vector3<f64>) -> [f64; 6] {
        let lower = point - self.min;
        let upper = self.max - point;
        [lower.x, lower.y, lower.z, upper.x, upper.y, upper.z]
    }

    pub fn contains(&self, point: &Vector3<f64>) -> bool {
        self.margins(point).iter().all(|m| *m >= 0.0)
    }

    pub fn is_valid(&self) -> bool {
        self.min.iter().chain(self.max.iter()).all(|v| v.is_finite())
            && (0..3).all(|i| self.min[i] < self.max[i])
    }
}
