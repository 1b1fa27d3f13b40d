//! Scene sink abstraction
//!
//! Rendering backends implement [`SceneSink`]; nodes are addressed by string
//! ids. [`RecordingScene`] keeps every call in memory for headless runs and
//! tests.

use nalgebra::{UnitQuaternion, Vector3};

/// RGB color in [0, 1]
pub type Color = [f32; 3];

/// Shapes the viewer spawns; local axis of symmetry is z
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// Vehicle body
    Drone { arm_length: f64, color: Color },
    /// Capsule of total axis length `length` (excluding caps)
    Capsule { radius: f64, length: f64, color: Color },
    /// Cylinder with elliptic cross-section, semi-axes along local x and y
    EllipticCylinder { semi_axes: [f64; 2], length: f64, color: Color },
    /// Wire-frame box, for workspace bounds
    Box { half_extents: Vector3<f64>, color: Color },
    /// Direction arrow
    Arrow { length: f64, color: Color },
}

/// Rendering backend
pub trait SceneSink {
    /// Create a node; it stays at the origin until posed
    fn add_static_geometry(&mut self, id: &str, geometry: &Geometry);
    fn set_pose(&mut self, id: &str, position: &Vector3<f64>, orientation: &UnitQuaternion<f64>);
    /// Small persistent marker, e.g. a trail point
    fn add_marker(&mut self, id: &str, position: &Vector3<f64>);
    fn set_visible(&mut self, id: &str, visible: bool);
    /// Present the frame
    fn refresh(&mut self);
}

/// One recorded sink call
#[derive(Debug, Clone, PartialEq)]
pub enum SceneCall {
    AddGeometry { id: String, geometry: Geometry },
    SetPose { id: String, position: Vector3<f64>, orientation: UnitQuaternion<f64> },
    AddMarker { id: String, position: Vector3<f64> },
    SetVisible { id: String, visible: bool },
    Refresh,
}

/// In-memory sink
#[derive(Debug, Clone, Default)]
pub struct RecordingScene {
    pub calls: Vec<SceneCall>,
}

impl RecordingScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest pose set for `id`
    pub fn last_pose(&self, id: &str) -> Option<(Vector3<f64>, UnitQuaternion<f64>)> {
        self.calls.iter().rev().find_map(|call| match call {
            SceneCall::SetPose { id: i, position, orientation } if i == id => Some((*position, *orientation)),
            _ => None,
        })
    }

    /// Latest visibility set for `id`
    pub fn is_visible(&self, id: &str) -> Option<bool> {
        self.calls.iter().rev().find_map(|call| match call {
            SceneCall::SetVisible { id: i, visible } if i == id => Some(*visible),
            _ => None,
        })
    }

    pub fn geometry(&self, id: &str) -> Option<&Geometry> {
        self.calls.iter().find_map(|call| match call {
            SceneCall::AddGeometry { id: i, geometry } if i == id => Some(geometry),
            _ => None,
        })
    }

    pub fn markers(&self) -> impl Iterator<Item = &Vector3<f64>> + '_ {
        self.calls.iter().filter_map(|call| match call {
            SceneCall::AddMarker { position, .. } => Some(position),
            _ => None,
        })
    }

    pub fn refresh_count(&self) -> usize {
        self.calls.iter().filter(|c| matches!(c, SceneCall::Refresh)).count()
    }
}

impl SceneSink for RecordingScene {
    fn add_static_geometry(&mut self, id: &str, geometry: &Geometry) {
        self.calls.push(SceneCall::AddGeometry {
            id: id.to_string(),
            geometry: geometry.clone(),
        });
    }

    fn set_pose(&mut self, id: &str, position: &Vector3<f64>, orientation: &UnitQuaternion<f64>) {
        self.calls.push(SceneCall::SetPose {
            id: id.to_string(),
            position: *position,
            orientation: *orientation,
        });
    }

    fn add_marker(&mut self, id: &str, position: &Vector3<f64>) {
        self.calls.push(SceneCall::AddMarker {
            id: id.to_string(),
            position: *position,
        });
    }

    fn set_visible(&mut self, id: &str, visible: bool) {
        self.calls.push(SceneCall::SetVisible {
            id: id.to_string(),
            visible,
        });
    }

    fn refresh(&mut self) {
        self.calls.push(SceneCall::Refresh);
    }
}

/// Sink that draws nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullScene;

impl SceneSink for NullScene {
    fn add_static_geometry(&mut self, _id: &str, _geometry: &Geometry) {}
    fn set_pose(&mut self, _id: &str, _position: &Vector3<f64>, _orientation: &UnitQuaternion<f64>) {}
    fn add_marker(&mut self, _id: &str, _position: &Vector3<f64>) {}
    fn set_visible(&mut self, _id: &str, _visible: bool) {}
    fn refresh(&mut self) {}
}
