//! Vehicle and environment display
//!
//! [`DroneViewer`] maps vehicle state, obstacles, the setpoint direction and
//! a position trail onto a [`SceneSink`]. Node ids:
//!
//! | id              | content                         |
//! |-----------------|---------------------------------|
//! | `drone`         | vehicle body                    |
//! | `arrow`         | setpoint direction              |
//! | `obstacle/{i}`  | capsule `i`                     |
//! | `elliptic/{i}`  | elliptic cylinder `i`           |
//! | `workspace`     | room bounds                     |
//! | `trail/{n}`     | n-th trail marker               |

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

use quadmpc_core::dynamics::VehicleState;
use quadmpc_core::environment::{Axis, ObstacleField, WorkspaceBounds};
use quadmpc_core::math::align_z_axis;

use crate::reference::DirectionIndicator;
use crate::scene::{Color, Geometry, SceneSink};

/// Arrow offset from the vehicle along the setpoint direction [m]
pub const ARROW_OFFSET: f64 = 2.5;

/// Display length of the unbounded elliptic cylinders [m]
const ELLIPTIC_DISPLAY_LENGTH: f64 = 40.0;

const DRONE_COLOR: Color = [0.2, 0.2, 0.9];
const OBSTACLE_COLOR: Color = [0.8, 0.3, 0.3];
const ARROW_COLOR: Color = [0.1, 0.8, 0.1];
const WORKSPACE_COLOR: Color = [0.6, 0.6, 0.6];

/// Scene adapter for a single vehicle
pub struct DroneViewer<S: SceneSink> {
    sink: S,
    trail_every: usize,
    ticks: usize,
    trail_len: usize,
}

impl<S: SceneSink> DroneViewer<S> {
    /// Spawns the vehicle and a hidden arrow
    pub fn new(mut sink: S, arm_length: f64) -> Self {
        sink.add_static_geometry(
            "drone",
            &Geometry::Drone {
                arm_length,
                color: DRONE_COLOR,
            },
        );
        sink.add_static_geometry(
            "arrow",
            &Geometry::Arrow {
                length: 1.0,
                color: ARROW_COLOR,
            },
        );
        sink.set_visible("arrow", false);
        Self {
            sink,
            trail_every: 1,
            ticks: 0,
            trail_len: 0,
        }
    }

    /// Drop a trail marker every `every` updates (0 disables the trail)
    pub fn with_trail_every(mut self, every: usize) -> Self {
        self.trail_every = every;
        self
    }

    /// Spawn static obstacles and, if given, the workspace box
    pub fn create_environment(&mut self, field: &ObstacleField, workspace: Option<&WorkspaceBounds>) {
        for (i, capsule) in field.capsules.iter().enumerate() {
            let id = format!("obstacle/{i}");
            self.sink.add_static_geometry(
                &id,
                &Geometry::Capsule {
                    radius: capsule.radius,
                    length: capsule.length(),
                    color: OBSTACLE_COLOR,
                },
            );
            self.sink
                .set_pose(&id, &capsule.midpoint(), &align_z_axis(&capsule.axis()));
        }

        for (i, cylinder) in field.elliptic.iter().enumerate() {
            let id = format!("elliptic/{i}");
            // w (a - a₀)² = r² on each semi-axis
            let semi = |w: f64| if w > 0.0 { cylinder.radius / w.sqrt() } else { ELLIPTIC_DISPLAY_LENGTH };
            self.sink.add_static_geometry(
                &id,
                &Geometry::EllipticCylinder {
                    semi_axes: [semi(cylinder.weights[0]), semi(cylinder.weights[1])],
                    length: ELLIPTIC_DISPLAY_LENGTH,
                    color: OBSTACLE_COLOR,
                },
            );
            self.sink.set_pose(&id, &cylinder.center, &axis_frame(cylinder.axis));
        }

        if let Some(ws) = workspace {
            self.sink.add_static_geometry(
                "workspace",
                &Geometry::Box {
                    half_extents: (ws.max - ws.min) * 0.5,
                    color: WORKSPACE_COLOR,
                },
            );
            self.sink
                .set_pose("workspace", &((ws.min + ws.max) * 0.5), &UnitQuaternion::identity());
        }
    }

    /// Place the vehicle at its position and attitude
    pub fn move_drone(&mut self, state: &VehicleState) {
        self.sink.set_pose("drone", &state.position, &state.attitude());
    }

    /// Show the setpoint arrow next to the vehicle, or hide it when idle
    pub fn set_arrow(&mut self, state: &VehicleState, indicator: &DirectionIndicator) {
        match indicator.direction {
            None => self.sink.set_visible("arrow", false),
            Some(direction) => {
                self.sink.set_visible("arrow", true);
                let position = state.position + direction * ARROW_OFFSET;
                self.sink.set_pose("arrow", &position, &align_z_axis(&direction));
            }
        }
    }

    pub fn add_trail_node(&mut self, position: &Vector3<f64>) {
        let id = format!("trail/{}", self.trail_len);
        self.sink.add_marker(&id, position);
        self.trail_len += 1;
    }

    /// Per-tick update: vehicle, arrow, trail, then refresh
    pub fn update(&mut self, state: &VehicleState, indicator: &DirectionIndicator) {
        self.move_drone(state);
        self.set_arrow(state, indicator);
        if self.trail_every > 0 && self.ticks % self.trail_every == 0 {
            self.add_trail_node(&state.position);
        }
        self.ticks += 1;
        self.sink.refresh();
    }

    pub fn trail_len(&self) -> usize {
        self.trail_len
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_inner(self) -> S {
        self.sink
    }
}

/// Rotation whose local (x, y, z) are the cylinder's cross-section axes and
/// its axis, in the same cyclic order the clearance uses
fn axis_frame(axis: Axis) -> UnitQuaternion<f64> {
    let (a, b, c) = match axis {
        Axis::X => (Vector3::y(), Vector3::z(), Vector3::x()),
        Axis::Y => (Vector3::z(), Vector3::x(), Vector3::y()),
        Axis::Z => (Vector3::x(), Vector3::y(), Vector3::z()),
    };
    let rotation = Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[a, b, c]));
    UnitQuaternion::from_rotation_matrix(&rotation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use quadmpc_core::dynamics::QuadrotorParams;
    use quadmpc_core::environment::{EllipticCylinder, Obstacle};

    use crate::scene::{RecordingScene, SceneCall};

    fn viewer() -> DroneViewer<RecordingScene> {
        DroneViewer::new(RecordingScene::new(), 0.25)
    }

    #[test]
    fn test_cylinder_placement() {
        let mut viewer = viewer();
        let field = ObstacleField::new(
            vec![Obstacle::new(Vector3::new(1.0, 1.0, 0.0), Vector3::new(1.0, 5.0, 0.0), 0.5)],
            0.0,
        );
        viewer.create_environment(&field, None);

        let scene = viewer.sink();
        let (position, orientation) = scene.last_pose("obstacle/0").unwrap();
        assert_relative_eq!(position, Vector3::new(1.0, 3.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(orientation * Vector3::z(), Vector3::y(), epsilon = 1e-12);
        assert_eq!(
            scene.geometry("obstacle/0"),
            Some(&Geometry::Capsule {
                radius: 0.5,
                length: 4.0,
                color: OBSTACLE_COLOR
            })
        );
        assert!(scene.geometry("workspace").is_none());
    }

    #[test]
    fn test_elliptic_cylinder_frame() {
        let mut viewer = viewer();
        let field = ObstacleField::default().with_elliptic(EllipticCylinder::illustrative_set());
        viewer.create_environment(&field, Some(&WorkspaceBounds::room()));

        let scene = viewer.sink();
        let (position, orientation) = scene.last_pose("elliptic/1").unwrap();
        assert_eq!(position, Vector3::new(3.0, 0.0, 9.0));
        // Local z along y, local x along z (first cross-section axis)
        assert_relative_eq!(orientation * Vector3::z(), Vector3::y(), epsilon = 1e-12);
        assert_relative_eq!(orientation * Vector3::x(), Vector3::z(), epsilon = 1e-12);

        match scene.geometry("elliptic/0") {
            Some(Geometry::EllipticCylinder { semi_axes, .. }) => {
                assert_relative_eq!(semi_axes[0], 4.0 / 2.0_f64.sqrt(), epsilon = 1e-12);
                assert_relative_eq!(semi_axes[1], 4.0, epsilon = 1e-12);
            }
            other => panic!("unexpected geometry {other:?}"),
        }
        let (center, _) = scene.last_pose("workspace").unwrap();
        assert_eq!(center, Vector3::new(0.0, 0.0, 8.0));
    }

    #[test]
    fn test_arrow_hidden_when_idle() {
        let mut viewer = viewer();
        let state = VehicleState::hover(Vector3::new(0.0, 0.0, 5.0), &QuadrotorParams::default());
        viewer.set_arrow(&state, &DirectionIndicator::from_vector(&Vector3::zeros()));
        assert_eq!(viewer.sink().is_visible("arrow"), Some(false));

        viewer.set_arrow(&state, &DirectionIndicator::from_vector(&Vector3::new(0.0, 3.0, 0.0)));
        assert_eq!(viewer.sink().is_visible("arrow"), Some(true));
        let (position, orientation) = viewer.sink().last_pose("arrow").unwrap();
        assert_relative_eq!(position, Vector3::new(0.0, 2.5, 5.0), epsilon = 1e-12);
        assert_relative_eq!(orientation * Vector3::z(), Vector3::y(), epsilon = 1e-12);
    }

    #[test]
    fn test_update_sequence() {
        let mut viewer = viewer().with_trail_every(2);
        let mut state = VehicleState::hover(Vector3::zeros(), &QuadrotorParams::default());
        state.euler = Vector3::new(0.3, 0.1, -0.2);
        let idle = DirectionIndicator::from_vector(&Vector3::zeros());

        for _ in 0..4 {
            viewer.update(&state, &idle);
        }

        let scene = viewer.into_inner();
        assert_eq!(scene.refresh_count(), 4);
        assert_eq!(scene.markers().count(), 2);
        let (_, attitude) = scene.last_pose("drone").unwrap();
        assert_relative_eq!(attitude, state.attitude(), epsilon = 1e-12);
        assert_eq!(scene.calls.last(), Some(&SceneCall::Refresh));
    }
}
