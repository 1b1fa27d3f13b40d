//! Interactive closed-loop flight in a room
//!
//! Velocity-tracking controller driven from the keyboard, rendered with
//! kiss3d. Wall-clock time drives both the controller and the plant.
//!
//! Controls:
//! - Arrow keys: move in x / y
//! - W / S: climb / descend
//! - Space: pause / resume
//! - Mouse drag / scroll: camera
//!
//! Usage: `cargo run --example closed_loop_viz [environment.toml]`

use std::collections::{HashMap, HashSet};
use std::f32::consts::FRAC_PI_2;

use kiss3d::camera::ArcBall;
use kiss3d::event::{Action, Key, WindowEvent};
use kiss3d::light::Light;
use kiss3d::nalgebra as na;
use kiss3d::scene::SceneNode;
use kiss3d::window::Window;
use log::{info, warn, LevelFilter};
use na::{Point3, Translation3};

use quadmpc_core::environment::{load_environment, Environment, ObstacleField, WorkspaceBounds};
use quadmpc_core::simulation::{IntegratorKind, ProcessLoop, SimConfig, WallClock};
use quadmpc_mpc::scene::{Geometry, SceneSink};
use quadmpc_mpc::{
    ClosedLoop, ControllerConfig, DroneViewer, OcpBuilder, RecedingHorizonController, ReferenceManager, Setpoint,
};

/// Speed commanded per held key [m/s]
const KEY_SPEED: f64 = 2.0;

/// World is z-up, kiss3d is y-up: viz = (x, z, -y)
fn to_viz(v: &nalgebra::Vector3<f64>) -> Point3<f32> {
    Point3::new(v.x as f32, v.z as f32, -v.y as f32)
}

fn to_viz_translation(v: &nalgebra::Vector3<f64>) -> Translation3<f32> {
    Translation3::from(to_viz(v).coords)
}

/// World rotation in viewer axes, for shapes whose kiss3d axis is y
fn to_viz_rotation(q: &nalgebra::UnitQuaternion<f64>) -> na::UnitQuaternion<f32> {
    let q = na::UnitQuaternion::from_quaternion(na::Quaternion::new(q.w as f32, q.i as f32, q.j as f32, q.k as f32));
    let world_to_viz = na::UnitQuaternion::from_axis_angle(&na::Vector3::x_axis(), -FRAC_PI_2);
    let y_to_z = na::UnitQuaternion::from_axis_angle(&na::Vector3::x_axis(), FRAC_PI_2);
    world_to_viz * q * y_to_z
}

/// kiss3d window as a scene sink
struct Kiss3dScene {
    window: Window,
    camera: ArcBall,
    nodes: HashMap<String, SceneNode>,
    open: bool,
}

impl Kiss3dScene {
    fn new(title: &str) -> Self {
        let mut window = Window::new(title);
        window.set_light(Light::StickToCamera);
        window.set_background_color(0.95, 0.95, 0.95);
        let camera = ArcBall::new(Point3::new(25.0, 20.0, 25.0), Point3::new(0.0, 6.0, 0.0));
        Self {
            window,
            camera,
            nodes: HashMap::new(),
            open: true,
        }
    }
}

impl SceneSink for Kiss3dScene {
    fn add_static_geometry(&mut self, id: &str, geometry: &Geometry) {
        let mut node = match geometry {
            Geometry::Drone { arm_length, color } => {
                let span = 2.0 * *arm_length as f32;
                let mut node = self.window.add_cube(span, 0.06, span);
                node.set_color(color[0], color[1], color[2]);
                node
            }
            Geometry::Capsule { radius, length, color } => {
                let mut node = self.window.add_capsule(*radius as f32, *length as f32);
                node.set_color(color[0], color[1], color[2]);
                node
            }
            Geometry::EllipticCylinder { semi_axes, length, color } => {
                let mut node = self.window.add_cylinder(1.0, *length as f32);
                node.set_local_scale(semi_axes[0] as f32, 1.0, semi_axes[1] as f32);
                node.set_color(color[0], color[1], color[2]);
                node
            }
            Geometry::Box { half_extents, color } => {
                let e = half_extents * 2.0;
                let mut node = self.window.add_cube(e.x as f32, e.z as f32, e.y as f32);
                node.set_surface_rendering_activation(false);
                node.set_lines_width(1.0);
                node.set_color(color[0], color[1], color[2]);
                node
            }
            Geometry::Arrow { length, color } => {
                let mut node = self.window.add_cone(0.25, *length as f32);
                node.set_color(color[0], color[1], color[2]);
                node
            }
        };
        node.set_visible(true);
        self.nodes.insert(id.to_string(), node);
    }

    fn set_pose(&mut self, id: &str, position: &nalgebra::Vector3<f64>, orientation: &nalgebra::UnitQuaternion<f64>) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.set_local_translation(to_viz_translation(position));
            node.set_local_rotation(to_viz_rotation(orientation));
        }
    }

    fn add_marker(&mut self, id: &str, position: &nalgebra::Vector3<f64>) {
        let mut node = self.window.add_sphere(0.05);
        node.set_color(0.1, 0.4, 0.9);
        node.set_local_translation(to_viz_translation(position));
        self.nodes.insert(id.to_string(), node);
    }

    fn set_visible(&mut self, id: &str, visible: bool) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.set_visible(visible);
        }
    }

    fn refresh(&mut self) {
        self.open = self.window.render_with_camera(&mut self.camera);
    }
}

fn init_logger() -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{:5} {}] {}", record.level(), record.target(), message))
        })
        .level(LevelFilter::Info)
        .chain(std::io::stdout())
        .apply()
}

/// Setpoint from the keys currently held
fn keyboard_setpoint(held: &HashSet<Key>) -> Setpoint {
    let axis = |plus: Key, minus: Key| -> f64 {
        let mut v = 0.0;
        if held.contains(&plus) {
            v += KEY_SPEED;
        }
        if held.contains(&minus) {
            v -= KEY_SPEED;
        }
        v
    };
    Setpoint::new(axis(Key::Right, Key::Left), axis(Key::Up, Key::Down), axis(Key::W, Key::S))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logger()?;

    let environment = match std::env::args().nth(1) {
        Some(path) => load_environment(path)?,
        None => Environment::new(ObstacleField::default()).with_workspace(WorkspaceBounds::room()),
    };

    let config = ControllerConfig::velocity_tracking();
    let problem = OcpBuilder::new(config.clone())
        .with_environment(environment)
        .build()?;
    let field = problem.constraints().obstacles().clone();
    let workspace = problem.constraints().workspace().copied();

    let sim = SimConfig {
        integrator: IntegratorKind::Rk4 { substeps: 4 },
        initial_position: nalgebra::Vector3::new(0.0, 0.0, 5.0),
        record_history: false,
        ..Default::default()
    };
    let arm_length = sim.plant.arm_length;
    let controller = RecedingHorizonController::new(problem)?;
    let mut closed_loop = ClosedLoop::new(
        controller,
        ProcessLoop::new(&sim)?,
        ReferenceManager::for_mode(config.weights.mode),
    );
    closed_loop.start()?;

    let mut viewer = DroneViewer::new(Kiss3dScene::new("quadmpc closed loop"), arm_length).with_trail_every(5);
    viewer.create_environment(&field, workspace.as_ref());
    viewer.move_drone(closed_loop.process().state());

    info!("Arrow keys move in x/y, W/S climb/descend, Space pauses");

    let mut held: HashSet<Key> = HashSet::new();
    let mut paused = false;
    let mut clock = WallClock::start(sim.min_dt);

    while viewer.sink().open {
        for event in viewer.sink_mut().window.events().iter() {
            match event.value {
                WindowEvent::Key(Key::Space, Action::Press, _) => {
                    paused = !paused;
                    info!("{}", if paused { "Paused" } else { "Running" });
                }
                WindowEvent::Key(key, Action::Press, _) => {
                    held.insert(key);
                }
                WindowEvent::Key(key, Action::Release, _) => {
                    held.remove(&key);
                }
                _ => {}
            }
        }

        let dt = clock.tick();
        if paused {
            viewer.sink_mut().refresh();
            continue;
        }

        let setpoint = keyboard_setpoint(&held);
        let report = closed_loop.tick_with_viewer(setpoint, dt, &mut viewer)?;
        if report.solve_failed {
            warn!("Holding last command at t={:.2}s", report.time);
        }
    }

    info!(
        "Window closed after {} ticks, {} solver failures, {:.1}s flown",
        closed_loop.ticks(),
        closed_loop.solve_failures(),
        clock.total()
    );
    Ok(())
}
