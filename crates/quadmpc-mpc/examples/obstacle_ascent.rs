//! Headless climb through an obstacle field
//!
//! Position-tracking controller flying from hover at the origin to a target
//! 20 m above it, past the obstacles of an environment file (or the built-in
//! elliptic cylinders). Prints progress and a summary.
//!
//! Usage: `cargo run --release --example obstacle_ascent [environment.toml]`

use log::{info, warn, LevelFilter};
use nalgebra::Vector3;

use quadmpc_core::environment::{load_environment, EllipticCylinder, Environment, ObstacleField};
use quadmpc_core::simulation::{ProcessLoop, SimConfig};
use quadmpc_mpc::{
    ClosedLoop, ControllerConfig, DroneViewer, FixedSetpoint, OcpBuilder, RecedingHorizonController, RecordingScene,
    ReferenceManager, Setpoint, SetpointSource,
};

const TARGET: [f64; 3] = [0.0, 0.0, 20.0];
const TICKS: usize = 250;

fn init_logger() -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| out.finish(format_args!("[{:5}] {}", record.level(), message)))
        .level(LevelFilter::Info)
        .level_for("quadmpc_mpc::solver", LevelFilter::Warn)
        .chain(std::io::stdout())
        .apply()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logger()?;

    let environment = match std::env::args().nth(1) {
        Some(path) => load_environment(path)?,
        None => Environment::new(ObstacleField::default().with_elliptic(EllipticCylinder::illustrative_set())),
    };
    info!(
        "Environment: {} capsule(s), {} elliptic cylinder(s), workspace {}",
        environment.obstacles.capsules.len(),
        environment.obstacles.elliptic.len(),
        if environment.workspace.is_some() { "bounded" } else { "open" }
    );

    let config = ControllerConfig::position_tracking();
    let dt = config.solver.control_period;
    let problem = OcpBuilder::new(config.clone())
        .with_environment(environment)
        .build()?;
    let field = problem.constraints().obstacles().clone();
    let workspace = problem.constraints().workspace().copied();

    let sim = SimConfig::default();
    let controller = RecedingHorizonController::new(problem)?;
    let mut closed_loop = ClosedLoop::new(
        controller,
        ProcessLoop::new(&sim)?,
        ReferenceManager::for_mode(config.weights.mode),
    );
    closed_loop.start()?;

    let mut viewer = DroneViewer::new(RecordingScene::new(), sim.plant.arm_length).with_trail_every(5);
    viewer.create_environment(&field, workspace.as_ref());

    let target = Vector3::from(TARGET);
    let mut source = FixedSetpoint(Setpoint(target));
    let mut closest = f64::INFINITY;
    let mut min_clearance = f64::INFINITY;
    let mut max_pitch: f64 = 0.0;

    for tick in 0..TICKS {
        let report = closed_loop.tick_with_viewer(source.read(), dt, &mut viewer)?;
        let error = (report.state.position - target).norm();
        closest = closest.min(error);
        max_pitch = max_pitch.max(report.state.theta().abs());
        if !field.is_empty() {
            min_clearance = min_clearance.min(field.min_clearance(&report.state.position));
        }

        if tick % 10 == 0 {
            let stats = closed_loop.controller().statistics();
            info!(
                "t={:5.1}s pos=({:6.2}, {:6.2}, {:6.2}) err={:6.2} J={:.3e} status={:?}",
                report.time + dt,
                report.state.position.x,
                report.state.position.y,
                report.state.position.z,
                error,
                stats.objective,
                stats.status
            );
        }
    }

    info!("Closest approach to target: {:.3} m", closest);
    info!("Largest |pitch|: {:.3} rad", max_pitch);
    if min_clearance.is_finite() {
        info!("Smallest obstacle clearance: {:.3} m", min_clearance);
        if min_clearance < 0.0 {
            warn!("Trajectory entered an obstacle");
        }
    }
    info!(
        "{} solver failure(s) in {} ticks, {} trail markers",
        closed_loop.solve_failures(),
        closed_loop.ticks(),
        viewer.trail_len()
    );
    Ok(())
}
