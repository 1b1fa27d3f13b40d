//! Closed-loop validation
//!
//! Controller, plant and reference manager run together at fixed ticks:
//! 1. Climb from hover to a waypoint 20 m up
//! 2. Commands and rotor speeds stay inside their bounds on every tick
//! 3. Near hover the warm-started iterations settle
//! 4. Failed iterations hold the last command; repeated failures stop the loop
//! 5. Held commands still respect the rotor speed band
//! 6. The climb threads obstacles without touching them or tipping over
//! 7. A measured state inside an obstacle or outside the room is reported

use nalgebra::{Vector3, Vector4};

use quadmpc_core::dynamics::{Command, VehicleState};
use quadmpc_core::environment::{EllipticCylinder, Obstacle, ObstacleField, WorkspaceBounds};
use quadmpc_core::simulation::{ProcessLoop, SimConfig};
use quadmpc_core::{CommandVector, StateVector};
use quadmpc_mpc::{
    ClosedLoop, ControllerConfig, ControllerError, FixedSetpoint, GaussNewtonSolver, Horizon, LoopError,
    OcpBuilder, OcpProblem, OcpSolver, RecedingHorizonController, ReferenceManager, ScriptedSetpoints,
    SetpointSource, Setpoint, SolveStatistics, SolverError, SolverStatus, TickReport,
};

fn closed_loop(config: ControllerConfig, start: Vector3<f64>) -> ClosedLoop {
    let mode = config.weights.mode;
    let problem = OcpBuilder::new(config).build().unwrap();
    let controller = RecedingHorizonController::new(problem).unwrap();
    let sim = SimConfig {
        initial_position: start,
        ..Default::default()
    };
    ClosedLoop::new(controller, ProcessLoop::new(&sim).unwrap(), ReferenceManager::for_mode(mode))
}

fn climb_reports() -> Vec<TickReport> {
    let config = ControllerConfig::position_tracking();
    let dt = config.solver.control_period;
    let mut closed_loop = closed_loop(config, Vector3::zeros());
    closed_loop.start().unwrap();

    let mut source = FixedSetpoint(Setpoint::new(0.0, 0.0, 20.0));
    let reports = closed_loop.run_fixed(&mut source, 150, dt).unwrap();
    assert_eq!(closed_loop.solve_failures(), 0);
    reports
}

/// Hover to a waypoint 20 m above
mod ascent_tests {
    use super::*;

    #[test]
    fn test_climb_reaches_waypoint() {
        let target = Vector3::new(0.0, 0.0, 20.0);
        let reports = climb_reports();

        let errors: Vec<f64> = reports.iter().map(|r| (r.state.position - target).norm()).collect();
        let closest = errors.iter().copied().fold(f64::INFINITY, f64::min);
        assert!(closest < 5.0, "closest approach {closest:.2} m");

        // Most of the climb happens in the first half of the run
        assert!(errors[74] < 10.0, "error after 15 s: {:.2} m", errors[74]);
        assert!(reports.iter().all(|r| r.state.position.z > -0.5));
    }

    #[test]
    fn test_climb_respects_pitch_bound() {
        let reports = climb_reports();
        let worst = reports.iter().map(|r| r.state.theta().abs()).fold(0.0, f64::max);
        assert!(worst <= 1.0, "pitch reached {worst:.3} rad");
    }

    #[test]
    fn test_climb_stays_inside_actuator_bounds() {
        for report in climb_reports() {
            let vu = report.command.rotor_rates;
            assert!(vu.iter().all(|v| v.abs() <= 100.0 + 1e-9), "command {vu:?}");
            let u = report.state.actuators;
            assert!(u.iter().all(|v| *v >= 16.0 - 1e-6 && *v <= 95.0 + 1e-6), "rotor speeds {u:?}");
        }
    }
}

/// Warm-started iterations near an equilibrium
mod warm_start_tests {
    use super::*;

    #[test]
    fn test_near_hover_settles() {
        let config = ControllerConfig::position_tracking();
        let dt = config.solver.control_period;
        let mode = config.weights.mode;
        let problem = OcpBuilder::new(config).build().unwrap();
        let controller = RecedingHorizonController::new(problem).unwrap();

        // Rotors slightly above hover speed
        let sim = SimConfig::default();
        let mut state = VehicleState::hover(Vector3::new(0.0, 0.0, 5.0), &sim.plant);
        state.actuators = Vector4::repeat(60.0);
        let mut closed_loop = ClosedLoop::new(controller, ProcessLoop::with_state(&sim, state).unwrap(), ReferenceManager::for_mode(mode));
        closed_loop.start().unwrap();

        let mut source = FixedSetpoint(Setpoint::new(0.0, 0.0, 5.0));
        let reports = closed_loop.run_fixed(&mut source, 100, dt).unwrap();

        let deltas: Vec<f64> = reports
            .windows(2)
            .map(|w| (w[1].command.rotor_rates - w[0].command.rotor_rates).norm())
            .collect();
        let early: f64 = deltas[..10].iter().sum();
        let late: f64 = deltas[deltas.len() - 10..].iter().sum();
        assert!(late < early, "command changes grew: {early:.3} -> {late:.3}");

        let last = reports.last().unwrap();
        assert!((last.state.position.z - 5.0).abs() < 0.5, "z = {:.3}", last.state.position.z);
        assert!(last.state.position.xy().norm() < 0.5);
    }

    #[test]
    fn test_velocity_setpoint_moves_the_vehicle() {
        let config = ControllerConfig::velocity_tracking();
        let dt = config.solver.control_period;
        let mut closed_loop = closed_loop(config, Vector3::new(0.0, 0.0, 5.0));
        closed_loop.start().unwrap();

        // 1 s idle, then 1 m/s along x
        let mut source = ScriptedSetpoints::new(vec![(20, Setpoint::zero()), (60, Setpoint::new(1.0, 0.0, 0.0))]);
        let reports = closed_loop.run_fixed(&mut source, 80, dt).unwrap();

        assert!(reports[19].state.velocity.norm() < 0.2);
        assert!(reports[..20].iter().all(|r| r.indicator.is_idle()));
        assert_eq!(reports[79].indicator.signs, [1, 0, 0]);

        let last = reports.last().unwrap();
        assert!(last.state.position.x > 0.0);
        assert!(last.state.velocity.x > 0.2, "vx = {:.3}", last.state.velocity.x);
        assert!(reports.iter().all(|r| r.state.theta().abs() <= 1.0));
        assert!(WorkspaceBounds::room().contains(&last.state.position));
    }
}

/// Solver that fails on scripted calls and otherwise defers to Gauss-Newton
struct ScriptedFailures {
    inner: GaussNewtonSolver,
    fail_on: Vec<usize>,
    calls: usize,
}

impl ScriptedFailures {
    fn new(problem: &OcpProblem, fail_on: Vec<usize>) -> Self {
        Self {
            inner: GaussNewtonSolver::for_problem(problem),
            fail_on,
            calls: 0,
        }
    }
}

impl OcpSolver for ScriptedFailures {
    fn prepare(&mut self, problem: &OcpProblem) -> Result<(), SolverError> {
        self.inner.prepare(problem)
    }

    fn iterate(
        &mut self,
        problem: &OcpProblem,
        horizon: &mut Horizon,
        x0: &StateVector,
    ) -> Result<SolveStatistics, SolverError> {
        let call = self.calls;
        self.calls += 1;
        if self.fail_on.contains(&call) {
            return Err(SolverError::Factorization);
        }
        self.inner.iterate(problem, horizon, x0)
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Command hold and failure escalation
mod fail_safe_tests {
    use super::*;

    fn flaky_loop(fail_on: Vec<usize>) -> ClosedLoop<ScriptedFailures> {
        let mut config = ControllerConfig::position_tracking();
        config.solver.max_consecutive_failures = 3;
        let mode = config.weights.mode;
        let problem = OcpBuilder::new(config).build().unwrap();
        let solver = ScriptedFailures::new(&problem, fail_on);
        let controller = RecedingHorizonController::with_solver(problem, solver).unwrap();

        let sim = SimConfig {
            initial_position: Vector3::new(0.0, 0.0, 2.0),
            ..Default::default()
        };
        let mut closed_loop = ClosedLoop::new(controller, ProcessLoop::new(&sim).unwrap(), ReferenceManager::for_mode(mode));
        closed_loop.start().unwrap();
        closed_loop
    }

    #[test]
    fn test_failed_ticks_hold_command() {
        let mut closed_loop = flaky_loop(vec![3, 4]);
        let mut source = FixedSetpoint(Setpoint::new(0.0, 0.0, 6.0));
        let reports = closed_loop.run_fixed(&mut source, 8, 0.2).unwrap();

        assert!(!reports[2].solve_failed);
        assert!(reports[3].solve_failed && reports[4].solve_failed);
        assert_eq!(reports[3].planned, reports[2].planned);
        assert_eq!(reports[4].planned, reports[2].planned);
        for report in &reports[3..5] {
            let u = report.state.actuators;
            assert!(u.iter().all(|v| (16.0 - 1e-9..=95.0 + 1e-9).contains(v)), "rotor speeds {u:?}");
        }
        assert!(!reports[5].solve_failed);
        assert_eq!(closed_loop.solve_failures(), 2);
        assert_eq!(closed_loop.controller().consecutive_failures(), 0);

        // Plant kept integrating through the failures
        assert!((closed_loop.process().time() - 1.6).abs() < 1e-9);
    }

    #[test]
    fn test_repeated_failures_stop_the_loop() {
        let mut closed_loop = flaky_loop(vec![1, 2, 3, 4]);
        let mut source = FixedSetpoint(Setpoint::new(0.0, 0.0, 2.0));

        assert!(!closed_loop.tick(source.read(), 0.2).unwrap().solve_failed);
        assert!(closed_loop.tick(source.read(), 0.2).unwrap().solve_failed);
        assert!(closed_loop.tick(source.read(), 0.2).unwrap().solve_failed);

        match closed_loop.tick(source.read(), 0.2) {
            Err(LoopError::Controller(ControllerError::FailureLimitExceeded { failures, last })) => {
                assert_eq!(failures, 3);
                assert_eq!(last, SolverError::Factorization);
            }
            other => panic!("expected failure limit, got {other:?}"),
        }
        assert_eq!(closed_loop.controller().status(), SolverStatus::QpFailure);
        // The aborted tick did not advance the plant
        assert_eq!(closed_loop.ticks(), 3);
    }
}

/// Solver that plans a full spin-up once, then fails on every call
struct SpinUpThenFail {
    rate: f64,
    calls: usize,
}

impl OcpSolver for SpinUpThenFail {
    fn iterate(
        &mut self,
        problem: &OcpProblem,
        horizon: &mut Horizon,
        x0: &StateVector,
    ) -> Result<SolveStatistics, SolverError> {
        self.calls += 1;
        if self.calls > 1 {
            return Err(SolverError::Factorization);
        }
        let plan = problem.rollout(x0, &vec![CommandVector::repeat(self.rate); problem.num_nodes()]);
        horizon.set_plan(&plan.states, &plan.commands);
        Ok(SolveStatistics {
            status: SolverStatus::Success,
            iterations: 1,
            step_accepted: true,
            ..Default::default()
        })
    }
}

/// A held command is projected at every tick
mod held_command_tests {
    use super::*;

    #[test]
    fn test_held_spin_up_stops_at_band_edge() {
        let mut config = ControllerConfig::position_tracking();
        config.solver.max_consecutive_failures = 50;
        let mode = config.weights.mode;
        let problem = OcpBuilder::new(config).build().unwrap();
        let solver = SpinUpThenFail { rate: 80.0, calls: 0 };
        let controller = RecedingHorizonController::with_solver(problem, solver).unwrap();
        let mut closed_loop = ClosedLoop::new(
            controller,
            ProcessLoop::new(&SimConfig::default()).unwrap(),
            ReferenceManager::for_mode(mode),
        );
        closed_loop.start().unwrap();

        let mut source = FixedSetpoint(Setpoint::new(0.0, 0.0, 50.0));
        let reports = closed_loop.run_fixed(&mut source, 20, 0.2).unwrap();

        assert!(!reports[0].solve_failed);
        assert!(reports[1..].iter().all(|r| r.solve_failed));
        let held = Command::new(80.0, 80.0, 80.0, 80.0);
        assert_eq!(closed_loop.controller().command(), held);
        assert!(reports.iter().all(|r| r.planned == held));

        // Unprojected, 80 rad/s² from hover leaves the band on the third tick
        for report in &reports {
            let u = report.state.actuators;
            assert!(u.iter().all(|v| *v <= 95.0 + 1e-9), "rotor speeds {u:?}");
        }
        assert!(reports[2].command.rotor_rates.iter().all(|v| *v < 80.0));
        let last = reports.last().unwrap();
        assert!(last.command.rotor_rates.iter().all(|v| v.abs() < 1e-9));
        assert!((last.state.actuators[0] - 95.0).abs() < 1e-9);
    }
}

/// Climbs past obstacles to a waypoint 20 m up
mod obstacle_tests {
    use super::*;

    fn obstacle_climb(field: ObstacleField, ticks: usize) -> Vec<TickReport> {
        let config = ControllerConfig::position_tracking();
        let dt = config.solver.control_period;
        let mode = config.weights.mode;
        let problem = OcpBuilder::new(config).with_obstacle_field(field).build().unwrap();
        let controller = RecedingHorizonController::new(problem).unwrap();
        let mut closed_loop = ClosedLoop::new(
            controller,
            ProcessLoop::new(&SimConfig::default()).unwrap(),
            ReferenceManager::for_mode(mode),
        );
        closed_loop.start().unwrap();

        let mut source = FixedSetpoint(Setpoint::new(0.0, 0.0, 20.0));
        let reports = closed_loop.run_fixed(&mut source, ticks, dt).unwrap();
        assert_eq!(closed_loop.solve_failures(), 0);
        reports
    }

    fn check_climb(field: &ObstacleField, reports: &[TickReport], within: usize) {
        let target = Vector3::new(0.0, 0.0, 20.0);
        for (tick, report) in reports.iter().enumerate() {
            let clearance = field.min_clearance(&report.state.position);
            assert!(clearance >= -1e-3, "tick {tick}: clearance {clearance:.4} at {:?}", report.state.position);
            let theta = report.state.theta().abs();
            assert!(theta <= 1.0, "tick {tick}: pitch {theta:.3} rad");
        }

        let closest = reports[..within]
            .iter()
            .map(|r| (r.state.position - target).norm())
            .fold(f64::INFINITY, f64::min);
        assert!(closest < 3.0, "closest approach {closest:.2} m in {within} ticks");
    }

    #[test]
    fn test_climb_through_elliptic_corridor() {
        let field = ObstacleField::default().with_elliptic(EllipticCylinder::illustrative_set());
        let reports = obstacle_climb(field.clone(), 250);
        check_climb(&field, &reports, 250);

        // The straight climb is blocked, so the path had to swing sideways
        let widest = reports.iter().map(|r| r.state.position.x.abs()).fold(0.0, f64::max);
        assert!(widest > 0.5, "largest |x| {widest:.2} m");
    }

    #[test]
    fn test_climb_past_capsule_with_safety_margin() {
        // Bar across the climb, offset 1 m in y; the margin widens it to 1.5 m
        let bar = Obstacle::new(Vector3::new(-5.0, 1.0, 10.0), Vector3::new(5.0, 1.0, 10.0), 1.0);
        let field = ObstacleField::new(vec![bar], 0.5);
        assert!(field.min_clearance(&Vector3::new(0.0, 0.0, 10.0)) < 0.0);

        let reports = obstacle_climb(field.clone(), 150);
        check_climb(&field, &reports, 150);
        assert!(reports.iter().any(|r| r.state.position.y < -0.4));
    }
}

/// Measured states that already violate a constraint
mod infeasible_tests {
    use super::*;

    #[test]
    fn test_state_inside_obstacle() {
        let problem = OcpBuilder::new(ControllerConfig::position_tracking())
            .with_obstacles(vec![Obstacle::pillar(0.0, 0.0, 10.0, 1.0)])
            .build()
            .unwrap();
        let mut controller = RecedingHorizonController::new(problem).unwrap();
        let inside = VehicleState::hover(Vector3::new(0.3, 0.0, 5.0), controller.problem().params());
        controller.initialize(0.0, &inside).unwrap();

        match controller.step(0.0, &inside) {
            Err(ControllerError::Solve {
                status,
                source: SolverError::Infeasible { constraint, violation },
            }) => {
                assert_eq!(status, SolverStatus::Infeasible);
                assert_eq!(constraint, "obstacle_0");
                assert!((violation - 0.7).abs() < 1e-9);
            }
            other => panic!("expected infeasible, got {other:?}"),
        }
        assert_eq!(controller.command(), Command::zero());
        assert_eq!(controller.status(), SolverStatus::Infeasible);
    }

    #[test]
    fn test_state_below_room_floor() {
        let mut closed_loop = closed_loop(ControllerConfig::velocity_tracking(), Vector3::new(0.0, 0.0, 0.5));
        closed_loop.start().unwrap();

        let report = closed_loop.tick(Setpoint::zero(), 0.05).unwrap();
        assert!(report.solve_failed);
        match closed_loop.controller().status() {
            SolverStatus::Infeasible => {}
            other => panic!("expected infeasible status, got {other:?}"),
        }
    }
}
