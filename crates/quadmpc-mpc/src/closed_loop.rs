//! Closed-loop runner
//!
//! One tick is: map the setpoint to a reference, run one controller step at
//! the plant's current time and state, advance the plant by `dt` under the
//! resulting command, then update the display. Non-fatal solver failures
//! keep the loop going on the held command.
//!
//! Every command reaches the plant projected onto the actuator band for the
//! rotor speeds measured at that tick. A held command was only admissible
//! for the speeds it was planned at.

use log::{error, warn};
use thiserror::Error;

use quadmpc_core::dynamics::{Command, VehicleState};
use quadmpc_core::simulation::{IntegrationError, ProcessLoop, WallClock};

use crate::controller::{ControllerError, RecedingHorizonController};
use crate::reference::{DirectionIndicator, ReferenceManager, Setpoint, SetpointSource};
use crate::scene::SceneSink;
use crate::solver::{GaussNewtonSolver, OcpSolver};
use crate::viewer::DroneViewer;

/// Errors that stop the loop
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),
    #[error("Plant integration error: {0}")]
    Integration(#[from] IntegrationError),
}

/// What happened during one tick
#[derive(Debug, Clone)]
pub struct TickReport {
    /// Plant time at the controller step [s]
    pub time: f64,
    /// Requested plant step [s]
    pub dt: f64,
    /// Plant state after the step
    pub state: VehicleState,
    /// Command applied over the step
    pub command: Command,
    /// Controller output before projection, the held command on failure
    pub planned: Command,
    pub indicator: DirectionIndicator,
    /// The controller held its previous command
    pub solve_failed: bool,
}

/// Controller, plant and reference manager wired together
pub struct ClosedLoop<S: OcpSolver = GaussNewtonSolver> {
    controller: RecedingHorizonController<S>,
    process: ProcessLoop,
    references: ReferenceManager,
    solve_failures: usize,
    ticks: usize,
}

impl<S: OcpSolver> ClosedLoop<S> {
    pub fn new(controller: RecedingHorizonController<S>, process: ProcessLoop, references: ReferenceManager) -> Self {
        Self {
            controller,
            process,
            references,
            solve_failures: 0,
            ticks: 0,
        }
    }

    /// Initialize the controller from the plant's current time and state
    pub fn start(&mut self) -> Result<(), LoopError> {
        self.controller
            .initialize(self.process.time(), self.process.state())?;
        Ok(())
    }

    /// Reference, controller step, plant advance
    pub fn tick(&mut self, setpoint: Setpoint, dt: f64) -> Result<TickReport, LoopError> {
        let update = self.references.update(setpoint);
        self.controller.set_reference(update.reference);

        let time = self.process.time();
        let measured = *self.process.state();
        let (planned, solve_failed) = match self.controller.step(time, &measured) {
            Ok(command) => (command, false),
            Err(e @ ControllerError::Solve { .. }) => {
                self.solve_failures += 1;
                warn!("Tick {}: {}", self.ticks, e);
                (self.controller.command(), true)
            }
            Err(e) => {
                error!("Tick {}: aborting loop: {}", self.ticks, e);
                return Err(e.into());
            }
        };

        let step = self.process.effective_dt(dt)?;
        let command = Command::from_vector(self.controller.problem().limits().project(
            &measured.actuators,
            planned.as_vector(),
            step,
        ));
        let state = *self.process.advance(dt, &command)?;
        self.ticks += 1;

        Ok(TickReport {
            time,
            dt,
            state,
            command,
            planned,
            indicator: update.indicator,
            solve_failed,
        })
    }

    /// [`Self::tick`] followed by a display update
    pub fn tick_with_viewer<V: SceneSink>(
        &mut self,
        setpoint: Setpoint,
        dt: f64,
        viewer: &mut DroneViewer<V>,
    ) -> Result<TickReport, LoopError> {
        let report = self.tick(setpoint, dt)?;
        viewer.update(&report.state, &report.indicator);
        Ok(report)
    }

    /// Tick with the wall time elapsed since the previous tick as `dt`
    pub fn tick_realtime<V: SceneSink>(
        &mut self,
        source: &mut impl SetpointSource,
        clock: &mut WallClock,
        viewer: &mut DroneViewer<V>,
    ) -> Result<TickReport, LoopError> {
        let dt = clock.tick();
        self.tick_with_viewer(source.read(), dt, viewer)
    }

    /// Run `ticks` fixed steps of `dt`
    pub fn run_fixed(
        &mut self,
        source: &mut impl SetpointSource,
        ticks: usize,
        dt: f64,
    ) -> Result<Vec<TickReport>, LoopError> {
        (0..ticks).map(|_| self.tick(source.read(), dt)).collect()
    }

    pub fn controller(&self) -> &RecedingHorizonController<S> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut RecedingHorizonController<S> {
        &mut self.controller
    }

    pub fn process(&self) -> &ProcessLoop {
        &self.process
    }

    /// Solver failures survived so far
    pub fn solve_failures(&self) -> usize {
        self.solve_failures
    }

    pub fn ticks(&self) -> usize {
        self.ticks
    }
}
