//! Recorded closed-loop trajectories

use nalgebra::Vector3;

use crate::dynamics::{Command, VehicleState};

/// Simulation history
#[derive(Debug, Clone, Default)]
pub struct SimHistory {
    /// Time stamps [s]
    pub times: Vec<f64>,
    /// States after each advance
    pub states: Vec<VehicleState>,
    /// Command applied over the step ending at the matching time
    pub commands: Vec<Command>,
}

impl SimHistory {
    /// Record a simulation step
    pub fn record(&mut self, time: f64, state: &VehicleState, command: &Command) {
        self.times.push(time);
        self.states.push(*state);
        self.commands.push(*command);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Get simulation duration
    pub fn duration(&self) -> f64 {
        match (self.times.first(), self.times.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }

    pub fn positions(&self) -> impl Iterator<Item = Vector3<f64>> + '_ {
        self.states.iter().map(|s| s.position)
    }

    /// Largest |theta| seen
    pub fn max_abs_pitch(&self) -> f64 {
        self.states.iter().map(|s| s.theta().abs()).fold(0.0, f64::max)
    }
}
