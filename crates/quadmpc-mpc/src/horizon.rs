//! Prediction horizon
//!
//! Owns the stage times, predicted states and commands of the current plan.
//! The controller keeps a single horizon for its lifetime and mutates it in
//! place: each tick shifts it to the new start time (warm start), the solver
//! then overwrites it with the improved plan. Shifting resamples into a
//! second set of buffers and swaps, so a tick allocates nothing.

use quadmpc_core::dynamics::{Command, VehicleState};
use quadmpc_core::{CommandVector, StateVector};

/// Stage times, N + 1 states and N commands
#[derive(Debug, Clone)]
pub struct Horizon {
    /// Interval lengths, fixed for the horizon's lifetime
    intervals: Vec<f64>,
    /// Absolute stage times t₀..t_N
    times: Vec<f64>,
    states: Vec<StateVector>,
    commands: Vec<CommandVector>,
    /// Resampling targets for [`Self::shift_to`]
    next_times: Vec<f64>,
    next_states: Vec<StateVector>,
    next_commands: Vec<CommandVector>,
}

impl Horizon {
    /// Horizon starting at `t0` with every stage at `state` and zero commands
    pub fn seeded(t0: f64, state: &VehicleState, intervals: &[f64]) -> Self {
        let n = intervals.len();
        let mut horizon = Self {
            intervals: intervals.to_vec(),
            times: vec![t0; n + 1],
            states: vec![StateVector::zeros(); n + 1],
            commands: vec![CommandVector::zeros(); n],
            next_times: vec![t0; n + 1],
            next_states: vec![StateVector::zeros(); n + 1],
            next_commands: vec![CommandVector::zeros(); n],
        };
        horizon.reseed(t0, state);
        horizon
    }

    /// Reset in place: constant state, zero commands
    pub fn reseed(&mut self, t0: f64, state: &VehicleState) {
        let x = state.to_vector();
        self.states.iter_mut().for_each(|s| *s = x);
        self.commands.iter_mut().for_each(|c| *c = CommandVector::zeros());
        self.set_start_time(t0);
    }

    fn set_start_time(&mut self, t0: f64) {
        fill_times(&self.intervals, t0, &mut self.times);
    }

    /// Number of shooting intervals N
    pub fn num_intervals(&self) -> usize {
        self.commands.len()
    }

    pub fn start_time(&self) -> f64 {
        self.times[0]
    }

    pub fn end_time(&self) -> f64 {
        self.times[self.times.len() - 1]
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn intervals(&self) -> &[f64] {
        &self.intervals
    }

    pub fn states(&self) -> &[StateVector] {
        &self.states
    }

    pub fn commands(&self) -> &[CommandVector] {
        &self.commands
    }

    /// Predicted state at stage `k` (0..=N)
    pub fn state(&self, k: usize) -> Option<VehicleState> {
        self.states.get(k).map(VehicleState::from_vector)
    }

    /// Planned command on interval `k` (0..N)
    pub fn command(&self, k: usize) -> Option<Command> {
        self.commands.get(k).copied().map(Command::from_vector)
    }

    /// Command applied over the first interval
    pub fn first_command(&self) -> Command {
        self.command(0).unwrap_or_default()
    }

    /// Zero-order-hold command at absolute time `t`
    ///
    /// Before the horizon the first command applies, past its end the last.
    pub fn command_at(&self, t: f64) -> CommandVector {
        let n = self.commands.len();
        if n == 0 {
            return CommandVector::zeros();
        }
        // Last stage whose start is <= t
        let idx = self.times[..n].iter().rposition(|&time| time <= t).unwrap_or(0);
        self.commands[idx]
    }

    /// Linearly interpolated state at absolute time `t`, clamped to the horizon
    pub fn state_at(&self, t: f64) -> StateVector {
        let last = self.states.len() - 1;
        if t <= self.times[0] {
            return self.states[0];
        }
        if t >= self.times[last] {
            return self.states[last];
        }

        let idx = self
            .times
            .iter()
            .position(|&time| time > t)
            .unwrap_or(last)
            .saturating_sub(1);
        let (t0, t1) = (self.times[idx], self.times[idx + 1]);
        if t1 - t0 <= 0.0 {
            return self.states[idx];
        }
        let alpha = (t - t0) / (t1 - t0);
        self.states[idx] * (1.0 - alpha) + self.states[idx + 1] * alpha
    }

    /// Move the horizon so that it starts at `t`, resampling the previous
    /// plan onto the new stage times; stages beyond the old end repeat its
    /// last command and state
    pub fn shift_to(&mut self, t: f64) {
        fill_times(&self.intervals, t, &mut self.next_times);
        for k in 0..self.commands.len() {
            self.next_commands[k] = self.command_at(self.next_times[k]);
        }
        for k in 0..self.states.len() {
            self.next_states[k] = self.state_at(self.next_times[k]);
        }
        std::mem::swap(&mut self.times, &mut self.next_times);
        std::mem::swap(&mut self.commands, &mut self.next_commands);
        std::mem::swap(&mut self.states, &mut self.next_states);
    }

    /// Install a solver result; lengths must match the horizon
    pub fn set_plan(&mut self, states: &[StateVector], commands: &[CommandVector]) {
        debug_assert_eq!(states.len(), self.states.len());
        debug_assert_eq!(commands.len(), self.commands.len());
        self.states.copy_from_slice(states);
        self.commands.copy_from_slice(commands);
    }
}

/// Stage times from `t0` over `intervals`
fn fill_times(intervals: &[f64], t0: f64, times: &mut [f64]) {
    let mut t = t0;
    times[0] = t;
    for (k, dt) in intervals.iter().enumerate() {
        t += dt;
        times[k + 1] = t;
    }
}
