//! Setpoint to reference mapping
//!
//! Turns an operator setpoint `(dx, dy, dz)` into the controller's tracking
//! reference and a direction indicator for display.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::config::TrackingMode;
use crate::ocp::Reference;

/// Operator input for one tick
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Setpoint(pub Vector3<f64>);

impl Setpoint {
    pub fn new(dx: f64, dy: f64, dz: f64) -> Self {
        Self(Vector3::new(dx, dy, dz))
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }
}

/// How a setpoint is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SetpointMapping {
    /// Setpoint times `gain` is the target velocity
    Velocity { gain: f64 },
    /// Setpoint is the target position
    Position,
}

impl SetpointMapping {
    /// Mapping that matches the controller's tracked quantity
    pub fn for_mode(mode: TrackingMode) -> Self {
        match mode {
            TrackingMode::Velocity => SetpointMapping::Velocity { gain: 1.0 },
            TrackingMode::Position => SetpointMapping::Position,
        }
    }
}

/// Per-axis direction of the current setpoint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionIndicator {
    /// Sign of each component in {-1, 0, 1}
    pub signs: [i8; 3],
    /// Unit direction, `None` for a zero setpoint
    pub direction: Option<Vector3<f64>>,
}

impl DirectionIndicator {
    pub fn from_vector(v: &Vector3<f64>) -> Self {
        let sign = |x: f64| -> i8 {
            if x > 0.0 {
                1
            } else if x < 0.0 {
                -1
            } else {
                0
            }
        };
        let norm = v.norm();
        Self {
            signs: [sign(v.x), sign(v.y), sign(v.z)],
            direction: (norm > 0.0 && norm.is_finite()).then(|| v / norm),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.direction.is_none()
    }
}

/// Result of mapping one setpoint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceUpdate {
    pub reference: Reference,
    pub indicator: DirectionIndicator,
}

/// Stateless mapping plus the last setpoint seen
#[derive(Debug, Clone)]
pub struct ReferenceManager {
    mapping: SetpointMapping,
    last: Setpoint,
}

impl ReferenceManager {
    pub fn new(mapping: SetpointMapping) -> Self {
        Self {
            mapping,
            last: Setpoint::zero(),
        }
    }

    pub fn for_mode(mode: TrackingMode) -> Self {
        Self::new(SetpointMapping::for_mode(mode))
    }

    pub fn update(&mut self, setpoint: Setpoint) -> ReferenceUpdate {
        self.last = setpoint;
        let primary = match self.mapping {
            SetpointMapping::Velocity { gain } => setpoint.0 * gain,
            SetpointMapping::Position => setpoint.0,
        };
        ReferenceUpdate {
            reference: Reference::new(primary),
            indicator: DirectionIndicator::from_vector(&setpoint.0),
        }
    }

    pub fn last_setpoint(&self) -> Setpoint {
        self.last
    }

    pub fn mapping(&self) -> SetpointMapping {
        self.mapping
    }
}

/// Anything that yields one setpoint per tick
pub trait SetpointSource {
    fn read(&mut self) -> Setpoint;
}

impl<F: FnMut() -> Setpoint> SetpointSource for F {
    fn read(&mut self) -> Setpoint {
        self()
    }
}

/// Same setpoint every tick
#[derive(Debug, Clone, Copy)]
pub struct FixedSetpoint(pub Setpoint);

impl SetpointSource for FixedSetpoint {
    fn read(&mut self) -> Setpoint {
        self.0
    }
}

/// Replays `(ticks, setpoint)` segments, then holds the last setpoint
#[derive(Debug, Clone)]
pub struct ScriptedSetpoints {
    segments: Vec<(usize, Setpoint)>,
    segment: usize,
    tick: usize,
}

impl ScriptedSetpoints {
    pub fn new(segments: Vec<(usize, Setpoint)>) -> Self {
        Self {
            segments,
            segment: 0,
            tick: 0,
        }
    }
}

impl SetpointSource for ScriptedSetpoints {
    fn read(&mut self) -> Setpoint {
        while let Some((ticks, _)) = self.segments.get(self.segment) {
            if self.tick < *ticks {
                break;
            }
            if self.segment + 1 == self.segments.len() {
                break;
            }
            self.segment += 1;
            self.tick = 0;
        }
        self.tick += 1;
        self.segments
            .get(self.segment)
            .map(|(_, s)| *s)
            .unwrap_or_default()
    }
}
