//! Wall-clock timestep source for real-time loops

use std::time::Instant;

/// Measures elapsed wall time between ticks
///
/// The measured interval is used directly as the plant step and the
/// controller's time advance. Intervals shorter than `min_dt` (clock
/// resolution, back-to-back ticks) are raised to `min_dt`.
#[derive(Debug, Clone)]
pub struct WallClock {
    last: Instant,
    min_dt: f64,
    total: f64,
}

impl WallClock {
    pub fn start(min_dt: f64) -> Self {
        Self {
            last: Instant::now(),
            min_dt,
            total: 0.0,
        }
    }

    /// Seconds since the previous tick, at least `min_dt`
    pub fn tick(&mut self) -> f64 {
        let now = Instant::now();
        let dt = now.duration_since(self.last).as_secs_f64().max(self.min_dt);
        self.last = now;
        self.total += dt;
        dt
    }

    /// Sum of all returned intervals [s]
    pub fn total(&self) -> f64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_back_to_back_ticks_are_clamped() {
        let mut clock = WallClock::start(0.5);
        let a = clock.tick();
        let b = clock.tick();
        assert!(a >= 0.5 && b >= 0.5);
        assert!((clock.total() - (a + b)).abs() < 1e-12);
    }

    #[test]
    fn test_measures_sleep() {
        let mut clock = WallClock::start(1e-6);
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(clock.tick() >= 0.019);
    }
}
