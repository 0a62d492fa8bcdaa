//! Frame timing.

use std::time::{Duration, Instant};

/// Measures per-frame delta time for the frame loop.
#[derive(Debug)]
pub struct FrameTimer {
    start: Instant,
    last_tick: Instant,
}

impl FrameTimer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
        }
    }

    /// Total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time elapsed since the last call to `tick()`.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }

    /// Delta time in seconds since the last tick.
    pub fn delta_secs(&mut self) -> f32 {
        self.tick().as_secs_f32()
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_advances_monotonically() {
        let mut timer = FrameTimer::new();
        let first = timer.tick();
        let second = timer.tick();
        assert!(first >= Duration::ZERO);
        assert!(second >= Duration::ZERO);
        assert!(timer.elapsed() >= first + second);
    }
}
