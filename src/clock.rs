//! Time source abstraction
//!
//! Every time-dependent decision (liveness, scoring, retry deadlines) reads
//! an injected clock so epoch steps can be driven without real time passing.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Monotonic time source
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;
}

/// Wall clock backed by `Instant::now()`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    now: Mutex<Instant>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant
    pub fn new() -> Self {
        let origin = Instant::now();
        Self {
            origin,
            now: Mutex::new(origin),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    /// Jump to an absolute instant; never moves backwards
    pub fn set(&self, to: Instant) {
        let mut now = self.now.lock();
        if to > *now {
            *now = to;
        }
    }

    /// Instant the clock was created at
    pub fn origin(&self) -> Instant {
        self.origin
    }

    /// Instant `offset` after the origin
    pub fn at(&self, offset: Duration) -> Instant {
        self.origin + offset
    }

    /// Time elapsed since the origin
    pub fn elapsed(&self) -> Duration {
        self.now.lock().duration_since(self.origin)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_only_moves_forward() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.advance(Duration::from_secs(3));
        assert_eq!(clock.elapsed(), Duration::from_secs(3));

        clock.set(start);
        assert_eq!(clock.now(), start + Duration::from_secs(3));

        clock.set(clock.at(Duration::from_secs(10)));
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
    }
}
