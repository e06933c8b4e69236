//! Time sources for the scheduler.
//!
//! [`TimeSource`] abstracts reading the current time and waiting for a
//! deadline. [`WallClock`] is the production source: waiting parks the
//! thread. [`VirtualClock`] is the deterministic source for tests: waiting
//! jumps the clock, so timer-heavy scenarios run instantly and identically
//! on every run.

use crate::types::Time;
use std::cell::Cell;
use std::time::{Duration, Instant};

/// Where the scheduler gets its notion of "now".
pub trait TimeSource {
    /// Returns the current time.
    fn now(&self) -> Time;

    /// Blocks (or jumps) until `deadline` is reached.
    fn wait_until(&self, deadline: Time);
}

/// Wall clock time source for production use.
///
/// The epoch is the moment this source was created.
#[derive(Debug)]
pub struct WallClock {
    epoch: Instant,
}

impl WallClock {
    /// Creates a new wall clock time source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Time {
        let elapsed = self.epoch.elapsed();
        let nanos = elapsed.as_nanos().min(u128::from(u64::MAX)) as u64;
        Time::from_nanos(nanos)
    }

    fn wait_until(&self, deadline: Time) {
        let remaining = deadline.duration_since(self.now());
        if remaining > 0 {
            std::thread::sleep(Duration::from_nanos(remaining));
        }
    }
}

/// Virtual time source for deterministic runs.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: Cell<Time>,
}

impl VirtualClock {
    /// Creates a virtual clock at the epoch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> Time {
        self.now.get()
    }

    fn wait_until(&self, deadline: Time) {
        if deadline > self.now.get() {
            self.now.set(deadline);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_clock_jumps_forward_only() {
        let clock = VirtualClock::new();
        assert_eq!(clock.now(), Time::ZERO);

        clock.wait_until(Time::from_millis(10));
        assert_eq!(clock.now(), Time::from_millis(10));

        clock.wait_until(Time::from_millis(5));
        assert_eq!(clock.now(), Time::from_millis(10));
    }

    #[test]
    fn wall_clock_is_monotonic_enough() {
        let clock = WallClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn wall_clock_wait_reaches_the_deadline() {
        let clock = WallClock::new();
        let deadline = clock.now() + Duration::from_millis(2);
        clock.wait_until(deadline);
        assert!(clock.now() >= deadline);
    }
}
