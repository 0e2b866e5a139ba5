//! Time sources. Cooldowns in the route and audio components are measured
//! against a [`Clock`] so that tests can step time by hand.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

/// A monotonic source of "time since some fixed origin".
pub trait Clock: Send + Sync {
    /// Time elapsed since this clock's origin.
    fn now(&self) -> Duration;
}

/// Wall-clock time since the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Starts a new clock at zero.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    now: Arc<Mutex<Duration>>,
}

impl VirtualClock {
    /// Starts a new clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `step`, stopping at [`Duration::MAX`].
    pub fn advance(&self, step: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = now.saturating_add(step);
    }

    /// Moves the clock forward by `secs` seconds. Negative or NaN steps do
    /// nothing.
    pub fn advance_secs(&self, secs: f64) {
        let step = Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX);
        self.advance(step);
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_clock_moves_only_when_advanced() {
        let clock = VirtualClock::new();
        let shared = clock.clone();
        assert_eq!(clock.now(), Duration::ZERO);

        shared.advance(Duration::from_millis(250));
        shared.advance_secs(0.75);
        assert_eq!(clock.now(), Duration::from_secs(1));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
