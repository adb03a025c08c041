//! Time sources used by coordinators.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;

/// Wall-clock for sample timestamps, monotonic clock for elapsed-time maths.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn wallclock(&self) -> f64;
    fn monotonic(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn wallclock(&self) -> f64 {
        Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }

    fn monotonic(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Both readings advance together.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<(f64, Instant)>>,
}

impl ManualClock {
    pub fn new(wallclock: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new((wallclock, Instant::now()))),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.0 += by.as_secs_f64();
            guard.1 += by;
        }
    }

    /// Moves only the wall-clock, e.g. to simulate an NTP step.
    pub fn set_wallclock(&self, wallclock: f64) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.0 = wallclock;
        }
    }
}

impl Clock for ManualClock {
    fn wallclock(&self) -> f64 {
        self.inner.lock().map(|guard| guard.0).unwrap_or_default()
    }

    fn monotonic(&self) -> Instant {
        self.inner
            .lock()
            .map(|guard| guard.1)
            .unwrap_or_else(|_| Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_both_readings() {
        let clock = ManualClock::new(1_000.0);
        let start = clock.monotonic();
        clock.advance(Duration::from_secs(10));
        assert_eq!(clock.wallclock(), 1_010.0);
        assert_eq!(clock.monotonic() - start, Duration::from_secs(10));

        clock.set_wallclock(500.0);
        assert_eq!(clock.wallclock(), 500.0);
        assert_eq!(clock.monotonic() - start, Duration::from_secs(10));
    }

    #[test]
    fn system_wallclock_is_epoch_seconds() {
        assert!(SystemClock.wallclock() > 1_600_000_000.0);
    }
}
