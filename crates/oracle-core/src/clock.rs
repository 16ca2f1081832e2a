//! Wall-clock abstraction.
//!
//! Staleness filtering, consensus timestamps and the price history all work
//! on wall-clock time (`DateTime<Utc>`), because readings carry timestamps
//! produced by remote sources. Components take an `Arc<dyn Clock>` so tests
//! can pin and advance time with [`ManualClock`].
//!
//! Monotonic timing (rate limiting, circuit breaker timeouts, backoff) uses
//! `tokio::time::Instant` instead and is controlled in tests with paused time.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward (or backward, for negative durations).
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
