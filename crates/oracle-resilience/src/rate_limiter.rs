//! Per-provider token bucket rate limiting.
//!
//! Each provider gets one bucket holding up to `capacity` tokens, refilled
//! continuously at `max_requests_per_window / window_secs` tokens per second.
//! Refill is computed lazily whenever the bucket is touched; there is no
//! background task.

use crate::error::{ResilienceError, ResilienceResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Upper bound on a single wait while polling for a token.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Lower bound on a single wait, so float rounding cannot spin the loop.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Tolerance for float accumulation when checking for a whole token.
const TOKEN_EPSILON: f64 = 1e-9;

/// Rate limit for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window. Default: 60.
    #[serde(default = "default_max_requests_per_window")]
    pub max_requests_per_window: u32,
    /// Window length in seconds. Default: 60.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Bucket capacity override. Defaults to `max_requests_per_window`.
    #[serde(default)]
    pub burst: Option<u32>,
}

fn default_max_requests_per_window() -> u32 {
    60
}

fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests_per_window: default_max_requests_per_window(),
            window_secs: default_window_secs(),
            burst: None,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> ResilienceResult<()> {
        if self.max_requests_per_window == 0 {
            return Err(ResilienceError::InvalidConfig(
                "max_requests_per_window must be > 0".to_string(),
            ));
        }
        if self.window_secs == 0 {
            return Err(ResilienceError::InvalidConfig(
                "window_secs must be > 0".to_string(),
            ));
        }
        if self.burst == Some(0) {
            return Err(ResilienceError::InvalidConfig(
                "burst must be > 0 when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn capacity(&self) -> f64 {
        f64::from(self.burst.unwrap_or(self.max_requests_per_window))
    }

    pub fn refill_per_sec(&self) -> f64 {
        f64::from(self.max_requests_per_window) / self.window_secs as f64
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter.
///
/// Bursts are bounded by `capacity` and sustained throughput by
/// `refill_per_sec`. Waiters in [`TokenBucket::acquire`] queue on a fair
/// async mutex, so they are served roughly in arrival order.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
    /// Serialises waiters; tokio's mutex is FIFO.
    turnstile: tokio::sync::Mutex<()>,
}

impl TokenBucket {
    /// Create a full bucket. Capacity must hold at least one token and the
    /// refill rate must be positive.
    pub fn new(capacity: f64, refill_per_sec: f64) -> ResilienceResult<Self> {
        if !capacity.is_finite() || capacity < 1.0 {
            return Err(ResilienceError::InvalidConfig(format!(
                "bucket capacity must be >= 1, got {capacity}"
            )));
        }
        if !refill_per_sec.is_finite() || refill_per_sec <= 0.0 {
            return Err(ResilienceError::InvalidConfig(format!(
                "refill rate must be > 0, got {refill_per_sec}"
            )));
        }

        Ok(Self {
            capacity,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            turnstile: tokio::sync::Mutex::new(()),
        })
    }

    pub fn from_config(config: &RateLimitConfig) -> ResilienceResult<Self> {
        config.validate()?;
        Self::new(config.capacity(), config.refill_per_sec())
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&self) {
        let _turn = self.turnstile.lock().await;
        loop {
            let wait = match self.take_or_wait() {
                None => return,
                Some(wait) => wait,
            };
            tokio::time::sleep(wait.clamp(MIN_WAIT, POLL_INTERVAL)).await;
        }
    }

    /// Take a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.take_or_wait().is_none()
    }

    /// Current token level (after refill).
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_per_sec(&self) -> f64 {
        self.refill_per_sec
    }

    /// Take a token, or report how long until one should be available.
    fn take_or_wait(&self) -> Option<Duration> {
        let mut state = self.state.lock();
        self.refill(&mut state);

        if state.tokens + TOKEN_EPSILON >= 1.0 {
            state.tokens = (state.tokens - 1.0).max(0.0);
            return None;
        }

        let missing = 1.0 - state.tokens;
        Some(Duration::from_secs_f64(missing / self.refill_per_sec))
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill);
        let refilled = state.tokens + elapsed.as_secs_f64() * self.refill_per_sec;
        state.tokens = refilled.min(self.capacity);
        state.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready};

    #[test]
    fn test_config_derivation() {
        let config = RateLimitConfig {
            max_requests_per_window: 120,
            window_secs: 60,
            burst: None,
        };
        assert_eq!(config.capacity(), 120.0);
        assert_eq!(config.refill_per_sec(), 2.0);

        let config = RateLimitConfig {
            burst: Some(5),
            ..config
        };
        assert_eq!(config.capacity(), 5.0);
    }

    #[test]
    fn test_config_validation() {
        assert!(RateLimitConfig::default().validate().is_ok());

        let zero = RateLimitConfig {
            max_requests_per_window: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let zero_window = RateLimitConfig {
            window_secs: 0,
            ..Default::default()
        };
        assert!(zero_window.validate().is_err());

        let zero_burst = RateLimitConfig {
            burst: Some(0),
            ..Default::default()
        };
        assert!(zero_burst.validate().is_err());
    }

    #[test]
    fn test_rejects_degenerate_bucket() {
        assert!(TokenBucket::new(5.0, 0.0).is_err());
        assert!(TokenBucket::new(5.0, -1.0).is_err());
        assert!(TokenBucket::new(5.0, f64::NAN).is_err());
        assert!(TokenBucket::new(0.5, 1.0).is_err());
        assert!(TokenBucket::new(1.0, 0.01).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_empty() {
        let bucket = TokenBucket::new(3.0, 1.0).unwrap();

        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_refill_caps_at_capacity() {
        let bucket = TokenBucket::new(2.0, 4.0).unwrap();
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());

        tokio::time::advance(Duration::from_millis(250)).await;
        assert!((bucket.available() - 1.0).abs() < 1e-6);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(bucket.available(), 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_beyond_capacity_waits_one_refill_interval() {
        // 5 tokens, 10 tokens/sec: the 6th acquire waits ~100ms.
        let bucket = TokenBucket::new(5.0, 10.0).unwrap();
        for _ in 0..5 {
            bucket.acquire().await;
        }

        let start = Instant::now();
        bucket.acquire().await;
        let waited = start.elapsed();

        assert!(waited >= Duration::from_millis(95), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(120), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_served_in_order() {
        let bucket = TokenBucket::new(1.0, 10.0).unwrap();
        assert!(bucket.try_acquire());

        let mut first = tokio_test::task::spawn(bucket.acquire());
        let mut second = tokio_test::task::spawn(bucket.acquire());
        assert_pending!(first.poll());
        assert_pending!(second.poll());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_ready!(first.poll());
        // Half a token left, the second waiter still needs ~50ms.
        assert_pending!(second.poll());

        tokio::time::advance(Duration::from_millis(60)).await;
        assert_ready!(second.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_rate_bounded() {
        let bucket = TokenBucket::new(1.0, 20.0).unwrap();
        let start = Instant::now();
        for _ in 0..21 {
            bucket.acquire().await;
        }
        // First token is free, the next 20 need one second of refill.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(990), "elapsed {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(1100), "elapsed {elapsed:?}");
    }
}
