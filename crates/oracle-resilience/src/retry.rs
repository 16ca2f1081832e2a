//! Retry policy: attempt budget, exponential backoff with jitter, per-call timeout.

use crate::error::{ResilienceError, ResilienceResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Classifies call errors for the executor.
///
/// Transient failures (timeouts, connection errors, 5xx, 429) should return
/// true. Anything a retry cannot fix (other 4xx, malformed payloads, bad
/// credentials) should return false.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Minimum wait the failing side asked for (e.g. HTTP `Retry-After`).
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Retry and timeout settings shared by every provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first. Default: 3.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry. Default: 500ms.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Growth factor between retries. Default: 2.0.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Backoff cap before jitter. Default: 10s.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Relative jitter; 0.25 spreads each delay over ±25%.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Upper bound on a single call. Default: 15s.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_jitter() -> f64 {
    0.25
}

fn default_call_timeout_ms() -> u64 {
    15_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> ResilienceResult<()> {
        if self.max_attempts == 0 {
            return Err(ResilienceError::InvalidConfig(
                "max_attempts must be > 0".to_string(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ResilienceError::InvalidConfig(format!(
                "multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(ResilienceError::InvalidConfig(format!(
                "jitter must be in [0, 1), got {}",
                self.jitter
            )));
        }
        if self.call_timeout_ms == 0 {
            return Err(ResilienceError::InvalidConfig(
                "call_timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Backoff before retry number `retry` (0 = first retry), without jitter.
    ///
    /// retry=0 -> base, retry=1 -> base * multiplier, ... capped at `max_delay_ms`.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exponent = retry.min(30) as i32;
        let delay = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = delay.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Backoff with ±`jitter` applied.
    pub fn jittered_delay<R: Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
        let delay = self.backoff_delay(retry);
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor = rng.gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        delay.mul_f64(factor)
    }

    /// Delay before retry number `retry`: the jittered backoff, raised to
    /// `retry_after` when the source asked for longer. The hint is capped at
    /// `max_delay_ms`.
    pub fn retry_delay<R: Rng + ?Sized>(
        &self,
        retry: u32,
        retry_after: Option<Duration>,
        rng: &mut R,
    ) -> Duration {
        let backoff = self.jittered_delay(retry, rng);
        match retry_after {
            Some(hint) => backoff.max(hint.min(Duration::from_millis(self.max_delay_ms))),
            None => backoff,
        }
    }
}
