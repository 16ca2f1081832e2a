//! Per-provider circuit breaker.
//!
//! Three states:
//! - `Closed`: calls pass. `failure_threshold` consecutive failures open the circuit.
//! - `Open`: calls are refused until `reopen_at`. The first check after that
//!   moves to `HalfOpen`.
//! - `HalfOpen`: at most `half_open_max_calls` probes in flight.
//!   `success_threshold` successes close the circuit, any failure reopens it.
//!
//! All state sits behind one mutex and only changes through the transitions
//! below. Callers get a [`CircuitPermit`] and must report the outcome through
//! it; a permit dropped without an outcome just frees its probe slot.

use crate::error::{ResilienceError, ResilienceResult};
use oracle_core::ProviderId;
use oracle_telemetry::Metrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit breaker thresholds for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit. Default: 5.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it. Default: 2.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Seconds the circuit stays open before probing. Default: 60.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Concurrent probes allowed while half-open. Default: 2.
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_half_open_max_calls() -> u32 {
    2
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_secs: default_timeout_secs(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> ResilienceResult<()> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::InvalidConfig(
                "failure_threshold must be > 0".to_string(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(ResilienceError::InvalidConfig(
                "success_threshold must be > 0".to_string(),
            ));
        }
        if self.half_open_max_calls == 0 {
            return Err(ResilienceError::InvalidConfig(
                "half_open_max_calls must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding: 0 closed, 1 half-open, 2 open.
    pub fn as_gauge(self) -> i64 {
        match self {
            Self::Closed => 0,
            Self::HalfOpen => 1,
            Self::Open => 2,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Read-only view of a breaker for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Time until an open circuit starts probing.
    pub retry_in: Option<Duration>,
    pub probes_in_flight: u32,
    /// How many times the circuit has opened since startup.
    pub times_opened: u64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    reopen_at: Option<Instant>,
    probes_in_flight: u32,
    /// Bumped on every entry into half-open so stale probes cannot free new slots.
    probe_epoch: u64,
    times_opened: u64,
}

/// Circuit breaker for one provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    provider: ProviderId,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(provider: ProviderId, config: CircuitBreakerConfig) -> Self {
        Metrics::circuit_state(provider.as_str(), CircuitState::Closed.as_gauge());
        Self {
            provider,
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                reopen_at: None,
                probes_in_flight: 0,
                probe_epoch: 0,
                times_opened: 0,
            }),
        }
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    /// Ask to make a call.
    ///
    /// Refuses while open (until `reopen_at`) and when every half-open probe
    /// slot is taken.
    pub fn try_acquire(&self) -> ResilienceResult<CircuitPermit<'_>> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if inner.state == CircuitState::Open {
            let reopen_at = inner.reopen_at.unwrap_or(now);
            if now < reopen_at {
                return Err(ResilienceError::CircuitOpen {
                    provider: self.provider.clone(),
                    retry_in: reopen_at - now,
                });
            }
            self.transition(&mut inner, CircuitState::HalfOpen);
        }

        if inner.state == CircuitState::Closed {
            return Ok(CircuitPermit {
                breaker: self,
                probe_epoch: None,
                settled: false,
            });
        }

        if inner.probes_in_flight >= self.config.half_open_max_calls {
            return Err(ResilienceError::ProbesExhausted {
                provider: self.provider.clone(),
            });
        }
        inner.probes_in_flight += 1;
        Ok(CircuitPermit {
            breaker: self,
            probe_epoch: Some(inner.probe_epoch),
            settled: false,
        })
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        let now = Instant::now();
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            retry_in: match inner.state {
                CircuitState::Open => inner.reopen_at.map(|at| at.saturating_duration_since(now)),
                _ => None,
            },
            probes_in_flight: inner.probes_in_flight,
            times_opened: inner.times_opened,
        }
    }

    fn on_success(&self, probe_epoch: Option<u64>) {
        let mut inner = self.inner.lock();
        let is_current = Self::release_probe(&mut inner, probe_epoch);

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            // Only probes admitted in this half-open period count.
            CircuitState::HalfOpen if !is_current => {}
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            // Late result from a call admitted before the circuit opened.
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, probe_epoch: Option<u64>) {
        let mut inner = self.inner.lock();
        let is_current = Self::release_probe(&mut inner, probe_epoch);

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen if !is_current => {}
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Free the slot of a probe from the current half-open period. Returns
    /// whether the outcome belongs to that period.
    fn release_probe(inner: &mut Inner, probe_epoch: Option<u64>) -> bool {
        let current = probe_epoch == Some(inner.probe_epoch) && inner.state == CircuitState::HalfOpen;
        if current {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
        current
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.probes_in_flight = 0;

        match to {
            CircuitState::Open => {
                inner.reopen_at = Some(Instant::now() + self.config.timeout());
                inner.times_opened += 1;
                warn!(
                    provider = %self.provider,
                    %from,
                    timeout_secs = self.config.timeout_secs,
                    "Circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.reopen_at = None;
                inner.probe_epoch += 1;
                info!(provider = %self.provider, "Circuit half-open, probing");
            }
            CircuitState::Closed => {
                inner.reopen_at = None;
                info!(provider = %self.provider, %from, "Circuit closed");
            }
        }

        Metrics::circuit_state(self.provider.as_str(), to.as_gauge());
    }
}

/// Permission to make one call, obtained from [`CircuitBreaker::try_acquire`].
#[must_use = "report the call outcome with success() or failure()"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe_epoch: Option<u64>,
    settled: bool,
}

impl CircuitPermit<'_> {
    /// True when this permit is a half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe_epoch.is_some()
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe_epoch);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe_epoch);
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        // Cancelled call: free the probe slot without judging the provider.
        let mut inner = self.breaker.inner.lock();
        CircuitBreaker::release_probe(&mut inner, self.probe_epoch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, success_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            ProviderId::parse("test").unwrap(),
            CircuitBreakerConfig {
                failure_threshold,
                success_threshold,
                timeout_secs: 30,
                half_open_max_calls: 2,
            },
        )
    }

    fn fail(cb: &CircuitBreaker) {
        cb.try_acquire().unwrap().failure();
    }

    fn succeed(cb: &CircuitBreaker) {
        cb.try_acquire().unwrap().success();
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let cb = breaker(3, 2);
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        match cb.try_acquire() {
            Err(ResilienceError::CircuitOpen { retry_in, .. }) => {
                assert_eq!(retry_in, Duration::from_secs(30));
            }
            other => panic!("expected CircuitOpen, got {:?}", other.map(|_| ())),
        };
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let cb = breaker(3, 2);
        fail(&cb);
        fail(&cb);
        succeed(&cb);
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_successes() {
        let cb = breaker(1, 2);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;

        let permit = cb.try_acquire().unwrap();
        assert!(permit.is_probe());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        permit.success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(!cb.try_acquire().unwrap().is_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1, 2);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(31)).await;

        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.retry_in, Some(Duration::from_secs(30)));
        assert_eq!(snapshot.times_opened, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_limit() {
        let cb = breaker(1, 3);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(30)).await;

        let first = cb.try_acquire().unwrap();
        let second = cb.try_acquire().unwrap();
        assert!(matches!(
            cb.try_acquire().map(|_| ()),
            Err(ResilienceError::ProbesExhausted { .. })
        ));

        // Dropping a permit without an outcome frees the slot.
        drop(first);
        let third = cb.try_acquire().unwrap();
        second.success();
        third.success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.snapshot().consecutive_successes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_probe_does_not_free_new_slot() {
        let cb = breaker(1, 2);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(30)).await;

        let stale = cb.try_acquire().unwrap();
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        let _a = cb.try_acquire().unwrap();
        let _b = cb.try_acquire().unwrap();
        drop(stale);
        assert_eq!(cb.snapshot().probes_in_flight, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_outcomes_ignored_while_half_open() {
        let cb = breaker(2, 1);
        // Admitted while closed, settled only after the circuit moved on.
        let slow_ok = cb.try_acquire().unwrap();
        let slow_err = cb.try_acquire().unwrap();
        assert!(!slow_ok.is_probe());
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        let trial = cb.try_acquire().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        slow_ok.success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        slow_err.failure();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.snapshot().probes_in_flight, 1);

        trial.success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_config_validation() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());
        let bad = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
