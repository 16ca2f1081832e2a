//! Retrying call executor.
//!
//! Every provider call goes through [`CallExecutor::execute`]:
//!
//! 1. circuit breaker check (fail fast while open)
//! 2. rate limit token
//! 3. the call itself under `call_timeout`
//! 4. on a retryable error, jittered exponential backoff (or the error's own
//!    `retry_after`, if longer) and back to 2
//!
//! The breaker sees one outcome per `execute`: success, or a single failure
//! once retries are exhausted or the error is not retryable.

use crate::error::ExecuteError;
use crate::registry::GuardRegistry;
use crate::retry::{RetryPolicy, Retryable};
use oracle_core::ProviderId;
use oracle_telemetry::Metrics;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

pub struct CallExecutor {
    guards: Arc<GuardRegistry>,
    policy: RetryPolicy,
}

impl CallExecutor {
    pub fn new(guards: Arc<GuardRegistry>, policy: RetryPolicy) -> Self {
        Self { guards, policy }
    }

    pub fn guards(&self) -> &Arc<GuardRegistry> {
        &self.guards
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `call` against `provider` with rate limiting, circuit breaking,
    /// per-attempt timeout and retries.
    ///
    /// `call` is invoked once per attempt and must build a fresh future each time.
    pub async fn execute<T, E, F, Fut>(
        &self,
        provider: &ProviderId,
        mut call: F,
    ) -> Result<T, ExecuteError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        let guard = self.guards.get(provider).map_err(ExecuteError::Rejected)?;
        let permit = guard
            .breaker()
            .try_acquire()
            .map_err(ExecuteError::Rejected)?;

        let timeout = self.policy.call_timeout();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            guard.limiter().acquire().await;
            Metrics::rate_limit_tokens(provider.as_str(), guard.limiter().available());

            let started = Instant::now();
            let outcome = tokio::time::timeout(timeout, call()).await;
            Metrics::provider_latency(provider.as_str(), started.elapsed().as_secs_f64() * 1000.0);

            let retry_after = match outcome {
                Ok(Ok(value)) => {
                    permit.success();
                    if attempt > 1 {
                        debug!(provider = %provider, attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(error)) => {
                    if !error.is_retryable() {
                        debug!(provider = %provider, attempt, error = %error, "Non-retryable failure");
                        permit.failure();
                        return Err(ExecuteError::Call {
                            error,
                            attempts: attempt,
                        });
                    }
                    if attempt >= max_attempts {
                        warn!(provider = %provider, attempts = attempt, error = %error, "Retries exhausted");
                        permit.failure();
                        return Err(ExecuteError::Call {
                            error,
                            attempts: attempt,
                        });
                    }
                    debug!(provider = %provider, attempt, error = %error, "Retryable failure");
                    error.retry_after()
                }
                Err(_elapsed) => {
                    if attempt >= max_attempts {
                        warn!(
                            provider = %provider,
                            attempts = attempt,
                            timeout_ms = timeout.as_millis() as u64,
                            "Retries exhausted on timeout"
                        );
                        permit.failure();
                        return Err(ExecuteError::Timeout {
                            timeout,
                            attempts: attempt,
                        });
                    }
                    debug!(provider = %provider, attempt, "Call timed out");
                    None
                }
            };

            let delay =
                self.policy
                    .retry_delay(attempt - 1, retry_after, &mut rand::thread_rng());
            warn!(
                provider = %provider,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying provider call"
            );
            Metrics::provider_retry(provider.as_str());
            tokio::time::sleep(delay).await;
        }
    }
}
