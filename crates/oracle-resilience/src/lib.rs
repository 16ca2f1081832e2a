//! Resilience layer for price source calls.
//!
//! Each provider gets a [`TokenBucket`] and a [`CircuitBreaker`], held in a
//! [`GuardRegistry`]. [`CallExecutor`] runs calls through both, with a
//! per-attempt timeout and jittered exponential backoff from [`RetryPolicy`].

pub mod circuit_breaker;
pub mod error;
pub mod executor;
pub mod rate_limiter;
pub mod registry;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitPermit, CircuitSnapshot, CircuitState,
};
pub use error::{ExecuteError, ResilienceError, ResilienceResult};
pub use executor::CallExecutor;
pub use rate_limiter::{RateLimitConfig, TokenBucket};
pub use registry::{GuardRegistry, GuardSnapshot, ProviderGuard};
pub use retry::{RetryPolicy, Retryable};
