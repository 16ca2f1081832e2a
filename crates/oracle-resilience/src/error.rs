//! Resilience error types.

use oracle_core::ProviderId;
use std::time::Duration;
use thiserror::Error;

/// Reasons a call is refused before it reaches the provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResilienceError {
    #[error("Circuit open for {provider}, retry in {retry_in:?}")]
    CircuitOpen {
        provider: ProviderId,
        retry_in: Duration,
    },

    #[error("Circuit half-open for {provider}, all probe slots in use")]
    ProbesExhausted { provider: ProviderId },

    #[error("Unknown provider: {0}")]
    UnknownProvider(ProviderId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type ResilienceResult<T> = Result<T, ResilienceError>;

/// Outcome of a failed [`crate::CallExecutor::execute`].
///
/// `E` is the provider call's own error type.
#[derive(Debug, Error)]
pub enum ExecuteError<E> {
    /// The call was never made (circuit open, probe slots taken, unknown provider).
    #[error("Rejected: {0}")]
    Rejected(ResilienceError),

    #[error("Timed out after {timeout:?} ({attempts} attempt(s))")]
    Timeout { timeout: Duration, attempts: u32 },

    #[error("Call failed after {attempts} attempt(s): {error}")]
    Call { error: E, attempts: u32 },
}

impl<E> ExecuteError<E> {
    /// True when the circuit breaker refused the call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(
            self,
            Self::Rejected(ResilienceError::CircuitOpen { .. })
                | Self::Rejected(ResilienceError::ProbesExhausted { .. })
        )
    }

    /// Number of times the underlying call was invoked.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Rejected(_) => 0,
            Self::Timeout { attempts, .. } | Self::Call { attempts, .. } => *attempts,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Rejected(ResilienceError::CircuitOpen { .. }) => "circuit_open",
            Self::Rejected(ResilienceError::ProbesExhausted { .. }) => "probes_exhausted",
            Self::Rejected(_) => "rejected",
            Self::Timeout { .. } => "timeout",
            Self::Call { .. } => "call",
        }
    }
}
