//! Provider error types.

use oracle_core::{CoreError, ProviderId};
use oracle_resilience::{ResilienceError, Retryable};
use std::time::Duration;
use thiserror::Error;

/// Failure of a single `fetch_price` call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// Transport failure or non-success HTTP status.
    #[error("Network error (status {status:?}): {message}")]
    Network {
        status: Option<u16>,
        message: String,
    },

    #[error("Request timed out")]
    Timeout,

    /// Response arrived but could not be turned into a reading.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited by source (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
}

impl FetchError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Timeout => "timeout",
            Self::Parse(_) => "parse",
            Self::Authentication(_) => "authentication",
            Self::RateLimited { .. } => "rate_limited",
        }
    }
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            // No status means the connection itself failed.
            Self::Network { status: None, .. } => true,
            Self::Network {
                status: Some(code), ..
            } => *code >= 500,
            Self::Timeout | Self::RateLimited { .. } => true,
            Self::Parse(_) | Self::Authentication(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Parse(e.to_string())
        } else {
            Self::Network {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            }
        }
    }
}

impl From<CoreError> for FetchError {
    fn from(e: CoreError) -> Self {
        Self::Parse(e.to_string())
    }
}

/// Provider configuration and registration errors. Fatal at startup.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No providers configured")]
    Empty,

    #[error("Duplicate provider id: {0}")]
    DuplicateProvider(ProviderId),

    #[error("Invalid weight {weight} for {provider}: must be in [0, 1]")]
    InvalidWeight { provider: ProviderId, weight: f64 },

    #[error("Invalid source for {provider}: {reason}")]
    InvalidSource { provider: ProviderId, reason: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error(transparent)]
    Resilience(#[from] ResilienceError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
