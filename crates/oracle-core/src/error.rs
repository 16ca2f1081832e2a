//! Error types for oracle-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid confidence: {0}")]
    InvalidConfidence(String),

    #[error("Invalid asset: {0}")]
    InvalidAsset(String),

    #[error("Invalid provider id: {0}")]
    InvalidProviderId(String),

    #[error("Reading from {provider} is for {actual}, expected {expected}")]
    AssetMismatch {
        provider: String,
        expected: String,
        actual: String,
    },
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
