//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Invalid identifier: {0}")]
    Core(#[from] oracle_core::CoreError),

    #[error("Registry error: {0}")]
    Registry(#[from] oracle_providers::RegistryError),

    #[error("Consensus error: {0}")]
    Consensus(#[from] oracle_consensus::ConsensusError),

    #[error("Resilience error: {0}")]
    Resilience(#[from] oracle_resilience::ResilienceError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] oracle_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
