//! Consensus error types.

use oracle_providers::RegistryError;
use oracle_resilience::ResilienceError;
use serde::Serialize;
use thiserror::Error;

/// Why a round produced no price. Expected outcomes, not faults.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NoConsensus {
    #[error("Insufficient sources: {have} usable, {need} required")]
    InsufficientSources { have: usize, need: usize },

    #[error("Too many outliers: {normal} readings agree, {need} required")]
    OutliersExceedTolerance { normal: usize, need: usize },

    #[error("Price jump {change:.4} from {previous} to {candidate} exceeds threshold")]
    PriceJump {
        previous: f64,
        candidate: f64,
        change: f64,
    },
}

impl NoConsensus {
    /// Metric label.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::InsufficientSources { .. } => "insufficient_sources",
            Self::OutliersExceedTolerance { .. } => "outliers",
            Self::PriceJump { .. } => "price_jump",
        }
    }
}

/// Setup errors. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Invalid consensus configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Resilience(#[from] ResilienceError),
}

pub type AggregatorResult<T> = Result<T, ConsensusError>;
