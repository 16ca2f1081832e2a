//! Consensus configuration.

use crate::error::{AggregatorResult, ConsensusError};
use serde::{Deserialize, Serialize};

/// Tolerances for one consensus round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Readings older than this are ignored. Default: 300.
    #[serde(default = "default_staleness_threshold_secs")]
    pub staleness_threshold_secs: u64,
    /// Max relative deviation from the median for a reading to count. Default: 0.02.
    #[serde(default = "default_outlier_threshold")]
    pub outlier_threshold: f64,
    /// Agreeing readings needed for a result. Default: 2.
    #[serde(default = "default_min_sources")]
    pub min_sources: usize,
    /// Max relative move from the previous price before a round is held back. Default: 0.05.
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: f64,
    /// Results built from readings older than this are flagged stale. Default: 60.
    #[serde(default = "default_freshness_warning_secs")]
    pub freshness_warning_secs: u64,
    /// Tolerated future skew on reading timestamps. Default: 5.
    #[serde(default = "default_max_clock_skew_secs")]
    pub max_clock_skew_secs: u64,
    /// How long a held-back price jump waits for a confirming round. Default: 300.
    #[serde(default = "default_jump_confirmation_secs")]
    pub jump_confirmation_secs: u64,
    /// Samples kept per asset. Default: 1024.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_staleness_threshold_secs() -> u64 {
    300
}

fn default_outlier_threshold() -> f64 {
    0.02
}

fn default_min_sources() -> usize {
    2
}

fn default_circuit_breaker_threshold() -> f64 {
    0.05
}

fn default_freshness_warning_secs() -> u64 {
    60
}

fn default_max_clock_skew_secs() -> u64 {
    5
}

fn default_jump_confirmation_secs() -> u64 {
    300
}

fn default_history_capacity() -> usize {
    1024
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_secs: default_staleness_threshold_secs(),
            outlier_threshold: default_outlier_threshold(),
            min_sources: default_min_sources(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            freshness_warning_secs: default_freshness_warning_secs(),
            max_clock_skew_secs: default_max_clock_skew_secs(),
            jump_confirmation_secs: default_jump_confirmation_secs(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl ConsensusConfig {
    pub fn validate(&self) -> AggregatorResult<()> {
        if self.min_sources < 1 {
            return Err(ConsensusError::InvalidConfig(
                "min_sources must be >= 1".to_string(),
            ));
        }
        if self.staleness_threshold_secs == 0 {
            return Err(ConsensusError::InvalidConfig(
                "staleness_threshold_secs must be > 0".to_string(),
            ));
        }
        if !self.outlier_threshold.is_finite() || self.outlier_threshold <= 0.0 {
            return Err(ConsensusError::InvalidConfig(format!(
                "outlier_threshold must be > 0, got {}",
                self.outlier_threshold
            )));
        }
        if !self.circuit_breaker_threshold.is_finite() || self.circuit_breaker_threshold <= 0.0 {
            return Err(ConsensusError::InvalidConfig(format!(
                "circuit_breaker_threshold must be > 0, got {}",
                self.circuit_breaker_threshold
            )));
        }
        if self.jump_confirmation_secs == 0 {
            return Err(ConsensusError::InvalidConfig(
                "jump_confirmation_secs must be > 0".to_string(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(ConsensusError::InvalidConfig(
                "history_capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let config = ConsensusConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_sources, 2);
        assert_eq!(config.staleness_threshold_secs, 300);
    }

    #[test]
    fn test_rejects_bad_values() {
        let cases = [
            ConsensusConfig {
                min_sources: 0,
                ..Default::default()
            },
            ConsensusConfig {
                outlier_threshold: 0.0,
                ..Default::default()
            },
            ConsensusConfig {
                circuit_breaker_threshold: -1.0,
                ..Default::default()
            },
            ConsensusConfig {
                staleness_threshold_secs: 0,
                ..Default::default()
            },
            ConsensusConfig {
                jump_confirmation_secs: 0,
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }

    #[test]
    fn test_partial_deserialize() {
        let config: ConsensusConfig =
            serde_json::from_str(r#"{"min_sources": 3, "outlier_threshold": 0.01}"#).unwrap();
        assert_eq!(config.min_sources, 3);
        assert_eq!(config.outlier_threshold, 0.01);
        assert_eq!(config.circuit_breaker_threshold, 0.05);
    }
}
