//! Per-provider configuration.

use crate::error::{RegistryError, RegistryResult};
use oracle_core::ProviderId;
use oracle_resilience::{CircuitBreakerConfig, RateLimitConfig};
use serde::{Deserialize, Serialize};

/// Registration settings for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_id: ProviderId,
    /// Weight in the consensus price, in [0, 1]. Default: 1.0.
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

fn default_weight() -> f64 {
    1.0
}

impl ProviderConfig {
    /// Config with default weight, rate limit and breaker.
    pub fn new(provider_id: ProviderId) -> Self {
        Self {
            provider_id,
            weight: default_weight(),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    #[must_use]
    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    /// Weight in [0, 1], plus valid rate limit and breaker settings.
    pub fn validate(&self) -> RegistryResult<()> {
        if !self.weight.is_finite() || !(0.0..=1.0).contains(&self.weight) {
            return Err(RegistryError::InvalidWeight {
                provider: self.provider_id.clone(),
                weight: self.weight,
            });
        }
        self.rate_limit.validate()?;
        self.circuit_breaker.validate()?;
        Ok(())
    }
}
