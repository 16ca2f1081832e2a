//! Per-provider guards: one token bucket and one circuit breaker per provider,
//! created at startup and kept for the life of the process.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot};
use crate::error::{ResilienceError, ResilienceResult};
use crate::rate_limiter::{RateLimitConfig, TokenBucket};
use oracle_core::ProviderId;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Rate limiter and circuit breaker for a single provider.
#[derive(Debug)]
pub struct ProviderGuard {
    provider: ProviderId,
    limiter: TokenBucket,
    breaker: CircuitBreaker,
}

impl ProviderGuard {
    pub fn new(
        provider: ProviderId,
        rate_limit: &RateLimitConfig,
        circuit_breaker: &CircuitBreakerConfig,
    ) -> ResilienceResult<Self> {
        circuit_breaker.validate()?;
        Ok(Self {
            limiter: TokenBucket::from_config(rate_limit)?,
            breaker: CircuitBreaker::new(provider.clone(), circuit_breaker.clone()),
            provider,
        })
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    pub fn limiter(&self) -> &TokenBucket {
        &self.limiter
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn snapshot(&self) -> GuardSnapshot {
        GuardSnapshot {
            provider: self.provider.clone(),
            circuit: self.breaker.snapshot(),
            tokens_available: self.limiter.available(),
            token_capacity: self.limiter.capacity(),
        }
    }
}

/// Diagnostics view of one provider's guard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuardSnapshot {
    pub provider: ProviderId,
    pub circuit: CircuitSnapshot,
    pub tokens_available: f64,
    pub token_capacity: f64,
}

/// Owns every provider's guard. Built once; lookups are lock-free.
#[derive(Debug, Default)]
pub struct GuardRegistry {
    guards: HashMap<ProviderId, Arc<ProviderGuard>>,
}

impl GuardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider. Duplicate ids are a configuration error.
    pub fn register(
        &mut self,
        provider: ProviderId,
        rate_limit: &RateLimitConfig,
        circuit_breaker: &CircuitBreakerConfig,
    ) -> ResilienceResult<()> {
        if self.guards.contains_key(&provider) {
            return Err(ResilienceError::InvalidConfig(format!(
                "duplicate provider id: {provider}"
            )));
        }
        let guard = ProviderGuard::new(provider.clone(), rate_limit, circuit_breaker)?;
        self.guards.insert(provider, Arc::new(guard));
        Ok(())
    }

    pub fn get(&self, provider: &ProviderId) -> ResilienceResult<&Arc<ProviderGuard>> {
        self.guards
            .get(provider)
            .ok_or_else(|| ResilienceError::UnknownProvider(provider.clone()))
    }

    /// Wait for a rate limit token for `provider`.
    pub async fn acquire(&self, provider: &ProviderId) -> ResilienceResult<()> {
        self.get(provider)?.limiter().acquire().await;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Snapshots sorted by provider id.
    pub fn snapshots(&self) -> Vec<GuardSnapshot> {
        let mut snapshots: Vec<_> = self.guards.values().map(|g| g.snapshot()).collect();
        snapshots.sort_by(|a, b| a.provider.cmp(&b.provider));
        snapshots
    }
}
