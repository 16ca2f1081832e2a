//! Provider registry.
//!
//! Holds every configured provider with its weight and guard settings. The
//! registry is built once at startup and then shared read-only; it also
//! produces the [`GuardRegistry`] the executor runs calls through.

use crate::config::ProviderConfig;
use crate::error::{RegistryError, RegistryResult};
use crate::provider::PriceProvider;
use oracle_core::ProviderId;
use oracle_resilience::GuardRegistry;
use std::sync::Arc;
use tracing::info;

/// A provider with its configuration.
#[derive(Clone)]
pub struct RegisteredProvider {
    pub config: ProviderConfig,
    pub provider: Arc<dyn PriceProvider>,
}

impl RegisteredProvider {
    pub fn id(&self) -> &ProviderId {
        &self.config.provider_id
    }

    pub fn weight(&self) -> f64 {
        self.config.weight
    }
}

/// Configured providers in registration order.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<RegisteredProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Rejects weights outside [0, 1], duplicate ids and
    /// invalid rate limit or breaker settings.
    pub fn register(
        &mut self,
        config: ProviderConfig,
        provider: Arc<dyn PriceProvider>,
    ) -> RegistryResult<()> {
        config.validate()?;
        if self.get(&config.provider_id).is_some() {
            return Err(RegistryError::DuplicateProvider(config.provider_id.clone()));
        }

        info!(
            provider = %config.provider_id,
            weight = config.weight,
            max_requests_per_window = config.rate_limit.max_requests_per_window,
            window_secs = config.rate_limit.window_secs,
            "Registered price provider"
        );
        self.providers.push(RegisteredProvider { config, provider });
        Ok(())
    }

    pub fn get(&self, id: &ProviderId) -> Option<&RegisteredProvider> {
        self.providers.iter().find(|p| p.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredProvider> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Fails when nothing is registered.
    pub fn validate(&self) -> RegistryResult<()> {
        if self.providers.is_empty() {
            return Err(RegistryError::Empty);
        }
        Ok(())
    }

    /// Create one token bucket and one circuit breaker per provider.
    pub fn build_guards(&self) -> RegistryResult<GuardRegistry> {
        self.validate()?;
        let mut guards = GuardRegistry::new();
        for p in &self.providers {
            guards.register(
                p.config.provider_id.clone(),
                &p.config.rate_limit,
                &p.config.circuit_breaker,
            )?;
        }
        Ok(guards)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|p| &p.config))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use async_trait::async_trait;
    use oracle_core::{Asset, PriceReading};
    use oracle_resilience::RateLimitConfig;

    struct Unreachable;

    #[async_trait]
    impl PriceProvider for Unreachable {
        async fn fetch_price(&self, _asset: &Asset) -> Result<PriceReading, FetchError> {
            Err(FetchError::Timeout)
        }
    }

    fn cfg(id: &str) -> ProviderConfig {
        ProviderConfig::new(ProviderId::parse(id).unwrap())
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ProviderRegistry::new();
        registry
            .register(cfg("a").with_weight(0.5), Arc::new(Unreachable))
            .unwrap();
        registry.register(cfg("b"), Arc::new(Unreachable)).unwrap();

        assert_eq!(registry.len(), 2);
        let a = registry.get(&ProviderId::parse("a").unwrap()).unwrap();
        assert_eq!(a.weight(), 0.5);
        let ids: Vec<_> = registry.iter().map(|p| p.id().as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_rejects_bad_weight() {
        let mut registry = ProviderRegistry::new();
        for weight in [-0.1, 1.5, f64::NAN] {
            let err = registry
                .register(cfg("a").with_weight(weight), Arc::new(Unreachable))
                .unwrap_err();
            assert!(matches!(err, RegistryError::InvalidWeight { .. }));
        }
    }

    #[test]
    fn test_rejects_duplicate() {
        let mut registry = ProviderRegistry::new();
        registry.register(cfg("a"), Arc::new(Unreachable)).unwrap();
        let err = registry
            .register(cfg("a"), Arc::new(Unreachable))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateProvider(_)));
    }

    #[test]
    fn test_rejects_zero_rate_limit() {
        let mut registry = ProviderRegistry::new();
        let config = cfg("a").with_rate_limit(RateLimitConfig {
            max_requests_per_window: 0,
            ..Default::default()
        });
        let err = registry.register(config, Arc::new(Unreachable)).unwrap_err();
        assert!(matches!(err, RegistryError::Resilience(_)));
    }

    #[tokio::test]
    async fn test_build_guards() {
        let registry = ProviderRegistry::new();
        assert!(matches!(registry.build_guards(), Err(RegistryError::Empty)));

        let mut registry = ProviderRegistry::new();
        registry.register(cfg("a"), Arc::new(Unreachable)).unwrap();
        registry.register(cfg("b"), Arc::new(Unreachable)).unwrap();
        let guards = registry.build_guards().unwrap();
        assert_eq!(guards.len(), 2);
    }
}
