//! Application configuration.
//!
//! Loaded once at startup from a TOML file, with `ORACLE__SECTION__KEY`
//! environment variables overriding file values. Never hot-reloaded.

use crate::error::{AppError, AppResult};
use oracle_consensus::ConsensusConfig;
use oracle_core::Asset;
use oracle_providers::{HttpSourceConfig, ProviderConfig};
use oracle_resilience::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
    /// Assets checked for a sustained depeg after every round.
    #[serde(default)]
    pub depeg_watch: Vec<DepegWatch>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Filter used when `RUST_LOG` is unset. Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Operator HTTP endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_server_enabled() -> bool {
    true
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_server_enabled(),
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Polling schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between batch rounds. Default: 30.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Upper bound on one batch round. Default: 60.
    #[serde(default = "default_round_timeout_secs")]
    pub round_timeout_secs: u64,
    /// Assets priced every round.
    #[serde(default)]
    pub assets: Vec<Asset>,
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_round_timeout_secs() -> u64 {
    60
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            round_timeout_secs: default_round_timeout_secs(),
            assets: Vec::new(),
        }
    }
}

/// One `[[providers]]` table: registration settings plus the HTTP source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    #[serde(flatten)]
    pub config: ProviderConfig,
    pub source: HttpSourceConfig,
}

/// One `[[depeg_watch]]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepegWatch {
    pub asset: Asset,
    /// Price the asset must stay strictly below.
    pub trigger_price: f64,
    /// Seconds it must stay there.
    pub confirmation_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            consensus: ConsensusConfig::default(),
            retry: RetryPolicy::default(),
            telemetry: TelemetryConfig::default(),
            server: ServerConfig::default(),
            schedule: ScheduleConfig::default(),
            providers: Vec::new(),
            depeg_watch: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load from a TOML file, then apply `ORACLE__*` environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AppError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let config: Self = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix("ORACLE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse from a TOML string without environment overrides.
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup checks. Every failure here is fatal.
    pub fn validate(&self) -> AppResult<()> {
        self.consensus.validate()?;
        self.retry.validate()?;

        if self.providers.is_empty() {
            return Err(AppError::Config("no providers configured".to_string()));
        }

        let mut seen = HashSet::new();
        for entry in &self.providers {
            let id = &entry.config.provider_id;
            if !seen.insert(id) {
                return Err(AppError::Config(format!("duplicate provider id: {id}")));
            }
            entry.config.validate()?;
        }

        if self.schedule.poll_interval_secs == 0 {
            return Err(AppError::Config(
                "schedule.poll_interval_secs must be > 0".to_string(),
            ));
        }
        if self.schedule.round_timeout_secs == 0 {
            return Err(AppError::Config(
                "schedule.round_timeout_secs must be > 0".to_string(),
            ));
        }

        for watch in &self.depeg_watch {
            if !watch.trigger_price.is_finite() || watch.trigger_price <= 0.0 {
                return Err(AppError::Config(format!(
                    "depeg_watch {}: trigger_price must be > 0",
                    watch.asset
                )));
            }
            if watch.confirmation_secs == 0 {
                return Err(AppError::Config(format!(
                    "depeg_watch {}: confirmation_secs must be > 0",
                    watch.asset
                )));
            }
        }

        Ok(())
    }

    /// Scheduled assets plus any watched asset not already scheduled.
    pub fn polled_assets(&self) -> Vec<Asset> {
        let mut assets = self.schedule.assets.clone();
        for watch in &self.depeg_watch {
            if !assets.contains(&watch.asset) {
                assets.push(watch.asset.clone());
            }
        }
        assets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oracle_providers::RegistryError;

    const SAMPLE: &str = r#"
        [consensus]
        min_sources = 2
        outlier_threshold = 0.01

        [schedule]
        poll_interval_secs = 15
        assets = ["usdc", "USDT"]

        [[providers]]
        provider_id = "alpha"
        weight = 0.8
        [providers.rate_limit]
        max_requests_per_window = 30
        window_secs = 60
        [providers.source]
        url_template = "https://alpha.example/{asset}"
        price_pointer = "/price"

        [[providers]]
        provider_id = "beta"
        [providers.source]
        url_template = "https://beta.example/v1/{asset}"
        price_pointer = "/data/amount"
        timestamp_pointer = "/data/ts"
        timestamp_format = "unix_millis"

        [[depeg_watch]]
        asset = "DAI"
        trigger_price = 0.98
        confirmation_secs = 300
    "#;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.schedule.poll_interval_secs, 30);
        assert_eq!(config.telemetry.log_level, "info");
        // No providers.
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_sample() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.consensus.outlier_threshold, 0.01);
        assert_eq!(config.consensus.staleness_threshold_secs, 300);
        assert_eq!(config.providers.len(), 2);
        let alpha = &config.providers[0].config;
        assert_eq!(alpha.provider_id.as_str(), "alpha");
        assert_eq!(alpha.weight, 0.8);
        assert_eq!(alpha.rate_limit.max_requests_per_window, 30);
        assert_eq!(alpha.circuit_breaker, Default::default());
        assert_eq!(config.providers[1].config.weight, 1.0);
        assert_eq!(
            config.providers[1].source.timestamp_format,
            oracle_providers::TimestampFormat::UnixMillis
        );

        let assets: Vec<_> = config.polled_assets().iter().map(|a| a.to_string()).collect();
        assert_eq!(assets, vec!["USDC", "USDT", "DAI"]);
    }

    #[test]
    fn test_rejects_duplicate_provider() {
        let dup = SAMPLE.replace("provider_id = \"beta\"", "provider_id = \"alpha\"");
        let err = AppConfig::from_toml_str(&dup).unwrap_err();
        assert!(err.to_string().contains("duplicate"), "{err}");
    }

    #[test]
    fn test_rejects_bad_weight() {
        let bad = SAMPLE.replace("weight = 0.8", "weight = 1.8");
        assert!(matches!(
            AppConfig::from_toml_str(&bad),
            Err(AppError::Registry(RegistryError::InvalidWeight { .. }))
        ));
    }

    #[test]
    fn test_rejects_zero_min_sources() {
        let bad = SAMPLE.replace("min_sources = 2", "min_sources = 0");
        assert!(matches!(
            AppConfig::from_toml_str(&bad),
            Err(AppError::Consensus(_))
        ));
    }

    #[test]
    fn test_rejects_zero_rate_limit() {
        let bad = SAMPLE.replace("max_requests_per_window = 30", "max_requests_per_window = 0");
        assert!(matches!(
            AppConfig::from_toml_str(&bad),
            Err(AppError::Registry(RegistryError::Resilience(_)))
        ));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        let toml_str = toml::to_string(&config).unwrap();
        let back = AppConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(back.providers[0].config, config.providers[0].config);
        assert_eq!(back.providers[1].config, config.providers[1].config);
        assert_eq!(back.depeg_watch, config.depeg_watch);
    }
}
