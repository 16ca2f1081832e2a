//! Main application orchestration.
//!
//! Builds the provider registry and aggregator from config, then polls the
//! configured assets on a fixed interval. After each round the depeg watches
//! are evaluated against the accepted price history.

use crate::config::{AppConfig, DepegWatch};
use crate::error::{AppError, AppResult};
use crate::server::{run_server, AppState};
use oracle_consensus::ConsensusAggregator;
use oracle_core::{Asset, Clock, ConsensusResult, SystemClock};
use oracle_providers::{HttpJsonProvider, ProviderRegistry};
use oracle_telemetry::Metrics;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Outcome of one scheduled round.
#[derive(Debug, Clone, Default)]
pub struct RoundReport {
    pub results: HashMap<Asset, ConsensusResult>,
    /// Assets that produced no consensus this round.
    pub missing: Vec<Asset>,
    /// Watched assets whose depeg is currently sustained.
    pub depegged: Vec<Asset>,
}

/// Main application.
pub struct Application {
    config: AppConfig,
    aggregator: Arc<ConsensusAggregator>,
    assets: Vec<Asset>,
    shutdown: CancellationToken,
}

impl Application {
    /// Build HTTP providers from config and wire the aggregator.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let mut registry = ProviderRegistry::new();
        for entry in &config.providers {
            let provider =
                HttpJsonProvider::new(entry.config.provider_id.clone(), entry.source.clone())?;
            registry.register(entry.config.clone(), Arc::new(provider))?;
        }
        Self::from_registry(config, registry, Arc::new(SystemClock))
    }

    /// Build around an already populated registry.
    pub fn from_registry(
        config: AppConfig,
        registry: ProviderRegistry,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        let aggregator = ConsensusAggregator::with_clock(
            registry,
            config.retry.clone(),
            config.consensus.clone(),
            clock,
        )?;

        let assets = config.polled_assets();
        if assets.is_empty() {
            warn!("No assets configured, rounds will be empty");
        }

        Ok(Self {
            config,
            aggregator: Arc::new(aggregator),
            assets,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn aggregator(&self) -> &Arc<ConsensusAggregator> {
        &self.aggregator
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    /// Token that stops `run` and the operator server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// One batch round plus depeg watches. Providers that have not answered
    /// within `round_timeout_secs` are left out of the round.
    pub async fn poll_round(&self) -> RoundReport {
        let deadline = Duration::from_secs(self.config.schedule.round_timeout_secs);
        let mut report = RoundReport {
            results: self
                .aggregator
                .get_consensus_batch_within(&self.assets, deadline)
                .await,
            ..Default::default()
        };

        report.missing = self
            .assets
            .iter()
            .filter(|a| !report.results.contains_key(*a))
            .cloned()
            .collect();

        for watch in &self.config.depeg_watch {
            if self.check_watch(watch) {
                report.depegged.push(watch.asset.clone());
            }
        }

        info!(
            accepted = report.results.len(),
            missing = report.missing.len(),
            depegged = report.depegged.len(),
            "Round complete"
        );
        report
    }

    fn check_watch(&self, watch: &DepegWatch) -> bool {
        let sustained = self.aggregator.check_sustained_depeg(
            &watch.asset,
            watch.trigger_price,
            watch.confirmation_secs,
        );
        Metrics::depeg_sustained(watch.asset.as_str(), sustained);
        sustained
    }

    /// Poll until shutdown. Spawns the operator server when enabled.
    pub async fn run(self) -> AppResult<()> {
        let server_handle = if self.config.server.enabled {
            let addr: SocketAddr = self.config.server.addr().parse().map_err(|e| {
                AppError::Config(format!("invalid server address {}: {e}", self.config.server.addr()))
            })?;
            let state = AppState::new(Arc::clone(&self.aggregator));
            let token = self.shutdown.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = run_server(state, addr, token).await {
                    error!(error = %e, "Operator server failed");
                }
            }))
        } else {
            None
        };

        info!(
            assets = ?self.assets.iter().map(Asset::as_str).collect::<Vec<_>>(),
            poll_interval_secs = self.config.schedule.poll_interval_secs,
            "Entering polling loop"
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.schedule.poll_interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut rounds = 0u64;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.poll_round().await;
                    rounds += 1;
                }
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    self.shutdown.cancel();
                    break;
                }
            }
        }

        self.shutdown.cancel();
        if let Some(handle) = server_handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Operator server task ended abnormally");
            }
        }

        info!(rounds, "Shut down");
        Ok(())
    }
}
