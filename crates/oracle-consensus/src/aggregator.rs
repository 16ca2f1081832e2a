//! Quorum consensus aggregator.
//!
//! One round for one asset:
//!
//! 1. Query every registered provider concurrently through the call executor.
//!    Failed calls are logged and counted, never propagated. With a deadline,
//!    providers still outstanding when it passes are left out of the round.
//! 2. Drop invalid readings (bad price or confidence, wrong asset or provider,
//!    stamped too far in the future) and readings older than the staleness
//!    threshold.
//! 3. Require `min_sources` usable readings.
//! 4. Reject readings deviating more than `outlier_threshold` from the median,
//!    and require `min_sources` agreeing readings.
//! 5. Compute median, weighted (weight × confidence) price and dispersion.
//! 6. Hold back the round if the weighted price moved more than
//!    `circuit_breaker_threshold` from the previous price, unless a round
//!    within `jump_confirmation_secs` confirms the move.
//! 7. Record the accepted price in history.
//!
//! A round either yields a [`ConsensusResult`] or a [`NoConsensus`] reason.
//! It never falls back to a partial or last-known price.

use crate::config::ConsensusConfig;
use crate::diagnostics::{
    AggregatorDiagnostics, AssetDiagnostics, ProviderDiagnostics, RoundCounters,
};
use crate::error::{AggregatorResult, NoConsensus};
use crate::history::PriceHistory;
use crate::stats::{median, relative_deviation, std_deviation, weighted_mean};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use oracle_core::{Asset, Clock, ConsensusResult, PriceReading, SystemClock};
use oracle_providers::{FetchError, ProviderRegistry, RegisteredProvider};
use oracle_resilience::{CallExecutor, ExecuteError, RetryPolicy};
use oracle_telemetry::Metrics;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Source count at which the source-count part of the confidence score saturates.
const FULL_CONFIDENCE_SOURCES: f64 = 3.0;

/// Upper bound for window arguments, to keep chrono durations in range.
const MAX_WINDOW_SECS: u64 = 100 * 365 * 24 * 3600;

/// Held-back jump and the time it was first seen.
#[derive(Debug, Clone, Copy)]
struct PendingJump {
    price: f64,
    seen_at: DateTime<Utc>,
}

/// A reading that passed validation and staleness filtering.
struct Candidate {
    reading: PriceReading,
    weight: f64,
}

pub struct ConsensusAggregator {
    providers: ProviderRegistry,
    executor: CallExecutor,
    config: ConsensusConfig,
    clock: Arc<dyn Clock>,
    history: PriceHistory,
    /// Last accepted result per asset.
    latest: DashMap<Asset, ConsensusResult>,
    /// Jump candidates awaiting a confirming round.
    pending_jumps: DashMap<Asset, PendingJump>,
    counters: RoundCounters,
}

impl ConsensusAggregator {
    pub fn new(
        providers: ProviderRegistry,
        retry: RetryPolicy,
        config: ConsensusConfig,
    ) -> AggregatorResult<Self> {
        Self::with_clock(providers, retry, config, Arc::new(SystemClock))
    }

    /// Build with an explicit wall clock.
    pub fn with_clock(
        providers: ProviderRegistry,
        retry: RetryPolicy,
        config: ConsensusConfig,
        clock: Arc<dyn Clock>,
    ) -> AggregatorResult<Self> {
        config.validate()?;
        retry.validate()?;
        let guards = providers.build_guards()?;

        if providers.len() < config.min_sources {
            warn!(
                providers = providers.len(),
                min_sources = config.min_sources,
                "Fewer providers than min_sources, no round can reach consensus"
            );
        }

        info!(
            providers = providers.len(),
            min_sources = config.min_sources,
            outlier_threshold = config.outlier_threshold,
            circuit_breaker_threshold = config.circuit_breaker_threshold,
            "Consensus aggregator ready"
        );

        Ok(Self {
            executor: CallExecutor::new(Arc::new(guards), retry),
            history: PriceHistory::new(config.history_capacity),
            providers,
            config,
            clock,
            latest: DashMap::new(),
            pending_jumps: DashMap::new(),
            counters: RoundCounters::default(),
        })
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn history(&self) -> &PriceHistory {
        &self.history
    }

    /// Last accepted result for `asset`.
    pub fn latest(&self, asset: &Asset) -> Option<ConsensusResult> {
        self.latest.get(asset).map(|r| r.value().clone())
    }

    /// Run one consensus round for `asset`.
    ///
    /// `previous_price` is the reference for the price-jump check; when
    /// `None`, the last price this aggregator accepted for the asset is used.
    pub async fn get_consensus(
        &self,
        asset: &Asset,
        previous_price: Option<f64>,
    ) -> Result<ConsensusResult, NoConsensus> {
        self.round(asset, previous_price, None).await
    }

    /// Like [`get_consensus`](Self::get_consensus), but providers that have
    /// not answered within `deadline` are dropped and the round is built from
    /// the readings already in.
    pub async fn get_consensus_within(
        &self,
        asset: &Asset,
        previous_price: Option<f64>,
        deadline: std::time::Duration,
    ) -> Result<ConsensusResult, NoConsensus> {
        self.round(asset, previous_price, Some(Instant::now() + deadline))
            .await
    }

    /// Run rounds for several assets concurrently. Assets without consensus
    /// are left out of the map.
    pub async fn get_consensus_batch(&self, assets: &[Asset]) -> HashMap<Asset, ConsensusResult> {
        self.batch(assets, None).await
    }

    /// Batch round where every provider call shares one `deadline`.
    pub async fn get_consensus_batch_within(
        &self,
        assets: &[Asset],
        deadline: std::time::Duration,
    ) -> HashMap<Asset, ConsensusResult> {
        self.batch(assets, Some(Instant::now() + deadline)).await
    }

    async fn batch(
        &self,
        assets: &[Asset],
        deadline: Option<Instant>,
    ) -> HashMap<Asset, ConsensusResult> {
        let rounds = assets
            .iter()
            .map(|asset| async move { (asset, self.round(asset, None, deadline).await) });

        join_all(rounds)
            .await
            .into_iter()
            .filter_map(|(asset, outcome)| outcome.ok().map(|r| (asset.clone(), r)))
            .collect()
    }

    async fn round(
        &self,
        asset: &Asset,
        previous_price: Option<f64>,
        deadline: Option<Instant>,
    ) -> Result<ConsensusResult, NoConsensus> {
        let fetches = self.providers.iter().map(|p| async move {
            let outcome = match deadline {
                Some(at) => tokio::time::timeout_at(at, self.fetch(p, asset)).await.ok(),
                None => Some(self.fetch(p, asset).await),
            };
            (p, outcome)
        });
        let outcomes = join_all(fetches).await;

        let now = self.clock.now();
        let candidates: Vec<Candidate> = outcomes
            .into_iter()
            .filter_map(|(p, outcome)| self.screen(p, asset, outcome, now))
            .collect();

        let need = self.config.min_sources;
        if candidates.len() < need {
            return Err(self.no_consensus(
                asset,
                NoConsensus::InsufficientSources {
                    have: candidates.len(),
                    need,
                },
            ));
        }

        let prices: Vec<f64> = candidates.iter().map(|c| c.reading.price).collect();
        let Some(reference) = median(&prices) else {
            return Err(self.no_consensus(
                asset,
                NoConsensus::InsufficientSources { have: 0, need },
            ));
        };

        let (normal, outliers): (Vec<Candidate>, Vec<Candidate>) = candidates
            .into_iter()
            .partition(|c| relative_deviation(c.reading.price, reference) <= self.config.outlier_threshold);

        for c in &outliers {
            warn!(
                provider = %c.reading.provider_id,
                %asset,
                price = c.reading.price,
                median = reference,
                "Outlier reading rejected"
            );
            Metrics::reading(c.reading.provider_id.as_str(), "outlier");
        }
        RoundCounters::add(&self.counters.readings_outlier, outliers.len());

        if normal.len() < need {
            return Err(self.no_consensus(
                asset,
                NoConsensus::OutliersExceedTolerance {
                    normal: normal.len(),
                    need,
                },
            ));
        }

        let normal_prices: Vec<f64> = normal.iter().map(|c| c.reading.price).collect();
        let median_price = median(&normal_prices).unwrap_or(reference);
        let std_dev = std_deviation(&normal_prices).unwrap_or(0.0);
        let weighted_price = weighted_mean(
            &normal
                .iter()
                .map(|c| (c.reading.price, c.weight * c.reading.confidence))
                .collect::<Vec<_>>(),
        )
        .unwrap_or(median_price);

        self.check_price_jump(asset, previous_price, weighted_price, now)?;

        let result = self.build_result(
            asset,
            normal,
            outliers,
            median_price,
            weighted_price,
            std_dev,
            now,
        );
        self.accept(&result);
        Ok(result)
    }

    /// True when the accepted price stayed strictly below `trigger_price` for
    /// the last `confirmation_secs` seconds.
    pub fn check_sustained_depeg(
        &self,
        asset: &Asset,
        trigger_price: f64,
        confirmation_secs: u64,
    ) -> bool {
        let sustained = self.history.sustained_below(
            asset,
            trigger_price,
            window(confirmation_secs),
            self.clock.now(),
        );
        if sustained {
            warn!(%asset, trigger_price, confirmation_secs, "Sustained depeg confirmed");
        }
        sustained
    }

    /// Time-weighted average of accepted prices over the last `window_secs`.
    pub fn twap(&self, asset: &Asset, window_secs: u64) -> Option<f64> {
        self.history
            .twap(asset, window(window_secs), self.clock.now())
    }

    pub fn diagnostics(&self) -> AggregatorDiagnostics {
        let providers = self
            .executor
            .guards()
            .snapshots()
            .into_iter()
            .map(|guard| ProviderDiagnostics {
                weight: self
                    .providers
                    .get(&guard.provider)
                    .map_or(0.0, RegisteredProvider::weight),
                guard,
            })
            .collect();

        let mut tracked: Vec<Asset> = self.history.assets();
        for entry in self.pending_jumps.iter() {
            if !tracked.contains(entry.key()) {
                tracked.push(entry.key().clone());
            }
        }
        tracked.sort();

        let assets = tracked
            .into_iter()
            .map(|asset| {
                let latest = self.latest.get(&asset);
                AssetDiagnostics {
                    last_price: latest.as_ref().map(|r| r.weighted_price),
                    last_computed_at: latest.as_ref().map(|r| r.computed_at),
                    pending_jump: self.pending_jumps.get(&asset).map(|p| p.price),
                    history_samples: self.history.len(&asset),
                    asset,
                }
            })
            .collect();

        AggregatorDiagnostics {
            generated_at: self.clock.now(),
            providers,
            assets,
            counters: self.counters.snapshot(),
        }
    }

    async fn fetch(
        &self,
        p: &RegisteredProvider,
        asset: &Asset,
    ) -> Result<PriceReading, ExecuteError<FetchError>> {
        self.executor
            .execute(p.id(), || p.provider.fetch_price(asset))
            .await
    }

    /// Validate one fetch outcome. Returns the reading when it may take part
    /// in the round. `None` means the provider missed the round deadline.
    fn screen(
        &self,
        p: &RegisteredProvider,
        asset: &Asset,
        outcome: Option<Result<PriceReading, ExecuteError<FetchError>>>,
        now: DateTime<Utc>,
    ) -> Option<Candidate> {
        let provider = p.id();
        let reading = match outcome {
            Some(Ok(reading)) => reading,
            None => {
                warn!(%provider, %asset, "Provider missed the round deadline");
                Metrics::fetch_failure(provider.as_str(), "deadline");
                RoundCounters::bump(&self.counters.fetch_failures);
                return None;
            }
            Some(Err(e)) => {
                let kind = match &e {
                    ExecuteError::Call { error, .. } => error.kind(),
                    other => other.kind(),
                };
                warn!(%provider, %asset, kind, attempts = e.attempts(), error = %e, "Provider fetch failed");
                Metrics::fetch_failure(provider.as_str(), kind);
                RoundCounters::bump(&self.counters.fetch_failures);
                return None;
            }
        };

        let invalid = |reason: String| {
            warn!(%provider, %asset, reason = %reason, "Invalid reading discarded");
            Metrics::reading(provider.as_str(), "invalid");
            RoundCounters::bump(&self.counters.readings_invalid);
            None
        };

        if let Err(e) = reading.validate() {
            return invalid(e.to_string());
        }
        if &reading.asset != asset {
            return invalid(format!("asset mismatch: got {}", reading.asset));
        }
        if &reading.provider_id != provider {
            return invalid(format!("provider mismatch: got {}", reading.provider_id));
        }

        let age = reading.age(now);
        if age < -window(self.config.max_clock_skew_secs) {
            return invalid(format!("timestamp {}s in the future", -age.num_seconds()));
        }
        if age > window(self.config.staleness_threshold_secs) {
            debug!(%provider, %asset, age_secs = age.num_seconds(), "Stale reading discarded");
            Metrics::reading(provider.as_str(), "stale");
            RoundCounters::bump(&self.counters.readings_stale);
            return None;
        }

        Some(Candidate {
            reading,
            weight: p.weight(),
        })
    }

    /// Price-jump guard with corroboration.
    ///
    /// A move beyond the threshold is held back and remembered. A later round
    /// within `jump_confirmation_secs` whose weighted price lands within
    /// `outlier_threshold` of the remembered candidate goes through as
    /// corroborated. An expired candidate is replaced by the new one.
    fn check_price_jump(
        &self,
        asset: &Asset,
        previous_price: Option<f64>,
        weighted_price: f64,
        now: DateTime<Utc>,
    ) -> Result<(), NoConsensus> {
        let previous = previous_price
            .or_else(|| self.latest.get(asset).map(|r| r.weighted_price))
            .filter(|p| p.is_finite() && *p > 0.0);
        let Some(previous) = previous else {
            return Ok(());
        };

        let change = relative_deviation(weighted_price, previous);
        if change <= self.config.circuit_breaker_threshold {
            return Ok(());
        }

        let confirmation = window(self.config.jump_confirmation_secs);
        let corroborated = self.pending_jumps.get(asset).is_some_and(|pending| {
            now - pending.seen_at <= confirmation
                && relative_deviation(weighted_price, pending.price) <= self.config.outlier_threshold
        });
        if corroborated {
            info!(%asset, previous, price = weighted_price, change, "Price jump corroborated by second round");
            RoundCounters::bump(&self.counters.jumps_corroborated);
            return Ok(());
        }

        self.pending_jumps.insert(
            asset.clone(),
            PendingJump {
                price: weighted_price,
                seen_at: now,
            },
        );
        RoundCounters::bump(&self.counters.jumps_held);
        Err(self.no_consensus(
            asset,
            NoConsensus::PriceJump {
                previous,
                candidate: weighted_price,
                change,
            },
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_result(
        &self,
        asset: &Asset,
        normal: Vec<Candidate>,
        outliers: Vec<Candidate>,
        median_price: f64,
        weighted_price: f64,
        std_dev: f64,
        now: DateTime<Utc>,
    ) -> ConsensusResult {
        let n = normal.len() as f64;
        let source_score = (n / FULL_CONFIDENCE_SOURCES).min(1.0);
        let dispersion_score = 1.0 - (std_dev / median_price).min(1.0);
        let reading_score = normal.iter().map(|c| c.reading.confidence).sum::<f64>() / n;
        let confidence = (source_score + dispersion_score + reading_score) / 3.0;

        let oldest = normal.iter().map(|c| c.reading.observed_at).min();
        let is_stale =
            oldest.is_some_and(|t| now - t > window(self.config.freshness_warning_secs));

        let accepted_readings: Vec<PriceReading> = normal.into_iter().map(|c| c.reading).collect();
        let rejected_outliers: Vec<PriceReading> =
            outliers.into_iter().map(|c| c.reading).collect();

        ConsensusResult {
            asset: asset.clone(),
            median_price,
            weighted_price,
            std_deviation: std_dev,
            source_count: accepted_readings.len(),
            has_anomaly: !rejected_outliers.is_empty(),
            accepted_readings,
            rejected_outliers,
            confidence,
            computed_at: now,
            is_stale,
        }
    }

    fn accept(&self, result: &ConsensusResult) {
        let asset = &result.asset;
        self.pending_jumps.remove(asset);
        self.history
            .record(asset, result.weighted_price, result.computed_at);
        self.latest.insert(asset.clone(), result.clone());

        for reading in &result.accepted_readings {
            Metrics::reading(reading.provider_id.as_str(), "accepted");
        }
        RoundCounters::add(&self.counters.readings_accepted, result.source_count);
        RoundCounters::bump(&self.counters.rounds_accepted);
        Metrics::consensus_round(asset.as_str(), "accepted");
        Metrics::consensus_accepted(
            asset.as_str(),
            result.weighted_price,
            result.confidence,
            result.source_count,
        );

        if result.is_stale {
            warn!(%asset, "Consensus built from readings past the freshness window");
        }
        debug!(
            %asset,
            price = result.weighted_price,
            median = result.median_price,
            sources = result.source_count,
            outliers = result.rejected_outliers.len(),
            confidence = result.confidence,
            "Consensus accepted"
        );
    }

    fn no_consensus(&self, asset: &Asset, reason: NoConsensus) -> NoConsensus {
        warn!(%asset, outcome = reason.outcome(), %reason, "No consensus");
        RoundCounters::bump(&self.counters.rounds_no_result);
        Metrics::consensus_round(asset.as_str(), reason.outcome());
        reason
    }
}

fn window(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_WINDOW_SECS) as i64)
}
