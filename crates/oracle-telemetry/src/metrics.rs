//! Prometheus metrics for the price oracle.
//!
//! Covers:
//! - Consensus rounds and their outcome
//! - Published price, confidence and source count per asset
//! - Provider readings, fetch failures, latency and retries
//! - Circuit breaker state and rate limit tokens
//! - Sustained depeg watches
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means a duplicate metric name, which is a programming error and should
//! crash at startup. These panics only happen during static initialization.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, register_int_gauge_vec,
    CounterVec, Encoder, GaugeVec, HistogramVec, IntGaugeVec, TextEncoder,
};

/// Consensus rounds by outcome.
/// Labels: asset, outcome (accepted/insufficient_sources/outliers/price_jump)
pub static CONSENSUS_ROUNDS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "oracle_consensus_rounds_total",
        "Total consensus rounds by outcome",
        &["asset", "outcome"]
    )
    .unwrap()
});

/// Last accepted weighted price.
pub static CONSENSUS_PRICE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "oracle_consensus_price",
        "Last accepted consensus (weighted) price",
        &["asset"]
    )
    .unwrap()
});

/// Confidence score of the last accepted round.
pub static CONSENSUS_CONFIDENCE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "oracle_consensus_confidence",
        "Confidence score of the last accepted consensus round",
        &["asset"]
    )
    .unwrap()
});

/// Accepted sources in the last accepted round.
pub static CONSENSUS_SOURCES: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "oracle_consensus_sources",
        "Number of accepted sources in the last accepted round",
        &["asset"]
    )
    .unwrap()
});

/// Readings seen by the aggregator.
/// Labels: provider, status (accepted/stale/invalid/outlier)
pub static READINGS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "oracle_readings_total",
        "Provider readings by classification",
        &["provider", "status"]
    )
    .unwrap()
});

/// Provider calls that failed after the executor gave up.
/// Labels: provider, kind (circuit_open/timeout/call/...)
pub static PROVIDER_FETCH_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "oracle_provider_fetch_failures_total",
        "Provider fetch failures by kind",
        &["provider", "kind"]
    )
    .unwrap()
});

/// Per-attempt provider call latency.
pub static PROVIDER_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "oracle_provider_latency_ms",
        "Provider call latency per attempt in milliseconds",
        &["provider"],
        vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 15000.0]
    )
    .unwrap()
});

/// Retries scheduled by the executor.
pub static PROVIDER_RETRIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "oracle_provider_retries_total",
        "Total provider call retries",
        &["provider"]
    )
    .unwrap()
});

/// Circuit breaker state (0 = closed, 1 = half-open, 2 = open).
pub static CIRCUIT_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "oracle_circuit_state",
        "Circuit breaker state (0=closed, 1=half_open, 2=open)",
        &["provider"]
    )
    .unwrap()
});

/// Tokens left in the provider's bucket after the last acquire.
pub static RATE_LIMIT_TOKENS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "oracle_rate_limit_tokens",
        "Rate limit tokens available per provider",
        &["provider"]
    )
    .unwrap()
});

/// Sustained depeg state per watched asset (1 = below trigger for the whole window).
pub static DEPEG_SUSTAINED: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "oracle_depeg_sustained",
        "Sustained depeg condition (1=triggered)",
        &["asset"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record a consensus round outcome.
    pub fn consensus_round(asset: &str, outcome: &str) {
        CONSENSUS_ROUNDS_TOTAL
            .with_label_values(&[asset, outcome])
            .inc();
    }

    /// Publish an accepted consensus result.
    pub fn consensus_accepted(asset: &str, price: f64, confidence: f64, sources: usize) {
        CONSENSUS_PRICE.with_label_values(&[asset]).set(price);
        CONSENSUS_CONFIDENCE
            .with_label_values(&[asset])
            .set(confidence);
        CONSENSUS_SOURCES
            .with_label_values(&[asset])
            .set(sources as i64);
    }

    pub fn reading(provider: &str, status: &str) {
        READINGS_TOTAL.with_label_values(&[provider, status]).inc();
    }

    pub fn fetch_failure(provider: &str, kind: &str) {
        PROVIDER_FETCH_FAILURES_TOTAL
            .with_label_values(&[provider, kind])
            .inc();
    }

    pub fn provider_latency(provider: &str, latency_ms: f64) {
        PROVIDER_LATENCY_MS
            .with_label_values(&[provider])
            .observe(latency_ms);
    }

    pub fn provider_retry(provider: &str) {
        PROVIDER_RETRIES_TOTAL.with_label_values(&[provider]).inc();
    }

    /// Set circuit state gauge (0 closed, 1 half-open, 2 open).
    pub fn circuit_state(provider: &str, state: i64) {
        CIRCUIT_STATE.with_label_values(&[provider]).set(state);
    }

    pub fn rate_limit_tokens(provider: &str, tokens: f64) {
        RATE_LIMIT_TOKENS.with_label_values(&[provider]).set(tokens);
    }

    pub fn depeg_sustained(asset: &str, sustained: bool) {
        DEPEG_SUSTAINED
            .with_label_values(&[asset])
            .set(i64::from(sustained));
    }
}

/// Render every registered metric in Prometheus text format.
pub fn gather_text() -> TelemetryResult<String> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buf = Vec::new();
    encoder.encode(&families, &mut buf)?;
    Ok(String::from_utf8(buf)?)
}
