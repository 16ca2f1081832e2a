//! Aggregator counters and diagnostics snapshot.

use chrono::{DateTime, Utc};
use oracle_core::Asset;
use oracle_resilience::GuardSnapshot;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals since startup.
#[derive(Debug, Default)]
pub(crate) struct RoundCounters {
    pub rounds_accepted: AtomicU64,
    pub rounds_no_result: AtomicU64,
    pub jumps_held: AtomicU64,
    pub jumps_corroborated: AtomicU64,
    pub readings_accepted: AtomicU64,
    pub readings_stale: AtomicU64,
    pub readings_invalid: AtomicU64,
    pub readings_outlier: AtomicU64,
    pub fetch_failures: AtomicU64,
}

impl RoundCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            rounds_accepted: get(&self.rounds_accepted),
            rounds_no_result: get(&self.rounds_no_result),
            jumps_held: get(&self.jumps_held),
            jumps_corroborated: get(&self.jumps_corroborated),
            readings_accepted: get(&self.readings_accepted),
            readings_stale: get(&self.readings_stale),
            readings_invalid: get(&self.readings_invalid),
            readings_outlier: get(&self.readings_outlier),
            fetch_failures: get(&self.fetch_failures),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub rounds_accepted: u64,
    pub rounds_no_result: u64,
    /// Rounds held back by the price-jump check.
    pub jumps_held: u64,
    /// Jumps accepted after a second round confirmed them.
    pub jumps_corroborated: u64,
    pub readings_accepted: u64,
    pub readings_stale: u64,
    pub readings_invalid: u64,
    pub readings_outlier: u64,
    pub fetch_failures: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderDiagnostics {
    pub weight: f64,
    #[serde(flatten)]
    pub guard: GuardSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetDiagnostics {
    pub asset: Asset,
    pub last_price: Option<f64>,
    pub last_computed_at: Option<DateTime<Utc>>,
    /// Jump candidate waiting for corroboration.
    pub pending_jump: Option<f64>,
    pub history_samples: usize,
}

/// Point-in-time view of the aggregator for operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatorDiagnostics {
    pub generated_at: DateTime<Utc>,
    pub providers: Vec<ProviderDiagnostics>,
    pub assets: Vec<AssetDiagnostics>,
    pub counters: CounterSnapshot,
}

impl AggregatorDiagnostics {
    pub fn open_circuits(&self) -> usize {
        self.providers
            .iter()
            .filter(|p| p.guard.circuit.state == oracle_resilience::CircuitState::Open)
            .count()
    }
}
