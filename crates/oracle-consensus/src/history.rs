//! Per-asset price history, TWAP and sustained-below checks.
//!
//! Each asset keeps a bounded, time-ordered ring of accepted prices. A sample
//! is treated as the price in force from its timestamp until the next sample
//! (or until `now` for the newest one).

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use oracle_core::Asset;
use serde::Serialize;
use std::collections::VecDeque;

/// One accepted price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PricePoint {
    pub price: f64,
    pub at: DateTime<Utc>,
}

/// Bounded history for every asset.
#[derive(Debug)]
pub struct PriceHistory {
    capacity: usize,
    series: DashMap<Asset, VecDeque<PricePoint>>,
}

impl PriceHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: DashMap::new(),
        }
    }

    /// Append a sample, dropping the oldest once full. Out-of-order samples
    /// are placed by timestamp.
    pub fn record(&self, asset: &Asset, price: f64, at: DateTime<Utc>) {
        let mut series = self.series.entry(asset.clone()).or_default();
        let point = PricePoint { price, at };

        if series.back().is_some_and(|last| last.at > at) {
            let idx = series.partition_point(|p| p.at <= at);
            series.insert(idx, point);
        } else {
            series.push_back(point);
        }

        while series.len() > self.capacity {
            series.pop_front();
        }
    }

    pub fn latest(&self, asset: &Asset) -> Option<PricePoint> {
        self.series.get(asset)?.back().copied()
    }

    pub fn len(&self, asset: &Asset) -> usize {
        self.series.get(asset).map_or(0, |s| s.len())
    }

    pub fn assets(&self) -> Vec<Asset> {
        let mut assets: Vec<_> = self.series.iter().map(|e| e.key().clone()).collect();
        assets.sort();
        assets
    }

    /// Time-weighted average over `[now - window, now]`.
    ///
    /// Only samples stamped inside the window count; each is held until the
    /// next one, the last until `now`. Returns `None` with no samples in the
    /// window, and the plain mean when the held durations sum to zero
    /// (e.g. a zero-length window).
    pub fn twap(&self, asset: &Asset, window: Duration, now: DateTime<Utc>) -> Option<f64> {
        let series = self.series.get(asset)?;
        let start = now - window;
        let samples: Vec<PricePoint> = series
            .iter()
            .filter(|p| p.at >= start && p.at <= now)
            .copied()
            .collect();

        if samples.is_empty() {
            return None;
        }

        let mut weighted = 0.0;
        let mut total_ms = 0i64;
        for (i, sample) in samples.iter().enumerate() {
            let until = samples.get(i + 1).map_or(now, |next| next.at);
            let held_ms = (until - sample.at).num_milliseconds().max(0);
            weighted += sample.price * held_ms as f64;
            total_ms += held_ms;
        }

        if total_ms == 0 {
            let sum: f64 = samples.iter().map(|p| p.price).sum();
            return Some(sum / samples.len() as f64);
        }
        Some(weighted / total_ms as f64)
    }

    /// True when the price stayed strictly below `trigger` for the whole of
    /// `[now - confirmation, now]`.
    ///
    /// The window must be covered: the sample in force at its start (the
    /// latest one at or before `now - confirmation`) has to exist, and it and
    /// every later sample up to `now` must be below the trigger.
    pub fn sustained_below(
        &self,
        asset: &Asset,
        trigger: f64,
        confirmation: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(series) = self.series.get(asset) else {
            return false;
        };
        let start = now - confirmation;

        let first_after = series.partition_point(|p| p.at <= start);
        if first_after == 0 {
            // Nothing at or before the window start.
            return false;
        }

        series
            .iter()
            .skip(first_after - 1)
            .take_while(|p| p.at <= now)
            .all(|p| p.price < trigger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    fn secs(s: i64) -> Duration {
        Duration::seconds(s)
    }

    fn usdc() -> Asset {
        Asset::parse("USDC").unwrap()
    }

    #[test]
    fn test_record_then_zero_window_twap() {
        let history = PriceHistory::new(16);
        history.record(&usdc(), 0.9991, t0());
        assert_eq!(history.twap(&usdc(), secs(0), t0()), Some(0.9991));
    }

    #[test]
    fn test_twap_weights_by_hold_time() {
        let history = PriceHistory::new(16);
        history.record(&usdc(), 1.0, t0());
        history.record(&usdc(), 2.0, t0() + secs(30));
        // 1.0 held 30s, 2.0 held 10s.
        let twap = history.twap(&usdc(), secs(60), t0() + secs(40)).unwrap();
        assert!((twap - 1.25).abs() < 1e-12, "{twap}");
    }

    #[test]
    fn test_twap_ignores_samples_before_window() {
        let history = PriceHistory::new(16);
        history.record(&usdc(), 5.0, t0());
        history.record(&usdc(), 1.0, t0() + secs(100));
        let twap = history.twap(&usdc(), secs(10), t0() + secs(105)).unwrap();
        assert_eq!(twap, 1.0);
        assert_eq!(history.twap(&usdc(), secs(1), t0() + secs(200)), None);
        assert_eq!(history.twap(&Asset::parse("DAI").unwrap(), secs(60), t0()), None);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let history = PriceHistory::new(3);
        for i in 0..5 {
            history.record(&usdc(), 1.0 + i as f64, t0() + secs(i));
        }
        assert_eq!(history.len(&usdc()), 3);
        assert_eq!(history.latest(&usdc()).unwrap().price, 5.0);
    }

    #[test]
    fn test_out_of_order_record() {
        let history = PriceHistory::new(8);
        history.record(&usdc(), 1.0, t0() + secs(10));
        history.record(&usdc(), 2.0, t0());
        assert_eq!(history.latest(&usdc()).unwrap().price, 1.0);
    }

    #[test]
    fn test_sustained_below_true_when_window_covered() {
        let history = PriceHistory::new(64);
        for i in 0..=6 {
            history.record(&usdc(), 0.97, t0() + secs(i * 10));
        }
        assert!(history.sustained_below(&usdc(), 0.98, secs(60), t0() + secs(60)));
    }

    #[test]
    fn test_sustained_below_false_if_any_sample_at_or_above() {
        let history = PriceHistory::new(64);
        for i in 0..=6 {
            let price = if i == 3 { 0.98 } else { 0.97 };
            history.record(&usdc(), price, t0() + secs(i * 10));
        }
        assert!(!history.sustained_below(&usdc(), 0.98, secs(60), t0() + secs(60)));
    }

    #[test]
    fn test_sustained_below_checks_sample_in_force_at_start() {
        let history = PriceHistory::new(64);
        // Above trigger until t+15, which is inside the window [t+10, t+70].
        history.record(&usdc(), 1.0, t0());
        history.record(&usdc(), 0.95, t0() + secs(15));
        assert!(!history.sustained_below(&usdc(), 0.98, secs(60), t0() + secs(70)));
        // By t+80 the window starts after the drop.
        assert!(history.sustained_below(&usdc(), 0.98, secs(60), t0() + secs(80)));
    }

    #[test]
    fn test_sustained_below_false_without_coverage() {
        let history = PriceHistory::new(64);
        history.record(&usdc(), 0.90, t0() + secs(30));
        assert!(!history.sustained_below(&usdc(), 0.98, secs(60), t0() + secs(60)));
        assert!(!history.sustained_below(&Asset::parse("DAI").unwrap(), 0.98, secs(60), t0()));
    }
}
