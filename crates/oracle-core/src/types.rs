//! Price observation and consensus output types.

use crate::error::{CoreError, Result};
use crate::ids::{Asset, ProviderId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One observation of one asset from one provider.
///
/// Adapters should build readings through [`PriceReading::new`], which
/// validates the price and confidence. The aggregator re-runs
/// [`PriceReading::validate`] on everything it receives anyway, since an
/// adapter can also fill the public fields directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceReading {
    /// Provider that produced the reading.
    pub provider_id: ProviderId,
    /// Asset the price is for.
    pub asset: Asset,
    /// Price in quote currency. Finite and strictly positive.
    pub price: f64,
    /// When the provider observed the price (source timestamp, not receipt time).
    pub observed_at: DateTime<Utc>,
    /// Provider-reported confidence in [0, 1].
    pub confidence: f64,
    /// Optional opaque attestation (signature, merkle proof, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
}

impl PriceReading {
    /// Create a validated reading.
    pub fn new(
        provider_id: ProviderId,
        asset: Asset,
        price: f64,
        observed_at: DateTime<Utc>,
        confidence: f64,
    ) -> Result<Self> {
        let reading = Self {
            provider_id,
            asset,
            price,
            observed_at,
            confidence,
            proof: None,
        };
        reading.validate()?;
        Ok(reading)
    }

    /// Attach a cryptographic proof to the reading.
    #[must_use]
    pub fn with_proof(mut self, proof: impl Into<String>) -> Self {
        self.proof = Some(proof.into());
        self
    }

    /// Check price and confidence bounds.
    pub fn validate(&self) -> Result<()> {
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(CoreError::InvalidPrice(format!(
                "{} reported {} for {}",
                self.provider_id, self.price, self.asset
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(CoreError::InvalidConfidence(format!(
                "{} reported confidence {} for {}",
                self.provider_id, self.confidence, self.asset
            )));
        }
        Ok(())
    }

    /// Age of the reading relative to `now`. Negative if stamped in the future.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.observed_at
    }
}

/// Output of one consensus round for one asset.
///
/// Only ever produced when at least `min_sources` readings agreed; a round
/// that cannot reach agreement produces no result at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub asset: Asset,
    /// Median of the accepted readings.
    pub median_price: f64,
    /// Mean weighted by provider weight × reading confidence.
    pub weighted_price: f64,
    /// Population standard deviation of the accepted prices.
    pub std_deviation: f64,
    pub accepted_readings: Vec<PriceReading>,
    /// Readings excluded for deviating too far from the median.
    pub rejected_outliers: Vec<PriceReading>,
    /// Number of accepted readings.
    pub source_count: usize,
    /// Advisory score in [0, 1].
    pub confidence: f64,
    pub computed_at: DateTime<Utc>,
    /// Set when the oldest accepted reading is older than the freshness warning age.
    pub is_stale: bool,
    /// Set when at least one reading was rejected as an outlier.
    pub has_anomaly: bool,
}

impl ConsensusResult {
    /// Providers whose readings made it into the price.
    pub fn accepted_providers(&self) -> Vec<&ProviderId> {
        self.accepted_readings
            .iter()
            .map(|r| &r.provider_id)
            .collect()
    }

    /// Relative spread between the highest and lowest accepted price.
    pub fn spread(&self) -> f64 {
        let (min, max) = self
            .accepted_readings
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| {
                (lo.min(r.price), hi.max(r.price))
            });
        if self.accepted_readings.is_empty() || min <= 0.0 {
            return 0.0;
        }
        (max - min) / min
    }
}
