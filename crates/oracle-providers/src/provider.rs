//! Price source capability.

use crate::error::FetchError;
use async_trait::async_trait;
use oracle_core::{Asset, PriceReading};

/// A source of price readings.
///
/// Implementations do one network round trip per call and report failures as
/// typed [`FetchError`]s. Rate limiting, circuit breaking and retries are
/// applied around the call by the executor, so adapters should not retry
/// internally.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    async fn fetch_price(&self, asset: &Asset) -> Result<PriceReading, FetchError>;
}
