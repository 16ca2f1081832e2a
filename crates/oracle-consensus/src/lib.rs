//! Quorum consensus for the price oracle.
//!
//! [`ConsensusAggregator`] turns readings from many unreliable providers into
//! one price per asset, or into a typed [`NoConsensus`] when the providers do
//! not agree well enough. Accepted prices feed [`PriceHistory`], which
//! answers TWAP and sustained-depeg queries.

pub mod aggregator;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod history;
pub mod stats;

pub use aggregator::ConsensusAggregator;
pub use config::ConsensusConfig;
pub use diagnostics::{AggregatorDiagnostics, AssetDiagnostics, CounterSnapshot, ProviderDiagnostics};
pub use error::{AggregatorResult, ConsensusError, NoConsensus};
pub use history::{PriceHistory, PricePoint};
