//! Core domain types for the quorum price oracle.
//!
//! This crate provides the types shared by every other crate:
//! - `Asset`, `ProviderId`: identifiers for priced assets and price sources
//! - `PriceReading`: one observation from one provider
//! - `ConsensusResult`: the output of one aggregation round
//! - `Clock`: wall-clock abstraction so staleness and history can be tested

pub mod clock;
pub mod error;
pub mod ids;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, Result};
pub use ids::{Asset, ProviderId};
pub use types::{ConsensusResult, PriceReading};
