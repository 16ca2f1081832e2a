//! Price sources for the oracle.
//!
//! - [`PriceProvider`]: the one capability every source implements
//! - [`ProviderRegistry`]: configured providers, weights and guard settings
//! - [`HttpJsonProvider`]: data-driven adapter for JSON REST endpoints

pub mod config;
pub mod error;
pub mod http;
pub mod provider;
pub mod registry;

pub use config::ProviderConfig;
pub use error::{FetchError, RegistryError, RegistryResult};
pub use http::{HttpJsonProvider, HttpSourceConfig, TimestampFormat};
pub use provider::PriceProvider;
pub use registry::{ProviderRegistry, RegisteredProvider};
