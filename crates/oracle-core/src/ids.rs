//! Identifier newtypes for assets and price sources.
//!
//! Both are thin wrappers over `String` so they can be used as map keys,
//! metric labels and TOML values without conversion noise.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Asset symbol (e.g., "USDC", "BTC").
///
/// Symbols are trimmed and upper-cased on construction so `usdc` and `USDC`
/// address the same history and the same metrics series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Asset(String);

impl Asset {
    /// Parse an asset symbol, rejecting empty or whitespace-only input.
    pub fn parse(symbol: &str) -> Result<Self> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(CoreError::InvalidAsset("empty symbol".to_string()));
        }
        if symbol.chars().any(char::is_whitespace) {
            return Err(CoreError::InvalidAsset(format!(
                "symbol contains whitespace: {symbol:?}"
            )));
        }
        Ok(Self(symbol.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Asset {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Asset> for String {
    fn from(asset: Asset) -> Self {
        asset.0
    }
}

/// Price source identifier (e.g., "coinbase", "pyth").
///
/// Case is preserved; ids are compared exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderId(String);

impl ProviderId {
    pub fn parse(id: &str) -> Result<Self> {
        let id = id.trim();
        if id.is_empty() {
            return Err(CoreError::InvalidProviderId("empty id".to_string()));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ProviderId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ProviderId> for String {
    fn from(id: ProviderId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_normalized() {
        let asset = Asset::parse("  usdc ").unwrap();
        assert_eq!(asset.as_str(), "USDC");
        assert_eq!(asset, Asset::parse("USDC").unwrap());
    }

    #[test]
    fn test_asset_rejects_empty() {
        assert!(Asset::parse("   ").is_err());
        assert!(Asset::parse("US DC").is_err());
    }

    #[test]
    fn test_provider_id_preserves_case() {
        let id = ProviderId::parse("CoinGecko").unwrap();
        assert_eq!(id.to_string(), "CoinGecko");
        assert!(ProviderId::parse("").is_err());
    }

    #[test]
    fn test_serde_roundtrip_through_string() {
        let asset: Asset = serde_json::from_str("\"usdt\"").unwrap();
        assert_eq!(asset.as_str(), "USDT");
        assert_eq!(serde_json::to_string(&asset).unwrap(), "\"USDT\"");

        let bad: std::result::Result<Asset, _> = serde_json::from_str("\"\"");
        assert!(bad.is_err());
    }
}
