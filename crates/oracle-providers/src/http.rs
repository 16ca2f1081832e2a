//! Generic HTTP/JSON price adapter.
//!
//! Configured entirely from data: a URL template with an `{asset}`
//! placeholder, a JSON pointer to the price and optionally one to the source
//! timestamp. Covers most public REST tickers without per-exchange code.

use crate::error::{FetchError, RegistryError, RegistryResult};
use crate::provider::PriceProvider;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use oracle_core::{Asset, Clock, PriceReading, ProviderId, SystemClock};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// How the source encodes its timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampFormat {
    #[default]
    UnixSeconds,
    UnixMillis,
    Rfc3339,
}

/// HTTP source definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSourceConfig {
    /// e.g. `https://api.example.com/v1/ticker/{asset}-USD`
    pub url_template: String,
    /// JSON pointer to the price, e.g. `/data/price`. Numbers and numeric strings
    /// both work. `{asset}` is replaced with the source symbol.
    pub price_pointer: String,
    /// JSON pointer to the source timestamp. Receipt time is used when unset.
    #[serde(default)]
    pub timestamp_pointer: Option<String>,
    #[serde(default)]
    pub timestamp_format: TimestampFormat,
    /// Confidence attached to every reading from this source. Default: 1.0.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Source-specific symbols, keyed by asset (e.g. `USDC = "usd-coin"`).
    #[serde(default)]
    pub symbols: HashMap<String, String>,
    /// Extra request headers (API keys and the like).
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Transport-level timeout. Default: 10s.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_confidence() -> f64 {
    1.0
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl HttpSourceConfig {
    pub fn new(url_template: impl Into<String>, price_pointer: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            price_pointer: price_pointer.into(),
            timestamp_pointer: None,
            timestamp_format: TimestampFormat::default(),
            confidence: default_confidence(),
            symbols: HashMap::new(),
            headers: HashMap::new(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Adapter for a JSON REST endpoint.
pub struct HttpJsonProvider {
    id: ProviderId,
    config: HttpSourceConfig,
    client: Client,
    clock: Arc<dyn Clock>,
}

impl HttpJsonProvider {
    pub fn new(id: ProviderId, config: HttpSourceConfig) -> RegistryResult<Self> {
        Self::with_clock(id, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        id: ProviderId,
        config: HttpSourceConfig,
        clock: Arc<dyn Clock>,
    ) -> RegistryResult<Self> {
        let invalid = |reason: String| RegistryError::InvalidSource {
            provider: id.clone(),
            reason,
        };

        if !config.url_template.contains("{asset}") {
            return Err(invalid("url_template must contain {asset}".to_string()));
        }
        if !config.price_pointer.starts_with('/') {
            return Err(invalid(format!(
                "price_pointer must be a JSON pointer, got {:?}",
                config.price_pointer
            )));
        }
        if !(0.0..=1.0).contains(&config.confidence) {
            return Err(invalid(format!(
                "confidence must be in [0, 1], got {}",
                config.confidence
            )));
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| invalid(format!("bad header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| invalid(format!("bad header value for {name}: {e}")))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .default_headers(headers)
            .build()
            .map_err(|e| RegistryError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            id,
            config,
            client,
            clock,
        })
    }

    pub fn id(&self) -> &ProviderId {
        &self.id
    }

    /// Source-side symbol for `asset`.
    fn symbol_for<'a>(&'a self, asset: &'a Asset) -> &'a str {
        self.config
            .symbols
            .get(asset.as_str())
            .map(String::as_str)
            .unwrap_or(asset.as_str())
    }

    fn url_for(&self, asset: &Asset) -> String {
        self.config
            .url_template
            .replace("{asset}", self.symbol_for(asset))
    }

    fn parse_reading(&self, asset: &Asset, body: &Value) -> Result<PriceReading, FetchError> {
        // Sources keyed by symbol put it in the pointer too.
        let price_pointer = self
            .config
            .price_pointer
            .replace("{asset}", self.symbol_for(asset));
        let price = body
            .pointer(&price_pointer)
            .and_then(value_as_f64)
            .ok_or_else(|| FetchError::Parse(format!("no numeric price at {price_pointer}")))?;

        let observed_at = match &self.config.timestamp_pointer {
            Some(pointer) => {
                let raw = body
                    .pointer(pointer)
                    .ok_or_else(|| FetchError::Parse(format!("no timestamp at {pointer}")))?;
                parse_timestamp(raw, self.config.timestamp_format)?
            }
            None => self.clock.now(),
        };

        Ok(PriceReading::new(
            self.id.clone(),
            asset.clone(),
            price,
            observed_at,
            self.config.confidence,
        )?)
    }
}

#[async_trait]
impl PriceProvider for HttpJsonProvider {
    async fn fetch_price(&self, asset: &Asset) -> Result<PriceReading, FetchError> {
        let url = self.url_for(asset);
        trace!(provider = %self.id, %asset, %url, "Fetching price");

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            debug!(provider = %self.id, %asset, status = status.as_u16(), "Source returned error status");
            return Err(classify_status(status, retry_after, body));
        }

        let body: Value = response.json().await?;
        self.parse_reading(asset, &body)
    }
}

fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: String) -> FetchError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            FetchError::Authentication(format!("HTTP {status}: {body}"))
        }
        _ => FetchError::Network {
            status: Some(status.as_u16()),
            message: body,
        },
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_timestamp(raw: &Value, format: TimestampFormat) -> Result<DateTime<Utc>, FetchError> {
    let bad = || FetchError::Parse(format!("unparseable timestamp {raw}"));
    match format {
        TimestampFormat::UnixSeconds => {
            let secs = value_as_f64(raw).ok_or_else(bad)?;
            Utc.timestamp_millis_opt((secs * 1000.0) as i64)
                .single()
                .ok_or_else(bad)
        }
        TimestampFormat::UnixMillis => {
            let millis = value_as_f64(raw).ok_or_else(bad)?;
            Utc.timestamp_millis_opt(millis as i64)
                .single()
                .ok_or_else(bad)
        }
        TimestampFormat::Rfc3339 => raw
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(bad),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider(config: HttpSourceConfig) -> HttpJsonProvider {
        HttpJsonProvider::new(ProviderId::parse("http").unwrap(), config).unwrap()
    }

    #[test]
    fn test_rejects_template_without_placeholder() {
        let err = HttpJsonProvider::new(
            ProviderId::parse("http").unwrap(),
            HttpSourceConfig::new("https://example.com/price", "/price"),
        )
        .err()
        .unwrap();
        assert!(matches!(err, RegistryError::InvalidSource { .. }));
    }

    #[test]
    fn test_symbol_mapping() {
        let mut config = HttpSourceConfig::new("https://example.com/{asset}/usd", "/price");
        config.symbols.insert("USDC".into(), "usd-coin".into());
        let p = provider(config);
        assert_eq!(
            p.url_for(&Asset::parse("usdc").unwrap()),
            "https://example.com/usd-coin/usd"
        );
        assert_eq!(
            p.url_for(&Asset::parse("DAI").unwrap()),
            "https://example.com/DAI/usd"
        );
    }

    #[test]
    fn test_symbol_in_price_pointer() {
        let mut config =
            HttpSourceConfig::new("https://example.com/simple?ids={asset}", "/{asset}/usd");
        config.symbols.insert("USDT".into(), "tether".into());
        let p = provider(config);

        let body = json!({"tether": {"usd": 1.0003}});
        let reading = p.parse_reading(&Asset::parse("USDT").unwrap(), &body).unwrap();
        assert_eq!(reading.price, 1.0003);
    }

    #[test]
    fn test_parse_string_price_and_rfc3339() {
        let mut config = HttpSourceConfig::new("https://example.com/{asset}", "/data/amount");
        config.timestamp_pointer = Some("/data/time".into());
        config.timestamp_format = TimestampFormat::Rfc3339;
        config.confidence = 0.8;
        let p = provider(config);

        let body = json!({"data": {"amount": "0.9998", "time": "2026-03-01T12:00:00Z"}});
        let reading = p.parse_reading(&Asset::parse("USDC").unwrap(), &body).unwrap();
        assert_eq!(reading.price, 0.9998);
        assert_eq!(reading.confidence, 0.8);
        assert_eq!(
            reading.observed_at,
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_rejects_missing_or_bad_price() {
        let p = provider(HttpSourceConfig::new("https://example.com/{asset}", "/price"));
        let asset = Asset::parse("USDC").unwrap();
        assert!(matches!(
            p.parse_reading(&asset, &json!({"other": 1})),
            Err(FetchError::Parse(_))
        ));
        assert!(matches!(
            p.parse_reading(&asset, &json!({"price": -1.0})),
            Err(FetchError::Parse(_))
        ));
    }

    #[test]
    fn test_unix_timestamps() {
        let expected = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let secs = json!(expected.timestamp());
        let millis = json!(expected.timestamp_millis());
        assert_eq!(
            parse_timestamp(&secs, TimestampFormat::UnixSeconds).unwrap(),
            expected
        );
        assert_eq!(
            parse_timestamp(&millis, TimestampFormat::UnixMillis).unwrap(),
            expected
        );
        assert!(parse_timestamp(&json!("soon"), TimestampFormat::UnixSeconds).is_err());
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(3)), String::new()),
            FetchError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(3)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, None, String::new()),
            FetchError::Authentication(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None, String::new()),
            FetchError::Network { status: Some(502), .. }
        ));
    }
}
