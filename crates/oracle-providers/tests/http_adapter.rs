//! HTTP adapter against a mocked source, alone and behind the call executor.

use oracle_core::{Asset, ProviderId};
use oracle_providers::{FetchError, HttpJsonProvider, HttpSourceConfig, PriceProvider};
use oracle_resilience::{
    CallExecutor, CircuitBreakerConfig, ExecuteError, GuardRegistry, RateLimitConfig,
    RetryPolicy, Retryable,
};
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn usdc() -> Asset {
    Asset::parse("USDC").unwrap()
}

fn provider_for(server: &MockServer) -> HttpJsonProvider {
    let mut config = HttpSourceConfig::new(format!("{}/ticker/{{asset}}", server.uri()), "/price");
    config.timestamp_pointer = Some("/ts".into());
    config.headers.insert("x-api-key".into(), "secret".into());
    HttpJsonProvider::new(ProviderId::parse("mock-http").unwrap(), config).unwrap()
}

fn executor() -> CallExecutor {
    let mut guards = GuardRegistry::new();
    guards
        .register(
            ProviderId::parse("mock-http").unwrap(),
            &RateLimitConfig::default(),
            &CircuitBreakerConfig::default(),
        )
        .unwrap();
    CallExecutor::new(
        Arc::new(guards),
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_fetches_and_parses_price() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ticker/USDC"))
        .and(header("x-api-key", "secret"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"price": 1.0002, "ts": 1_772_366_400})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let reading = provider_for(&server).fetch_price(&usdc()).await.unwrap();
    assert_eq!(reading.price, 1.0002);
    assert_eq!(reading.asset, usdc());
    assert_eq!(reading.observed_at.timestamp(), 1_772_366_400);
    assert_eq!(reading.provider_id.as_str(), "mock-http");
}

#[tokio::test]
async fn test_status_mapping() {
    let cases = [
        (500, true, "network"),
        (503, true, "network"),
        (429, true, "rate_limited"),
        (404, false, "network"),
        (400, false, "network"),
        (401, false, "authentication"),
    ];

    for (status, retryable, kind) in cases {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let err = provider_for(&server).fetch_price(&usdc()).await.unwrap_err();
        assert_eq!(err.is_retryable(), retryable, "status {status}: {err}");
        assert_eq!(err.kind(), kind, "status {status}");
    }
}

#[tokio::test]
async fn test_malformed_body_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = provider_for(&server).fetch_price(&usdc()).await.unwrap_err();
    assert!(matches!(err, FetchError::Parse(_)), "{err}");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_executor_retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"price": "0.9999", "ts": 1_772_366_400})),
        )
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let id = ProviderId::parse("mock-http").unwrap();
    let asset = usdc();
    let reading = executor()
        .execute(&id, || provider.fetch_price(&asset))
        .await
        .unwrap();
    assert_eq!(reading.price, 0.9999);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_executor_does_not_retry_client_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let id = ProviderId::parse("mock-http").unwrap();
    let asset = usdc();
    let err = executor()
        .execute(&id, || provider.fetch_price(&asset))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExecuteError::Call {
            error: FetchError::Network { status: Some(404), .. },
            attempts: 1
        }
    ));
}
