//! Operator HTTP endpoints using axum.
//!
//! Read-only: health, Prometheus scrape, diagnostics snapshot and the last
//! accepted consensus per asset.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use oracle_consensus::ConsensusAggregator;
use oracle_core::Asset;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::AppResult;

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    aggregator: Arc<ConsensusAggregator>,
}

impl AppState {
    pub fn new(aggregator: Arc<ConsensusAggregator>) -> Self {
        Self { aggregator }
    }
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    providers: usize,
    open_circuits: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Create the axum router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/diagnostics", get(diagnostics))
        .route("/consensus/{asset}", get(latest_consensus))
        .with_state(state)
}

/// Degraded when every provider's circuit is open.
async fn health(State(state): State<AppState>) -> Json<HealthBody> {
    let diag = state.aggregator.diagnostics();
    let providers = diag.providers.len();
    let open_circuits = diag.open_circuits();
    let status = if providers > 0 && open_circuits == providers {
        "degraded"
    } else {
        "ok"
    };
    Json(HealthBody {
        status,
        providers,
        open_circuits,
    })
}

async fn metrics() -> Response {
    match oracle_telemetry::gather_text() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn diagnostics(State(state): State<AppState>) -> Response {
    Json(state.aggregator.diagnostics()).into_response()
}

async fn latest_consensus(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Response {
    let asset = match Asset::parse(&symbol) {
        Ok(asset) => asset,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    match state.aggregator.latest(&asset) {
        Some(result) => Json(result).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("no consensus for {asset} yet"),
        ),
    }
}

/// Serve until `shutdown` is cancelled.
pub async fn run_server(
    state: AppState,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> AppResult<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Starting operator server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Operator server stopped");
    Ok(())
}
