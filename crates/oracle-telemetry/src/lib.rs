//! Prometheus metrics and structured logging for the price oracle.
//!
//! - Prometheus metrics for consensus rounds, provider calls, circuit state
//! - Structured logging with tracing (JSON in production)
//! - Text exposition for the `/metrics` endpoint

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::{gather_text, Metrics};
