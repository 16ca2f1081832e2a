//! Quorum price oracle node.
//!
//! Wires configured HTTP providers into a consensus aggregator, polls the
//! configured assets, evaluates depeg watches and serves operator endpoints.

pub mod app;
pub mod config;
pub mod error;
pub mod server;

pub use app::{Application, RoundReport};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use server::{create_router, run_server, AppState};
