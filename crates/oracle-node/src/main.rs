//! Quorum price oracle node - entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Quorum price oracle node
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via ORACLE_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Run a single round, print the results as JSON and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // CLI arg > ORACLE_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("ORACLE_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    let config = oracle_node::AppConfig::from_file(&config_path)?;
    oracle_telemetry::init_logging(&config.telemetry.log_level)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_path = %config_path,
        providers = config.providers.len(),
        "Starting oracle node"
    );

    let app = oracle_node::Application::new(config)?;

    if args.once {
        let report = app.poll_round().await;
        println!("{}", serde_json::to_string_pretty(&report.results)?);
        return Ok(());
    }

    app.run().await?;
    Ok(())
}
