//! Market data multiplexer server - Entry Point
//!
//! Runs the hub against simulated feeds with demo sessions and batched
//! persistence until SIGINT/SIGTERM.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Market data multiplexer server
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via MDMUX_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    mdmux_telemetry::init_logging()?;

    info!("Starting mdmux-server v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > MDMUX_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("MDMUX_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let config = mdmux_server::AppConfig::from_file(&config_path)?;
    info!(
        trigger_interval_ms = config.batcher.trigger_interval_ms,
        store = ?config.persistence.store,
        "Configuration loaded"
    );

    let app = mdmux_server::Application::new(config)?;
    app.run().await?;

    Ok(())
}
