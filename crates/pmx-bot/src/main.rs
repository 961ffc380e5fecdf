//! pmx-bot entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Execution engine for binary prediction market positions.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via PMX_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    pmx_telemetry::init_logging()?;
    info!("starting pmx-bot v{}", env!("CARGO_PKG_VERSION"));

    let config = pmx_bot::AppConfig::load(args.config.as_deref())?;
    info!(mode = ?config.mode, markets = ?config.markets, "configuration loaded");

    let app = pmx_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
