//! DLOB stream monitor - Entry Point

use anyhow::Result;
use clap::Parser;
use dlob_core::NetworkEnv;
use tracing::info;

/// DLOB orderbook and trades stream monitor
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via DLOB_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Network environment (mainnet-beta or devnet); overrides the config file
    #[arg(short, long)]
    network: Option<NetworkEnv>,

    /// Market to stream, e.g. `SOL-PERP` or `spot:SOL`; repeatable, replaces
    /// the configured markets
    #[arg(short, long = "market")]
    markets: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any WS connections)
    dlob_ws::init_crypto();

    let args = Args::parse();

    dlob_telemetry::init_logging()?;

    info!("Starting DLOB stream v{}", env!("CARGO_PKG_VERSION"));

    // Determine config path: CLI arg > DLOB_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("DLOB_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let mut config = dlob_stream::AppConfig::load(&config_path)?;
    config.apply_overrides(args.network, &args.markets)?;
    info!(
        network = %config.stream.network,
        markets = config.markets.len(),
        "Configuration loaded"
    );

    let app = dlob_stream::Application::new(config)?;
    app.run().await?;

    Ok(())
}
