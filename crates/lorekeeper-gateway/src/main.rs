//! Lorekeeper gateway binary

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use lorekeeper::LorekeeperConfig;
use lorekeeper_gateway::{GatewayError, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Lorekeeper gateway CLI
#[derive(Parser)]
#[command(name = "lorekeeper-gateway")]
#[command(about = "Lore conflict detection gateway", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, env = "LOREKEEPER_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(short, long, env = "LOREKEEPER_LISTEN", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Log level when RUST_LOG is unset
    #[arg(long, env = "LOREKEEPER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "LOREKEEPER_LOG_JSON")]
    json_logs: bool,

    /// Override retention.max_records
    #[arg(long)]
    max_records: Option<usize>,

    /// Override hub.status_interval_secs
    #[arg(long)]
    status_interval_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let mut config = LorekeeperConfig::load(cli.config.as_deref())
        .map_err(|e| GatewayError::Config(e.to_string()))?;
    if let Some(max_records) = cli.max_records {
        config.retention.max_records = max_records;
    }
    if let Some(secs) = cli.status_interval_secs {
        config.hub.status_interval_secs = secs;
    }

    let server = Server::from_config(config, cli.listen)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %cli.listen,
        "Starting lorekeeper gateway"
    );

    server
        .run()
        .await
        .context("Gateway server failed")?;

    Ok(())
}
