//! Banking MCP orchestration server

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use banking_mcp_server::{config::Config, server::Server};

/// Task orchestration server for the AI banking platform
#[derive(Parser)]
#[command(name = "banking-mcp")]
#[command(about = "Routes banking tasks to executor agents and tracks their lifecycle")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,

    /// Override server host
    #[arg(long)]
    host: Option<String>,

    /// Override server port
    #[arg(long)]
    port: Option<u16>,

    /// Override database URL
    #[arg(long)]
    database_url: Option<String>,

    /// Run without a durable store
    #[arg(long)]
    memory_only: bool,

    /// Override log level (RUST_LOG still wins)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    apply_cli_overrides(&mut config, &cli);
    init_tracing(&config);

    info!(
        host = %config.server.host,
        port = config.server.port,
        persistence = config.database.enabled,
        "Configuration loaded"
    );

    let server = Server::new(config).await.map_err(|e| {
        error!(error = %e, "Failed to initialize server");
        e
    })?;

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Banking MCP server shut down gracefully");
    Ok(())
}

/// Apply CLI argument overrides to configuration
fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(url) = &cli.database_url {
        config.database.url = url.clone();
    }
    if cli.memory_only {
        config.database.enabled = false;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.logging.format.as_str() {
        "pretty" => registry.with(fmt::layer().pretty()).init(),
        "compact" => registry.with(fmt::layer().compact()).init(),
        _ => registry.with(fmt::layer().json()).init(),
    }
}
