//! DCS Daemon - contract lifecycle and signature workflow service

use anyhow::Context;
use clap::Parser;
use dcs_daemon::{DcsConfig, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// DCS Daemon CLI
#[derive(Parser)]
#[command(name = "dcsd")]
#[command(about = "DCS Daemon - contract lifecycle and signature workflow service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "DCS_CONFIG")]
    config: Option<String>,

    /// Listen address; overrides the configuration file
    #[arg(short, long, env = "DCS_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level
    #[arg(long, env = "DCS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "DCS_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DcsConfig::load(cli.config.as_deref()).context("loading configuration")?;

    // Override with CLI args
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("invalid listen address {listen}"))?;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
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

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen_addr,
        compliance = ?config.engine.compliance_policy,
        retry = ?config.engine.retry_policy,
        "starting dcsd"
    );

    let server = Server::new(config).await?;
    server.run().await?;
    Ok(())
}
