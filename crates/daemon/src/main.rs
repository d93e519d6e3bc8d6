//! Termbook Daemon
//!
//! Multiplexes interactive shell sessions over one authenticated
//! WebSocket connection.

use std::path::PathBuf;

use clap::Parser;
use daemon::auth::StaticTokenAuthenticator;
use daemon::config::Config;
use daemon::gateway::ConnectionGateway;
use tracing_subscriber::EnvFilter;

/// Termbook daemon - interactive runbook terminal server.
#[derive(Parser, Debug)]
#[command(name = "termbook-daemon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to listen on (overrides configuration)
    #[arg(short, long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    config.apply_env_overrides();

    if let Some(bind) = cli.bind {
        config.server.bind_addr = bind;
    }

    let default_level = if cli.verbose {
        "debug".to_string()
    } else {
        config.server.log_level.clone()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.validate()?;

    if config.ensure_token() {
        tracing::info!("No access token configured, generated a fresh one");
    }

    let addr = config.bind_addr()?;

    tracing::info!(addr = %addr, "Starting Termbook daemon");
    tracing::info!("Access token: {}", config.auth.token);
    tracing::info!(
        "Connect with: ws://{}/ws?token={}",
        addr,
        config.auth.token
    );

    let authenticator = StaticTokenAuthenticator::shared(config.auth.token.clone());
    let gateway = ConnectionGateway::bind(addr, authenticator, config.session_defaults()).await?;

    tokio::select! {
        _ = gateway.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, exiting");
        }
    }

    Ok(())
}
