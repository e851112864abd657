//! Gavel Bank Server
//!
//! Runs the Bank: one listener for Auction Houses, one for Agents, and the
//! ledger behind both.
//!
//! # Usage
//!
//! ```bash
//! # Default ports (houses 1025, agents 1026)
//! gavel-bank-server
//!
//! # Custom ports
//! gavel-bank-server --house-port 4000 --agent-port 4001
//!
//! # Environment overrides
//! GAVEL_BANK__BANK__HOST=127.0.0.1 gavel-bank-server
//! ```

mod config;

use clap::Parser;
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gavel_bank::BankServer;

use crate::config::{BankServerConfig, LoggingConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Gavel Bank - ledger service for houses and agents
#[derive(Parser, Debug)]
#[command(name = "gavel-bank-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long, env = "GAVEL_BANK_CONFIG")]
    config: Option<String>,

    /// Interface to bind both listeners to
    #[arg(long, env = "GAVEL_BANK_HOST")]
    host: Option<String>,

    /// Port Auction Houses connect to
    #[arg(long, env = "GAVEL_BANK_HOUSE_PORT")]
    house_port: Option<u16>,

    /// Port Agents connect to
    #[arg(long, env = "GAVEL_BANK_AGENT_PORT")]
    agent_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "GAVEL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, env = "GAVEL_LOG_FORMAT")]
    log_format: Option<String>,
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut server_config = BankServerConfig::load(args.config.as_deref())?;

    if let Some(host) = args.host {
        server_config.bank.host = host;
    }
    if let Some(port) = args.house_port {
        server_config.bank.house_port = port;
    }
    if let Some(port) = args.agent_port {
        server_config.bank.agent_port = port;
    }
    if let Some(level) = args.log_level {
        server_config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        server_config.logging.format = format;
    }

    init_logging(&server_config.logging)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        house_port = server_config.bank.house_port,
        agent_port = server_config.bank.agent_port,
        "Starting Gavel Bank"
    );

    let server = BankServer::bind(&server_config.bank).await?;
    let state = server.state();

    server.run_until(shutdown_signal()).await;

    let mut accounts = state.ledger.all_accounts();
    accounts.sort();
    tracing::info!(
        accounts = accounts.len(),
        houses = state.directory.len(),
        journal_entries = state.ledger.entry_count(),
        "Bank stopped"
    );
    for account in accounts.into_iter().filter_map(|id| state.ledger.account(id)) {
        tracing::info!(
            account_id = %account.id,
            balance = %account.balance,
            blocked = %account.blocked(),
            house = account.is_house(),
            "Final balance"
        );
    }

    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            subscriber
                .with(fmt::layer().json().with_target(true))
                .init();
        }
        _ => {
            subscriber
                .with(fmt::layer().pretty().with_target(true))
                .init();
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
