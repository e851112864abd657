//! Gavel Auction House Server
//!
//! Registers with the Bank, keeps a few auctions running and serves agents
//! until an operator types `exit` (or sends Ctrl+C) while no sale is in
//! progress.
//!
//! # Usage
//!
//! ```bash
//! # Bank on localhost, agents on port 1030, bundled art catalog
//! gavel-house-server
//!
//! # Another machine's bank and a custom catalog
//! gavel-house-server --bank-addr 10.0.0.5:1025 --advertise-ip 10.0.0.7 --catalog items.json
//! ```
//!
//! Console commands: `list`, `sold`, `exit`.

mod config;

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gavel_house::{AuctionHouse, BankLink, InMemoryCatalog};
use gavel_types::HouseRegistration;

use crate::config::{HouseServerConfig, LoggingConfig};

const BUNDLED_CATALOG: &str = include_str!("../catalog/art.json");

// =============================================================================
// CLI Arguments
// =============================================================================

/// Gavel Auction House - runs auctions settled through the Bank
#[derive(Parser, Debug)]
#[command(name = "gavel-house-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long, env = "GAVEL_HOUSE_CONFIG")]
    config: Option<String>,

    /// Bank's house-facing address (host:port)
    #[arg(long, env = "GAVEL_BANK_HOUSE_ADDR")]
    bank_addr: Option<String>,

    /// Port agents connect to
    #[arg(short, long, env = "GAVEL_HOUSE_PORT")]
    port: Option<u16>,

    /// Address agents are told to connect to
    #[arg(long, env = "GAVEL_HOUSE_ADVERTISE_IP")]
    advertise_ip: Option<String>,

    /// JSON catalog of items to sell
    #[arg(long, env = "GAVEL_HOUSE_CATALOG")]
    catalog: Option<String>,

    /// Countdown tick in milliseconds
    #[arg(long, env = "GAVEL_HOUSE_TICK_MS")]
    tick_ms: Option<u64>,

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

    let mut server_config = HouseServerConfig::load(args.config.as_deref())?;

    if let Some(addr) = args.bank_addr {
        server_config.house.bank_addr = addr;
    }
    if let Some(port) = args.port {
        server_config.house.listen_port = port;
    }
    if let Some(ip) = args.advertise_ip {
        server_config.house.advertise_ip = ip;
    }
    if let Some(path) = args.catalog {
        server_config.catalog.path = Some(path);
    }
    if let Some(tick_ms) = args.tick_ms {
        server_config.house.tick_ms = tick_ms;
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
        bank_addr = %server_config.house.bank_addr,
        port = server_config.house.listen_port,
        "Starting Gavel Auction House"
    );

    let catalog = match &server_config.catalog.path {
        Some(path) => InMemoryCatalog::load(path)?,
        None => InMemoryCatalog::from_json(BUNDLED_CATALOG)?,
    };
    tracing::info!(items = catalog.remaining(), "Catalog loaded");

    let house_config = server_config.house;
    let registration = HouseRegistration {
        ip: house_config.advertise_ip.clone(),
        port: house_config.listen_port,
    };
    let link = BankLink::connect(
        &house_config.bank_addr,
        &registration,
        house_config.connect_timeout(),
    )
    .await?;
    let house_id = link.house_id();
    tracing::info!(connection_id = %house_id, "Registered with bank");

    let house = AuctionHouse::start(house_id, house_config, Arc::new(catalog), Arc::new(link)).await;
    let listener = house.bind().await?;
    let server = tokio::spawn(house.clone().serve(listener));

    run_console(&house).await;

    if let Err(e) = server.await {
        tracing::error!(error = %e, "Agent listener task failed");
    }
    tracing::info!(sold = house.sold_items().len(), "Auction house stopped");

    Ok(())
}

// =============================================================================
// Console
// =============================================================================

/// Read operator commands until the House has shut down
async fn run_console(house: &Arc<AuctionHouse>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        let stop_requested = tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => handle_command(house, line.trim()).await,
                Ok(None) | Err(_) => {
                    stdin_open = false;
                    false
                }
            },
            _ = shutdown_signal() => true,
        };

        if stop_requested {
            match house.attempt_shutdown().await {
                Ok(()) => return,
                Err(e) => println!("Cannot exit: {}", e),
            }
        }
    }
}

/// Returns `true` when the operator asked to exit
async fn handle_command(house: &AuctionHouse, command: &str) -> bool {
    match command {
        "" => false,
        "exit" | "quit" => true,
        "list" => {
            for auction in house.list().await {
                println!(
                    "{:>8}  {:<28} min {:>6}  current {:>6}  {:>3} ticks  {}",
                    auction.item_id,
                    auction.name,
                    auction.min_bid,
                    auction.current_bid,
                    auction.time_left,
                    auction
                        .current_bidder_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
            false
        }
        "sold" => {
            let sold = house.sold_items();
            if sold.is_empty() {
                println!("Nothing sold yet");
            }
            for item_id in sold {
                println!("{}", item_id);
            }
            false
        }
        other => {
            println!("Unknown command '{}'. Try: list, sold, exit", other);
            false
        }
    }
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
            tracing::info!("Received Ctrl+C, attempting shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, attempting shutdown");
        }
    }
}
