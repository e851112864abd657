//! Gavel Agent
//!
//! A line-oriented bidding client. Registers with the Bank, connects to every
//! House in its directory and prints outbid and won notices as they arrive.
//!
//! # Usage
//!
//! ```bash
//! gavel-agent --name alice --balance 1000
//! gavel-agent --bank-addr 10.0.0.5:1026 --name bob --balance 500
//! ```

mod command;
mod config;

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gavel_agent::{AgentClient, AgentEvent};
use gavel_types::{Amount, BidOutcome, TransferOutcome};

use crate::command::{Command, HELP};
use crate::config::{AgentCliConfig, LoggingConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Gavel Agent - bid at auction houses from the terminal
#[derive(Parser, Debug)]
#[command(name = "gavel-agent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long, env = "GAVEL_AGENT_CONFIG")]
    config: Option<String>,

    /// Bank's agent-facing address (host:port)
    #[arg(long, env = "GAVEL_BANK_AGENT_ADDR")]
    bank_addr: Option<String>,

    /// Name to register with the Bank
    #[arg(short, long, env = "GAVEL_AGENT_NAME")]
    name: Option<String>,

    /// Opening balance
    #[arg(short, long, env = "GAVEL_AGENT_BALANCE")]
    balance: Option<u64>,

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

    let mut cli_config = AgentCliConfig::load(args.config.as_deref())?;

    if let Some(addr) = args.bank_addr {
        cli_config.agent.bank_addr = addr;
    }
    if let Some(name) = args.name {
        cli_config.agent.name = name;
    }
    if let Some(balance) = args.balance {
        cli_config.agent.initial_balance = Amount::new(balance);
    }
    if let Some(level) = args.log_level {
        cli_config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        cli_config.logging.format = format;
    }

    init_logging(&cli_config.logging)?;

    let client = Arc::new(AgentClient::connect(cli_config.agent).await?);
    println!(
        "Registered '{}' as {} with balance {}",
        client.name(),
        client.agent_id(),
        client.balance().await?.balance
    );
    show_houses(&client).await?;

    let notices = tokio::spawn(print_events(client.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut left = false;
    while let Some(line) = lines.next_line().await? {
        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        if command == Command::Exit {
            match client.shutdown().await {
                Ok(()) => {
                    left = true;
                    break;
                }
                Err(e) => {
                    println!("Cannot exit: {}", e);
                    continue;
                }
            }
        }
        if let Err(e) = run_command(&client, command).await {
            println!("{}", e);
        }
    }

    // Input closed without an exit command
    if !left {
        client.shutdown().await?;
    }
    notices.abort();
    println!("Goodbye");
    Ok(())
}

// =============================================================================
// Commands
// =============================================================================

async fn run_command(client: &AgentClient, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Houses => show_houses(client).await?,
        Command::List => {
            let auctions = client.refresh_auctions().await;
            if auctions.is_empty() {
                println!("No live auctions");
            }
            for auction in auctions {
                let leading = if auction.is_current_bidder(client.agent_id()) {
                    "  (you lead)"
                } else {
                    ""
                };
                println!(
                    "house {} item {}: {} [{}] min {} current {} ticks {}{}",
                    auction.house_id.get(),
                    auction.item_id.get(),
                    auction.name,
                    auction.desc,
                    auction.min_bid,
                    auction.current_bid,
                    auction.time_left,
                    leading
                );
            }
        }
        Command::Bid {
            house_id,
            item_id,
            amount,
        } => {
            let outcome = client.place_bid(house_id, item_id, amount).await?;
            let message = match outcome {
                BidOutcome::Accepted => "Bid accepted",
                BidOutcome::InsufficientFunds => "Bid rejected: not enough available funds",
                BidOutcome::Superseded => "Bid rejected: below the minimum or current bid",
                BidOutcome::Error => "Bid failed: the house could not process it",
            };
            println!("{}", message);
        }
        Command::Pay { house_id, item_id } => match client.pay_for(house_id, item_id).await? {
            TransferOutcome::Success => println!("Paid for item {}", item_id.get()),
            TransferOutcome::Failure => println!("Payment for item {} failed", item_id.get()),
        },
        Command::Balance => {
            let info = client.balance().await?;
            println!("Balance {} (blocked {})", info.balance, info.blocked_funds);
        }
        Command::Won => {
            let won = client.won_items();
            if won.is_empty() {
                println!("Nothing won yet");
            }
            for item in won {
                println!(
                    "house {} item {}: {} for {}{}",
                    item.key.house_id.get(),
                    item.key.item_id.get(),
                    item.name,
                    item.amount,
                    if item.paid { " (paid)" } else { " (unpaid)" }
                );
            }
        }
        Command::Help => println!("{}", HELP),
        Command::Exit => {}
    }
    Ok(())
}

async fn show_houses(client: &AgentClient) -> anyhow::Result<()> {
    let houses = client.refresh_houses().await?;
    if houses.is_empty() {
        println!("No auction houses open yet; try 'houses' again later");
    } else {
        let ids: Vec<String> = houses.iter().map(|h| h.get().to_string()).collect();
        println!("Connected to house(s): {}", ids.join(", "));
    }
    Ok(())
}

async fn print_events(client: Arc<AgentClient>) {
    while let Some(event) = client.next_event().await {
        match event {
            AgentEvent::Outbid(key) => println!(
                "! Outbid on item {} at house {}",
                key.item_id.get(),
                key.house_id.get()
            ),
            AgentEvent::Won(item) => println!(
                "! Won item {} at house {} for {}; 'pay {} {}' to settle",
                item.key.item_id.get(),
                item.key.house_id.get(),
                item.amount,
                item.key.house_id.get(),
                item.key.item_id.get()
            ),
            AgentEvent::HouseClosed(house_id) => {
                println!("! House {} closed", house_id.get())
            }
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
                .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            subscriber
                .with(fmt::layer().pretty().with_target(true).with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
