//! Gavel Auction House
//!
//! A House runs a small, fixed number of concurrent auctions and replaces
//! each one with a fresh catalog item as soon as it completes.
//!
//! # Architecture
//!
//! ```text
//!   agents ──► session (reader) ──► AuctionHouse::place_bid ──► Auction
//!                  ▲                                              │
//!                  └── mailbox ◄── writer task ◄── outbid / won ──┤
//!                                                                 │
//!   Bank ◄── BankLink (block / unblock) ◄─────────────────────────┘
//! ```
//!
//! Every auction serializes its own bids and countdown behind one async
//! mutex; the Bank is consulted while that mutex is held so a bid is never
//! accepted against a stale current bid.

pub mod auction;
pub mod catalog;
pub mod house;
pub mod session;
pub mod settlement;

pub use auction::{Auction, AuctionContext, Completion, Notifier, SettlementPort};
pub use catalog::{Catalog, CatalogItem, InMemoryCatalog};
pub use house::AuctionHouse;
pub use session::{Outbound, SessionRegistry};
pub use settlement::BankLink;

use std::time::Duration;

use gavel_types::GavelError;
use gavel_wire::WireError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// House configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HouseConfig {
    /// Bank's house-facing address
    pub bank_addr: String,
    /// Interface the agent listener binds to
    pub listen_host: String,
    /// Port agents connect to
    pub listen_port: u16,
    /// Address published in the Bank's house directory
    pub advertise_ip: String,
    /// Auctions kept live at all times
    pub live_auctions: usize,
    /// Countdown tick length in milliseconds
    pub tick_ms: u64,
    /// Bound on connecting and registering with the Bank
    pub connect_timeout_secs: u64,
}

impl Default for HouseConfig {
    fn default() -> Self {
        Self {
            bank_addr: "127.0.0.1:1025".to_string(),
            listen_host: "0.0.0.0".to_string(),
            listen_port: 1030,
            advertise_ip: "127.0.0.1".to_string(),
            live_auctions: 3,
            tick_ms: 1000,
            connect_timeout_secs: 10,
        }
    }
}

impl HouseConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// House errors
#[derive(Debug, Error)]
pub enum HouseError {
    #[error("Could not reach bank at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Bank at {addr} did not answer within {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    #[error("Bank refused registration: {reason}")]
    Registration { reason: String },

    #[error("Failed to bind agent listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Catalog error: {reason}")]
    Catalog { reason: String },

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error(transparent)]
    Gavel(#[from] GavelError),
}

pub type Result<T> = std::result::Result<T, HouseError>;
