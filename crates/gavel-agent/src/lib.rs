//! Gavel Agent - bidding client core
//!
//! An agent keeps one channel to the Bank and one connection per House it
//! has discovered through the Bank's directory. Houses push outbid and won
//! notices at any time; a reader task per House separates those pushes
//! from replies to the agent's own requests.
//!
//! # Example
//!
//! ```ignore
//! use gavel_agent::{AgentClient, AgentConfig};
//!
//! let client = AgentClient::connect(AgentConfig::default()).await?;
//! client.refresh_houses().await?;
//! for item in client.refresh_auctions().await {
//!     println!("{} at {}", item.name, item.current_bid);
//! }
//! ```

pub mod bank;
pub mod book;
pub mod client;
pub mod house;

pub use bank::BankChannel;
pub use book::{ItemBook, ItemKey, WonItem};
pub use client::{AgentClient, AgentEvent};
pub use house::{HouseConnection, HouseEvent};

use std::time::Duration;

use gavel_types::{Amount, ConnectionId, GavelError, ItemId};
use gavel_wire::WireError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Bank's agent-facing address
    pub bank_addr: String,
    /// Display name registered with the Bank
    pub name: String,
    /// Opening balance
    pub initial_balance: Amount,
    /// Bound on reaching the Bank and on each House connect
    pub connect_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bank_addr: "127.0.0.1:1026".to_string(),
            name: "agent".to_string(),
            initial_balance: Amount::new(1000),
            connect_timeout_secs: 10,
        }
    }
}

impl AgentConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Agent errors
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Could not reach {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{addr} did not answer within {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    #[error("Bank refused registration")]
    RegistrationRefused,

    #[error("Item {item_id} at house {house_id} has not been won")]
    NotWon {
        house_id: ConnectionId,
        item_id: ItemId,
    },

    #[error("Item {item_id} at house {house_id} is already paid for")]
    AlreadyPaid {
        house_id: ConnectionId,
        item_id: ItemId,
    },

    #[error("Payment for item {item_id} at house {house_id} is already under way")]
    PaymentInProgress {
        house_id: ConnectionId,
        item_id: ItemId,
    },

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error(transparent)]
    Gavel(#[from] GavelError),
}

pub type Result<T> = std::result::Result<T, AgentError>;
