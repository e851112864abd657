//! Gavel Bank - the ledger service
//!
//! The Bank listens on two ports. Houses connect on one, Agents on the
//! other; the port an inbound connection arrived on decides which session
//! handler serves it. Every connection gets an id from one shared counter
//! and that id is also its ledger account id.
//!
//! # Example
//!
//! ```ignore
//! use gavel_bank::{BankConfig, BankServer};
//!
//! let server = BankServer::bind(&BankConfig::default()).await?;
//! server.run_until(tokio::signal::ctrl_c()).await;
//! ```

pub mod acceptor;
pub mod directory;
pub mod session;

pub use acceptor::{BankServer, Endpoint};
pub use directory::{ConnectionIdAllocator, HouseDirectory};

use gavel_ledger::Ledger;
use gavel_wire::WireError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bank configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BankConfig {
    /// Interface both listeners bind to
    pub host: String,
    /// Port Houses connect to
    pub house_port: u16,
    /// Port Agents connect to
    pub agent_port: u16,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            house_port: 1025,
            agent_port: 1026,
        }
    }
}

/// Bank errors
#[derive(Debug, Error)]
pub enum BankError {
    #[error("Failed to bind {endpoint} listener on {addr}: {source}")]
    Bind {
        endpoint: Endpoint,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("House and agent ports must differ (both {port})")]
    SamePort { port: u16 },

    #[error("Handshake failed: {reason}")]
    Handshake { reason: String },

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),
}

pub type Result<T> = std::result::Result<T, BankError>;

/// State shared by every session
#[derive(Clone, Default)]
pub struct BankState {
    pub ledger: Ledger,
    pub directory: HouseDirectory,
    pub ids: ConnectionIdAllocator,
}

impl BankState {
    pub fn new() -> Self {
        Self::default()
    }
}
