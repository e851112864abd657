//! Error types for Gavel
//!
//! Ledger rejections are ordinary results, not errors; this type covers
//! what is left: failed handshakes, refused shutdowns and lookups that
//! name something that does not exist.

use thiserror::Error;

use crate::{ConnectionId, ItemId};

/// Result type for Gavel operations
pub type Result<T> = std::result::Result<T, GavelError>;

/// Gavel error types
#[derive(Debug, Clone, Error)]
pub enum GavelError {
    // ========================================================================
    // Protocol Errors
    // ========================================================================

    /// Handshake did not complete
    #[error("Handshake failed: {reason}")]
    HandshakeFailed { reason: String },

    // ========================================================================
    // Lookup Errors
    // ========================================================================

    /// Item is not on sale at this house
    #[error("Item {item_id} is not on sale")]
    UnknownItem { item_id: ItemId },

    /// Not connected to this house
    #[error("House {house_id} is not connected")]
    UnknownHouse { house_id: ConnectionId },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================

    /// Voluntary shutdown refused while commitments are open
    #[error("Shutdown refused: {reason}")]
    ShutdownRefused { reason: String },

    /// Peer went away
    #[error("Connection to {peer} closed")]
    ConnectionClosed { peer: String },
}
