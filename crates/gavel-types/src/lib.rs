//! Gavel Types - Canonical domain types for the Gavel auction marketplace
//!
//! This crate contains all foundational types shared by the three Gavel
//! services with zero dependencies on other gavel crates. It defines:
//!
//! - Identity types (`ConnectionId`, `ItemId`)
//! - Whole-unit amounts with checked arithmetic
//! - Auction state and the serialized auction snapshot
//! - Handshake and request payloads exchanged between services
//! - Response codes for block, unblock, bid and transfer requests
//!
//! # Flow
//!
//! ```text
//! Agent ──register──▶ Bank ──directory──▶ Agent ──bid──▶ House ──block──▶ Bank
//!                                             ◀──outbid/won── House
//! Agent ──transfer──▶ Bank (blocked funds → House account)
//! ```

pub mod identity;
pub mod amount;
pub mod auction;
pub mod message;
pub mod outcome;
pub mod error;

pub use identity::*;
pub use amount::*;
pub use auction::*;
pub use message::*;
pub use outcome::*;
pub use error::*;

/// Number of countdown ticks an auction runs after each accepted bid
pub const COUNTDOWN_TICKS: u32 = 30;
