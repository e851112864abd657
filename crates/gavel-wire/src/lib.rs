//! Gavel Wire - framing for every link between Gavel services
//!
//! # Protocol
//!
//! A message is built from up to three parts, always in this order:
//!
//! 1. a one-byte command tag (absent only in connection handshakes),
//! 2. a text payload: 4-byte big-endian length followed by UTF-8 bytes,
//!    usually JSON,
//! 3. a 4-byte big-endian signed integer, used for ids and response codes.
//!
//! Streamed lists are a sequence of text payloads terminated by the
//! sentinel payload `"0"`.
//!
//! Frames are not self-delimiting against concurrent writers: every
//! connection must have exactly one writer at a time.
//!
//! # Example
//!
//! ```ignore
//! use gavel_wire::{FrameReader, FrameWriter, HouseBankCommand};
//!
//! writer.write_tag(HouseBankCommand::Block.tag()).await?;
//! writer.write_json(&request).await?;
//! writer.flush().await?;
//! let code = reader.read_code().await?;
//! ```

pub mod codec;
pub mod command;

pub use codec::*;
pub use command::*;

use thiserror::Error;

/// Largest text payload accepted from a peer
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Payload that terminates a streamed list
pub const LIST_SENTINEL: &str = "0";

/// Wire errors
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Connection closed by peer")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Payload of {len} bytes exceeds limit of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Malformed JSON payload: {0}")]
    MalformedJson(#[from] serde_json::Error),
}

impl WireError {
    /// Whether the connection is still usable after this error
    ///
    /// A payload that was fully consumed but failed to decode leaves the
    /// stream in sync; every other error leaves it unusable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, WireError::MalformedJson(_) | WireError::InvalidUtf8)
    }
}

/// Result type for wire operations
pub type WireResult<T> = Result<T, WireError>;
