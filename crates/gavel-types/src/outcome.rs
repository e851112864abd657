//! Response codes
//!
//! Every request that expects an answer is answered with a 4-byte signed
//! integer. These enums are the typed form of those integers; the
//! `code`/`from_code` pairs are the only place the numbers appear.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of a House's block or unblock request against the Bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FundsOutcome {
    /// The Bank moved the funds
    Accepted,
    /// The account could not cover the request; nothing moved
    Insufficient,
    /// The link to the Bank failed or the Bank reported an error
    CommFailure,
}

impl FundsOutcome {
    /// Wire code for a block reply: `1` / `0` / `-1`
    pub fn block_code(self) -> i32 {
        match self {
            FundsOutcome::Accepted => 1,
            FundsOutcome::Insufficient => 0,
            FundsOutcome::CommFailure => -1,
        }
    }

    /// Interpret a Bank reply to a block request
    pub fn from_block_code(code: i32) -> Self {
        match code {
            1 => FundsOutcome::Accepted,
            0 => FundsOutcome::Insufficient,
            _ => FundsOutcome::CommFailure,
        }
    }

    /// Interpret a Bank reply to an unblock request (the ledger answers
    /// `-1` when too little is blocked)
    pub fn from_unblock_code(code: i32) -> Self {
        match code {
            1 => FundsOutcome::Accepted,
            0 | -1 => FundsOutcome::Insufficient,
            _ => FundsOutcome::CommFailure,
        }
    }

    pub fn is_accepted(self) -> bool {
        self == FundsOutcome::Accepted
    }
}

impl fmt::Display for FundsOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FundsOutcome::Accepted => write!(f, "accepted"),
            FundsOutcome::Insufficient => write!(f, "insufficient funds"),
            FundsOutcome::CommFailure => write!(f, "communication failure"),
        }
    }
}

/// Result of an Agent's bid as reported by the House
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BidOutcome {
    /// Funds blocked and the bid is now the current bid
    Accepted,
    /// The Bank refused to block the amount
    InsufficientFunds,
    /// The bid is below the current bid or the minimum bid
    Superseded,
    /// The item is unknown/closed or a link failed
    Error,
}

impl BidOutcome {
    pub fn code(self) -> i32 {
        match self {
            BidOutcome::Accepted => 1,
            BidOutcome::InsufficientFunds => 0,
            BidOutcome::Superseded => 2,
            BidOutcome::Error => -1,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => BidOutcome::Accepted,
            0 => BidOutcome::InsufficientFunds,
            2 => BidOutcome::Superseded,
            _ => BidOutcome::Error,
        }
    }
}

impl From<FundsOutcome> for BidOutcome {
    fn from(outcome: FundsOutcome) -> Self {
        match outcome {
            FundsOutcome::Accepted => BidOutcome::Accepted,
            FundsOutcome::Insufficient => BidOutcome::InsufficientFunds,
            FundsOutcome::CommFailure => BidOutcome::Error,
        }
    }
}

impl fmt::Display for BidOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BidOutcome::Accepted => write!(f, "bid accepted"),
            BidOutcome::InsufficientFunds => write!(f, "insufficient funds"),
            BidOutcome::Superseded => write!(f, "current bid higher"),
            BidOutcome::Error => write!(f, "bid failed"),
        }
    }
}

/// Result of an Agent's transfer request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferOutcome {
    Success,
    Failure,
}

impl TransferOutcome {
    pub fn code(self) -> i32 {
        match self {
            TransferOutcome::Success => 1,
            TransferOutcome::Failure => -1,
        }
    }

    pub fn from_code(code: i32) -> Self {
        if code == 1 {
            TransferOutcome::Success
        } else {
            TransferOutcome::Failure
        }
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferOutcome::Success => write!(f, "transfer complete"),
            TransferOutcome::Failure => write!(f, "transfer failed"),
        }
    }
}
