//! Request and handshake payloads
//!
//! Every structured payload on the wire is one of these types encoded as
//! JSON. Field names follow the protocol, not Rust conventions.

use serde::{Deserialize, Serialize};

use crate::{Amount, ConnectionId, ItemId};

/// First message an Agent sends to the Bank
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub name: String,
    pub balance: Amount,
}

/// First message a House sends to the Bank: where agents can reach it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HouseRegistration {
    pub ip: String,
    pub port: u16,
}

/// Bank-held directory entry for a connected House
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HouseDirectoryEntry {
    #[serde(rename = "ID")]
    pub house_id: ConnectionId,
    pub ip: String,
    pub port: u16,
}

impl HouseDirectoryEntry {
    /// `ip:port` string suitable for connecting
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// House → Bank block or unblock request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsRequest {
    #[serde(rename = "accountID")]
    pub account_id: ConnectionId,
    pub amount: Amount,
}

/// Agent → House bid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidRequest {
    #[serde(rename = "itemID")]
    pub item_id: ItemId,
    pub amount: Amount,
    #[serde(rename = "accountID")]
    pub account_id: ConnectionId,
}

/// Agent → Bank settlement of a won item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    #[serde(rename = "AHID")]
    pub house_id: ConnectionId,
    #[serde(rename = "agentID")]
    pub agent_id: ConnectionId,
    pub amount: Amount,
}

/// Bank → Agent view of the agent's own account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub balance: Amount,
    #[serde(rename = "blockedFunds")]
    pub blocked_funds: Amount,
}

/// Asynchronous House → Agent push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Notification {
    /// Another agent placed a higher bid on the item
    Outbid(ItemId),
    /// The countdown ran out with the agent as current bidder
    Won(ItemId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_request_wire_names() {
        let request = TransferRequest {
            house_id: ConnectionId::new(1),
            agent_id: ConnectionId::new(2),
            amount: Amount::new(300),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"AHID":1,"agentID":2,"amount":300}"#);
    }

    #[test]
    fn test_negative_amount_is_rejected() {
        let parsed: Result<FundsRequest, _> =
            serde_json::from_str(r#"{"accountID":2,"amount":-5}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_directory_entry_address() {
        let entry = HouseDirectoryEntry {
            house_id: ConnectionId::new(1),
            ip: "127.0.0.1".to_string(),
            port: 4000,
        };
        assert_eq!(entry.address(), "127.0.0.1:4000");
    }
}
