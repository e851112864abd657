//! Auction types
//!
//! The auction itself lives inside its House; everyone else only ever sees an
//! [`AuctionSnapshot`], which is also the JSON form streamed to agents.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Amount, ConnectionId, ItemId};

/// Lifecycle state of an auction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuctionState {
    /// No bid yet, no countdown running
    Pending,
    /// Has a bidder and a running countdown
    Active,
    /// Countdown reached zero; terminal
    Complete,
}

impl fmt::Display for AuctionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuctionState::Pending => write!(f, "pending"),
            AuctionState::Active => write!(f, "active"),
            AuctionState::Complete => write!(f, "complete"),
        }
    }
}

/// Serialized view of one live auction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionSnapshot {
    #[serde(rename = "itemID")]
    pub item_id: ItemId,
    pub name: String,
    pub desc: String,
    #[serde(rename = "houseID")]
    pub house_id: ConnectionId,
    #[serde(rename = "minBid")]
    pub min_bid: Amount,
    #[serde(rename = "currentBid")]
    pub current_bid: Amount,
    #[serde(rename = "timeleft")]
    pub time_left: u32,
    /// `None` while the auction is still pending
    #[serde(rename = "currentBidderID", default)]
    pub current_bidder_id: Option<ConnectionId>,
}

impl AuctionSnapshot {
    /// Whether `bidder` currently holds the top bid
    pub fn is_current_bidder(&self, bidder: ConnectionId) -> bool {
        self.current_bidder_id == Some(bidder)
    }

    /// Smallest amount the House will consider for the next bid
    pub fn minimum_next_bid(&self) -> Amount {
        self.min_bid.max(self.current_bid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> AuctionSnapshot {
        AuctionSnapshot {
            item_id: ItemId::new(4),
            name: "Starry Night".to_string(),
            desc: "painting".to_string(),
            house_id: ConnectionId::new(1),
            min_bid: Amount::new(50),
            current_bid: Amount::new(60),
            time_left: 17,
            current_bidder_id: Some(ConnectionId::new(2)),
        }
    }

    #[test]
    fn test_snapshot_uses_wire_field_names() {
        let json = serde_json::to_value(snapshot()).unwrap();
        assert_eq!(json["itemID"], 4);
        assert_eq!(json["timeleft"], 17);
        assert_eq!(json["currentBidderID"], 2);
        assert_eq!(json["minBid"], 50);
    }

    #[test]
    fn test_active_snapshot_rebuilds_identically() {
        let sent = snapshot();
        let json = serde_json::to_string(&sent).unwrap();
        let received: AuctionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(received, sent);
        assert!(received.is_current_bidder(ConnectionId::new(2)));
    }

    #[test]
    fn test_pending_snapshot_rebuilds_identically() {
        let sent = AuctionSnapshot {
            current_bid: Amount::zero(),
            time_left: 0,
            current_bidder_id: None,
            ..snapshot()
        };
        let json = serde_json::to_string(&sent).unwrap();
        let received: AuctionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(received, sent);
        assert_eq!(received.item_id, ItemId::new(4));
        assert_eq!(received.min_bid, Amount::new(50));
        assert_eq!(received.current_bid, Amount::zero());
        assert_eq!(received.time_left, 0);
        assert_eq!(received.current_bidder_id, None);
    }

    #[test]
    fn test_pending_snapshot_has_no_bidder() {
        let json = r#"{"itemID":1,"name":"a","desc":"b","houseID":1,"minBid":5,"currentBid":0,"timeleft":0,"currentBidderID":null}"#;
        let parsed: AuctionSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.current_bidder_id, None);
        assert_eq!(parsed.minimum_next_bid(), Amount::new(5));
    }
}
