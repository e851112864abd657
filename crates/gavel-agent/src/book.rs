//! The agent's record of items on offer and items won

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use gavel_types::{Amount, AuctionSnapshot, ConnectionId, ItemId};

use crate::{AgentError, Result};

/// Item ids are only unique within one House
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemKey {
    pub house_id: ConnectionId,
    pub item_id: ItemId,
}

impl ItemKey {
    pub fn new(house_id: ConnectionId, item_id: ItemId) -> Self {
        Self { house_id, item_id }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.house_id, self.item_id)
    }
}

/// An item the agent won
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WonItem {
    pub key: ItemKey,
    pub name: String,
    /// Winning bid, still blocked until paid
    pub amount: Amount,
    pub paid: bool,
    /// A transfer for this item is on its way to the Bank
    pub paying: bool,
}

#[derive(Debug, Default)]
pub struct ItemBook {
    open: BTreeMap<ItemKey, AuctionSnapshot>,
    won: BTreeMap<ItemKey, WonItem>,
    /// Accepted bids the agent has not been outbid on
    leading: BTreeMap<ItemKey, Amount>,
}

impl ItemBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything known about one House's live auctions
    pub fn replace_house(&mut self, house_id: ConnectionId, snapshots: Vec<AuctionSnapshot>) {
        self.open.retain(|key, _| key.house_id != house_id);
        for snapshot in snapshots {
            let key = ItemKey::new(house_id, snapshot.item_id);
            if !self.won.contains_key(&key) {
                self.open.insert(key, snapshot);
            }
        }
    }

    /// Forget a House's open items; won items stay
    pub fn remove_house(&mut self, house_id: ConnectionId) {
        self.open.retain(|key, _| key.house_id != house_id);
        self.leading.retain(|key, _| key.house_id != house_id);
    }

    pub fn record_bid(&mut self, key: ItemKey, amount: Amount) {
        self.leading.insert(key, amount);
    }

    pub fn record_outbid(&mut self, key: ItemKey) {
        self.leading.remove(&key);
    }

    /// Move an item from open to won
    ///
    /// Returns `None` if it was already won, so each item moves once.
    pub fn record_won(&mut self, key: ItemKey) -> Option<WonItem> {
        if self.won.contains_key(&key) {
            return None;
        }
        let snapshot = self.open.remove(&key);
        let amount = self
            .leading
            .remove(&key)
            .or_else(|| snapshot.as_ref().map(|s| s.current_bid))
            .unwrap_or_default();
        let item = WonItem {
            key,
            name: snapshot
                .map(|s| s.name)
                .unwrap_or_else(|| key.item_id.to_string()),
            amount,
            paid: false,
            paying: false,
        };
        self.won.insert(key, item.clone());
        Some(item)
    }

    pub fn won_item(&self, key: ItemKey) -> Option<&WonItem> {
        self.won.get(&key)
    }

    /// Claim a won item for payment and return the amount owed
    ///
    /// Only one payment per item can be claimed at a time.
    pub fn begin_payment(&mut self, key: ItemKey) -> Result<Amount> {
        let ItemKey { house_id, item_id } = key;
        match self.won.get_mut(&key) {
            None => Err(AgentError::NotWon { house_id, item_id }),
            Some(item) if item.paid => Err(AgentError::AlreadyPaid { house_id, item_id }),
            Some(item) if item.paying => Err(AgentError::PaymentInProgress { house_id, item_id }),
            Some(item) => {
                item.paying = true;
                Ok(item.amount)
            }
        }
    }

    /// Release the claim taken by [`begin_payment`](Self::begin_payment)
    pub fn finish_payment(&mut self, key: ItemKey, paid: bool) {
        if let Some(item) = self.won.get_mut(&key) {
            item.paying = false;
            item.paid |= paid;
        }
    }

    pub fn open_items(&self) -> Vec<AuctionSnapshot> {
        self.open.values().cloned().collect()
    }

    pub fn won_items(&self) -> Vec<WonItem> {
        self.won.values().cloned().collect()
    }

    pub fn unpaid(&self) -> Vec<ItemKey> {
        self.won
            .values()
            .filter(|item| !item.paid)
            .map(|item| item.key)
            .collect()
    }

    /// Items where `agent` currently holds the highest bid
    pub fn leading_items(&self, agent: ConnectionId) -> Vec<ItemKey> {
        let mut keys: BTreeSet<ItemKey> = self.leading.keys().copied().collect();
        keys.extend(
            self.open
                .iter()
                .filter(|(_, s)| s.is_current_bidder(agent))
                .map(|(key, _)| *key),
        );
        keys.into_iter().filter(|k| !self.won.contains_key(k)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUSE: ConnectionId = ConnectionId::new(1);
    const ME: ConnectionId = ConnectionId::new(4);

    fn snapshot(item: u32, current_bid: u64, bidder: Option<u32>) -> AuctionSnapshot {
        AuctionSnapshot {
            item_id: ItemId::new(item),
            name: format!("Lot {}", item),
            desc: "print".to_string(),
            house_id: HOUSE,
            min_bid: Amount::new(10),
            current_bid: Amount::new(current_bid),
            time_left: 30,
            current_bidder_id: bidder.map(ConnectionId::new),
        }
    }

    fn key(item: u32) -> ItemKey {
        ItemKey::new(HOUSE, ItemId::new(item))
    }

    #[test]
    fn test_won_moves_exactly_once() {
        let mut book = ItemBook::new();
        book.replace_house(HOUSE, vec![snapshot(1, 0, None), snapshot(2, 0, None)]);
        book.record_bid(key(1), Amount::new(40));

        let won = book.record_won(key(1)).unwrap();
        assert_eq!(won.amount, Amount::new(40));
        assert_eq!(won.name, "Lot 1");
        assert!(book.record_won(key(1)).is_none());

        assert_eq!(book.open_items().len(), 1);
        assert_eq!(book.won_items().len(), 1);
    }

    #[test]
    fn test_refresh_does_not_reopen_won_items() {
        let mut book = ItemBook::new();
        book.replace_house(HOUSE, vec![snapshot(1, 40, Some(4))]);
        book.record_won(key(1));
        book.replace_house(HOUSE, vec![snapshot(1, 40, Some(4)), snapshot(3, 0, None)]);
        assert_eq!(book.open_items().len(), 1);
    }

    #[test]
    fn test_leading_follows_bids_and_outbids() {
        let mut book = ItemBook::new();
        book.replace_house(HOUSE, vec![snapshot(1, 0, None), snapshot(2, 25, Some(4))]);
        book.record_bid(key(1), Amount::new(10));
        assert_eq!(book.leading_items(ME), vec![key(1), key(2)]);

        book.record_outbid(key(1));
        assert_eq!(book.leading_items(ME), vec![key(2)]);
    }

    #[test]
    fn test_unpaid_until_payment_succeeds() {
        let mut book = ItemBook::new();
        book.record_bid(key(5), Amount::new(15));
        book.record_won(key(5));
        assert_eq!(book.unpaid(), vec![key(5)]);

        assert_eq!(book.begin_payment(key(5)).unwrap(), Amount::new(15));
        assert_eq!(book.unpaid(), vec![key(5)]);
        book.finish_payment(key(5), true);
        assert!(book.unpaid().is_empty());
        assert!(book.won_item(key(5)).unwrap().paid);
        assert!(matches!(
            book.begin_payment(key(5)),
            Err(AgentError::AlreadyPaid { .. })
        ));
    }

    #[test]
    fn test_one_payment_claim_at_a_time() {
        let mut book = ItemBook::new();
        book.record_bid(key(6), Amount::new(30));
        book.record_won(key(6));

        book.begin_payment(key(6)).unwrap();
        assert!(matches!(
            book.begin_payment(key(6)),
            Err(AgentError::PaymentInProgress { .. })
        ));

        // a failed transfer frees the item for another try
        book.finish_payment(key(6), false);
        assert!(!book.won_item(key(6)).unwrap().paid);
        assert_eq!(book.begin_payment(key(6)).unwrap(), Amount::new(30));
    }

    #[test]
    fn test_payment_needs_a_won_item() {
        let mut book = ItemBook::new();
        book.replace_house(HOUSE, vec![snapshot(7, 20, Some(4))]);
        assert!(matches!(
            book.begin_payment(key(7)),
            Err(AgentError::NotWon { .. })
        ));
    }
}
