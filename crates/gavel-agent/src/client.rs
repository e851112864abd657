//! Agent client core

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use gavel_types::{
    Amount, AuctionSnapshot, BalanceInfo, BidOutcome, ConnectionId, GavelError, ItemId,
    Notification, TransferOutcome,
};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::bank::BankChannel;
use crate::book::{ItemBook, ItemKey, WonItem};
use crate::house::{HouseConnection, HouseEvent};
use crate::{AgentConfig, Result};

/// What the agent learned from a House push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    Outbid(ItemKey),
    Won(WonItem),
    HouseClosed(ConnectionId),
}

/// A registered agent with its House connections
pub struct AgentClient {
    config: AgentConfig,
    bank: BankChannel,
    houses: DashMap<ConnectionId, Arc<HouseConnection>>,
    book: SyncMutex<ItemBook>,
    events_tx: mpsc::UnboundedSender<HouseEvent>,
    events_rx: Mutex<mpsc::UnboundedReceiver<HouseEvent>>,
    /// Events already applied to the book but not yet handed out
    ready: SyncMutex<VecDeque<AgentEvent>>,
}

impl AgentClient {
    /// Register with the Bank
    pub async fn connect(config: AgentConfig) -> Result<Self> {
        let bank = BankChannel::register(
            &config.bank_addr,
            &config.name,
            config.initial_balance,
            config.connect_timeout(),
        )
        .await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            bank,
            houses: DashMap::new(),
            book: SyncMutex::new(ItemBook::new()),
            events_tx,
            events_rx: Mutex::new(events_rx),
            ready: SyncMutex::new(VecDeque::new()),
        })
    }

    pub fn agent_id(&self) -> ConnectionId {
        self.bank.agent_id()
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Connect to every House in the Bank's directory not yet connected
    ///
    /// Returns the ids of all connected Houses. A House that cannot be
    /// reached is logged and skipped.
    pub async fn refresh_houses(&self) -> Result<Vec<ConnectionId>> {
        let directory = self.bank.houses().await?;
        for entry in directory {
            let stale = self
                .houses
                .get(&entry.house_id)
                .map(|h| !h.is_open())
                .unwrap_or(true);
            if !stale {
                continue;
            }
            match HouseConnection::connect(
                &entry,
                self.agent_id(),
                self.events_tx.clone(),
                self.config.connect_timeout(),
            )
            .await
            {
                Ok(connection) => {
                    self.houses.insert(entry.house_id, Arc::new(connection));
                }
                Err(e) => warn!(house = %entry.house_id, error = %e, "Could not connect to house"),
            }
        }
        Ok(self.house_ids())
    }

    pub fn house_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.houses.iter().map(|h| *h.key()).collect();
        ids.sort();
        ids
    }

    fn house(&self, house_id: ConnectionId) -> Result<Arc<HouseConnection>> {
        self.houses
            .get(&house_id)
            .map(|h| h.value().clone())
            .ok_or_else(|| GavelError::UnknownHouse { house_id }.into())
    }

    /// Ask every connected House for its live auctions
    pub async fn refresh_auctions(&self) -> Vec<AuctionSnapshot> {
        let houses: Vec<Arc<HouseConnection>> = self.houses.iter().map(|h| h.value().clone()).collect();
        for house in houses {
            match house.list().await {
                Ok(snapshots) => self.book.lock().replace_house(house.house_id(), snapshots),
                Err(e) => {
                    warn!(house = %house.house_id(), error = %e, "Could not list auctions");
                    self.forget_house(house.house_id());
                }
            }
        }
        self.book.lock().open_items()
    }

    fn forget_house(&self, house_id: ConnectionId) {
        self.houses.remove(&house_id);
        self.book.lock().remove_house(house_id);
    }

    /// Bid on an item at a connected House
    pub async fn place_bid(&self, house_id: ConnectionId, item_id: ItemId, amount: Amount) -> Result<BidOutcome> {
        let house = self.house(house_id)?;
        let outcome = house.submit_bid(item_id, amount).await?;
        info!(house = %house_id, %item_id, %amount, %outcome, "Bid submitted");
        if outcome == BidOutcome::Accepted {
            self.book.lock().record_bid(ItemKey::new(house_id, item_id), amount);
        }
        Ok(outcome)
    }

    /// Wait for the next push from any House and update the item book
    pub async fn next_event(&self) -> Option<AgentEvent> {
        // holding the receiver keeps `absorb_queued` from adding to `ready`
        let mut events = self.events_rx.lock().await;
        if let Some(event) = self.ready.lock().pop_front() {
            return Some(event);
        }
        loop {
            let event = events.recv().await?;
            if let Some(event) = self.apply(event) {
                return Some(event);
            }
        }
    }

    /// Like [`next_event`](Self::next_event) but returns at once when
    /// nothing is queued
    pub fn try_next_event(&self) -> Option<AgentEvent> {
        let mut events = self.events_rx.try_lock().ok()?;
        if let Some(event) = self.ready.lock().pop_front() {
            return Some(event);
        }
        while let Ok(event) = events.try_recv() {
            if let Some(event) = self.apply(event) {
                return Some(event);
            }
        }
        None
    }

    /// Apply every queued push to the item book, keeping the events for
    /// [`next_event`](Self::next_event)
    ///
    /// Does nothing while another task is waiting in `next_event`; that
    /// task applies pushes as they arrive.
    fn absorb_queued(&self) {
        let Ok(mut events) = self.events_rx.try_lock() else {
            return;
        };
        while let Ok(event) = events.try_recv() {
            if let Some(event) = self.apply(event) {
                self.ready.lock().push_back(event);
            }
        }
    }

    fn apply(&self, event: HouseEvent) -> Option<AgentEvent> {
        match event {
            HouseEvent::Notice {
                house_id,
                notification: Notification::Outbid(item_id),
            } => {
                let key = ItemKey::new(house_id, item_id);
                self.book.lock().record_outbid(key);
                info!(house = %house_id, %item_id, "Outbid");
                Some(AgentEvent::Outbid(key))
            }
            HouseEvent::Notice {
                house_id,
                notification: Notification::Won(item_id),
            } => {
                let key = ItemKey::new(house_id, item_id);
                let won = self.book.lock().record_won(key)?;
                info!(house = %house_id, %item_id, amount = %won.amount, "Won");
                Some(AgentEvent::Won(won))
            }
            HouseEvent::Closed { house_id } => {
                self.forget_house(house_id);
                Some(AgentEvent::HouseClosed(house_id))
            }
        }
    }

    pub fn open_items(&self) -> Vec<AuctionSnapshot> {
        self.book.lock().open_items()
    }

    pub fn won_items(&self) -> Vec<WonItem> {
        self.book.lock().won_items()
    }

    pub async fn balance(&self) -> Result<BalanceInfo> {
        self.bank.balance().await
    }

    /// Pay the House for a won item out of blocked funds
    pub async fn pay_for(&self, house_id: ConnectionId, item_id: ItemId) -> Result<TransferOutcome> {
        let key = ItemKey::new(house_id, item_id);
        let amount = self.book.lock().begin_payment(key)?;

        let outcome = self.bank.transfer(house_id, amount).await;
        let paid = matches!(outcome, Ok(TransferOutcome::Success));
        self.book.lock().finish_payment(key, paid);
        if paid {
            info!(house = %house_id, %item_id, %amount, "Paid for item");
        }
        outcome
    }

    /// Refuse to leave while leading a bid or owing for a won item
    pub async fn ensure_can_shutdown(&self) -> Result<()> {
        self.refresh_auctions().await;
        self.absorb_queued();

        let book = self.book.lock();
        let leading = book.leading_items(self.agent_id());
        if !leading.is_empty() {
            return Err(GavelError::ShutdownRefused {
                reason: format!("still the highest bidder on {} item(s)", leading.len()),
            }
            .into());
        }
        let unpaid = book.unpaid();
        if !unpaid.is_empty() {
            return Err(GavelError::ShutdownRefused {
                reason: format!("{} won item(s) not paid for", unpaid.len()),
            }
            .into());
        }
        Ok(())
    }

    /// Disconnect from every House and the Bank, if allowed
    pub async fn shutdown(&self) -> Result<()> {
        self.ensure_can_shutdown().await?;
        let houses: Vec<Arc<HouseConnection>> = self.houses.iter().map(|h| h.value().clone()).collect();
        for house in houses {
            if let Err(e) = house.disconnect().await {
                warn!(house = %house.house_id(), error = %e, "House goodbye failed");
            }
        }
        self.houses.clear();
        self.bank.disconnect().await
    }
}
