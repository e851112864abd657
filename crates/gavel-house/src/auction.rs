//! Auction state machine
//!
//! ```text
//!   Pending ──first accepted bid──► Active ──countdown hits zero──► Complete
//!                                    │  ▲
//!                                    └──┘ later accepted bid (countdown restarts)
//! ```
//!
//! Bids, countdown ticks and snapshot reads of one auction all go through
//! the same async mutex. A countdown task carries the generation it was
//! started with and does nothing once a newer bid has bumped the counter,
//! so an aborted timer that already woke can never act.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gavel_types::{
    Amount, AuctionSnapshot, AuctionState, BidOutcome, ConnectionId, FundsOutcome, ItemId,
    Notification, COUNTDOWN_TICKS,
};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use crate::catalog::CatalogItem;

/// The House's view of the Bank
#[async_trait::async_trait]
pub trait SettlementPort: Send + Sync {
    /// Reserve `amount` of the bidder's balance
    async fn request_block(&self, account: ConnectionId, amount: Amount) -> FundsOutcome;

    /// Release `amount` of the account's blocked funds
    async fn request_unblock(&self, account: ConnectionId, amount: Amount) -> FundsOutcome;

    /// Say goodbye to the Bank
    async fn disconnect(&self);
}

/// Delivers pushes to connected agents without blocking
pub trait Notifier: Send + Sync {
    fn notify(&self, agent: ConnectionId, notification: Notification);
}

/// Emitted exactly once per auction when its countdown runs out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub item_id: ItemId,
    pub winner: ConnectionId,
    pub amount: Amount,
}

/// Everything an auction needs from its House
#[derive(Clone)]
pub struct AuctionContext {
    pub settlement: Arc<dyn SettlementPort>,
    pub notifier: Arc<dyn Notifier>,
    pub completions: mpsc::UnboundedSender<Completion>,
    pub tick: Duration,
    /// Set while the House is deciding whether it may shut down
    pub closing: Arc<AtomicBool>,
}

struct AuctionInner {
    state: AuctionState,
    current_bid: Amount,
    current_bidder: Option<ConnectionId>,
    time_left: u32,
    generation: u64,
    countdown: Option<JoinHandle<()>>,
}

/// One item on sale
pub struct Auction {
    item_id: ItemId,
    house_id: ConnectionId,
    name: String,
    desc: String,
    min_bid: Amount,
    inner: Mutex<AuctionInner>,
    ctx: AuctionContext,
}

impl Auction {
    pub fn new(house_id: ConnectionId, item: CatalogItem, ctx: AuctionContext) -> Arc<Self> {
        Arc::new(Self {
            item_id: item.item_id,
            house_id,
            name: item.title,
            desc: item.category,
            min_bid: item.reference_price,
            inner: Mutex::new(AuctionInner {
                state: AuctionState::Pending,
                current_bid: Amount::zero(),
                current_bidder: None,
                time_left: 0,
                generation: 0,
                countdown: None,
            }),
            ctx,
        })
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    pub fn min_bid(&self) -> Amount {
        self.min_bid
    }

    pub async fn state(&self) -> AuctionState {
        self.inner.lock().await.state
    }

    pub async fn snapshot(&self) -> AuctionSnapshot {
        let inner = self.inner.lock().await;
        AuctionSnapshot {
            item_id: self.item_id,
            name: self.name.clone(),
            desc: self.desc.clone(),
            house_id: self.house_id,
            min_bid: self.min_bid,
            current_bid: inner.current_bid,
            time_left: inner.time_left,
            current_bidder_id: inner.current_bidder,
        }
    }

    /// Validate, fund and accept a bid
    ///
    /// Bids below the minimum or the current bid are refused without
    /// contacting the Bank. Otherwise the amount is blocked and, on
    /// success, the bid becomes current.
    pub async fn place_bid(self: &Arc<Self>, bidder: ConnectionId, amount: Amount) -> BidOutcome {
        let mut inner = self.inner.lock().await;

        // re-checked under the lock; the House may have started closing
        // after routing this bid
        if self.ctx.closing.load(Ordering::Acquire) {
            debug!(item_id = %self.item_id, connection_id = %bidder, "Bid while house is closing");
            return BidOutcome::Error;
        }
        if inner.state == AuctionState::Complete {
            debug!(item_id = %self.item_id, connection_id = %bidder, "Bid on closed auction");
            return BidOutcome::Error;
        }
        if amount < self.min_bid || amount < inner.current_bid {
            debug!(
                item_id = %self.item_id,
                connection_id = %bidder,
                %amount,
                current_bid = %inner.current_bid,
                min_bid = %self.min_bid,
                "Bid too low"
            );
            return BidOutcome::Superseded;
        }

        let funds = self.ctx.settlement.request_block(bidder, amount).await;
        if !funds.is_accepted() {
            info!(item_id = %self.item_id, connection_id = %bidder, %amount, outcome = %funds, "Bid not funded");
            return funds.into();
        }

        self.accept_bid(&mut inner, bidder, amount).await;
        BidOutcome::Accepted
    }

    async fn accept_bid(self: &Arc<Self>, inner: &mut AuctionInner, bidder: ConnectionId, amount: Amount) {
        if let Some(previous) = inner.current_bidder {
            if previous != bidder {
                self.ctx
                    .notifier
                    .notify(previous, Notification::Outbid(self.item_id));
            }
            let released = self
                .ctx
                .settlement
                .request_unblock(previous, inner.current_bid)
                .await;
            if !released.is_accepted() {
                warn!(
                    item_id = %self.item_id,
                    connection_id = %previous,
                    amount = %inner.current_bid,
                    outcome = %released,
                    "Could not release previous bid"
                );
            }
        }

        inner.current_bid = amount;
        inner.current_bidder = Some(bidder);
        inner.state = AuctionState::Active;
        inner.time_left = COUNTDOWN_TICKS;
        inner.generation += 1;
        if let Some(countdown) = inner.countdown.take() {
            countdown.abort();
        }
        let auction = Arc::clone(self);
        let generation = inner.generation;
        inner.countdown = Some(tokio::spawn(async move {
            auction.run_countdown(generation).await;
        }));

        info!(item_id = %self.item_id, connection_id = %bidder, %amount, "Bid accepted");
    }

    async fn run_countdown(self: Arc<Self>, generation: u64) {
        let tick = self.ctx.tick;
        let mut ticks = interval_at(Instant::now() + tick, tick);
        loop {
            ticks.tick().await;
            let mut inner = self.inner.lock().await;
            if inner.generation != generation || inner.state != AuctionState::Active {
                return;
            }
            inner.time_left = inner.time_left.saturating_sub(1);
            if inner.time_left > 0 {
                continue;
            }

            inner.state = AuctionState::Complete;
            inner.countdown = None;
            if let Some(winner) = inner.current_bidder {
                info!(item_id = %self.item_id, connection_id = %winner, amount = %inner.current_bid, "Auction won");
                self.ctx.notifier.notify(winner, Notification::Won(self.item_id));
                let completion = Completion {
                    item_id: self.item_id,
                    winner,
                    amount: inner.current_bid,
                };
                if self.ctx.completions.send(completion).is_err() {
                    warn!(item_id = %self.item_id, "House is gone, completion dropped");
                }
            }
            return;
        }
    }
}
