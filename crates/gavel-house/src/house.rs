//! The Auction House service core

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use gavel_types::{
    AuctionSnapshot, AuctionState, BidOutcome, BidRequest, ConnectionId, GavelError, ItemId,
};
use gavel_wire::framed;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::auction::{Auction, AuctionContext, Completion, SettlementPort};
use crate::catalog::Catalog;
use crate::session::{serve_agent, SessionRegistry};
use crate::{HouseConfig, HouseError, Result};

/// One Auction House
pub struct AuctionHouse {
    house_id: ConnectionId,
    config: HouseConfig,
    auctions: DashMap<ItemId, Arc<Auction>>,
    sold: DashMap<ItemId, Arc<Auction>>,
    catalog: Arc<dyn Catalog>,
    settlement: Arc<dyn SettlementPort>,
    sessions: SessionRegistry,
    ctx: AuctionContext,
    closing: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
}

impl AuctionHouse {
    /// Create the House, stock its first auctions and start the
    /// completion handler
    pub async fn start(
        house_id: ConnectionId,
        config: HouseConfig,
        catalog: Arc<dyn Catalog>,
        settlement: Arc<dyn SettlementPort>,
    ) -> Arc<Self> {
        let sessions = SessionRegistry::new();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let closing = Arc::new(AtomicBool::new(false));
        let ctx = AuctionContext {
            settlement: settlement.clone(),
            notifier: Arc::new(sessions.clone()),
            completions: completions_tx,
            tick: config.tick(),
            closing: closing.clone(),
        };
        let (shutdown, _) = watch::channel(false);

        let house = Arc::new(Self {
            house_id,
            config,
            auctions: DashMap::new(),
            sold: DashMap::new(),
            catalog,
            settlement,
            sessions,
            ctx,
            closing,
            shutdown,
        });

        house.stock(house.config.live_auctions).await;
        tokio::spawn(Self::handle_completions(Arc::downgrade(&house), completions_rx));
        house
    }

    pub fn house_id(&self) -> ConnectionId {
        self.house_id
    }

    pub fn sessions(&self) -> SessionRegistry {
        self.sessions.clone()
    }

    /// Draw up to `count` new auctions from the catalog
    async fn stock(&self, count: usize) {
        for _ in 0..count {
            match self.catalog.draw_item().await {
                Some(item) => {
                    info!(item_id = %item.item_id, title = %item.title, min_bid = %item.reference_price, "New auction");
                    let auction = Auction::new(self.house_id, item, self.ctx.clone());
                    self.auctions.insert(auction.item_id(), auction);
                }
                None => {
                    warn!("Catalog exhausted, running fewer auctions");
                    return;
                }
            }
        }
    }

    async fn handle_completions(
        weak: std::sync::Weak<Self>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        while let Some(completion) = completions.recv().await {
            let Some(house) = weak.upgrade() else {
                return;
            };
            house.item_sold(completion).await;
        }
    }

    async fn item_sold(&self, completion: Completion) {
        info!(
            item_id = %completion.item_id,
            connection_id = %completion.winner,
            amount = %completion.amount,
            "Item sold"
        );
        if let Some((item_id, auction)) = self.auctions.remove(&completion.item_id) {
            self.sold.insert(item_id, auction);
        }
        self.catalog.mark_sold(completion.item_id).await;
        if !self.closing.load(Ordering::Acquire) {
            self.stock(1).await;
        }
    }

    /// Snapshots of every live auction, ordered by item id
    pub async fn list(&self) -> Vec<AuctionSnapshot> {
        let mut live: Vec<Arc<Auction>> = self.auctions.iter().map(|a| a.value().clone()).collect();
        live.sort_by_key(|a| a.item_id());

        let mut snapshots = Vec::with_capacity(live.len());
        for auction in live {
            if auction.state().await != AuctionState::Complete {
                snapshots.push(auction.snapshot().await);
            }
        }
        snapshots
    }

    /// Route a bid to its auction
    pub async fn place_bid(&self, request: &BidRequest) -> BidOutcome {
        if self.closing.load(Ordering::Acquire) {
            return BidOutcome::Error;
        }
        let auction = match self.auctions.get(&request.item_id) {
            Some(auction) => auction.value().clone(),
            None => {
                let e = GavelError::UnknownItem {
                    item_id: request.item_id,
                };
                warn!(connection_id = %request.account_id, error = %e, "Bid refused");
                return BidOutcome::Error;
            }
        };
        auction.place_bid(request.account_id, request.amount).await
    }

    /// Items sold since the House started
    pub fn sold_items(&self) -> Vec<ItemId> {
        let mut items: Vec<ItemId> = self.sold.iter().map(|e| *e.key()).collect();
        items.sort();
        items
    }

    /// Whether any auction has a bid on it and a running countdown
    pub async fn has_active_auctions(&self) -> bool {
        let live: Vec<Arc<Auction>> = self.auctions.iter().map(|a| a.value().clone()).collect();
        for auction in live {
            if auction.state().await == AuctionState::Active {
                return true;
            }
        }
        false
    }

    /// Shut down unless a sale is in progress
    ///
    /// New bids are refused while the check runs; if an auction is active
    /// the House reopens and nothing else changes.
    pub async fn attempt_shutdown(&self) -> Result<()> {
        if self.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if self.has_active_auctions().await {
            self.closing.store(false, Ordering::Release);
            let e = GavelError::ShutdownRefused {
                reason: "auctions are still in progress".to_string(),
            };
            warn!(error = %e, "Shutdown refused");
            return Err(e.into());
        }

        info!(agents = self.sessions.len(), "Shutting down auction house");
        self.sessions.disconnect_all();
        self.settlement.disconnect().await;
        self.shutdown.send_replace(true);
        Ok(())
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Bind the agent listener from the configuration
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.config.listen_host, self.config.listen_port);
        let bound = TcpListener::bind(addr.as_str()).await;
        match bound {
            Ok(listener) => Ok(listener),
            Err(source) => Err(HouseError::Bind { addr, source }),
        }
    }

    /// Accept agents until the House shuts down
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.shutdown.subscribe();
        info!(connection_id = %self.house_id, addr = ?listener.local_addr().ok(), "Listening for agents");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        let (reader, writer) = framed(stream);
                        let house = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(e) = serve_agent(house, reader, writer).await {
                                warn!(%peer, error = %e, "Agent session ended with error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "Accept failed"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Agent listener stopped");
                        return;
                    }
                }
            }
        }
    }
}
