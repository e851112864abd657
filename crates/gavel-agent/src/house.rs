//! Agent → House connection
//!
//! The reader task owns the read half. Replies (tagged `a` and `b`) go to
//! whichever request is waiting; pushes (`o`, `w`, `0`) go to the shared
//! event channel.

use std::sync::Arc;
use std::time::Duration;

use gavel_types::{
    Amount, AuctionSnapshot, BidOutcome, BidRequest, ConnectionId, GavelError,
    HouseDirectoryEntry, ItemId, Notification,
};
use gavel_wire::{
    framed, AgentHouseCommand, FrameReader, FrameWriter, HouseAgentFrame, WireError, WireResult,
};
use parking_lot::Mutex as SyncMutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{AgentError, Result};

/// Something a House did on its own initiative
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HouseEvent {
    Notice {
        house_id: ConnectionId,
        notification: Notification,
    },
    /// The House said goodbye or the connection dropped
    Closed { house_id: ConnectionId },
}

enum Request {
    List,
    Bid(BidRequest),
}

#[derive(Debug)]
enum Reply {
    List(Vec<AuctionSnapshot>),
    Bid(BidOutcome),
}

/// Where the reader task hands a reply to the waiting request
///
/// `closed` lives under the same lock as the waiter so a request can never
/// park a waiter after the reader has stopped looking.
#[derive(Default)]
struct ReplySlot {
    waiter: Option<oneshot::Sender<Reply>>,
    closed: bool,
}

impl ReplySlot {
    /// Park a waiter; `false` once the reader has stopped
    fn install(&mut self, waiter: oneshot::Sender<Reply>) -> bool {
        if self.closed {
            return false;
        }
        self.waiter = Some(waiter);
        true
    }

    /// Drop any waiter, waking it with an error, and refuse new ones
    fn close(&mut self) {
        self.closed = true;
        self.waiter = None;
    }
}

type Pending = Arc<SyncMutex<ReplySlot>>;

/// One open connection to a House
pub struct HouseConnection {
    house_id: ConnectionId,
    agent_id: ConnectionId,
    writer: Mutex<FrameWriter<OwnedWriteHalf>>,
    pending: Pending,
    reader_task: JoinHandle<()>,
}

impl HouseConnection {
    /// Connect and identify as `agent_id`
    pub async fn connect(
        entry: &HouseDirectoryEntry,
        agent_id: ConnectionId,
        events: mpsc::UnboundedSender<HouseEvent>,
        timeout: Duration,
    ) -> Result<Self> {
        let addr = entry.address();
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr.as_str())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(AgentError::Connect { addr, source }),
            Err(_) => return Err(AgentError::Timeout { addr, timeout }),
        };
        let _ = stream.set_nodelay(true);
        let (reader, mut writer) = framed(stream);
        writer.write_code(agent_id.to_wire()).await?;
        writer.flush().await?;

        let pending: Pending = Arc::new(SyncMutex::new(ReplySlot::default()));
        let reader_task = tokio::spawn(read_frames(entry.house_id, reader, pending.clone(), events));
        info!(house = %entry.house_id, %addr, "Connected to house");

        Ok(Self {
            house_id: entry.house_id,
            agent_id,
            writer: Mutex::new(writer),
            pending,
            reader_task,
        })
    }

    pub fn house_id(&self) -> ConnectionId {
        self.house_id
    }

    pub fn is_open(&self) -> bool {
        !self.pending.lock().closed && !self.reader_task.is_finished()
    }

    /// Live auctions at this House
    pub async fn list(&self) -> Result<Vec<AuctionSnapshot>> {
        match self.request(Request::List).await? {
            Reply::List(snapshots) => Ok(snapshots),
            Reply::Bid(_) => Err(self.closed()),
        }
    }

    /// Bid `amount` on `item_id` with the agent's own account
    pub async fn submit_bid(&self, item_id: ItemId, amount: Amount) -> Result<BidOutcome> {
        let bid = BidRequest {
            item_id,
            amount,
            account_id: self.agent_id,
        };
        match self.request(Request::Bid(bid)).await? {
            Reply::Bid(outcome) => Ok(outcome),
            Reply::List(_) => Err(self.closed()),
        }
    }

    /// Send one request and wait for its tagged reply
    async fn request(&self, request: Request) -> Result<Reply> {
        let mut writer = self.writer.lock().await;
        let (tx, rx) = oneshot::channel();
        if !self.pending.lock().install(tx) {
            return Err(self.closed());
        }

        match &request {
            Request::List => {
                writer.write_tag(AgentHouseCommand::List.tag()).await?;
            }
            Request::Bid(bid) => {
                writer.write_tag(AgentHouseCommand::Bid.tag()).await?;
                writer.write_json(bid).await?;
            }
        }
        writer.flush().await?;

        // writer stays locked until the reply lands so requests never overlap
        let reply = rx.await.map_err(|_| self.closed())?;
        drop(writer);
        Ok(reply)
    }

    fn closed(&self) -> AgentError {
        GavelError::ConnectionClosed {
            peer: self.house_id.to_string(),
        }
        .into()
    }

    /// Say goodbye to the House
    pub async fn disconnect(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_tag(AgentHouseCommand::Disconnect.tag()).await?;
        writer.shutdown().await?;
        info!(house = %self.house_id, "Disconnected from house");
        Ok(())
    }
}

impl Drop for HouseConnection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_frames(
    house_id: ConnectionId,
    mut reader: FrameReader<OwnedReadHalf>,
    pending: Pending,
    events: mpsc::UnboundedSender<HouseEvent>,
) {
    if let Err(e) = demux(house_id, &mut reader, &pending, &events).await {
        match e {
            WireError::Closed => debug!(house = %house_id, "House closed connection"),
            e => warn!(house = %house_id, error = %e, "House connection failed"),
        }
    }
    pending.lock().close();
    let _ = events.send(HouseEvent::Closed { house_id });
}

async fn demux(
    house_id: ConnectionId,
    reader: &mut FrameReader<OwnedReadHalf>,
    pending: &Pending,
    events: &mpsc::UnboundedSender<HouseEvent>,
) -> WireResult<()> {
    loop {
        let tag = reader.read_tag().await?;
        match HouseAgentFrame::from_tag(tag) {
            Some(HouseAgentFrame::ListReply) => {
                let snapshots = reader.read_list().await?;
                deliver(house_id, pending, Reply::List(snapshots));
            }
            Some(HouseAgentFrame::BidReply) => {
                let outcome = BidOutcome::from_code(reader.read_code().await?);
                deliver(house_id, pending, Reply::Bid(outcome));
            }
            Some(HouseAgentFrame::Outbid) | Some(HouseAgentFrame::Won) => {
                let raw = reader.read_code().await?;
                let Some(item_id) = ItemId::from_wire(raw) else {
                    warn!(house = %house_id, raw, "Push for invalid item id");
                    continue;
                };
                let notification = if tag == HouseAgentFrame::Won.tag() {
                    Notification::Won(item_id)
                } else {
                    Notification::Outbid(item_id)
                };
                debug!(house = %house_id, ?notification, "Push received");
                let _ = events.send(HouseEvent::Notice {
                    house_id,
                    notification,
                });
            }
            Some(HouseAgentFrame::Disconnect) => {
                info!(house = %house_id, "House said goodbye");
                return Ok(());
            }
            None => warn!(house = %house_id, tag, "Unknown frame from house"),
        }
    }
}

fn deliver(house_id: ConnectionId, pending: &Pending, reply: Reply) {
    match pending.lock().waiter.take() {
        Some(waiter) => {
            let _ = waiter.send(reply);
        }
        None => warn!(house = %house_id, ?reply, "Reply with no request waiting"),
    }
}
