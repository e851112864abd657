//! Agent sessions
//!
//! Each connected agent gets a reader (the session loop) and a single
//! writer task. Everything that goes out on the socket, replies and pushes
//! alike, is queued on the session's mailbox, so frames never interleave.

use std::sync::Arc;

use dashmap::DashMap;
use gavel_types::{AuctionSnapshot, BidOutcome, BidRequest, ConnectionId, GavelError, Notification};
use gavel_wire::{AgentHouseCommand, FrameReader, FrameWriter, HouseAgentFrame, WireError, WireResult};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::auction::Notifier;
use crate::house::AuctionHouse;
use crate::Result;

/// A frame queued for an agent
#[derive(Debug, Clone)]
pub enum Outbound {
    ListReply(Vec<AuctionSnapshot>),
    BidReply(BidOutcome),
    Push(Notification),
    Disconnect,
}

type Mailbox = mpsc::UnboundedSender<Outbound>;

/// Mailboxes of connected agents
#[derive(Clone, Default)]
pub struct SessionRegistry {
    mailboxes: Arc<DashMap<ConnectionId, Mailbox>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a mailbox for an agent, replacing any older one
    pub fn register(&self, agent: ConnectionId) -> (Mailbox, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.mailboxes.insert(agent, tx.clone()).is_some() {
            warn!(connection_id = %agent, "Agent reconnected, replacing previous session");
        }
        (tx, rx)
    }

    /// Close an agent's mailbox if it is still the given one
    pub fn deregister(&self, agent: ConnectionId, mailbox: &Mailbox) {
        self.mailboxes
            .remove_if(&agent, |_, current| current.same_channel(mailbox));
    }

    pub fn send(&self, agent: ConnectionId, frame: Outbound) -> bool {
        match self.mailboxes.get(&agent) {
            Some(mailbox) => mailbox.send(frame).is_ok(),
            None => false,
        }
    }

    /// Ask every session to say goodbye and close
    pub fn disconnect_all(&self) {
        for mailbox in self.mailboxes.iter() {
            let _ = mailbox.value().send(Outbound::Disconnect);
        }
    }

    pub fn len(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mailboxes.is_empty()
    }
}

impl Notifier for SessionRegistry {
    fn notify(&self, agent: ConnectionId, notification: Notification) {
        if !self.send(agent, Outbound::Push(notification)) {
            debug!(connection_id = %agent, ?notification, "Agent not connected, push dropped");
        }
    }
}

/// Serve one agent connection until it disconnects
pub async fn serve_agent<R, W>(
    house: Arc<AuctionHouse>,
    mut reader: FrameReader<R>,
    writer: FrameWriter<W>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let raw = reader.read_code().await?;
    let agent = ConnectionId::from_wire(raw).ok_or_else(|| GavelError::HandshakeFailed {
        reason: format!("invalid agent id {}", raw),
    })?;

    let sessions = house.sessions();
    let (mailbox, outbox) = sessions.register(agent);
    let writer_task = tokio::spawn(write_frames(agent, writer, outbox));
    info!(connection_id = %agent, "Agent connected");

    let result = read_commands(&house, agent, &mut reader, &mailbox).await;

    sessions.deregister(agent, &mailbox);
    drop(mailbox);
    let _ = writer_task.await;
    info!(connection_id = %agent, "Agent session closed");
    result
}

async fn read_commands<R>(
    house: &Arc<AuctionHouse>,
    agent: ConnectionId,
    reader: &mut FrameReader<R>,
    mailbox: &Mailbox,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let tag = match reader.read_tag().await {
            Ok(tag) => tag,
            Err(WireError::Closed) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let reply = match AgentHouseCommand::from_tag(tag) {
            Some(AgentHouseCommand::List) => Outbound::ListReply(house.list().await),
            Some(AgentHouseCommand::Bid) => match reader.read_json::<BidRequest>().await {
                Ok(request) => {
                    if request.account_id != agent {
                        warn!(connection_id = %agent, account = %request.account_id, "Bid names another account");
                    }
                    Outbound::BidReply(house.place_bid(&request).await)
                }
                Err(e) if e.is_recoverable() => {
                    warn!(connection_id = %agent, error = %e, "Malformed bid");
                    Outbound::BidReply(BidOutcome::Error)
                }
                Err(e) => return Err(e.into()),
            },
            Some(AgentHouseCommand::Disconnect) => {
                debug!(connection_id = %agent, "Agent said goodbye");
                return Ok(());
            }
            None => {
                warn!(connection_id = %agent, tag, "Unknown command from agent");
                continue;
            }
        };

        if mailbox.send(reply).is_err() {
            // writer task is gone, so is the socket
            return Ok(());
        }
    }
}

async fn write_frames<W>(
    agent: ConnectionId,
    mut writer: FrameWriter<W>,
    mut outbox: mpsc::UnboundedReceiver<Outbound>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbox.recv().await {
        let closing = matches!(frame, Outbound::Disconnect);
        if let Err(e) = write_frame(&mut writer, frame).await {
            warn!(connection_id = %agent, error = %e, "Write to agent failed");
            return;
        }
        if closing {
            let _ = writer.shutdown().await;
            return;
        }
    }
}

async fn write_frame<W>(writer: &mut FrameWriter<W>, frame: Outbound) -> WireResult<()>
where
    W: AsyncWrite + Unpin,
{
    match frame {
        Outbound::ListReply(snapshots) => {
            writer.write_tag(HouseAgentFrame::ListReply.tag()).await?;
            writer.write_list(&snapshots).await?;
        }
        Outbound::BidReply(outcome) => {
            writer.write_tag(HouseAgentFrame::BidReply.tag()).await?;
            writer.write_code(outcome.code()).await?;
        }
        Outbound::Push(Notification::Outbid(item_id)) => {
            writer.write_tag(HouseAgentFrame::Outbid.tag()).await?;
            writer.write_code(item_id.to_wire()).await?;
        }
        Outbound::Push(Notification::Won(item_id)) => {
            writer.write_tag(HouseAgentFrame::Won.tag()).await?;
            writer.write_code(item_id.to_wire()).await?;
        }
        Outbound::Disconnect => {
            writer.write_tag(HouseAgentFrame::Disconnect.tag()).await?;
        }
    }
    writer.flush().await
}
