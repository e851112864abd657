//! Agent → Bank channel

use std::time::Duration;

use gavel_types::{
    AgentRegistration, Amount, BalanceInfo, ConnectionId, HouseDirectoryEntry, TransferOutcome,
    TransferRequest,
};
use gavel_wire::{framed, AgentBankCommand, FrameReader, FrameWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{AgentError, Result};

struct Conn {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
}

/// The agent's account connection; one request at a time
pub struct BankChannel {
    agent_id: ConnectionId,
    conn: Mutex<Conn>,
}

impl BankChannel {
    /// Connect, register and wait for the account id within `timeout`
    pub async fn register(addr: &str, name: &str, balance: Amount, timeout: Duration) -> Result<Self> {
        let attempt = async {
            let stream = TcpStream::connect(addr)
                .await
                .map_err(|source| AgentError::Connect {
                    addr: addr.to_string(),
                    source,
                })?;
            let _ = stream.set_nodelay(true);
            let (mut reader, mut writer) = framed(stream);
            writer
                .write_json(&AgentRegistration {
                    name: name.to_string(),
                    balance,
                })
                .await?;
            writer.flush().await?;
            let raw = reader.read_code().await?;
            let agent_id = ConnectionId::from_wire(raw).ok_or(AgentError::RegistrationRefused)?;
            Ok::<_, AgentError>(Self {
                agent_id,
                conn: Mutex::new(Conn { reader, writer }),
            })
        };

        let channel = tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| AgentError::Timeout {
                addr: addr.to_string(),
                timeout,
            })??;
        info!(connection_id = %channel.agent_id, %name, %balance, "Registered with bank");
        Ok(channel)
    }

    pub fn agent_id(&self) -> ConnectionId {
        self.agent_id
    }

    /// Houses currently registered with the Bank
    pub async fn houses(&self) -> Result<Vec<HouseDirectoryEntry>> {
        let mut conn = self.conn.lock().await;
        conn.writer.write_tag(AgentBankCommand::Directory.tag()).await?;
        conn.writer.flush().await?;
        let houses = conn.reader.read_list().await?;
        debug!(count = houses.len(), "House directory received");
        Ok(houses)
    }

    pub async fn balance(&self) -> Result<BalanceInfo> {
        let mut conn = self.conn.lock().await;
        conn.writer.write_tag(AgentBankCommand::Balance.tag()).await?;
        conn.writer.flush().await?;
        Ok(conn.reader.read_json().await?)
    }

    /// Pay a House out of blocked funds
    pub async fn transfer(&self, house_id: ConnectionId, amount: Amount) -> Result<TransferOutcome> {
        let mut conn = self.conn.lock().await;
        conn.writer.write_tag(AgentBankCommand::Transfer.tag()).await?;
        conn.writer
            .write_json(&TransferRequest {
                house_id,
                agent_id: self.agent_id,
                amount,
            })
            .await?;
        conn.writer.flush().await?;
        let outcome = TransferOutcome::from_code(conn.reader.read_code().await?);
        info!(connection_id = %self.agent_id, house = %house_id, %amount, %outcome, "Transfer");
        Ok(outcome)
    }

    pub async fn disconnect(&self) -> Result<()> {
        let mut conn = self.conn.lock().await;
        conn.writer.write_tag(AgentBankCommand::Disconnect.tag()).await?;
        conn.writer.shutdown().await?;
        info!(connection_id = %self.agent_id, "Disconnected from bank");
        Ok(())
    }
}
