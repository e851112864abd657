//! House → Bank settlement link

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use gavel_types::{Amount, ConnectionId, FundsOutcome, FundsRequest, HouseRegistration};
use gavel_wire::{framed, FrameReader, FrameWriter, HouseBankCommand, WireResult};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::auction::SettlementPort;
use crate::{HouseError, Result};

struct Conn<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
}

/// The House's single connection to the Bank
///
/// One request is in flight at a time: the mutex is held from writing the
/// request until its reply code has been read. After an I/O failure the
/// link is considered broken and every later request fails fast.
pub struct BankLink<R = OwnedReadHalf, W = OwnedWriteHalf> {
    house_id: ConnectionId,
    conn: Mutex<Conn<R, W>>,
    broken: AtomicBool,
}

impl BankLink {
    /// Connect to the Bank and register, all within `timeout`
    pub async fn connect(addr: &str, registration: &HouseRegistration, timeout: Duration) -> Result<Self> {
        let attempt = async {
            let stream = TcpStream::connect(addr)
                .await
                .map_err(|source| HouseError::Connect {
                    addr: addr.to_string(),
                    source,
                })?;
            let _ = stream.set_nodelay(true);
            let (reader, writer) = framed(stream);
            Self::register(reader, writer, registration).await
        };
        match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(HouseError::Timeout {
                addr: addr.to_string(),
                timeout,
            }),
        }
    }
}

impl<R, W> BankLink<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Send the `{ip, port}` handshake and wait for the assigned id
    pub async fn register(
        mut reader: FrameReader<R>,
        mut writer: FrameWriter<W>,
        registration: &HouseRegistration,
    ) -> Result<Self> {
        writer.write_json(registration).await?;
        writer.flush().await?;
        let raw = reader.read_code().await?;
        let house_id = ConnectionId::from_wire(raw).ok_or_else(|| HouseError::Registration {
            reason: format!("bank answered {}", raw),
        })?;
        info!(connection_id = %house_id, ip = %registration.ip, port = registration.port, "Registered with bank");
        Ok(Self {
            house_id,
            conn: Mutex::new(Conn { reader, writer }),
            broken: AtomicBool::new(false),
        })
    }

    pub fn house_id(&self) -> ConnectionId {
        self.house_id
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    async fn request(&self, command: HouseBankCommand, account: ConnectionId, amount: Amount) -> Option<i32> {
        if self.is_broken() {
            debug!(?command, "Bank link broken, failing fast");
            return None;
        }
        let mut conn = self.conn.lock().await;
        let result: WireResult<i32> = async {
            conn.writer.write_tag(command.tag()).await?;
            conn.writer
                .write_json(&FundsRequest {
                    account_id: account,
                    amount,
                })
                .await?;
            conn.writer.flush().await?;
            conn.reader.read_code().await
        }
        .await;

        match result {
            Ok(code) => Some(code),
            Err(e) => {
                error!(?command, account = %account, %amount, error = %e, "Bank link failed");
                self.broken.store(true, Ordering::Release);
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl<R, W> SettlementPort for BankLink<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn request_block(&self, account: ConnectionId, amount: Amount) -> FundsOutcome {
        match self.request(HouseBankCommand::Block, account, amount).await {
            Some(code) => FundsOutcome::from_block_code(code),
            None => FundsOutcome::CommFailure,
        }
    }

    async fn request_unblock(&self, account: ConnectionId, amount: Amount) -> FundsOutcome {
        match self.request(HouseBankCommand::Unblock, account, amount).await {
            Some(code) => FundsOutcome::from_unblock_code(code),
            None => FundsOutcome::CommFailure,
        }
    }

    async fn disconnect(&self) {
        if self.is_broken() {
            return;
        }
        let mut conn = self.conn.lock().await;
        let sent: WireResult<()> = async {
            conn.writer.write_tag(HouseBankCommand::Disconnect.tag()).await?;
            conn.writer.shutdown().await
        }
        .await;
        if let Err(e) = sent {
            warn!(error = %e, "Could not say goodbye to bank");
        }
        self.broken.store(true, Ordering::Release);
        info!(connection_id = %self.house_id, "Disconnected from bank");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    type Far = (FrameReader<DuplexStream>, FrameWriter<DuplexStream>);

    async fn linked() -> (BankLink<DuplexStream, DuplexStream>, Far) {
        let (near_read, far_write) = tokio::io::duplex(4096);
        let (far_read, near_write) = tokio::io::duplex(4096);
        let mut far = (FrameReader::new(far_read), FrameWriter::new(far_write));

        let registration = HouseRegistration {
            ip: "127.0.0.1".to_string(),
            port: 5000,
        };
        let register = BankLink::register(
            FrameReader::new(near_read),
            FrameWriter::new(near_write),
            &registration,
        );
        let bank = async {
            let seen: HouseRegistration = far.0.read_json().await.unwrap();
            assert_eq!(seen.port, 5000);
            far.1.write_code(3).await.unwrap();
            far.1.flush().await.unwrap();
        };
        let (link, ()) = tokio::join!(register, bank);
        (link.unwrap(), far)
    }

    #[tokio::test]
    async fn test_registration_assigns_id() {
        let (link, _far) = linked().await;
        assert_eq!(link.house_id(), ConnectionId::new(3));
        assert!(!link.is_broken());
    }

    #[tokio::test]
    async fn test_block_and_unblock_codes() {
        let (link, mut far) = linked().await;
        let bank = tokio::spawn(async move {
            for code in [1, 0, -1] {
                assert_eq!(far.0.read_tag().await.unwrap(), b'b');
                let request: FundsRequest = far.0.read_json().await.unwrap();
                assert_eq!(request.account_id, ConnectionId::new(7));
                far.1.write_code(code).await.unwrap();
                far.1.flush().await.unwrap();
            }
            assert_eq!(far.0.read_tag().await.unwrap(), b'u');
            let _: FundsRequest = far.0.read_json().await.unwrap();
            far.1.write_code(-1).await.unwrap();
            far.1.flush().await.unwrap();
            far
        });

        let account = ConnectionId::new(7);
        assert_eq!(link.request_block(account, Amount::new(5)).await, FundsOutcome::Accepted);
        assert_eq!(link.request_block(account, Amount::new(5)).await, FundsOutcome::Insufficient);
        assert_eq!(link.request_block(account, Amount::new(5)).await, FundsOutcome::CommFailure);
        assert_eq!(link.request_unblock(account, Amount::new(5)).await, FundsOutcome::Insufficient);
        bank.await.unwrap();
        assert!(!link.is_broken());
    }

    #[tokio::test]
    async fn test_dead_bank_breaks_link() {
        let (link, far) = linked().await;
        drop(far);

        let account = ConnectionId::new(7);
        assert_eq!(link.request_block(account, Amount::new(5)).await, FundsOutcome::CommFailure);
        assert!(link.is_broken());
        assert_eq!(link.request_unblock(account, Amount::new(5)).await, FundsOutcome::CommFailure);
    }

    #[tokio::test]
    async fn test_bad_registration_reply() {
        let (near_read, far_write) = tokio::io::duplex(4096);
        let (_far_read, near_write) = tokio::io::duplex(4096);
        let mut far_writer = FrameWriter::new(far_write);
        far_writer.write_code(-1).await.unwrap();
        far_writer.flush().await.unwrap();

        let result = BankLink::register(
            FrameReader::new(near_read),
            FrameWriter::new(near_write),
            &HouseRegistration {
                ip: "127.0.0.1".to_string(),
                port: 5000,
            },
        )
        .await;
        assert!(matches!(result, Err(HouseError::Registration { .. })));
    }
}
