//! Per-connection session handlers
//!
//! A session owns both halves of its connection and answers requests one at
//! a time, so replies on one connection can never interleave.

use gavel_ledger::LedgerError;
use gavel_types::{
    AgentRegistration, Amount, BalanceInfo, ConnectionId, FundsOutcome, FundsRequest,
    HouseDirectoryEntry, HouseRegistration, TransferOutcome, TransferRequest,
};
use gavel_wire::{AgentBankCommand, FrameReader, FrameWriter, HouseBankCommand, WireError};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::{BankError, BankState, Result};

/// Reply code when a request payload could not be decoded
const MALFORMED_CODE: i32 = -1;

/// Serve one House connection
///
/// The House's ledger account is opened by the acceptor; the session reads
/// the `{ip, port}` registration, answers with the id and publishes the
/// directory entry. The entry is withdrawn when the session ends, however
/// it ends.
pub async fn serve_house<R, W>(
    state: BankState,
    id: ConnectionId,
    mut reader: FrameReader<R>,
    mut writer: FrameWriter<W>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let registration: HouseRegistration = match reader.read_json().await {
        Ok(registration) => registration,
        Err(e) => {
            let _ = writer.write_code(MALFORMED_CODE).await;
            let _ = writer.flush().await;
            return Err(BankError::Handshake {
                reason: e.to_string(),
            });
        }
    };
    writer.write_code(id.to_wire()).await?;
    writer.flush().await?;

    state.directory.insert(HouseDirectoryEntry {
        house_id: id,
        ip: registration.ip.clone(),
        port: registration.port,
    });
    info!(connection_id = %id, ip = %registration.ip, port = registration.port, "House registered");

    let result = house_loop(&state, id, &mut reader, &mut writer).await;

    state.directory.remove(id);
    info!(connection_id = %id, "House removed from directory");
    result
}

async fn house_loop<R, W>(
    state: &BankState,
    id: ConnectionId,
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let tag = match reader.read_tag().await {
            Ok(tag) => tag,
            Err(WireError::Closed) => {
                debug!(connection_id = %id, "House closed connection");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let code = match HouseBankCommand::from_tag(tag) {
            Some(HouseBankCommand::Block) => match read_request::<_, FundsRequest>(reader).await? {
                Some(request) => block_code(state, id, &request),
                None => MALFORMED_CODE,
            },
            Some(HouseBankCommand::Unblock) => {
                match read_request::<_, FundsRequest>(reader).await? {
                    Some(request) => unblock_code(state, id, &request),
                    None => MALFORMED_CODE,
                }
            }
            Some(HouseBankCommand::Disconnect) => {
                info!(connection_id = %id, "House disconnected");
                return Ok(());
            }
            None => {
                warn!(connection_id = %id, tag, "Unknown command from house");
                continue;
            }
        };

        writer.write_code(code).await?;
        writer.flush().await?;
    }
}

fn block_code(state: &BankState, house: ConnectionId, request: &FundsRequest) -> i32 {
    let outcome = match state.ledger.block(request.account_id, request.amount) {
        Ok(_) => FundsOutcome::Accepted,
        Err(e) if e.is_rejection() => FundsOutcome::Insufficient,
        Err(e) => {
            warn!(connection_id = %house, account = %request.account_id, error = %e, "Block failed");
            FundsOutcome::CommFailure
        }
    };
    debug!(connection_id = %house, account = %request.account_id, amount = %request.amount, %outcome, "Block");
    outcome.block_code()
}

fn unblock_code(state: &BankState, house: ConnectionId, request: &FundsRequest) -> i32 {
    match state.ledger.unblock(request.account_id, request.amount) {
        Ok(_) => {
            debug!(connection_id = %house, account = %request.account_id, amount = %request.amount, "Unblock");
            1
        }
        Err(e) => {
            warn!(connection_id = %house, account = %request.account_id, amount = %request.amount, error = %e, "Unblock refused");
            -1
        }
    }
}

/// Serve one Agent connection
///
/// The account is opened only once a valid `{name, balance}` registration
/// has arrived.
pub async fn serve_agent<R, W>(
    state: BankState,
    id: ConnectionId,
    mut reader: FrameReader<R>,
    mut writer: FrameWriter<W>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let registration: AgentRegistration = match reader.read_json().await {
        Ok(registration) => registration,
        Err(e) => {
            let _ = writer.write_code(MALFORMED_CODE).await;
            let _ = writer.flush().await;
            return Err(BankError::Handshake {
                reason: e.to_string(),
            });
        }
    };
    if let Err(e) = state
        .ledger
        .open_agent_account(id, registration.name.clone(), registration.balance)
    {
        let _ = writer.write_code(MALFORMED_CODE).await;
        let _ = writer.flush().await;
        return Err(BankError::Handshake {
            reason: e.to_string(),
        });
    }
    writer.write_code(id.to_wire()).await?;
    writer.flush().await?;
    info!(connection_id = %id, name = %registration.name, balance = %registration.balance, "Agent registered");

    loop {
        let tag = match reader.read_tag().await {
            Ok(tag) => tag,
            Err(WireError::Closed) => {
                debug!(connection_id = %id, "Agent closed connection");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match AgentBankCommand::from_tag(tag) {
            Some(AgentBankCommand::Directory) => {
                let entries = state.directory.entries();
                debug!(connection_id = %id, houses = entries.len(), "Sending house directory");
                writer.write_list(&entries).await?;
            }
            Some(AgentBankCommand::Balance) => {
                let info = state.ledger.balance_info(id).unwrap_or(BalanceInfo {
                    balance: Amount::zero(),
                    blocked_funds: Amount::zero(),
                });
                writer.write_json(&info).await?;
            }
            Some(AgentBankCommand::Transfer) => {
                let code = match read_request::<_, TransferRequest>(&mut reader).await? {
                    Some(request) => transfer_code(&state, id, &request),
                    None => MALFORMED_CODE,
                };
                writer.write_code(code).await?;
            }
            Some(AgentBankCommand::Disconnect) => {
                info!(connection_id = %id, "Agent disconnected");
                return Ok(());
            }
            None => {
                warn!(connection_id = %id, tag, "Unknown command from agent");
                continue;
            }
        }
        writer.flush().await?;
    }
}

fn transfer_code(state: &BankState, agent: ConnectionId, request: &TransferRequest) -> i32 {
    if request.agent_id != agent {
        warn!(connection_id = %agent, payer = %request.agent_id, "Transfer names a different payer");
    }
    let outcome = match state
        .ledger
        .transfer_funds(request.agent_id, request.house_id, request.amount)
    {
        Ok(receipt) => {
            info!(
                connection_id = %agent,
                house = %receipt.house,
                amount = %receipt.amount,
                "Transfer settled"
            );
            TransferOutcome::Success
        }
        Err(LedgerError::SettlementStranded { .. }) => TransferOutcome::Failure,
        Err(e) => {
            warn!(connection_id = %agent, house = %request.house_id, amount = %request.amount, error = %e, "Transfer refused");
            TransferOutcome::Failure
        }
    };
    outcome.code()
}

/// Read a JSON request payload
///
/// `Ok(None)` means the payload was consumed but could not be decoded; the
/// stream is still in sync and the peer gets the error code.
async fn read_request<R, T>(reader: &mut FrameReader<R>) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: serde::de::DeserializeOwned,
{
    match reader.read_json::<T>().await {
        Ok(request) => Ok(Some(request)),
        Err(e) if e.is_recoverable() => {
            warn!(error = %e, "Dropping malformed request");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;

    struct Peer {
        reader: FrameReader<DuplexStream>,
        writer: FrameWriter<DuplexStream>,
    }

    fn spawn_agent_session(state: &BankState, id: u32) -> (Peer, JoinHandle<Result<()>>) {
        let (client_read, server_write) = tokio::io::duplex(4096);
        let (server_read, client_write) = tokio::io::duplex(4096);
        let handle = tokio::spawn(serve_agent(
            state.clone(),
            ConnectionId::new(id),
            FrameReader::new(server_read),
            FrameWriter::new(server_write),
        ));
        let peer = Peer {
            reader: FrameReader::new(client_read),
            writer: FrameWriter::new(client_write),
        };
        (peer, handle)
    }

    fn spawn_house_session(state: &BankState, id: u32) -> (Peer, JoinHandle<Result<()>>) {
        let (client_read, server_write) = tokio::io::duplex(4096);
        let (server_read, client_write) = tokio::io::duplex(4096);
        let handle = tokio::spawn(serve_house(
            state.clone(),
            ConnectionId::new(id),
            FrameReader::new(server_read),
            FrameWriter::new(server_write),
        ));
        let peer = Peer {
            reader: FrameReader::new(client_read),
            writer: FrameWriter::new(client_write),
        };
        (peer, handle)
    }

    async fn register_agent(peer: &mut Peer, balance: u64) -> i32 {
        peer.writer
            .write_json(&AgentRegistration {
                name: "alice".to_string(),
                balance: Amount::new(balance),
            })
            .await
            .unwrap();
        peer.writer.flush().await.unwrap();
        peer.reader.read_code().await.unwrap()
    }

    async fn house_request(peer: &mut Peer, command: HouseBankCommand, account: u32, amount: u64) -> i32 {
        peer.writer.write_tag(command.tag()).await.unwrap();
        peer.writer
            .write_json(&FundsRequest {
                account_id: ConnectionId::new(account),
                amount: Amount::new(amount),
            })
            .await
            .unwrap();
        peer.writer.flush().await.unwrap();
        peer.reader.read_code().await.unwrap()
    }

    #[tokio::test]
    async fn test_agent_registration_opens_account() {
        let state = BankState::new();
        let (mut agent, _handle) = spawn_agent_session(&state, 7);

        assert_eq!(register_agent(&mut agent, 1000).await, 7);
        let info = state.ledger.balance_info(ConnectionId::new(7)).unwrap();
        assert_eq!(info.balance, Amount::new(1000));
    }

    #[tokio::test]
    async fn test_malformed_agent_registration_is_refused() {
        let state = BankState::new();
        let (mut agent, handle) = spawn_agent_session(&state, 2);

        agent.writer.write_text("{\"name\":\"x\"}").await.unwrap();
        agent.writer.flush().await.unwrap();
        assert_eq!(agent.reader.read_code().await.unwrap(), -1);
        assert!(matches!(handle.await.unwrap(), Err(BankError::Handshake { .. })));
        assert!(state.ledger.account(ConnectionId::new(2)).is_none());
    }

    #[tokio::test]
    async fn test_block_unblock_codes() {
        let state = BankState::new();
        let (mut agent, _a) = spawn_agent_session(&state, 1000);
        register_agent(&mut agent, 1000).await;

        state.ledger.open_house_account(ConnectionId::new(1)).unwrap();
        let (mut house, _h) = spawn_house_session(&state, 1);
        house
            .writer
            .write_json(&HouseRegistration {
                ip: "127.0.0.1".to_string(),
                port: 5000,
            })
            .await
            .unwrap();
        house.writer.flush().await.unwrap();
        assert_eq!(house.reader.read_code().await.unwrap(), 1);

        assert_eq!(house_request(&mut house, HouseBankCommand::Block, 1000, 400).await, 1);
        assert_eq!(house_request(&mut house, HouseBankCommand::Block, 1000, 700).await, 0);
        assert_eq!(house_request(&mut house, HouseBankCommand::Unblock, 1000, 500).await, -1);
        assert_eq!(house_request(&mut house, HouseBankCommand::Unblock, 1000, 400).await, 1);
        assert_eq!(house_request(&mut house, HouseBankCommand::Block, 99, 1).await, -1);

        let info = state.ledger.balance_info(ConnectionId::new(1000)).unwrap();
        assert_eq!((info.balance.units(), info.blocked_funds.units()), (1000, 0));
    }

    #[tokio::test]
    async fn test_malformed_block_gets_error_code_and_session_survives() {
        let state = BankState::new();
        let (mut house, _h) = spawn_house_session(&state, 1);
        house
            .writer
            .write_json(&HouseRegistration {
                ip: "127.0.0.1".to_string(),
                port: 5000,
            })
            .await
            .unwrap();
        house.writer.flush().await.unwrap();
        house.reader.read_code().await.unwrap();

        house.writer.write_tag(b'b').await.unwrap();
        house.writer.write_text("garbage").await.unwrap();
        house.writer.flush().await.unwrap();
        assert_eq!(house.reader.read_code().await.unwrap(), -1);

        state
            .ledger
            .open_agent_account(ConnectionId::new(5), "bob", Amount::new(10))
            .unwrap();
        assert_eq!(house_request(&mut house, HouseBankCommand::Block, 5, 10).await, 1);
    }

    #[tokio::test]
    async fn test_house_disconnect_withdraws_directory_entry() {
        let state = BankState::new();
        let (mut house, handle) = spawn_house_session(&state, 4);
        house
            .writer
            .write_json(&HouseRegistration {
                ip: "10.0.0.2".to_string(),
                port: 6000,
            })
            .await
            .unwrap();
        house.writer.flush().await.unwrap();
        house.reader.read_code().await.unwrap();
        assert_eq!(state.directory.len(), 1);

        house.writer.write_tag(HouseBankCommand::Disconnect.tag()).await.unwrap();
        house.writer.flush().await.unwrap();
        handle.await.unwrap().unwrap();
        assert!(state.directory.is_empty());
    }

    #[tokio::test]
    async fn test_directory_balance_and_transfer() {
        let state = BankState::new();
        state.ledger.open_house_account(ConnectionId::new(1)).unwrap();
        state.directory.insert(HouseDirectoryEntry {
            house_id: ConnectionId::new(1),
            ip: "127.0.0.1".to_string(),
            port: 5000,
        });

        let (mut agent, _a) = spawn_agent_session(&state, 2);
        register_agent(&mut agent, 300).await;
        state.ledger.block(ConnectionId::new(2), Amount::new(120)).unwrap();

        agent.writer.write_tag(AgentBankCommand::Directory.tag()).await.unwrap();
        agent.writer.flush().await.unwrap();
        let houses: Vec<HouseDirectoryEntry> = agent.reader.read_list().await.unwrap();
        assert_eq!(houses.len(), 1);
        assert_eq!(houses[0].port, 5000);

        agent.writer.write_tag(AgentBankCommand::Transfer.tag()).await.unwrap();
        agent
            .writer
            .write_json(&TransferRequest {
                house_id: ConnectionId::new(1),
                agent_id: ConnectionId::new(2),
                amount: Amount::new(120),
            })
            .await
            .unwrap();
        agent.writer.flush().await.unwrap();
        assert_eq!(agent.reader.read_code().await.unwrap(), 1);

        agent.writer.write_tag(AgentBankCommand::Balance.tag()).await.unwrap();
        agent.writer.flush().await.unwrap();
        let info: BalanceInfo = agent.reader.read_json().await.unwrap();
        assert_eq!(info.balance, Amount::new(180));
        assert_eq!(info.blocked_funds, Amount::zero());
        assert_eq!(state.ledger.account(ConnectionId::new(1)).unwrap().balance, Amount::new(120));
    }

    #[tokio::test]
    async fn test_transfer_to_non_house_fails_and_keeps_blocked_funds() {
        let state = BankState::new();
        state
            .ledger
            .open_agent_account(ConnectionId::new(1), "other", Amount::zero())
            .unwrap();
        let (mut agent, _a) = spawn_agent_session(&state, 2);
        register_agent(&mut agent, 300).await;
        state.ledger.block(ConnectionId::new(2), Amount::new(100)).unwrap();

        agent.writer.write_tag(AgentBankCommand::Transfer.tag()).await.unwrap();
        agent
            .writer
            .write_json(&TransferRequest {
                house_id: ConnectionId::new(1),
                agent_id: ConnectionId::new(2),
                amount: Amount::new(100),
            })
            .await
            .unwrap();
        agent.writer.flush().await.unwrap();
        assert_eq!(agent.reader.read_code().await.unwrap(), -1);

        let info = state.ledger.balance_info(ConnectionId::new(2)).unwrap();
        assert_eq!(info.blocked_funds, Amount::new(100));
    }
}
