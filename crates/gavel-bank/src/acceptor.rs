//! Dual-port connection acceptor

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

use gavel_wire::framed;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::session::{serve_agent, serve_house};
use crate::{BankConfig, BankError, BankState, Result};

/// Which listener a connection arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    House,
    Agent,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::House => write!(f, "house"),
            Endpoint::Agent => write!(f, "agent"),
        }
    }
}

/// The Bank's network front
pub struct BankServer {
    state: BankState,
    house_listener: TcpListener,
    agent_listener: TcpListener,
}

impl BankServer {
    /// Bind both listeners with fresh state
    pub async fn bind(config: &BankConfig) -> Result<Self> {
        Self::bind_with_state(config, BankState::new()).await
    }

    /// Bind both listeners; failure on either is fatal
    pub async fn bind_with_state(config: &BankConfig, state: BankState) -> Result<Self> {
        if config.house_port == config.agent_port && config.house_port != 0 {
            return Err(BankError::SamePort {
                port: config.house_port,
            });
        }
        let house_listener = bind(Endpoint::House, &config.host, config.house_port).await?;
        let agent_listener = bind(Endpoint::Agent, &config.host, config.agent_port).await?;
        Ok(Self {
            state,
            house_listener,
            agent_listener,
        })
    }

    pub fn house_addr(&self) -> std::io::Result<SocketAddr> {
        self.house_listener.local_addr()
    }

    pub fn agent_addr(&self) -> std::io::Result<SocketAddr> {
        self.agent_listener.local_addr()
    }

    pub fn state(&self) -> BankState {
        self.state.clone()
    }

    /// Accept connections until `shutdown` resolves
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future,
    {
        tokio::pin!(shutdown);
        info!(
            house_addr = ?self.house_addr().ok(),
            agent_addr = ?self.agent_addr().ok(),
            "Bank accepting connections"
        );

        loop {
            let (endpoint, accepted) = tokio::select! {
                accepted = self.house_listener.accept() => (Endpoint::House, accepted),
                accepted = self.agent_listener.accept() => (Endpoint::Agent, accepted),
                _ = &mut shutdown => {
                    info!("Bank acceptor stopping");
                    return;
                }
            };

            match accepted {
                Ok((stream, peer)) => self.dispatch(endpoint, stream, peer),
                Err(e) => warn!(%endpoint, error = %e, "Accept failed"),
            }
        }
    }

    /// Accept connections forever
    pub async fn run(self) {
        self.run_until(std::future::pending::<()>()).await
    }

    fn dispatch(&self, endpoint: Endpoint, stream: TcpStream, peer: SocketAddr) {
        let id = self.state.ids.next_id();
        let state = self.state.clone();
        let _ = stream.set_nodelay(true);
        let (reader, writer) = framed(stream);
        info!(connection_id = %id, %endpoint, %peer, "Connection accepted");

        match endpoint {
            Endpoint::House => {
                if let Err(e) = state.ledger.open_house_account(id) {
                    error!(connection_id = %id, error = %e, "Could not open house account");
                    return;
                }
                tokio::spawn(async move {
                    if let Err(e) = serve_house(state, id, reader, writer).await {
                        warn!(connection_id = %id, error = %e, "House session ended with error");
                    }
                });
            }
            Endpoint::Agent => {
                tokio::spawn(async move {
                    if let Err(e) = serve_agent(state, id, reader, writer).await {
                        warn!(connection_id = %id, error = %e, "Agent session ended with error");
                    }
                });
            }
        }
    }
}

async fn bind(endpoint: Endpoint, host: &str, port: u16) -> Result<TcpListener> {
    let addr = format!("{}:{}", host, port);
    let bound = TcpListener::bind(addr.as_str()).await;
    match bound {
        Ok(listener) => Ok(listener),
        Err(source) => Err(BankError::Bind {
            endpoint,
            addr,
            source,
        }),
    }
}
