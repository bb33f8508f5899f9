//! Caller side of the M-to-N socket setup.
//!
//! Caller rank `r` dials waiter rank `r` of the other domain, for
//! `r < number_of_connections`. Surplus callers own no socket.

use crate::m2n_error::M2nError;
use crate::net::registry::ConnectionRegistry;
use crate::net::socket::{HandshakeRole, SocketConnection};

#[derive(Debug)]
pub struct DialConnector {
    rank: usize,
    attempted: bool,
    connection: Option<SocketConnection>,
}

impl DialConnector {
    pub fn new(rank: usize) -> Self {
        Self {
            rank,
            attempted: false,
            connection: None,
        }
    }

    /// Dial the waiter paired with this rank; returns its rank.
    ///
    /// `Ok(None)` when this rank has no partner. May be called once; a
    /// refused or failed connection is returned without retry.
    pub fn connect(&mut self, registry: &ConnectionRegistry) -> Result<Option<usize>, M2nError> {
        if self.attempted {
            log::error!("rank {}: connect called twice", self.rank);
            return Err(M2nError::ProtocolSequence("connect called twice"));
        }
        self.attempted = true;
        if self.rank >= registry.number_of_connections() {
            return Ok(None);
        }
        let endpoint = registry.endpoint(self.rank).ok_or_else(|| {
            log::error!("rank {}: no endpoint published", self.rank);
            M2nError::InvalidConfig(format!("no endpoint published for rank {}", self.rank))
        })?;

        log::debug!(
            "rank {} dialing {}:{}",
            self.rank,
            endpoint.host,
            endpoint.port
        );
        let mut conn = SocketConnection::connect(&endpoint.host, endpoint.port)?;
        conn.handshake(HandshakeRole::Client)?;
        let peer = conn.exchange_rank_as_caller(self.rank)?;
        log::info!("rank {} connected to waiter rank {peer}", self.rank);
        self.connection = Some(conn);
        Ok(Some(peer))
    }

    pub fn socket(&self) -> Option<&SocketConnection> {
        self.connection.as_ref()
    }

    pub fn socket_mut(&mut self) -> Option<&mut SocketConnection> {
        self.connection.as_mut()
    }

    pub fn into_socket(self) -> Option<SocketConnection> {
        self.connection
    }
}
