//! One rank's view of the M-to-N socket mesh.
//!
//! Render-server ranks are waiters, data-server ranks are callers, clients
//! own no socket. The typical sequence is:
//!
//! 1. render server: [`setup_wait_for_connection`](MToNSocketConnection::setup_wait_for_connection),
//!    then [`gather_endpoints`](MToNSocketConnection::gather_endpoints) so
//!    every render rank holds the full registry;
//! 2. the registry is handed to the data server out of band
//!    ([`set_registry`](MToNSocketConnection::set_registry));
//! 3. render server [`wait_for_connection`](MToNSocketConnection::wait_for_connection)
//!    while the data server [`connect`](MToNSocketConnection::connect)s.

use crate::algs::collective::CollectiveDomain;
use crate::config::{M2nConfig, ServerMode};
use crate::m2n_error::M2nError;
use crate::net::dial::DialConnector;
use crate::net::registry::ConnectionRegistry;
use crate::net::rendezvous::RendezvousConnector;
use crate::net::socket::SocketConnection;

#[derive(Debug)]
enum Side {
    Waiter(RendezvousConnector),
    Caller(DialConnector),
    None,
}

#[derive(Debug)]
pub struct MToNSocketConnection {
    rank: usize,
    config: M2nConfig,
    registry: ConnectionRegistry,
    side: Side,
}

impl MToNSocketConnection {
    pub fn new(rank: usize, config: M2nConfig) -> Result<Self, M2nError> {
        config.validate()?;
        let mut conn = Self {
            rank,
            registry: config.registry(),
            config,
            side: Side::None,
        };
        conn.initialize();
        Ok(conn)
    }

    /// Reset to a fresh registry and unconnected connector.
    ///
    /// Any socket held from a previous round is closed.
    pub fn initialize(&mut self) {
        self.registry = self.config.registry();
        self.side = match self.config.mode {
            ServerMode::RenderServer => Side::Waiter(RendezvousConnector::new(
                self.rank,
                self.config.number_of_connections,
            )),
            ServerMode::DataServer => Side::Caller(DialConnector::new(self.rank)),
            ServerMode::Client => Side::None,
        };
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn mode(&self) -> ServerMode {
        self.config.mode
    }

    pub fn number_of_connections(&self) -> usize {
        self.config.number_of_connections
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Install the registry published by the waiting side.
    pub fn set_registry(&mut self, registry: ConnectionRegistry) -> Result<(), M2nError> {
        if registry.number_of_connections() != self.config.number_of_connections {
            return Err(M2nError::CountMismatch(format!(
                "registry has {} connections, configured for {}",
                registry.number_of_connections(),
                self.config.number_of_connections
            )));
        }
        self.registry = registry;
        Ok(())
    }

    pub fn setup_wait_for_connection(&mut self) -> Result<(), M2nError> {
        match &mut self.side {
            Side::Waiter(w) => w.setup_wait_for_connection(&mut self.registry).map(|_| ()),
            _ => Err(self.wrong_side("setup_wait_for_connection")),
        }
    }

    /// Collective over the render-server domain: share every published
    /// endpoint so each rank (rank 0 in particular) holds the full table.
    pub fn gather_endpoints<C: CollectiveDomain>(&mut self, comm: &C) -> Result<(), M2nError> {
        let mine = match &self.side {
            Side::Waiter(w) => w.endpoint().cloned(),
            _ => return Err(self.wrong_side("gather_endpoints")),
        };
        self.registry.gather_endpoints(comm, mine.as_ref())
    }

    /// Waits with the configured timeout, or forever when none is set.
    pub fn wait_for_connection(&mut self) -> Result<Option<usize>, M2nError> {
        let timeout = self.config.wait_timeout();
        match &mut self.side {
            Side::Waiter(w) => match timeout {
                Some(t) => w.wait_for_connection_timeout(t),
                None => w.wait_for_connection(),
            },
            _ => Err(self.wrong_side("wait_for_connection")),
        }
    }

    pub fn connect(&mut self) -> Result<Option<usize>, M2nError> {
        match &mut self.side {
            Side::Caller(d) => d.connect(&self.registry),
            _ => Err(self.wrong_side("connect")),
        }
    }

    /// The socket this rank owns, if any.
    pub fn socket_mut(&mut self) -> Option<&mut SocketConnection> {
        match &mut self.side {
            Side::Waiter(w) => w.socket_mut(),
            Side::Caller(d) => d.socket_mut(),
            Side::None => None,
        }
    }

    pub fn peer_rank(&self) -> Option<usize> {
        match &self.side {
            Side::Waiter(w) => w.socket().and_then(SocketConnection::peer_rank),
            Side::Caller(d) => d.socket().and_then(SocketConnection::peer_rank),
            Side::None => None,
        }
    }

    fn wrong_side(&self, op: &'static str) -> M2nError {
        log::error!("rank {}: {op} is not valid in {:?} mode", self.rank, self.config.mode);
        M2nError::ProtocolSequence(match self.config.mode {
            ServerMode::DataServer => "operation reserved for render-server ranks",
            ServerMode::RenderServer => "operation reserved for data-server ranks",
            ServerMode::Client => "client ranks own no socket connection",
        })
    }
}
