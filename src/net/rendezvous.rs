//! Waiter side of the M-to-N socket setup.
//!
//! Ranks `0..number_of_connections` each open one listening socket on an
//! ephemeral port, publish it in the [`ConnectionRegistry`], and accept
//! exactly one caller. Other ranks are not waiters and every call is a
//! successful no-op for them.

use crate::m2n_error::M2nError;
use crate::net::registry::{ConnectionEndpoint, ConnectionRegistry};
use crate::net::socket::{HandshakeRole, SocketConnection, SocketListener};
use std::time::Duration;

#[derive(Debug)]
enum WaiterState {
    Idle,
    Listening(SocketListener),
    /// Setup ran but this rank is not a waiter.
    Inactive,
    Connected,
    Failed,
}

#[derive(Debug)]
pub struct RendezvousConnector {
    rank: usize,
    number_of_connections: usize,
    state: WaiterState,
    endpoint: Option<ConnectionEndpoint>,
    connection: Option<SocketConnection>,
}

impl RendezvousConnector {
    pub fn new(rank: usize, number_of_connections: usize) -> Self {
        Self {
            rank,
            number_of_connections,
            state: WaiterState::Idle,
            endpoint: None,
            connection: None,
        }
    }

    pub fn is_waiter(&self) -> bool {
        self.rank < self.number_of_connections
    }

    /// Endpoint published by setup, if this rank is a waiter.
    pub fn endpoint(&self) -> Option<&ConnectionEndpoint> {
        self.endpoint.as_ref()
    }

    /// Open the listening socket and publish `(host, port)` for this rank.
    ///
    /// Must be called once. Returns `Ok(None)` for non-waiter ranks.
    pub fn setup_wait_for_connection(
        &mut self,
        registry: &mut ConnectionRegistry,
    ) -> Result<Option<ConnectionEndpoint>, M2nError> {
        if !matches!(self.state, WaiterState::Idle) {
            log::error!("rank {}: setup_wait_for_connection called twice", self.rank);
            return Err(M2nError::ProtocolSequence(
                "setup_wait_for_connection called twice",
            ));
        }
        if !self.is_waiter() {
            self.state = WaiterState::Inactive;
            return Ok(None);
        }

        let listener = SocketListener::bind(0)?;
        let host = registry.resolve_host(self.rank);
        let port = listener.port();
        // A registry shorter than the connection count is a configuration
        // error: set_endpoint logs it and this rank keeps listening.
        let _ = registry.set_endpoint(self.rank, port, &host);
        log::info!("rank {} waiting for a connection on {host}:{port}", self.rank);

        let endpoint = ConnectionEndpoint {
            rank: self.rank,
            host,
            port,
        };
        self.endpoint = Some(endpoint.clone());
        self.state = WaiterState::Listening(listener);
        Ok(Some(endpoint))
    }

    /// Block until the caller connects; returns the caller's rank.
    ///
    /// There is no timeout: if nobody ever dials, this never returns.
    pub fn wait_for_connection(&mut self) -> Result<Option<usize>, M2nError> {
        self.wait_inner(None)
    }

    /// Same as [`wait_for_connection`](Self::wait_for_connection) with an
    /// upper bound on the accept.
    pub fn wait_for_connection_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<usize>, M2nError> {
        self.wait_inner(Some(timeout))
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

    fn wait_inner(&mut self, timeout: Option<Duration>) -> Result<Option<usize>, M2nError> {
        let listener = match std::mem::replace(&mut self.state, WaiterState::Failed) {
            WaiterState::Listening(l) => l,
            WaiterState::Inactive => {
                self.state = WaiterState::Inactive;
                return Ok(None);
            }
            other => {
                let msg = match other {
                    WaiterState::Idle => "wait_for_connection before setup_wait_for_connection",
                    WaiterState::Connected => "wait_for_connection called twice",
                    _ => "wait_for_connection after a failed accept",
                };
                self.state = other;
                log::error!("rank {}: {msg}", self.rank);
                return Err(M2nError::ProtocolSequence(msg));
            }
        };

        let accepted = match timeout {
            Some(t) => listener.accept_timeout(t),
            None => listener.accept(),
        };
        let result = accepted.and_then(|mut conn| {
            conn.handshake(HandshakeRole::Server)?;
            let peer = conn.exchange_rank_as_waiter(self.rank)?;
            Ok((conn, peer))
        });
        match result {
            Ok((conn, peer)) => {
                log::info!("rank {} accepted caller rank {peer}", self.rank);
                self.connection = Some(conn);
                self.state = WaiterState::Connected;
                Ok(Some(peer))
            }
            Err(e) => {
                log::error!("rank {}: accepting connection failed: {e}", self.rank);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_waiter_is_noop() {
        let mut reg = ConnectionRegistry::new(2);
        let mut w = RendezvousConnector::new(3, 2);
        assert!(!w.is_waiter());
        assert!(w.setup_wait_for_connection(&mut reg).unwrap().is_none());
        assert!(w.wait_for_connection().unwrap().is_none());
        assert_eq!(reg.endpoints().count(), 0);
    }

    #[test]
    fn setup_twice_is_rejected() {
        let mut reg = ConnectionRegistry::new(1);
        let mut w = RendezvousConnector::new(0, 1);
        let ep = w.setup_wait_for_connection(&mut reg).unwrap().unwrap();
        assert_eq!(reg.endpoint(0), Some(&ep));
        assert!(matches!(
            w.setup_wait_for_connection(&mut reg),
            Err(M2nError::ProtocolSequence(_))
        ));
        assert_eq!(reg.endpoint(0), Some(&ep));
    }

    #[test]
    fn short_registry_still_listens() {
        let mut reg = ConnectionRegistry::new(2);
        let mut w = RendezvousConnector::new(2, 3);
        let ep = w.setup_wait_for_connection(&mut reg).unwrap().unwrap();
        assert_eq!(ep.rank, 2);
        assert_ne!(ep.port, 0);
        assert_eq!(w.endpoint(), Some(&ep));
        assert!(reg.endpoint(2).is_none());

        let caller = std::thread::spawn(move || {
            let mut conn = SocketConnection::connect("127.0.0.1", ep.port).unwrap();
            conn.handshake(HandshakeRole::Client).unwrap();
            conn.exchange_rank_as_caller(7).unwrap()
        });
        assert_eq!(
            w.wait_for_connection_timeout(Duration::from_secs(10)).unwrap(),
            Some(7)
        );
        assert_eq!(caller.join().unwrap(), 2);
    }

    #[test]
    fn wait_before_setup_is_rejected() {
        let mut w = RendezvousConnector::new(0, 1);
        assert!(matches!(
            w.wait_for_connection(),
            Err(M2nError::ProtocolSequence(_))
        ));
        // Still usable afterwards.
        let mut reg = ConnectionRegistry::new(1);
        assert!(w.setup_wait_for_connection(&mut reg).unwrap().is_some());
    }

    #[test]
    fn failed_accept_poisons_the_connector() {
        let mut reg = ConnectionRegistry::new(1);
        let mut w = RendezvousConnector::new(0, 1);
        w.setup_wait_for_connection(&mut reg).unwrap();
        assert!(matches!(
            w.wait_for_connection_timeout(Duration::from_millis(20)),
            Err(M2nError::AcceptTimeout(_))
        ));
        assert!(matches!(
            w.wait_for_connection(),
            Err(M2nError::ProtocolSequence(_))
        ));
    }
}
