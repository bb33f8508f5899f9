//! M-to-N collect and duplicate: the per-update entry points.
//!
//! Both operate on one rank of one domain and take that rank's
//! [`MToNSocketConnection`] (if the deployment has one). Which half of the
//! exchange a rank performs follows from its [`ServerMode`].

use crate::algs::collective::CollectiveDomain;
use crate::algs::marshal::{Marshaler, MeshFragment};
use crate::algs::schedule::RedistributionScheduler;
use crate::algs::transfer::{duplicate_all_gather, receive_fragment, redistribute, send_fragment};
use crate::config::ServerMode;
use crate::m2n_error::M2nError;
use crate::net::m2n::MToNSocketConnection;

fn empty<F: MeshFragment>() -> F {
    F::append(Vec::new())
}

/// Funnel a data server's P pieces onto N render-server ranks.
///
/// - data server: redistribute so ranks `0..N` hold everything (weights 1
///   for those, 0 for the rest), then each of those ranks sends its share
///   over its socket. The local output is empty.
/// - render server: ranks `0..N` receive one fragment from their socket;
///   higher ranks produce an empty fragment.
/// - client, or no connection at all: the input passes through unchanged.
#[derive(Clone, Debug)]
pub struct M2nCollect<M> {
    marshaler: M,
}

impl<M: Marshaler> M2nCollect<M> {
    pub fn new(marshaler: M) -> Self {
        Self { marshaler }
    }

    pub fn execute<C: CollectiveDomain>(
        &self,
        comm: &C,
        input: M::Fragment,
        connection: Option<&mut MToNSocketConnection>,
    ) -> Result<M::Fragment, M2nError> {
        let Some(conn) = connection else {
            log::warn!("rank {}: no M-to-N connection, passing data through", comm.rank());
            return Ok(input);
        };
        match conn.mode() {
            ServerMode::Client => Ok(input),
            ServerMode::DataServer => {
                let n = conn.number_of_connections();
                let funneled = funnel(comm, n, &input, &self.marshaler)?;
                drop(input);
                if comm.rank() < n {
                    let socket = conn.socket_mut().ok_or(M2nError::ProtocolSequence(
                        "data-server rank below number_of_connections has no socket; connect first",
                    ))?;
                    send_fragment(socket, &funneled, &self.marshaler)?;
                }
                Ok(empty())
            }
            ServerMode::RenderServer => {
                let is_waiter = comm.rank() < conn.number_of_connections();
                match conn.socket_mut() {
                    Some(socket) => receive_fragment(socket, &self.marshaler),
                    None if is_waiter => Err(M2nError::ProtocolSequence(
                        "render-server rank has not accepted its connection",
                    )),
                    None => Ok(empty()),
                }
            }
        }
    }
}

/// Give every rank of the receiving domain the union of all data.
///
/// - no connection: all-gather duplicate within `comm`.
/// - data server: funnel to the socket owners and send, like
///   [`M2nCollect`]; the local output is empty.
/// - render server: receive on the socket owners, then all-gather
///   duplicate across the render domain so every render rank holds the
///   union, ordered by the render rank that received each piece.
/// - client: pass-through.
#[derive(Clone, Debug)]
pub struct MpiDuplicate<M> {
    marshaler: M,
}

impl<M: Marshaler> MpiDuplicate<M> {
    pub fn new(marshaler: M) -> Self {
        Self { marshaler }
    }

    pub fn execute<C: CollectiveDomain>(
        &self,
        comm: &C,
        input: M::Fragment,
        connection: Option<&mut MToNSocketConnection>,
    ) -> Result<M::Fragment, M2nError> {
        let Some(conn) = connection else {
            return duplicate_all_gather(comm, &input, &self.marshaler);
        };
        match conn.mode() {
            ServerMode::Client => Ok(input),
            ServerMode::DataServer => {
                M2nCollect::new(&self.marshaler).execute(comm, input, Some(conn))
            }
            ServerMode::RenderServer => {
                let received = M2nCollect::new(&self.marshaler).execute(comm, input, Some(conn))?;
                duplicate_all_gather(comm, &received, &self.marshaler)
            }
        }
    }
}

/// Collective: move every cell onto ranks `0..n`.
fn funnel<C: CollectiveDomain, M: Marshaler>(
    comm: &C,
    n: usize,
    input: &M::Fragment,
    marshaler: &M,
) -> Result<M::Fragment, M2nError> {
    let schedule = RedistributionScheduler::funnel(comm.size(), n).schedule(comm, input.num_cells())?;
    redistribute(comm, &schedule, input, marshaler)
}
