//! # mesh-m2n
//!
//! Moves polygonal mesh data from P data-server processes to N ≤ P
//! render-server processes. Two pieces do the real work:
//!
//! - an M-to-N socket mesh: render-server ranks listen on ephemeral ports and
//!   publish them, data-server ranks dial their partner and exchange ranks
//!   in a handshake ([`net`]);
//! - a weighted redistribution scheduler that decides how many cells move
//!   from which rank to which, so every rank ends with a share proportional
//!   to its weight ([`algs::schedule`]). Zero weights empty a rank out,
//!   which is how P pieces are funneled onto N socket owners.
//!
//! Mesh fragments stay opaque: the crate only needs to count, slice and
//! append cells ([`algs::marshal::MeshFragment`]) and to turn a fragment into
//! bytes and back ([`algs::marshal::Marshaler`]).
//!
//! ## Execution model
//! One OS process per rank, single-threaded with respect to this crate.
//! Collectives (sum, all-gather, variable all-gather) are matched by call
//! order and block until every rank of the domain reaches them. Nothing
//! times out by default; a crashed peer stalls its domain.
//!
//! ## Backends
//! - [`NoComm`](algs::communicator::NoComm): a single rank.
//! - [`ThreadComm`](algs::communicator::ThreadComm): ranks as threads of one
//!   process, for tests and local runs.
//! - `MpiComm`: MPI world communicator (feature `mpi-support`).

pub mod algs;
pub mod config;
pub mod m2n_error;
pub mod net;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::collect::{M2nCollect, MpiDuplicate};
    pub use crate::algs::collective::CollectiveDomain;
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, NoComm, ThreadComm, Wait};
    pub use crate::algs::marshal::{CellBlock, CellBlockMarshaler, Marshaler, MeshFragment};
    pub use crate::algs::schedule::{LocalSchedule, RedistributionScheduler, Transfer};
    pub use crate::algs::transfer::{duplicate_all_gather, redistribute};
    pub use crate::config::{M2nConfig, ServerMode};
    pub use crate::m2n_error::M2nError;
    pub use crate::net::registry::{ConnectionEndpoint, ConnectionRegistry};
    pub use crate::net::MToNSocketConnection;
}
