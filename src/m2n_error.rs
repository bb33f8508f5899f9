//! M2nError: Unified error type for mesh-m2n public APIs
//!
//! Every fallible operation in the crate returns `Result<_, M2nError>`.
//! Misuse that older designs silently ignored (connecting twice, waiting
//! before setup) is reported here instead of being swallowed.

use thiserror::Error;

/// Unified error type for connection setup, scheduling and transfer.
#[derive(Debug, Error)]
pub enum M2nError {
    /// A rank index fell outside the table it was used to address.
    #[error("rank {rank} is out of range (table has {len} entries)")]
    RankOutOfRange { rank: usize, len: usize },
    /// Configuration that cannot be used at all.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Weight vector rejected by the scheduler.
    #[error("invalid weights: {0}")]
    InvalidWeights(String),
    /// A connector method was called out of order or twice.
    #[error("protocol sequencing error: {0}")]
    ProtocolSequence(&'static str),
    /// Underlying socket I/O failed.
    #[error("socket I/O failed during {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    /// No peer connected before the optional accept deadline.
    #[error("no peer connected within {0:?}")]
    AcceptTimeout(std::time::Duration),
    /// Peer sent a malformed or incompatible hello.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    /// A framed message arrived under a different tag than expected.
    #[error("expected message tag {expected:#x}, got {got:#x}")]
    TagMismatch { expected: u32, got: u32 },
    /// Fewer (or more) bytes than announced were transferred.
    #[error("expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },
    /// Communication with a specific neighbor rank failed.
    #[error("communication with rank {neighbor} failed: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Per-rank counts disagree with the domain size or with each other.
    #[error("count mismatch: {0}")]
    CountMismatch(String),
    /// Serialization or deserialization of a fragment failed.
    #[error("marshaling failed: {0}")]
    Marshal(String),
}

impl M2nError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        M2nError::Io { context, source }
    }

    pub(crate) fn comm(neighbor: usize, msg: impl Into<String>) -> Self {
        M2nError::CommError {
            neighbor,
            source: msg.into().into(),
        }
    }
}
