//! IndexError: unified error type for index-exchange public APIs
//!
//! Every fallible operation of the crate returns this type. The variants fall
//! into three groups: state errors (misuse of the resize transaction),
//! protocol errors (inconsistent exchange data) and communication errors
//! (the transport failed to deliver).

use thiserror::Error;

use crate::index::index_set::IndexSetState;

/// Unified error type for index-exchange operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// An operation was called while the index set was in the wrong state.
    #[error("`{operation}` requires index set state {expected:?}, found {found:?}")]
    InvalidIndexSetState {
        operation: &'static str,
        expected: IndexSetState,
        found: IndexSetState,
    },
    /// The global index is already present (or already added in this transaction).
    #[error("global index `{0}` is already present in the index set")]
    DuplicateGlobalIndex(String),
    /// The handle was issued before the last `end_resize` or points past the end.
    #[error("entry handle (slot {slot}, generation {generation}) is stale; index set is at generation {current}")]
    StaleHandle {
        slot: usize,
        generation: u64,
        current: u64,
    },
    /// Lookup of an unknown global index.
    #[error("global index `{0}` is not in the index set")]
    GlobalIndexNotFound(String),
    /// Lookup of a local position outside `0..len`.
    #[error("local index {local} out of range (len = {len})")]
    LocalIndexOutOfRange { local: usize, len: usize },

    /// A received buffer had the wrong byte length for the announced size.
    #[error("buffer size mismatch from rank {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// Exchange data from a neighbour was inconsistent with our own state.
    #[error("protocol error with rank {neighbor}: {reason}")]
    ProtocolError { neighbor: usize, reason: String },
    /// The neighbour speaks a different wire layout.
    #[error("wire version mismatch from rank {neighbor}: expected {expected}, got {got}")]
    WireVersionMismatch {
        neighbor: usize,
        expected: u16,
        got: u16,
    },
    /// A global index does not fit the wire format (or cannot be decoded from it).
    #[error("global index {0} cannot be represented on the wire")]
    InvalidWireGlobal(String),
    /// An attribute code received on the wire is unknown to the attribute type.
    #[error("unknown attribute code {0} on the wire")]
    InvalidWireAttribute(u32),
    /// A halo entry is owned neither locally nor by any discovered neighbour.
    #[error("global index `{0}` is not owned by this rank or any neighbour")]
    UnresolvedGhost(String),

    /// The transport failed to deliver a message.
    #[error("communication error with rank {neighbor}: {message}")]
    CommError { neighbor: usize, message: String },
    /// A rank outside `0..size` was addressed.
    #[error("rank {rank} is outside the communicator (size {size})")]
    InvalidRank { rank: usize, size: usize },

    /// Internal structure invariant does not hold.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}
