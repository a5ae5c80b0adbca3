//! # index-exchange
//!
//! index-exchange manages distributed index sets for message-passing codes.
//! Every process keeps a sorted table mapping global indices to dense local
//! positions with an attribute (owner, overlap, ghost, border, or any small
//! user type). The library finds out which entries are shared with which
//! ranks and reduces that to the per-rank send/receive lists that payload
//! exchange code consumes.
//!
//! ## Components
//! - [`index::IndexSet`]: sorted global→local table, mutated only inside a
//!   `begin_resize` / `end_resize` transaction with generation-checked handles.
//! - [`index::Selection`] and [`index::UncachedSelection`]: attribute-filtered
//!   views over an index set.
//! - [`algs::remote_indices::RemoteIndexExchange`]: two-phase (sizes, then
//!   data) exchange of public entries that fills
//!   [`algs::remote_indices::RemoteIndices`].
//! - [`algs::indices_syncer::IndicesSyncer`]: restores entries a rank lost
//!   (or never had) from what its neighbours know, without a full rebuild.
//! - [`algs::communication_pattern::CommunicationPattern`]: attribute-free
//!   send/receive lists, derived from remote indices or built by hand.
//! - [`algs::neighbor_mapping::NeighborIndexMappingBuilder`]: point-to-point
//!   shortcut for block-partitioned layouts with a halo.
//!
//! ## Communication
//! All exchanges go through the [`algs::communicator::Communicator`] trait,
//! passed explicitly. `ThreadComm` runs one rank per thread inside one
//! process and is what the tests use; `MpiComm` is available with the
//! `mpi-support` feature.
//!
//! ```toml
//! [dependencies]
//! index-exchange = "0.1"
//! # features = ["mpi-support"]
//! ```
//!
//! ## Invariant checks
//! Structures implement [`DebugInvariants`]. Checks run after every mutation
//! in debug builds, and in release builds with the `check-invariants` or
//! `strict-invariants` feature.

pub mod algs;
pub mod debug_invariants;
pub mod index;
pub mod index_error;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communication_pattern::{
        CommunicationPattern, convert_remote_indices_to_communication_pattern,
    };
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{
        CommTag, Communicator, ExchangeTags, NoComm, ThreadComm, Wait,
    };
    pub use crate::algs::indices_syncer::{IndicesSyncer, SyncSummary};
    pub use crate::algs::neighbor_mapping::{NeighborDiscovery, NeighborIndexMappingBuilder};
    pub use crate::algs::remote_indices::{
        ListKind, RebuildMode, RemoteIndex, RemoteIndexExchange, RemoteIndexLists, RemoteIndices,
    };
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::index::{
        AttributeFilter, AttributeLike, AttributeSet, EntityAttribute, EntryHandle, EntryState,
        GlobalIndexLike, IndexPair, IndexSet, IndexSetState, LocalIndexEntry, Selection,
        UncachedSelection,
    };
    pub use crate::index_error::IndexError;
}
