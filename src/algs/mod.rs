//! Re-export public algorithms.

pub mod communication_pattern;
pub mod communicator;
pub mod exchange;
pub mod indices_syncer;
pub mod neighbor_mapping;
pub mod remote_indices;
pub mod wire;

pub use communication_pattern::{
    CommunicationPattern, convert_remote_indices_to_communication_pattern,
};
pub use indices_syncer::{IndicesSyncer, SyncSummary};
pub use neighbor_mapping::{NeighborDiscovery, NeighborIndexMappingBuilder};
pub use remote_indices::{ListKind, RebuildMode, RemoteIndexExchange, RemoteIndices};
