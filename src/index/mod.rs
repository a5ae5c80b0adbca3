//! Process-local index sets and attribute views over them.

pub mod bounds;
pub mod index_set;
pub mod local_index;
pub mod selection;

pub use bounds::{AttributeLike, EntityAttribute, GlobalIndexLike};
pub use index_set::{EntryHandle, IndexSet, IndexSetState};
pub use local_index::{EntryState, IndexPair, LocalIndexEntry};
pub use selection::{AttributeFilter, AttributeSet, Selection, UncachedSelection};
