//! Local side of an index pair: position, attribute, public flag and state.

use std::fmt;

use crate::index::bounds::{AttributeLike, GlobalIndexLike};

/// Lifecycle state of an entry inside an [`IndexSet`](crate::index::IndexSet).
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum EntryState {
    #[default]
    Valid,
    /// Marked during a resize transaction; removed by `end_resize`.
    Deleted,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryState::Valid => f.write_str("VALID"),
            EntryState::Deleted => f.write_str("DELETED"),
        }
    }
}

/// The local half of an index pair.
///
/// `local` is only meaningful between two resize transactions: `end_resize`
/// renumbers it to the entry's position in global order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct LocalIndexEntry<A> {
    local: usize,
    attribute: A,
    public: bool,
    state: EntryState,
}

impl<A: AttributeLike> LocalIndexEntry<A> {
    pub fn new(local: usize, attribute: A, public: bool) -> Self {
        Self {
            local,
            attribute,
            public,
            state: EntryState::Valid,
        }
    }

    #[inline]
    pub fn local(&self) -> usize {
        self.local
    }

    #[inline]
    pub fn attribute(&self) -> A {
        self.attribute
    }

    /// Whether this entity may also exist on other ranks.
    #[inline]
    pub fn is_public(&self) -> bool {
        self.public
    }

    #[inline]
    pub fn state(&self) -> EntryState {
        self.state
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.state == EntryState::Deleted
    }

    pub(crate) fn set_local(&mut self, local: usize) {
        self.local = local;
    }

    pub(crate) fn set_state(&mut self, state: EntryState) {
        self.state = state;
    }
}

/// A global index together with its local entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct IndexPair<G, A> {
    global: G,
    local: LocalIndexEntry<A>,
}

impl<G: GlobalIndexLike, A: AttributeLike> IndexPair<G, A> {
    pub fn new(global: G, local: LocalIndexEntry<A>) -> Self {
        Self { global, local }
    }

    #[inline]
    pub fn global(&self) -> G {
        self.global
    }

    #[inline]
    pub fn entry(&self) -> &LocalIndexEntry<A> {
        &self.local
    }

    /// Shorthand for `entry().local()`.
    #[inline]
    pub fn local(&self) -> usize {
        self.local.local
    }

    #[inline]
    pub fn attribute(&self) -> A {
        self.local.attribute
    }

    #[inline]
    pub fn is_public(&self) -> bool {
        self.local.public
    }

    #[inline]
    pub fn state(&self) -> EntryState {
        self.local.state
    }

    pub(crate) fn entry_mut(&mut self) -> &mut LocalIndexEntry<A> {
        &mut self.local
    }
}

impl<G: GlobalIndexLike, A: AttributeLike> fmt::Display for IndexPair<G, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{global={}, local={}, attribute={}, public={}, state={}}}",
            self.global, self.local.local, self.local.attribute, self.local.public, self.local.state
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::bounds::EntityAttribute;

    #[test]
    fn pair_display_lists_every_field() {
        let pair = IndexPair::new(17u64, LocalIndexEntry::new(3, EntityAttribute::Ghost, true));
        assert_eq!(
            pair.to_string(),
            "{global=17, local=3, attribute=ghost, public=true, state=VALID}"
        );
    }

    #[test]
    fn new_entries_start_valid() {
        let e = LocalIndexEntry::new(0, 1u8, false);
        assert_eq!(e.state(), EntryState::Valid);
        assert!(!e.is_deleted());
        assert!(!e.is_public());
    }
}
