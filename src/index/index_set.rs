//! `IndexSet`: process-local map between global indices and local positions.
//!
//! The set is mutated only inside a resize transaction:
//!
//! ```text
//! begin_resize() -> add(..) / mark_as_deleted(..) ... -> end_resize()
//! ```
//!
//! Between transactions the pairs are sorted by global index and the local
//! positions are the dense range `0..len()` in that order. Deletion goes
//! through [`EntryHandle`]s instead of iterator positions: a handle names a
//! slot of the committed pair array together with the generation (sequence
//! number) it was issued in, so a handle that survived an `end_resize` is
//! rejected instead of silently pointing at a different pair.

use std::collections::BTreeSet;
use std::fmt;

use itertools::Itertools;

use crate::debug_invariants::{DebugInvariants, ensure};
use crate::index::bounds::{AttributeLike, GlobalIndexLike};
use crate::index::local_index::{EntryState, IndexPair, LocalIndexEntry};
use crate::index_error::IndexError;

/// The states an index set can be in.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum IndexSetState {
    /// Ready for lookups and exchanges.
    #[default]
    Ground,
    /// A resize transaction is open.
    Resize,
}

/// Stable reference to a committed pair, valid until the next `end_resize`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntryHandle {
    slot: usize,
    generation: u64,
}

impl EntryHandle {
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Map between globally unique indices and dense local positions.
///
/// # Invariants
///
/// - Committed pairs are sorted strictly by global index.
/// - In `Ground` state every pair is `Valid`, `pairs[i].local() == i`, and there
///   are no pending additions.
/// - While a transaction is open, marked pairs stay visible (state `Deleted`)
///   and `len()` does not change until `end_resize`.
#[derive(Clone, Debug)]
pub struct IndexSet<G, A> {
    pairs: Vec<IndexPair<G, A>>,
    pending: Vec<IndexPair<G, A>>,
    pending_globals: BTreeSet<G>,
    state: IndexSetState,
    seq_no: u64,
    deleted: usize,
}

impl<G, A> Default for IndexSet<G, A> {
    fn default() -> Self {
        Self {
            pairs: Vec::new(),
            pending: Vec::new(),
            pending_globals: BTreeSet::new(),
            state: IndexSetState::Ground,
            seq_no: 0,
            deleted: 0,
        }
    }
}

impl<G: GlobalIndexLike, A: AttributeLike> IndexSet<G, A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set in one transaction from `(global, attribute, public)` triples.
    ///
    /// # Errors
    /// `DuplicateGlobalIndex` if a global index occurs twice.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = (G, A, bool)>,
    {
        let mut set = Self::new();
        set.begin_resize()?;
        for (i, (global, attribute, public)) in pairs.into_iter().enumerate() {
            set.add(global, LocalIndexEntry::new(i, attribute, public))?;
        }
        set.end_resize()?;
        Ok(set)
    }

    #[inline]
    pub fn state(&self) -> IndexSetState {
        self.state
    }

    /// Number of completed resize transactions.
    #[inline]
    pub fn seq_no(&self) -> u64 {
        self.seq_no
    }

    /// Number of committed pairs (including pairs marked in an open transaction).
    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Alias of [`len`](Self::len).
    #[inline]
    pub fn size(&self) -> usize {
        self.pairs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Number of committed pairs flagged public.
    pub fn public_len(&self) -> usize {
        self.pairs.iter().filter(|p| p.is_public()).count()
    }

    /// Open a resize transaction.
    ///
    /// # Errors
    /// `InvalidIndexSetState` if a transaction is already open.
    pub fn begin_resize(&mut self) -> Result<(), IndexError> {
        if self.state != IndexSetState::Ground {
            return Err(IndexError::InvalidIndexSetState {
                operation: "begin_resize",
                expected: IndexSetState::Ground,
                found: self.state,
            });
        }
        self.state = IndexSetState::Resize;
        self.deleted = 0;
        Ok(())
    }

    /// Add a new pair. The entry's `local` is provisional and renumbered by
    /// `end_resize`.
    ///
    /// A global index whose committed pair was already marked deleted in this
    /// transaction may be added again; it then replaces the old pair.
    ///
    /// # Errors
    /// - `InvalidIndexSetState` outside a transaction.
    /// - `DuplicateGlobalIndex` if `global` is committed and not marked, or was
    ///   already added in this transaction.
    pub fn add(&mut self, global: G, entry: LocalIndexEntry<A>) -> Result<(), IndexError> {
        self.require_resize("add")?;
        if let Some(pos) = self.position(global) {
            if !self.pairs[pos].entry().is_deleted() {
                return Err(IndexError::DuplicateGlobalIndex(global.to_string()));
            }
        }
        if !self.pending_globals.insert(global) {
            return Err(IndexError::DuplicateGlobalIndex(global.to_string()));
        }
        let mut entry = entry;
        entry.set_state(EntryState::Valid);
        self.pending.push(IndexPair::new(global, entry));
        Ok(())
    }

    /// Mark the committed pair behind `handle` as deleted. Idempotent.
    ///
    /// # Errors
    /// - `InvalidIndexSetState` outside a transaction.
    /// - `StaleHandle` if the handle predates the last `end_resize`.
    pub fn mark_as_deleted(&mut self, handle: EntryHandle) -> Result<(), IndexError> {
        self.require_resize("mark_as_deleted")?;
        if handle.generation != self.seq_no || handle.slot >= self.pairs.len() {
            return Err(IndexError::StaleHandle {
                slot: handle.slot,
                generation: handle.generation,
                current: self.seq_no,
            });
        }
        let entry = self.pairs[handle.slot].entry_mut();
        if !entry.is_deleted() {
            entry.set_state(EntryState::Deleted);
            self.deleted += 1;
        }
        Ok(())
    }

    /// Mark every committed pair matching `pred`; returns how many were newly marked.
    pub fn mark_as_deleted_if<F>(&mut self, mut pred: F) -> Result<usize, IndexError>
    where
        F: FnMut(&IndexPair<G, A>) -> bool,
    {
        self.require_resize("mark_as_deleted_if")?;
        let mut marked = 0;
        for pair in self.pairs.iter_mut() {
            if !pair.entry().is_deleted() && pred(pair) {
                pair.entry_mut().set_state(EntryState::Deleted);
                marked += 1;
            }
        }
        self.deleted += marked;
        Ok(marked)
    }

    /// Close the transaction: drop deleted pairs, merge the additions in global
    /// order and renumber local positions densely from zero.
    ///
    /// # Errors
    /// `InvalidIndexSetState` if no transaction is open.
    pub fn end_resize(&mut self) -> Result<(), IndexError> {
        self.require_resize("end_resize")?;

        let mut added = std::mem::take(&mut self.pending);
        self.pending_globals.clear();
        added.sort_unstable_by_key(|p| p.global());

        let removed = self.deleted;
        let committed = std::mem::take(&mut self.pairs);
        let mut merged: Vec<IndexPair<G, A>> = committed
            .into_iter()
            .filter(|p| !p.entry().is_deleted())
            .merge_by(added, |a, b| a.global() <= b.global())
            .collect();
        for (pos, pair) in merged.iter_mut().enumerate() {
            let entry = pair.entry_mut();
            entry.set_local(pos);
            entry.set_state(EntryState::Valid);
        }

        self.pairs = merged;
        self.deleted = 0;
        self.seq_no += 1;
        self.state = IndexSetState::Ground;
        log::trace!(
            "index set resize #{} done: {} pairs, {} removed",
            self.seq_no,
            self.pairs.len(),
            removed
        );
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        self.debug_assert_invariants();
        Ok(())
    }

    /// Iterate the committed pairs in global order.
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, IndexPair<G, A>> {
        self.pairs.iter()
    }

    /// Committed pairs as a slice, sorted by global index.
    #[inline]
    pub fn pairs(&self) -> &[IndexPair<G, A>] {
        &self.pairs
    }

    /// Binary search for the slot of `global`.
    #[inline]
    pub fn position(&self, global: G) -> Option<usize> {
        self.pairs.binary_search_by_key(&global, |p| p.global()).ok()
    }

    /// Pair for `global`, if present.
    pub fn get(&self, global: G) -> Option<&IndexPair<G, A>> {
        self.position(global).map(|pos| &self.pairs[pos])
    }

    /// Pair for `global`.
    ///
    /// # Errors
    /// `GlobalIndexNotFound` if the global index is unknown.
    pub fn at(&self, global: G) -> Result<&IndexPair<G, A>, IndexError> {
        self.get(global)
            .ok_or_else(|| IndexError::GlobalIndexNotFound(global.to_string()))
    }

    /// Pair stored at local position `local`.
    pub fn by_local(&self, local: usize) -> Result<&IndexPair<G, A>, IndexError> {
        let pair = self.pairs.get(local).ok_or(IndexError::LocalIndexOutOfRange {
            local,
            len: self.pairs.len(),
        })?;
        debug_assert_eq!(pair.local(), local);
        Ok(pair)
    }

    /// Handle for the committed pair of `global`.
    pub fn handle(&self, global: G) -> Option<EntryHandle> {
        self.position(global).map(|slot| EntryHandle {
            slot,
            generation: self.seq_no,
        })
    }

    /// Handle for the committed pair at `position`.
    pub fn handle_at(&self, position: usize) -> Option<EntryHandle> {
        (position < self.pairs.len()).then_some(EntryHandle {
            slot: position,
            generation: self.seq_no,
        })
    }

    /// Handles of all committed pairs, in global order.
    pub fn handles(&self) -> impl Iterator<Item = EntryHandle> + '_ {
        let generation = self.seq_no;
        (0..self.pairs.len()).map(move |slot| EntryHandle { slot, generation })
    }

    fn require_resize(&self, operation: &'static str) -> Result<(), IndexError> {
        if self.state != IndexSetState::Resize {
            return Err(IndexError::InvalidIndexSetState {
                operation,
                expected: IndexSetState::Resize,
                found: self.state,
            });
        }
        Ok(())
    }
}

impl<'a, G: GlobalIndexLike, A: AttributeLike> IntoIterator for &'a IndexSet<G, A> {
    type Item = &'a IndexPair<G, A>;
    type IntoIter = std::slice::Iter<'a, IndexPair<G, A>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<G: GlobalIndexLike, A: AttributeLike> fmt::Display for IndexSet<G, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.pairs.iter().format(" "))
    }
}

impl<G: GlobalIndexLike, A: AttributeLike> DebugInvariants for IndexSet<G, A> {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "IndexSet");
    }

    fn validate_invariants(&self) -> Result<(), IndexError> {
        for (a, b) in self.pairs.iter().tuple_windows() {
            ensure(a.global() < b.global(), || {
                format!("pairs not strictly sorted: {} then {}", a.global(), b.global())
            })?;
        }
        let marked = self.pairs.iter().filter(|p| p.entry().is_deleted()).count();
        ensure(marked == self.deleted, || {
            format!("{marked} pairs marked deleted but {} recorded", self.deleted)
        })?;
        if self.state == IndexSetState::Ground {
            ensure(self.pending.is_empty(), || {
                format!("{} pending additions outside a transaction", self.pending.len())
            })?;
            ensure(marked == 0, || format!("{marked} deleted pairs outside a transaction"))?;
            for (pos, pair) in self.pairs.iter().enumerate() {
                ensure(pair.local() == pos, || {
                    format!("global {} has local {} at position {pos}", pair.global(), pair.local())
                })?;
            }
        }
        Ok(())
    }
}
