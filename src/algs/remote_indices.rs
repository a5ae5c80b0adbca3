//! Remote index information: which of this rank's public entries also live on
//! other ranks, and with which attribute there.
//!
//! [`RemoteIndexExchange`] borrows a source and a destination [`IndexSet`]
//! (often the same set) plus a communicator and fills a [`RemoteIndices`]
//! through a two-phase exchange:
//!
//! 1. **sizes**: every rank sends each neighbour a [`WireExchangeHeader`]
//!    announcing how many source and destination records follow;
//! 2. **data**: the advertised `(global, attribute)` records, in global order.
//!
//! Received records are matched against the local advertised pairs with a
//! merge walk. Remote destination records matched against local source pairs
//! form the `send` list for that rank, remote source records matched against
//! local destination pairs form the `receive` list.
//!
//! The result does not track later changes of the sets. After a resize
//! transaction on either set, call [`RemoteIndexExchange::rebuild`] again;
//! [`RemoteIndices::is_synced`] reports whether that is needed. Without
//! communication, [`RemoteIndices::repair`] re-resolves the lists against the
//! new generations, and [`RemoteIndices::insert`] / [`RemoteIndices::remove`]
//! edit single entries.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use itertools::{EitherOrBoth, Itertools};
use serde::{Deserialize, Serialize};

use crate::algs::communicator::{CommTag, Communicator, ExchangeTags};
use crate::algs::exchange::{exchange_headers, exchange_records};
use crate::algs::wire::{WIRE_VERSION, WireExchangeHeader, WireIndexRecord};
use crate::debug_invariants::{DebugInvariants, ensure};
use crate::index::bounds::{AttributeLike, GlobalIndexLike};
use crate::index::index_set::{IndexSet, IndexSetState};
use crate::index::local_index::IndexPair;
use crate::index_error::IndexError;

/// Default base tag of the remote-index exchange (sizes, then data on base + 1).
pub const REMOTE_INDEX_TAG: CommTag = CommTag::new(0x1D5E);

/// One entry known both locally and on a remote rank.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteIndex<G, A> {
    global: G,
    local: usize,
    local_attribute: A,
    attribute: A,
}

impl<G: GlobalIndexLike, A: AttributeLike> RemoteIndex<G, A> {
    pub fn new(global: G, local: usize, local_attribute: A, attribute: A) -> Self {
        Self {
            global,
            local,
            local_attribute,
            attribute,
        }
    }

    #[inline]
    pub fn global(&self) -> G {
        self.global
    }

    /// Position of the entry in the local index set.
    #[inline]
    pub fn local(&self) -> usize {
        self.local
    }

    /// Attribute of the local copy.
    #[inline]
    pub fn local_attribute(&self) -> A {
        self.local_attribute
    }

    /// Attribute the remote rank advertised for its copy.
    #[inline]
    pub fn attribute(&self) -> A {
        self.attribute
    }
}

impl<G: GlobalIndexLike, A: AttributeLike> fmt::Display for RemoteIndex<G, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{global={}, local={}, local_attribute={}, remote_attribute={}}}",
            self.global, self.local, self.local_attribute, self.attribute
        )
    }
}

/// Send and receive lists shared with one remote rank, both in global order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIndexLists<G, A> {
    send: Vec<RemoteIndex<G, A>>,
    receive: Vec<RemoteIndex<G, A>>,
}

impl<G, A> Default for RemoteIndexLists<G, A> {
    fn default() -> Self {
        Self {
            send: Vec::new(),
            receive: Vec::new(),
        }
    }
}

impl<G: GlobalIndexLike, A: AttributeLike> RemoteIndexLists<G, A> {
    /// Entries of the local source set that the remote rank holds in its destination set.
    pub fn send(&self) -> &[RemoteIndex<G, A>] {
        &self.send
    }

    /// Entries of the local destination set that the remote rank holds in its source set.
    pub fn receive(&self) -> &[RemoteIndex<G, A>] {
        &self.receive
    }

    pub fn is_empty(&self) -> bool {
        self.send.is_empty() && self.receive.is_empty()
    }

    fn list_mut(&mut self, kind: ListKind) -> &mut Vec<RemoteIndex<G, A>> {
        match kind {
            ListKind::Send => &mut self.send,
            ListKind::Receive => &mut self.receive,
        }
    }
}

/// Selects the send or the receive list of a rank.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ListKind {
    Send,
    Receive,
}

/// Per-rank remote index lists plus the set generations they were built from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIndices<G, A> {
    lists: BTreeMap<usize, RemoteIndexLists<G, A>>,
    source_seq_no: Option<u64>,
    dest_seq_no: Option<u64>,
}

impl<G, A> Default for RemoteIndices<G, A> {
    fn default() -> Self {
        Self {
            lists: BTreeMap::new(),
            source_seq_no: None,
            dest_seq_no: None,
        }
    }
}

impl<G: GlobalIndexLike, A: AttributeLike> RemoteIndices<G, A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ranks with at least one shared entry.
    pub fn neighbours(&self) -> usize {
        self.lists.len()
    }

    /// Ranks with at least one shared entry, ascending.
    pub fn ranks(&self) -> impl Iterator<Item = usize> + '_ {
        self.lists.keys().copied()
    }

    pub fn get(&self, rank: usize) -> Option<&RemoteIndexLists<G, A>> {
        self.lists.get(&rank)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &RemoteIndexLists<G, A>)> + '_ {
        self.lists.iter().map(|(&r, l)| (r, l))
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Drop all lists. The structure is unusable until the next rebuild.
    pub fn free(&mut self) {
        self.lists.clear();
        self.source_seq_no = None;
        self.dest_seq_no = None;
    }

    /// `true` if the lists were built from exactly these generations of the sets.
    pub fn is_synced(&self, source: &IndexSet<G, A>, dest: &IndexSet<G, A>) -> bool {
        self.source_seq_no == Some(source.seq_no()) && self.dest_seq_no == Some(dest.seq_no())
    }

    /// Total number of send entries over all ranks.
    pub fn total_send_len(&self) -> usize {
        self.lists.values().map(|l| l.send.len()).sum()
    }

    /// Total number of receive entries over all ranks.
    pub fn total_receive_len(&self) -> usize {
        self.lists.values().map(|l| l.receive.len()).sum()
    }

    /// Insert `index` into the `kind` list of `rank`, keeping global order.
    ///
    /// An entry with the same global index and remote attribute is replaced
    /// and returned. Does not change the recorded set generations.
    pub fn insert(&mut self, rank: usize, kind: ListKind, index: RemoteIndex<G, A>) -> Option<RemoteIndex<G, A>> {
        let list = self.lists.entry(rank).or_default().list_mut(kind);
        let start = list.partition_point(|e| e.global < index.global);
        let same = list[start..]
            .iter()
            .take_while(|e| e.global == index.global)
            .position(|e| e.attribute == index.attribute);
        match same {
            Some(offset) => Some(std::mem::replace(&mut list[start + offset], index)),
            None => {
                let end = start + list[start..].iter().take_while(|e| e.global == index.global).count();
                list.insert(end, index);
                None
            }
        }
    }

    /// Remove every entry for `global` from the `kind` list of `rank` and
    /// return how many there were. A rank left with two empty lists is dropped.
    pub fn remove(&mut self, rank: usize, kind: ListKind, global: G) -> usize {
        let Some(lists) = self.lists.get_mut(&rank) else {
            return 0;
        };
        let list = lists.list_mut(kind);
        let before = list.len();
        list.retain(|e| e.global != global);
        let removed = before - list.len();
        if lists.is_empty() {
            self.lists.remove(&rank);
        }
        removed
    }

    /// Re-resolve every entry against the current generation of the sets.
    ///
    /// Send entries are looked up in `source`, receive entries in `dest`.
    /// Entries whose global index is gone are dropped, the others get their
    /// current local position and local attribute. Afterwards the lists count
    /// as built from these generations. Returns the number of dropped entries.
    ///
    /// # Errors
    /// `InvalidIndexSetState` if either set has an open resize transaction;
    /// the lists are untouched then.
    pub fn repair(&mut self, source: &IndexSet<G, A>, dest: &IndexSet<G, A>) -> Result<usize, IndexError> {
        require_ground(source, "repair")?;
        require_ground(dest, "repair")?;
        let (lists, dropped) = relocate_lists(std::mem::take(&mut self.lists), source, dest);
        self.lists = lists;
        self.source_seq_no = Some(source.seq_no());
        self.dest_seq_no = Some(dest.seq_no());
        if dropped > 0 {
            log::debug!("remote indices repaired: {dropped} stale entries dropped");
        }
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        self.debug_assert_invariants();
        Ok(dropped)
    }

    pub(crate) fn lists(&self) -> &BTreeMap<usize, RemoteIndexLists<G, A>> {
        &self.lists
    }

    /// Install lists built for one index set at generation `seq_no`.
    pub(crate) fn install(&mut self, lists: BTreeMap<usize, RemoteIndexLists<G, A>>, seq_no: u64) {
        self.lists = lists;
        self.source_seq_no = Some(seq_no);
        self.dest_seq_no = Some(seq_no);
    }
}

impl<G: GlobalIndexLike, A: AttributeLike> fmt::Display for RemoteIndices<G, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (rank, lists) in &self.lists {
            writeln!(
                f,
                "rank {rank}: send [{}] receive [{}]",
                lists.send.iter().format(" "),
                lists.receive.iter().format(" ")
            )?;
        }
        Ok(())
    }
}

impl<G: GlobalIndexLike, A: AttributeLike> DebugInvariants for RemoteIndices<G, A> {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "RemoteIndices");
    }

    fn validate_invariants(&self) -> Result<(), IndexError> {
        for (rank, lists) in &self.lists {
            ensure(!lists.is_empty(), || format!("rank {rank} kept with empty lists"))?;
            for (name, list) in [("send", &lists.send), ("receive", &lists.receive)] {
                for (a, b) in list.iter().tuple_windows() {
                    ensure(a.global <= b.global, || {
                        format!("{name} list for rank {rank} out of order: {} then {}", a.global, b.global)
                    })?;
                }
            }
        }
        Ok(())
    }
}

/// What [`RemoteIndexExchange::rebuild`] does with lists that are already there.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RebuildMode {
    /// Discard the old lists and rebuild from scratch.
    #[default]
    Replace,
    /// Merge newly found entries into the old lists. Old entries are first
    /// re-resolved against the current sets, see [`RemoteIndices::repair`].
    Extend,
}

/// Builder and driver of the remote-index exchange.
pub struct RemoteIndexExchange<'a, G, A, C> {
    source: &'a IndexSet<G, A>,
    dest: &'a IndexSet<G, A>,
    comm: &'a C,
    neighbours: Option<BTreeSet<usize>>,
    include_self: bool,
    ignore_public: bool,
    tags: ExchangeTags,
}

impl<'a, G, A, C> RemoteIndexExchange<'a, G, A, C>
where
    G: GlobalIndexLike,
    A: AttributeLike,
    C: Communicator,
{
    /// Exchange between `source` and `dest`; pass the same set twice for the
    /// usual one-set case.
    pub fn new(source: &'a IndexSet<G, A>, dest: &'a IndexSet<G, A>, comm: &'a C) -> Self {
        Self {
            source,
            dest,
            comm,
            neighbours: None,
            include_self: false,
            ignore_public: false,
            tags: ExchangeTags::from_base(REMOTE_INDEX_TAG),
        }
    }

    /// Talk only to these ranks instead of every other rank.
    pub fn with_neighbours<I: IntoIterator<Item = usize>>(mut self, ranks: I) -> Self {
        self.neighbours = Some(ranks.into_iter().collect());
        self
    }

    /// Also match the local source set against the local destination set.
    pub fn include_self(mut self, yes: bool) -> Self {
        self.include_self = yes;
        self
    }

    /// Advertise every pair, not only the public ones.
    pub fn ignore_public(mut self, yes: bool) -> Self {
        self.ignore_public = yes;
        self
    }

    pub fn with_tags(mut self, tags: ExchangeTags) -> Self {
        self.tags = tags;
        self
    }

    /// Run the exchange and return fresh lists.
    pub fn build(&self) -> Result<RemoteIndices<G, A>, IndexError> {
        let mut remote = RemoteIndices::new();
        self.rebuild(&mut remote, RebuildMode::Replace)?;
        Ok(remote)
    }

    /// Run the exchange again and store the result in `remote`.
    ///
    /// The exchange always runs, even if `remote` is already in sync with the
    /// sets. Collective over the neighbour ranks.
    ///
    /// # Errors
    /// - `InvalidIndexSetState` if either set has an open resize transaction.
    /// - `WireVersionMismatch`, `BufferSizeMismatch` or `ProtocolError` on
    ///   inconsistent exchange data.
    /// - `CommError` or `InvalidRank` if the transport fails.
    ///
    /// On error `remote` is left empty.
    pub fn rebuild(&self, remote: &mut RemoteIndices<G, A>, mode: RebuildMode) -> Result<(), IndexError> {
        let previous = std::mem::take(&mut remote.lists);
        remote.source_seq_no = None;
        remote.dest_seq_no = None;

        let fresh = self.exchange()?;
        remote.lists = match mode {
            RebuildMode::Replace => fresh,
            RebuildMode::Extend => {
                let (kept, dropped) = relocate_lists(previous, self.source, self.dest);
                log::trace!("rank {}: {dropped} stale entries dropped before extending", self.comm.rank());
                merge_rank_lists(kept, fresh)
            }
        };
        remote.source_seq_no = Some(self.source.seq_no());
        remote.dest_seq_no = Some(self.dest.seq_no());

        log::debug!(
            "rank {}: remote indices rebuilt ({mode:?}): {} neighbours, {} send / {} receive entries",
            self.comm.rank(),
            remote.neighbours(),
            remote.total_send_len(),
            remote.total_receive_len()
        );
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        remote.debug_assert_invariants();
        Ok(())
    }

    fn two_sets(&self) -> bool {
        !std::ptr::eq(self.source, self.dest)
    }

    fn advertised<'s>(&self, set: &'s IndexSet<G, A>) -> Vec<&'s IndexPair<G, A>> {
        set.iter()
            .filter(|p| self.ignore_public || p.is_public())
            .collect()
    }

    fn neighbour_set(&self) -> BTreeSet<usize> {
        let me = self.comm.rank();
        match &self.neighbours {
            Some(ranks) => ranks.iter().copied().filter(|&r| r != me).collect(),
            None => (0..self.comm.size()).filter(|&r| r != me).collect(),
        }
    }

    fn exchange(&self) -> Result<BTreeMap<usize, RemoteIndexLists<G, A>>, IndexError> {
        require_ground(self.source, "rebuild")?;
        require_ground(self.dest, "rebuild")?;

        let me = self.comm.rank();
        let two_sets = self.two_sets();
        let source_adv = self.advertised(self.source);
        let dest_adv = if two_sets {
            self.advertised(self.dest)
        } else {
            source_adv.clone()
        };

        // source records first, then destination records (two-set case only)
        let mut payload = Vec::with_capacity(source_adv.len() + if two_sets { dest_adv.len() } else { 0 });
        for p in &source_adv {
            payload.push(WireIndexRecord::encode(p.global(), p.attribute())?);
        }
        if two_sets {
            for p in &dest_adv {
                payload.push(WireIndexRecord::encode(p.global(), p.attribute())?);
            }
        }

        let neighbours = self.neighbour_set();
        log::debug!(
            "rank {me}: remote index exchange with {} neighbours, advertising {} source / {} destination pairs",
            neighbours.len(),
            source_adv.len(),
            if two_sets { dest_adv.len() } else { 0 }
        );

        // 1) size phase
        let dest_count = if two_sets { dest_adv.len() } else { 0 };
        let headers = exchange_headers(
            &neighbours,
            |nbr| WireExchangeHeader::new(two_sets, source_adv.len(), dest_count, nbr),
            self.comm,
            self.tags.sizes,
        )?;
        let mut expected = BTreeMap::new();
        for (&nbr, hdr) in &headers {
            if hdr.version() != WIRE_VERSION {
                return Err(IndexError::WireVersionMismatch {
                    neighbor: nbr,
                    expected: WIRE_VERSION,
                    got: hdr.version(),
                });
            }
            if hdr.two_sets() != two_sets {
                return Err(IndexError::ProtocolError {
                    neighbor: nbr,
                    reason: format!(
                        "peer exchanges {} set(s), this rank {}",
                        if hdr.two_sets() { 2 } else { 1 },
                        if two_sets { 2 } else { 1 }
                    ),
                });
            }
            log::trace!(
                "rank {me}: rank {nbr} announces {} source / {} destination records",
                hdr.source_count(),
                hdr.dest_count()
            );
            expected.insert(nbr, hdr.total());
        }

        // 2) data phase
        let outgoing: BTreeMap<usize, &[WireIndexRecord]> =
            neighbours.iter().map(|&nbr| (nbr, payload.as_slice())).collect();
        let received = exchange_records(&outgoing, &expected, self.comm, self.tags.data)?;

        // 3) matching
        let mut lists = BTreeMap::new();
        for (nbr, records) in received {
            let hdr = &headers[&nbr];
            let (src_records, dst_records) = records.split_at(hdr.source_count());
            let remote_source = decode_sorted::<G, A>(src_records, nbr)?;
            let remote_dest = if two_sets {
                decode_sorted::<G, A>(dst_records, nbr)?
            } else {
                remote_source.clone()
            };
            let found = RemoteIndexLists {
                send: match_advertised(&remote_dest, &source_adv, false),
                receive: match_advertised(&remote_source, &dest_adv, false),
            };
            log::trace!(
                "rank {me}: rank {nbr} shares {} send / {} receive entries",
                found.send.len(),
                found.receive.len()
            );
            if !found.is_empty() {
                lists.insert(nbr, found);
            }
        }

        if self.include_self {
            let own_source: Vec<(G, A)> = source_adv.iter().map(|p| (p.global(), p.attribute())).collect();
            let own_dest: Vec<(G, A)> = dest_adv.iter().map(|p| (p.global(), p.attribute())).collect();
            let skip_identical = !two_sets;
            let found = RemoteIndexLists {
                send: match_advertised(&own_dest, &source_adv, skip_identical),
                receive: match_advertised(&own_source, &dest_adv, skip_identical),
            };
            if !found.is_empty() {
                lists.insert(me, found);
            }
        }

        Ok(lists)
    }
}

pub(crate) fn require_ground<G, A>(set: &IndexSet<G, A>, operation: &'static str) -> Result<(), IndexError>
where
    G: GlobalIndexLike,
    A: AttributeLike,
{
    if set.state() != IndexSetState::Ground {
        return Err(IndexError::InvalidIndexSetState {
            operation,
            expected: IndexSetState::Ground,
            found: set.state(),
        });
    }
    Ok(())
}

/// Decode received records and check that they arrive in global order.
fn decode_sorted<G, A>(records: &[WireIndexRecord], neighbor: usize) -> Result<Vec<(G, A)>, IndexError>
where
    G: GlobalIndexLike,
    A: AttributeLike,
{
    let mut out: Vec<(G, A)> = Vec::with_capacity(records.len());
    for rec in records {
        let (g, a) = (rec.global::<G>()?, rec.attribute::<A>()?);
        if let Some(&(prev_g, prev_a)) = out.last() {
            if g < prev_g {
                return Err(IndexError::ProtocolError {
                    neighbor,
                    reason: format!("records out of global order: {prev_g} then {g}"),
                });
            }
            if g == prev_g && a != prev_a {
                log::warn!("rank {neighbor} advertises global {g} twice with attributes {prev_a} and {a}");
            }
        }
        out.push((g, a));
    }
    Ok(out)
}

/// Merge walk of remote `(global, attribute)` records against local pairs,
/// both sorted by global index.
fn match_advertised<G, A>(
    remote: &[(G, A)],
    local: &[&IndexPair<G, A>],
    skip_identical: bool,
) -> Vec<RemoteIndex<G, A>>
where
    G: GlobalIndexLike,
    A: AttributeLike,
{
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < remote.len() && j < local.len() {
        let (g, attribute) = remote[i];
        let pair = local[j];
        match g.cmp(&pair.global()) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                if !(skip_identical && attribute == pair.attribute()) {
                    out.push(RemoteIndex::new(g, pair.local(), pair.attribute(), attribute));
                }
                i += 1;
            }
        }
    }
    out
}

/// Look every entry up again in the current sets; see [`RemoteIndices::repair`].
pub(crate) fn relocate_lists<G, A>(
    lists: BTreeMap<usize, RemoteIndexLists<G, A>>,
    source: &IndexSet<G, A>,
    dest: &IndexSet<G, A>,
) -> (BTreeMap<usize, RemoteIndexLists<G, A>>, usize)
where
    G: GlobalIndexLike,
    A: AttributeLike,
{
    let mut dropped = 0;
    let mut relocate = |list: Vec<RemoteIndex<G, A>>, set: &IndexSet<G, A>| -> Vec<RemoteIndex<G, A>> {
        let before = list.len();
        let out: Vec<_> = list
            .into_iter()
            .filter_map(|e| {
                set.get(e.global)
                    .map(|pair| RemoteIndex::new(e.global, pair.local(), pair.attribute(), e.attribute))
            })
            .collect();
        dropped += before - out.len();
        out
    };
    let mut out = BTreeMap::new();
    for (rank, lists) in lists {
        let repaired = RemoteIndexLists {
            send: relocate(lists.send, source),
            receive: relocate(lists.receive, dest),
        };
        if !repaired.is_empty() {
            out.insert(rank, repaired);
        }
    }
    (out, dropped)
}

fn merge_rank_lists<G, A>(
    old: BTreeMap<usize, RemoteIndexLists<G, A>>,
    new: BTreeMap<usize, RemoteIndexLists<G, A>>,
) -> BTreeMap<usize, RemoteIndexLists<G, A>>
where
    G: GlobalIndexLike,
    A: AttributeLike,
{
    old.into_iter()
        .merge_join_by(new, |a, b| a.0.cmp(&b.0))
        .map(|entry| match entry {
            EitherOrBoth::Left(kept) | EitherOrBoth::Right(kept) => kept,
            EitherOrBoth::Both((rank, old), (_, new)) => (
                rank,
                RemoteIndexLists {
                    send: merge_by_global(old.send, new.send),
                    receive: merge_by_global(old.receive, new.receive),
                },
            ),
        })
        .collect()
}

/// Union of two global-ordered lists; on equal globals the newer entry wins.
fn merge_by_global<G, A>(old: Vec<RemoteIndex<G, A>>, new: Vec<RemoteIndex<G, A>>) -> Vec<RemoteIndex<G, A>>
where
    G: GlobalIndexLike,
    A: AttributeLike,
{
    old.into_iter()
        .merge_join_by(new, |a, b| a.global.cmp(&b.global))
        .map(|entry| match entry {
            EitherOrBoth::Left(e) | EitherOrBoth::Right(e) | EitherOrBoth::Both(_, e) => e,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{Communicator, NoComm, ThreadComm};
    use crate::algs::wire::cast_slice;
    use crate::index::bounds::EntityAttribute::{self, *};
    use crate::index::local_index::LocalIndexEntry;

    type Set = IndexSet<u64, EntityAttribute>;

    fn set(entries: &[(u64, EntityAttribute, bool)]) -> Set {
        IndexSet::from_pairs(entries.iter().copied()).unwrap()
    }

    /// Rank 0 owns 0..4, rank 1 owns 4..8; each ghosts the other's boundary entry.
    fn two_rank_layout(rank: usize) -> Set {
        if rank == 0 {
            set(&[(0, Owner, false), (1, Owner, false), (2, Owner, false), (3, Owner, true), (4, Ghost, true)])
        } else {
            set(&[(3, Ghost, true), (4, Owner, true), (5, Owner, false), (6, Owner, false), (7, Owner, false)])
        }
    }

    fn globals(list: &[RemoteIndex<u64, EntityAttribute>]) -> Vec<u64> {
        list.iter().map(RemoteIndex::global).collect()
    }

    #[test]
    fn one_set_exchange_finds_boundary_entries() {
        let out = ThreadComm::run(2, |comm| {
            let s = two_rank_layout(comm.rank());
            RemoteIndexExchange::new(&s, &s, &comm).build().unwrap()
        });
        let on0 = out[0].get(1).unwrap();
        assert_eq!(globals(on0.send()), vec![3, 4]);
        assert_eq!(globals(on0.receive()), vec![3, 4]);
        assert_eq!(on0.send()[0], RemoteIndex::new(3, 3, Owner, Ghost));
        assert_eq!(on0.send()[1], RemoteIndex::new(4, 4, Ghost, Owner));

        let on1 = out[1].get(0).unwrap();
        assert_eq!(on1.send()[0], RemoteIndex::new(3, 0, Ghost, Owner));
        assert_eq!(on1.send()[1], RemoteIndex::new(4, 1, Owner, Ghost));
        assert_eq!(out[0].neighbours(), 1);
    }

    #[test]
    fn private_entries_are_not_advertised() {
        let out = ThreadComm::run(2, |comm| {
            let s = if comm.rank() == 0 {
                set(&[(1, Owner, false), (2, Owner, true)])
            } else {
                set(&[(1, Ghost, true), (2, Ghost, true)])
            };
            RemoteIndexExchange::new(&s, &s, &comm).build().unwrap()
        });
        assert_eq!(globals(out[0].get(1).unwrap().send()), vec![2]);
        assert_eq!(globals(out[1].get(0).unwrap().receive()), vec![2]);
    }

    #[test]
    fn ignore_public_advertises_everything() {
        let out = ThreadComm::run(2, |comm| {
            let s = set(&[(1, Owner, false), (2, Owner, false)]);
            RemoteIndexExchange::new(&s, &s, &comm).ignore_public(true).build().unwrap()
        });
        assert_eq!(globals(out[0].get(1).unwrap().send()), vec![1, 2]);
    }

    #[test]
    fn ranks_without_overlap_are_dropped() {
        let out = ThreadComm::run(3, |comm| {
            // rank 2 shares nothing with anyone
            let s = match comm.rank() {
                0 => set(&[(1, Owner, true)]),
                1 => set(&[(1, Ghost, true)]),
                _ => set(&[(99, Owner, true)]),
            };
            RemoteIndexExchange::new(&s, &s, &comm).build().unwrap()
        });
        assert_eq!(out[0].ranks().collect::<Vec<_>>(), vec![1]);
        assert_eq!(out[1].ranks().collect::<Vec<_>>(), vec![0]);
        assert!(out[2].is_empty());
    }

    #[test]
    fn two_sets_fill_send_and_receive_separately() {
        let out = ThreadComm::run(2, |comm| {
            let (source, dest) = if comm.rank() == 0 {
                (set(&[(1, Owner, true), (2, Owner, true)]), set(&[(5, Ghost, true)]))
            } else {
                (set(&[(5, Owner, true)]), set(&[(2, Ghost, true)]))
            };
            RemoteIndexExchange::new(&source, &dest, &comm).build().unwrap()
        });
        let on0 = out[0].get(1).unwrap();
        assert_eq!(on0.send(), &[RemoteIndex::new(2, 1, Owner, Ghost)]);
        assert_eq!(on0.receive(), &[RemoteIndex::new(5, 0, Ghost, Owner)]);
        let on1 = out[1].get(0).unwrap();
        assert_eq!(on1.send(), &[RemoteIndex::new(5, 0, Owner, Ghost)]);
        assert_eq!(on1.receive(), &[RemoteIndex::new(2, 0, Ghost, Owner)]);
    }

    #[test]
    fn include_self_matches_local_copies() {
        let source = set(&[(1, Owner, true), (2, Owner, true)]);
        let dest = set(&[(2, Ghost, true), (3, Ghost, true)]);
        let remote = RemoteIndexExchange::new(&source, &dest, &NoComm)
            .include_self(true)
            .build()
            .unwrap();
        let own = remote.get(0).unwrap();
        assert_eq!(own.send(), &[RemoteIndex::new(2, 1, Owner, Ghost)]);
        assert_eq!(own.receive(), &[RemoteIndex::new(2, 0, Ghost, Owner)]);

        let one = RemoteIndexExchange::new(&source, &source, &NoComm)
            .include_self(true)
            .build()
            .unwrap();
        assert!(one.is_empty());
    }

    #[test]
    fn rebuild_requires_closed_transactions() {
        let mut s: Set = set(&[(1, Owner, true)]);
        s.begin_resize().unwrap();
        let err = RemoteIndexExchange::new(&s, &s, &NoComm).build().unwrap_err();
        assert_eq!(
            err,
            IndexError::InvalidIndexSetState {
                operation: "rebuild",
                expected: IndexSetState::Ground,
                found: IndexSetState::Resize,
            }
        );
    }

    #[test]
    fn sync_tracking_follows_sequence_numbers() {
        let mut s = set(&[(1, Owner, true)]);
        let remote = RemoteIndexExchange::new(&s, &s, &NoComm).build().unwrap();
        assert!(remote.is_synced(&s, &s));
        s.begin_resize().unwrap();
        s.add(2, LocalIndexEntry::new(0, Owner, true)).unwrap();
        s.end_resize().unwrap();
        assert!(!remote.is_synced(&s, &s));
    }

    #[test]
    fn extend_keeps_old_entries() {
        // rank 0 first talks to rank 1 only, then extends with rank 2
        let out = ThreadComm::run(3, |comm| {
            let s = set(&[(1, if comm.rank() == 0 { Owner } else { Ghost }, true)]);
            let (first, second): (Vec<usize>, Vec<usize>) = match comm.rank() {
                0 => (vec![1], vec![2]),
                1 => (vec![0], vec![]),
                _ => (vec![], vec![0]),
            };
            let mut remote = RemoteIndexExchange::new(&s, &s, &comm)
                .with_neighbours(first)
                .build()
                .unwrap();
            RemoteIndexExchange::new(&s, &s, &comm)
                .with_neighbours(second)
                .rebuild(&mut remote, RebuildMode::Extend)
                .unwrap();
            remote
        });
        assert_eq!(out[0].ranks().collect::<Vec<_>>(), vec![1, 2]);
        assert!(out[1].get(0).is_some());
        assert!(out[2].get(0).is_some());
    }

    #[test]
    fn extend_after_resize_follows_the_new_generation() {
        let out = ThreadComm::run(2, |comm| {
            let mut s = set(&[(1, Owner, true), (2, Owner, true)]);
            let mut remote = RemoteIndexExchange::new(&s, &s, &comm).build().unwrap();

            s.begin_resize().unwrap();
            s.mark_as_deleted(s.handle(1).unwrap()).unwrap();
            s.end_resize().unwrap();
            RemoteIndexExchange::new(&s, &s, &comm)
                .rebuild(&mut remote, RebuildMode::Extend)
                .unwrap();
            assert!(remote.is_synced(&s, &s));
            remote
        });
        let lists = out[0].get(1).unwrap();
        assert_eq!(lists.send(), &[RemoteIndex::new(2, 0, Owner, Owner)]);
        assert_eq!(lists.receive(), lists.send());
        // the reduced pattern names every position once
        let pattern = crate::algs::communication_pattern::convert_remote_indices_to_communication_pattern(
            &out[0],
            &|_: &EntityAttribute| true,
            &|_: &EntityAttribute| true,
        );
        assert_eq!(pattern.send_pattern()[&1], vec![0]);
    }

    #[test]
    fn repair_drops_gone_globals_and_moves_positions() {
        let mut s = set(&[(1, Owner, true), (2, Ghost, true), (3, Owner, true)]);
        let mut remote = RemoteIndices::new();
        for g in [1, 3] {
            let local = s.position(g).unwrap();
            remote.insert(4, ListKind::Send, RemoteIndex::new(g, local, Owner, Ghost));
        }
        remote.insert(5, ListKind::Receive, RemoteIndex::new(2, 1, Ghost, Owner));

        s.begin_resize().unwrap();
        s.mark_as_deleted(s.handle(2).unwrap()).unwrap();
        s.mark_as_deleted(s.handle(1).unwrap()).unwrap();
        s.add(0, LocalIndexEntry::new(0, Border, true)).unwrap();
        s.end_resize().unwrap();
        assert!(!remote.is_synced(&s, &s));

        assert_eq!(remote.repair(&s, &s), Ok(2));
        assert!(remote.is_synced(&s, &s));
        assert_eq!(remote.ranks().collect::<Vec<_>>(), vec![4]);
        assert_eq!(remote.get(4).unwrap().send(), &[RemoteIndex::new(3, 1, Owner, Ghost)]);
    }

    #[test]
    fn insert_keeps_global_order_and_replaces_equal_entries() {
        let mut remote: RemoteIndices<u64, EntityAttribute> = RemoteIndices::new();
        assert_eq!(remote.insert(2, ListKind::Send, RemoteIndex::new(9, 2, Owner, Ghost)), None);
        assert_eq!(remote.insert(2, ListKind::Send, RemoteIndex::new(3, 0, Owner, Ghost)), None);
        assert_eq!(remote.insert(2, ListKind::Send, RemoteIndex::new(5, 1, Owner, Ghost)), None);
        // same global, other remote attribute: a second entry
        assert_eq!(remote.insert(2, ListKind::Send, RemoteIndex::new(5, 1, Owner, Border)), None);
        let replaced = remote.insert(2, ListKind::Send, RemoteIndex::new(5, 7, Owner, Ghost));
        assert_eq!(replaced, Some(RemoteIndex::new(5, 1, Owner, Ghost)));

        let lists = remote.get(2).unwrap();
        assert_eq!(globals(lists.send()), vec![3, 5, 5, 9]);
        assert_eq!(lists.send()[1], RemoteIndex::new(5, 7, Owner, Ghost));
        assert!(lists.receive().is_empty());
        assert!(remote.validate_invariants().is_ok());
    }

    #[test]
    fn remove_drops_emptied_ranks() {
        let mut remote: RemoteIndices<u64, EntityAttribute> = RemoteIndices::new();
        remote.insert(1, ListKind::Send, RemoteIndex::new(4, 0, Owner, Ghost));
        remote.insert(1, ListKind::Receive, RemoteIndex::new(4, 0, Owner, Ghost));
        assert_eq!(remote.remove(1, ListKind::Send, 4), 1);
        assert_eq!(remote.neighbours(), 1);
        assert_eq!(remote.remove(1, ListKind::Send, 4), 0);
        assert_eq!(remote.remove(1, ListKind::Receive, 4), 1);
        assert!(remote.is_empty());
        assert_eq!(remote.remove(8, ListKind::Receive, 4), 0);
    }

    #[test]
    fn wrong_wire_version_is_rejected() {
        let world = ThreadComm::world(2);
        let mut hdr = WireExchangeHeader::new(false, 0, 0, 0).unwrap();
        hdr.version_le = 7u16.to_le();
        world[1].isend(0, REMOTE_INDEX_TAG.as_u16(), cast_slice(&[hdr]));
        let s = set(&[(1, Owner, true)]);
        let err = RemoteIndexExchange::new(&s, &s, &world[0]).build().unwrap_err();
        assert_eq!(
            err,
            IndexError::WireVersionMismatch {
                neighbor: 1,
                expected: WIRE_VERSION,
                got: 7
            }
        );
    }

    #[test]
    fn unordered_records_are_a_protocol_error() {
        let world = ThreadComm::world(2);
        let tags = ExchangeTags::from_base(REMOTE_INDEX_TAG);
        let hdr = WireExchangeHeader::new(false, 2, 0, 0).unwrap();
        let records = [
            WireIndexRecord::encode(5u64, Owner).unwrap(),
            WireIndexRecord::encode(3u64, Owner).unwrap(),
        ];
        world[1].isend(0, tags.sizes.as_u16(), cast_slice(&[hdr]));
        world[1].isend(0, tags.data.as_u16(), cast_slice(&records));
        let s = set(&[(3, Ghost, true)]);
        let mut remote = RemoteIndices::new();
        let err = RemoteIndexExchange::new(&s, &s, &world[0])
            .rebuild(&mut remote, RebuildMode::Replace)
            .unwrap_err();
        assert!(matches!(err, IndexError::ProtocolError { neighbor: 1, .. }));
        assert!(remote.is_empty());
    }

    #[test]
    fn display_lists_ranks_in_order() {
        let out = ThreadComm::run(2, |comm| {
            let s = set(&[(7, if comm.rank() == 0 { Owner } else { Ghost }, true)]);
            RemoteIndexExchange::new(&s, &s, &comm).build().unwrap()
        });
        assert_eq!(
            out[0].to_string(),
            "rank 1: send [{global=7, local=0, local_attribute=owner, remote_attribute=ghost}] \
             receive [{global=7, local=0, local_attribute=owner, remote_attribute=ghost}]\n"
        );
    }
}
