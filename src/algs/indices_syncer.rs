//! Restore missing entries of an index set and its remote indices from the
//! neighbours' knowledge.
//!
//! After a rank dropped some of its shared entries (or never had them), the
//! neighbours that still list those globals tell it which attribute it is
//! supposed to hold and which other ranks hold a copy. One exchange with the
//! ranks already present in the [`RemoteIndices`] is enough; no collective
//! over the whole communicator is needed.
//!
//! Each message to a neighbour `q` carries, for every global the sender shares
//! with `q`, one [`WireSyncRecord`] per rank known to hold it: first the sender
//! itself, then every listed rank (including `q`, which is how `q` learns its
//! own attribute). Records are in global order.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;

use crate::algs::communicator::{CommTag, Communicator, ExchangeTags};
use crate::algs::exchange::{exchange_counts, exchange_records};
use crate::algs::remote_indices::{
    ListKind, RemoteIndex, RemoteIndexLists, RemoteIndices, relocate_lists, require_ground,
};
use crate::algs::wire::WireSyncRecord;
#[cfg(any(debug_assertions, feature = "check-invariants"))]
use crate::debug_invariants::DebugInvariants;
use crate::index::bounds::{AttributeLike, GlobalIndexLike};
use crate::index::index_set::IndexSet;
use crate::index::local_index::LocalIndexEntry;
use crate::index_error::IndexError;

/// Default base tag of the indices sync (counts, then records on base + 1).
pub const INDICES_SYNC_TAG: CommTag = CommTag::new(0x1D80);

/// What a sync changed on this rank.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Globals added to the index set.
    pub added_indices: usize,
    /// Entries added to the remote index lists (send and receive counted once).
    pub added_remote: usize,
}

/// Driver of the indices sync for remote indices of one index set.
pub struct IndicesSyncer<'a, G, A, C> {
    set: &'a mut IndexSet<G, A>,
    remote: &'a mut RemoteIndices<G, A>,
    comm: &'a C,
    tags: ExchangeTags,
}

/// Additions decided from the received messages, applied in one transaction.
struct SyncPlan<G, A> {
    new_pairs: BTreeMap<G, A>,
    remote: Vec<(usize, G, A, A)>,
}

impl<'a, G, A, C> IndicesSyncer<'a, G, A, C>
where
    G: GlobalIndexLike,
    A: AttributeLike,
    C: Communicator,
{
    /// `remote` must describe `set` against itself (one-set exchange).
    pub fn new(set: &'a mut IndexSet<G, A>, remote: &'a mut RemoteIndices<G, A>, comm: &'a C) -> Self {
        Self {
            set,
            remote,
            comm,
            tags: ExchangeTags::from_base(INDICES_SYNC_TAG),
        }
    }

    pub fn with_tags(mut self, tags: ExchangeTags) -> Self {
        self.tags = tags;
        self
    }

    /// Exchange with every rank present in the remote indices, add the globals
    /// the neighbours say this rank holds, and record every rank they name.
    ///
    /// Added globals are public and take the attribute the neighbour recorded
    /// for this rank. Entries of `remote` whose global is no longer in the set
    /// are dropped first. Afterwards `remote` is synced with the new generation
    /// of the set.
    ///
    /// # Errors
    /// - `InvalidIndexSetState` if the set has an open resize transaction.
    /// - `InvariantViolation` if `remote` has differing send and receive lists
    ///   (built from two sets).
    /// - `ProtocolError` if a message is out of global order or misses the
    ///   record for this rank.
    /// - `CommError`, `BufferSizeMismatch`, `InvalidRank` from the exchange.
    ///
    /// On error neither the set nor `remote` is modified.
    pub fn sync(self) -> Result<SyncSummary, IndexError> {
        let me = self.comm.rank();
        require_ground(self.set, "sync")?;
        if let Some((rank, _)) = self.remote.iter().find(|(_, l)| l.send() != l.receive()) {
            return Err(IndexError::InvariantViolation(format!(
                "indices sync needs the remote indices of one index set; lists for rank {rank} differ"
            )));
        }

        // ranks listed before the stale entries go, so both sides agree on who talks
        let neighbours: BTreeSet<usize> = self.remote.ranks().filter(|&r| r != me).collect();
        let (old, dropped) = relocate_lists(self.remote.lists().clone(), self.set, self.set);
        log::debug!(
            "rank {me}: indices sync with {} neighbours ({dropped} stale entries dropped)",
            neighbours.len()
        );

        let outgoing = self.outgoing(&old, &neighbours)?;
        let counts: BTreeMap<usize, usize> = outgoing.iter().map(|(&q, recs)| (q, recs.len())).collect();
        let expected = exchange_counts(&neighbours, &counts, self.comm, self.tags.sizes)?;
        let borrowed: BTreeMap<usize, &[WireSyncRecord]> =
            outgoing.iter().map(|(&q, recs)| (q, recs.as_slice())).collect();
        let received = exchange_records(&borrowed, &expected, self.comm, self.tags.data)?;

        let plan = self.plan(&received)?;
        self.apply(old, plan)
    }

    /// Records for every neighbour, built from the lists as they were before
    /// anything is added.
    fn outgoing(
        &self,
        old: &BTreeMap<usize, RemoteIndexLists<G, A>>,
        neighbours: &BTreeSet<usize>,
    ) -> Result<BTreeMap<usize, Vec<WireSyncRecord>>, IndexError> {
        let me = self.comm.rank();
        let mut out = BTreeMap::new();
        for &q in neighbours {
            let mut records = Vec::new();
            for shared in old.get(&q).map(|l| l.send()).unwrap_or_default() {
                let g = shared.global();
                records.push(WireSyncRecord::encode(g, me, shared.local_attribute())?);
                for (&p, lists) in old.iter().filter(|(p, _)| **p != me) {
                    let list = lists.send();
                    let start = list.partition_point(|e| e.global() < g);
                    for known in list[start..].iter().take_while(|e| e.global() == g) {
                        records.push(WireSyncRecord::encode(g, p, known.attribute())?);
                    }
                }
            }
            log::trace!("rank {me}: {} sync records for rank {q}", records.len());
            out.insert(q, records);
        }
        Ok(out)
    }

    fn plan(&self, received: &BTreeMap<usize, Vec<WireSyncRecord>>) -> Result<SyncPlan<G, A>, IndexError> {
        let me = self.comm.rank();
        let mut plan = SyncPlan {
            new_pairs: BTreeMap::new(),
            remote: Vec::new(),
        };
        for (&sender, records) in received {
            let decoded: Vec<(G, usize, A)> = records
                .iter()
                .map(|r| Ok((r.global::<G>()?, r.rank(), r.attribute::<A>()?)))
                .collect::<Result<_, IndexError>>()?;
            if let Some((a, b)) = decoded.iter().tuple_windows().find(|(a, b)| b.0 < a.0) {
                return Err(IndexError::ProtocolError {
                    neighbor: sender,
                    reason: format!("sync records out of global order: {} then {}", a.0, b.0),
                });
            }
            for (g, group) in &decoded.iter().chunk_by(|rec| rec.0) {
                let group: Vec<_> = group.collect();
                let mine = group
                    .iter()
                    .find(|rec| rec.1 == me)
                    .map(|rec| rec.2)
                    .ok_or_else(|| IndexError::ProtocolError {
                        neighbor: sender,
                        reason: format!("no record for this rank in the entry for global {g}"),
                    })?;
                let local_attribute = match self.set.get(g) {
                    Some(pair) => {
                        if pair.attribute() != mine {
                            log::warn!(
                                "rank {me}: rank {sender} expects global {g} here as {mine}, held as {}",
                                pair.attribute()
                            );
                        }
                        pair.attribute()
                    }
                    None => *plan.new_pairs.entry(g).or_insert(mine),
                };
                for &&(_, p, attribute) in group.iter().filter(|rec| rec.1 != me) {
                    plan.remote.push((p, g, local_attribute, attribute));
                }
            }
        }
        Ok(plan)
    }

    fn apply(self, old: BTreeMap<usize, RemoteIndexLists<G, A>>, plan: SyncPlan<G, A>) -> Result<SyncSummary, IndexError> {
        let me = self.comm.rank();
        let added_indices = plan.new_pairs.len();
        if added_indices > 0 {
            self.set.begin_resize()?;
            for (&g, &attribute) in &plan.new_pairs {
                self.set.add(g, LocalIndexEntry::new(0, attribute, true))?;
            }
            self.set.end_resize()?;
        }

        // additions shift local positions
        let (lists, _) = relocate_lists(old, self.set, self.set);
        let mut updated = RemoteIndices::new();
        updated.install(lists, self.set.seq_no());
        let mut added_remote = 0;
        for (p, g, local_attribute, attribute) in plan.remote {
            let local = self
                .set
                .position(g)
                .ok_or_else(|| IndexError::GlobalIndexNotFound(g.to_string()))?;
            let entry = RemoteIndex::new(g, local, local_attribute, attribute);
            if updated.insert(p, ListKind::Send, entry).is_none() {
                added_remote += 1;
            }
            updated.insert(p, ListKind::Receive, entry);
        }
        *self.remote = updated;

        log::debug!(
            "rank {me}: indices sync added {added_indices} globals and {added_remote} remote entries"
        );
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        self.remote.debug_assert_invariants();
        Ok(SyncSummary {
            added_indices,
            added_remote,
        })
    }
}
