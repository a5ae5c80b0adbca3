//! Attribute-free per-rank send/receive lists of local positions.
//!
//! A [`CommunicationPattern`] is what payload exchange code consumes: for each
//! rank, which local positions to send and into which local positions to
//! receive. It is filled by hand, derived from [`RemoteIndices`] with
//! [`convert_remote_indices_to_communication_pattern`], or built directly by
//! the neighbour mapping builder.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::algs::remote_indices::RemoteIndices;
use crate::debug_invariants::{DebugInvariants, ensure};
use crate::index::bounds::{AttributeLike, GlobalIndexLike};
use crate::index::selection::AttributeFilter;
use crate::index_error::IndexError;

/// Per-rank send and receive lists of local positions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunicationPattern {
    send: BTreeMap<usize, Vec<usize>>,
    recv: BTreeMap<usize, Vec<usize>>,
}

impl CommunicationPattern {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from explicit `{rank: [local positions]}` maps.
    pub fn from_maps(send: BTreeMap<usize, Vec<usize>>, recv: BTreeMap<usize, Vec<usize>>) -> Self {
        Self { send, recv }
    }

    pub fn send_pattern(&self) -> &BTreeMap<usize, Vec<usize>> {
        &self.send
    }

    pub fn recv_pattern(&self) -> &BTreeMap<usize, Vec<usize>> {
        &self.recv
    }

    pub fn send_pattern_mut(&mut self) -> &mut BTreeMap<usize, Vec<usize>> {
        &mut self.send
    }

    pub fn recv_pattern_mut(&mut self) -> &mut BTreeMap<usize, Vec<usize>> {
        &mut self.recv
    }

    pub fn push_send(&mut self, rank: usize, local: usize) {
        self.send.entry(rank).or_default().push(local);
    }

    pub fn push_recv(&mut self, rank: usize, local: usize) {
        self.recv.entry(rank).or_default().push(local);
    }

    /// Remove every rank whose send and receive lists are both empty.
    ///
    /// A rank missing from one map counts as empty there. Ranks with at least
    /// one non-empty list keep both entries as they are.
    pub fn strip(&mut self) {
        let idle: Vec<usize> = self
            .ranks()
            .filter(|r| self.send_len(*r) == 0 && self.recv_len(*r) == 0)
            .collect();
        for rank in idle {
            self.send.remove(&rank);
            self.recv.remove(&rank);
        }
    }

    /// Ranks present in either map, ascending.
    pub fn ranks(&self) -> impl Iterator<Item = usize> + '_ {
        self.send.keys().merge(self.recv.keys()).dedup().copied()
    }

    pub fn send_len(&self, rank: usize) -> usize {
        self.send.get(&rank).map_or(0, Vec::len)
    }

    pub fn recv_len(&self, rank: usize) -> usize {
        self.recv.get(&rank).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.send.is_empty() && self.recv.is_empty()
    }
}

impl fmt::Display for CommunicationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let empty = Vec::new();
        for rank in self.ranks() {
            writeln!(
                f,
                "rank {rank}: send [{}] recv [{}]",
                self.send.get(&rank).unwrap_or(&empty).iter().format(", "),
                self.recv.get(&rank).unwrap_or(&empty).iter().format(", ")
            )?;
        }
        Ok(())
    }
}

impl DebugInvariants for CommunicationPattern {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "CommunicationPattern");
    }

    fn validate_invariants(&self) -> Result<(), IndexError> {
        for (dir, map) in [("send", &self.send), ("recv", &self.recv)] {
            for (rank, list) in map {
                let mut seen = BTreeSet::new();
                for &local in list {
                    ensure(seen.insert(local), || {
                        format!("{dir} list for rank {rank} repeats local position {local}")
                    })?;
                }
            }
        }
        Ok(())
    }
}

/// Reduce remote index information to a communication pattern.
///
/// For each rank `r` the send list holds the local positions of `remote[r]`
/// send entries whose local attribute passes `source_flags` and whose remote
/// attribute passes `dest_flags`. The receive list holds the local positions
/// of `remote[r]` receive entries whose local attribute passes `dest_flags`
/// and whose remote attribute passes `source_flags`.
///
/// Both lists are in global order, so the send list on one rank pairs element
/// by element with the receive list on its peer. Every rank of `remote`
/// appears, possibly with empty lists; call [`CommunicationPattern::strip`]
/// to drop those.
pub fn convert_remote_indices_to_communication_pattern<G, A, S, D>(
    remote: &RemoteIndices<G, A>,
    source_flags: &S,
    dest_flags: &D,
) -> CommunicationPattern
where
    G: GlobalIndexLike,
    A: AttributeLike,
    S: AttributeFilter<A>,
    D: AttributeFilter<A>,
{
    let mut pattern = CommunicationPattern::new();
    for (rank, lists) in remote.iter() {
        let send = lists
            .send()
            .iter()
            .filter(|ri| source_flags.accepts(&ri.local_attribute()) && dest_flags.accepts(&ri.attribute()))
            .map(|ri| ri.local())
            .collect();
        let recv = lists
            .receive()
            .iter()
            .filter(|ri| dest_flags.accepts(&ri.local_attribute()) && source_flags.accepts(&ri.attribute()))
            .map(|ri| ri.local())
            .collect();
        pattern.send.insert(rank, send);
        pattern.recv.insert(rank, recv);
    }
    log::debug!(
        "communication pattern over {} ranks: {} send / {} recv positions",
        pattern.send.len(),
        pattern.send.values().map(Vec::len).sum::<usize>(),
        pattern.recv.values().map(Vec::len).sum::<usize>()
    );
    #[cfg(any(debug_assertions, feature = "check-invariants"))]
    pattern.debug_assert_invariants();
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{Communicator, ThreadComm};
    use crate::algs::remote_indices::RemoteIndexExchange;
    use crate::index::bounds::EntityAttribute::{self, *};
    use crate::index::index_set::IndexSet;
    use crate::index::selection::AttributeSet;

    #[test]
    fn manual_construction_and_strip() {
        let mut p = CommunicationPattern::new();
        p.push_send(1, 4);
        p.push_send(1, 2);
        p.push_recv(3, 0);
        p.send_pattern_mut().insert(2, Vec::new());
        p.recv_pattern_mut().insert(1, Vec::new());
        p.strip();
        assert_eq!(p.ranks().collect::<Vec<_>>(), vec![1, 3]);
        // rank 1 keeps its empty receive entry since its send list is not empty
        assert_eq!(p.recv_pattern().get(&1), Some(&Vec::new()));
        assert_eq!(p.send_pattern()[&1], vec![4, 2]);
        assert_eq!(p.send_len(3), 0);
        assert_eq!(p.recv_len(3), 1);
    }

    #[test]
    fn from_maps_and_display() {
        let send = BTreeMap::from([(2, vec![0, 1])]);
        let recv = BTreeMap::from([(0, vec![5]), (2, vec![7, 8])]);
        let p = CommunicationPattern::from_maps(send, recv);
        assert_eq!(
            p.to_string(),
            "rank 0: send [] recv [5]\nrank 2: send [0, 1] recv [7, 8]\n"
        );
    }

    #[test]
    fn serializes_as_two_maps() {
        let p = CommunicationPattern::from_maps(BTreeMap::from([(1, vec![3])]), BTreeMap::new());
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"send":{"1":[3]},"recv":{}}"#);
        let back: CommunicationPattern = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn repeated_position_is_an_invariant_violation() {
        let p = CommunicationPattern::from_maps(BTreeMap::from([(1, vec![3, 3])]), BTreeMap::new());
        assert!(matches!(p.validate_invariants(), Err(IndexError::InvariantViolation(_))));
    }

    #[test]
    fn owners_send_to_ghosts() {
        // rank 0 owns 0..3 and ghosts 3; rank 1 owns 3..6 and ghosts 2
        let out = ThreadComm::run(2, |comm| {
            let s: IndexSet<u32, EntityAttribute> = if comm.rank() == 0 {
                IndexSet::from_pairs([(0, Owner, false), (1, Owner, false), (2, Owner, true), (3, Ghost, true)])
            } else {
                IndexSet::from_pairs([(2, Ghost, true), (3, Owner, true), (4, Owner, false), (5, Owner, false)])
            }
            .unwrap();
            let remote = RemoteIndexExchange::new(&s, &s, &comm).build().unwrap();
            let mut p = convert_remote_indices_to_communication_pattern(
                &remote,
                &AttributeSet::from([Owner]),
                &AttributeSet::from([Ghost]),
            );
            p.strip();
            p
        });
        assert_eq!(out[0].send_pattern()[&1], vec![2]);
        assert_eq!(out[0].recv_pattern()[&1], vec![3]);
        assert_eq!(out[1].send_pattern()[&0], vec![1]);
        assert_eq!(out[1].recv_pattern()[&0], vec![0]);
    }

    #[test]
    fn filtered_out_ranks_are_removed_by_strip() {
        let out = ThreadComm::run(2, |comm| {
            // both ranks hold global 9 as overlap, which neither filter accepts
            let s: IndexSet<u32, EntityAttribute> =
                IndexSet::from_pairs([(9, Overlap, true)]).unwrap();
            let remote = RemoteIndexExchange::new(&s, &s, &comm).build().unwrap();
            let mut p = convert_remote_indices_to_communication_pattern(
                &remote,
                &|a: &EntityAttribute| *a == Owner,
                &|a: &EntityAttribute| *a == Ghost,
            );
            assert_eq!(p.ranks().count(), 1);
            p.strip();
            p
        });
        assert!(out.iter().all(CommunicationPattern::is_empty));
    }
}
