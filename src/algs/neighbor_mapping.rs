//! Point-to-point neighbour mapping for block-partitioned index layouts.
//!
//! When every rank owns one contiguous range of global indices and holds a
//! halo of entries owned by a few neighbours, the communication pattern can be
//! built without advertising whole index sets:
//!
//! 1. **ranges**: learn the owned range of each neighbour, either from an
//!    explicit neighbour list (point-to-point) or by all-gathering ranges and
//!    spans ([`NeighborDiscovery::RangeOverlap`]);
//! 2. **sizes**: tell each owner how many of its globals this rank holds;
//! 3. **data**: send those globals; the owner maps them to its own positions.
//!
//! For a layout where owned entries are `Owner` and halo entries are `Ghost`,
//! the result equals the pattern derived from [`RemoteIndices`] with source
//! flags `{Owner}` and destination flags `{Ghost}`.
//!
//! [`RemoteIndices`]: crate::algs::remote_indices::RemoteIndices

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;

use crate::algs::communication_pattern::CommunicationPattern;
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::{exchange_counts, exchange_headers, exchange_records};
use crate::algs::wire::{WireGlobal, WireRange, cast_slice, cast_slice_mut};
use crate::index::bounds::{AttributeLike, GlobalIndexLike};
use crate::index::index_set::{IndexSet, IndexSetState};
use crate::index_error::IndexError;

/// Default base tag: ranges on the base, sizes on base + 1, data on base + 2.
pub const NEIGHBOR_MAPPING_TAG: CommTag = CommTag::new(0x1D70);

/// How a rank finds the owners of its halo entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NeighborDiscovery {
    /// Swap owned ranges with exactly these ranks. The relation must be
    /// symmetric: if `a` lists `b`, `b` lists `a`.
    Explicit(BTreeSet<usize>),
    /// All-gather owned ranges and local spans; `q` is a neighbour if its
    /// owned range meets this rank's span or the other way round.
    RangeOverlap,
}

/// Builds a [`CommunicationPattern`] from owned ranges and local globals.
pub struct NeighborIndexMappingBuilder<'a, G, C> {
    comm: &'a C,
    owned: Range<G>,
    discovery: NeighborDiscovery,
    tag: CommTag,
}

impl<'a, G, C> NeighborIndexMappingBuilder<'a, G, C>
where
    G: GlobalIndexLike,
    C: Communicator,
{
    /// `owned` is this rank's half-open range of owned global indices.
    pub fn new(comm: &'a C, owned: Range<G>, discovery: NeighborDiscovery) -> Self {
        Self {
            comm,
            owned,
            discovery,
            tag: NEIGHBOR_MAPPING_TAG,
        }
    }

    /// Use `base`, `base + 1` and `base + 2` as message tags.
    pub fn with_tag(mut self, base: CommTag) -> Self {
        self.tag = base;
        self
    }

    /// Map the globals of `set`; positions are the set's local indices.
    ///
    /// # Errors
    /// `InvalidIndexSetState` if `set` has an open resize transaction, plus
    /// everything [`build`](Self::build) reports.
    pub fn build_from_index_set<A: AttributeLike>(
        &self,
        set: &IndexSet<G, A>,
    ) -> Result<CommunicationPattern, IndexError> {
        if set.state() != IndexSetState::Ground {
            return Err(IndexError::InvalidIndexSetState {
                operation: "build_from_index_set",
                expected: IndexSetState::Ground,
                found: set.state(),
            });
        }
        let globals: Vec<G> = set.iter().map(|p| p.global()).collect();
        self.build(&globals)
    }

    /// Build the pattern for the local sequence `globals` (owned and halo
    /// entries; position `i` holds `globals[i]`). Collective over the
    /// neighbour ranks.
    ///
    /// # Errors
    /// - `UnresolvedGhost` if a halo global is owned by no neighbour.
    /// - `ProtocolError` if a neighbour requests a global this rank does not hold.
    /// - `InvalidWireGlobal`, `BufferSizeMismatch`, `CommError`, `InvalidRank`
    ///   from the exchange.
    pub fn build(&self, globals: &[G]) -> Result<CommunicationPattern, IndexError> {
        let me = self.comm.rank();
        let my_range = WireRange::new(wire(self.owned.start)?, wire(self.owned.end)?);

        let ranges = match &self.discovery {
            NeighborDiscovery::Explicit(ranks) => {
                let nbrs: BTreeSet<usize> = ranks.iter().copied().filter(|&r| r != me).collect();
                exchange_headers(&nbrs, |_| Ok(my_range), self.comm, self.tag)?
            }
            NeighborDiscovery::RangeOverlap => self.discover_by_overlap(my_range, span_of(globals)?)?,
        };
        let neighbours: BTreeSet<usize> = ranges.keys().copied().collect();
        log::debug!("rank {me}: neighbour mapping with ranks {neighbours:?}");

        // receive side: which local positions each owner has to fill
        let mut recv: BTreeMap<usize, Vec<usize>> =
            neighbours.iter().map(|&q| (q, Vec::new())).collect();
        let mut requests: BTreeMap<usize, Vec<WireGlobal>> =
            neighbours.iter().map(|&q| (q, Vec::new())).collect();
        for (pos, &g) in globals.iter().enumerate() {
            if self.owned.contains(&g) {
                continue;
            }
            let id = wire(g)?;
            let owner = ranges
                .iter()
                .find(|(_, range)| range.contains(id))
                .map(|(&q, _)| q)
                .ok_or_else(|| IndexError::UnresolvedGhost(g.to_string()))?;
            recv.entry(owner).or_default().push(pos);
            requests.entry(owner).or_default().push(WireGlobal::of(id));
        }

        // sizes, then the requested globals themselves
        let counts: BTreeMap<usize, usize> = requests.iter().map(|(&q, l)| (q, l.len())).collect();
        let expected = exchange_counts(&neighbours, &counts, self.comm, self.tag.offset(1))?;
        let outgoing: BTreeMap<usize, &[WireGlobal]> =
            requests.iter().map(|(&q, l)| (q, l.as_slice())).collect();
        let incoming = exchange_records(&outgoing, &expected, self.comm, self.tag.offset(2))?;

        // send side: answer each request with our own positions
        let owned_at: HashMap<G, usize> = globals
            .iter()
            .enumerate()
            .filter(|(_, g)| self.owned.contains(*g))
            .map(|(pos, &g)| (g, pos))
            .collect();
        let mut send: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (q, wanted) in incoming {
            let mut positions = Vec::with_capacity(wanted.len());
            for w in wanted {
                let pos = G::from_wire(w.get())
                    .and_then(|g| owned_at.get(&g).copied())
                    .ok_or_else(|| IndexError::ProtocolError {
                        neighbor: q,
                        reason: format!("requested global {} is not owned here", w.get()),
                    })?;
                positions.push(pos);
            }
            send.insert(q, positions);
        }

        let mut pattern = CommunicationPattern::from_maps(send, recv);
        pattern.strip();
        log::debug!(
            "rank {me}: neighbour mapping done, {} ranks",
            pattern.ranks().count()
        );
        Ok(pattern)
    }

    /// All-gather `(owned range, span)` of every rank and keep the ranks whose
    /// range meets our span or whose span meets our range.
    fn discover_by_overlap(
        &self,
        my_range: WireRange,
        my_span: WireRange,
    ) -> Result<BTreeMap<usize, WireRange>, IndexError> {
        let me = self.comm.rank();
        let size = self.comm.size();
        let mut all = vec![WireRange::default(); 2 * size];
        self.comm
            .allgather(cast_slice(&[my_range, my_span]), cast_slice_mut(&mut all))?;
        Ok((0..size)
            .filter(|&q| q != me)
            .filter_map(|q| {
                let (range, span) = (all[2 * q], all[2 * q + 1]);
                (overlaps(&range, &my_span) || overlaps(&my_range, &span)).then_some((q, range))
            })
            .collect())
    }
}

fn wire<G: GlobalIndexLike>(g: G) -> Result<u64, IndexError> {
    g.to_wire()
        .ok_or_else(|| IndexError::InvalidWireGlobal(g.to_string()))
}

/// `[min, max + 1)` of the local globals, empty for an empty sequence.
fn span_of<G: GlobalIndexLike>(globals: &[G]) -> Result<WireRange, IndexError> {
    let (Some(&lo), Some(&hi)) = (globals.iter().min(), globals.iter().max()) else {
        return Ok(WireRange::default());
    };
    Ok(WireRange::new(wire(lo)?, wire(hi)?.saturating_add(1)))
}

fn overlaps(a: &WireRange, b: &WireRange) -> bool {
    !a.is_empty() && !b.is_empty() && a.lo() < b.hi() && b.lo() < a.hi()
}
