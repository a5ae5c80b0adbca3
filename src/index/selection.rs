//! Attribute-filtered views over an [`IndexSet`].
//!
//! [`UncachedSelection`] filters while iterating and costs nothing to build.
//! [`Selection`] scans once and keeps the matching positions, which pays off
//! when the same view is traversed many times. Both borrow the set, so the set
//! cannot go through a resize while a view is alive; build a new view after
//! the next `end_resize`.

use std::fmt;

use crate::index::bounds::{AttributeLike, GlobalIndexLike};
use crate::index::index_set::IndexSet;
use crate::index::local_index::IndexPair;

/// Membership test on attributes.
pub trait AttributeFilter<A> {
    fn accepts(&self, attribute: &A) -> bool;
}

impl<A, F> AttributeFilter<A> for F
where
    F: Fn(&A) -> bool,
{
    #[inline]
    fn accepts(&self, attribute: &A) -> bool {
        self(attribute)
    }
}

/// Small sorted set of attributes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct AttributeSet<A> {
    members: Vec<A>,
}

impl<A: AttributeLike> AttributeSet<A> {
    pub fn new() -> Self {
        Self {
            members: Vec::new(),
        }
    }

    /// Insert `attribute`; returns `false` if it was already present.
    pub fn insert(&mut self, attribute: A) -> bool {
        match self.members.binary_search(&attribute) {
            Ok(_) => false,
            Err(pos) => {
                self.members.insert(pos, attribute);
                true
            }
        }
    }

    #[inline]
    pub fn contains(&self, attribute: &A) -> bool {
        self.members.binary_search(attribute).is_ok()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = A> + '_ {
        self.members.iter().copied()
    }
}

impl<A: AttributeLike> FromIterator<A> for AttributeSet<A> {
    fn from_iter<I: IntoIterator<Item = A>>(iter: I) -> Self {
        let mut members: Vec<A> = iter.into_iter().collect();
        members.sort_unstable();
        members.dedup();
        Self { members }
    }
}

impl<A: AttributeLike, const N: usize> From<[A; N]> for AttributeSet<A> {
    fn from(attributes: [A; N]) -> Self {
        attributes.into_iter().collect()
    }
}

impl<A: AttributeLike> AttributeFilter<A> for AttributeSet<A> {
    #[inline]
    fn accepts(&self, attribute: &A) -> bool {
        self.contains(attribute)
    }
}

impl<A: AttributeLike> fmt::Display for AttributeSet<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, a) in self.members.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{a}")?;
        }
        f.write_str("}")
    }
}

/// View that tests the filter on every step.
#[derive(Clone, Debug)]
pub struct UncachedSelection<'a, G, A, F> {
    set: &'a IndexSet<G, A>,
    filter: F,
}

impl<'a, G, A, F> UncachedSelection<'a, G, A, F>
where
    G: GlobalIndexLike,
    A: AttributeLike,
    F: AttributeFilter<A>,
{
    pub fn new(set: &'a IndexSet<G, A>, filter: F) -> Self {
        Self { set, filter }
    }

    pub fn iter(&self) -> UncachedSelectionIter<'a, '_, G, A, F> {
        UncachedSelectionIter {
            pairs: self.set.iter(),
            filter: &self.filter,
        }
    }

    /// Local positions of the selected pairs.
    pub fn locals(&self) -> impl Iterator<Item = usize> + '_ {
        self.iter().map(|p| p.local())
    }
}

/// Iterator of [`UncachedSelection`].
pub struct UncachedSelectionIter<'a, 'f, G, A, F> {
    pairs: std::slice::Iter<'a, IndexPair<G, A>>,
    filter: &'f F,
}

impl<'a, G, A, F> Iterator for UncachedSelectionIter<'a, '_, G, A, F>
where
    G: GlobalIndexLike,
    A: AttributeLike,
    F: AttributeFilter<A>,
{
    type Item = &'a IndexPair<G, A>;

    fn next(&mut self) -> Option<Self::Item> {
        let filter = self.filter;
        self.pairs.find(|p| filter.accepts(&p.attribute()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.pairs.size_hint().1)
    }
}

impl<'a, 's, G, A, F> IntoIterator for &'s UncachedSelection<'a, G, A, F>
where
    G: GlobalIndexLike,
    A: AttributeLike,
    F: AttributeFilter<A>,
{
    type Item = &'a IndexPair<G, A>;
    type IntoIter = UncachedSelectionIter<'a, 's, G, A, F>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// View that materializes the selected positions once.
#[derive(Clone, Debug)]
pub struct Selection<'a, G, A> {
    set: &'a IndexSet<G, A>,
    positions: Vec<usize>,
    seq_no: u64,
}

impl<'a, G: GlobalIndexLike, A: AttributeLike> Selection<'a, G, A> {
    pub fn new<F: AttributeFilter<A>>(set: &'a IndexSet<G, A>, filter: &F) -> Self {
        let positions = set
            .iter()
            .enumerate()
            .filter(|(_, p)| filter.accepts(&p.attribute()))
            .map(|(pos, _)| pos)
            .collect();
        Self {
            set,
            positions,
            seq_no: set.seq_no(),
        }
    }

    pub fn iter(&self) -> SelectionIter<'a, '_, G, A> {
        SelectionIter {
            pairs: self.set.pairs(),
            positions: self.positions.iter(),
        }
    }

    /// Local positions of the selected pairs.
    pub fn locals(&self) -> impl Iterator<Item = usize> + '_ {
        self.iter().map(|p| p.local())
    }

    /// The cached slot array.
    #[inline]
    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Generation of the index set this view was built from.
    #[inline]
    pub fn seq_no(&self) -> u64 {
        self.seq_no
    }
}

/// Iterator of [`Selection`].
pub struct SelectionIter<'a, 's, G, A> {
    pairs: &'a [IndexPair<G, A>],
    positions: std::slice::Iter<'s, usize>,
}

impl<'a, G, A> Iterator for SelectionIter<'a, '_, G, A> {
    type Item = &'a IndexPair<G, A>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.positions.next().map(|&pos| &self.pairs[pos])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.positions.size_hint()
    }
}

impl<G, A> ExactSizeIterator for SelectionIter<'_, '_, G, A> {}

impl<'a, 's, G: GlobalIndexLike, A: AttributeLike> IntoIterator for &'s Selection<'a, G, A> {
    type Item = &'a IndexPair<G, A>;
    type IntoIter = SelectionIter<'a, 's, G, A>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
