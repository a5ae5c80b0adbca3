//! Bound sets for global indices and attributes.
//!
//! `GlobalIndexLike` has a blanket impl for every unsigned primitive integer,
//! so callers rarely implement it by hand. `AttributeLike` needs a wire code
//! and is implemented for the small unsigned integers and for
//! [`EntityAttribute`].

use num_traits::{NumCast, PrimInt, Unsigned};
use std::fmt::{self, Debug, Display};
use std::hash::Hash;

/// Canonical bound set for global identifiers.
///
/// - `Copy` for cheap pass-by-value in merge loops
/// - `Ord` since index sets are kept sorted by global index
/// - `Hash` for set-based duplicate checks
/// - `Display` for the textual dump and error messages
pub trait GlobalIndexLike:
    Copy + Ord + Hash + Debug + Display + Send + Sync + 'static
{
    /// Encode as the 64-bit wire value, `None` if it does not fit.
    fn to_wire(self) -> Option<u64>;
    /// Decode from the 64-bit wire value, `None` if it does not fit `Self`.
    fn from_wire(w: u64) -> Option<Self>;
}

impl<T> GlobalIndexLike for T
where
    T: PrimInt + Unsigned + Hash + Debug + Display + Send + Sync + 'static,
{
    #[inline]
    fn to_wire(self) -> Option<u64> {
        self.to_u64()
    }
    #[inline]
    fn from_wire(w: u64) -> Option<Self> {
        <T as NumCast>::from(w)
    }
}

/// Bound set for per-entry attributes (the role of an entity copy).
///
/// Attributes travel with every advertised entry, so they carry a `u32` code.
pub trait AttributeLike:
    Copy + Eq + Ord + Hash + Debug + Display + Send + Sync + 'static
{
    fn to_wire(self) -> u32;
    fn from_wire(w: u32) -> Option<Self>;
}

macro_rules! impl_attribute_for_uint {
    ($($t:ty),*) => {$(
        impl AttributeLike for $t {
            #[inline]
            fn to_wire(self) -> u32 {
                self as u32
            }
            #[inline]
            fn from_wire(w: u32) -> Option<Self> {
                <$t>::try_from(w).ok()
            }
        }
    )*};
}

impl_attribute_for_uint!(u8, u16, u32);

/// The usual roles of an entity copy in an overlapping decomposition.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum EntityAttribute {
    /// This rank owns the entity.
    Owner,
    /// Owned elsewhere but part of this rank's overlap region.
    Overlap,
    /// Read-only halo copy.
    Ghost,
    /// Shared on the subdomain boundary.
    Border,
}

impl AttributeLike for EntityAttribute {
    #[inline]
    fn to_wire(self) -> u32 {
        match self {
            EntityAttribute::Owner => 0,
            EntityAttribute::Overlap => 1,
            EntityAttribute::Ghost => 2,
            EntityAttribute::Border => 3,
        }
    }

    #[inline]
    fn from_wire(w: u32) -> Option<Self> {
        match w {
            0 => Some(EntityAttribute::Owner),
            1 => Some(EntityAttribute::Overlap),
            2 => Some(EntityAttribute::Ghost),
            3 => Some(EntityAttribute::Border),
            _ => None,
        }
    }
}

impl Display for EntityAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityAttribute::Owner => "owner",
            EntityAttribute::Overlap => "overlap",
            EntityAttribute::Ghost => "ghost",
            EntityAttribute::Border => "border",
        };
        f.write_str(name)
    }
}
