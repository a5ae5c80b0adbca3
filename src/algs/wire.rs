//! Fixed, versioned, little-endian wire types for the exchange paths.

use bytemuck::{Pod, Zeroable};
use static_assertions::{assert_eq_align, assert_eq_size};

use crate::index::bounds::{AttributeLike, GlobalIndexLike};
use crate::index_error::IndexError;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

/// Decode a received byte buffer into `T` records, copying into an aligned vec.
pub fn decode_records<T: Pod>(raw: &[u8], neighbor: usize, expected: usize) -> Result<Vec<T>, IndexError> {
    let bytes = expected * size_of::<T>();
    if raw.len() != bytes {
        return Err(IndexError::BufferSizeMismatch {
            neighbor,
            expected: bytes,
            got: raw.len(),
        });
    }
    let mut out = vec![T::zeroed(); expected];
    cast_slice_mut(&mut out).copy_from_slice(raw);
    Ok(out)
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

// All multi-byte integers in these structs are little-endian on the wire.
// They are stored pre-LE with `.to_le()` and decoded with `from_le`.

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32,
}

/// Narrow a record count to the 32-bit wire field, or fail on the sending side.
pub fn wire_count(n: usize, neighbor: usize) -> Result<u32, IndexError> {
    u32::try_from(n).map_err(|_| IndexError::ProtocolError {
        neighbor,
        reason: format!("{n} records do not fit the 32-bit wire count"),
    })
}

impl WireCount {
    pub fn new(n: usize, neighbor: usize) -> Result<Self, IndexError> {
        Ok(Self {
            n_le: wire_count(n, neighbor)?.to_le(),
        })
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// Size-phase header of the remote-index exchange.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct WireExchangeHeader {
    pub version_le: u16,
    /// 1 if source and destination records follow separately, 0 if one set.
    pub two_sets_le: u16,
    pub source_count_le: u32,
    pub dest_count_le: u32,
    pub reserved_le: u32, // keep zero
}

impl WireExchangeHeader {
    /// Header for the records sent to `neighbor`.
    pub fn new(two_sets: bool, source_count: usize, dest_count: usize, neighbor: usize) -> Result<Self, IndexError> {
        Ok(Self {
            version_le: WIRE_VERSION.to_le(),
            two_sets_le: u16::from(two_sets).to_le(),
            source_count_le: wire_count(source_count, neighbor)?.to_le(),
            dest_count_le: wire_count(dest_count, neighbor)?.to_le(),
            reserved_le: 0,
        })
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn two_sets(&self) -> bool {
        u16::from_le(self.two_sets_le) != 0
    }
    pub fn source_count(&self) -> usize {
        u32::from_le(self.source_count_le) as usize
    }
    pub fn dest_count(&self) -> usize {
        u32::from_le(self.dest_count_le) as usize
    }
    /// Number of records in the data message announced by this header.
    pub fn total(&self) -> usize {
        self.source_count() + self.dest_count()
    }
}

/// One advertised entry: global index and the sender's attribute.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct WireIndexRecord {
    pub global_le: u64,
    pub attribute_le: u32,
    pub _pad: u32,
}

impl WireIndexRecord {
    pub fn encode<G: GlobalIndexLike, A: AttributeLike>(
        global: G,
        attribute: A,
    ) -> Result<Self, IndexError> {
        let g = global
            .to_wire()
            .ok_or_else(|| IndexError::InvalidWireGlobal(global.to_string()))?;
        Ok(Self {
            global_le: g.to_le(),
            attribute_le: attribute.to_wire().to_le(),
            _pad: 0,
        })
    }

    pub fn global<G: GlobalIndexLike>(&self) -> Result<G, IndexError> {
        let raw = u64::from_le(self.global_le);
        G::from_wire(raw).ok_or_else(|| IndexError::InvalidWireGlobal(raw.to_string()))
    }

    pub fn attribute<A: AttributeLike>(&self) -> Result<A, IndexError> {
        let raw = u32::from_le(self.attribute_le);
        A::from_wire(raw).ok_or(IndexError::InvalidWireAttribute(raw))
    }
}

/// A half-open owned range `[lo, hi)` of global indices.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct WireRange {
    pub lo_le: u64,
    pub hi_le: u64,
}

impl WireRange {
    pub fn new(lo: u64, hi: u64) -> Self {
        Self {
            lo_le: lo.to_le(),
            hi_le: hi.to_le(),
        }
    }
    pub fn lo(&self) -> u64 {
        u64::from_le(self.lo_le)
    }
    pub fn hi(&self) -> u64 {
        u64::from_le(self.hi_le)
    }
    pub fn is_empty(&self) -> bool {
        self.lo() >= self.hi()
    }
    pub fn contains(&self, g: u64) -> bool {
        self.lo() <= g && g < self.hi()
    }
}

/// A global index requested from its owner.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct WireGlobal {
    pub id_le: u64,
}

impl WireGlobal {
    pub fn of(id: u64) -> Self {
        Self { id_le: id.to_le() }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.id_le)
    }
}

/// One line of an indices-sync message: `rank` holds `global` with `attribute`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct WireSyncRecord {
    pub global_le: u64,
    pub rank_le: u32,
    pub attribute_le: u32,
}

impl WireSyncRecord {
    pub fn encode<G: GlobalIndexLike, A: AttributeLike>(
        global: G,
        rank: usize,
        attribute: A,
    ) -> Result<Self, IndexError> {
        let g = global
            .to_wire()
            .ok_or_else(|| IndexError::InvalidWireGlobal(global.to_string()))?;
        Ok(Self {
            global_le: g.to_le(),
            rank_le: wire_count(rank, rank)?.to_le(),
            attribute_le: attribute.to_wire().to_le(),
        })
    }

    pub fn global<G: GlobalIndexLike>(&self) -> Result<G, IndexError> {
        let raw = u64::from_le(self.global_le);
        G::from_wire(raw).ok_or_else(|| IndexError::InvalidWireGlobal(raw.to_string()))
    }

    pub fn rank(&self) -> usize {
        u32::from_le(self.rank_le) as usize
    }

    pub fn attribute<A: AttributeLike>(&self) -> Result<A, IndexError> {
        let raw = u32::from_le(self.attribute_le);
        A::from_wire(raw).ok_or(IndexError::InvalidWireAttribute(raw))
    }
}

// Pod/Zeroable ensures no padding contains uninit when cast to bytes.
assert_eq_size!(WireCount, [u8; 4]);
assert_eq_size!(WireExchangeHeader, [u8; 16]);
assert_eq_size!(WireIndexRecord, [u8; 16]);
assert_eq_size!(WireRange, [u8; 16]);
assert_eq_size!(WireGlobal, u64);
assert_eq_size!(WireSyncRecord, [u8; 16]);
assert_eq_align!(WireIndexRecord, u64);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::bounds::EntityAttribute;

    #[test]
    fn record_survives_byte_cast() {
        let v = vec![
            WireIndexRecord::encode(7u32, EntityAttribute::Ghost).unwrap(),
            WireIndexRecord::encode(9u32, EntityAttribute::Owner).unwrap(),
        ];
        let bytes = cast_slice(&v).to_vec();
        let out: Vec<WireIndexRecord> = decode_records(&bytes, 0, 2).unwrap();
        assert_eq!(out[0].global::<u32>().unwrap(), 7);
        assert_eq!(
            out[1].attribute::<EntityAttribute>().unwrap(),
            EntityAttribute::Owner
        );
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err = decode_records::<WireIndexRecord>(&[0u8; 20], 3, 1).unwrap_err();
        assert_eq!(
            err,
            IndexError::BufferSizeMismatch {
                neighbor: 3,
                expected: 16,
                got: 20
            }
        );
    }

    #[test]
    fn unknown_attribute_code_is_an_error() {
        let rec = WireIndexRecord {
            global_le: 1u64.to_le(),
            attribute_le: 17u32.to_le(),
            _pad: 0,
        };
        assert_eq!(
            rec.attribute::<EntityAttribute>(),
            Err(IndexError::InvalidWireAttribute(17))
        );
    }

    #[test]
    fn header_counts() {
        let hdr = WireExchangeHeader::new(true, 3, 4, 1).unwrap();
        assert_eq!(hdr.version(), WIRE_VERSION);
        assert!(hdr.two_sets());
        assert_eq!(hdr.total(), 7);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn counts_beyond_u32_are_refused() {
        let too_many = u32::MAX as usize + 1;
        assert!(matches!(
            WireExchangeHeader::new(false, too_many, 0, 2),
            Err(IndexError::ProtocolError { neighbor: 2, .. })
        ));
        assert!(WireCount::new(too_many, 5).is_err());
        assert_eq!(WireCount::new(u32::MAX as usize, 5).unwrap().get(), u32::MAX as usize);
    }

    #[test]
    fn expect_exact_len_err() {
        assert!(expect_exact_len(3, 4).is_err());
        assert!(expect_exact_len(4, 4).is_ok());
    }
}
