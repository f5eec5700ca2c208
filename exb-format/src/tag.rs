//! Field tag packing and payload width mappings
//!
//! Every encoded value is prefixed by one tag byte: the high nibble holds
//! the [`FieldKind`], the low nibble a kind-specific payload (a byte-count
//! code, a float width selector, or a marker bitset).

use std::ops::{BitOr, BitOrAssign};

use crate::error::{ExbError, Result};

/// Field kind codes (the high nibble of every tag byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldKind {
    /// Field deliberately left out by the writer; nothing follows the tag.
    OmittedField = 0x0,
    /// Non-negative integer; payload is the byte-count code of the magnitude.
    PositiveInteger = 0x1,
    /// Negative integer; payload is the byte-count code of the magnitude.
    NegativeInteger = 0x2,
    /// Floating point; payload selects the width (1 = 4 bytes, 2 = 8 bytes).
    FloatingPoint = 0x3,
    /// Small integer in 0..=15 packed directly into the payload nibble.
    PackedInteger = 0x4,
    /// Object metadata; payload carries [`ClassMarkers`] bits.
    Class = 0x5,
    /// Pointer metadata; payload carries [`PointerMarkers`] bits.
    Pointer = 0x6,
    /// Container element count; payload is a byte-count code.
    SizeTag = 0x7,
    /// Homogeneous raw data; payload is the element size or the varint escape.
    PackedArray = 0x8,
    /// Reserved; decoders reject it.
    PackedStruct = 0x9,
    /// Terminator of a non-empty object.
    LastField = 0xa,
}

/// Pack a field kind and a 4-bit payload into one tag byte.
pub fn pack_tag(kind: FieldKind, payload: u8) -> u8 {
    ((kind as u8) << 4) | (payload & 0xf)
}

/// Unpack a tag byte into its field kind and payload nibble.
///
/// Rejecting unknown kind nibbles here is the primary corruption detector
/// for the whole format.
pub fn unpack_tag(byte: u8) -> Result<(FieldKind, u8)> {
    let kind = match byte >> 4 {
        0x0 => FieldKind::OmittedField,
        0x1 => FieldKind::PositiveInteger,
        0x2 => FieldKind::NegativeInteger,
        0x3 => FieldKind::FloatingPoint,
        0x4 => FieldKind::PackedInteger,
        0x5 => FieldKind::Class,
        0x6 => FieldKind::Pointer,
        0x7 => FieldKind::SizeTag,
        0x8 => FieldKind::PackedArray,
        0x9 => FieldKind::PackedStruct,
        0xa => FieldKind::LastField,
        _ => return Err(ExbError::CorruptTag(byte)),
    };
    Ok((kind, byte & 0xf))
}

/// Marker bits packed into a Class tag payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassMarkers(u8);

impl ClassMarkers {
    /// No markers set.
    pub const NONE: Self = Self(0);
    /// Object had no serialized fields; no LastField terminator follows.
    pub const EMPTY_CLASS: Self = Self(0x1);
    /// A class version varint follows the tag.
    pub const HAS_VERSION: Self = Self(0x2);

    /// Reinterpret a tag payload nibble as class markers.
    pub fn from_payload(payload: u8) -> Self {
        Self(payload & 0xf)
    }

    /// Whether all bits of `other` are set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// The raw marker bits, suitable for a tag payload.
    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for ClassMarkers {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ClassMarkers {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Marker bits packed into a Pointer tag payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PointerMarkers(u8);

impl PointerMarkers {
    /// No markers set.
    pub const NONE: Self = Self(0);
    /// Null pointer, or back-reference to an already serialized object.
    pub const EMPTY: Self = Self(0x1);
    /// Shared pointer; an object-id varint follows.
    pub const SHARED: Self = Self(0x2);
    /// Polymorphic pointer; a 4-byte type id follows.
    pub const POLYMORPHIC: Self = Self(0x4);

    /// Reinterpret a tag payload nibble as pointer markers.
    pub fn from_payload(payload: u8) -> Self {
        Self(payload & 0xf)
    }

    /// Whether all bits of `other` are set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// The raw marker bits, suitable for a tag payload.
    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for PointerMarkers {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PointerMarkers {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Number of payload bytes on the wire for an integer byte-count code.
///
/// Codes 0..=8 map directly; 9 means 16 bytes and 10 means 32 bytes,
/// leaving room for wider integer types than the format currently writes.
pub fn int_width_from_code(code: u8) -> Result<usize> {
    match code {
        0..=8 => Ok(code as usize),
        9 => Ok(16),
        10 => Ok(32),
        other => Err(ExbError::UnsupportedWidth(other)),
    }
}

/// Byte-count code for an integer whose magnitude needs `bytes` bytes.
pub fn int_code_from_width(bytes: usize) -> Result<u8> {
    match bytes {
        0..=8 => Ok(bytes as u8),
        9..=16 => Ok(9),
        17..=32 => Ok(10),
        _ => Err(ExbError::UnsupportedWidth(bytes.min(u8::MAX as usize) as u8)),
    }
}

/// Number of payload bytes for a floating point width code.
pub fn float_width_from_code(code: u8) -> Result<usize> {
    match code {
        1 => Ok(4),
        2 => Ok(8),
        other => Err(ExbError::UnsupportedWidth(other)),
    }
}

/// Width code for a floating point payload of `bytes` bytes.
pub fn float_code_from_width(bytes: usize) -> Result<u8> {
    match bytes {
        4 => Ok(1),
        8 => Ok(2),
        _ => Err(ExbError::UnsupportedWidth(bytes.min(u8::MAX as usize) as u8)),
    }
}

/// Minimum number of bytes needed to hold a magnitude, zero for zero.
pub fn magnitude_len(mag: u128) -> usize {
    ((128 - mag.leading_zeros() as usize) + 7) / 8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_all_kinds() {
        let kinds = [
            FieldKind::OmittedField,
            FieldKind::PositiveInteger,
            FieldKind::NegativeInteger,
            FieldKind::FloatingPoint,
            FieldKind::PackedInteger,
            FieldKind::Class,
            FieldKind::Pointer,
            FieldKind::SizeTag,
            FieldKind::PackedArray,
            FieldKind::PackedStruct,
            FieldKind::LastField,
        ];
        for kind in kinds {
            for payload in 0..=0xf {
                let byte = pack_tag(kind, payload);
                let (k, p) = unpack_tag(byte).unwrap();
                assert_eq!(k, kind);
                assert_eq!(p, payload);
            }
        }
    }

    #[test]
    fn test_unpack_rejects_unknown_nibbles() {
        for nibble in 0xbu8..=0xf {
            let byte = nibble << 4;
            assert!(matches!(unpack_tag(byte), Err(ExbError::CorruptTag(b)) if b == byte));
        }
    }

    #[test]
    fn test_int_width_mapping() {
        for code in 0u8..=8 {
            assert_eq!(int_width_from_code(code).unwrap(), code as usize);
        }
        assert_eq!(int_width_from_code(9).unwrap(), 16);
        assert_eq!(int_width_from_code(10).unwrap(), 32);
        assert!(matches!(
            int_width_from_code(11),
            Err(ExbError::UnsupportedWidth(11))
        ));
    }

    #[test]
    fn test_int_code_round_trip() {
        for bytes in 0usize..=8 {
            let code = int_code_from_width(bytes).unwrap();
            assert!(int_width_from_code(code).unwrap() >= bytes);
        }
        assert_eq!(int_code_from_width(12).unwrap(), 9);
        assert_eq!(int_code_from_width(16).unwrap(), 9);
        assert_eq!(int_code_from_width(17).unwrap(), 10);
        assert!(int_code_from_width(33).is_err());
    }

    #[test]
    fn test_float_width_mapping() {
        assert_eq!(float_width_from_code(1).unwrap(), 4);
        assert_eq!(float_width_from_code(2).unwrap(), 8);
        assert!(float_width_from_code(0).is_err());
        assert!(float_width_from_code(3).is_err());
        assert_eq!(float_code_from_width(4).unwrap(), 1);
        assert_eq!(float_code_from_width(8).unwrap(), 2);
        assert!(float_code_from_width(10).is_err());
    }

    #[test]
    fn test_magnitude_len() {
        assert_eq!(magnitude_len(0), 0);
        assert_eq!(magnitude_len(1), 1);
        assert_eq!(magnitude_len(0xff), 1);
        assert_eq!(magnitude_len(0x100), 2);
        assert_eq!(magnitude_len(u64::MAX as u128), 8);
        assert_eq!(magnitude_len(u64::MAX as u128 + 1), 9);
        assert_eq!(magnitude_len(u128::MAX), 16);
    }

    #[test]
    fn test_markers() {
        let mut class = ClassMarkers::NONE;
        class |= ClassMarkers::EMPTY_CLASS;
        assert!(class.contains(ClassMarkers::EMPTY_CLASS));
        assert!(!class.contains(ClassMarkers::HAS_VERSION));

        let ptr = PointerMarkers::SHARED | PointerMarkers::POLYMORPHIC;
        assert!(ptr.contains(PointerMarkers::SHARED));
        assert!(!ptr.contains(PointerMarkers::EMPTY));
        assert_eq!(PointerMarkers::from_payload(ptr.bits()), ptr);
    }
}
