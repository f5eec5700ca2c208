//! Constants for the EXB wire format

/// Stream header byte announcing little-endian payloads.
pub const ENDIAN_LITTLE: u8 = 1;
/// Stream header byte announcing big-endian payloads.
pub const ENDIAN_BIG: u8 = 0;

/// High bit of a raw object or polymorphic id: first appearance in this stream.
pub const ID_NEW_BIT: u32 = 0x8000_0000;
/// Second-highest bit of a polymorphic id: no cast needed, no name follows.
pub const ID_NO_CAST_BIT: u32 = 0x4000_0000;

/// Maximum encoded length of a varint, enough for a u64.
pub const MAX_VARINT_LEN: usize = 10;

/// PackedArray payload escape: the element size follows as a varint.
pub const PACKED_ELEM_SIZE_ESCAPE: u8 = 0xf;

/// Canonical quiet NaN bit pattern for f32.
pub const QNAN_F32_BITS: u32 = 0x7FC0_0000;
/// Canonical quiet NaN bit pattern for f64.
pub const QNAN_F64_BITS: u64 = 0x7FF8_0000_0000_0000;
