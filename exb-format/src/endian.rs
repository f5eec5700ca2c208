//! Byte order selection and chunk swapping

use crate::constants::{ENDIAN_BIG, ENDIAN_LITTLE};
use crate::error::{ExbError, Result};

/// Desired byte order of archive payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
    /// Whatever the host machine uses.
    #[default]
    Native,
}

impl Endianness {
    /// Whether this order resolves to little-endian on the current host.
    pub fn is_little(self) -> bool {
        match self {
            Endianness::Little => true,
            Endianness::Big => false,
            Endianness::Native => cfg!(target_endian = "little"),
        }
    }

    /// The stream header byte announcing this order.
    pub fn header_byte(self) -> u8 {
        if self.is_little() {
            ENDIAN_LITTLE
        } else {
            ENDIAN_BIG
        }
    }

    /// Decode a stream header byte back into a byte order.
    pub fn from_header_byte(byte: u8) -> Result<Self> {
        match byte {
            ENDIAN_LITTLE => Ok(Endianness::Little),
            ENDIAN_BIG => Ok(Endianness::Big),
            other => Err(ExbError::InvalidEndianMarker(other)),
        }
    }
}

/// Reverse every `elem_size`-byte chunk of `data` in place.
///
/// Supports the split between swap element width and total byte count when
/// converting arrays: a 12-byte buffer of 4-byte elements swaps as three
/// independent chunks. A trailing partial chunk is left untouched.
pub fn swap_chunks(data: &mut [u8], elem_size: usize) {
    if elem_size <= 1 {
        return;
    }
    for chunk in data.chunks_exact_mut(elem_size) {
        chunk.reverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_byte_round_trip() {
        assert_eq!(
            Endianness::from_header_byte(Endianness::Little.header_byte()).unwrap(),
            Endianness::Little
        );
        assert_eq!(
            Endianness::from_header_byte(Endianness::Big.header_byte()).unwrap(),
            Endianness::Big
        );
        assert!(matches!(
            Endianness::from_header_byte(7),
            Err(ExbError::InvalidEndianMarker(7))
        ));
    }

    #[test]
    fn test_native_resolves() {
        let native_little = Endianness::Native.is_little();
        assert_eq!(native_little, cfg!(target_endian = "little"));
    }

    #[test]
    fn test_swap_chunks() {
        let mut data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        swap_chunks(&mut data, 4);
        assert_eq!(data, [4, 3, 2, 1, 8, 7, 6, 5]);

        let mut data = [1u8, 2, 3, 4];
        swap_chunks(&mut data, 1);
        assert_eq!(data, [1, 2, 3, 4]);

        let mut data = [1u8, 2, 3];
        swap_chunks(&mut data, 2);
        assert_eq!(data, [2, 1, 3]);
    }
}
