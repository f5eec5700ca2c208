//! EXB Codec - Archive encoder/decoder engines
//!
//! This crate provides the encoding and decoding engines for the EXB
//! extendable binary format:
//!
//! - `OutputArchive`: primitive writers and the lazy object-metadata
//!   tracker that elides terminators for empty objects
//! - `InputArchive`: primitive readers, the object-metadata loader and the
//!   deferred shared-pointer resolution cache
//! - The skip/scan engine that walks unknown fields
//! - The polymorphic type registry
//! - Field-level serialization for primitives, containers and pointers

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fields;
pub mod num;
pub mod pointers;
pub mod reader;
pub mod registry;
mod skip;
mod source;
pub mod writer;

// Re-export commonly used types
pub use exb_format::{Endianness, ExbError, FieldKind, Limits, Result};
pub use fields::{Bytes, Extendable, Field};
pub use num::ArchiveInt;
pub use reader::InputArchive;
pub use registry::{Polymorphic, PolymorphicExtendable, TypeRegistry};
pub use writer::OutputArchive;

/// Encoding options
#[derive(Debug, Clone)]
pub struct EncodeOpts {
    /// Byte order of scalar payloads in the produced stream.
    pub endianness: Endianness,
    /// Write type versions with every occurrence so they survive fields
    /// being skipped before a one-shot version would have been seen.
    pub forward_versions: bool,
}

impl Default for EncodeOpts {
    fn default() -> Self {
        Self {
            endianness: Endianness::Native,
            forward_versions: true,
        }
    }
}

/// Decoding options
#[derive(Debug, Clone)]
pub struct DecodeOpts {
    /// Security limits.
    pub limits: Limits,
    /// Decode polymorphic pointers with unregistered type names as `None`
    /// instead of failing.
    pub ignore_unknown_polymorphic_types: bool,
    /// Expect type versions with every occurrence (must match the writer).
    pub forward_versions: bool,
}

impl Default for DecodeOpts {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            ignore_unknown_polymorphic_types: true,
            forward_versions: true,
        }
    }
}

/// Encode a single root value with default options.
pub fn to_bytes<T: Field>(value: &T) -> Result<Vec<u8>> {
    to_bytes_with(value, EncodeOpts::default())
}

/// Encode a single root value.
pub fn to_bytes_with<T: Field>(value: &T, opts: EncodeOpts) -> Result<Vec<u8>> {
    let mut ar = OutputArchive::new(opts);
    value.save_field(&mut ar)?;
    Ok(ar.finish())
}

/// Decode a single root value with default options.
pub fn from_bytes<T: Field + Default>(bytes: &[u8]) -> Result<T> {
    from_bytes_with(bytes, DecodeOpts::default())
}

/// Decode a single root value.
pub fn from_bytes_with<T: Field + Default>(bytes: &[u8], opts: DecodeOpts) -> Result<T> {
    let mut ar = InputArchive::new(bytes, opts)?;
    let mut value = T::default();
    value.load_field(&mut ar)?;
    Ok(value)
}

/// Decode a single root value resolving polymorphic names through `registry`.
pub fn from_bytes_with_registry<T: Field + Default>(
    bytes: &[u8],
    opts: DecodeOpts,
    registry: &TypeRegistry,
) -> Result<T> {
    let mut ar = InputArchive::new(bytes, opts)?.with_registry(registry);
    let mut value = T::default();
    value.load_field(&mut ar)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_round_trips() {
        assert_eq!(from_bytes::<u8>(&to_bytes(&7u8).unwrap()).unwrap(), 7);
        assert_eq!(from_bytes::<u64>(&to_bytes(&u64::MAX).unwrap()).unwrap(), u64::MAX);
        assert_eq!(from_bytes::<i32>(&to_bytes(&-12345i32).unwrap()).unwrap(), -12345);
        assert_eq!(from_bytes::<i64>(&to_bytes(&i64::MIN).unwrap()).unwrap(), i64::MIN);
        assert_eq!(from_bytes::<u128>(&to_bytes(&u128::MAX).unwrap()).unwrap(), u128::MAX);
        assert!(from_bytes::<bool>(&to_bytes(&true).unwrap()).unwrap());
        assert_eq!(from_bytes::<f32>(&to_bytes(&1.5f32).unwrap()).unwrap(), 1.5);
        assert_eq!(from_bytes::<f64>(&to_bytes(&-2.25f64).unwrap()).unwrap(), -2.25);
    }

    #[test]
    fn test_widening_across_types() {
        let bytes = to_bytes(&300u16).unwrap();
        assert_eq!(from_bytes::<u64>(&bytes).unwrap(), 300);
        assert!(matches!(
            from_bytes::<u8>(&bytes),
            Err(ExbError::IntegerTooLarge)
        ));

        let bytes = to_bytes(&-3i16).unwrap();
        assert_eq!(from_bytes::<i64>(&bytes).unwrap(), -3);
        assert!(matches!(
            from_bytes::<u64>(&bytes),
            Err(ExbError::SignMismatch)
        ));
    }

    #[test]
    fn test_string_and_containers_round_trip() {
        let text = "forward compatible".to_string();
        assert_eq!(from_bytes::<String>(&to_bytes(&text).unwrap()).unwrap(), text);

        let empty = String::new();
        assert_eq!(from_bytes::<String>(&to_bytes(&empty).unwrap()).unwrap(), empty);

        let values = vec![1u32, 200, 40_000, u32::MAX];
        assert_eq!(from_bytes::<Vec<u32>>(&to_bytes(&values).unwrap()).unwrap(), values);

        let nested = vec!["a".to_string(), String::new(), "c".to_string()];
        assert_eq!(from_bytes::<Vec<String>>(&to_bytes(&nested).unwrap()).unwrap(), nested);

        let blob = Bytes(vec![0, 1, 2, 254, 255]);
        assert_eq!(from_bytes::<Bytes>(&to_bytes(&blob).unwrap()).unwrap(), blob);

        let fixed = [3u16, 65535, 0];
        assert_eq!(from_bytes::<[u16; 3]>(&to_bytes(&fixed).unwrap()).unwrap(), fixed);

        let mut map = std::collections::BTreeMap::new();
        map.insert("one".to_string(), 1u32);
        map.insert("two".to_string(), 2u32);
        assert_eq!(
            from_bytes::<std::collections::BTreeMap<String, u32>>(&to_bytes(&map).unwrap())
                .unwrap(),
            map
        );
    }

    #[test]
    fn test_nan_round_trips_canonical() {
        let bytes = to_bytes(&f64::from_bits(0x7FF8_0000_0000_1234)).unwrap();
        let back = from_bytes::<f64>(&bytes).unwrap();
        assert_eq!(back.to_bits(), 0x7FF8_0000_0000_0000);

        let bytes = to_bytes(&f32::NAN).unwrap();
        let back = from_bytes::<f32>(&bytes).unwrap();
        assert_eq!(back.to_bits(), 0x7FC0_0000);
    }

    #[test]
    fn test_truncated_stream_fails() {
        let bytes = to_bytes(&123456u32).unwrap();
        assert!(matches!(
            from_bytes::<u32>(&bytes[..bytes.len() - 1]),
            Err(ExbError::UnexpectedEof)
        ));
        assert!(matches!(from_bytes::<u32>(&[]), Err(ExbError::UnexpectedEof)));
    }
}
