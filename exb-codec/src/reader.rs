//! Input archive: tag-driven decoding and object metadata loading
//!
//! The reader mirrors the writer's lazy metadata scheme: a Class or Pointer
//! tag carries everything needed to know whether an object is empty, has a
//! version, or refers to a shared/polymorphic target. Fields the consuming
//! schema does not understand are handed to the skip engine, and shared
//! objects skipped that way remain replayable from a side buffer.

use std::any::{Any, TypeId};
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use exb_format::constants::{ID_NEW_BIT, ID_NO_CAST_BIT, PACKED_ELEM_SIZE_ESCAPE};
use exb_format::endian::{swap_chunks, Endianness};
use exb_format::error::{ExbError, Result};
use exb_format::tag::{self, unpack_tag, ClassMarkers, FieldKind, PointerMarkers};
use exb_format::varint::VarintAccumulator;

use crate::num::ArchiveInt;
use crate::registry::{PolymorphicExtendable, TypeRegistry};
use crate::source::{Region, ReplaySource};
use crate::DecodeOpts;

/// Metadata parsed from the most recent Class or Pointer tag.
#[derive(Debug, Default)]
pub(crate) struct ObjectMeta {
    pub class_version: u32,
    pub empty: bool,
    pub object_id: u32,
    pub polymorphic_id: u32,
    pub polymorphic_name: String,
}

/// In-progress capture of a skipped shared object.
#[derive(Debug)]
pub(crate) struct PendingRegion {
    pub object_id: u32,
    pub start: usize,
    pub depth: i32,
}

/// Bookkeeping for shared objects across skip and replay.
#[derive(Default)]
pub(crate) struct SharedState {
    pub pending: Vec<PendingRegion>,
    pub regions: AHashMap<u32, Region>,
    pub loaded: AHashSet<u32>,
    pub objects: AHashMap<u32, Rc<dyn Any>>,
    pub poly_objects: AHashMap<u32, Rc<dyn PolymorphicExtendable>>,
}

/// Archive decoder consuming the EXB wire format from a byte slice.
pub struct InputArchive<'a> {
    pub(crate) src: ReplaySource<'a>,
    pub(crate) opts: DecodeOpts,
    stream_big_endian: bool,
    registry: Option<&'a TypeRegistry>,
    last_tag: (FieldKind, u8),
    was_serialized: bool,
    pub(crate) meta: ObjectMeta,
    last_size_tag: u64,
    versioned_types: AHashMap<TypeId, u32>,
    pub(crate) shared: SharedState,
    polymorphic_names: AHashMap<u32, String>,
}

impl<'a> InputArchive<'a> {
    /// Create an archive over `data`, consuming the endianness byte.
    pub fn new(data: &'a [u8], opts: DecodeOpts) -> Result<Self> {
        let (&header, rest) = data.split_first().ok_or(ExbError::UnexpectedEof)?;
        let order = Endianness::from_header_byte(header)?;
        let max_side = opts.limits.max_shared_buffer_bytes;
        Ok(Self {
            src: ReplaySource::new(rest, max_side),
            opts,
            stream_big_endian: !order.is_little(),
            registry: None,
            last_tag: (FieldKind::LastField, 0),
            was_serialized: true,
            meta: ObjectMeta::default(),
            last_size_tag: 0,
            versioned_types: AHashMap::new(),
            shared: SharedState::default(),
            polymorphic_names: AHashMap::new(),
        })
    }

    /// Resolve polymorphic type names through `registry`.
    pub fn with_registry(mut self, registry: &'a TypeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    // Raw layer --------------------------------------------------------

    /// Read `n` magnitude bytes and widen, honoring the stream byte order.
    pub(crate) fn read_magnitude(&mut self, n: usize) -> Result<u128> {
        if n > 16 {
            return Err(ExbError::IntegerTooLarge);
        }
        let mut bytes = [0u8; 16];
        self.src.read_into(&mut bytes[..n])?;
        if self.stream_big_endian {
            bytes[..n].reverse();
        }
        Ok(u128::from_le_bytes(bytes))
    }

    pub(crate) fn read_u32_scalar(&mut self) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.src.read_into(&mut bytes)?;
        if self.stream_big_endian {
            bytes.reverse();
        }
        Ok(u32::from_le_bytes(bytes))
    }

    /// Read a raw varint; varints are never byte-swapped.
    pub fn read_varint(&mut self) -> Result<u64> {
        let mut acc = VarintAccumulator::new();
        loop {
            let byte = self.src.read_u8()?;
            if let Some(v) = acc.push(byte)? {
                return Ok(v);
            }
        }
    }

    pub(crate) fn read_varint_u32(&mut self) -> Result<u32> {
        u32::try_from(self.read_varint()?).map_err(|_| ExbError::IntegerTooLarge)
    }

    /// Decode and discard one varint.
    pub fn skip_varint(&mut self) -> Result<()> {
        self.read_varint().map(|_| ())
    }

    // Tags ---------------------------------------------------------------

    /// Read the next field tag.
    ///
    /// Returns false when the writer omitted the field, in which case the
    /// caller keeps its current value.
    pub fn read_field_tag(&mut self) -> Result<bool> {
        let byte = self.src.read_u8()?;
        self.last_tag = unpack_tag(byte)?;
        let present = self.last_tag.0 != FieldKind::OmittedField;
        self.was_serialized = present;
        Ok(present)
    }

    pub(crate) fn last_tag(&self) -> (FieldKind, u8) {
        self.last_tag
    }

    /// Whether the most recently processed field carried a value.
    pub fn was_serialized(&self) -> bool {
        self.was_serialized
    }

    // Primitive fields ---------------------------------------------------

    /// Read an integer field, widening from any smaller encoded form.
    pub fn read_int<T: ArchiveInt>(&mut self) -> Result<T> {
        let (kind, payload) = self.last_tag;
        match kind {
            FieldKind::PackedInteger => T::from_sign_magnitude(false, payload as u128),
            FieldKind::PositiveInteger | FieldKind::NegativeInteger => {
                let width = tag::int_width_from_code(payload)?;
                if width > T::WIDTH {
                    return Err(ExbError::IntegerTooLarge);
                }
                let negative = kind == FieldKind::NegativeInteger;
                if negative && !T::SIGNED {
                    return Err(ExbError::SignMismatch);
                }
                let magnitude = self.read_magnitude(width)?;
                T::from_sign_magnitude(negative, magnitude)
            }
            got => Err(ExbError::UnexpectedFieldKind {
                expected: FieldKind::PositiveInteger,
                got,
            }),
        }
    }

    /// Read a boolean field.
    pub fn read_bool(&mut self) -> Result<bool> {
        match self.last_tag {
            (FieldKind::PackedInteger, payload) => Ok(payload != 0),
            (got, _) => Err(ExbError::UnexpectedFieldKind {
                expected: FieldKind::PackedInteger,
                got,
            }),
        }
    }

    fn float_width(&self) -> Result<usize> {
        match self.last_tag {
            (FieldKind::FloatingPoint, payload) => tag::float_width_from_code(payload),
            (got, _) => Err(ExbError::UnexpectedFieldKind {
                expected: FieldKind::FloatingPoint,
                got,
            }),
        }
    }

    /// Read a float field, narrowing an 8-byte value if necessary.
    pub fn read_f32(&mut self) -> Result<f32> {
        match self.float_width()? {
            4 => {
                let bits = self.read_u32_scalar()?;
                Ok(f32::from_bits(bits))
            }
            _ => {
                let bits = self.read_magnitude(8)? as u64;
                Ok(f64::from_bits(bits) as f32)
            }
        }
    }

    /// Read a float field, widening a 4-byte value if necessary.
    pub fn read_f64(&mut self) -> Result<f64> {
        match self.float_width()? {
            4 => {
                let bits = self.read_u32_scalar()?;
                Ok(f32::from_bits(bits) as f64)
            }
            _ => {
                let bits = self.read_magnitude(8)? as u64;
                Ok(f64::from_bits(bits))
            }
        }
    }

    /// Read a container element count and remember it.
    pub fn read_size_tag(&mut self) -> Result<u64> {
        let (kind, payload) = self.last_tag;
        if kind != FieldKind::SizeTag {
            return Err(ExbError::UnexpectedFieldKind {
                expected: FieldKind::SizeTag,
                got: kind,
            });
        }
        let width = tag::int_width_from_code(payload)?;
        if width > 8 {
            return Err(ExbError::IntegerTooLarge);
        }
        let count = self.read_magnitude(width)? as u64;
        self.last_size_tag = count;
        Ok(count)
    }

    /// The value of the most recent size tag.
    pub fn last_size_tag(&self) -> u64 {
        self.last_size_tag
    }

    /// Read a packed array of `expected_elem_size`-byte elements.
    ///
    /// Returns the raw data with each element normalized to
    /// least-significant-byte-first.
    pub fn read_packed_array(&mut self, expected_elem_size: usize) -> Result<Vec<u8>> {
        let (kind, payload) = self.last_tag;
        if kind != FieldKind::PackedArray {
            return Err(ExbError::UnexpectedFieldKind {
                expected: FieldKind::PackedArray,
                got: kind,
            });
        }
        let elem_size = if payload == PACKED_ELEM_SIZE_ESCAPE {
            self.read_varint()? as usize
        } else {
            payload as usize
        };
        if elem_size != expected_elem_size {
            return Err(ExbError::UnsupportedWidth(elem_size.min(u8::MAX as usize) as u8));
        }
        let count = self.read_varint()? as usize;
        let total = count
            .checked_mul(elem_size)
            .ok_or_else(|| ExbError::LimitExceeded("packed array byte length overflow".to_string()))?;
        let mut data = self.src.read_vec(total)?;
        if self.stream_big_endian {
            swap_chunks(&mut data, elem_size);
        }
        Ok(data)
    }

    // Object metadata ----------------------------------------------------

    /// Parse object metadata from the tag just read.
    pub fn begin_object_load(&mut self) -> Result<()> {
        self.reset_object_meta();
        let (kind, payload) = self.last_tag;
        match kind {
            FieldKind::Class => self.load_class_meta(payload),
            FieldKind::Pointer => self.load_pointer_meta(payload),
            got => Err(ExbError::UnexpectedFieldKind {
                expected: FieldKind::Class,
                got,
            }),
        }
    }

    /// Consume the remainder of the current object including its
    /// terminator, skipping any fields this schema does not read.
    pub fn end_object_load(&mut self) -> Result<()> {
        if !self.meta.empty {
            self.read_field_tag()?;
            self.scan_object_remainder()?;
        }
        self.reset_object_meta();
        Ok(())
    }

    /// Skip one whole field the current schema no longer reads.
    pub fn skip_omitted_field(&mut self) -> Result<()> {
        self.read_field_tag()?;
        self.scan_single_field()
    }

    fn reset_object_meta(&mut self) {
        self.meta = ObjectMeta::default();
    }

    fn load_class_meta(&mut self, payload: u8) -> Result<()> {
        let markers = ClassMarkers::from_payload(payload);
        if markers.contains(ClassMarkers::EMPTY_CLASS) {
            self.meta.empty = true;
        }
        if markers.contains(ClassMarkers::HAS_VERSION) {
            self.meta.class_version = self.read_varint_u32()?;
        }
        Ok(())
    }

    fn load_pointer_meta(&mut self, payload: u8) -> Result<()> {
        let markers = PointerMarkers::from_payload(payload);
        if markers.contains(PointerMarkers::EMPTY) {
            self.meta.empty = true;
        }
        // The shared id varint precedes the polymorphic id on the wire, but
        // replay redirection must wait until both are consumed from the main
        // stream, so resolution is deferred past the polymorphic branch.
        let mut shared_id = None;
        if markers.contains(PointerMarkers::SHARED) {
            shared_id = Some(self.read_varint_u32()?);
        }
        if markers.contains(PointerMarkers::POLYMORPHIC) {
            let raw = self.read_u32_scalar()?;
            self.meta.polymorphic_id = raw;
            if raw & ID_NEW_BIT != 0 {
                let name = self.read_type_name()?;
                self.register_polymorphic_name(raw, name.clone());
                self.meta.polymorphic_name = name;
            } else if raw & ID_NO_CAST_BIT == 0 {
                let normal = raw & !(ID_NEW_BIT | ID_NO_CAST_BIT);
                self.meta.polymorphic_name = self
                    .polymorphic_names
                    .get(&normal)
                    .cloned()
                    .ok_or_else(|| {
                        ExbError::UnknownPolymorphicType(format!("unregistered id {normal}"))
                    })?;
            }
        }
        if let Some(raw) = shared_id {
            self.meta.object_id = raw;
            self.resolve_shared_pointer()?;
        }
        if markers.contains(PointerMarkers::POLYMORPHIC) {
            self.suppress_unknown_polymorphic()?;
        }
        Ok(())
    }

    /// Decode a polymorphic pointer of an unregistered type as null by
    /// consuming its whole subtree now.
    fn suppress_unknown_polymorphic(&mut self) -> Result<()> {
        if !self.opts.ignore_unknown_polymorphic_types || self.meta.empty {
            return Ok(());
        }
        let known = self
            .registry
            .is_some_and(|r| r.contains(&self.meta.polymorphic_name));
        if known {
            return Ok(());
        }
        self.reset_object_meta();
        self.meta.empty = true;
        self.read_field_tag()?;
        self.scan_object_remainder()
    }

    /// Deferred resolution of a shared object whose first occurrence may
    /// have been skipped.
    fn resolve_shared_pointer(&mut self) -> Result<()> {
        let raw = self.meta.object_id;
        let normal = raw & !ID_NEW_BIT;
        let region = match self.shared.regions.get(&normal) {
            Some(region) => *region,
            None => return Ok(()),
        };
        let new_in_stream = raw & ID_NEW_BIT != 0;
        let already_loaded = self.shared.loaded.contains(&normal);
        if !new_in_stream {
            if !already_loaded {
                // Back-reference to an object whose bytes were skipped:
                // replay the buffered region as if the body followed here.
                self.shared.loaded.insert(normal);
                self.meta.object_id = raw | ID_NEW_BIT;
                self.meta.empty = false;
                self.src.push_replay(region);
            }
        } else if !already_loaded {
            self.shared.loaded.insert(normal);
        } else {
            // A second inline copy of an object already materialized from
            // the buffer: step over it and fall back to the back-reference.
            self.meta.object_id = normal;
            self.meta.empty = true;
            self.src.skip(region.end - region.start)?;
        }
        Ok(())
    }

    pub(crate) fn read_type_name(&mut self) -> Result<String> {
        let len = self.read_varint()? as usize;
        if len > self.opts.limits.max_polymorphic_name_len {
            return Err(ExbError::LimitExceeded(format!(
                "polymorphic name length {len} exceeds limit {}",
                self.opts.limits.max_polymorphic_name_len
            )));
        }
        let bytes = self.src.read_vec(len)?;
        String::from_utf8(bytes).map_err(|_| ExbError::InvalidUtf8)
    }

    pub(crate) fn register_polymorphic_name(&mut self, raw_id: u32, name: String) {
        let normal = raw_id & !(ID_NEW_BIT | ID_NO_CAST_BIT);
        self.polymorphic_names.insert(normal, name);
    }

    // Metadata accessors --------------------------------------------------

    /// Class version parsed from the current object's metadata.
    pub fn class_version(&self) -> u32 {
        self.meta.class_version
    }

    /// Raw shared object id of the current pointer (new bit included).
    pub fn object_id(&self) -> u32 {
        self.meta.object_id
    }

    /// Raw polymorphic id of the current pointer.
    pub fn polymorphic_id(&self) -> u32 {
        self.meta.polymorphic_id
    }

    /// Polymorphic type name of the current pointer.
    pub fn polymorphic_name(&self) -> &str {
        &self.meta.polymorphic_name
    }

    /// Whether the current pointer has a body following it.
    pub fn pointer_valid(&self) -> bool {
        !self.meta.empty
    }

    /// The version recorded for type `T` in this stream.
    pub fn type_version<T: 'static>(&mut self) -> u32 {
        if self.opts.forward_versions {
            self.meta.class_version
        } else {
            let key = TypeId::of::<T>();
            if let Some(&version) = self.versioned_types.get(&key) {
                version
            } else {
                let version = self.meta.class_version;
                self.versioned_types.insert(key, version);
                version
            }
        }
    }

    // Shared object registry ---------------------------------------------

    pub(crate) fn register_shared_object(&mut self, id: u32, obj: Rc<dyn Any>) {
        self.shared.objects.insert(id, obj);
    }

    pub(crate) fn shared_object<T: Any>(&self, id: u32) -> Result<Rc<T>> {
        let obj = self
            .shared
            .objects
            .get(&id)
            .cloned()
            .ok_or(ExbError::UnresolvedSharedPointer(id))?;
        obj.downcast::<T>().map_err(|_| {
            ExbError::SharedObjectProtocol(format!("shared object {id} has a different type"))
        })
    }

    pub(crate) fn register_polymorphic_object(&mut self, id: u32, obj: Rc<dyn PolymorphicExtendable>) {
        self.shared.poly_objects.insert(id, obj);
    }

    pub(crate) fn polymorphic_object(&self, id: u32) -> Result<Rc<dyn PolymorphicExtendable>> {
        self.shared
            .poly_objects
            .get(&id)
            .cloned()
            .ok_or(ExbError::UnresolvedSharedPointer(id))
    }

    pub(crate) fn registry(&self) -> Option<&'a TypeRegistry> {
        self.registry
    }
}
