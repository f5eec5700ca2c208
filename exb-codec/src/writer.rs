//! Output archive: primitive encoding and object metadata tracking
//!
//! The writer never emits an object's metadata tag eagerly. It is held
//! pending until the first real field inside the object forces it out, so
//! an object that turns out to have zero fields is committed with the
//! empty-class marker and needs no terminator.

use std::any::TypeId;

use ahash::{AHashMap, AHashSet};
use exb_format::constants::{ID_NEW_BIT, PACKED_ELEM_SIZE_ESCAPE};
use exb_format::endian::swap_chunks;
use exb_format::float::{canonical_f32_bits, canonical_f64_bits};
use exb_format::tag::{self, ClassMarkers, FieldKind, PointerMarkers};
use exb_format::varint::encode_uleb128;

use crate::num::ArchiveInt;
use crate::EncodeOpts;

/// Metadata of an object whose tag has not been committed yet.
#[derive(Debug, Default)]
struct PendingObject {
    is_pointer: bool,
    class_version: u32,
    object_id: u32,
    polymorphic_id: u32,
    polymorphic_name: Option<String>,
}

/// Archive encoder producing the EXB wire format in a byte buffer.
pub struct OutputArchive {
    buf: Vec<u8>,
    big_endian: bool,
    forward_versions: bool,
    pending: Option<PendingObject>,
    shared_ids: AHashMap<usize, u32>,
    next_shared_id: u32,
    polymorphic_ids: AHashMap<String, u32>,
    next_polymorphic_id: u32,
    versioned_types: AHashSet<TypeId>,
}

impl OutputArchive {
    /// Create an archive; the stream opens with its endianness byte.
    pub fn new(opts: EncodeOpts) -> Self {
        let mut buf = Vec::new();
        buf.push(opts.endianness.header_byte());
        Self {
            buf,
            big_endian: !opts.endianness.is_little(),
            forward_versions: opts.forward_versions,
            pending: None,
            shared_ids: AHashMap::new(),
            next_shared_id: 1,
            polymorphic_ids: AHashMap::new(),
            next_polymorphic_id: 1,
            versioned_types: AHashSet::new(),
        }
    }

    /// Finish encoding and take the byte buffer.
    pub fn finish(mut self) -> Vec<u8> {
        if self.pending.is_some() {
            self.flush_pending(true);
        }
        self.buf
    }

    // Raw layer --------------------------------------------------------

    fn write_tag(&mut self, kind: FieldKind, payload: u8) {
        self.buf.push(tag::pack_tag(kind, payload));
    }

    /// Append bytes given least-significant-first in the target byte order.
    fn write_scalar_bytes(&mut self, le_bytes: &[u8]) {
        if self.big_endian {
            self.buf.extend(le_bytes.iter().rev());
        } else {
            self.buf.extend_from_slice(le_bytes);
        }
    }

    fn write_varint_raw(&mut self, v: u64) {
        self.buf.extend_from_slice(&encode_uleb128(v));
    }

    // Object metadata state machine -------------------------------------

    /// Mark the beginning of a new object, committing any enclosing
    /// object's metadata first.
    pub fn begin_object(&mut self) {
        if self.pending.is_some() {
            self.flush_pending(false);
        }
        self.pending = Some(PendingObject::default());
    }

    /// End the current object. An object that never produced a field is
    /// committed with the empty marker; otherwise a terminator is written.
    pub fn end_object(&mut self) {
        if self.pending.is_some() {
            self.flush_pending(true);
        } else {
            self.write_tag(FieldKind::LastField, 0);
        }
    }

    fn flush_before_field(&mut self) {
        if self.pending.is_some() {
            self.flush_pending(false);
        }
    }

    fn flush_pending(&mut self, end_of_object: bool) {
        let p = match self.pending.take() {
            Some(p) => p,
            None => return,
        };
        if p.is_pointer {
            let mut markers = PointerMarkers::NONE;
            if p.object_id > 0 {
                markers |= PointerMarkers::SHARED;
            }
            if p.polymorphic_id != 0 {
                markers |= PointerMarkers::POLYMORPHIC;
            }
            if end_of_object {
                markers |= PointerMarkers::EMPTY;
            }
            self.write_tag(FieldKind::Pointer, markers.bits());
            if p.object_id > 0 {
                self.write_varint_raw(p.object_id as u64);
            }
            if p.polymorphic_id != 0 {
                self.write_scalar_bytes(&p.polymorphic_id.to_le_bytes());
            }
            if let Some(name) = p.polymorphic_name {
                self.write_varint_raw(name.len() as u64);
                self.buf.extend_from_slice(name.as_bytes());
            }
        } else {
            let mut markers = ClassMarkers::NONE;
            if p.class_version > 0 {
                markers |= ClassMarkers::HAS_VERSION;
            }
            if end_of_object {
                markers |= ClassMarkers::EMPTY_CLASS;
            }
            self.write_tag(FieldKind::Class, markers.bits());
            if p.class_version > 0 {
                self.write_varint_raw(p.class_version as u64);
            }
        }
    }

    /// Stash the class version into the pending object metadata.
    pub fn set_class_version(&mut self, version: u32) {
        if let Some(p) = &mut self.pending {
            p.class_version = version;
        }
    }

    /// Flag the pending object as a pointer.
    pub fn mark_pointer(&mut self) {
        if let Some(p) = &mut self.pending {
            p.is_pointer = true;
        }
    }

    /// Stash the raw shared object id (new bit included) for the pending pointer.
    pub fn set_object_id(&mut self, raw_id: u32) {
        if let Some(p) = &mut self.pending {
            p.is_pointer = true;
            p.object_id = raw_id;
        }
    }

    /// Stash the raw polymorphic id for the pending pointer.
    pub fn set_polymorphic_id(&mut self, raw_id: u32) {
        if let Some(p) = &mut self.pending {
            p.is_pointer = true;
            p.polymorphic_id = raw_id;
        }
    }

    /// Stash the polymorphic type name for the pending pointer.
    pub fn set_polymorphic_name(&mut self, name: &str) {
        if let Some(p) = &mut self.pending {
            p.polymorphic_name = Some(name.to_string());
        }
    }

    /// Record `version` for type `T`.
    ///
    /// In forward-support mode the version rides along with every
    /// occurrence, so a reader that skipped the first one still sees it;
    /// otherwise it is recorded once per stream.
    pub fn save_type_version<T: 'static>(&mut self, version: u32) {
        if self.forward_versions || self.versioned_types.insert(TypeId::of::<T>()) {
            self.set_class_version(version);
        }
    }

    /// Register a shared target address, returning the raw id to store.
    ///
    /// The new bit is set on first sight so readers know a body follows;
    /// address zero maps to the reserved null id.
    pub fn register_shared(&mut self, addr: usize) -> u32 {
        if addr == 0 {
            return 0;
        }
        match self.shared_ids.get(&addr) {
            Some(&id) => id,
            None => {
                let id = self.next_shared_id;
                self.next_shared_id += 1;
                self.shared_ids.insert(addr, id);
                id | ID_NEW_BIT
            }
        }
    }

    /// Register a polymorphic type name, returning the raw id and whether
    /// the name is new in this stream.
    pub fn register_polymorphic(&mut self, name: &str) -> (u32, bool) {
        match self.polymorphic_ids.get(name) {
            Some(&id) => (id, false),
            None => {
                let id = self.next_polymorphic_id;
                self.next_polymorphic_id += 1;
                self.polymorphic_ids.insert(name.to_string(), id);
                (id | ID_NEW_BIT, true)
            }
        }
    }

    // Primitive fields ---------------------------------------------------

    /// Write a raw varint with no tag; varints are never byte-swapped.
    pub fn write_varint(&mut self, v: u64) {
        self.flush_before_field();
        self.write_varint_raw(v);
    }

    /// Write a boolean field.
    pub fn write_bool(&mut self, v: bool) {
        self.flush_before_field();
        self.write_tag(FieldKind::PackedInteger, v as u8);
    }

    /// Write an integer field using the smallest encoding that holds it.
    pub fn write_int<T: ArchiveInt>(&mut self, v: T) {
        self.flush_before_field();
        let (negative, magnitude) = v.to_sign_magnitude();
        if !negative && magnitude <= 0xf {
            self.write_tag(FieldKind::PackedInteger, magnitude as u8);
            return;
        }
        let len = tag::magnitude_len(magnitude);
        let (code, stored) = if len <= 8 { (len as u8, len) } else { (9, 16) };
        let kind = if negative {
            FieldKind::NegativeInteger
        } else {
            FieldKind::PositiveInteger
        };
        self.write_tag(kind, code);
        let bytes = magnitude.to_le_bytes();
        self.write_scalar_bytes(&bytes[..stored]);
    }

    /// Write a 4-byte float field, canonicalizing NaN.
    pub fn write_f32(&mut self, v: f32) {
        self.flush_before_field();
        self.write_tag(FieldKind::FloatingPoint, 1);
        self.write_scalar_bytes(&canonical_f32_bits(v).to_le_bytes());
    }

    /// Write an 8-byte float field, canonicalizing NaN.
    pub fn write_f64(&mut self, v: f64) {
        self.flush_before_field();
        self.write_tag(FieldKind::FloatingPoint, 2);
        self.write_scalar_bytes(&canonical_f64_bits(v).to_le_bytes());
    }

    /// Write the placeholder for a field deliberately not serialized.
    pub fn write_omitted(&mut self) {
        self.flush_before_field();
        self.write_tag(FieldKind::OmittedField, 0);
    }

    /// Write a container element count.
    pub fn write_size_tag(&mut self, count: u64) {
        self.flush_before_field();
        let len = tag::magnitude_len(count as u128);
        self.write_tag(FieldKind::SizeTag, len as u8);
        let bytes = count.to_le_bytes();
        self.write_scalar_bytes(&bytes[..len]);
    }

    /// Write a packed array of `count` elements of `elem_size` bytes each.
    ///
    /// `le_data` holds the elements least-significant-byte-first; they are
    /// emitted in the target order per element.
    pub fn write_packed_array(&mut self, elem_size: usize, count: usize, le_data: &[u8]) {
        self.flush_before_field();
        if elem_size < PACKED_ELEM_SIZE_ESCAPE as usize {
            self.write_tag(FieldKind::PackedArray, elem_size as u8);
        } else {
            self.write_tag(FieldKind::PackedArray, PACKED_ELEM_SIZE_ESCAPE);
            self.write_varint_raw(elem_size as u64);
        }
        self.write_varint_raw(count as u64);
        if self.big_endian && elem_size > 1 {
            let mut swapped = le_data.to_vec();
            swap_chunks(&mut swapped, elem_size);
            self.buf.extend_from_slice(&swapped);
        } else {
            self.buf.extend_from_slice(le_data);
        }
    }

    /// Write a packed array of single bytes.
    pub fn write_byte_array(&mut self, data: &[u8]) {
        self.write_packed_array(1, data.len(), data);
    }
}
