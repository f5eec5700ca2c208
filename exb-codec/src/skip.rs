//! Skip/scan engine
//!
//! Consumes exactly one well-formed field whose application type is
//! unknown, advancing the stream to the position immediately after it.
//! Class and Pointer tags open a scope, LastField closes one; the walk is
//! a balanced-parentheses scan over the tag stream. Shared objects met
//! along the way are captured so a later wanted reference can replay them,
//! and new polymorphic names are registered so later occurrences of the
//! same type still resolve.

use exb_format::constants::{ID_NEW_BIT, PACKED_ELEM_SIZE_ESCAPE};
use exb_format::error::{ExbError, Result};
use exb_format::tag::{self, ClassMarkers, FieldKind, PointerMarkers};

use crate::reader::{InputArchive, PendingRegion};

impl<'a> InputArchive<'a> {
    /// Scan from inside an object to just past its terminator.
    pub(crate) fn scan_object_remainder(&mut self) -> Result<()> {
        self.scan_balanced(1)
    }

    /// Scan exactly one top-level field.
    pub(crate) fn scan_single_field(&mut self) -> Result<()> {
        self.scan_balanced(0)
    }

    fn scan_balanced(&mut self, start_depth: i32) -> Result<()> {
        let mut depth = start_depth;
        let mut first_pass = true;
        loop {
            if !first_pass {
                self.read_field_tag()?;
            }
            first_pass = false;

            let (kind, payload) = self.last_tag();
            match kind {
                FieldKind::PositiveInteger | FieldKind::NegativeInteger => {
                    let width = tag::int_width_from_code(payload)?;
                    self.src.skip(width)?;
                }
                FieldKind::FloatingPoint => {
                    let width = tag::float_width_from_code(payload)?;
                    self.src.skip(width)?;
                }
                FieldKind::PackedInteger | FieldKind::OmittedField => {}
                FieldKind::LastField => {
                    if self.capture_ends_at_depth(depth) {
                        self.finish_capture()?;
                    }
                    depth -= 1;
                }
                FieldKind::Class => {
                    let markers = ClassMarkers::from_payload(payload);
                    if !markers.contains(ClassMarkers::EMPTY_CLASS) {
                        depth += 1;
                    }
                    if markers.contains(ClassMarkers::HAS_VERSION) {
                        self.skip_varint()?;
                    }
                }
                FieldKind::Pointer => {
                    let markers = PointerMarkers::from_payload(payload);
                    if !markers.contains(PointerMarkers::EMPTY) {
                        depth += 1;
                    }
                    let mut new_shared = None;
                    if markers.contains(PointerMarkers::SHARED) {
                        let raw = self.read_varint_u32()?;
                        if raw & ID_NEW_BIT != 0 {
                            new_shared = Some(raw & !ID_NEW_BIT);
                        }
                    }
                    if markers.contains(PointerMarkers::POLYMORPHIC) {
                        let raw = self.read_u32_scalar()?;
                        if raw & ID_NEW_BIT != 0 {
                            // Register the name even though this occurrence
                            // is discarded: it is only on the wire once.
                            let name = self.read_type_name()?;
                            self.register_polymorphic_name(raw, name);
                        }
                    }
                    if let Some(object_id) = new_shared {
                        self.begin_capture_region(object_id, depth);
                    }
                }
                FieldKind::SizeTag => {
                    let width = tag::int_width_from_code(payload)?;
                    if width > 8 {
                        return Err(ExbError::IntegerTooLarge);
                    }
                    self.read_magnitude(width)?;
                }
                FieldKind::PackedArray => {
                    let elem_size = if payload == PACKED_ELEM_SIZE_ESCAPE {
                        self.read_varint()? as usize
                    } else {
                        payload as usize
                    };
                    let count = self.read_varint()? as usize;
                    let total = count.checked_mul(elem_size).ok_or_else(|| {
                        ExbError::LimitExceeded("packed array byte length overflow".to_string())
                    })?;
                    self.src.skip(total)?;
                }
                FieldKind::PackedStruct => {
                    return Err(ExbError::UnsupportedFieldKind(FieldKind::PackedStruct));
                }
            }

            if depth <= 0 {
                return Ok(());
            }
        }
    }

    fn begin_capture_region(&mut self, object_id: u32, depth: i32) {
        let start = self.src.begin_capture();
        self.shared.pending.push(PendingRegion {
            object_id,
            start,
            depth,
        });
    }

    fn capture_ends_at_depth(&self, depth: i32) -> bool {
        self.shared.pending.last().is_some_and(|p| p.depth == depth)
    }

    fn finish_capture(&mut self) -> Result<()> {
        let pending = self.shared.pending.pop().ok_or_else(|| {
            ExbError::SharedObjectProtocol("capture region finished but none was open".to_string())
        })?;
        let region = self.src.end_capture(pending.start)?;
        self.shared.regions.entry(pending.object_id).or_insert(region);
        Ok(())
    }
}
