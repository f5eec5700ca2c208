//! Shared, unique, weak and polymorphic pointer serialization
//!
//! A pointer occupies one object scope on the wire. The first occurrence
//! of a shared target serializes its body as a nested object; every later
//! occurrence is a back-reference carrying only the id, and decoding hands
//! all references the same instance.

use std::rc::{Rc, Weak};

use exb_format::constants::ID_NEW_BIT;
use exb_format::error::{ExbError, Result};
use exb_format::tag::FieldKind;

use crate::fields::Extendable;
use crate::reader::InputArchive;
use crate::registry::{DecodeFn, PolymorphicExtendable};
use crate::writer::OutputArchive;

fn save_object_body<T: Extendable + 'static>(ar: &mut OutputArchive, value: &T) -> Result<()> {
    ar.begin_object();
    if T::VERSION > 0 {
        ar.save_type_version::<T>(T::VERSION);
    }
    value.save(ar)?;
    ar.end_object();
    Ok(())
}

/// Load a pointer body as a nested object; the body tag must be present.
pub(crate) fn load_object_body<T: Extendable + Default + 'static>(
    ar: &mut InputArchive<'_>,
) -> Result<T> {
    if !ar.read_field_tag()? {
        return Err(ExbError::UnexpectedFieldKind {
            expected: FieldKind::Class,
            got: FieldKind::OmittedField,
        });
    }
    ar.begin_object_load()?;
    let version = ar.type_version::<T>();
    let mut value = T::default();
    value.load(ar, version)?;
    ar.end_object_load()?;
    Ok(value)
}

/// Save an optional shared pointer, serializing the target once per stream.
pub fn save_shared<T: Extendable + 'static>(
    ar: &mut OutputArchive,
    ptr: &Option<Rc<T>>,
) -> Result<()> {
    ar.begin_object();
    ar.mark_pointer();
    if let Some(rc) = ptr {
        let id = ar.register_shared(Rc::as_ptr(rc) as usize);
        ar.set_object_id(id);
        if id & ID_NEW_BIT != 0 {
            save_object_body(ar, &**rc)?;
        }
    }
    ar.end_object();
    Ok(())
}

/// Load an optional shared pointer, preserving object identity.
pub fn load_shared<T: Extendable + Default + 'static>(
    ar: &mut InputArchive<'_>,
    dest: &mut Option<Rc<T>>,
) -> Result<()> {
    if !ar.read_field_tag()? {
        return Ok(());
    }
    ar.begin_object_load()?;
    let raw_id = ar.object_id();
    if ar.pointer_valid() {
        let value = load_object_body::<T>(ar)?;
        let rc = Rc::new(value);
        if raw_id != 0 {
            ar.register_shared_object(raw_id & !ID_NEW_BIT, rc.clone());
        }
        *dest = Some(rc);
    } else if raw_id != 0 {
        *dest = Some(ar.shared_object::<T>(raw_id & !ID_NEW_BIT)?);
    } else {
        *dest = None;
    }
    ar.end_object_load()
}

/// Save an optional owning pointer.
pub fn save_unique<T: Extendable + 'static>(
    ar: &mut OutputArchive,
    ptr: &Option<Box<T>>,
) -> Result<()> {
    ar.begin_object();
    ar.mark_pointer();
    if let Some(boxed) = ptr {
        save_object_body(ar, &**boxed)?;
    }
    ar.end_object();
    Ok(())
}

/// Load an optional owning pointer.
pub fn load_unique<T: Extendable + Default + 'static>(
    ar: &mut InputArchive<'_>,
    dest: &mut Option<Box<T>>,
) -> Result<()> {
    if !ar.read_field_tag()? {
        return Ok(());
    }
    ar.begin_object_load()?;
    if ar.pointer_valid() {
        *dest = Some(Box::new(load_object_body::<T>(ar)?));
    } else {
        *dest = None;
    }
    ar.end_object_load()
}

/// Save a weak pointer through the shared machinery.
pub fn save_weak<T: Extendable + 'static>(ar: &mut OutputArchive, ptr: &Weak<T>) -> Result<()> {
    let strong = ptr.upgrade();
    save_shared(ar, &strong)
}

/// Load a weak pointer; the target stays alive in the archive's id map.
pub fn load_weak<T: Extendable + Default + 'static>(
    ar: &mut InputArchive<'_>,
    dest: &mut Weak<T>,
) -> Result<()> {
    let mut strong = None;
    load_shared(ar, &mut strong)?;
    if !ar.was_serialized() {
        return Ok(());
    }
    *dest = match strong {
        Some(rc) => Rc::downgrade(&rc),
        None => Weak::new(),
    };
    Ok(())
}

fn stash_polymorphic_meta(ar: &mut OutputArchive, name: &'static str) {
    let (id, is_new) = ar.register_polymorphic(name);
    ar.set_polymorphic_id(id);
    if is_new {
        ar.set_polymorphic_name(name);
    }
}

fn polymorphic_decoder(ar: &InputArchive<'_>, name: &str) -> Result<DecodeFn> {
    ar.registry()
        .and_then(|registry| registry.decoder(name))
        .ok_or_else(|| ExbError::UnknownPolymorphicType(name.to_string()))
}

/// Save an optional owning polymorphic pointer.
pub fn save_polymorphic(
    ar: &mut OutputArchive,
    ptr: &Option<Box<dyn PolymorphicExtendable>>,
) -> Result<()> {
    ar.begin_object();
    ar.mark_pointer();
    if let Some(concrete) = ptr {
        stash_polymorphic_meta(ar, concrete.type_name());
        concrete.save_object(ar)?;
    }
    ar.end_object();
    Ok(())
}

/// Load an optional owning polymorphic pointer through the registry.
pub fn load_polymorphic(
    ar: &mut InputArchive<'_>,
    dest: &mut Option<Box<dyn PolymorphicExtendable>>,
) -> Result<()> {
    if !ar.read_field_tag()? {
        return Ok(());
    }
    ar.begin_object_load()?;
    if ar.pointer_valid() {
        let name = ar.polymorphic_name().to_string();
        let decode = polymorphic_decoder(ar, &name)?;
        *dest = Some(decode(ar)?);
    } else {
        *dest = None;
    }
    ar.end_object_load()
}

/// Save an optional shared polymorphic pointer.
pub fn save_shared_polymorphic(
    ar: &mut OutputArchive,
    ptr: &Option<Rc<dyn PolymorphicExtendable>>,
) -> Result<()> {
    ar.begin_object();
    ar.mark_pointer();
    if let Some(rc) = ptr {
        let id = ar.register_shared(Rc::as_ptr(rc) as *const () as usize);
        ar.set_object_id(id);
        stash_polymorphic_meta(ar, rc.type_name());
        if id & ID_NEW_BIT != 0 {
            rc.save_object(ar)?;
        }
    }
    ar.end_object();
    Ok(())
}

/// Load an optional shared polymorphic pointer through the registry.
pub fn load_shared_polymorphic(
    ar: &mut InputArchive<'_>,
    dest: &mut Option<Rc<dyn PolymorphicExtendable>>,
) -> Result<()> {
    if !ar.read_field_tag()? {
        return Ok(());
    }
    ar.begin_object_load()?;
    let raw_id = ar.object_id();
    if ar.pointer_valid() {
        let name = ar.polymorphic_name().to_string();
        let decode = polymorphic_decoder(ar, &name)?;
        let rc: Rc<dyn PolymorphicExtendable> = Rc::from(decode(ar)?);
        if raw_id != 0 {
            ar.register_polymorphic_object(raw_id & !ID_NEW_BIT, rc.clone());
        }
        *dest = Some(rc);
    } else if raw_id != 0 {
        match ar.polymorphic_object(raw_id & !ID_NEW_BIT) {
            Ok(rc) => *dest = Some(rc),
            Err(err) => {
                // The target itself may have been suppressed as an unknown
                // type; the ignore option extends to its back-references.
                if ar.opts.ignore_unknown_polymorphic_types {
                    *dest = None;
                } else {
                    return Err(err);
                }
            }
        }
    } else {
        *dest = None;
    }
    ar.end_object_load()
}
