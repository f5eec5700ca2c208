//! Field-level serialization for primitives, containers and objects
//!
//! These are regular callers of the archive primitives. Scalar fields are
//! bare tagged values; every composite value (strings, sequences, maps,
//! user objects) is wrapped in an object scope so a reader that does not
//! know the field can always skip it as one balanced unit, and empty
//! composites benefit from empty-class elision.

use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use exb_format::error::{ExbError, Result};

use crate::pointers;
use crate::reader::InputArchive;
use crate::registry::PolymorphicExtendable;
use crate::writer::OutputArchive;

/// A value that can be written and read as one archive field.
pub trait Field {
    /// Serialize this value as the next field.
    fn save_field(&self, ar: &mut OutputArchive) -> Result<()>;

    /// Deserialize the next field into this value.
    ///
    /// When the writer omitted the field the current value is kept, which
    /// is what gives old streams their defaults under a newer schema.
    fn load_field(&mut self, ar: &mut InputArchive<'_>) -> Result<()>;
}

/// A composite type serialized as an archive object.
pub trait Extendable {
    /// Version recorded with each serialized object when non-zero.
    const VERSION: u32 = 0;

    /// Write the object's fields.
    fn save(&self, ar: &mut OutputArchive) -> Result<()>;

    /// Read the object's fields; `version` is what the writer recorded.
    fn load(&mut self, ar: &mut InputArchive<'_>, version: u32) -> Result<()>;
}

/// Write `value` as a nested archive object with version metadata.
pub fn save_object<T: Extendable + 'static>(ar: &mut OutputArchive, value: &T) -> Result<()> {
    ar.begin_object();
    if T::VERSION > 0 {
        ar.save_type_version::<T>(T::VERSION);
    }
    value.save(ar)?;
    ar.end_object();
    Ok(())
}

/// Read the next field into `value` as a nested archive object.
pub fn load_object<T: Extendable + 'static>(
    ar: &mut InputArchive<'_>,
    value: &mut T,
) -> Result<()> {
    if !ar.read_field_tag()? {
        return Ok(());
    }
    ar.begin_object_load()?;
    let version = ar.type_version::<T>();
    value.load(ar, version)?;
    ar.end_object_load()
}

/// Implement [`Field`] for types implementing [`Extendable`].
#[macro_export]
macro_rules! impl_object_field {
    ($($ty:ty),* $(,)?) => {$(
        impl $crate::Field for $ty {
            fn save_field(
                &self,
                ar: &mut $crate::OutputArchive,
            ) -> $crate::Result<()> {
                $crate::fields::save_object(ar, self)
            }

            fn load_field(
                &mut self,
                ar: &mut $crate::InputArchive<'_>,
            ) -> $crate::Result<()> {
                $crate::fields::load_object(ar, self)
            }
        }
    )*};
}

macro_rules! int_field_impl {
    ($($t:ty),*) => {$(
        impl Field for $t {
            fn save_field(&self, ar: &mut OutputArchive) -> Result<()> {
                ar.write_int(*self);
                Ok(())
            }

            fn load_field(&mut self, ar: &mut InputArchive<'_>) -> Result<()> {
                if ar.read_field_tag()? {
                    *self = ar.read_int()?;
                }
                Ok(())
            }
        }
    )*};
}

int_field_impl!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128);

impl Field for bool {
    fn save_field(&self, ar: &mut OutputArchive) -> Result<()> {
        ar.write_bool(*self);
        Ok(())
    }

    fn load_field(&mut self, ar: &mut InputArchive<'_>) -> Result<()> {
        if ar.read_field_tag()? {
            *self = ar.read_bool()?;
        }
        Ok(())
    }
}

impl Field for f32 {
    fn save_field(&self, ar: &mut OutputArchive) -> Result<()> {
        ar.write_f32(*self);
        Ok(())
    }

    fn load_field(&mut self, ar: &mut InputArchive<'_>) -> Result<()> {
        if ar.read_field_tag()? {
            *self = ar.read_f32()?;
        }
        Ok(())
    }
}

impl Field for f64 {
    fn save_field(&self, ar: &mut OutputArchive) -> Result<()> {
        ar.write_f64(*self);
        Ok(())
    }

    fn load_field(&mut self, ar: &mut InputArchive<'_>) -> Result<()> {
        if ar.read_field_tag()? {
            *self = ar.read_f64()?;
        }
        Ok(())
    }
}

impl Field for String {
    fn save_field(&self, ar: &mut OutputArchive) -> Result<()> {
        ar.begin_object();
        ar.write_size_tag(self.len() as u64);
        ar.write_byte_array(self.as_bytes());
        ar.end_object();
        Ok(())
    }

    fn load_field(&mut self, ar: &mut InputArchive<'_>) -> Result<()> {
        if !ar.read_field_tag()? {
            return Ok(());
        }
        ar.begin_object_load()?;
        if ar.read_field_tag()? {
            ar.read_size_tag()?;
            if ar.read_field_tag()? {
                let data = ar.read_packed_array(1)?;
                *self = String::from_utf8(data).map_err(|_| ExbError::InvalidUtf8)?;
            }
        }
        ar.end_object_load()
    }
}

/// Raw bytes serialized as one packed array rather than element-wise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bytes(pub Vec<u8>);

impl Field for Bytes {
    fn save_field(&self, ar: &mut OutputArchive) -> Result<()> {
        ar.begin_object();
        ar.write_size_tag(self.0.len() as u64);
        ar.write_byte_array(&self.0);
        ar.end_object();
        Ok(())
    }

    fn load_field(&mut self, ar: &mut InputArchive<'_>) -> Result<()> {
        if !ar.read_field_tag()? {
            return Ok(());
        }
        ar.begin_object_load()?;
        if ar.read_field_tag()? {
            ar.read_size_tag()?;
            if ar.read_field_tag()? {
                self.0 = ar.read_packed_array(1)?;
            }
        }
        ar.end_object_load()
    }
}

impl<T: Field + Default> Field for Vec<T> {
    fn save_field(&self, ar: &mut OutputArchive) -> Result<()> {
        ar.begin_object();
        ar.write_size_tag(self.len() as u64);
        for item in self {
            item.save_field(ar)?;
        }
        ar.end_object();
        Ok(())
    }

    fn load_field(&mut self, ar: &mut InputArchive<'_>) -> Result<()> {
        if !ar.read_field_tag()? {
            return Ok(());
        }
        ar.begin_object_load()?;
        self.clear();
        if ar.read_field_tag()? {
            let count = ar.read_size_tag()?;
            for _ in 0..count {
                let mut item = T::default();
                item.load_field(ar)?;
                self.push(item);
            }
        }
        ar.end_object_load()
    }
}

impl<T: Field, const N: usize> Field for [T; N] {
    fn save_field(&self, ar: &mut OutputArchive) -> Result<()> {
        for item in self {
            item.save_field(ar)?;
        }
        Ok(())
    }

    fn load_field(&mut self, ar: &mut InputArchive<'_>) -> Result<()> {
        for item in self {
            item.load_field(ar)?;
        }
        Ok(())
    }
}

impl<K, V> Field for BTreeMap<K, V>
where
    K: Field + Default + Ord,
    V: Field + Default,
{
    fn save_field(&self, ar: &mut OutputArchive) -> Result<()> {
        ar.begin_object();
        ar.write_size_tag(self.len() as u64);
        for (key, value) in self {
            ar.begin_object();
            key.save_field(ar)?;
            value.save_field(ar)?;
            ar.end_object();
        }
        ar.end_object();
        Ok(())
    }

    fn load_field(&mut self, ar: &mut InputArchive<'_>) -> Result<()> {
        if !ar.read_field_tag()? {
            return Ok(());
        }
        ar.begin_object_load()?;
        self.clear();
        if ar.read_field_tag()? {
            let count = ar.read_size_tag()?;
            for _ in 0..count {
                if !ar.read_field_tag()? {
                    continue;
                }
                ar.begin_object_load()?;
                let mut key = K::default();
                let mut value = V::default();
                key.load_field(ar)?;
                value.load_field(ar)?;
                ar.end_object_load()?;
                self.insert(key, value);
            }
        }
        ar.end_object_load()
    }
}

impl<T: Extendable + Default + 'static> Field for Option<Rc<T>> {
    fn save_field(&self, ar: &mut OutputArchive) -> Result<()> {
        pointers::save_shared(ar, self)
    }

    fn load_field(&mut self, ar: &mut InputArchive<'_>) -> Result<()> {
        pointers::load_shared(ar, self)
    }
}

impl<T: Extendable + Default + 'static> Field for Option<Box<T>> {
    fn save_field(&self, ar: &mut OutputArchive) -> Result<()> {
        pointers::save_unique(ar, self)
    }

    fn load_field(&mut self, ar: &mut InputArchive<'_>) -> Result<()> {
        pointers::load_unique(ar, self)
    }
}

impl<T: Extendable + Default + 'static> Field for Weak<T> {
    fn save_field(&self, ar: &mut OutputArchive) -> Result<()> {
        pointers::save_weak(ar, self)
    }

    fn load_field(&mut self, ar: &mut InputArchive<'_>) -> Result<()> {
        pointers::load_weak(ar, self)
    }
}

impl Field for Option<Box<dyn PolymorphicExtendable>> {
    fn save_field(&self, ar: &mut OutputArchive) -> Result<()> {
        pointers::save_polymorphic(ar, self)
    }

    fn load_field(&mut self, ar: &mut InputArchive<'_>) -> Result<()> {
        pointers::load_polymorphic(ar, self)
    }
}

impl Field for Option<Rc<dyn PolymorphicExtendable>> {
    fn save_field(&self, ar: &mut OutputArchive) -> Result<()> {
        pointers::save_shared_polymorphic(ar, self)
    }

    fn load_field(&mut self, ar: &mut InputArchive<'_>) -> Result<()> {
        pointers::load_shared_polymorphic(ar, self)
    }
}
