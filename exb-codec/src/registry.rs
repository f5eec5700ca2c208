//! Polymorphic type registry
//!
//! Replaces runtime type information with an explicit table: concrete
//! types are registered under a stable wire name at startup and looked up
//! by the name embedded once per stream. Decoding a name with no binding
//! either yields a null pointer or fails, per the archive options.

use std::any::Any;

use ahash::AHashMap;
use exb_format::error::Result;

use crate::fields::Extendable;
use crate::reader::InputArchive;
use crate::writer::OutputArchive;

/// Object-safe surface of a polymorphic serializable type.
pub trait PolymorphicExtendable {
    /// Stable name identifying the concrete type on the wire.
    fn type_name(&self) -> &'static str;

    /// Serialize the concrete object as a nested archive object.
    fn save_object(&self, ar: &mut OutputArchive) -> Result<()>;

    /// Access the concrete value for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Supplies the wire name of a polymorphic type.
pub trait Polymorphic {
    /// Stable name identifying this type on the wire.
    const TYPE_NAME: &'static str;
}

impl<T: Extendable + Polymorphic + Any> PolymorphicExtendable for T {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn save_object(&self, ar: &mut OutputArchive) -> Result<()> {
        ar.begin_object();
        if T::VERSION > 0 {
            ar.save_type_version::<T>(T::VERSION);
        }
        self.save(ar)?;
        ar.end_object();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Decoder constructing a boxed instance from the archive.
pub type DecodeFn = fn(&mut InputArchive<'_>) -> Result<Box<dyn PolymorphicExtendable>>;

/// Registration table mapping type names to decoders.
#[derive(Default)]
pub struct TypeRegistry {
    entries: AHashMap<&'static str, DecodeFn>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register type `T` under its wire name.
    pub fn register<T>(&mut self)
    where
        T: Extendable + Polymorphic + Default + Any,
    {
        self.entries.insert(T::TYPE_NAME, decode_concrete::<T>);
    }

    /// Whether `name` has a registered binding.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// The decoder registered for `name`.
    pub fn decoder(&self, name: &str) -> Option<DecodeFn> {
        self.entries.get(name).copied()
    }
}

fn decode_concrete<T>(ar: &mut InputArchive<'_>) -> Result<Box<dyn PolymorphicExtendable>>
where
    T: Extendable + Polymorphic + Default + Any,
{
    let value: T = crate::pointers::load_object_body(ar)?;
    Ok(Box::new(value))
}
