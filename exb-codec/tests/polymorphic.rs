//! Polymorphic pointers through the explicit type registry
//!
//! Type names travel in the stream once per type; decoding resolves them
//! through a registry of explicitly registered bindings. Unknown names
//! decode as null pointers by default instead of failing.

use std::rc::Rc;

use exb_codec::{
    from_bytes_with, from_bytes_with_registry, impl_object_field, to_bytes, DecodeOpts, ExbError,
    Extendable, Field, InputArchive, OutputArchive, Polymorphic, PolymorphicExtendable, Result,
    TypeRegistry,
};

#[derive(Debug, Default, PartialEq)]
struct Circle {
    radius: f64,
}

impl Extendable for Circle {
    fn save(&self, ar: &mut OutputArchive) -> Result<()> {
        self.radius.save_field(ar)
    }

    fn load(&mut self, ar: &mut InputArchive<'_>, _version: u32) -> Result<()> {
        self.radius.load_field(ar)
    }
}

impl Polymorphic for Circle {
    const TYPE_NAME: &'static str = "shapes::Circle";
}

#[derive(Debug, Default, PartialEq)]
struct Square {
    side: f64,
}

impl Extendable for Square {
    fn save(&self, ar: &mut OutputArchive) -> Result<()> {
        self.side.save_field(ar)
    }

    fn load(&mut self, ar: &mut InputArchive<'_>, _version: u32) -> Result<()> {
        self.side.load_field(ar)
    }
}

impl Polymorphic for Square {
    const TYPE_NAME: &'static str = "shapes::Square";
}

impl_object_field!(Circle, Square);

fn shape_registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry.register::<Circle>();
    registry.register::<Square>();
    registry
}

#[derive(Default)]
struct Scene {
    shape: Option<Box<dyn PolymorphicExtendable>>,
    tail: u32,
}

impl Extendable for Scene {
    fn save(&self, ar: &mut OutputArchive) -> Result<()> {
        self.shape.save_field(ar)?;
        self.tail.save_field(ar)
    }

    fn load(&mut self, ar: &mut InputArchive<'_>, _version: u32) -> Result<()> {
        self.shape.load_field(ar)?;
        self.tail.load_field(ar)
    }
}

impl_object_field!(Scene);

#[test]
fn polymorphic_round_trip_through_registry() {
    let written = Scene {
        shape: Some(Box::new(Circle { radius: 2.5 })),
        tail: 31,
    };
    let bytes = to_bytes(&written).unwrap();

    let registry = shape_registry();
    let read: Scene =
        from_bytes_with_registry(&bytes, DecodeOpts::default(), &registry).unwrap();
    let shape = read.shape.expect("shape decoded");
    assert_eq!(shape.type_name(), "shapes::Circle");
    let circle = shape.as_any().downcast_ref::<Circle>().expect("a circle");
    assert_eq!(circle.radius, 2.5);
    assert_eq!(read.tail, 31);
}

#[test]
fn unknown_type_decodes_as_null_and_siblings_survive() {
    let written = Scene {
        shape: Some(Box::new(Square { side: 4.0 })),
        tail: 77,
    };
    let bytes = to_bytes(&written).unwrap();

    // No registry at all: every name is unknown.
    let read: Scene = from_bytes_with(&bytes, DecodeOpts::default()).unwrap();
    assert!(read.shape.is_none());
    assert_eq!(read.tail, 77);

    // A registry that knows circles but not squares.
    let mut registry = TypeRegistry::new();
    registry.register::<Circle>();
    let read: Scene =
        from_bytes_with_registry(&bytes, DecodeOpts::default(), &registry).unwrap();
    assert!(read.shape.is_none());
    assert_eq!(read.tail, 77);
}

#[test]
fn unknown_type_fails_when_configured_strict() {
    let written = Scene {
        shape: Some(Box::new(Square { side: 1.0 })),
        tail: 0,
    };
    let bytes = to_bytes(&written).unwrap();

    let opts = DecodeOpts {
        ignore_unknown_polymorphic_types: false,
        ..DecodeOpts::default()
    };
    let result = from_bytes_with::<Scene>(&bytes, opts);
    assert!(matches!(result, Err(ExbError::UnknownPolymorphicType(_))));
}

#[derive(Default)]
struct TwoShapes {
    a: Option<Box<dyn PolymorphicExtendable>>,
    b: Option<Box<dyn PolymorphicExtendable>>,
}

impl Extendable for TwoShapes {
    fn save(&self, ar: &mut OutputArchive) -> Result<()> {
        self.a.save_field(ar)?;
        self.b.save_field(ar)
    }

    fn load(&mut self, ar: &mut InputArchive<'_>, _version: u32) -> Result<()> {
        self.a.load_field(ar)?;
        self.b.load_field(ar)
    }
}

/// Reader that dropped the first shape from its schema.
#[derive(Default)]
struct SecondShapeOnly {
    b: Option<Box<dyn PolymorphicExtendable>>,
}

impl Extendable for SecondShapeOnly {
    fn save(&self, ar: &mut OutputArchive) -> Result<()> {
        ar.write_omitted();
        self.b.save_field(ar)
    }

    fn load(&mut self, ar: &mut InputArchive<'_>, _version: u32) -> Result<()> {
        ar.skip_omitted_field()?;
        self.b.load_field(ar)
    }
}

impl_object_field!(TwoShapes, SecondShapeOnly);

#[test]
fn type_name_travels_once_and_resolves_by_id() {
    let written = TwoShapes {
        a: Some(Box::new(Circle { radius: 1.0 })),
        b: Some(Box::new(Circle { radius: 9.0 })),
    };
    let bytes = to_bytes(&written).unwrap();

    let registry = shape_registry();
    let read: TwoShapes =
        from_bytes_with_registry(&bytes, DecodeOpts::default(), &registry).unwrap();
    let b = read.b.expect("second shape");
    assert_eq!(
        b.as_any().downcast_ref::<Circle>().expect("circle").radius,
        9.0
    );
}

#[test]
fn skipped_occurrence_still_registers_the_type_name() {
    // The only occurrence carrying the name is on the skipped path; the
    // second shape refers to the name by id alone.
    let written = TwoShapes {
        a: Some(Box::new(Circle { radius: 3.0 })),
        b: Some(Box::new(Circle { radius: 6.0 })),
    };
    let bytes = to_bytes(&written).unwrap();

    let registry = shape_registry();
    let read: SecondShapeOnly =
        from_bytes_with_registry(&bytes, DecodeOpts::default(), &registry).unwrap();
    let b = read.b.expect("second shape");
    assert_eq!(
        b.as_any().downcast_ref::<Circle>().expect("circle").radius,
        6.0
    );
}

#[derive(Default)]
struct SharedShapes {
    a: Option<Rc<dyn PolymorphicExtendable>>,
    b: Option<Rc<dyn PolymorphicExtendable>>,
}

impl Extendable for SharedShapes {
    fn save(&self, ar: &mut OutputArchive) -> Result<()> {
        self.a.save_field(ar)?;
        self.b.save_field(ar)
    }

    fn load(&mut self, ar: &mut InputArchive<'_>, _version: u32) -> Result<()> {
        self.a.load_field(ar)?;
        self.b.load_field(ar)
    }
}

/// Reader that dropped the first shared shape.
#[derive(Default)]
struct SecondSharedOnly {
    b: Option<Rc<dyn PolymorphicExtendable>>,
}

impl Extendable for SecondSharedOnly {
    fn save(&self, ar: &mut OutputArchive) -> Result<()> {
        ar.write_omitted();
        self.b.save_field(ar)
    }

    fn load(&mut self, ar: &mut InputArchive<'_>, _version: u32) -> Result<()> {
        ar.skip_omitted_field()?;
        self.b.load_field(ar)
    }
}

impl_object_field!(SharedShapes, SecondSharedOnly);

#[test]
fn shared_polymorphic_pointers_keep_identity() {
    let target: Rc<dyn PolymorphicExtendable> = Rc::new(Square { side: 2.0 });
    let written = SharedShapes {
        a: Some(target.clone()),
        b: Some(target),
    };
    let bytes = to_bytes(&written).unwrap();

    let registry = shape_registry();
    let read: SharedShapes =
        from_bytes_with_registry(&bytes, DecodeOpts::default(), &registry).unwrap();
    let a = read.a.expect("first reference");
    let b = read.b.expect("second reference");
    assert!(Rc::ptr_eq(&a, &b));
    assert_eq!(
        a.as_any().downcast_ref::<Square>().expect("square").side,
        2.0
    );
}

#[test]
fn skipped_shared_polymorphic_replays_for_later_reference() {
    let target: Rc<dyn PolymorphicExtendable> = Rc::new(Circle { radius: 8.0 });
    let written = SharedShapes {
        a: Some(target.clone()),
        b: Some(target),
    };
    let bytes = to_bytes(&written).unwrap();

    let registry = shape_registry();
    let read: SecondSharedOnly =
        from_bytes_with_registry(&bytes, DecodeOpts::default(), &registry).unwrap();
    let b = read.b.expect("second reference");
    assert_eq!(
        b.as_any().downcast_ref::<Circle>().expect("circle").radius,
        8.0
    );
}

#[test]
fn unknown_shared_polymorphic_back_reference_is_null_too() {
    let target: Rc<dyn PolymorphicExtendable> = Rc::new(Square { side: 5.0 });
    let written = SharedShapes {
        a: Some(target.clone()),
        b: Some(target),
    };
    let bytes = to_bytes(&written).unwrap();

    // No binding for squares: the first reference is suppressed, and the
    // back-reference follows it to null rather than failing.
    let mut registry = TypeRegistry::new();
    registry.register::<Circle>();
    let read: SharedShapes =
        from_bytes_with_registry(&bytes, DecodeOpts::default(), &registry).unwrap();
    assert!(read.a.is_none());
    assert!(read.b.is_none());
}
