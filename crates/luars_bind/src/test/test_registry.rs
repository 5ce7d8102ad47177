// Type registration, conflicts and pointer casting
use std::ptr::NonNull;

use super::fixtures::*;
use crate::lua_vm::RegisterError;
use crate::types::Registry;

#[test]
fn test_get_or_create_is_idempotent() {
    let mut builder = Registry::builder();
    let derived = builder.get_or_create::<Derived>();
    assert_eq!(builder.get_or_create::<Derived>(), derived);
    // the base was registered on the way
    let base = builder.get_or_create::<Base>();
    assert_ne!(base, derived);

    let registry = builder.build();
    assert_eq!(registry.desc_of::<Derived>(), Some(derived));
    assert_eq!(registry.find("Base"), Some(base));
    assert_eq!(registry.get(derived).unwrap().super_id(), Some(base));
    assert_eq!(registry.get(base).unwrap().children(), &[derived]);
}

#[test]
fn test_is_base_of() {
    let registry = registry();
    let base = registry.desc_of::<Base>().unwrap();
    let derived = registry.desc_of::<Derived>().unwrap();
    let other = registry.desc_of::<Other>().unwrap();

    assert!(registry.is_base_of(base, derived));
    assert!(registry.is_base_of(derived, derived));
    assert!(!registry.is_base_of(derived, base));
    assert!(!registry.is_base_of(base, other));
}

#[test]
fn test_duplicate_member_keeps_first() {
    let mut builder = Registry::builder();
    builder
        .alloc_type::<Base>()
        .add_var("id", |b| b.id, |b, v| b.id = v)
        .add_getter("id", |b| b.id + 100)
        .finalize();

    assert_eq!(
        builder.conflicts(),
        &[RegisterError::DuplicateMember {
            type_name: "Base".into(),
            member: "id".into(),
        }]
    );
    assert_eq!(builder.conflicts()[0].to_string(), "type:[Base] export same member:[id]");

    let registry = builder.build();
    let desc = registry.get(registry.desc_of::<Base>().unwrap()).unwrap();
    // the read/write definition won
    assert!(matches!(
        desc.member("id"),
        Some(crate::types::Member::Var { setter: Some(_), .. })
    ));
    assert!(desc.member("id").is_some_and(|m| m.is_var()));
}

#[test]
fn test_re_export_is_rejected() {
    let mut builder = Registry::builder();
    builder.alloc_type::<Base>().add_getter("id", |b| b.id).finalize();
    builder.alloc_type::<Base>().add_getter("other", |b| b.id).finalize();

    assert_eq!(
        builder.conflicts(),
        &[RegisterError::ReExport {
            type_name: "Base".into()
        }]
    );
    let registry = builder.build();
    let desc = registry.get(registry.desc_of::<Base>().unwrap()).unwrap();
    assert!(desc.member("other").is_none());
    assert!(desc.is_finalized());
}

#[test]
fn test_weak_root_is_inherited() {
    let registry = registry();
    let actor = registry.get(registry.desc_of::<Actor>().unwrap()).unwrap();
    let pawn = registry.get(registry.desc_of::<Pawn>().unwrap()).unwrap();
    let base = registry.get(registry.desc_of::<Base>().unwrap()).unwrap();

    assert!(actor.is_weak());
    assert!(pawn.is_weak());
    assert!(!base.is_weak());
}

#[test]
fn test_cast_round_trip_same_address() {
    let registry = registry();
    let base = registry.desc_of::<Base>().unwrap();
    let derived = registry.desc_of::<Derived>().unwrap();

    let mut obj = Derived {
        base: Base { id: 1 },
        extra: 2,
    };
    let ptr = NonNull::from(&mut obj).cast::<u8>();
    let up = unsafe { registry.to_super(ptr, derived, base) }.unwrap();
    assert_eq!(up.as_ptr(), &mut obj.base as *mut Base as *mut u8);
    let down = unsafe { registry.to_derived(up, base, derived) }.unwrap();
    assert_eq!(down, ptr);
}

#[cfg(feature = "multi-inherit")]
#[test]
fn test_cast_round_trip_with_offset() {
    let registry = registry();
    let base = registry.desc_of::<Base>().unwrap();
    let shifted = registry.desc_of::<Shifted>().unwrap();

    let mut obj = Shifted {
        pad: [0; 2],
        base: Base { id: 7 },
    };
    let ptr = NonNull::from(&mut obj).cast::<u8>();
    let up = unsafe { registry.to_super(ptr, shifted, base) }.unwrap();
    assert_eq!(up.as_ptr(), &mut obj.base as *mut Base as *mut u8);
    assert_ne!(up, ptr);
    assert_eq!(unsafe { up.cast::<Base>().as_ref() }.id, 7);

    let down = unsafe { registry.to_derived(up, base, shifted) }.unwrap();
    assert_eq!(down, ptr);

    let (root, root_desc) = unsafe { registry.root_ptr(ptr, shifted) };
    assert_eq!((root, root_desc), (up, base));
}

#[cfg(not(feature = "multi-inherit"))]
#[test]
fn test_casts_keep_the_address_without_offsets() {
    let registry = registry();
    let base = registry.desc_of::<Base>().unwrap();
    let derived = registry.desc_of::<Derived>().unwrap();
    let other = registry.desc_of::<Other>().unwrap();

    let mut obj = Derived {
        base: Base { id: 3 },
        extra: 0,
    };
    let ptr = NonNull::from(&mut obj).cast::<u8>();
    let up = unsafe { registry.to_super(ptr, derived, base) }.unwrap();
    assert_eq!(up, ptr);
    assert_eq!(unsafe { up.cast::<Base>().as_ref() }.id, 3);
    assert_eq!(unsafe { registry.to_derived(up, base, derived) }, Some(ptr));

    let (root, root_desc) = unsafe { registry.root_ptr(ptr, derived) };
    assert_eq!((root, root_desc), (ptr, base));
    assert!(unsafe { registry.to_super(ptr, derived, other) }.is_none());
}

#[test]
fn test_cast_rejects_wrong_dynamic_type() {
    let registry = registry();
    let shape = registry.desc_of::<Shape>().unwrap();
    let circle = registry.desc_of::<Circle>().unwrap();
    let square = registry.desc_of::<Square>().unwrap();
    let other = registry.desc_of::<Other>().unwrap();

    let mut obj = Circle::new(2.0);
    let ptr = NonNull::from(&mut obj.shape).cast::<u8>();

    assert!(unsafe { registry.to_derived(ptr, shape, circle) }.is_some());
    assert!(unsafe { registry.to_derived(ptr, shape, square) }.is_none());
    // unrelated types never convert
    assert!(unsafe { registry.to_derived(ptr, shape, other) }.is_none());
    assert!(unsafe { registry.to_super(ptr, shape, circle) }.is_none());
}
