use std::any::{Any, TypeId};
use std::ptr::NonNull;

use ahash::AHashMap;
use smol_str::SmolStr;

use super::RegistryBuilder;
use super::member::Member;
use super::weak_ref::WeakObjProc;

/// Dense descriptor id, stable for the lifetime of its registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
#[repr(transparent)]
pub struct DescId(pub u32);

impl DescId {
    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A native type exported to scripts.
///
/// ```ignore
/// struct Actor { name: String }
///
/// impl Declared for Actor {
///     const NAME: &'static str = "Actor";
/// }
/// ```
pub trait Declared: Any {
    /// Script visible type name, unique within a registry.
    const NAME: &'static str;

    /// Direct base type, see [`Inherit::of`].
    fn inherit() -> Option<Inherit> {
        None
    }

    /// Present on the root of a weak object hierarchy.
    fn weak_proc() -> Option<WeakObjProc> {
        None
    }

    /// Most derived type of the live object, for polymorphic hierarchies.
    /// `None` means the static type is trusted.
    fn dynamic_type(&self) -> Option<TypeId> {
        None
    }
}

/// Declares `B` as the direct base of `Self`.
///
/// # Safety
/// `OFFSET` must be the byte offset of the `B` value embedded in `Self`
/// (use `core::mem::offset_of!` on a `#[repr(C)]` type). Without the
/// `multi-inherit` feature the offset must be 0.
pub unsafe trait Inherits<B: Declared>: Declared {
    const OFFSET: usize;
}

/// Pointer conversion between a type and its direct base.
///
/// Built once per derived type at registration and stored by value in its
/// descriptor.
#[derive(Clone, Copy)]
pub struct Caster {
    pub(crate) to_super: unsafe fn(NonNull<u8>) -> NonNull<u8>,
    pub(crate) to_derived: unsafe fn(NonNull<u8>) -> NonNull<u8>,
}

#[cfg(feature = "multi-inherit")]
unsafe fn offset_to_super<D: Inherits<B>, B: Declared>(ptr: NonNull<u8>) -> NonNull<u8> {
    unsafe { ptr.add(D::OFFSET) }
}

#[cfg(feature = "multi-inherit")]
unsafe fn offset_to_derived<D: Inherits<B>, B: Declared>(ptr: NonNull<u8>) -> NonNull<u8> {
    unsafe { ptr.sub(D::OFFSET) }
}

#[cfg(not(feature = "multi-inherit"))]
unsafe fn identity_cast(ptr: NonNull<u8>) -> NonNull<u8> {
    ptr
}

impl Caster {
    #[cfg(feature = "multi-inherit")]
    pub fn of<D: Inherits<B>, B: Declared>() -> Self {
        Caster {
            to_super: offset_to_super::<D, B>,
            to_derived: offset_to_derived::<D, B>,
        }
    }

    #[cfg(not(feature = "multi-inherit"))]
    pub fn of<D: Inherits<B>, B: Declared>() -> Self {
        debug_assert_eq!(
            D::OFFSET,
            0,
            "'{}' must embed '{}' at offset 0 without multi-inherit",
            D::NAME,
            B::NAME
        );
        Caster {
            to_super: identity_cast,
            to_derived: identity_cast,
        }
    }
}

/// Link from a type to its direct base.
#[derive(Clone, Copy)]
pub struct Inherit {
    pub(crate) base: TypeId,
    pub(crate) register_base: fn(&mut RegistryBuilder) -> DescId,
    pub(crate) caster: Caster,
}

impl Inherit {
    pub fn of<D: Inherits<B>, B: Declared>() -> Self {
        Inherit {
            base: TypeId::of::<B>(),
            register_base: RegistryBuilder::get_or_create::<B>,
            caster: Caster::of::<D, B>(),
        }
    }
}

pub(crate) type DynamicTypeFn = unsafe fn(NonNull<u8>) -> Option<TypeId>;

pub(crate) unsafe fn dynamic_type_of<T: Declared>(ptr: NonNull<u8>) -> Option<TypeId> {
    unsafe { ptr.cast::<T>().as_ref() }.dynamic_type()
}

/// Per exported type metadata.
pub struct TypeDescriptor {
    pub(crate) id: DescId,
    pub(crate) name: SmolStr,
    pub(crate) super_id: Option<DescId>,
    pub(crate) children: Vec<DescId>,
    /// Caster to `super_id`, `None` for roots.
    pub(crate) caster: Option<Caster>,
    /// Root of the weak hierarchy this type belongs to.
    pub(crate) weak_root: Option<DescId>,
    pub(crate) weak_proc: Option<WeakObjProc>,
    pub(crate) dynamic_type: DynamicTypeFn,
    pub(crate) members: AHashMap<SmolStr, Member>,
    /// 0 when no light userdata slot was assigned.
    pub(crate) light_slot: u8,
    pub(crate) finalized: bool,
}

impl TypeDescriptor {
    pub fn id(&self) -> DescId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn super_id(&self) -> Option<DescId> {
        self.super_id
    }

    pub fn children(&self) -> &[DescId] {
        &self.children
    }

    pub fn is_weak(&self) -> bool {
        self.weak_root.is_some()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn light_slot(&self) -> Option<u8> {
        (self.light_slot != 0).then_some(self.light_slot)
    }

    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(|k| k.as_str())
    }
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("super_id", &self.super_id)
            .field("weak_root", &self.weak_root)
            .field("light_slot", &self.light_slot)
            .finish()
    }
}
