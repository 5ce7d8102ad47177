//! Full userdata record and its identity cache.

mod ud_cache;

pub(crate) use ud_cache::{CacheEntry, IdentityCache, remove_owned};

use std::any::TypeId;
use std::ptr::NonNull;

use crate::collection::CollectionVTable;
use crate::lua_vm::lua_limits::UD_TAG;
use crate::types::{DescId, WeakRef};

/// What the userdata exposes.
#[derive(Clone, Copy)]
pub enum UdKind {
    Declared(DescId),
    Collection(&'static CollectionVTable),
}

/// How the userdata relates to the native object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UdMinor {
    /// Borrowed native object, identity cached.
    Ptr,
    /// Shared ownership; the holder lives in the payload.
    SmartPtr,
    /// Owned by the script; the object lives in the payload.
    Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UdTarget {
    Ptr(NonNull<u8>),
    Weak(WeakRef),
    /// Superseded by another userdata for the same native identity, or
    /// already finalized. Never read as a live object.
    Discarded,
}

/// Type erased value owned by a userdata, destroyed explicitly by the GC
/// finalizer (or on drop if the finalizer never ran).
pub struct Payload {
    ptr: NonNull<u8>,
    type_id: TypeId,
    destroy: unsafe fn(NonNull<u8>),
}

unsafe fn destroy_boxed<T>(ptr: NonNull<u8>) {
    drop(unsafe { Box::from_raw(ptr.cast::<T>().as_ptr()) });
}

impl Payload {
    pub fn new<T: 'static>(value: T) -> Self {
        let ptr = NonNull::from(Box::leak(Box::new(value))).cast::<u8>();
        Payload {
            ptr,
            type_id: TypeId::of::<T>(),
            destroy: destroy_boxed::<T>,
        }
    }

    /// Address of the stored value; stable for the payload's lifetime.
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Instantiation tag of the stored value.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        (self.type_id == TypeId::of::<T>()).then(|| unsafe { self.ptr.cast::<T>().as_ref() })
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        unsafe { (self.destroy)(self.ptr) }
    }
}

/// Record stored in every full userdata created by this layer.
pub struct FullUd {
    tag: [u8; 2],
    /// Identity cache key recorded at push time; never recomputed from a
    /// pointer that may dangle by the time the userdata is collected.
    pub(crate) key: usize,
    pub(crate) kind: UdKind,
    pub(crate) minor: UdMinor,
    pub(crate) target: UdTarget,
    pub(crate) payload: Option<Payload>,
}

impl FullUd {
    pub(crate) fn new(key: usize, kind: UdKind, minor: UdMinor, target: UdTarget, payload: Option<Payload>) -> Self {
        FullUd {
            tag: UD_TAG,
            key,
            kind,
            minor,
            target,
            payload,
        }
    }

    /// Tag signature intact.
    #[inline]
    pub fn is_tagged(&self) -> bool {
        self.tag == UD_TAG
    }

    pub fn kind(&self) -> UdKind {
        self.kind
    }

    pub fn minor(&self) -> UdMinor {
        self.minor
    }

    pub fn target(&self) -> UdTarget {
        self.target
    }

    pub fn desc(&self) -> Option<DescId> {
        match self.kind {
            UdKind::Declared(desc) => Some(desc),
            UdKind::Collection(_) => None,
        }
    }

    pub fn collection(&self) -> Option<&'static CollectionVTable> {
        match self.kind {
            UdKind::Collection(vtable) => Some(vtable),
            UdKind::Declared(_) => None,
        }
    }

    pub fn raw_ptr(&self) -> Option<NonNull<u8>> {
        match self.target {
            UdTarget::Ptr(ptr) => Some(ptr),
            _ => None,
        }
    }

    pub fn weak_ref(&self) -> Option<WeakRef> {
        match self.target {
            UdTarget::Weak(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_discarded(&self) -> bool {
        self.target == UdTarget::Discarded
    }

    pub(crate) fn discard(&mut self) {
        self.target = UdTarget::Discarded;
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }
}
