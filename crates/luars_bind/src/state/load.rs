// Load side: stack values back to native pointers, type queries and casts

use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::Arc;

use smol_str::SmolStr;

use super::State;
use crate::collection::{Collection, CollectionVTable};
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaError, LuaResult};
use crate::types::{Declared, DescId, LightSlot};
use crate::userdata::{UdKind, UdMinor, UdTarget};

/// A stack value seen as a declared object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Resolved {
    /// Live object; the pointer refers to `DescId`.
    Live(NonNull<u8>, DescId),
    /// Weak object already destroyed, or a discarded userdata.
    Stale(DescId),
    /// Not produced by this layer for a declared type.
    Foreign,
}

impl State {
    pub(crate) fn resolve_declared(&self, value: LuaValue) -> Resolved {
        match value {
            LuaValue::LightUserdata(word) if self.light_enabled() => {
                if let Some((ptr, desc)) = self.registry.light_resolve(word) {
                    return Resolved::Live(ptr, desc);
                }
                match self.registry.light_slot(word) {
                    Some(LightSlot::WeakGroup(root)) => {
                        Resolved::Stale(self.registry.light_packed_desc(word).unwrap_or(root))
                    }
                    _ => Resolved::Foreign,
                }
            }
            LuaValue::Userdata(id) => {
                let Some(ud) = self.full_ud(id) else {
                    return Resolved::Foreign;
                };
                let UdKind::Declared(desc) = ud.kind else {
                    return Resolved::Foreign;
                };
                match ud.target {
                    UdTarget::Ptr(ptr) => Resolved::Live(ptr, desc),
                    UdTarget::Weak(r) => match self.registry.weak_resolve(r, desc) {
                        Some(ptr) => Resolved::Live(ptr, desc),
                        None => Resolved::Stale(desc),
                    },
                    UdTarget::Discarded => Resolved::Stale(desc),
                }
            }
            _ => Resolved::Foreign,
        }
    }

    /// Pointer to a `T` view of the value at `idx`; `None` for nil, stale
    /// objects and unrelated types.
    pub fn load_ptr<T: Declared>(&self, idx: i32) -> Option<NonNull<T>> {
        let desc = self.registry.desc_of::<T>()?;
        match self.resolve_declared(self.value_at(idx)) {
            Resolved::Live(ptr, actual) => {
                let ptr = unsafe { self.registry.to_super(ptr, actual, desc) }?;
                Some(ptr.cast())
            }
            _ => None,
        }
    }

    /// Like `load_ptr`, but nil is accepted and anything else that is not a
    /// `T` is an error.
    pub fn check<T: Declared>(&self, idx: i32) -> LuaResult<Option<NonNull<T>>> {
        if self.value_at(idx).is_nil() {
            return Ok(None);
        }
        match self.load_ptr::<T>(idx) {
            Some(ptr) => Ok(Some(ptr)),
            None => Err(self.mismatch(idx, T::NAME)),
        }
    }

    /// Required object argument.
    pub fn arg_ptr<T: Declared>(&self, idx: i32) -> LuaResult<NonNull<T>> {
        self.load_ptr::<T>(idx).ok_or_else(|| self.mismatch(idx, T::NAME))
    }

    /// Holder of a shared object pushed with `push_shared`.
    pub fn load_shared<T: Declared>(&self, idx: i32) -> LuaResult<Rc<T>> {
        self.holder::<Rc<T>>(idx)
            .ok_or_else(|| self.mismatch(idx, T::NAME))
    }

    /// Holder of a shared object pushed with `push_arc`.
    pub fn load_arc<T: Declared>(&self, idx: i32) -> LuaResult<Arc<T>> {
        self.holder::<Arc<T>>(idx)
            .ok_or_else(|| self.mismatch(idx, T::NAME))
    }

    fn holder<H: Clone + 'static>(&self, idx: i32) -> Option<H> {
        let id = self.value_at(idx).as_userdata_id()?;
        let ud = self.full_ud(id)?;
        if ud.minor != UdMinor::SmartPtr || ud.is_discarded() {
            return None;
        }
        ud.payload()?.downcast_ref::<H>().cloned()
    }

    fn mismatch(&self, idx: i32, expected: &str) -> LuaError {
        LuaError::TypeMismatch {
            arg: idx,
            expected: SmolStr::new(expected),
            actual: self.type_name_at(idx),
        }
    }

    // ===== Collections =====

    pub(crate) fn resolve_collection(&self, value: LuaValue) -> Option<(NonNull<u8>, &'static CollectionVTable)> {
        let id = value.as_userdata_id()?;
        let ud = self.full_ud(id)?;
        let vtable = ud.collection()?;
        Some((ud.raw_ptr()?, vtable))
    }

    pub fn collection_ptr<C: Collection>(&self, idx: i32) -> LuaResult<NonNull<C>> {
        self.collection_ptr_of::<C>(self.value_at(idx))
            .map_err(|_| self.mismatch(idx, (C::VTABLE.name)()))
    }

    pub(crate) fn collection_ptr_of<C: Collection>(&self, value: LuaValue) -> LuaResult<NonNull<C>> {
        match self.resolve_collection(value) {
            Some((ptr, vtable)) if vtable.is::<C>() => Ok(ptr.cast()),
            _ => Err(LuaError::TypeMismatch {
                arg: 1,
                expected: SmolStr::new((C::VTABLE.name)()),
                actual: SmolStr::new(value.type_name()),
            }),
        }
    }

    // ===== Queries =====

    /// Script visible type name; `"nil"` for stale objects.
    pub fn type_name_at(&self, idx: i32) -> SmolStr {
        let value = self.value_at(idx);
        match self.resolve_declared(value) {
            Resolved::Live(_, desc) => self.type_name(desc),
            Resolved::Stale(_) => SmolStr::new_static("nil"),
            Resolved::Foreign => match self.resolve_collection(value) {
                Some((_, vtable)) => SmolStr::new_static((vtable.name)()),
                None => SmolStr::new_static(value.type_name()),
            },
        }
    }

    /// The value is neither nil nor a destroyed object.
    pub fn is_valid(&self, idx: i32) -> bool {
        let value = self.value_at(idx);
        match self.resolve_declared(value) {
            Resolved::Live(..) => true,
            Resolved::Stale(_) => false,
            Resolved::Foreign => match value {
                LuaValue::Nil => false,
                LuaValue::Userdata(id) => self.full_ud(id).is_none_or(|ud| !ud.is_discarded()),
                _ => true,
            },
        }
    }

    // ===== Casting =====

    /// View the value at `idx` as `target` and push the result.
    ///
    /// Up-casts return the value unchanged. Down-casts rewrite a full
    /// userdata in place and repack a light word. Stale objects cast to nil.
    pub fn cast(&mut self, idx: i32, target: DescId) -> LuaResult<()> {
        let value = self.value_at(idx);
        let result = self.cast_value(value, target)?;
        self.push_value(result);
        Ok(())
    }

    pub(crate) fn cast_value(&mut self, value: LuaValue, target: DescId) -> LuaResult<LuaValue> {
        let (ptr, actual) = match self.resolve_declared(value) {
            Resolved::Live(ptr, actual) => (ptr, actual),
            Resolved::Stale(_) => return Ok(LuaValue::Nil),
            Resolved::Foreign if value.is_nil() => return Ok(LuaValue::Nil),
            Resolved::Foreign => {
                return Err(LuaError::InvalidCast {
                    from: SmolStr::new(value.type_name()),
                    to: self.type_name(target),
                });
            }
        };
        let (from, to) = (self.type_name(actual), self.type_name(target));
        let invalid = || LuaError::InvalidCast {
            from: from.clone(),
            to: to.clone(),
        };

        if self.registry.is_base_of(target, actual) {
            return Ok(value);
        }
        // script owned values can not be viewed as something they are not
        if let LuaValue::Userdata(id) = value {
            if self.full_ud(id).is_some_and(|ud| ud.minor == UdMinor::Value) {
                return Err(invalid());
            }
        }
        let Some(derived) = (unsafe { self.registry.to_derived(ptr, actual, target) }) else {
            return Err(invalid());
        };

        let is_weak = self.registry.get(target).is_some_and(|d| d.is_weak());
        match value {
            LuaValue::LightUserdata(_) if is_weak => {
                let r = unsafe { self.registry.weak_ref_of(derived, target) }.ok_or_else(invalid)?;
                let word = self.registry.light_pack_weak(r, target).ok_or_else(invalid)?;
                Ok(LuaValue::LightUserdata(word))
            }
            LuaValue::LightUserdata(_) => {
                let word = self.registry.light_pack_ptr(derived, target).ok_or_else(invalid)?;
                Ok(LuaValue::LightUserdata(word))
            }
            LuaValue::Userdata(id) => {
                let new_target = if is_weak {
                    let r = unsafe { self.registry.weak_ref_of(derived, target) }.ok_or_else(invalid)?;
                    UdTarget::Weak(r)
                } else {
                    UdTarget::Ptr(derived)
                };
                self.upgrade_view(id, target, new_target);
                Ok(value)
            }
            _ => Err(invalid()),
        }
    }
}
