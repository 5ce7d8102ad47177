// Push side: native values and objects onto the stack
//
// Declared pointers resolve to exactly one script object per native identity
// while that object is alive on the script side. The lookup order is: script
// owned values, weak objects, light packing, then the root pointer cache.

use std::any::TypeId;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::Arc;

use super::State;
use crate::collection::Collection;
use crate::gc::{TableId, UserdataId};
use crate::lua_convert::IntoLua;
use crate::lua_value::{LuaUserdata, LuaValue, NativeCallable, NativeFn};
use crate::lua_vm::{LuaError, LuaResult};
use crate::types::{Declared, DescId};
use crate::userdata::{CacheEntry, FullUd, Payload, UdKind, UdMinor, UdTarget};

impl State {
    // ===== Plain values =====

    #[inline]
    pub fn push_value(&mut self, value: LuaValue) {
        self.vm.push(value);
    }

    #[inline]
    pub fn push_nil(&mut self) {
        self.vm.push(LuaValue::Nil);
    }

    pub fn push_string(&mut self, s: &str) {
        let value = self.vm.create_string(s);
        self.vm.push(value);
    }

    /// Push anything convertible, returning the number of values pushed.
    pub fn push<T: IntoLua>(&mut self, value: T) -> LuaResult<usize> {
        value.into_lua(self)
    }

    pub fn push_native_fn(&mut self, f: NativeFn, name: &str) {
        let func = self.vm.create_function(NativeCallable::Fn(f), name);
        self.vm.push(func);
    }

    pub fn push_closure<F>(&mut self, f: F, name: &str)
    where
        F: Fn(&mut State) -> LuaResult<usize> + 'static,
    {
        let func = self
            .vm
            .create_function(NativeCallable::Closure(Rc::new(f)), name);
        self.vm.push(func);
    }

    // ===== Auxiliary objects =====

    /// Plain userdata owning `value`, keeping `user_value` alive with it.
    pub(crate) fn push_aux<T: 'static>(&mut self, value: T, user_value: LuaValue) {
        let mut ud = LuaUserdata::new(value);
        ud.metatable = Some(self.slots.aux_meta);
        ud.user_value = user_value;
        let value = self.vm.create_userdata(ud);
        self.vm.push(value);
    }

    pub(crate) fn aux_user_value(&self, aux: LuaValue) -> LuaValue {
        aux.as_userdata_id()
            .and_then(|id| self.vm.userdata(id))
            .map_or(LuaValue::Nil, |ud| ud.user_value)
    }

    pub(crate) fn aux_mut<T: 'static>(&mut self, aux: LuaValue) -> Option<&mut T> {
        let id = aux.as_userdata_id()?;
        self.vm.userdata_mut(id)?.get_mut::<T>()
    }

    // ===== Declared objects =====

    pub(crate) fn declared_desc<T: Declared>(&self) -> LuaResult<DescId> {
        self.registry
            .desc_of::<T>()
            .ok_or_else(|| LuaError::runtime(format!("type '{}' is not registered", T::NAME)))
    }

    /// Push a borrowed native object. A null pointer pushes nil.
    ///
    /// # Safety
    /// `ptr` must be null or point to a live `T`. A non weak object must
    /// outlive every script reference to it.
    pub unsafe fn push_ptr<T: Declared>(&mut self, ptr: *mut T) -> LuaResult<()> {
        let Some(ptr) = NonNull::new(ptr) else {
            self.push_nil();
            return Ok(());
        };
        let desc = self.declared_desc::<T>()?;
        unsafe { self.push_declared(ptr.cast(), desc) }
    }

    /// # Safety
    /// `ptr` must point to a live object of type `desc`.
    pub(crate) unsafe fn push_declared(&mut self, ptr: NonNull<u8>, desc: DescId) -> LuaResult<()> {
        let (root, _) = unsafe { self.registry.root_ptr(ptr, desc) };
        let key = root.as_ptr() as usize;

        // a pointer into a script owned value maps back to its userdata
        if let Some(entry) = self.cache.values.get(&key).copied() {
            if self.load_cache(entry) {
                return Ok(());
            }
            self.cache.values.remove(&key);
        }

        let is_weak = self.registry.get(desc).is_some_and(|d| d.is_weak());
        if is_weak {
            return unsafe { self.push_weak(ptr, desc) };
        }

        if self.light_enabled() {
            if let Some(word) = self.registry.light_pack_ptr(ptr, desc) {
                self.push_value(LuaValue::LightUserdata(word));
                return Ok(());
            }
        }

        if let Some(entry) = self.cache.ptrs.get(&key).copied() {
            if self.load_cache(entry) {
                match self.reuse_declared(entry.ud, ptr, desc) {
                    Reuse::Kept => return Ok(()),
                    Reuse::Superseded => {
                        self.pop(1);
                        self.vm.unreference(self.slots.cache, entry.ref_id);
                    }
                }
            }
            self.cache.ptrs.remove(&key);
        }

        let ud = FullUd::new(key, UdKind::Declared(desc), UdMinor::Ptr, UdTarget::Ptr(ptr), None);
        let id = self.new_ud(ud, self.type_meta(desc));
        let entry = self.cache_ud(id);
        self.cache.ptrs.insert(key, entry);
        Ok(())
    }

    unsafe fn push_weak(&mut self, ptr: NonNull<u8>, desc: DescId) -> LuaResult<()> {
        let Some(r) = (unsafe { self.registry.weak_ref_of(ptr, desc) }) else {
            return Err(LuaError::runtime(format!(
                "no weak slot for '{}'",
                self.registry.name_of(desc)
            )));
        };

        if self.light_enabled() {
            if let Some(word) = self.registry.light_pack_weak(r, desc) {
                self.push_value(LuaValue::LightUserdata(word));
                return Ok(());
            }
        }

        if let Some(entry) = self.cache.weak_get(r.index) {
            if self.load_cache(entry) {
                let same_serial = self
                    .full_ud(entry.ud)
                    .and_then(|ud| ud.weak_ref())
                    .is_some_and(|cached| cached == r);
                if same_serial {
                    self.upgrade_view(entry.ud, desc, UdTarget::Weak(r));
                    return Ok(());
                }
                // the slot now belongs to another object
                self.pop(1);
                self.vm.unreference(self.slots.cache, entry.ref_id);
            }
            self.cache.weak_remove(r.index, entry.ud);
        }

        let ud = FullUd::new(
            r.index as usize,
            UdKind::Declared(desc),
            UdMinor::Ptr,
            UdTarget::Weak(r),
            None,
        );
        let id = self.new_ud(ud, self.type_meta(desc));
        let entry = self.cache_ud(id);
        self.cache.weak_set(r.index, entry);
        Ok(())
    }

    /// Decide whether a cached userdata can stand for `ptr` viewed as `desc`.
    /// The userdata is on top of the stack.
    fn reuse_declared(&mut self, id: UserdataId, ptr: NonNull<u8>, desc: DescId) -> Reuse {
        let Some(cached) = self.full_ud(id).and_then(|ud| ud.desc()) else {
            return Reuse::Superseded;
        };
        if cached == desc || self.registry.is_base_of(desc, cached) {
            return Reuse::Kept;
        }
        if self.registry.is_base_of(cached, desc) {
            self.upgrade_view(id, desc, UdTarget::Ptr(ptr));
            return Reuse::Kept;
        }
        log::debug!(
            "discard '{}' userdata, same address pushed as '{}'",
            self.registry.name_of(cached),
            self.registry.name_of(desc)
        );
        if let Some(ud) = self.full_ud_mut(id) {
            ud.discard();
        }
        Reuse::Superseded
    }

    /// Rewrite a userdata to a more derived view and swap its metatable.
    pub(crate) fn upgrade_view(&mut self, id: UserdataId, desc: DescId, target: UdTarget) {
        let Some(cached) = self.full_ud(id).and_then(|ud| ud.desc()) else {
            return;
        };
        if cached == desc || !self.registry.is_base_of(cached, desc) {
            return;
        }
        log::debug!(
            "upgrade userdata from '{}' to '{}'",
            self.registry.name_of(cached),
            self.registry.name_of(desc)
        );
        let meta = self.type_meta(desc);
        if let Some(ud) = self.full_ud_mut(id) {
            ud.kind = UdKind::Declared(desc);
            ud.target = target;
        }
        if let Some(ud) = self.vm.userdata_mut(id) {
            ud.metatable = meta;
        }
    }

    /// Move `value` into a new script owned userdata.
    pub fn push_object<T: Declared>(&mut self, value: T) -> LuaResult<()> {
        let desc = self.declared_desc::<T>()?;
        let payload = Payload::new(value);
        let ptr = payload.as_ptr();
        let (root, _) = unsafe { self.registry.root_ptr(ptr, desc) };
        let key = root.as_ptr() as usize;

        let ud = FullUd::new(key, UdKind::Declared(desc), UdMinor::Value, UdTarget::Ptr(ptr), Some(payload));
        let id = self.new_ud(ud, self.type_meta(desc));
        // zero sized values share one dangling address
        if size_of::<T>() != 0 {
            let entry = self.cache_ud(id);
            if let Some(old) = self.cache.values.insert(key, entry) {
                self.vm.unreference(self.slots.cache, old.ref_id);
            }
        }
        Ok(())
    }

    /// Push an object shared with native code through `Rc`.
    pub fn push_shared<T: Declared>(&mut self, value: Rc<T>) -> LuaResult<()> {
        let ptr = NonNull::from(&*value).cast::<u8>();
        self.push_holder::<T, Rc<T>>(value, ptr)
    }

    /// Push an object shared with native code through `Arc`.
    pub fn push_arc<T: Declared>(&mut self, value: Arc<T>) -> LuaResult<()> {
        let ptr = NonNull::from(&*value).cast::<u8>();
        self.push_holder::<T, Arc<T>>(value, ptr)
    }

    fn push_holder<T: Declared, H: 'static>(&mut self, holder: H, ptr: NonNull<u8>) -> LuaResult<()> {
        let desc = self.declared_desc::<T>()?;
        let (root, _) = unsafe { self.registry.root_ptr(ptr, desc) };
        let key = root.as_ptr() as usize;

        if let Some(entry) = self.cache.smart.get(&key).copied() {
            if self.load_cache(entry) {
                let same_holder = self
                    .full_ud(entry.ud)
                    .and_then(|ud| ud.payload())
                    .is_some_and(|p| p.type_id() == TypeId::of::<H>());
                if same_holder {
                    return Ok(());
                }
                self.pop(1);
                self.vm.unreference(self.slots.cache, entry.ref_id);
            }
            self.cache.smart.remove(&key);
        }

        let ud = FullUd::new(
            key,
            UdKind::Declared(desc),
            UdMinor::SmartPtr,
            UdTarget::Ptr(ptr),
            Some(Payload::new(holder)),
        );
        let id = self.new_ud(ud, self.type_meta(desc));
        let entry = self.cache_ud(id);
        self.cache.smart.insert(key, entry);
        Ok(())
    }

    // ===== Collections =====

    /// Move a container into a new script owned userdata.
    pub fn push_collection<C: Collection>(&mut self, value: C) {
        let payload = Payload::new(value);
        let ptr = payload.as_ptr();
        let addr = ptr.as_ptr() as usize;
        let ud = FullUd::new(
            addr,
            UdKind::Collection(C::VTABLE),
            UdMinor::Value,
            UdTarget::Ptr(ptr),
            Some(payload),
        );
        let id = self.new_ud(ud, Some(self.slots.collection_meta));
        // zero sized containers share one dangling address
        if size_of::<C>() != 0 {
            let entry = self.cache_ud(id);
            if let Some(old) = self.cache.collections.insert((addr, TypeId::of::<C>()), entry) {
                self.vm.unreference(self.slots.cache, old.ref_id);
            }
        }
    }

    /// Expose a native container by reference. A null pointer pushes nil;
    /// a pointer to the payload of a script owned container pushes that
    /// container's userdata.
    ///
    /// # Safety
    /// `ptr` must be null or point to a live `C` that outlives every script
    /// reference to it.
    pub unsafe fn push_collection_ptr<C: Collection>(&mut self, ptr: *mut C) {
        let Some(ptr) = NonNull::new(ptr) else {
            self.push_nil();
            return;
        };
        let addr = ptr.as_ptr() as usize;
        let key = (addr, TypeId::of::<C>());
        if let Some(entry) = self.cache.collections.get(&key).copied() {
            if self.load_cache(entry) {
                return;
            }
            self.cache.collections.remove(&key);
        }
        let ud = FullUd::new(
            addr,
            UdKind::Collection(C::VTABLE),
            UdMinor::Ptr,
            UdTarget::Ptr(ptr.cast()),
            None,
        );
        let id = self.new_ud(ud, Some(self.slots.collection_meta));
        let entry = self.cache_ud(id);
        self.cache.collections.insert(key, entry);
    }

    // ===== Cache plumbing =====

    fn new_ud(&mut self, ud: FullUd, meta: Option<TableId>) -> UserdataId {
        let mut cell = LuaUserdata::new(ud);
        cell.metatable = meta;
        let id = self.vm.pool.create_userdata(cell);
        self.vm.push(LuaValue::Userdata(id));
        id
    }

    /// Record the userdata in the weak valued cache table.
    fn cache_ud(&mut self, id: UserdataId) -> CacheEntry {
        let ref_id = self.vm.reference(self.slots.cache, LuaValue::Userdata(id));
        CacheEntry { ref_id, ud: id }
    }

    /// Push the cached userdata if the cache table still holds it. A slot
    /// cleared by the collector is released; a slot already reused by
    /// another entry is left alone.
    fn load_cache(&mut self, entry: CacheEntry) -> bool {
        let value = self.vm.raw_geti(self.slots.cache, entry.ref_id);
        if value == LuaValue::Userdata(entry.ud) {
            self.push_value(value);
            return true;
        }
        if value.is_nil() {
            self.vm.unreference(self.slots.cache, entry.ref_id);
        }
        false
    }

    pub(crate) fn full_ud(&self, id: UserdataId) -> Option<&FullUd> {
        let ud = self.vm.userdata(id)?.get::<FullUd>()?;
        if ud.is_tagged() {
            Some(ud)
        } else {
            log::error!("userdata {:?} carries a foreign tag", id);
            None
        }
    }

    pub(crate) fn full_ud_mut(&mut self, id: UserdataId) -> Option<&mut FullUd> {
        self.vm
            .userdata_mut(id)?
            .get_mut::<FullUd>()
            .filter(|ud| ud.is_tagged())
    }
}

enum Reuse {
    Kept,
    Superseded,
}
