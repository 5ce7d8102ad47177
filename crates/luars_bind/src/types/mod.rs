// Type registry: descriptors, inheritance casting and weak object slots
//
// Population happens once through `RegistryBuilder`; `build()` freezes the
// descriptors, assigns light userdata slots and yields an `Rc<Registry>`
// shared by every `State` created from it.

mod light_ud;
mod member;
mod type_desc;
mod weak_ref;

pub use light_ud::{LIGHT_UD_ENABLED, is_tagged};
pub(crate) use light_ud::LightSlot;
pub use member::{Member, VarGetter, VarSetter};
pub use type_desc::{Caster, Declared, DescId, Inherit, Inherits, TypeDescriptor};
pub use weak_ref::{WeakAnchor, WeakObjProc, WeakObject, WeakRef, WeakTable};

use std::any::TypeId;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::rc::Rc;

use ahash::AHashMap;
use smol_str::SmolStr;

use crate::lua_convert::{IntoLua, Storable};
use crate::lua_value::{NativeCallable, NativeFn};
use crate::lua_vm::lua_limits::MAX_LIGHT_SLOTS;
use crate::lua_vm::{LuaError, LuaResult, RegisterError};
use crate::state::State;
use type_desc::dynamic_type_of;

/// Frozen set of exported types plus the weak object table.
///
/// Single threaded: shared through `Rc`, the weak table is a single writer
/// `RefCell`.
pub struct Registry {
    types: Vec<TypeDescriptor>,
    by_rust: AHashMap<TypeId, DescId>,
    by_name: AHashMap<SmolStr, DescId>,
    pub(crate) light_slots: Vec<LightSlot>,
    pub(crate) weak_table: RefCell<WeakTable>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    #[inline]
    pub fn get(&self, id: DescId) -> Option<&TypeDescriptor> {
        self.types.get(id.index())
    }

    pub fn types(&self) -> &[TypeDescriptor] {
        &self.types
    }

    pub fn desc_of<T: Declared>(&self) -> Option<DescId> {
        self.by_rust.get(&TypeId::of::<T>()).copied()
    }

    pub fn find(&self, name: &str) -> Option<DescId> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, id: DescId) -> &str {
        self.get(id).map_or("?", |d| d.name())
    }

    /// `base` is `derived` or one of its ancestors.
    pub fn is_base_of(&self, base: DescId, derived: DescId) -> bool {
        let mut cur = Some(derived);
        while let Some(id) = cur {
            if id == base {
                return true;
            }
            cur = self.get(id).and_then(|d| d.super_id);
        }
        false
    }

    /// Convert a pointer to a `from` object into a pointer to its `to` base.
    ///
    /// # Safety
    /// `ptr` must point to a live object of type `from`.
    pub unsafe fn to_super(&self, ptr: NonNull<u8>, from: DescId, to: DescId) -> Option<NonNull<u8>> {
        let mut ptr = ptr;
        let mut cur = from;
        while cur != to {
            let desc = self.get(cur)?;
            let (super_id, caster) = (desc.super_id?, desc.caster?);
            ptr = unsafe { (caster.to_super)(ptr) };
            cur = super_id;
        }
        Some(ptr)
    }

    /// Convert a pointer to a `from` object into a pointer to the derived
    /// `dest` view of the same object.
    ///
    /// Fails when `dest` does not derive from `from`, or when the object
    /// reports a dynamic type that is not `dest` or below it. Types without
    /// a dynamic type hook are trusted.
    ///
    /// # Safety
    /// `ptr` must point to a live object of type `from`.
    pub unsafe fn to_derived(&self, ptr: NonNull<u8>, from: DescId, dest: DescId) -> Option<NonNull<u8>> {
        if !self.is_base_of(from, dest) {
            return None;
        }
        let from_desc = self.get(from)?;
        if let Some(actual) = unsafe { (from_desc.dynamic_type)(ptr) } {
            let actual = self.by_rust.get(&actual).copied()?;
            if !self.is_base_of(dest, actual) {
                return None;
            }
        }
        let mut chain = Vec::new();
        let mut cur = dest;
        while cur != from {
            chain.push(cur);
            cur = self.get(cur)?.super_id?;
        }
        let mut ptr = ptr;
        for id in chain.into_iter().rev() {
            let caster = self.get(id)?.caster?;
            ptr = unsafe { (caster.to_derived)(ptr) };
        }
        Some(ptr)
    }

    /// Top-most base pointer and type; the identity key of an object.
    ///
    /// # Safety
    /// `ptr` must point to a live object of type `desc`.
    pub unsafe fn root_ptr(&self, ptr: NonNull<u8>, desc: DescId) -> (NonNull<u8>, DescId) {
        let mut ptr = ptr;
        let mut cur = desc;
        while let Some(d) = self.get(cur) {
            let (Some(super_id), Some(caster)) = (d.super_id, d.caster) else {
                break;
            };
            ptr = unsafe { (caster.to_super)(ptr) };
            cur = super_id;
        }
        (ptr, cur)
    }

    /// Fetch or allocate the weak slot of an object, upgrading the stored
    /// view when `desc` is more derived than the recorded one.
    pub(crate) fn weak_acquire(&self, existing: Option<u32>, ptr: NonNull<u8>, desc: DescId) -> Option<WeakRef> {
        let Ok(mut table) = self.weak_table.try_borrow_mut() else {
            log::error!("weak table busy while pushing '{}'", self.name_of(desc));
            return None;
        };
        if let Some(index) = existing {
            if let Some(r) = table.current(index) {
                if let Some(cur) = table.desc(index) {
                    if cur != desc && self.is_base_of(cur, desc) {
                        table.upgrade(index, ptr, desc);
                    }
                }
                return Some(r);
            }
        }
        Some(table.alloc(ptr, desc))
    }

    /// Handle of a weak object, allocating its slot on first use.
    ///
    /// # Safety
    /// `ptr` must point to a live object of type `desc`.
    pub(crate) unsafe fn weak_ref_of(self: &Rc<Self>, ptr: NonNull<u8>, desc: DescId) -> Option<WeakRef> {
        let d = self.get(desc)?;
        let proc_ = d.weak_proc?;
        let (root, _) = unsafe { self.root_ptr(ptr, desc) };
        unsafe { (proc_.make_ref)(self, root, ptr, desc) }
    }

    /// Live pointer of a weak handle, viewed as `desc`.
    pub fn weak_resolve(&self, r: WeakRef, desc: DescId) -> Option<NonNull<u8>> {
        let (ptr, actual) = self.weak_table.borrow().resolve(r)?;
        unsafe { self.to_super(ptr, actual, desc) }
    }

    pub fn weak_live_count(&self) -> usize {
        self.weak_table.borrow().live_count()
    }
}

/// Collects type descriptors before any script runs.
pub struct RegistryBuilder {
    types: Vec<TypeDescriptor>,
    by_rust: AHashMap<TypeId, DescId>,
    by_name: AHashMap<SmolStr, DescId>,
    conflicts: Vec<RegisterError>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        RegistryBuilder {
            types: Vec::new(),
            by_rust: AHashMap::new(),
            by_name: AHashMap::new(),
            conflicts: Vec::new(),
        }
    }

    /// Descriptor of `T`, created on first use together with its bases.
    pub fn get_or_create<T: Declared>(&mut self) -> DescId {
        if let Some(id) = self.by_rust.get(&TypeId::of::<T>()) {
            return *id;
        }

        let inherit = T::inherit();
        let super_id = inherit.map(|i| {
            debug_assert!(i.base != TypeId::of::<T>(), "'{}' inherits itself", T::NAME);
            (i.register_base)(self)
        });
        let (weak_root, inherited_proc) = match super_id.and_then(|id| self.types.get(id.index())) {
            Some(base) => (base.weak_root, base.weak_proc),
            None => (None, None),
        };

        let id = DescId(self.types.len() as u32);
        let weak_proc = inherited_proc.or_else(T::weak_proc);
        let weak_root = match (weak_root, weak_proc) {
            (Some(root), _) => Some(root),
            (None, Some(_)) => Some(id),
            (None, None) => None,
        };

        let name = SmolStr::new_static(T::NAME);
        if self.by_name.contains_key(&name) {
            self.conflict(RegisterError::DuplicateName {
                type_name: name.clone(),
            });
        } else {
            self.by_name.insert(name.clone(), id);
        }

        self.types.push(TypeDescriptor {
            id,
            name,
            super_id,
            children: Vec::new(),
            caster: inherit.map(|i| i.caster),
            weak_root,
            weak_proc,
            dynamic_type: dynamic_type_of::<T>,
            members: AHashMap::new(),
            light_slot: 0,
            finalized: false,
        });
        if let Some(super_id) = super_id {
            if let Some(base) = self.types.get_mut(super_id.index()) {
                base.children.push(id);
            }
        }
        self.by_rust.insert(TypeId::of::<T>(), id);
        id
    }

    /// Start exporting the members of `T`.
    ///
    /// A type that was already finalized is reported and its members are
    /// left untouched.
    pub fn alloc_type<T: Declared>(&mut self) -> TypeBuilder<'_, T> {
        let id = self.get_or_create::<T>();
        let rejected = self.types.get(id.index()).is_some_and(|d| d.finalized);
        if rejected {
            self.conflict(RegisterError::ReExport {
                type_name: SmolStr::new_static(T::NAME),
            });
        }
        TypeBuilder {
            builder: self,
            id,
            rejected,
            _marker: PhantomData,
        }
    }

    pub fn conflicts(&self) -> &[RegisterError] {
        &self.conflicts
    }

    fn conflict(&mut self, err: RegisterError) {
        log::warn!("{}", err);
        self.conflicts.push(err);
    }

    fn add_member(&mut self, id: DescId, name: &str, member: Member) {
        let Some(desc) = self.types.get_mut(id.index()) else {
            return;
        };
        if desc.members.contains_key(name) {
            let err = RegisterError::DuplicateMember {
                type_name: desc.name.clone(),
                member: SmolStr::new(name),
            };
            self.conflict(err);
            return;
        }
        desc.members.insert(SmolStr::new(name), member);
    }

    /// Freeze the registry and assign light userdata slots.
    pub fn build(mut self) -> Rc<Registry> {
        let mut light_slots = Vec::new();
        let mut group_slots: AHashMap<DescId, u8> = AHashMap::new();
        for i in 0..self.types.len() {
            let (id, weak_root) = (self.types[i].id, self.types[i].weak_root);
            let slot = match weak_root {
                Some(root) => {
                    let shared = group_slots.get(&root).copied();
                    shared.or_else(|| {
                        let slot = Self::next_slot(&mut light_slots, LightSlot::WeakGroup(root))?;
                        group_slots.insert(root, slot);
                        Some(slot)
                    })
                }
                None => Self::next_slot(&mut light_slots, LightSlot::Declared(id)),
            };
            match slot {
                Some(slot) => self.types[i].light_slot = slot,
                None if LIGHT_UD_ENABLED => {
                    let err = RegisterError::SlotsExhausted {
                        type_name: self.types[i].name.clone(),
                    };
                    self.conflict(err);
                }
                None => {}
            }
            self.types[i].finalized = true;
        }

        Rc::new(Registry {
            types: self.types,
            by_rust: self.by_rust,
            by_name: self.by_name,
            light_slots,
            weak_table: RefCell::new(WeakTable::new()),
        })
    }

    fn next_slot(slots: &mut Vec<LightSlot>, slot: LightSlot) -> Option<u8> {
        if !LIGHT_UD_ENABLED || slots.len() >= MAX_LIGHT_SLOTS {
            return None;
        }
        slots.push(slot);
        Some(slots.len() as u8)
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Member export for one type, see [`RegistryBuilder::alloc_type`].
pub struct TypeBuilder<'a, T: Declared> {
    builder: &'a mut RegistryBuilder,
    id: DescId,
    rejected: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Declared> TypeBuilder<'_, T> {
    pub fn id(&self) -> DescId {
        self.id
    }

    fn add(mut self, name: &str, member: Member) -> Self {
        if !self.rejected {
            self.builder.add_member(self.id, name, member);
        }
        self
    }

    /// Read/write field.
    pub fn add_var<V>(self, name: &str, get: fn(&T) -> V, set: fn(&mut T, V)) -> Self
    where
        V: Storable,
    {
        let setter: VarSetter = Rc::new(move |state: &mut State, mut ptr: NonNull<u8>, idx: i32| {
            let value = state.value_at(idx);
            let value = V::from_lua(value, state).map_err(LuaError::Runtime)?;
            set(unsafe { ptr.cast::<T>().as_mut() }, value);
            Ok(())
        });
        self.add(
            name,
            Member::Var {
                getter: Some(Self::getter(get)),
                setter: Some(setter),
            },
        )
    }

    /// Read only field.
    pub fn add_getter<V>(self, name: &str, get: fn(&T) -> V) -> Self
    where
        V: Storable,
    {
        self.add(
            name,
            Member::Var {
                getter: Some(Self::getter(get)),
                setter: None,
            },
        )
    }

    fn getter<V: Storable>(get: fn(&T) -> V) -> VarGetter {
        Rc::new(move |state: &mut State, ptr: NonNull<u8>| {
            get(unsafe { ptr.cast::<T>().as_ref() }).into_lua(state)?;
            Ok(())
        })
    }

    /// Raw native function; the object is argument 1.
    pub fn add_func(self, name: &str, f: NativeFn) -> Self {
        self.add(name, Member::func(f))
    }

    /// Method receiving the loaded object; arguments start at 2.
    pub fn add_method<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&mut T, &mut State) -> LuaResult<usize> + 'static,
    {
        let method = move |state: &mut State| -> LuaResult<usize> {
            let ptr = state.arg_ptr::<T>(1)?;
            f(unsafe { &mut *ptr.as_ptr() }, state)
        };
        self.add(name, Member::Func(NativeCallable::Closure(Rc::new(method))))
    }

    pub fn finalize(self) -> DescId {
        if !self.rejected {
            if let Some(desc) = self.builder.types.get_mut(self.id.index()) {
                desc.finalized = true;
            }
        }
        self.id
    }
}
