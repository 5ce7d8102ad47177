// State: the binding façade over one host VM
//
// Owns the identity caches and registry slots of one VM and implements
// push/load dispatch, casting and protected calls on top of the stack API.

mod call;
mod load;
mod meta_funcs;
mod push;

use std::cell::RefCell;
use std::rc::Rc;

use smol_str::SmolStr;

use crate::gc::TableId;
use crate::lua_value::{LuaTable, LuaValue, NativeCallable, NativeFn};
use crate::lua_vm::{BindOption, LuaError, LuaResult, LuaVm, ObjRef, ObjRefArray};
use crate::types::{DescId, LIGHT_UD_ENABLED, Member, Registry};
use crate::userdata::IdentityCache;

/// Tables this layer keeps in the VM registry.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RegistrySlots {
    /// Type metatables indexed by descriptor id + 1.
    pub meta_list: TableId,
    /// Weak valued identity cache.
    pub cache: TableId,
    /// Strong native held references.
    pub objs: TableId,
    pub collection_meta: TableId,
    pub aux_meta: TableId,
}

pub struct State {
    pub(crate) vm: LuaVm,
    pub(crate) registry: Rc<Registry>,
    pub(crate) option: BindOption,
    pub(crate) slots: RegistrySlots,
    pub(crate) cache: IdentityCache,
    pub(crate) obj_refs: Rc<RefCell<ObjRefArray>>,
}

impl State {
    /// Create a VM bound to a frozen registry and install every type
    /// metatable, the light userdata metatable and the script library.
    pub fn new(registry: Rc<Registry>, option: BindOption) -> LuaResult<Self> {
        let mut vm = LuaVm::new();
        let reg = vm.registry;

        let meta_list = new_table(&mut vm);
        vm.raw_set_str(reg, "bind.meta_list", LuaValue::Table(meta_list))?;

        let cache = new_table(&mut vm);
        let weak_mode = new_table(&mut vm);
        let mode = vm.create_string("v");
        vm.raw_set_str(weak_mode, "__mode", mode)?;
        vm.set_metatable(LuaValue::Table(cache), Some(weak_mode))?;
        vm.raw_set_str(reg, "bind.cache", LuaValue::Table(cache))?;

        let objs = new_table(&mut vm);
        vm.raw_set_str(reg, "bind.objs", LuaValue::Table(objs))?;

        let collection_meta = new_table(&mut vm);
        vm.raw_set_str(reg, "bind.collection_meta", LuaValue::Table(collection_meta))?;
        let aux_meta = new_table(&mut vm);
        vm.raw_set_str(reg, "bind.aux_meta", LuaValue::Table(aux_meta))?;

        let cache_increment = option.cache_increment;
        let mut state = State {
            vm,
            registry,
            option,
            slots: RegistrySlots {
                meta_list,
                cache,
                objs,
                collection_meta,
                aux_meta,
            },
            cache: IdentityCache::new(cache_increment),
            obj_refs: Rc::new(RefCell::new(ObjRefArray::default())),
        };

        state.init_type_metas()?;
        state.init_collection_meta()?;
        if state.light_enabled() {
            state.init_light_meta()?;
        }
        state.init_lib()?;
        Ok(state)
    }

    fn init_type_metas(&mut self) -> LuaResult<()> {
        let registry = self.registry.clone();
        for desc in registry.types() {
            let mt = new_table(&mut self.vm);
            let name = self.vm.create_string(desc.name());
            self.vm.raw_set_str(mt, "__name", name)?;
            self.set_fn(mt, "__index", meta_funcs::meta_index)?;
            self.set_fn(mt, "__newindex", meta_funcs::meta_newindex)?;
            self.set_fn(mt, "__gc", meta_funcs::meta_gc)?;
            self.set_fn(mt, "__tostring", meta_funcs::meta_tostring)?;

            // bases first, so a derived member overrides an inherited one
            let mut chain = vec![desc.id()];
            let mut cur = desc.super_id();
            while let Some(id) = cur {
                chain.push(id);
                cur = registry.get(id).and_then(|d| d.super_id());
            }
            for id in chain.into_iter().rev() {
                let Some(d) = registry.get(id) else {
                    continue;
                };
                for (member_name, member) in d.members.iter() {
                    if let Member::Func(callable) = member {
                        let func = self.vm.create_function(callable.clone(), member_name);
                        self.vm.raw_set_str(mt, member_name, func)?;
                    }
                }
            }
            self.vm
                .raw_seti(self.slots.meta_list, desc.id().index() as i64 + 1, LuaValue::Table(mt));
        }
        Ok(())
    }

    fn init_collection_meta(&mut self) -> LuaResult<()> {
        let mt = self.slots.collection_meta;
        let name = self.vm.create_string("collection");
        self.vm.raw_set_str(mt, "__name", name)?;
        self.set_fn(mt, "__index", meta_funcs::collection_index)?;
        self.set_fn(mt, "__newindex", meta_funcs::collection_newindex)?;
        self.set_fn(mt, "__len", meta_funcs::collection_len)?;
        self.set_fn(mt, "__pairs", meta_funcs::collection_pairs)?;
        self.set_fn(mt, "__gc", meta_funcs::meta_gc)?;
        self.set_fn(mt, "__tostring", meta_funcs::meta_tostring)?;

        let aux = self.slots.aux_meta;
        let name = self.vm.create_string("aux");
        self.vm.raw_set_str(aux, "__name", name)?;
        Ok(())
    }

    fn init_light_meta(&mut self) -> LuaResult<()> {
        let mt = new_table(&mut self.vm);
        let name = self.vm.create_string("lightuserdata");
        self.vm.raw_set_str(mt, "__name", name)?;
        self.set_fn(mt, "__index", meta_funcs::meta_index)?;
        self.set_fn(mt, "__newindex", meta_funcs::meta_newindex)?;
        self.set_fn(mt, "__tostring", meta_funcs::meta_tostring)?;
        self.vm.raw_set_str(self.vm.registry, "bind.light_meta", LuaValue::Table(mt))?;
        self.vm.set_metatable(LuaValue::LightUserdata(0), Some(mt))
    }

    fn init_lib(&mut self) -> LuaResult<()> {
        let lib = new_table(&mut self.vm);
        self.set_fn(lib, "Type", meta_funcs::lib_type)?;
        self.set_fn(lib, "IsValid", meta_funcs::lib_is_valid)?;
        self.set_fn(lib, "Cast", meta_funcs::lib_cast)?;
        self.set_fn(lib, "Insert", meta_funcs::lib_insert)?;
        self.set_fn(lib, "Remove", meta_funcs::lib_remove)?;
        self.set_fn(lib, "Clear", meta_funcs::lib_clear)?;
        self.set_fn(lib, "GetTypeMeta", meta_funcs::lib_get_type_meta)?;
        let name = self.option.lib_name.clone();
        self.push_value(LuaValue::Table(lib));
        self.set_global(&name)
    }

    fn set_fn(&mut self, table: TableId, name: &str, f: NativeFn) -> LuaResult<()> {
        let func = self.vm.create_function(NativeCallable::Fn(f), name);
        self.vm.raw_set_str(table, name, func)
    }

    // ===== Accessors =====

    pub fn registry(&self) -> &Rc<Registry> {
        &self.registry
    }

    pub fn option(&self) -> &BindOption {
        &self.option
    }

    pub fn vm(&self) -> &LuaVm {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut LuaVm {
        &mut self.vm
    }

    /// Declared pointers are packed into light userdata.
    #[inline]
    pub fn light_enabled(&self) -> bool {
        LIGHT_UD_ENABLED && self.option.light_userdata
    }

    pub(crate) fn type_meta(&self, desc: DescId) -> Option<TableId> {
        self.vm
            .raw_geti(self.slots.meta_list, desc.index() as i64 + 1)
            .as_table_id()
    }

    // ===== Stack =====

    #[inline]
    pub fn get_top(&self) -> usize {
        self.vm.get_top()
    }

    #[inline]
    pub fn set_top(&mut self, top: usize) {
        self.vm.set_top(top);
    }

    #[inline]
    pub fn value_at(&self, idx: i32) -> LuaValue {
        self.vm.value_at(idx)
    }

    pub fn pop(&mut self, n: usize) {
        self.vm.pop(n);
    }

    pub fn pop_value(&mut self) -> LuaValue {
        self.vm.pop_value()
    }

    pub fn to_str(&self, idx: i32) -> Option<&str> {
        self.vm.get_str(self.value_at(idx)).map(|s| s.as_str())
    }

    pub fn to_integer(&self, idx: i32) -> Option<i64> {
        self.value_at(idx).as_integer()
    }

    pub fn to_boolean(&self, idx: i32) -> bool {
        self.value_at(idx).is_truthy()
    }

    pub fn create_table(&mut self) -> LuaValue {
        self.vm.create_table()
    }

    /// Identity comparison of two stack slots.
    pub fn raw_equal(&self, a: i32, b: i32) -> bool {
        self.value_at(a).raw_equal(&self.value_at(b))
    }

    // ===== Globals =====

    /// Push the value at a dotted global path, nil when any step is
    /// missing.
    pub fn load_global(&mut self, path: &str) -> LuaResult<()> {
        let mut value = LuaValue::Table(self.vm.globals);
        for part in path.split('.') {
            if value.is_nil() {
                break;
            }
            let key = self.vm.create_string(part);
            value = self.index_value(value, key)?;
        }
        self.push_value(value);
        Ok(())
    }

    /// Pop the top value into a dotted global path; intermediate tables must
    /// exist.
    pub fn set_global(&mut self, path: &str) -> LuaResult<()> {
        let value = self.pop_value();
        let (parent, name) = match path.rsplit_once('.') {
            Some((parent, name)) => {
                self.load_global(parent)?;
                (self.pop_value(), name)
            }
            None => (LuaValue::Table(self.vm.globals), path),
        };
        if parent.is_nil() {
            return Err(LuaError::runtime(format!("global path '{}' does not exist", path)));
        }
        let key = self.vm.create_string(name);
        self.new_index_value(parent, key, value)
    }

    /// Create the tables of a dotted global path and push the last one.
    pub fn make_global(&mut self, path: &str) -> LuaResult<()> {
        let mut table = self.vm.globals;
        for part in path.split('.') {
            table = match self.vm.raw_get_str(table, part) {
                LuaValue::Table(id) => id,
                LuaValue::Nil => {
                    let id = new_table(&mut self.vm);
                    self.vm.raw_set_str(table, part, LuaValue::Table(id))?;
                    id
                }
                other => {
                    return Err(LuaError::runtime(format!(
                        "global '{}' is a {} value",
                        part,
                        other.type_name()
                    )));
                }
            };
        }
        self.push_value(LuaValue::Table(table));
        Ok(())
    }

    // ===== Native held references =====

    /// Pin the value at `idx` until every returned handle is dropped.
    pub fn ref_value(&mut self, idx: i32) -> Option<ObjRef> {
        self.flush_refs();
        let value = self.value_at(idx);
        if value.is_nil() {
            return None;
        }
        let ref_id = self.vm.reference(self.slots.objs, value);
        Some(ObjRefArray::alloc(&self.obj_refs, ref_id))
    }

    /// Push a pinned value, nil if the handle was released elsewhere.
    pub fn push_ref(&mut self, obj: &ObjRef) {
        let value = obj
            .ref_id()
            .map_or(LuaValue::Nil, |id| self.vm.raw_geti(self.slots.objs, id));
        self.push_value(value);
    }

    /// Unref slots whose last handle has been dropped.
    pub(crate) fn flush_refs(&mut self) {
        let released = match self.obj_refs.try_borrow_mut() {
            Ok(mut refs) => refs.take_released(),
            Err(_) => return,
        };
        for ref_id in released {
            self.vm.unreference(self.slots.objs, ref_id);
        }
    }

    pub fn obj_ref_count(&self) -> usize {
        self.obj_refs.borrow().live_count()
    }

    /// Number of identity cache entries of every kind.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn type_name(&self, desc: DescId) -> SmolStr {
        SmolStr::new(self.registry.name_of(desc))
    }
}

fn new_table(vm: &mut LuaVm) -> TableId {
    vm.pool.create_table(LuaTable::new())
}
