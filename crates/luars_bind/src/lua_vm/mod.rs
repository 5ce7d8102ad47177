// Host VM: value stack, call frames, registry and heap
//
// Only the stack based API surface the binding layer consumes is provided.
// Script execution happens through native functions driven by `State`.

mod bind_option;
mod lua_error;
pub mod lua_limits;
mod lua_ref;
mod stack_guard;

pub use bind_option::BindOption;
pub use lua_error::{LuaError, LuaResult, RegisterError};
pub use lua_ref::ObjRef;
pub(crate) use lua_ref::ObjRefArray;
pub use stack_guard::StackGuard;

use smol_str::SmolStr;

use crate::gc::{self, GcStats, ObjectPool, TableId, UserdataId};
use crate::lua_value::{LuaFunction, LuaTable, LuaUserdata, LuaValue, NativeCallable};
use lua_limits::BASIC_STACK_SIZE;

#[derive(Debug, Clone, Copy)]
pub(crate) struct CallFrame {
    /// Absolute stack position of the first argument.
    pub base: usize,
}

pub struct LuaVm {
    pub(crate) pool: ObjectPool,
    pub(crate) stack: Vec<LuaValue>,
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) registry: TableId,
    pub(crate) globals: TableId,
    /// Shared metatable of every light userdata.
    pub(crate) light_metatable: Option<TableId>,
    pub(crate) gc_stats: GcStats,
}

impl LuaVm {
    pub fn new() -> Self {
        let mut pool = ObjectPool::new();
        let registry = pool.create_table(LuaTable::new());
        let globals = pool.create_table(LuaTable::new());
        LuaVm {
            pool,
            stack: Vec::with_capacity(BASIC_STACK_SIZE),
            frames: Vec::new(),
            registry,
            globals,
            light_metatable: None,
            gc_stats: GcStats::default(),
        }
    }

    // ===== Stack =====

    #[inline(always)]
    pub(crate) fn base(&self) -> usize {
        self.frames.last().map_or(0, |f| f.base)
    }

    /// Number of values in the current frame.
    #[inline]
    pub fn get_top(&self) -> usize {
        self.stack.len() - self.base()
    }

    pub fn set_top(&mut self, top: usize) {
        let base = self.base();
        self.stack.resize(base + top, LuaValue::Nil);
    }

    /// Absolute stack position of a relative index; `None` when it falls
    /// outside the current frame.
    pub(crate) fn abs_index(&self, idx: i32) -> Option<usize> {
        let base = self.base();
        let len = self.stack.len();
        if idx > 0 {
            let pos = base + idx as usize - 1;
            (pos < len).then_some(pos)
        } else if idx < 0 {
            let back = idx.unsigned_abs() as usize;
            (back <= len - base).then(|| len - back)
        } else {
            None
        }
    }

    /// Convert a possibly negative index into a positive frame index.
    pub fn absolute(&self, idx: i32) -> i32 {
        if idx < 0 {
            (self.get_top() as i32) + idx + 1
        } else {
            idx
        }
    }

    #[inline]
    pub fn value_at(&self, idx: i32) -> LuaValue {
        self.abs_index(idx)
            .map_or(LuaValue::Nil, |pos| self.stack[pos])
    }

    #[inline]
    pub fn push(&mut self, value: LuaValue) {
        self.stack.push(value);
    }

    pub fn pop(&mut self, n: usize) {
        let top = self.get_top();
        self.set_top(top.saturating_sub(n));
    }

    #[inline]
    pub fn pop_value(&mut self) -> LuaValue {
        if self.get_top() == 0 {
            return LuaValue::Nil;
        }
        self.stack.pop().unwrap_or_default()
    }

    pub fn remove(&mut self, idx: i32) {
        if let Some(pos) = self.abs_index(idx) {
            self.stack.remove(pos);
        }
    }

    pub fn replace(&mut self, idx: i32, value: LuaValue) {
        if let Some(pos) = self.abs_index(idx) {
            self.stack[pos] = value;
        }
    }

    // ===== Strings =====

    pub fn create_string(&mut self, s: &str) -> LuaValue {
        LuaValue::String(self.pool.create_string(s))
    }

    pub fn get_str(&self, value: LuaValue) -> Option<&SmolStr> {
        match value {
            LuaValue::String(id) => self.pool.get_string(id),
            _ => None,
        }
    }

    // ===== Tables =====

    pub fn create_table(&mut self) -> LuaValue {
        LuaValue::Table(self.pool.create_table(LuaTable::new()))
    }

    pub fn raw_get(&self, table: TableId, key: LuaValue) -> LuaValue {
        self.pool
            .get_table(table)
            .map_or(LuaValue::Nil, |t| t.raw_get(key))
    }

    pub fn raw_get_str(&self, table: TableId, key: &str) -> LuaValue {
        // strings are interned, an unknown string can not be a key
        match self.pool.strings_lookup(key) {
            Some(id) => self.raw_get(table, LuaValue::String(id)),
            None => LuaValue::Nil,
        }
    }

    pub fn raw_geti(&self, table: TableId, key: i64) -> LuaValue {
        self.pool
            .get_table(table)
            .map_or(LuaValue::Nil, |t| t.raw_geti(key))
    }

    pub fn raw_set(&mut self, table: TableId, key: LuaValue, value: LuaValue) -> LuaResult<()> {
        let t = self
            .pool
            .get_table_mut(table)
            .ok_or_else(|| LuaError::runtime("invalid table"))?;
        if t.raw_set(key, value) {
            Ok(())
        } else if key.is_nil() {
            Err(LuaError::runtime("table index is nil"))
        } else {
            Err(LuaError::runtime("table index is NaN"))
        }
    }

    pub fn raw_set_str(&mut self, table: TableId, key: &str, value: LuaValue) -> LuaResult<()> {
        let key = self.create_string(key);
        self.raw_set(table, key, value)
    }

    pub fn raw_seti(&mut self, table: TableId, key: i64, value: LuaValue) {
        if let Some(t) = self.pool.get_table_mut(table) {
            t.raw_seti(key, value);
        }
    }

    pub fn table_len(&self, table: TableId) -> usize {
        self.pool.get_table(table).map_or(0, |t| t.len())
    }

    /// luaL_ref on an arbitrary table.
    pub fn reference(&mut self, table: TableId, value: LuaValue) -> i64 {
        if value.is_nil() {
            return lua_limits::LUA_REFNIL;
        }
        match self.pool.get_table_mut(table) {
            Some(t) => t.reference(value),
            None => lua_limits::LUA_NOREF,
        }
    }

    pub fn unreference(&mut self, table: TableId, ref_id: i64) {
        if let Some(t) = self.pool.get_table_mut(table) {
            t.unreference(ref_id);
        }
    }

    // ===== Metatables =====

    pub fn get_metatable(&self, value: LuaValue) -> Option<TableId> {
        match value {
            LuaValue::Table(id) => self.pool.get_table(id)?.metatable,
            LuaValue::Userdata(id) => self.pool.get_userdata(id)?.metatable,
            LuaValue::LightUserdata(_) => self.light_metatable,
            _ => None,
        }
    }

    /// Attach a metatable; a `__mode` containing `v` makes the table weak
    /// valued.
    pub fn set_metatable(&mut self, value: LuaValue, metatable: Option<TableId>) -> LuaResult<()> {
        match value {
            LuaValue::Table(id) => {
                let weak_values = metatable.is_some_and(|mt| {
                    let mode = self.raw_get_str(mt, "__mode");
                    self.get_str(mode).is_some_and(|m| m.contains('v'))
                });
                let t = self
                    .pool
                    .get_table_mut(id)
                    .ok_or_else(|| LuaError::runtime("invalid table"))?;
                t.metatable = metatable;
                t.weak_values = weak_values;
            }
            LuaValue::Userdata(id) => {
                let ud = self
                    .pool
                    .get_userdata_mut(id)
                    .ok_or_else(|| LuaError::runtime("invalid userdata"))?;
                ud.metatable = metatable;
            }
            LuaValue::LightUserdata(_) => self.light_metatable = metatable,
            other => {
                return Err(LuaError::runtime(format!(
                    "cannot set metatable of a {} value",
                    other.type_name()
                )));
            }
        }
        Ok(())
    }

    /// Field `name` of the metatable of `value`, nil when absent.
    pub fn get_metafield(&self, value: LuaValue, name: &str) -> LuaValue {
        self.get_metatable(value)
            .map_or(LuaValue::Nil, |mt| self.raw_get_str(mt, name))
    }

    // ===== Userdata & functions =====

    pub fn create_userdata(&mut self, userdata: LuaUserdata) -> LuaValue {
        LuaValue::Userdata(self.pool.create_userdata(userdata))
    }

    #[inline]
    pub fn userdata(&self, id: UserdataId) -> Option<&LuaUserdata> {
        self.pool.get_userdata(id)
    }

    #[inline]
    pub fn userdata_mut(&mut self, id: UserdataId) -> Option<&mut LuaUserdata> {
        self.pool.get_userdata_mut(id)
    }

    pub fn create_function(&mut self, callable: NativeCallable, name: &str) -> LuaValue {
        LuaValue::Function(self.pool.create_function(LuaFunction::new(callable, name)))
    }

    // ===== GC =====

    /// Full collection cycle; returns userdata whose `__gc` must run.
    pub(crate) fn collect_garbage(&mut self) -> Vec<UserdataId> {
        let mut roots = self.stack.clone();
        roots.push(LuaValue::Table(self.registry));
        roots.push(LuaValue::Table(self.globals));
        if let Some(mt) = self.light_metatable {
            roots.push(LuaValue::Table(mt));
        }
        let gc_key = self.pool.strings_lookup("__gc");
        let mut stats = self.gc_stats;
        let pending = gc::collect(
            &mut self.pool,
            roots,
            |pool, id| {
                let Some(key) = gc_key else {
                    return false;
                };
                pool.get_userdata(id)
                    .and_then(|ud| ud.metatable)
                    .and_then(|mt| pool.get_table(mt))
                    .is_some_and(|mt| !mt.raw_get(LuaValue::String(key)).is_nil())
            },
            &mut stats,
        );
        self.gc_stats = stats;
        pending
    }

    pub fn gc_stats(&self) -> GcStats {
        self.gc_stats
    }
}

impl Default for LuaVm {
    fn default() -> Self {
        Self::new()
    }
}
