// Object pool for the host heap
// Strings, tables, functions and userdata addressed by compact IDs

use ahash::AHashMap;
use smol_str::SmolStr;

use super::{FunctionId, StringId, TableId, UserdataId};
use crate::lua_value::{LuaFunction, LuaTable, LuaUserdata};

/// Slot-based storage with free list for O(1) allocation and deallocation
pub(crate) struct SlotVec<T> {
    slots: Vec<Option<T>>,
    free_list: Vec<u32>,
    count: usize,
}

impl<T> Default for SlotVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlotVec<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            count: 0,
        }
    }

    /// O(1) insertion - reuse free slot or append new slot
    #[inline]
    pub(crate) fn insert(&mut self, value: T) -> u32 {
        self.count += 1;

        if let Some(free_id) = self.free_list.pop() {
            self.slots[free_id as usize] = Some(value);
            free_id
        } else {
            let id = self.slots.len() as u32;
            self.slots.push(Some(value));
            id
        }
    }

    #[inline]
    pub(crate) fn get(&self, id: u32) -> Option<&T> {
        self.slots.get(id as usize).and_then(|slot| slot.as_ref())
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.slots.get_mut(id as usize).and_then(|slot| slot.as_mut())
    }

    /// O(1) removal - mark as free and add to free list
    #[inline]
    pub(crate) fn remove(&mut self, id: u32) -> Option<T> {
        let value = self.slots.get_mut(id as usize)?.take()?;
        self.free_list.push(id);
        self.count -= 1;
        Some(value)
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.count
    }

    /// Upper bound of ids ever handed out, live or free.
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(id, _)| id as u32)
    }
}

/// Interned strings. Equal contents share one id while any reference to it
/// is alive; the collector frees unreachable ones and drops their lookup
/// entry, so the id may later be reused for another string.
#[derive(Default)]
pub(crate) struct StringInterner {
    strings: SlotVec<SmolStr>,
    lookup: AHashMap<SmolStr, StringId>,
}

impl StringInterner {
    pub(crate) fn intern(&mut self, s: &str) -> StringId {
        if let Some(id) = self.lookup.get(s) {
            return *id;
        }
        let s = SmolStr::new(s);
        let id = StringId(self.strings.insert(s.clone()));
        self.lookup.insert(s, id);
        id
    }

    pub(crate) fn lookup(&self, s: &str) -> Option<StringId> {
        self.lookup.get(s).copied()
    }

    pub(crate) fn get(&self, id: StringId) -> Option<&SmolStr> {
        self.strings.get(id.0)
    }

    pub(crate) fn remove(&mut self, id: StringId) {
        if let Some(s) = self.strings.remove(id.0) {
            self.lookup.remove(&s);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.strings.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.strings.capacity()
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.strings.ids()
    }
}

pub struct ObjectPool {
    pub(crate) strings: StringInterner,
    pub(crate) tables: SlotVec<LuaTable>,
    pub(crate) functions: SlotVec<LuaFunction>,
    pub(crate) userdata: SlotVec<LuaUserdata>,
}

impl ObjectPool {
    pub fn new() -> Self {
        ObjectPool {
            strings: StringInterner::default(),
            tables: SlotVec::new(),
            functions: SlotVec::new(),
            userdata: SlotVec::new(),
        }
    }

    #[inline]
    pub fn create_string(&mut self, s: &str) -> StringId {
        self.strings.intern(s)
    }

    /// Id of an already interned string.
    #[inline]
    pub fn strings_lookup(&self, s: &str) -> Option<StringId> {
        self.strings.lookup(s)
    }

    #[inline]
    pub fn get_string(&self, id: StringId) -> Option<&SmolStr> {
        self.strings.get(id)
    }

    #[inline]
    pub fn create_table(&mut self, table: LuaTable) -> TableId {
        TableId(self.tables.insert(table))
    }

    #[inline]
    pub fn get_table(&self, id: TableId) -> Option<&LuaTable> {
        self.tables.get(id.0)
    }

    #[inline]
    pub fn get_table_mut(&mut self, id: TableId) -> Option<&mut LuaTable> {
        self.tables.get_mut(id.0)
    }

    #[inline]
    pub fn create_function(&mut self, function: LuaFunction) -> FunctionId {
        FunctionId(self.functions.insert(function))
    }

    #[inline]
    pub fn get_function(&self, id: FunctionId) -> Option<&LuaFunction> {
        self.functions.get(id.0)
    }

    #[inline]
    pub fn create_userdata(&mut self, userdata: LuaUserdata) -> UserdataId {
        UserdataId(self.userdata.insert(userdata))
    }

    #[inline]
    pub fn get_userdata(&self, id: UserdataId) -> Option<&LuaUserdata> {
        self.userdata.get(id.0)
    }

    #[inline]
    pub fn get_userdata_mut(&mut self, id: UserdataId) -> Option<&mut LuaUserdata> {
        self.userdata.get_mut(id.0)
    }

    /// Live interned strings.
    pub fn string_count(&self) -> usize {
        self.strings.len()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn userdata_count(&self) -> usize {
        self.userdata.len()
    }
}

impl Default for ObjectPool {
    fn default() -> Self {
        Self::new()
    }
}
