use ahash::{AHashMap, AHashSet};

use super::LuaValue;
use crate::gc::{FunctionId, StringId, TableId, UserdataId};

/// Hashable projection of a `LuaValue` used as a table key.
///
/// Floats with an integral value are normalized to integers, NaN and nil
/// have no key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum TableKey {
    Boolean(bool),
    Integer(i64),
    Number(u64),
    String(StringId),
    Table(TableId),
    Function(FunctionId),
    LightUserdata(u64),
    Userdata(UserdataId),
}

impl TableKey {
    pub(crate) fn from_value(value: LuaValue) -> Option<TableKey> {
        Some(match value {
            LuaValue::Nil => return None,
            LuaValue::Boolean(b) => TableKey::Boolean(b),
            LuaValue::Integer(i) => TableKey::Integer(i),
            LuaValue::Number(n) => {
                if n.is_nan() {
                    return None;
                }
                match value.as_integer() {
                    Some(i) => TableKey::Integer(i),
                    None => TableKey::Number(n.to_bits()),
                }
            }
            LuaValue::String(id) => TableKey::String(id),
            LuaValue::Table(id) => TableKey::Table(id),
            LuaValue::Function(id) => TableKey::Function(id),
            LuaValue::LightUserdata(word) => TableKey::LightUserdata(word),
            LuaValue::Userdata(id) => TableKey::Userdata(id),
        })
    }

    pub(crate) fn to_value(self) -> LuaValue {
        match self {
            TableKey::Boolean(b) => LuaValue::Boolean(b),
            TableKey::Integer(i) => LuaValue::Integer(i),
            TableKey::Number(bits) => LuaValue::Number(f64::from_bits(bits)),
            TableKey::String(id) => LuaValue::String(id),
            TableKey::Table(id) => LuaValue::Table(id),
            TableKey::Function(id) => LuaValue::Function(id),
            TableKey::LightUserdata(word) => LuaValue::LightUserdata(word),
            TableKey::Userdata(id) => LuaValue::Userdata(id),
        }
    }
}

#[derive(Default)]
pub struct LuaTable {
    entries: AHashMap<TableKey, LuaValue>,
    pub(crate) metatable: Option<TableId>,
    /// Values do not keep their referents alive (`__mode = "v"`).
    pub(crate) weak_values: bool,
    ref_free_list: Vec<i64>,
    /// Members of `ref_free_list`, for O(1) double release checks.
    ref_free: AHashSet<i64>,
    ref_next: i64,
}

impl LuaTable {
    pub fn new() -> Self {
        LuaTable {
            ref_next: 1,
            ..Default::default()
        }
    }

    pub fn metatable(&self) -> Option<TableId> {
        self.metatable
    }

    pub fn is_weak_values(&self) -> bool {
        self.weak_values
    }

    pub(crate) fn raw_get(&self, key: LuaValue) -> LuaValue {
        TableKey::from_value(key)
            .and_then(|k| self.entries.get(&k).copied())
            .unwrap_or_default()
    }

    #[inline]
    pub(crate) fn raw_geti(&self, key: i64) -> LuaValue {
        self.entries
            .get(&TableKey::Integer(key))
            .copied()
            .unwrap_or_default()
    }

    /// Assigning nil removes the entry. Returns false for keys without a
    /// table representation (nil, NaN).
    pub(crate) fn raw_set(&mut self, key: LuaValue, value: LuaValue) -> bool {
        let Some(key) = TableKey::from_value(key) else {
            return false;
        };
        if value.is_nil() {
            self.entries.remove(&key);
        } else {
            self.entries.insert(key, value);
        }
        true
    }

    #[inline]
    pub(crate) fn raw_seti(&mut self, key: i64, value: LuaValue) {
        if value.is_nil() {
            self.entries.remove(&TableKey::Integer(key));
        } else {
            self.entries.insert(TableKey::Integer(key), value);
        }
    }

    /// Border of the array part: the first `n` such that `t[n+1]` is nil.
    pub fn len(&self) -> usize {
        let mut n = 0usize;
        while self.entries.contains_key(&TableKey::Integer(n as i64 + 1)) {
            n += 1;
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (TableKey, LuaValue)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, *v))
    }

    /// Reference ids waiting for reuse.
    pub(crate) fn free_ref_count(&self) -> usize {
        self.ref_free_list.len()
    }

    pub(crate) fn retain(&mut self, mut keep: impl FnMut(&TableKey, &LuaValue) -> bool) {
        self.entries.retain(|k, v| keep(k, v));
    }

    /// Store `value` under a fresh integer reference (luaL_ref).
    pub(crate) fn reference(&mut self, value: LuaValue) -> i64 {
        let ref_id = match self.ref_free_list.pop() {
            Some(id) => {
                self.ref_free.remove(&id);
                id
            }
            None => {
                let id = self.ref_next;
                self.ref_next += 1;
                id
            }
        };
        self.raw_seti(ref_id, value);
        ref_id
    }

    /// Release a reference created by `reference` (luaL_unref).
    pub(crate) fn unreference(&mut self, ref_id: i64) {
        if ref_id <= 0 || ref_id >= self.ref_next || !self.ref_free.insert(ref_id) {
            return;
        }
        self.raw_seti(ref_id, LuaValue::Nil);
        self.ref_free_list.push(ref_id);
    }
}
