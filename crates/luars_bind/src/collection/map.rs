use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::ptr::NonNull;

use super::{Collection, CollectionVTable, check_arg};
use crate::lua_convert::{IntoLua, Storable};
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaError, LuaResult};
use crate::state::State;

/// Keyed container.
pub trait MapLike: 'static {
    type Key: Storable;
    type Value: Storable;
    const NAME: &'static str;

    fn map_len(&self) -> usize;
    fn map_get(&self, key: &Self::Key) -> Option<&Self::Value>;
    /// Insert when absent; false if the key already exists.
    fn map_insert(&mut self, key: Self::Key, value: Self::Value) -> bool;
    fn map_set(&mut self, key: Self::Key, value: Self::Value);
    fn map_remove(&mut self, key: &Self::Key);
    fn map_clear(&mut self);
    fn map_keys(&self) -> Vec<Self::Key>;
}

impl<K, V> MapLike for HashMap<K, V>
where
    K: Storable + Eq + Hash,
    V: Storable,
{
    type Key = K;
    type Value = V;
    const NAME: &'static str = "HashMap";

    fn map_len(&self) -> usize {
        self.len()
    }

    fn map_get(&self, key: &K) -> Option<&V> {
        self.get(key)
    }

    fn map_insert(&mut self, key: K, value: V) -> bool {
        match self.entry(key) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(value);
                true
            }
        }
    }

    fn map_set(&mut self, key: K, value: V) {
        self.insert(key, value);
    }

    fn map_remove(&mut self, key: &K) {
        self.remove(key);
    }

    fn map_clear(&mut self) {
        self.clear();
    }

    fn map_keys(&self) -> Vec<K> {
        self.keys().cloned().collect()
    }
}

impl<K, V> MapLike for BTreeMap<K, V>
where
    K: Storable + Ord,
    V: Storable,
{
    type Key = K;
    type Value = V;
    const NAME: &'static str = "BTreeMap";

    fn map_len(&self) -> usize {
        self.len()
    }

    fn map_get(&self, key: &K) -> Option<&V> {
        self.get(key)
    }

    fn map_insert(&mut self, key: K, value: V) -> bool {
        match self.entry(key) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(e) => {
                e.insert(value);
                true
            }
        }
    }

    fn map_set(&mut self, key: K, value: V) {
        self.insert(key, value);
    }

    fn map_remove(&mut self, key: &K) {
        self.remove(key);
    }

    fn map_clear(&mut self) {
        self.clear();
    }

    fn map_keys(&self) -> Vec<K> {
        self.keys().cloned().collect()
    }
}

impl<K, V> Collection for HashMap<K, V>
where
    K: Storable + Eq + Hash,
    V: Storable,
{
    const VTABLE: &'static CollectionVTable = &CollectionVTable {
        name: map_name::<Self>,
        type_id: TypeId::of::<Self>,
        index: map_index::<Self>,
        new_index: map_new_index::<Self>,
        insert: map_insert::<Self>,
        remove: map_remove::<Self>,
        length: map_length::<Self>,
        iterate: map_iterate::<Self>,
        clear: map_clear::<Self>,
    };
}

impl<K, V> Collection for BTreeMap<K, V>
where
    K: Storable + Ord,
    V: Storable,
{
    const VTABLE: &'static CollectionVTable = &CollectionVTable {
        name: map_name::<Self>,
        type_id: TypeId::of::<Self>,
        index: map_index::<Self>,
        new_index: map_new_index::<Self>,
        insert: map_insert::<Self>,
        remove: map_remove::<Self>,
        length: map_length::<Self>,
        iterate: map_iterate::<Self>,
        clear: map_clear::<Self>,
    };
}

fn map_name<C: MapLike>() -> &'static str {
    C::NAME
}

unsafe fn map_index<C: MapLike>(ptr: NonNull<u8>, state: &mut State) -> LuaResult<usize> {
    let key: C::Key = check_arg(state, 2, C::NAME, "key")?;
    let value = unsafe { ptr.cast::<C>().as_ref() }.map_get(&key).cloned();
    match value {
        Some(value) => value.into_lua(state),
        None => {
            state.push_nil();
            Ok(1)
        }
    }
}

unsafe fn map_new_index<C: MapLike>(ptr: NonNull<u8>, state: &mut State) -> LuaResult<usize> {
    let key: C::Key = check_arg(state, 2, C::NAME, "key")?;
    if state.value_at(3).is_nil() {
        unsafe { ptr.cast::<C>().as_mut() }.map_remove(&key);
        return Ok(0);
    }
    let value: C::Value = check_arg(state, 3, C::NAME, "value")?;
    unsafe { ptr.cast::<C>().as_mut() }.map_set(key, value);
    Ok(0)
}

unsafe fn map_insert<C: MapLike>(ptr: NonNull<u8>, state: &mut State) -> LuaResult<usize> {
    let key: C::Key = check_arg(state, 2, C::NAME, "key")?;
    let value: C::Value = check_arg(state, 3, C::NAME, "value")?;
    let inserted = unsafe { ptr.cast::<C>().as_mut() }.map_insert(key, value);
    state.push_value(LuaValue::Boolean(inserted));
    Ok(1)
}

unsafe fn map_remove<C: MapLike>(ptr: NonNull<u8>, state: &mut State) -> LuaResult<usize> {
    let key: C::Key = check_arg(state, 2, C::NAME, "key")?;
    unsafe { ptr.cast::<C>().as_mut() }.map_remove(&key);
    Ok(0)
}

unsafe fn map_length<C: MapLike>(ptr: NonNull<u8>) -> usize {
    unsafe { ptr.cast::<C>().as_ref() }.map_len()
}

unsafe fn map_clear<C: MapLike>(ptr: NonNull<u8>) {
    unsafe { ptr.cast::<C>().as_mut() }.map_clear();
}

/// Iteration state kept in an auxiliary userdata whose user value is the
/// container, so the container outlives the loop.
///
/// Keys are snapshotted when iteration starts; keys erased afterwards are
/// skipped, keys added afterwards are not visited. Structural mutation
/// during iteration is otherwise unspecified but never unsafe.
struct MapCursor<K> {
    keys: Vec<K>,
    pos: usize,
}

unsafe fn map_iterate<C: MapLike + Collection>(ptr: NonNull<u8>, state: &mut State) -> LuaResult<usize> {
    let keys = unsafe { ptr.cast::<C>().as_ref() }.map_keys();
    let container = state.value_at(1);
    state.push_native_fn(map_next::<C>, "next");
    state.push_aux(MapCursor { keys, pos: 0 }, container);
    state.push_nil();
    Ok(3)
}

/// `(cursor, _) -> key, value` until the end.
fn map_next<C: MapLike + Collection>(state: &mut State) -> LuaResult<usize> {
    let cursor = state.value_at(1);
    let container = state.aux_user_value(cursor);
    let ptr = state.collection_ptr_of::<C>(container)?;
    let map = unsafe { ptr.as_ref() };

    let next = {
        let Some(c) = state.aux_mut::<MapCursor<C::Key>>(cursor) else {
            return Err(LuaError::runtime(format!("invalid {} iterator", C::NAME)));
        };
        let mut found = None;
        while c.pos < c.keys.len() {
            let key = &c.keys[c.pos];
            c.pos += 1;
            if let Some(value) = map.map_get(key) {
                found = Some((key.clone(), value.clone()));
                break;
            }
        }
        found
    };

    match next {
        Some((key, value)) => {
            key.into_lua(state)?;
            value.into_lua(state)?;
            Ok(2)
        }
        None => {
            state.push_nil();
            Ok(1)
        }
    }
}
