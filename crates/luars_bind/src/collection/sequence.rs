use std::any::TypeId;
use std::collections::{LinkedList, VecDeque};
use std::ptr::NonNull;

use super::{Collection, CollectionVTable, check_arg, check_position};
use crate::lua_convert::{IntoLua, Storable};
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaError, LuaResult};
use crate::state::State;

/// Positional container; positions here are 0-based.
pub trait Sequence: 'static {
    type Item: Storable;
    const NAME: &'static str;

    fn seq_len(&self) -> usize;
    fn seq_get(&self, i: usize) -> Option<&Self::Item>;
    fn seq_set(&mut self, i: usize, item: Self::Item);
    fn seq_insert(&mut self, i: usize, item: Self::Item);
    fn seq_remove(&mut self, i: usize);
    fn seq_clear(&mut self);
}

impl<T: Storable> Sequence for Vec<T> {
    type Item = T;
    const NAME: &'static str = "Vec";

    fn seq_len(&self) -> usize {
        self.len()
    }

    fn seq_get(&self, i: usize) -> Option<&T> {
        self.get(i)
    }

    fn seq_set(&mut self, i: usize, item: T) {
        self[i] = item;
    }

    fn seq_insert(&mut self, i: usize, item: T) {
        self.insert(i, item);
    }

    fn seq_remove(&mut self, i: usize) {
        self.remove(i);
    }

    fn seq_clear(&mut self) {
        self.clear();
    }
}

impl<T: Storable> Sequence for VecDeque<T> {
    type Item = T;
    const NAME: &'static str = "VecDeque";

    fn seq_len(&self) -> usize {
        self.len()
    }

    fn seq_get(&self, i: usize) -> Option<&T> {
        self.get(i)
    }

    fn seq_set(&mut self, i: usize, item: T) {
        self[i] = item;
    }

    fn seq_insert(&mut self, i: usize, item: T) {
        self.insert(i, item);
    }

    fn seq_remove(&mut self, i: usize) {
        self.remove(i);
    }

    fn seq_clear(&mut self) {
        self.clear();
    }
}

impl<T: Storable> Sequence for LinkedList<T> {
    type Item = T;
    const NAME: &'static str = "LinkedList";

    fn seq_len(&self) -> usize {
        self.len()
    }

    fn seq_get(&self, i: usize) -> Option<&T> {
        self.iter().nth(i)
    }

    fn seq_set(&mut self, i: usize, item: T) {
        if let Some(slot) = self.iter_mut().nth(i) {
            *slot = item;
        }
    }

    fn seq_insert(&mut self, i: usize, item: T) {
        let mut tail = self.split_off(i);
        self.push_back(item);
        self.append(&mut tail);
    }

    fn seq_remove(&mut self, i: usize) {
        let mut tail = self.split_off(i);
        tail.pop_front();
        self.append(&mut tail);
    }

    fn seq_clear(&mut self) {
        self.clear();
    }
}

macro_rules! impl_sequence_collection {
    ($($container:ident),*) => {
        $(
            impl<T: Storable> Collection for $container<T> {
                const VTABLE: &'static CollectionVTable = &CollectionVTable {
                    name: seq_name::<Self>,
                    type_id: TypeId::of::<Self>,
                    index: seq_index::<Self>,
                    new_index: seq_new_index::<Self>,
                    insert: seq_insert::<Self>,
                    remove: seq_remove::<Self>,
                    length: seq_length::<Self>,
                    iterate: seq_iterate::<Self>,
                    clear: seq_clear::<Self>,
                };
            }
        )*
    };
}

impl_sequence_collection!(Vec, VecDeque, LinkedList);

fn seq_name<C: Sequence>() -> &'static str {
    C::NAME
}

/// 0-based slot of a 1-based position in `[1, limit]`.
fn slot_in(index: i64, limit: usize, len: usize, name: &'static str) -> LuaResult<usize> {
    if index >= 1 && (index as u64) <= limit as u64 {
        Ok(index as usize - 1)
    } else {
        Err(LuaError::OutOfRange {
            container: name,
            index,
            len,
        })
    }
}

unsafe fn seq_index<C: Sequence>(ptr: NonNull<u8>, state: &mut State) -> LuaResult<usize> {
    let index = check_position(state, 2)?;
    let item = {
        let seq = unsafe { ptr.cast::<C>().as_ref() };
        let slot = slot_in(index, seq.seq_len(), seq.seq_len(), C::NAME)?;
        seq.seq_get(slot).cloned()
    };
    match item {
        Some(item) => item.into_lua(state),
        None => {
            state.push_nil();
            Ok(1)
        }
    }
}

unsafe fn seq_new_index<C: Sequence>(ptr: NonNull<u8>, state: &mut State) -> LuaResult<usize> {
    let index = check_position(state, 2)?;
    let len = unsafe { ptr.cast::<C>().as_ref() }.seq_len();
    let slot = slot_in(index, len + 1, len, C::NAME)?;
    let item: C::Item = check_arg(state, 3, C::NAME, "value")?;
    let seq = unsafe { ptr.cast::<C>().as_mut() };
    if slot == len {
        seq.seq_insert(len, item);
    } else {
        seq.seq_set(slot, item);
    }
    Ok(0)
}

unsafe fn seq_insert<C: Sequence>(ptr: NonNull<u8>, state: &mut State) -> LuaResult<usize> {
    let index = check_position(state, 2)?;
    let len = unsafe { ptr.cast::<C>().as_ref() }.seq_len();
    let slot = slot_in(index, len + 1, len, C::NAME)?;
    let item: C::Item = check_arg(state, 3, C::NAME, "value")?;
    unsafe { ptr.cast::<C>().as_mut() }.seq_insert(slot, item);
    state.push_value(LuaValue::Boolean(true));
    Ok(1)
}

unsafe fn seq_remove<C: Sequence>(ptr: NonNull<u8>, state: &mut State) -> LuaResult<usize> {
    let index = check_position(state, 2)?;
    let seq = unsafe { ptr.cast::<C>().as_mut() };
    let len = seq.seq_len();
    let slot = slot_in(index, len, len, C::NAME)?;
    seq.seq_remove(slot);
    Ok(0)
}

unsafe fn seq_length<C: Sequence>(ptr: NonNull<u8>) -> usize {
    unsafe { ptr.cast::<C>().as_ref() }.seq_len()
}

unsafe fn seq_clear<C: Sequence>(ptr: NonNull<u8>) {
    unsafe { ptr.cast::<C>().as_mut() }.seq_clear();
}

unsafe fn seq_iterate<C: Sequence + Collection>(_ptr: NonNull<u8>, state: &mut State) -> LuaResult<usize> {
    let container = state.value_at(1);
    state.push_native_fn(seq_next::<C>, "next");
    state.push_value(container);
    state.push_value(LuaValue::Integer(0));
    Ok(3)
}

/// `(container, position) -> position + 1, item` until the end.
fn seq_next<C: Sequence + Collection>(state: &mut State) -> LuaResult<usize> {
    let ptr = state.collection_ptr::<C>(1)?;
    let position = check_position(state, 2)?;
    let item = {
        let seq = unsafe { ptr.as_ref() };
        usize::try_from(position)
            .ok()
            .and_then(|p| seq.seq_get(p))
            .cloned()
    };
    match item {
        Some(item) => {
            state.push_value(LuaValue::Integer(position + 1));
            item.into_lua(state)?;
            Ok(2)
        }
        None => {
            state.push_nil();
            Ok(1)
        }
    }
}
