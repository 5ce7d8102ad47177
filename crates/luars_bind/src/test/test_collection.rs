// Collection adapters: sequences, maps and iteration
use std::collections::{BTreeMap, HashMap, LinkedList, VecDeque};

use super::fixtures::*;
use crate::collection::Collection;
use crate::lua_value::LuaValue;
use crate::lua_vm::LuaError;
use crate::state::State;

fn len(state: &mut State, coll: LuaValue) -> i64 {
    state.len_value(coll).unwrap().as_integer().unwrap()
}

fn index(state: &mut State, coll: LuaValue, i: i64) -> Result<LuaValue, LuaError> {
    state.index_value(coll, LuaValue::Integer(i))
}

fn new_index(state: &mut State, coll: LuaValue, i: i64, v: LuaValue) -> Result<(), LuaError> {
    state.new_index_value(coll, LuaValue::Integer(i), v)
}

fn integers(state: &mut State, coll: LuaValue) -> Vec<i64> {
    pairs(state, coll)
        .into_iter()
        .map(|(_, v)| v.as_integer().unwrap())
        .collect()
}

#[test]
fn test_vec_round_trip() {
    let mut state = new_state();
    state.push_collection(vec![1i64, 2, 3]);
    let v = state.value_at(-1);

    assert_eq!(len(&mut state, v), 3);
    assert_eq!(index(&mut state, v, 1).unwrap(), LuaValue::Integer(1));
    assert_eq!(index(&mut state, v, 3).unwrap(), LuaValue::Integer(3));

    new_index(&mut state, v, 2, LuaValue::Integer(20)).unwrap();
    // len + 1 appends
    new_index(&mut state, v, 4, LuaValue::Integer(4)).unwrap();
    assert_eq!(integers(&mut state, v), vec![1, 20, 3, 4]);

    let ptr = state.collection_ptr::<Vec<i64>>(-1).unwrap();
    assert_eq!(unsafe { ptr.as_ref() }, &vec![1, 20, 3, 4]);
    assert_eq!(type_of(&mut state, v), "Vec");
}

#[test]
fn test_out_of_range_does_not_mutate() {
    let mut state = new_state();
    state.push_collection(vec![1i64, 2, 3]);
    let v = state.value_at(-1);

    assert_eq!(
        new_index(&mut state, v, 5, LuaValue::Integer(5)).unwrap_err(),
        LuaError::OutOfRange {
            container: "Vec",
            index: 5,
            len: 3,
        }
    );
    assert!(new_index(&mut state, v, 0, LuaValue::Integer(0)).is_err());
    assert!(index(&mut state, v, 4).is_err());
    assert!(index(&mut state, v, -1).is_err());
    // a value of the wrong type is rejected before anything changes
    let text = str_value(&mut state, "x");
    assert!(new_index(&mut state, v, 4, text).is_err());
    assert_eq!(integers(&mut state, v), vec![1, 2, 3]);
}

#[test]
fn test_library_insert_remove_clear() {
    let mut state = new_state();
    state.push_collection(VecDeque::from(vec![1i64, 2, 3]));
    let v = state.value_at(-1);

    let inserted = lib(&mut state, "Insert", &[v, LuaValue::Integer(1), LuaValue::Integer(0)]).unwrap();
    assert_eq!(inserted, vec![LuaValue::Boolean(true)]);
    assert_eq!(integers(&mut state, v), vec![0, 1, 2, 3]);

    lib(&mut state, "Remove", &[v, LuaValue::Integer(2)]).unwrap();
    assert_eq!(integers(&mut state, v), vec![0, 2, 3]);

    assert!(lib(&mut state, "Remove", &[v, LuaValue::Integer(4)]).is_err());
    assert_eq!(len(&mut state, v), 3);

    lib(&mut state, "Clear", &[v]).unwrap();
    assert_eq!(len(&mut state, v), 0);
}

#[test]
fn test_linked_list() {
    let mut state = new_state();
    let list: LinkedList<i64> = [1, 2, 3].into_iter().collect();
    state.push_collection(list);
    let v = state.value_at(-1);

    lib(&mut state, "Insert", &[v, LuaValue::Integer(2), LuaValue::Integer(9)]).unwrap();
    assert_eq!(integers(&mut state, v), vec![1, 9, 2, 3]);
    lib(&mut state, "Remove", &[v, LuaValue::Integer(4)]).unwrap();
    new_index(&mut state, v, 1, LuaValue::Integer(7)).unwrap();
    assert_eq!(integers(&mut state, v), vec![7, 9, 2]);
}

#[test]
fn test_scenario_c_map_iteration() {
    let mut state = new_state();
    let mut map = HashMap::new();
    map.insert("a".to_owned(), 1i64);
    map.insert("b".to_owned(), 2i64);
    state.push_collection(map);
    let m = state.value_at(-1);

    let pairs = pairs(&mut state, m);
    assert_eq!(pairs.len(), 2);
    let sum: i64 = pairs.iter().map(|(_, v)| v.as_integer().unwrap()).sum();
    assert_eq!(sum, 3);
    let mut keys: Vec<String> = pairs.iter().map(|(k, _)| as_string(&state, *k)).collect();
    keys.sort();
    assert_eq!(keys, vec!["a", "b"]);
}

#[test]
fn test_map_index_and_erase() {
    let mut state = new_state();
    state.push_collection(BTreeMap::from([(1i64, "one".to_owned()), (2, "two".to_owned())]));
    let m = state.value_at(-1);

    let one = index(&mut state, m, 1).unwrap();
    assert_eq!(as_string(&state, one), "one");
    assert_eq!(index(&mut state, m, 3).unwrap(), LuaValue::Nil);

    let three = str_value(&mut state, "three");
    new_index(&mut state, m, 3, three).unwrap();
    assert_eq!(len(&mut state, m), 3);

    // nil erases
    new_index(&mut state, m, 1, LuaValue::Nil).unwrap();
    assert_eq!(len(&mut state, m), 2);

    let dup = str_value(&mut state, "again");
    let inserted = lib(&mut state, "Insert", &[m, LuaValue::Integer(2), dup]).unwrap();
    assert_eq!(inserted, vec![LuaValue::Boolean(false)]);
    let two = index(&mut state, m, 2).unwrap();
    assert_eq!(as_string(&state, two), "two");

    // ordered map iterates in key order
    let keys: Vec<i64> = pairs(&mut state, m)
        .into_iter()
        .map(|(k, _)| k.as_integer().unwrap())
        .collect();
    assert_eq!(keys, vec![2, 3]);
}

#[test]
fn test_map_iteration_skips_erased_keys() {
    let mut state = new_state();
    state.push_collection(BTreeMap::from([(1i64, 10i64), (2, 20), (3, 30)]));
    let m = state.value_at(-1);

    let (next, cursor, key) = state.pairs_value(m).unwrap();
    let first = state.call_function(next, &[cursor, key]).unwrap();
    assert_eq!(first, vec![LuaValue::Integer(1), LuaValue::Integer(10)]);

    new_index(&mut state, m, 2, LuaValue::Nil).unwrap();
    let second = state.call_function(next, &[cursor, first[0]]).unwrap();
    assert_eq!(second, vec![LuaValue::Integer(3), LuaValue::Integer(30)]);
    let end = state.call_function(next, &[cursor, second[0]]).unwrap();
    assert_eq!(end, vec![LuaValue::Nil]);
}

#[test]
fn test_borrowed_collection_identity() {
    let mut state = new_state();
    let mut native = vec![1i64, 2];
    unsafe { state.push_collection_ptr(&mut native) };
    let a = state.value_at(-1);
    unsafe { state.push_collection_ptr(&mut native) };
    assert_eq!(state.value_at(-1), a);

    new_index(&mut state, a, 3, LuaValue::Integer(3)).unwrap();
    state.pop(2);
    state.full_gc();
    assert_eq!(native, vec![1, 2, 3]);
    assert_eq!(state.cache_len(), 0);
}

#[test]
fn test_owned_collection_is_freed() {
    let mut state = new_state();
    state.push_collection(vec![String::from("x")]);
    assert!(state.is_valid(-1));
    state.pop(1);
    assert_eq!(state.full_gc(), 1);
}

#[test]
fn test_pointer_into_owned_collection_maps_back() {
    let mut state = new_state();
    state.push_collection(vec![1i64, 2]);
    let owned = state.value_at(-1);
    let ptr = state.collection_ptr::<Vec<i64>>(-1).unwrap();
    assert_eq!(state.cache_len(), 1);

    unsafe { state.push_collection_ptr(ptr.as_ptr()) };
    assert_eq!(state.value_at(-1), owned);
    assert_eq!(state.cache_len(), 1);

    state.pop(1);
    state.full_gc();
    assert_eq!(len(&mut state, owned), 2);
    state.pop(1);
    assert_eq!(state.full_gc(), 1);
    assert_eq!(state.cache_len(), 0);
}

#[test]
fn test_vtable_identity() {
    assert!(<Vec<i64> as Collection>::VTABLE.is::<Vec<i64>>());
    assert!(!<Vec<i64> as Collection>::VTABLE.is::<Vec<i32>>());
    assert_eq!((<HashMap<String, i64> as Collection>::VTABLE.name)(), "HashMap");
}
