// Value conversion: storable element types and integer range
use std::marker::PhantomData;

use smol_str::SmolStr;

use super::fixtures::*;
use crate::lua_convert::{FromLua, Storable};
use crate::lua_value::LuaValue;
use crate::lua_vm::LuaError;

struct StorableCheck<T>(PhantomData<T>);

trait NotStorable {
    const STORABLE: bool = false;
}

impl<T> NotStorable for StorableCheck<T> {}

impl<T: Storable> StorableCheck<T> {
    const STORABLE: bool = true;
}

#[test]
fn test_script_values_are_not_storable() {
    assert!(StorableCheck::<i64>::STORABLE);
    assert!(StorableCheck::<f32>::STORABLE);
    assert!(StorableCheck::<Option<SmolStr>>::STORABLE);
    // a script value held natively would escape the collector
    assert!(!StorableCheck::<LuaValue>::STORABLE);
    assert!(!StorableCheck::<Option<LuaValue>>::STORABLE);
}

#[test]
fn test_stored_strings_outlive_collection() {
    let mut state = new_state();
    state.push_collection(vec![String::from("alpha")]);
    let coll = state.value_at(-1);
    state.full_gc();
    let first = state.index_value(coll, LuaValue::Integer(1)).unwrap();
    assert_eq!(as_string(&state, first), "alpha");
}

#[test]
fn test_unsigned_out_of_integer_range() {
    let mut state = new_state();
    let top = state.get_top();
    assert!(matches!(state.push(u64::MAX), Err(LuaError::Runtime(_))));
    assert!(matches!(
        state.push(i64::MAX as u64 + 1),
        Err(LuaError::Runtime(_))
    ));
    assert_eq!(state.get_top(), top);

    state.push(i64::MAX as u64).unwrap();
    let value = state.pop_value();
    assert_eq!(value, LuaValue::Integer(i64::MAX));
    assert_eq!(u64::from_lua(value, &state), Ok(i64::MAX as u64));
    assert!(u64::from_lua(LuaValue::Integer(-1), &state).is_err());
}
