// Collection of interned strings and reference slot reuse
use super::fixtures::*;
use crate::lua_value::{LuaTable, LuaValue};

#[test]
fn test_unreachable_strings_are_freed() {
    let mut state = new_state();
    state.full_gc();
    let before = state.vm().pool.string_count();
    for i in 0..1000 {
        state.push_string(&format!("temp-{}", i));
        state.pop(1);
    }
    assert_eq!(state.vm().pool.string_count(), before + 1000);

    state.full_gc();
    assert_eq!(state.vm().pool.string_count(), before);
}

#[test]
fn test_reachable_strings_survive() {
    let mut state = new_state();
    state.push_string("on the stack");
    state.push_string("in a global");
    state.set_global("greeting").unwrap();

    let weak = state.create_table();
    let mode = state.create_table();
    let v = str_value(&mut state, "v");
    set(&mut state, mode, "__mode", v).unwrap();
    state
        .vm_mut()
        .set_metatable(weak, mode.as_table_id())
        .unwrap();
    let held = str_value(&mut state, "weakly held");
    set(&mut state, weak, "s", held).unwrap();
    state.push_value(weak);
    state.set_global("cache").unwrap();

    state.full_gc();
    assert_eq!(state.to_str(-1), Some("on the stack"));
    assert_eq!(
        state.get_global::<String>("greeting").unwrap(),
        "in a global"
    );
    // strings are values, weak tables keep them
    let s = get(&mut state, weak, "s").unwrap();
    assert_eq!(as_string(&state, s), "weakly held");
}

#[test]
fn test_string_interned_again_after_free() {
    let mut state = new_state();
    state.push_string("transient");
    state.pop(1);
    state.full_gc();
    let before = state.vm().pool.string_count();

    let a = str_value(&mut state, "transient");
    let b = str_value(&mut state, "transient");
    assert_eq!(a, b);
    assert_eq!(as_string(&state, a), "transient");
    assert_eq!(state.vm().pool.string_count(), before + 1);
}

#[test]
fn test_double_unreference_frees_once() {
    let mut table = LuaTable::new();
    let a = table.reference(LuaValue::Integer(1));
    table.unreference(a);
    table.unreference(a);
    assert_eq!(table.free_ref_count(), 1);

    let b = table.reference(LuaValue::Integer(2));
    let c = table.reference(LuaValue::Integer(3));
    assert_eq!(b, a);
    assert_ne!(b, c);
    assert_eq!(table.free_ref_count(), 0);

    // ids never handed out are ignored
    table.unreference(0);
    table.unreference(c + 10);
    assert_eq!(table.free_ref_count(), 0);
}
