// Weak object table and native destruction observed from scripts
use std::ptr::NonNull;

use super::fixtures::*;
use crate::lua_value::LuaValue;
use crate::lua_vm::LuaError;
use crate::types::{DescId, WeakTable};

#[test]
fn test_weak_table_serial_changes_on_reuse() {
    let mut table = WeakTable::new();
    let ptr = NonNull::<u8>::dangling();
    let first = table.alloc(ptr, DescId(0));
    assert_eq!(table.resolve(first), Some((ptr, DescId(0))));
    assert_eq!(table.live_count(), 1);

    table.free(first.index);
    assert_eq!(table.resolve(first), None);
    assert_eq!(table.live_count(), 0);

    let second = table.alloc(ptr, DescId(1));
    assert_eq!(second.index, first.index);
    assert_ne!(second.serial, first.serial);
    assert_eq!(table.resolve(first), None);
    assert_eq!(table.resolve(second), Some((ptr, DescId(1))));
    assert_eq!(table.serial(second.index), second.serial);
}

#[test]
fn test_weak_table_narrow_resolve() {
    let mut table = WeakTable::new();
    let ptr = NonNull::<u8>::dangling();
    let r = table.alloc(ptr, DescId(3));
    let (p, desc, full) = table.resolve_narrow(r.index, r.serial as u32).unwrap();
    assert_eq!((p, desc, full), (ptr, DescId(3), r));
    assert!(table.resolve_narrow(r.index, r.serial as u32 + 1).is_none());
}

#[test]
fn test_anchor_releases_slot_on_drop() {
    let mut state = new_state();
    let mut actor = Box::new(Actor::new("a"));
    push_ptr(&mut state, &mut *actor);
    assert_eq!(state.registry().weak_live_count(), 1);
    assert!(actor.anchor.index().is_some());

    drop(actor);
    assert_eq!(state.registry().weak_live_count(), 0);
}

#[test]
fn test_same_weak_object_keeps_one_slot() {
    let mut state = full_state();
    let mut pawn = Box::new(Pawn::new("p", 10));
    let as_actor = push_ptr(&mut state, &mut pawn.actor);
    let as_pawn = push_ptr(&mut state, &mut *pawn);

    assert_eq!(state.registry().weak_live_count(), 1);
    // one script object, upgraded to the derived view
    assert_eq!(as_actor, as_pawn);
    assert_eq!(type_of(&mut state, as_actor), "Pawn");
}

fn scenario_a(mut state: crate::state::State) {
    let mut actor = Box::new(Actor::new("hero"));
    let x = push_ptr(&mut state, &mut *actor);
    state.push_value(x);
    state.set_global("x").unwrap();

    let name = get(&mut state, x, "name").unwrap();
    assert_eq!(as_string(&state, name), "hero");
    assert!(is_valid(&mut state, x));

    drop(actor);

    state.load_global("x").unwrap();
    let x = state.pop_value();
    assert!(!is_valid(&mut state, x));
    assert_eq!(type_of(&mut state, x), "nil");
    let err = get(&mut state, x, "name").unwrap_err();
    assert_eq!(
        err,
        LuaError::NilObject {
            type_name: "Actor".into(),
            member: "name".into(),
        }
    );
    let err = set(&mut state, x, "name", LuaValue::Nil).unwrap_err();
    assert!(matches!(err, LuaError::NilObject { .. }));
    // stale objects cast to nil
    assert_eq!(cast(&mut state, x, "Pawn").unwrap(), LuaValue::Nil);
}

#[test]
fn test_scenario_a_destroyed_weak_object() {
    scenario_a(new_state());
}

#[test]
fn test_scenario_a_destroyed_weak_object_full_userdata() {
    scenario_a(full_state());
}

#[test]
fn test_reused_slot_does_not_resolve_old_handle() {
    let mut state = full_state();
    let mut first = Box::new(Actor::new("first"));
    let old = push_ptr(&mut state, &mut *first);
    state.push_value(old);
    let old_index = first.anchor.index();
    drop(first);

    let mut second = Box::new(Actor::new("second"));
    let new = push_ptr(&mut state, &mut *second);
    assert_eq!(second.anchor.index(), old_index);
    assert_ne!(old, new);

    assert!(!is_valid(&mut state, old));
    let name = get(&mut state, new, "name").unwrap();
    assert_eq!(as_string(&state, name), "second");
}
