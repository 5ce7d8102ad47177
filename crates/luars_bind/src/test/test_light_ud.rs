// Tagged light userdata packing and parity with full userdata
use super::fixtures::*;
use crate::lua_value::LuaValue;
use crate::lua_vm::LuaError;
use crate::state::State;
use crate::types::{LIGHT_UD_ENABLED, is_tagged};

#[test]
fn test_declared_pointer_is_packed() {
    if !LIGHT_UD_ENABLED {
        return;
    }
    let mut state = new_state();
    let mut base = Base { id: 5 };
    let x = push_ptr(&mut state, &mut base);
    let word = x.as_light_userdata().unwrap();
    assert!(is_tagged(word));

    // same pointer, same static type: same word
    assert_eq!(push_ptr(&mut state, &mut base), x);
    assert_eq!(state.cache_len(), 0);

    let id = get(&mut state, x, "id").unwrap();
    assert_eq!(id, LuaValue::Integer(5));
    set(&mut state, x, "id", LuaValue::Integer(6)).unwrap();
    assert_eq!(base.id, 6);
}

#[test]
fn test_option_disables_packing() {
    let mut state = full_state();
    let mut base = Base { id: 1 };
    let x = push_ptr(&mut state, &mut base);
    assert!(matches!(x, LuaValue::Userdata(_)));
    assert_eq!(state.cache_len(), 1);
}

#[test]
fn test_foreign_light_userdata_is_not_an_object() {
    let mut state = new_state();
    let foreign = LuaValue::LightUserdata(0x1000);
    state.push_value(foreign);
    assert!(state.load_ptr::<Base>(-1).is_none());
    assert!(state.arg_ptr::<Base>(-1).is_err());
    state.pop(1);
    assert_eq!(type_of(&mut state, foreign), "userdata");
}

#[test]
fn test_weak_word_is_shared_by_the_hierarchy() {
    if !LIGHT_UD_ENABLED {
        return;
    }
    let mut state = new_state();
    let mut pawn = Box::new(Pawn::new("p", 3));
    let as_actor = push_ptr(&mut state, &mut pawn.actor);
    let as_pawn = push_ptr(&mut state, &mut *pawn);
    assert_eq!(as_actor, as_pawn);
    assert_eq!(type_of(&mut state, as_actor), "Pawn");
    assert_eq!(get(&mut state, as_actor, "hp").unwrap(), LuaValue::Integer(3));
}

fn scenario_b(state: &mut State) -> (String, String, bool, bool) {
    let mut derived = Derived {
        base: Base { id: 9 },
        extra: 4,
    };
    let x = push_ptr(state, &mut derived.base);
    let before = type_of(state, x);
    let down = cast(state, x, "Derived").unwrap();
    let after = type_of(state, down);
    let extra_ok = get(state, down, "extra").unwrap() == LuaValue::Integer(4);
    let rejected = matches!(cast(state, x, "Other"), Err(LuaError::InvalidCast { .. }));
    let valid = is_valid(state, x) && is_valid(state, down);
    (before, after, extra_ok && valid, rejected)
}

#[test]
fn test_scenario_b_packing_parity() {
    let packed = scenario_b(&mut new_state());
    let full = scenario_b(&mut full_state());
    assert_eq!(packed, full);
    assert_eq!(
        full,
        ("Base".to_owned(), "Derived".to_owned(), true, true)
    );
}

#[test]
fn test_null_pointer_pushes_nil() {
    for mut state in [new_state(), full_state()] {
        let x = push_ptr::<Base>(&mut state, std::ptr::null_mut());
        assert_eq!(x, LuaValue::Nil);
        assert!(!is_valid(&mut state, x));
    }
}

#[cfg(not(feature = "light-ud"))]
#[test]
fn test_packing_compiled_out() {
    assert!(!LIGHT_UD_ENABLED);
    assert!(!is_tagged(0x0100_0000_0000_1000));
    let mut state = new_state();
    assert!(!state.light_enabled());

    let mut base = Base { id: 1 };
    let x = push_ptr(&mut state, &mut base);
    assert!(matches!(x, LuaValue::Userdata(_)));
    assert_eq!(state.cache_len(), 1);
    assert_eq!(
        scenario_b(&mut state),
        ("Base".to_owned(), "Derived".to_owned(), true, true)
    );
}
