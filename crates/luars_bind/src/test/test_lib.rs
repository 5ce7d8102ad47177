// Script library table: Type, IsValid, Cast and GetTypeMeta
use super::fixtures::*;
use crate::lua_value::LuaValue;
use crate::lua_vm::{BindOption, LuaError};
use crate::state::State;

#[test]
fn test_type_of_plain_values() {
    let mut state = new_state();
    assert_eq!(type_of(&mut state, LuaValue::Integer(1)), "number");
    assert_eq!(type_of(&mut state, LuaValue::Nil), "nil");
    let t = state.create_table();
    assert_eq!(type_of(&mut state, t), "table");

    assert!(!is_valid(&mut state, LuaValue::Nil));
    assert!(is_valid(&mut state, LuaValue::Boolean(false)));
}

#[test]
fn test_get_type_meta() {
    let mut state = new_state();
    let name = str_value(&mut state, "Derived");
    let meta = lib(&mut state, "GetTypeMeta", &[name]).unwrap()[0];
    assert!(matches!(meta, LuaValue::Table(_)));

    // methods are installed on the metatable, inherited ones included
    let method = get(&mut state, meta, "GetId").unwrap();
    assert!(matches!(method, LuaValue::Function(_)));
    let type_name = get(&mut state, meta, "__name").unwrap();
    assert_eq!(as_string(&state, type_name), "Derived");

    let unknown = str_value(&mut state, "Nope");
    assert_eq!(lib(&mut state, "GetTypeMeta", &[unknown]).unwrap(), vec![LuaValue::Nil]);
}

#[test]
fn test_cast_argument_errors() {
    let mut state = full_state();
    let mut base = Base { id: 1 };
    let x = push_ptr(&mut state, &mut base);

    assert!(matches!(
        cast(&mut state, x, "Nope"),
        Err(LuaError::Runtime(_))
    ));
    assert_eq!(
        lib(&mut state, "Cast", &[x, LuaValue::Integer(1)]).unwrap_err(),
        LuaError::TypeMismatch {
            arg: 2,
            expected: "string".into(),
            actual: "number".into(),
        }
    );
    assert_eq!(cast(&mut state, LuaValue::Nil, "Base").unwrap(), LuaValue::Nil);
    assert!(matches!(
        cast(&mut state, LuaValue::Integer(3), "Base"),
        Err(LuaError::InvalidCast { .. })
    ));
}

#[test]
fn test_tostring_names_the_type() {
    let mut state = full_state();
    let mut base = Base { id: 1 };
    let x = push_ptr(&mut state, &mut base);
    let handler = state.vm().get_metafield(x, "__tostring");
    let text = state.call_function(handler, &[x]).unwrap()[0];
    assert!(as_string(&state, text).starts_with("Base: "));
}

#[test]
fn test_custom_library_name() {
    let option = BindOption {
        lib_name: "native".into(),
        ..Default::default()
    };
    let mut state = State::new(registry(), option).unwrap();

    state.load_global("native.Type").unwrap();
    assert!(matches!(state.pop_value(), LuaValue::Function(_)));
    state.load_global("bind").unwrap();
    assert_eq!(state.pop_value(), LuaValue::Nil);
}
