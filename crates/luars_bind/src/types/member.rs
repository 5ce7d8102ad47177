use std::ptr::NonNull;
use std::rc::Rc;

use crate::lua_value::{NativeCallable, NativeFn};
use crate::lua_vm::LuaResult;
use crate::state::State;

/// Pushes the value of a field; the pointer refers to the declaring type.
pub type VarGetter = Rc<dyn Fn(&mut State, NonNull<u8>) -> LuaResult<()>>;

/// Reads the value at the given stack index into a field.
pub type VarSetter = Rc<dyn Fn(&mut State, NonNull<u8>, i32) -> LuaResult<()>>;

#[derive(Clone)]
pub enum Member {
    Var {
        getter: Option<VarGetter>,
        setter: Option<VarSetter>,
    },
    /// Called with the object as argument 1.
    Func(NativeCallable),
}

impl Member {
    pub fn func(f: NativeFn) -> Self {
        Member::Func(NativeCallable::Fn(f))
    }

    pub fn is_var(&self) -> bool {
        matches!(self, Member::Var { .. })
    }
}
