use std::rc::Rc;

use smol_str::SmolStr;

use crate::lua_vm::LuaResult;
use crate::state::State;

/// Native function: arguments start at stack index 1 of the new frame, the
/// return value is the number of results left on top of the stack.
pub type NativeFn = fn(&mut State) -> LuaResult<usize>;

/// Native closure with captured environment.
pub type NativeClosure = Rc<dyn Fn(&mut State) -> LuaResult<usize>>;

#[derive(Clone)]
pub enum NativeCallable {
    Fn(NativeFn),
    Closure(NativeClosure),
}

impl NativeCallable {
    #[inline]
    pub(crate) fn invoke(&self, state: &mut State) -> LuaResult<usize> {
        match self {
            NativeCallable::Fn(f) => f(state),
            NativeCallable::Closure(f) => f(state),
        }
    }
}

pub struct LuaFunction {
    pub(crate) callable: NativeCallable,
    /// Name used in error messages, empty when anonymous.
    pub(crate) name: SmolStr,
}

impl LuaFunction {
    pub fn new(callable: NativeCallable, name: impl Into<SmolStr>) -> Self {
        LuaFunction {
            callable,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
