// Native object binding layer
// Exposes native objects, weak objects and containers to an embedded Lua
// style VM with one script object per native identity

#[cfg(test)]
mod test;

pub mod collection;
pub mod gc;
pub mod lua_convert;
pub mod lua_value;
pub mod lua_vm;
pub mod state;
pub mod types;
pub mod userdata;

pub use collection::{Collection, CollectionVTable, MapLike, Sequence};
pub use lua_convert::{FromLua, FromLuaMulti, IntoLua, IntoLuaMulti, Storable};
pub use lua_value::{LuaValue, NativeFn};
pub use lua_vm::{BindOption, LuaError, LuaResult, ObjRef, RegisterError, StackGuard};
pub use state::State;
pub use types::{
    Declared, DescId, Inherit, Inherits, Registry, RegistryBuilder, WeakAnchor, WeakObjProc, WeakObject,
};
