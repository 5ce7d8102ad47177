//! Uniform indexing, length and iteration over native containers.
//!
//! Every container type gets one static [`CollectionVTable`]. Its entries
//! take the untyped container pointer and the state, and read their
//! arguments from the stack: `[1]` container, `[2]` key, `[3]` value.
//!
//! Sequences (`Vec`, `VecDeque`, `LinkedList`) use 1-based positions;
//! `NewIndex(len + 1, v)` appends, any other out of range position is an
//! error and nothing is mutated. Maps (`HashMap`, `BTreeMap`) key on the
//! native key type and `NewIndex(k, nil)` erases. Keys and values are
//! converted before the container is touched.

mod map;
mod sequence;

pub use map::MapLike;
pub use sequence::Sequence;

use std::any::TypeId;
use std::ptr::NonNull;

use smol_str::SmolStr;

use crate::lua_convert::FromLua;
use crate::lua_vm::{LuaError, LuaResult};
use crate::state::State;

pub type CollectionFn = unsafe fn(NonNull<u8>, &mut State) -> LuaResult<usize>;

/// Dispatcher bound to one container type.
pub struct CollectionVTable {
    pub name: fn() -> &'static str,
    pub type_id: fn() -> TypeId,
    pub index: CollectionFn,
    pub new_index: CollectionFn,
    pub insert: CollectionFn,
    pub remove: CollectionFn,
    pub length: unsafe fn(NonNull<u8>) -> usize,
    /// Pushes `(iterator_fn, state, initial_key)`.
    pub iterate: CollectionFn,
    pub clear: unsafe fn(NonNull<u8>),
}

impl CollectionVTable {
    /// Same container type; vtable addresses are not unique across
    /// codegen units, the type id is.
    pub fn is<C: Collection>(&self) -> bool {
        (self.type_id)() == TypeId::of::<C>()
    }
}

/// Container that can be pushed to scripts.
pub trait Collection: 'static {
    const VTABLE: &'static CollectionVTable;
}

/// Convert stack argument `arg` for a container operation.
pub(crate) fn check_arg<T: FromLua>(state: &State, arg: i32, container: &str, what: &str) -> LuaResult<T> {
    let value = state.value_at(arg);
    T::from_lua(value, state).map_err(|msg| LuaError::Runtime(format!("bad {} for {}: {}", what, container, msg)))
}

/// 1-based position argument.
pub(crate) fn check_position(state: &State, arg: i32) -> LuaResult<i64> {
    let value = state.value_at(arg);
    value.as_integer().ok_or_else(|| LuaError::TypeMismatch {
        arg,
        expected: SmolStr::new_static("integer"),
        actual: SmolStr::new_static(value.type_name()),
    })
}
