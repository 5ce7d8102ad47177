//! `FromLua` and `IntoLua`: conversion of plain values across the boundary.
//!
//! Declared types, weak objects and collections have dedicated push/load
//! entry points on `State`; these traits cover the primitive table used by
//! member accessors and collection elements.
//!
//! # Built-in impls
//! - `()`, `bool`, `i8`..`i64`, `u8`..`u64`, `f32`, `f64`
//! - `String`, `&str`, `SmolStr`
//! - `Option<T>`
//! - `LuaValue` (passthrough, not `Storable`)
//! - tuples up to eight elements, as multiple values
//!
//! `from_lua` is strict: it is also the validation step run before a
//! collection is mutated, so it must not accept a value it cannot store.

use smol_str::SmolStr;

use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaError, LuaResult};
use crate::state::State;

/// Convert a `LuaValue` into a Rust type.
///
/// Return `Err(message)` for type mismatches.
pub trait FromLua: Sized {
    fn from_lua(value: LuaValue, state: &State) -> Result<Self, String>;
}

/// Push a Rust value onto the stack, returning the number of values pushed.
pub trait IntoLua {
    fn into_lua(self, state: &mut State) -> LuaResult<usize>;
}

/// Value that can live in native memory: collection elements and member
/// fields. It owns its data and holds no script heap id, so a collection
/// cycle never leaves it pointing at a reused slot.
///
/// `LuaValue` is not `Storable`; pin script objects with `ObjRef` instead.
pub trait Storable: FromLua + IntoLua + Clone + 'static {}

impl Storable for bool {}
impl Storable for String {}
impl Storable for SmolStr {}
impl<T: Storable> Storable for Option<T> {}

// ==================== Identity: LuaValue ====================

impl FromLua for LuaValue {
    #[inline]
    fn from_lua(value: LuaValue, _state: &State) -> Result<Self, String> {
        Ok(value)
    }
}

impl IntoLua for LuaValue {
    #[inline]
    fn into_lua(self, state: &mut State) -> LuaResult<usize> {
        state.push_value(self);
        Ok(1)
    }
}

// ==================== Unit ====================

impl IntoLua for () {
    #[inline]
    fn into_lua(self, _state: &mut State) -> LuaResult<usize> {
        Ok(0)
    }
}

// ==================== Boolean ====================

impl FromLua for bool {
    #[inline]
    fn from_lua(value: LuaValue, _state: &State) -> Result<Self, String> {
        value
            .as_boolean()
            .ok_or_else(|| format!("expected boolean, got {}", value.type_name()))
    }
}

impl IntoLua for bool {
    #[inline]
    fn into_lua(self, state: &mut State) -> LuaResult<usize> {
        state.push_value(LuaValue::Boolean(self));
        Ok(1)
    }
}

// ==================== Integer types ====================

macro_rules! impl_lua_int {
    ($($ty:ty),*) => {
        $(
            impl FromLua for $ty {
                #[inline]
                fn from_lua(value: LuaValue, _state: &State) -> Result<Self, String> {
                    let Some(i) = value.as_integer() else {
                        return Err(match value {
                            LuaValue::Number(_) => "number has no integer representation".to_owned(),
                            _ => format!("expected integer, got {}", value.type_name()),
                        });
                    };
                    <$ty>::try_from(i).map_err(|_| format!("integer {} out of range for {}", i, stringify!($ty)))
                }
            }

            impl IntoLua for $ty {
                #[inline]
                fn into_lua(self, state: &mut State) -> LuaResult<usize> {
                    let i = i64::try_from(self).map_err(|_| {
                        LuaError::Runtime(format!("{} {} does not fit in an integer", stringify!($ty), self))
                    })?;
                    state.push_value(LuaValue::Integer(i));
                    Ok(1)
                }
            }

            impl Storable for $ty {}
        )*
    };
}

impl_lua_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

// ==================== Float types ====================

macro_rules! impl_lua_float {
    ($($ty:ty),*) => {
        $(
            impl FromLua for $ty {
                #[inline]
                fn from_lua(value: LuaValue, _state: &State) -> Result<Self, String> {
                    value
                        .as_number()
                        .map(|n| n as $ty)
                        .ok_or_else(|| format!("expected number, got {}", value.type_name()))
                }
            }

            impl IntoLua for $ty {
                #[inline]
                fn into_lua(self, state: &mut State) -> LuaResult<usize> {
                    state.push_value(LuaValue::Number(self as f64));
                    Ok(1)
                }
            }

            impl Storable for $ty {}
        )*
    };
}

impl_lua_float!(f32, f64);

// ==================== String ====================

impl FromLua for String {
    #[inline]
    fn from_lua(value: LuaValue, state: &State) -> Result<Self, String> {
        SmolStr::from_lua(value, state).map(String::from)
    }
}

impl FromLua for SmolStr {
    fn from_lua(value: LuaValue, state: &State) -> Result<Self, String> {
        match value {
            LuaValue::String(_) => state
                .vm()
                .get_str(value)
                .cloned()
                .ok_or_else(|| "invalid string".to_owned()),
            // Lua coerces numbers to strings
            LuaValue::Integer(i) => Ok(SmolStr::new(itoa::Buffer::new().format(i))),
            LuaValue::Number(n) => Ok(SmolStr::new(n.to_string())),
            _ => Err(format!("expected string, got {}", value.type_name())),
        }
    }
}

impl IntoLua for String {
    #[inline]
    fn into_lua(self, state: &mut State) -> LuaResult<usize> {
        self.as_str().into_lua(state)
    }
}

impl IntoLua for SmolStr {
    #[inline]
    fn into_lua(self, state: &mut State) -> LuaResult<usize> {
        self.as_str().into_lua(state)
    }
}

impl IntoLua for &str {
    #[inline]
    fn into_lua(self, state: &mut State) -> LuaResult<usize> {
        state.push_string(self);
        Ok(1)
    }
}

// ==================== Option<T> ====================

impl<T: FromLua> FromLua for Option<T> {
    #[inline]
    fn from_lua(value: LuaValue, state: &State) -> Result<Self, String> {
        if value.is_nil() {
            Ok(None)
        } else {
            T::from_lua(value, state).map(Some)
        }
    }
}

impl<T: IntoLua> IntoLua for Option<T> {
    #[inline]
    fn into_lua(self, state: &mut State) -> LuaResult<usize> {
        match self {
            Some(v) => v.into_lua(state),
            None => {
                state.push_nil();
                Ok(1)
            }
        }
    }
}

// ==================== Multiple values ====================

/// Any number of values pushed in order: call arguments.
pub trait IntoLuaMulti {
    fn push_multi(self, state: &mut State) -> LuaResult<usize>;
}

/// A fixed number of consecutive stack values: call results.
pub trait FromLuaMulti: Sized {
    /// Values read, missing ones are nil.
    const COUNT: usize;

    fn from_multi(state: &State, first: i32) -> LuaResult<Self>;
}

impl<T: IntoLua> IntoLuaMulti for T {
    #[inline]
    fn push_multi(self, state: &mut State) -> LuaResult<usize> {
        self.into_lua(state)
    }
}

impl<T: FromLua> FromLuaMulti for T {
    const COUNT: usize = 1;

    #[inline]
    fn from_multi(state: &State, first: i32) -> LuaResult<Self> {
        value_at::<T>(state, first, 0)
    }
}

impl FromLuaMulti for () {
    const COUNT: usize = 0;

    #[inline]
    fn from_multi(_state: &State, _first: i32) -> LuaResult<Self> {
        Ok(())
    }
}

fn value_at<T: FromLua>(state: &State, first: i32, offset: i32) -> LuaResult<T> {
    T::from_lua(state.value_at(first + offset), state)
        .map_err(|msg| LuaError::Runtime(format!("bad value #{}: {}", offset + 1, msg)))
}

macro_rules! impl_lua_multi {
    ($($name:ident $idx:tt),+) => {
        impl<$($name: IntoLua),+> IntoLuaMulti for ($($name,)+) {
            fn push_multi(self, state: &mut State) -> LuaResult<usize> {
                let mut n = 0;
                $( n += self.$idx.into_lua(state)?; )+
                Ok(n)
            }
        }

        impl<$($name: FromLua),+> FromLuaMulti for ($($name,)+) {
            const COUNT: usize = [$($idx),+].len();

            fn from_multi(state: &State, first: i32) -> LuaResult<Self> {
                Ok(($(value_at::<$name>(state, first, $idx)?,)+))
            }
        }
    };
}

impl_lua_multi!(A 0);
impl_lua_multi!(A 0, B 1);
impl_lua_multi!(A 0, B 1, C 2);
impl_lua_multi!(A 0, B 1, C 2, D 3);
impl_lua_multi!(A 0, B 1, C 2, D 3, E 4);
impl_lua_multi!(A 0, B 1, C 2, D 3, E 4, F 5);
impl_lua_multi!(A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_lua_multi!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);
