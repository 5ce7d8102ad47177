// Value representation of the host stack
// 16 bytes, every collectable object is addressed by ID
mod lua_function;
mod lua_table;
mod lua_userdata;

use crate::gc::{FunctionId, StringId, TableId, UserdataId};

pub use lua_function::{LuaFunction, NativeCallable, NativeClosure, NativeFn};
pub use lua_table::LuaTable;
pub(crate) use lua_table::TableKey;
pub use lua_userdata::LuaUserdata;

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum LuaValue {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(StringId),
    Table(TableId),
    Function(FunctionId),
    /// Raw machine word; may carry a packed declared pointer.
    LightUserdata(u64),
    Userdata(UserdataId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LuaValueKind {
    Nil,
    Boolean,
    Number,
    String,
    Table,
    Function,
    LightUserdata,
    Userdata,
}

impl LuaValueKind {
    pub fn name(self) -> &'static str {
        match self {
            LuaValueKind::Nil => "nil",
            LuaValueKind::Boolean => "boolean",
            LuaValueKind::Number => "number",
            LuaValueKind::String => "string",
            LuaValueKind::Table => "table",
            LuaValueKind::Function => "function",
            LuaValueKind::LightUserdata | LuaValueKind::Userdata => "userdata",
        }
    }
}

impl LuaValue {
    #[inline(always)]
    pub fn kind(&self) -> LuaValueKind {
        match self {
            LuaValue::Nil => LuaValueKind::Nil,
            LuaValue::Boolean(_) => LuaValueKind::Boolean,
            LuaValue::Integer(_) | LuaValue::Number(_) => LuaValueKind::Number,
            LuaValue::String(_) => LuaValueKind::String,
            LuaValue::Table(_) => LuaValueKind::Table,
            LuaValue::Function(_) => LuaValueKind::Function,
            LuaValue::LightUserdata(_) => LuaValueKind::LightUserdata,
            LuaValue::Userdata(_) => LuaValueKind::Userdata,
        }
    }

    #[inline(always)]
    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    #[inline(always)]
    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    /// Lua truthiness: only nil and false are false.
    #[inline(always)]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, LuaValue::Nil | LuaValue::Boolean(false))
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            LuaValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view; floats with an exact integer value convert.
    pub fn as_integer(&self) -> Option<i64> {
        match *self {
            LuaValue::Integer(i) => Some(i),
            LuaValue::Number(n) if n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64 => {
                Some(n as i64)
            }
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match *self {
            LuaValue::Integer(i) => Some(i as f64),
            LuaValue::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_table_id(&self) -> Option<TableId> {
        match self {
            LuaValue::Table(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_function_id(&self) -> Option<FunctionId> {
        match self {
            LuaValue::Function(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_userdata_id(&self) -> Option<UserdataId> {
        match self {
            LuaValue::Userdata(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_light_userdata(&self) -> Option<u64> {
        match self {
            LuaValue::LightUserdata(word) => Some(*word),
            _ => None,
        }
    }

    /// Identity comparison, the equivalent of `rawequal`.
    pub fn raw_equal(&self, other: &LuaValue) -> bool {
        match (self, other) {
            (LuaValue::Integer(a), LuaValue::Number(b)) | (LuaValue::Number(b), LuaValue::Integer(a)) => {
                *a as f64 == *b
            }
            _ => self == other,
        }
    }
}
