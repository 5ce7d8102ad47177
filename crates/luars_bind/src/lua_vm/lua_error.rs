use smol_str::SmolStr;
use thiserror::Error;

/// Errors raised while running native code on behalf of a script.
///
/// Every native function returns `LuaResult`, so a failure travels back
/// through `State::call` like a script error and `State::pcall` observes it
/// without unwinding native frames.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LuaError {
    #[error("{0}")]
    Runtime(String),

    #[error("bad argument #{arg}: '{expected}' expected, got '{actual}'")]
    TypeMismatch {
        arg: i32,
        expected: SmolStr,
        actual: SmolStr,
    },

    #[error("cannot cast '{from}' to '{to}'")]
    InvalidCast { from: SmolStr, to: SmolStr },

    #[error("attempt to access member '{member}' of a nil '{type_name}' object")]
    NilObject { type_name: SmolStr, member: SmolStr },

    #[error("'{type_name}' has no member '{member}'")]
    UnknownMember { type_name: SmolStr, member: SmolStr },

    #[error("member '{member}' of '{type_name}' is read only")]
    ReadOnly { type_name: SmolStr, member: SmolStr },

    #[error("{container} index {index} is out of range [1, {len}]")]
    OutOfRange {
        container: &'static str,
        index: i64,
        len: usize,
    },

    #[error("attempt to {op} a {type_name} value")]
    BadOperand { op: &'static str, type_name: SmolStr },

    #[error("stack overflow")]
    StackOverflow,

    #[error("native panic: {0}")]
    NativePanic(String),
}

impl LuaError {
    pub fn runtime(msg: impl Into<String>) -> Self {
        LuaError::Runtime(msg.into())
    }
}

pub type LuaResult<T> = Result<T, LuaError>;

/// Conflicts detected while populating the type registry.
///
/// These are reported through `log::warn!` and kept on the builder; the
/// existing definition always wins and registration carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("type:[{type_name}] export same member:[{member}]")]
    DuplicateMember { type_name: SmolStr, member: SmolStr },

    #[error("type:[{type_name}] is already finalized")]
    ReExport { type_name: SmolStr },

    #[error("type name [{type_name}] is already used by another type")]
    DuplicateName { type_name: SmolStr },

    #[error("no light userdata slot left for type:[{type_name}]")]
    SlotsExhausted { type_name: SmolStr },
}
