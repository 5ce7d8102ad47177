use std::any::Any;

use super::LuaValue;
use crate::gc::TableId;

/// Host heap cell backing a full userdata.
///
/// The payload is opaque to the host; the binding layer stores its own
/// tagged `FullUd` record here.
pub struct LuaUserdata {
    data: Box<dyn Any>,
    pub(crate) metatable: Option<TableId>,
    /// Value kept alive as long as the userdata is (Lua 5.4 user value).
    pub(crate) user_value: LuaValue,
    /// Set once the `__gc` finalizer has been scheduled.
    pub(crate) finalized: bool,
}

impl LuaUserdata {
    pub fn new<T: Any>(data: T) -> Self {
        LuaUserdata {
            data: Box::new(data),
            metatable: None,
            user_value: LuaValue::Nil,
            finalized: false,
        }
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }

    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.data.downcast_mut::<T>()
    }

    pub fn metatable(&self) -> Option<TableId> {
        self.metatable
    }
}
