// ============ Object IDs ============
// All IDs are simple u32 indices into the object pool

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[repr(transparent)]
pub struct StringId(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[repr(transparent)]
pub struct TableId(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[repr(transparent)]
pub struct FunctionId(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[repr(transparent)]
pub struct UserdataId(pub u32);

/// Collectable object identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum GcId {
    TableId(TableId),
    FunctionId(FunctionId),
    UserdataId(UserdataId),
}
