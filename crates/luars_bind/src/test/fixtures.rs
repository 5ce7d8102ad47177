// Shared types and helpers for the binding tests

use std::any::TypeId;
use std::cell::Cell;
use std::mem::offset_of;
use std::rc::Rc;

use crate::lua_value::LuaValue;
use crate::lua_vm::{BindOption, LuaResult};
use crate::state::State;
use crate::types::{Declared, Inherit, Inherits, Registry, WeakAnchor, WeakObjProc, WeakObject};

// ==================== Plain hierarchy ====================

#[repr(C)]
pub struct Base {
    pub id: i32,
}

impl Declared for Base {
    const NAME: &'static str = "Base";
}

/// Base embedded first: same address for both views.
#[repr(C)]
pub struct Derived {
    pub base: Base,
    pub extra: i32,
}

impl Declared for Derived {
    const NAME: &'static str = "Derived";

    fn inherit() -> Option<Inherit> {
        Some(Inherit::of::<Derived, Base>())
    }
}

unsafe impl Inherits<Base> for Derived {
    const OFFSET: usize = offset_of!(Derived, base);
}

/// Base embedded after other data: the views differ in address.
#[cfg(feature = "multi-inherit")]
#[repr(C)]
pub struct Shifted {
    pub pad: [u64; 2],
    pub base: Base,
}

#[cfg(feature = "multi-inherit")]
impl Declared for Shifted {
    const NAME: &'static str = "Shifted";

    fn inherit() -> Option<Inherit> {
        Some(Inherit::of::<Shifted, Base>())
    }
}

#[cfg(feature = "multi-inherit")]
unsafe impl Inherits<Base> for Shifted {
    const OFFSET: usize = offset_of!(Shifted, base);
}

/// Same layout as `Base`, unrelated type.
#[repr(C)]
pub struct Other {
    pub id: i32,
}

impl Declared for Other {
    const NAME: &'static str = "Other";
}

// ==================== Polymorphic hierarchy ====================

#[repr(C)]
pub struct Shape {
    pub kind: TypeId,
}

impl Declared for Shape {
    const NAME: &'static str = "Shape";

    fn dynamic_type(&self) -> Option<TypeId> {
        Some(self.kind)
    }
}

#[repr(C)]
pub struct Circle {
    pub shape: Shape,
    pub radius: f64,
}

impl Circle {
    pub fn new(radius: f64) -> Self {
        Circle {
            shape: Shape {
                kind: TypeId::of::<Circle>(),
            },
            radius,
        }
    }
}

impl Declared for Circle {
    const NAME: &'static str = "Circle";

    fn inherit() -> Option<Inherit> {
        Some(Inherit::of::<Circle, Shape>())
    }
}

unsafe impl Inherits<Shape> for Circle {
    const OFFSET: usize = offset_of!(Circle, shape);
}

#[repr(C)]
pub struct Square {
    pub shape: Shape,
    pub side: f64,
}

impl Declared for Square {
    const NAME: &'static str = "Square";

    fn inherit() -> Option<Inherit> {
        Some(Inherit::of::<Square, Shape>())
    }
}

unsafe impl Inherits<Shape> for Square {
    const OFFSET: usize = offset_of!(Square, shape);
}

// ==================== Weak hierarchy ====================

pub struct Actor {
    pub anchor: WeakAnchor,
    pub name: String,
}

impl Actor {
    pub fn new(name: &str) -> Self {
        Actor {
            anchor: WeakAnchor::new(),
            name: name.to_owned(),
        }
    }
}

impl WeakObject for Actor {
    fn weak_anchor(&self) -> &WeakAnchor {
        &self.anchor
    }
}

impl Declared for Actor {
    const NAME: &'static str = "Actor";

    fn weak_proc() -> Option<WeakObjProc> {
        Some(WeakObjProc::of::<Actor>())
    }
}

#[repr(C)]
pub struct Pawn {
    pub actor: Actor,
    pub hp: i32,
}

impl Pawn {
    pub fn new(name: &str, hp: i32) -> Self {
        Pawn {
            actor: Actor::new(name),
            hp,
        }
    }
}

impl Declared for Pawn {
    const NAME: &'static str = "Pawn";

    fn inherit() -> Option<Inherit> {
        Some(Inherit::of::<Pawn, Actor>())
    }
}

unsafe impl Inherits<Actor> for Pawn {
    const OFFSET: usize = offset_of!(Pawn, actor);
}

// ==================== Drop counting ====================

pub struct Counted {
    pub drops: Rc<Cell<usize>>,
}

impl Drop for Counted {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

impl Declared for Counted {
    const NAME: &'static str = "Counted";
}

// ==================== Helpers ====================

pub fn registry() -> Rc<Registry> {
    let mut builder = Registry::builder();
    builder
        .alloc_type::<Base>()
        .add_var("id", |b| b.id, |b, v| b.id = v)
        .add_method("GetId", |b, state| state.push(b.id))
        .finalize();
    builder
        .alloc_type::<Derived>()
        .add_var("extra", |d| d.extra, |d, v| d.extra = v)
        .finalize();
    #[cfg(feature = "multi-inherit")]
    builder.alloc_type::<Shifted>().finalize();
    builder.alloc_type::<Other>().finalize();
    builder.alloc_type::<Shape>().finalize();
    builder
        .alloc_type::<Circle>()
        .add_getter("radius", |c| c.radius)
        .finalize();
    builder.alloc_type::<Square>().finalize();
    builder
        .alloc_type::<Actor>()
        .add_var("name", |a| a.name.clone(), |a, v| a.name = v)
        .finalize();
    builder
        .alloc_type::<Pawn>()
        .add_getter("hp", |p| p.hp)
        .finalize();
    builder.alloc_type::<Counted>().finalize();
    builder.build()
}

/// State with the default options (light packing when compiled in).
pub fn new_state() -> State {
    State::new(registry(), BindOption::default()).unwrap()
}

/// State that always uses full userdata.
pub fn full_state() -> State {
    State::new(registry(), BindOption::without_light_userdata()).unwrap()
}

pub fn get(state: &mut State, obj: LuaValue, name: &str) -> LuaResult<LuaValue> {
    let key = state.vm_mut().create_string(name);
    state.index_value(obj, key)
}

pub fn set(state: &mut State, obj: LuaValue, name: &str, value: LuaValue) -> LuaResult<()> {
    let key = state.vm_mut().create_string(name);
    state.new_index_value(obj, key, value)
}

/// Call `bind.<name>(args...)`.
pub fn lib(state: &mut State, name: &str, args: &[LuaValue]) -> LuaResult<Vec<LuaValue>> {
    state.load_global(&format!("bind.{}", name))?;
    let func = state.pop_value();
    state.call_function(func, args)
}

pub fn str_value(state: &mut State, s: &str) -> LuaValue {
    state.vm_mut().create_string(s)
}

pub fn as_string(state: &State, value: LuaValue) -> String {
    state
        .vm()
        .get_str(value)
        .map(|s| s.to_string())
        .unwrap_or_default()
}

/// `bind.Type(obj)` as a Rust string.
pub fn type_of(state: &mut State, obj: LuaValue) -> String {
    let result = lib(state, "Type", &[obj]).unwrap();
    as_string(state, result[0])
}

pub fn is_valid(state: &mut State, obj: LuaValue) -> bool {
    lib(state, "IsValid", &[obj]).unwrap()[0] == LuaValue::Boolean(true)
}

/// `bind.Cast(obj, name)`, first result.
pub fn cast(state: &mut State, obj: LuaValue, name: &str) -> LuaResult<LuaValue> {
    let name = str_value(state, name);
    Ok(lib(state, "Cast", &[obj, name])?[0])
}

/// Push a borrowed object and pop it back as a value.
pub fn push_ptr<T: Declared>(state: &mut State, ptr: *mut T) -> LuaValue {
    unsafe { state.push_ptr(ptr) }.unwrap();
    state.pop_value()
}

/// Collect `(key, value)` pairs through `__pairs`.
pub fn pairs(state: &mut State, obj: LuaValue) -> Vec<(LuaValue, LuaValue)> {
    let (next, st, mut key) = state.pairs_value(obj).unwrap();
    let mut out = Vec::new();
    loop {
        let results = state.call_function(next, &[st, key]).unwrap();
        let k = results.first().copied().unwrap_or_default();
        if k.is_nil() {
            return out;
        }
        let v = results.get(1).copied().unwrap_or_default();
        out.push((k, v));
        key = k;
    }
}
