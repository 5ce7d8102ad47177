// Metamethods of declared objects and collections, the script library
// table and the userdata finalizer

use std::ptr::NonNull;

use smol_str::SmolStr;

use super::State;
use super::load::Resolved;
use crate::collection::CollectionVTable;
use crate::gc::UserdataId;
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaError, LuaResult};
use crate::types::{DescId, Member};
use crate::userdata::{UdKind, UdMinor, UdTarget, remove_owned};

/// Var member `name` of `desc` or of the nearest base declaring it, plus
/// the declaring type.
fn find_member(state: &State, desc: DescId, name: &str) -> Option<(DescId, Member)> {
    let mut cur = Some(desc);
    while let Some(id) = cur {
        let d = state.registry.get(id)?;
        if let Some(member) = d.member(name) {
            return Some((id, member.clone()));
        }
        cur = d.super_id();
    }
    None
}

fn key_name(state: &State, idx: i32) -> Option<SmolStr> {
    state.vm.get_str(state.value_at(idx)).cloned()
}

/// `__index(obj, key)`
pub(crate) fn meta_index(state: &mut State) -> LuaResult<usize> {
    let obj = state.value_at(1);
    let key = state.value_at(2);
    let (ptr, desc) = match state.resolve_declared(obj) {
        Resolved::Live(ptr, desc) => (Some(ptr), desc),
        Resolved::Stale(desc) => (None, desc),
        Resolved::Foreign => {
            return Err(LuaError::BadOperand {
                op: "index",
                type_name: SmolStr::new_static(obj.type_name()),
            });
        }
    };
    let Some(name) = key_name(state, 2) else {
        state.push_nil();
        return Ok(1);
    };
    let Some(ptr) = ptr else {
        return Err(LuaError::NilObject {
            type_name: state.type_name(desc),
            member: name,
        });
    };

    // functions live in the type metatable, bases included
    if let Some(meta) = state.type_meta(desc) {
        let method = state.vm.raw_get(meta, key);
        if let LuaValue::Function(_) = method {
            state.push_value(method);
            return Ok(1);
        }
    }

    match find_member(state, desc, &name) {
        Some((owner, Member::Var { getter: Some(getter), .. })) => {
            let Some(ptr) = (unsafe { state.registry.to_super(ptr, desc, owner) }) else {
                return Err(LuaError::InvalidCast {
                    from: state.type_name(desc),
                    to: state.type_name(owner),
                });
            };
            getter(state, ptr)?;
            Ok(1)
        }
        _ => {
            state.push_nil();
            Ok(1)
        }
    }
}

/// `__newindex(obj, key, value)`
pub(crate) fn meta_newindex(state: &mut State) -> LuaResult<usize> {
    let obj = state.value_at(1);
    let (ptr, desc) = match state.resolve_declared(obj) {
        Resolved::Live(ptr, desc) => (Some(ptr), desc),
        Resolved::Stale(desc) => (None, desc),
        Resolved::Foreign => {
            return Err(LuaError::BadOperand {
                op: "index",
                type_name: SmolStr::new_static(obj.type_name()),
            });
        }
    };
    let name = key_name(state, 2).unwrap_or_else(|| SmolStr::new_static("?"));
    let Some(ptr) = ptr else {
        return Err(LuaError::NilObject {
            type_name: state.type_name(desc),
            member: name,
        });
    };

    match find_member(state, desc, &name) {
        Some((owner, Member::Var { setter: Some(setter), .. })) => {
            let Some(ptr) = (unsafe { state.registry.to_super(ptr, desc, owner) }) else {
                return Err(LuaError::InvalidCast {
                    from: state.type_name(desc),
                    to: state.type_name(owner),
                });
            };
            setter(state, ptr, 3)?;
            Ok(0)
        }
        Some((_, Member::Var { setter: None, .. })) => Err(LuaError::ReadOnly {
            type_name: state.type_name(desc),
            member: name,
        }),
        _ => Err(LuaError::UnknownMember {
            type_name: state.type_name(desc),
            member: name,
        }),
    }
}

/// `__gc(ud)`
pub(crate) fn meta_gc(state: &mut State) -> LuaResult<usize> {
    if let LuaValue::Userdata(id) = state.value_at(1) {
        state.on_gc(id);
    }
    Ok(0)
}

/// `__tostring(obj)`
pub(crate) fn meta_tostring(state: &mut State) -> LuaResult<usize> {
    let obj = state.value_at(1);
    let text = match state.resolve_declared(obj) {
        Resolved::Live(ptr, desc) => format!("{}: {:p}", state.registry.name_of(desc), ptr),
        Resolved::Stale(desc) => format!("{}: nil", state.registry.name_of(desc)),
        Resolved::Foreign => match state.resolve_collection(obj) {
            Some((ptr, vtable)) => format!("{}: {:p}", (vtable.name)(), ptr),
            None => format!("{}: nil", state.type_name_at(1)),
        },
    };
    state.push_string(&text);
    Ok(1)
}

// ===== Collections =====

fn collection_of(state: &State, idx: i32) -> LuaResult<(NonNull<u8>, &'static CollectionVTable)> {
    state.resolve_collection(state.value_at(idx)).ok_or_else(|| {
        let member = key_name(state, 2).unwrap_or_else(|| SmolStr::new_static("?"));
        LuaError::NilObject {
            type_name: state.type_name_at(idx),
            member,
        }
    })
}

pub(crate) fn collection_index(state: &mut State) -> LuaResult<usize> {
    let (ptr, vtable) = collection_of(state, 1)?;
    unsafe { (vtable.index)(ptr, state) }
}

pub(crate) fn collection_newindex(state: &mut State) -> LuaResult<usize> {
    let (ptr, vtable) = collection_of(state, 1)?;
    unsafe { (vtable.new_index)(ptr, state) }
}

pub(crate) fn collection_len(state: &mut State) -> LuaResult<usize> {
    let (ptr, vtable) = collection_of(state, 1)?;
    let len = unsafe { (vtable.length)(ptr) };
    state.push_value(LuaValue::Integer(len as i64));
    Ok(1)
}

pub(crate) fn collection_pairs(state: &mut State) -> LuaResult<usize> {
    let (ptr, vtable) = collection_of(state, 1)?;
    unsafe { (vtable.iterate)(ptr, state) }
}

// ===== Library =====

/// `Type(obj)`: type name, `"nil"` for destroyed objects.
pub(crate) fn lib_type(state: &mut State) -> LuaResult<usize> {
    let name = state.type_name_at(1);
    state.push_string(&name);
    Ok(1)
}

/// `IsValid(obj)`
pub(crate) fn lib_is_valid(state: &mut State) -> LuaResult<usize> {
    let valid = state.is_valid(1);
    state.push_value(LuaValue::Boolean(valid));
    Ok(1)
}

/// `Cast(obj, type_name)`
pub(crate) fn lib_cast(state: &mut State) -> LuaResult<usize> {
    let Some(name) = key_name(state, 2) else {
        return Err(LuaError::TypeMismatch {
            arg: 2,
            expected: SmolStr::new_static("string"),
            actual: SmolStr::new_static(state.value_at(2).type_name()),
        });
    };
    let Some(target) = state.registry.find(&name) else {
        return Err(LuaError::runtime(format!("unknown type '{}'", name)));
    };
    state.cast(1, target)?;
    Ok(1)
}

/// `Insert(coll, key, value)`
pub(crate) fn lib_insert(state: &mut State) -> LuaResult<usize> {
    let (ptr, vtable) = collection_of(state, 1)?;
    unsafe { (vtable.insert)(ptr, state) }
}

/// `Remove(coll, key)`
pub(crate) fn lib_remove(state: &mut State) -> LuaResult<usize> {
    let (ptr, vtable) = collection_of(state, 1)?;
    unsafe { (vtable.remove)(ptr, state) }
}

/// `Clear(coll)`
pub(crate) fn lib_clear(state: &mut State) -> LuaResult<usize> {
    let (ptr, vtable) = collection_of(state, 1)?;
    unsafe { (vtable.clear)(ptr) };
    Ok(0)
}

/// `GetTypeMeta(name)`: metatable of a declared type, nil when unknown.
pub(crate) fn lib_get_type_meta(state: &mut State) -> LuaResult<usize> {
    let meta = key_name(state, 1)
        .and_then(|name| state.registry.find(&name))
        .and_then(|desc| state.type_meta(desc));
    match meta {
        Some(meta) => state.push_value(LuaValue::Table(meta)),
        None => state.push_nil(),
    }
    Ok(1)
}

// ===== Finalizer =====

impl State {
    /// Release everything a userdata holds: its identity cache entry (only
    /// if still owned by it) and its payload. The userdata is marked
    /// discarded and never resolves again.
    pub(crate) fn on_gc(&mut self, id: UserdataId) {
        let Some(ud) = self.full_ud_mut(id) else {
            return;
        };
        let (key, kind, minor, target) = (ud.key, ud.kind, ud.minor, ud.target);
        let payload = ud.payload.take();
        ud.discard();

        let removed = match (minor, kind) {
            (UdMinor::Ptr, UdKind::Declared(desc)) => {
                let is_weak = matches!(target, UdTarget::Weak(_))
                    || self.registry.get(desc).is_some_and(|d| d.is_weak());
                if is_weak {
                    self.cache.weak_remove(key as u32, id)
                } else {
                    remove_owned(&mut self.cache.ptrs, &key, id)
                }
            }
            (UdMinor::Ptr | UdMinor::Value, UdKind::Collection(vtable)) => {
                remove_owned(&mut self.cache.collections, &(key, (vtable.type_id)()), id)
            }
            (UdMinor::SmartPtr, _) => remove_owned(&mut self.cache.smart, &key, id),
            (UdMinor::Value, _) => remove_owned(&mut self.cache.values, &key, id),
        };
        if let Some(entry) = removed {
            self.vm.unreference(self.slots.cache, entry.ref_id);
        }
        log::trace!("finalized userdata {:?}", id);
        drop(payload);
    }

    /// One collection cycle: unreachable objects are freed, userdata with
    /// a finalizer are finalized and freed on the next cycle. Returns the
    /// number of finalizers run.
    pub fn gc(&mut self) -> usize {
        self.flush_refs();
        let pending = self.vm.collect_garbage();
        let count = pending.len();
        for id in pending {
            let ud = LuaValue::Userdata(id);
            let handler = self.vm.get_metafield(ud, "__gc");
            if handler.is_nil() {
                continue;
            }
            let top = self.get_top();
            self.push_value(handler);
            self.push_value(ud);
            if let Err(e) = self.try_call(1, Some(0)) {
                log::warn!("error in __gc of userdata {:?}: {}", id, e);
            }
            self.set_top(top);
        }
        count
    }

    /// Run cycles until nothing is left to finalize, so finalized objects
    /// are swept too.
    pub fn full_gc(&mut self) -> usize {
        let mut total = 0;
        loop {
            let n = self.gc();
            total += n;
            if n == 0 {
                return total;
            }
        }
    }
}
