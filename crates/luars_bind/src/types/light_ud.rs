//! Tagged light userdata.
//!
//! Layout of a packed word:
//! - `[slot:8][ptr:56]` for declared types
//! - `[slot:8][weak index:24][serial:32]` for weak objects
//!
//! A word is only trusted after its slot is found in the registry and, for
//! weak objects, after the serial matches the live weak slot. The weak
//! serial is narrowed to 32 bits here while full userdata keep all 64.

use std::ptr::NonNull;

use super::{DescId, Registry, WeakRef};
use crate::lua_vm::lua_limits::{
    LIGHT_PTR_BITS, LIGHT_PTR_MASK, LIGHT_WEAK_INDEX_MAX, LIGHT_WEAK_SERIAL_BITS, MAX_LIGHT_SLOTS,
};

/// Packing is compiled in.
pub const LIGHT_UD_ENABLED: bool = cfg!(all(feature = "light-ud", target_pointer_width = "64"));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LightSlot {
    Declared(DescId),
    /// Every type of one weak hierarchy shares the slot of its root.
    WeakGroup(DescId),
}

#[inline(always)]
fn slot_of(word: u64) -> usize {
    (word >> LIGHT_PTR_BITS) as usize
}

/// Word carries a slot index at all. Foreign light userdata (plain
/// addresses) have a zero top byte.
#[inline]
pub fn is_tagged(word: u64) -> bool {
    LIGHT_UD_ENABLED && slot_of(word) != 0
}

impl Registry {
    pub(crate) fn light_slot(&self, word: u64) -> Option<LightSlot> {
        if !is_tagged(word) {
            return None;
        }
        let slot = slot_of(word);
        if slot > MAX_LIGHT_SLOTS {
            return None;
        }
        self.light_slots.get(slot - 1).copied()
    }

    /// Pack a declared, non weak pointer.
    pub(crate) fn light_pack_ptr(&self, ptr: NonNull<u8>, desc: DescId) -> Option<u64> {
        if !LIGHT_UD_ENABLED {
            return None;
        }
        let slot = self.get(desc)?.light_slot;
        if slot == 0 {
            return None;
        }
        let addr = ptr.as_ptr() as usize as u64;
        if addr & !LIGHT_PTR_MASK != 0 {
            return None;
        }
        Some(((slot as u64) << LIGHT_PTR_BITS) | addr)
    }

    /// Pack a weak handle into the slot of its hierarchy.
    pub(crate) fn light_pack_weak(&self, r: WeakRef, desc: DescId) -> Option<u64> {
        if !LIGHT_UD_ENABLED || r.index > LIGHT_WEAK_INDEX_MAX {
            return None;
        }
        let slot = self.get(desc)?.light_slot;
        if slot == 0 {
            return None;
        }
        let serial = r.serial as u32 as u64;
        Some(((slot as u64) << LIGHT_PTR_BITS) | ((r.index as u64) << LIGHT_WEAK_SERIAL_BITS) | serial)
    }

    /// Live pointer and the type it points to; `None` for foreign words and
    /// stale weak handles.
    pub(crate) fn light_resolve(&self, word: u64) -> Option<(NonNull<u8>, DescId)> {
        match self.light_slot(word)? {
            LightSlot::Declared(desc) => {
                let ptr = NonNull::new((word & LIGHT_PTR_MASK) as usize as *mut u8)?;
                Some((ptr, desc))
            }
            LightSlot::WeakGroup(root) => {
                let (ptr, desc, _) = self.light_resolve_weak(word)?;
                (self.get(desc)?.weak_root == Some(root)).then_some((ptr, desc))
            }
        }
    }

    /// Weak handle carried by a packed weak word, re-validated.
    pub(crate) fn light_resolve_weak(&self, word: u64) -> Option<(NonNull<u8>, DescId, WeakRef)> {
        if !matches!(self.light_slot(word)?, LightSlot::WeakGroup(_)) {
            return None;
        }
        let index = ((word & LIGHT_PTR_MASK) >> LIGHT_WEAK_SERIAL_BITS) as u32;
        let serial = word as u32;
        self.weak_table.borrow().resolve_narrow(index, serial)
    }

    /// Static type the word was packed with, without liveness checks.
    pub(crate) fn light_packed_desc(&self, word: u64) -> Option<DescId> {
        match self.light_slot(word)? {
            LightSlot::Declared(desc) => Some(desc),
            LightSlot::WeakGroup(root) => {
                let index = ((word & LIGHT_PTR_MASK) >> LIGHT_WEAK_SERIAL_BITS) as u32;
                self.weak_table.borrow().desc(index).or(Some(root))
            }
        }
    }

    /// Pointer typed as `desc`, or `None` when the word is stale, foreign or
    /// of an unrelated type.
    pub(crate) fn light_unpack(&self, word: u64, desc: DescId) -> Option<NonNull<u8>> {
        let (ptr, actual) = self.light_resolve(word)?;
        unsafe { self.to_super(ptr, actual, desc) }
    }
}
