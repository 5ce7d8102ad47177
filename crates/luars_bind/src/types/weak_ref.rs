//! Generational index table for natively owned objects.
//!
//! Scripts hold `{index, serial}` handles; the owning object frees its slot
//! from its destructor through the embedded [`WeakAnchor`]. A handle is live
//! only while the slot is occupied and its serial still matches, so a slot
//! reused by another object never resolves through an old handle.

use std::cell::{Cell, RefCell};
use std::ptr::NonNull;
use std::rc::{Rc, Weak};

use super::{DescId, Registry};

/// Script side handle to a weak object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct WeakRef {
    pub index: u32,
    pub serial: u64,
}

#[derive(Default)]
struct WeakSlot {
    ptr: Option<NonNull<u8>>,
    /// Most derived type the object has been pushed as; `ptr` is a
    /// pointer to that type.
    desc: Option<DescId>,
    serial: u64,
}

pub struct WeakTable {
    slots: Vec<WeakSlot>,
    free_list: Vec<u32>,
    next_serial: u64,
}

impl WeakTable {
    pub(crate) fn new() -> Self {
        WeakTable {
            slots: Vec::new(),
            free_list: Vec::new(),
            next_serial: 1,
        }
    }

    fn stamp(&mut self) -> u64 {
        let serial = self.next_serial;
        self.next_serial = match self.next_serial.checked_add(1) {
            Some(next) => next,
            None => {
                log::error!("weak reference serial wrapped around");
                1
            }
        };
        serial
    }

    /// Occupy a slot for `ptr` with a fresh serial.
    pub fn alloc(&mut self, ptr: NonNull<u8>, desc: DescId) -> WeakRef {
        let serial = self.stamp();
        let slot = WeakSlot {
            ptr: Some(ptr),
            desc: Some(desc),
            serial,
        };
        let index = match self.free_list.pop() {
            Some(index) => {
                self.slots[index as usize] = slot;
                index
            }
            None => {
                self.slots.push(slot);
                (self.slots.len() - 1) as u32
            }
        };
        WeakRef { index, serial }
    }

    /// Release a slot. Outstanding handles stop resolving immediately.
    pub fn free(&mut self, index: u32) {
        match self.slots.get_mut(index as usize) {
            Some(slot) if slot.ptr.is_some() => {
                *slot = WeakSlot::default();
                self.free_list.push(index);
            }
            _ => log::error!("free of unused weak slot {}", index),
        }
    }

    pub fn resolve(&self, r: WeakRef) -> Option<(NonNull<u8>, DescId)> {
        let slot = self.slots.get(r.index as usize)?;
        if slot.serial != r.serial {
            return None;
        }
        Some((slot.ptr?, slot.desc?))
    }

    /// Same as `resolve` with the serial narrowed to the 32 bits carried by
    /// a packed light handle.
    pub fn resolve_narrow(&self, index: u32, serial: u32) -> Option<(NonNull<u8>, DescId, WeakRef)> {
        let slot = self.slots.get(index as usize)?;
        if slot.serial as u32 != serial {
            return None;
        }
        let r = WeakRef {
            index,
            serial: slot.serial,
        };
        Some((slot.ptr?, slot.desc?, r))
    }

    /// Live handle of an occupied slot.
    pub fn current(&self, index: u32) -> Option<WeakRef> {
        let slot = self.slots.get(index as usize)?;
        slot.ptr.map(|_| WeakRef {
            index,
            serial: slot.serial,
        })
    }

    pub fn serial(&self, index: u32) -> u64 {
        self.slots.get(index as usize).map_or(0, |s| s.serial)
    }

    pub(crate) fn desc(&self, index: u32) -> Option<DescId> {
        self.slots.get(index as usize)?.desc
    }

    /// Store a more derived view of the object held in `index`.
    pub(crate) fn upgrade(&mut self, index: u32, ptr: NonNull<u8>, desc: DescId) {
        if let Some(slot) = self.slots.get_mut(index as usize) {
            slot.ptr = Some(ptr);
            slot.desc = Some(desc);
        }
    }

    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }
}

/// Hook embedded in every weak object; frees the object's slot when the
/// object is dropped.
#[derive(Default)]
pub struct WeakAnchor {
    index: Cell<Option<u32>>,
    owner: RefCell<Weak<Registry>>,
}

impl WeakAnchor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot index, once the object has been pushed.
    pub fn index(&self) -> Option<u32> {
        self.index.get()
    }

    pub(crate) fn acquire(&self, registry: &Rc<Registry>, ptr: NonNull<u8>, desc: DescId) -> Option<WeakRef> {
        let same_owner = self
            .owner
            .borrow()
            .upgrade()
            .is_some_and(|owner| Rc::ptr_eq(&owner, registry));
        if !same_owner {
            self.release();
        }
        let r = registry.weak_acquire(self.index.get(), ptr, desc)?;
        self.index.set(Some(r.index));
        *self.owner.borrow_mut() = Rc::downgrade(registry);
        Some(r)
    }

    /// Detach from the weak table before the object itself goes away.
    pub fn release(&self) {
        let Some(index) = self.index.take() else {
            return;
        };
        let owner = std::mem::take(&mut *self.owner.borrow_mut());
        if let Some(registry) = owner.upgrade() {
            match registry.weak_table.try_borrow_mut() {
                Ok(mut table) => table.free(index),
                Err(_) => log::error!("weak table busy, slot {} leaked", index),
            }
        }
    }
}

impl Drop for WeakAnchor {
    fn drop(&mut self) {
        self.release();
    }
}

/// Root of a weak object hierarchy.
///
/// ```ignore
/// impl WeakObject for Actor {
///     fn weak_anchor(&self) -> &WeakAnchor { &self.anchor }
/// }
/// impl Declared for Actor {
///     const NAME: &'static str = "Actor";
///     fn weak_proc() -> Option<WeakObjProc> { Some(WeakObjProc::of::<Self>()) }
/// }
/// ```
pub trait WeakObject: super::Declared {
    fn weak_anchor(&self) -> &WeakAnchor;
}

type MakeRefFn = unsafe fn(&Rc<Registry>, NonNull<u8>, NonNull<u8>, DescId) -> Option<WeakRef>;

/// Handle allocation for one weak root type.
#[derive(Clone, Copy)]
pub struct WeakObjProc {
    pub(crate) make_ref: MakeRefFn,
}

unsafe fn make_ref_of<T: WeakObject>(
    registry: &Rc<Registry>,
    root: NonNull<u8>,
    ptr: NonNull<u8>,
    desc: DescId,
) -> Option<WeakRef> {
    let obj = unsafe { root.cast::<T>().as_ref() };
    obj.weak_anchor().acquire(registry, ptr, desc)
}

impl WeakObjProc {
    pub fn of<T: WeakObject>() -> Self {
        WeakObjProc {
            make_ref: make_ref_of::<T>,
        }
    }
}
