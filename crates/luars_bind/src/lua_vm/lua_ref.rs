/// Native held references to script objects.
///
/// A pinned value lives in the per-state strong object table until the last
/// `ObjRef` handle to it is dropped. Dropping only queues the slot; the
/// owning `State` unrefs queued slots the next time it is entered, so a
/// handle can be dropped anywhere, even while the state is borrowed.
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

struct ObjSlot {
    ref_id: i64,
    count: u32,
}

#[derive(Default)]
pub(crate) struct ObjRefArray {
    slots: Vec<Option<ObjSlot>>,
    free_list: Vec<u32>,
    released: Vec<i64>,
}

impl ObjRefArray {
    pub(crate) fn alloc(this: &Rc<RefCell<ObjRefArray>>, ref_id: i64) -> ObjRef {
        let mut array = this.borrow_mut();
        let slot = Some(ObjSlot { ref_id, count: 1 });
        let index = match array.free_list.pop() {
            Some(index) => {
                array.slots[index as usize] = slot;
                index
            }
            None => {
                array.slots.push(slot);
                (array.slots.len() - 1) as u32
            }
        };
        ObjRef {
            index,
            refs: this.clone(),
        }
    }

    /// Registry ids whose last handle has been dropped.
    pub(crate) fn take_released(&mut self) -> Vec<i64> {
        std::mem::take(&mut self.released)
    }

    pub(crate) fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    fn ref_id(&self, index: u32) -> Option<i64> {
        self.slots.get(index as usize)?.as_ref().map(|s| s.ref_id)
    }

    fn add_ref(&mut self, index: u32) {
        if let Some(Some(slot)) = self.slots.get_mut(index as usize) {
            slot.count += 1;
        }
    }

    fn dec_ref(&mut self, index: u32) {
        let Some(entry) = self.slots.get_mut(index as usize) else {
            return;
        };
        let Some(slot) = entry.as_mut() else {
            return;
        };
        slot.count -= 1;
        if slot.count == 0 {
            let ref_id = slot.ref_id;
            *entry = None;
            self.free_list.push(index);
            self.released.push(ref_id);
        }
    }
}

/// Reference counted handle to a script object pinned by native code.
///
/// `!Send + !Sync`: the state is single threaded.
pub struct ObjRef {
    index: u32,
    refs: Rc<RefCell<ObjRefArray>>,
}

impl ObjRef {
    /// Id in the strong object table, `None` once released.
    pub fn ref_id(&self) -> Option<i64> {
        self.refs.borrow().ref_id(self.index)
    }

    /// Both handles pin the same slot.
    pub fn same_slot(&self, other: &ObjRef) -> bool {
        Rc::ptr_eq(&self.refs, &other.refs) && self.index == other.index
    }
}

impl Clone for ObjRef {
    fn clone(&self) -> Self {
        self.refs.borrow_mut().add_ref(self.index);
        ObjRef {
            index: self.index,
            refs: self.refs.clone(),
        }
    }
}

impl Drop for ObjRef {
    fn drop(&mut self) {
        self.refs.borrow_mut().dec_ref(self.index);
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef(index={}, ref_id={:?})", self.index, self.ref_id())
    }
}
