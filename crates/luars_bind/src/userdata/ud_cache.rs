use std::any::TypeId;

use ahash::AHashMap;

use crate::gc::UserdataId;

/// Slot in the weak valued cache table plus the userdata it refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CacheEntry {
    pub ref_id: i64,
    pub ud: UserdataId,
}

/// Per state maps from native identity to the one script object that
/// represents it.
pub(crate) struct IdentityCache {
    /// Declared pointers, keyed by root pointer.
    pub ptrs: AHashMap<usize, CacheEntry>,
    /// Weak objects, indexed by weak slot.
    weak: Vec<Option<CacheEntry>>,
    /// Shared pointers, keyed by the root of their target.
    pub smart: AHashMap<usize, CacheEntry>,
    /// Collections, borrowed or script owned, keyed by address and
    /// container type.
    pub collections: AHashMap<(usize, TypeId), CacheEntry>,
    /// Script owned values, keyed by the address of their payload root.
    pub values: AHashMap<usize, CacheEntry>,
    increment: usize,
}

impl IdentityCache {
    pub(crate) fn new(increment: usize) -> Self {
        IdentityCache {
            ptrs: AHashMap::new(),
            weak: Vec::new(),
            smart: AHashMap::new(),
            collections: AHashMap::new(),
            values: AHashMap::new(),
            increment: increment.max(1),
        }
    }

    pub(crate) fn weak_get(&self, index: u32) -> Option<CacheEntry> {
        self.weak.get(index as usize).copied().flatten()
    }

    pub(crate) fn weak_set(&mut self, index: u32, entry: CacheEntry) {
        let index = index as usize;
        if index >= self.weak.len() {
            let len = (index / self.increment + 1) * self.increment;
            self.weak.resize(len, None);
        }
        self.weak[index] = Some(entry);
    }

    /// Drop the entry only if it still belongs to `ud`.
    pub(crate) fn weak_remove(&mut self, index: u32, ud: UserdataId) -> Option<CacheEntry> {
        let slot = self.weak.get_mut(index as usize)?;
        match *slot {
            Some(entry) if entry.ud == ud => slot.take(),
            _ => None,
        }
    }

    pub(crate) fn weak_len(&self) -> usize {
        self.weak.iter().filter(|e| e.is_some()).count()
    }

    pub(crate) fn len(&self) -> usize {
        self.ptrs.len() + self.weak_len() + self.smart.len() + self.collections.len() + self.values.len()
    }
}

/// Remove `key` from `map` only if the entry still belongs to `ud`.
pub(crate) fn remove_owned<K: std::hash::Hash + Eq>(
    map: &mut AHashMap<K, CacheEntry>,
    key: &K,
    ud: UserdataId,
) -> Option<CacheEntry> {
    match map.get(key) {
        Some(entry) if entry.ud == ud => map.remove(key),
        _ => None,
    }
}
