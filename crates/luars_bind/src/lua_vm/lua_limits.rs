//! Centralized binding limits and layout constants.
//!
//! All magic numbers that control userdata layout, light pointer packing
//! and cache growth are collected here.

// ===== Full userdata =====

/// Signature stored in the first two bytes of every full userdata created
/// by this layer. Userdata without it are foreign and never dereferenced.
pub const UD_TAG: [u8; 2] = [0x4c, 0x42];

// ===== Light userdata =====

/// Bits reserved for the slot index at the top of a packed word.
pub const LIGHT_SLOT_BITS: u32 = 8;

/// Bits left for the raw pointer below the slot index.
pub const LIGHT_PTR_BITS: u32 = 64 - LIGHT_SLOT_BITS;

/// Mask selecting the pointer part of a packed word.
pub const LIGHT_PTR_MASK: u64 = (1 << LIGHT_PTR_BITS) - 1;

/// Bits used by the weak index in a packed weak handle.
pub const LIGHT_WEAK_INDEX_BITS: u32 = 24;

/// Bits used by the (narrowed) serial in a packed weak handle.
pub const LIGHT_WEAK_SERIAL_BITS: u32 = 32;

/// Largest weak index that still fits a packed weak handle.
pub const LIGHT_WEAK_INDEX_MAX: u32 = (1 << LIGHT_WEAK_INDEX_BITS) - 1;

/// Slot 0 is never assigned, so a zero top byte marks foreign light userdata.
pub const MAX_LIGHT_SLOTS: usize = (1 << LIGHT_SLOT_BITS) - 1;

// ===== Identity cache =====

/// Growth step of the per-state weak index cache.
pub const CONTAINER_INCREMENTAL: usize = 4096;

// ===== Calls =====

/// Default maximum native call nesting depth.
pub const MAX_CALL_DEPTH: usize = 200;

/// Initial stack capacity for new states.
pub const BASIC_STACK_SIZE: usize = 40;

// ===== References =====

/// Reference to nil (no storage needed).
pub const LUA_REFNIL: i64 = -1;

/// Invalid reference.
pub const LUA_NOREF: i64 = -2;
