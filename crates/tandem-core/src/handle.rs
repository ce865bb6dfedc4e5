//! Validated access to a puppet's backing object.
//!
//! The guest may destroy or recycle a puppet object at any time, so a raw
//! address is never kept across accesses. An [`Anchor`] names where a slot's
//! object pointer lives; [`Anchor::resolve`] turns it into a [`Handle`] only
//! if the pointer is non-null *and* the sentinel stamped at spawn time is
//! still present. Every field write goes through a fresh `Handle`.

use crate::config::MemoryLayout;
use crate::memory::Memory;

/// The pointer-table entry that identifies a slot's backing object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    /// Slot index the anchor belongs to.
    slot: u8,
    /// Address of the pointer-table entry.
    address: u32,
}

impl Anchor {
    /// The anchor of `slot` under `layout`, or `None` if its address
    /// overflows.
    pub fn for_slot(layout: &MemoryLayout, slot: u8) -> Option<Self> {
        layout
            .anchor_address(slot)
            .map(|address| Self { slot, address })
    }

    /// The slot index.
    pub const fn slot(self) -> u8 {
        self.slot
    }

    /// Address of the pointer-table entry.
    pub const fn address(self) -> u32 {
        self.address
    }

    /// The object the anchor currently points at, if any. No sentinel check.
    pub fn object(self, memory: &dyn Memory) -> Option<u32> {
        match memory.dereference(self.address) {
            0 => None,
            address => Some(address),
        }
    }

    /// A validated handle: non-null pointer and intact sentinel.
    pub fn resolve(self, memory: &dyn Memory, layout: &MemoryLayout) -> Option<Handle> {
        let address = self.object(memory)?;
        let sentinel_at = address.checked_add(layout.sentinel_offset)?;
        (memory.read_u32(sentinel_at) == layout.sentinel).then_some(Handle { address })
    }

    /// Stamp the sentinel into a freshly allocated object.
    pub fn stamp(memory: &mut dyn Memory, layout: &MemoryLayout, object: u32) -> bool {
        let Some(sentinel_at) = object.checked_add(layout.sentinel_offset) else {
            return false;
        };
        memory.write_u32(sentinel_at, layout.sentinel);
        true
    }
}

/// A puppet object that passed validation. Only obtainable from
/// [`Anchor::resolve`]; do not keep one across ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle {
    /// Object base address.
    address: u32,
}

impl Handle {
    /// Object base address.
    pub const fn address(self) -> u32 {
        self.address
    }

    /// Address of a field at `offset` from the object base.
    pub const fn field(self, offset: u32) -> Option<u32> {
        self.address.checked_add(offset)
    }

    /// Write a half-word field.
    pub fn write_u16(self, memory: &mut dyn Memory, offset: u32, value: u16) -> bool {
        let Some(at) = self.field(offset) else {
            return false;
        };
        memory.write_u16(at, value);
        true
    }

    /// Write a word field.
    pub fn write_u32(self, memory: &mut dyn Memory, offset: u32, value: u32) -> bool {
        let Some(at) = self.field(offset) else {
            return false;
        };
        memory.write_u32(at, value);
        true
    }

    /// Write a byte-range field.
    pub fn write_bytes(self, memory: &mut dyn Memory, offset: u32, bytes: &[u8]) -> bool {
        let Some(at) = self.field(offset) else {
            return false;
        };
        memory.write_bytes(at, bytes);
        true
    }
}
