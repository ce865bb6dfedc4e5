//! The participant-side Shared State Store.
//!
//! One [`SharedStore`] exists per connection. It holds the last known lobby
//! value of the persistent state and is the "other side" of the per-tick
//! reconciliation against the local simulation.

use tandem_types::{SaveBuffer, SaveBufferLengthError};

use crate::merge::{absorb_save_buffer, merge_save_buffer, merge_star_count};

/// Outcome of reconciling the local star count against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StarReconcile {
    /// Local and stored values agree.
    Unchanged,
    /// The local value was higher; the store took it and it must be sent.
    Raised(u32),
    /// The store was higher; the local simulation must be written down.
    Lowered(u32),
}

/// Persistent replicable state: progress flags and the star counter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedStore {
    /// Accumulated progress flags.
    save_buffer: SaveBuffer,
    /// Monotonic star counter.
    star_count: u32,
}

impl SharedStore {
    /// An empty store: no flags, zero stars.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding the given values.
    pub const fn from_parts(save_buffer: SaveBuffer, star_count: u32) -> Self {
        Self {
            save_buffer,
            star_count,
        }
    }

    /// The stored save buffer.
    pub const fn save_buffer(&self) -> &SaveBuffer {
        &self.save_buffer
    }

    /// The stored star count.
    pub const fn star_count(&self) -> u32 {
        self.star_count
    }

    /// Overwrite with an authoritative snapshot.
    pub fn replace(&mut self, save_buffer: SaveBuffer, star_count: u32) {
        self.save_buffer = save_buffer;
        self.star_count = star_count;
    }

    /// OR an inbound buffer into the store. Returns `true` on change.
    pub fn absorb_save_buffer(&mut self, incoming: &SaveBuffer) -> bool {
        absorb_save_buffer(&mut self.save_buffer, incoming)
    }

    /// Accept `value` only if it is strictly greater. Returns `true` on
    /// change.
    pub const fn raise_star_count(&mut self, value: u32) -> bool {
        let merged = merge_star_count(self.star_count, value);
        if merged == self.star_count {
            return false;
        }
        self.star_count = merged;
        true
    }

    /// Compare the local simulation's buffer against the store.
    ///
    /// Returns `Ok(None)` if they are byte-identical. Otherwise both sides
    /// become their OR, which is returned so the caller can write it into
    /// the simulation and send it.
    ///
    /// # Errors
    ///
    /// Returns [`SaveBufferLengthError`] if `local` is not exactly
    /// [`SAVE_BUFFER_LEN`](tandem_types::SAVE_BUFFER_LEN) bytes. That is a
    /// configuration problem, not data to reconcile.
    pub fn reconcile_save_buffer(
        &mut self,
        local: &[u8],
    ) -> Result<Option<SaveBuffer>, SaveBufferLengthError> {
        let local = SaveBuffer::from_slice(local)?;
        if local == self.save_buffer {
            return Ok(None);
        }
        let merged = merge_save_buffer(&local, &self.save_buffer);
        self.save_buffer = merged.clone();
        Ok(Some(merged))
    }

    /// Compare the local simulation's star count against the store.
    pub const fn reconcile_star_count(&mut self, local: u32) -> StarReconcile {
        let merged = merge_star_count(self.star_count, local);
        if merged != self.star_count {
            self.star_count = merged;
            StarReconcile::Raised(merged)
        } else if local != merged {
            StarReconcile::Lowered(merged)
        } else {
            StarReconcile::Unchanged
        }
    }
}
