//! In-memory guest and game used by tests and the lobby simulator.
//!
//! [`FlatMemory`] is a flat byte array with a deterministic command queue:
//! commands submitted during one tick are executed at the next
//! [`drain_completions`](CommandBuffer::drain_completions), so completions
//! always land on a later tick, the same as on a real host. It can be told
//! to hold completions, to fail a command, or to destroy an object behind
//! the engine's back.
//!
//! [`LocalGame`] is a plain-data [`GameView`].

use std::collections::{BTreeMap, BTreeSet};

use tandem_types::{RemoteSnapshot, SAVE_BUFFER_LEN, SaveBuffer, SceneId};
use tracing::debug;

use crate::config::MemoryLayout;
use crate::game::GameView;
use crate::handle::Anchor;
use crate::memory::{Command, CommandBuffer, CommandKind, Completion, Memory};

/// Size of the simulated guest RAM.
const RAM_SIZE: usize = 0x0100_0000;

/// Where the harness places puppet objects.
const OBJECT_BASE: u32 = 0x0036_0000;

/// Size of one puppet object.
const OBJECT_STRIDE: u32 = 0x260;

/// A flat guest RAM plus a command queue.
#[derive(Debug, Clone)]
pub struct FlatMemory {
    /// Guest RAM.
    ram: Vec<u8>,
    /// Layout used to find anchors.
    layout: MemoryLayout,
    /// Commands waiting for the next drain.
    submitted: Vec<Command>,
    /// Every command ever submitted, in order.
    history: Vec<Command>,
    /// Commands that fail the next time they run.
    failures: BTreeSet<(u8, CommandKind)>,
    /// When set, drains return nothing and commands stay queued.
    hold: bool,
}

impl FlatMemory {
    /// Zeroed RAM using `layout` for anchor lookups.
    pub fn new(layout: &MemoryLayout) -> Self {
        Self {
            ram: vec![0; RAM_SIZE],
            layout: layout.clone(),
            submitted: Vec::new(),
            history: Vec::new(),
            failures: BTreeSet::new(),
            hold: false,
        }
    }

    /// Create the backing object for `slot` directly (as the guest would)
    /// and point the slot's anchor at it. The sentinel is *not* stamped.
    pub fn place_object(&mut self, slot: u8) -> Option<u32> {
        let object = OBJECT_STRIDE
            .checked_mul(u32::from(slot))
            .and_then(|off| OBJECT_BASE.checked_add(off))?;
        let anchor = self.layout.anchor_address(slot)?;
        let size = usize::try_from(OBJECT_STRIDE).ok()?;
        self.write_bytes(object, &vec![0; size]);
        let pointer = object.checked_add(self.layout.segment_bias)?;
        self.write_u32(anchor, pointer);
        Some(object)
    }

    /// Null the slot's anchor, as when the guest unloads the object.
    pub fn destroy_object(&mut self, slot: u8) {
        if let Some(anchor) = self.layout.anchor_address(slot) {
            self.write_u32(anchor, 0);
        }
    }

    /// Overwrite the sentinel of the slot's object, leaving it live.
    pub fn clobber_sentinel(&mut self, slot: u8) {
        let layout = self.layout.clone();
        let Some(anchor) = Anchor::for_slot(&layout, slot) else {
            return;
        };
        if let Some(at) = anchor
            .object(&*self)
            .and_then(|object| object.checked_add(layout.sentinel_offset))
        {
            self.write_u32(at, 0);
        }
    }

    /// The slot's current object, if its anchor is non-null.
    pub fn object_of(&self, slot: u8) -> Option<u32> {
        Anchor::for_slot(&self.layout, slot).and_then(|anchor| anchor.object(self))
    }

    /// Make the next `kind` command for `slot` fail.
    pub fn fail_next(&mut self, slot: u8, kind: CommandKind) {
        self.failures.insert((slot, kind));
    }

    /// Hold (or release) completions.
    pub const fn set_hold(&mut self, hold: bool) {
        self.hold = hold;
    }

    /// Commands queued for the next drain.
    pub fn pending(&self) -> &[Command] {
        &self.submitted
    }

    /// Every command ever submitted.
    pub fn history(&self) -> &[Command] {
        &self.history
    }

    /// Execute one command against RAM.
    fn run(&mut self, command: Command) -> Completion {
        let failed = self.failures.remove(&(command.slot, command.kind));
        let address = match (command.kind, failed) {
            (CommandKind::Allocate, true) => 0,
            (CommandKind::Allocate, false) => self.place_object(command.slot).unwrap_or(0),
            (CommandKind::Deallocate, true) => self.object_of(command.slot).unwrap_or(0),
            (CommandKind::Deallocate, false) => {
                self.destroy_object(command.slot);
                0
            }
        };
        debug!(slot = command.slot, kind = ?command.kind, failed, address, "Guest ran command");
        Completion {
            slot: command.slot,
            kind: command.kind,
            address,
        }
    }

    /// Index range for an access, if it is inside RAM.
    fn range(&self, address: u32, len: usize) -> Option<std::ops::Range<usize>> {
        let start = usize::try_from(address).ok()?;
        let end = start.checked_add(len)?;
        (end <= self.ram.len()).then_some(start..end)
    }
}

impl Memory for FlatMemory {
    fn read_u8(&self, address: u32) -> u8 {
        usize::try_from(address)
            .ok()
            .and_then(|i| self.ram.get(i))
            .copied()
            .unwrap_or(0)
    }

    fn write_u8(&mut self, address: u32, value: u8) {
        if let Some(byte) = usize::try_from(address)
            .ok()
            .and_then(|i| self.ram.get_mut(i))
        {
            *byte = value;
        }
    }

    fn read_bytes(&self, address: u32, len: usize) -> Vec<u8> {
        self.range(address, len)
            .and_then(|r| self.ram.get(r))
            .map_or_else(|| vec![0; len], <[u8]>::to_vec)
    }

    fn write_bytes(&mut self, address: u32, bytes: &[u8]) {
        if let Some(dst) = self
            .range(address, bytes.len())
            .and_then(|r| self.ram.get_mut(r))
        {
            dst.copy_from_slice(bytes);
        }
    }

    fn dereference(&self, address: u32) -> u32 {
        self.read_u32(address)
            .checked_sub(self.layout.segment_bias)
            .unwrap_or(0)
    }
}

impl CommandBuffer for FlatMemory {
    fn submit(&mut self, command: Command) {
        self.history.push(command);
        self.submitted.push(command);
    }

    fn drain_completions(&mut self) -> Vec<Completion> {
        if self.hold {
            return Vec::new();
        }
        let queued = std::mem::take(&mut self.submitted);
        queued.into_iter().map(|command| self.run(command)).collect()
    }
}

/// A plain-data local simulation.
#[derive(Debug, Clone)]
pub struct LocalGame {
    /// Whether the local player object exists.
    pub player_exists: bool,
    /// Frames since boot.
    pub frame_counter: u32,
    /// Paused flag.
    pub paused: bool,
    /// Current scene.
    pub scene: SceneId,
    /// Local player visibility.
    pub visible: bool,
    /// Save-file progress block.
    pub save: Vec<u8>,
    /// Star counter.
    pub star_count: u32,
    /// The avatar state reported by [`GameView::capture_snapshot`].
    pub avatar: RemoteSnapshot,
    /// Animation table.
    pub animations: BTreeMap<u16, Vec<u8>>,
}

impl Default for LocalGame {
    fn default() -> Self {
        Self {
            player_exists: true,
            frame_counter: 1_000,
            paused: false,
            scene: SceneId::UNKNOWN,
            visible: true,
            save: vec![0; SAVE_BUFFER_LEN],
            star_count: 0,
            avatar: RemoteSnapshot::default(),
            animations: BTreeMap::new(),
        }
    }
}

impl LocalGame {
    /// Set bits in one byte of the save block.
    pub fn set_save_bits(&mut self, index: usize, mask: u8) {
        if let Some(byte) = self.save.get_mut(index) {
            *byte |= mask;
        }
    }

    /// One byte of the save block.
    pub fn save_byte(&self, index: usize) -> u8 {
        self.save.get(index).copied().unwrap_or(0)
    }
}

impl GameView for LocalGame {
    fn player_exists(&self) -> bool {
        self.player_exists
    }

    fn frame_counter(&self) -> u32 {
        self.frame_counter
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn current_scene(&self) -> SceneId {
        self.scene
    }

    fn player_visible(&self) -> bool {
        self.visible
    }

    fn save_buffer(&self) -> Vec<u8> {
        self.save.clone()
    }

    fn write_save_buffer(&mut self, buffer: &SaveBuffer) {
        self.save = buffer.as_bytes().to_vec();
    }

    fn star_count(&self) -> u32 {
        self.star_count
    }

    fn set_star_count(&mut self, value: u32) {
        self.star_count = value;
    }

    fn capture_snapshot(&self) -> RemoteSnapshot {
        self.avatar.clone()
    }

    fn animation(&self, id: u16) -> Option<&[u8]> {
        self.animations.get(&id).map(Vec::as_slice)
    }
}
