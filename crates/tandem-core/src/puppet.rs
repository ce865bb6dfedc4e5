//! One puppet slot and its spawn/despawn state machine.
//!
//! ```text
//! Unspawned --spawn--> Spawning --alloc ok--> Spawned --despawn--> Despawning
//!     ^                   |                      |                     |
//!     |                alloc null            anchor invalid        dealloc ok
//!     |                   v                      v                     |
//!     +---------------- Unspawned             Broken --despawn---------+
//! ```
//!
//! A slot with no participant is free. While a command is in flight
//! ([`PuppetSlot::in_flight`] is `Some`) neither `spawn` nor `despawn` does
//! anything, so a slot never has two outstanding commands.

use tandem_types::{ParticipantId, RemoteSnapshot, SceneId};
use tracing::{debug, info, warn};

use crate::config::MemoryLayout;
use crate::game::GameView;
use crate::handle::Anchor;
use crate::memory::{Command, CommandKind, Completion, Guest, Memory};
use crate::projection::{FieldOutcome, FieldTarget, Projection, SnapshotField};

/// Spawn status of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotStatus {
    /// No backing object.
    Unspawned,
    /// Allocation requested, not yet completed.
    Spawning,
    /// Backing object live and stamped.
    Spawned,
    /// Deallocation requested, not yet completed.
    Despawning,
    /// The anchor failed validation while spawned; field writes are
    /// suppressed until a despawn clears it.
    Broken,
}

/// The one outstanding command of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlight {
    /// What was requested.
    pub kind: CommandKind,
    /// Manager tick the command was issued on.
    pub issued_at: u64,
    /// Status to restore if the command fails.
    pub resume: SlotStatus,
}

/// Result of offering a snapshot to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The slot was not ready; nothing touched.
    Ignored,
    /// All fields went through a valid handle.
    Applied {
        /// Fields actually written (de-duplicated ones excluded).
        written: usize,
    },
    /// The anchor failed part-way and the slot is now [`SlotStatus::Broken`].
    Broke,
}

/// One entry of the fixed puppet pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuppetSlot {
    /// Stable slot index.
    index: u8,
    /// Where the slot's object pointer lives.
    anchor: Anchor,
    /// Owning participant; `None` when free.
    participant: Option<ParticipantId>,
    /// Scene the owner last reported.
    scene: SceneId,
    /// Spawn status.
    status: SlotStatus,
    /// Outstanding command.
    in_flight: Option<InFlight>,
    /// Manager tick the current object became live.
    spawned_at: Option<u64>,
    /// Released but not yet back in the free pool.
    releasing: bool,
    /// Field de-dup cache.
    projection: Projection,
}

impl PuppetSlot {
    /// A free, unspawned slot.
    pub const fn new(anchor: Anchor) -> Self {
        Self {
            index: anchor.slot(),
            anchor,
            participant: None,
            scene: SceneId::UNKNOWN,
            status: SlotStatus::Unspawned,
            in_flight: None,
            spawned_at: None,
            releasing: false,
            projection: Projection::new(),
        }
    }

    /// Slot index.
    pub const fn index(&self) -> u8 {
        self.index
    }

    /// The slot's anchor.
    pub const fn anchor(&self) -> Anchor {
        self.anchor
    }

    /// Owning participant.
    pub const fn participant(&self) -> Option<ParticipantId> {
        self.participant
    }

    /// Scene the owner last reported.
    pub const fn scene(&self) -> SceneId {
        self.scene
    }

    /// Spawn status.
    pub const fn status(&self) -> SlotStatus {
        self.status
    }

    /// Outstanding command, if any.
    pub const fn in_flight(&self) -> Option<InFlight> {
        self.in_flight
    }

    /// Whether the slot was released and is waiting to rejoin the free pool.
    pub const fn is_releasing(&self) -> bool {
        self.releasing
    }

    /// Unspawned with nothing outstanding.
    pub const fn is_idle(&self) -> bool {
        matches!(self.status, SlotStatus::Unspawned) && self.in_flight.is_none()
    }

    /// Spawned and past the grace period.
    pub const fn is_ready(&self, tick: u64, grace_ticks: u64) -> bool {
        match (self.status, self.spawned_at) {
            (SlotStatus::Spawned, Some(at)) => tick >= at.saturating_add(grace_ticks),
            _ => false,
        }
    }

    /// Give the slot to `participant`.
    pub const fn assign(&mut self, participant: ParticipantId) {
        self.participant = Some(participant);
        self.scene = SceneId::UNKNOWN;
        self.releasing = false;
    }

    /// Drop the owner and mark the slot as releasing.
    pub const fn release(&mut self) {
        self.participant = None;
        self.scene = SceneId::UNKNOWN;
        self.releasing = true;
    }

    /// Clear the releasing mark once the slot is back in the free pool.
    pub const fn mark_free(&mut self) {
        self.releasing = false;
    }

    /// Record the owner's scene.
    pub const fn set_scene(&mut self, scene: SceneId) {
        self.scene = scene;
    }

    /// Start spawning. Returns whether anything changed.
    ///
    /// An object already behind the anchor is adopted as-is.
    pub fn spawn<G: Guest>(&mut self, guest: &mut G, tick: u64) -> bool {
        if self.in_flight.is_some() || self.status != SlotStatus::Unspawned {
            return false;
        }
        self.projection.reset();
        if self.anchor.object(&*guest).is_some() {
            self.status = SlotStatus::Spawned;
            self.spawned_at = Some(tick);
            debug!(slot = self.index, "Adopted existing puppet object");
            return true;
        }
        self.issue(guest, CommandKind::Allocate, tick, SlotStatus::Unspawned);
        self.status = SlotStatus::Spawning;
        true
    }

    /// Start despawning. Returns whether anything changed.
    ///
    /// A slot whose anchor is already null goes straight to `Unspawned`.
    pub fn despawn<G: Guest>(&mut self, guest: &mut G, tick: u64) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        if self.anchor.object(&*guest).is_none() {
            let changed = self.status != SlotStatus::Unspawned;
            self.clear_object();
            return changed;
        }
        let resume = self.status;
        self.issue(guest, CommandKind::Deallocate, tick, resume);
        self.status = SlotStatus::Despawning;
        true
    }

    /// Settle the outstanding command. Returns `false` for a completion the
    /// slot was not waiting for.
    pub fn complete(
        &mut self,
        completion: Completion,
        memory: &mut dyn Memory,
        layout: &MemoryLayout,
        tick: u64,
    ) -> bool {
        let Some(in_flight) = self.in_flight else {
            warn!(slot = self.index, kind = ?completion.kind, "Completion with nothing in flight");
            return false;
        };
        if in_flight.kind != completion.kind {
            warn!(
                slot = self.index,
                expected = ?in_flight.kind,
                got = ?completion.kind,
                "Completion does not match the in-flight command"
            );
            return false;
        }
        self.in_flight = None;

        match completion.kind {
            CommandKind::Allocate => {
                if completion.address == 0 || !Anchor::stamp(memory, layout, completion.address)
                {
                    warn!(slot = self.index, "Spawn failed");
                    self.status = in_flight.resume;
                    return true;
                }
                self.status = SlotStatus::Spawned;
                self.spawned_at = Some(tick);
                info!(
                    slot = self.index,
                    address = format_args!("{:#010X}", completion.address),
                    waited = tick.saturating_sub(in_flight.issued_at),
                    "Puppet spawned"
                );
            }
            CommandKind::Deallocate => {
                if completion.address != 0 {
                    warn!(slot = self.index, "Despawn failed");
                    self.status = in_flight.resume;
                    return true;
                }
                self.clear_object();
                info!(slot = self.index, participant = ?self.participant, "Puppet despawned");
            }
        }
        true
    }

    /// Project `snapshot` onto the slot's object, one field at a time,
    /// re-validating the anchor before each field.
    pub fn apply_snapshot(
        &mut self,
        snapshot: &RemoteSnapshot,
        memory: &mut dyn Memory,
        layout: &MemoryLayout,
        game: &dyn GameView,
        ready: bool,
    ) -> ApplyOutcome {
        if !ready || self.status != SlotStatus::Spawned {
            return ApplyOutcome::Ignored;
        }
        let mut target = FieldTarget {
            memory,
            layout,
            game,
            slot: self.index,
        };
        let mut written = 0usize;
        for field in SnapshotField::ORDER {
            if self.status == SlotStatus::Broken {
                continue;
            }
            let Some(handle) = self.anchor.resolve(&*target.memory, layout) else {
                warn!(slot = self.index, ?field, "Puppet anchor invalid, marking broken");
                self.status = SlotStatus::Broken;
                continue;
            };
            if self.projection.apply_field(field, snapshot, handle, &mut target)
                == FieldOutcome::Written
            {
                written = written.saturating_add(1);
            }
        }
        if self.status == SlotStatus::Broken {
            ApplyOutcome::Broke
        } else {
            ApplyOutcome::Applied { written }
        }
    }

    fn issue<G: Guest>(&mut self, guest: &mut G, kind: CommandKind, tick: u64, resume: SlotStatus) {
        guest.submit(Command {
            slot: self.index,
            kind,
        });
        self.in_flight = Some(InFlight {
            kind,
            issued_at: tick,
            resume,
        });
    }

    fn clear_object(&mut self) {
        self.status = SlotStatus::Unspawned;
        self.spawned_at = None;
        self.projection.reset();
    }
}
