//! The Puppet Manager: a fixed pool of [`PuppetSlot`]s keyed by participant.
//!
//! # Tick order
//!
//! 1. Drain command completions; released slots that reached `Unspawned`
//!    go back to the free pool.
//! 2. Admit at most one waiting participant into a free slot.
//! 3. Ask the lobby for scenes if anyone was admitted since the last tick.
//! 4. Spawn slots whose owner is in the local scene, despawn the rest; with
//!    no local scene everything is despawned. Released slots keep retrying
//!    their despawn.
//! 5. Ship the local avatar snapshot if the local player is in a scene and
//!    visible.

use std::collections::{BTreeMap, VecDeque};

use tandem_types::{ParticipantId, Payload, Recipient, RemoteSnapshot, SceneId};
use tracing::{debug, info, warn};

use crate::config::{MemoryLayout, PuppetConfig};
use crate::game::GameView;
use crate::handle::Anchor;
use crate::memory::Guest;
use crate::net::{Link, Outbox};
use crate::puppet::{ApplyOutcome, PuppetSlot, SlotStatus};

/// Owner of the puppet pool.
#[derive(Debug, Clone)]
pub struct PuppetManager {
    /// Pool settings.
    config: PuppetConfig,
    /// Object layout.
    layout: MemoryLayout,
    /// The pool, indexed by slot.
    slots: Vec<PuppetSlot>,
    /// Free slot indices, claimed from the front.
    free: VecDeque<u8>,
    /// Participants waiting for a slot.
    waiting: VecDeque<ParticipantId>,
    /// Participant to slot index.
    assignments: BTreeMap<ParticipantId, u8>,
    /// The local player's scene.
    local_scene: SceneId,
    /// Ticks run so far.
    tick: u64,
    /// Someone was admitted and scenes should be requested.
    scene_request_due: bool,
}

impl PuppetManager {
    /// Build the pool. Slots whose anchor address would overflow are left
    /// out.
    pub fn new(config: &PuppetConfig, layout: &MemoryLayout) -> Self {
        let slots: Vec<PuppetSlot> = (0..config.pool_size)
            .filter_map(|index| Anchor::for_slot(layout, index))
            .map(PuppetSlot::new)
            .collect();
        let free = slots.iter().map(PuppetSlot::index).collect();
        Self {
            config: config.clone(),
            layout: layout.clone(),
            slots,
            free,
            waiting: VecDeque::new(),
            assignments: BTreeMap::new(),
            local_scene: SceneId::UNKNOWN,
            tick: 0,
            scene_request_due: false,
        }
    }

    /// Give `participant` a slot, or queue it if the pool is full.
    /// Already-known participants are ignored.
    pub fn assign(&mut self, participant: ParticipantId) {
        if self.assignments.contains_key(&participant) || self.waiting.contains(&participant) {
            return;
        }
        if !self.claim(participant) {
            debug!(%participant, waiting = self.waiting.len(), "Puppet pool full, queued");
            self.waiting.push_back(participant);
        }
    }

    /// Take `participant` out of the pool. Its slot is despawned and rejoins
    /// the free pool once nothing is left behind its anchor.
    pub fn release<G: Guest>(&mut self, participant: ParticipantId, guest: &mut G) {
        let Some(index) = self.assignments.remove(&participant) else {
            self.waiting.retain(|waiting| *waiting != participant);
            return;
        };
        let tick = self.tick;
        let Some(slot) = self.slots.get_mut(usize::from(index)) else {
            return;
        };
        slot.release();
        slot.despawn(guest, tick);
        info!(%participant, slot = index, "Participant removed from puppet management");
        self.recycle(index);
    }

    /// Move `participant`'s puppet to `scene`.
    pub fn change_scene(&mut self, participant: ParticipantId, scene: SceneId) -> bool {
        let Some(slot) = self.slot_mut_of(participant) else {
            debug!(%participant, %scene, "No puppet for participant");
            return false;
        };
        slot.set_scene(scene);
        debug!(%participant, %scene, slot = slot.index(), "Puppet moved to scene");
        true
    }

    /// Record the local player's scene.
    pub const fn set_local_scene(&mut self, scene: SceneId) {
        self.local_scene = scene;
    }

    /// The local player's scene as last recorded.
    pub const fn local_scene(&self) -> SceneId {
        self.local_scene
    }

    /// Drop every assignment and despawn every slot.
    pub fn reset<G: Guest>(&mut self, guest: &mut G) {
        self.assignments.clear();
        self.waiting.clear();
        self.free.clear();
        self.scene_request_due = false;
        let tick = self.tick;
        for slot in &mut self.slots {
            slot.release();
            slot.despawn(guest, tick);
            if slot.is_idle() {
                slot.mark_free();
                self.free.push_back(slot.index());
            }
        }
        info!(free = self.free.len(), "Puppet pool reset");
    }

    /// Run one tick.
    pub fn tick<G: Guest>(
        &mut self,
        guest: &mut G,
        game: &dyn GameView,
        link: &Link,
        outbox: &mut dyn Outbox,
    ) {
        self.tick = self.tick.saturating_add(1);
        self.drain(guest);
        self.admit_one();
        if std::mem::take(&mut self.scene_request_due) {
            link.send(outbox, Recipient::Lobby, Payload::RequestScene, true);
        }
        self.update_spawn_state(guest);
        if self.local_scene.is_known() && game.player_visible() {
            link.send(
                outbox,
                Recipient::Relay,
                Payload::RemoteSnapshotUpdate {
                    snapshot: game.capture_snapshot(),
                },
                false,
            );
        }
    }

    /// Offer an inbound snapshot from `sender` to its puppet.
    ///
    /// Ignored while paused. A sender without a slot is assigned one.
    pub fn apply_snapshot<G: Guest>(
        &mut self,
        sender: ParticipantId,
        snapshot: &RemoteSnapshot,
        guest: &mut G,
        game: &dyn GameView,
    ) -> ApplyOutcome {
        if game.is_paused() {
            return ApplyOutcome::Ignored;
        }
        let Some(&index) = self.assignments.get(&sender) else {
            self.assign(sender);
            return ApplyOutcome::Ignored;
        };
        let tick = self.tick;
        let grace = self.config.spawn_grace_ticks;
        let Some(slot) = self.slots.get_mut(usize::from(index)) else {
            return ApplyOutcome::Ignored;
        };
        let ready = slot.is_ready(tick, grace);
        let outcome = slot.apply_snapshot(snapshot, guest, &self.layout, game, ready);
        if outcome == ApplyOutcome::Broke {
            warn!(participant = %sender, slot = index, "Broken puppet, despawning");
            slot.despawn(guest, tick);
        }
        outcome
    }

    /// Slot index owned by `participant`.
    pub fn slot_of(&self, participant: ParticipantId) -> Option<u8> {
        self.assignments.get(&participant).copied()
    }

    /// Status of slot `index`.
    pub fn status(&self, index: u8) -> Option<SlotStatus> {
        self.slots.get(usize::from(index)).map(PuppetSlot::status)
    }

    /// The slot at `index`.
    pub fn slot(&self, index: u8) -> Option<&PuppetSlot> {
        self.slots.get(usize::from(index))
    }

    /// Spawned puppets whose owner is in the local scene.
    pub fn spawned_in_scene(&self) -> usize {
        if !self.local_scene.is_known() {
            return 0;
        }
        self.slots
            .iter()
            .filter(|slot| slot.scene() == self.local_scene && slot.status() == SlotStatus::Spawned)
            .count()
    }

    /// Participants waiting for a slot.
    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    /// Free slots.
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Ticks run so far.
    pub const fn current_tick(&self) -> u64 {
        self.tick
    }

    fn claim(&mut self, participant: ParticipantId) -> bool {
        let Some(index) = self.free.pop_front() else {
            return false;
        };
        let Some(slot) = self.slots.get_mut(usize::from(index)) else {
            return false;
        };
        slot.assign(participant);
        self.assignments.insert(participant, index);
        self.scene_request_due = true;
        info!(%participant, slot = index, "Assigned puppet to participant");
        true
    }

    fn admit_one(&mut self) {
        if self.free.is_empty() {
            return;
        }
        if let Some(participant) = self.waiting.pop_front() {
            self.claim(participant);
        }
    }

    fn drain<G: Guest>(&mut self, guest: &mut G) {
        let tick = self.tick;
        for completion in guest.drain_completions() {
            let Some(slot) = self.slots.get_mut(usize::from(completion.slot)) else {
                warn!(slot = completion.slot, "Completion for unknown slot");
                continue;
            };
            if slot.complete(completion, guest, &self.layout, tick) {
                self.recycle(completion.slot);
            }
        }
    }

    fn update_spawn_state<G: Guest>(&mut self, guest: &mut G) {
        let tick = self.tick;
        let local = self.local_scene;
        let mut recycled = Vec::new();
        for slot in &mut self.slots {
            if slot.is_releasing() {
                slot.despawn(guest, tick);
                if slot.is_idle() {
                    recycled.push(slot.index());
                }
                continue;
            }
            let here = local.is_known() && slot.participant().is_some() && slot.scene() == local;
            let despawn_due = match slot.status() {
                SlotStatus::Broken => true,
                SlotStatus::Spawned => !here,
                _ => false,
            };
            if here && slot.status() == SlotStatus::Unspawned {
                slot.spawn(guest, tick);
            } else if despawn_due {
                slot.despawn(guest, tick);
            }
        }
        for index in recycled {
            self.recycle(index);
        }
    }

    /// Return a released slot to the free pool once it is idle.
    fn recycle(&mut self, index: u8) {
        let Some(slot) = self.slots.get_mut(usize::from(index)) else {
            return;
        };
        if slot.is_releasing() && slot.is_idle() {
            slot.mark_free();
            self.free.push_back(index);
            debug!(slot = index, "Slot returned to free pool");
        }
    }

    fn slot_mut_of(&mut self, participant: ParticipantId) -> Option<&mut PuppetSlot> {
        let index = *self.assignments.get(&participant)?;
        self.slots.get_mut(usize::from(index))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::harness::{FlatMemory, LocalGame};
    use crate::memory::CommandKind;
    use tandem_types::{LobbyId, Packet};

    struct Rig {
        manager: PuppetManager,
        memory: FlatMemory,
        game: LocalGame,
        link: Link,
        sent: Vec<(Recipient, Packet)>,
    }

    impl Rig {
        fn new() -> Self {
            let layout = MemoryLayout::default();
            let mut game = LocalGame::default();
            game.scene = SceneId(6);
            Self {
                manager: PuppetManager::new(&PuppetConfig::default(), &layout),
                memory: FlatMemory::new(&layout),
                game,
                link: Link {
                    me: ParticipantId::new(),
                    lobby: LobbyId::new(),
                },
                sent: Vec::new(),
            }
        }

        fn tick(&mut self) {
            self.manager.set_local_scene(self.game.scene);
            self.manager
                .tick(&mut self.memory, &self.game, &self.link, &mut self.sent);
        }

        fn sent_kinds(&self) -> Vec<tandem_types::MessageKind> {
            self.sent.iter().map(|(_, packet)| packet.kind()).collect()
        }
    }

    #[test]
    fn seventeenth_participant_waits_for_a_release() {
        let mut rig = Rig::new();
        let participants: Vec<ParticipantId> = (0..17).map(|_| ParticipantId::new()).collect();
        for participant in &participants {
            rig.manager.assign(*participant);
        }
        assert_eq!(rig.manager.free_len(), 0);
        assert_eq!(rig.manager.waiting_len(), 1);
        let last = participants[16];
        assert_eq!(rig.manager.slot_of(last), None);

        rig.tick();
        assert_eq!(rig.manager.slot_of(last), None);

        rig.manager.release(participants[3], &mut rig.memory);
        assert_eq!(rig.manager.free_len(), 1);
        rig.tick();
        assert_eq!(rig.manager.slot_of(last), Some(3));
        assert_eq!(rig.manager.waiting_len(), 0);
        assert_eq!(rig.manager.free_len(), 0);
    }

    #[test]
    fn duplicate_assignment_is_ignored() {
        let mut rig = Rig::new();
        let participant = ParticipantId::new();
        rig.manager.assign(participant);
        rig.manager.assign(participant);
        assert_eq!(rig.manager.free_len(), 15);
        assert_eq!(rig.manager.waiting_len(), 0);
    }

    #[test]
    fn admission_requests_scenes_once() {
        let mut rig = Rig::new();
        rig.manager.assign(ParticipantId::new());
        rig.manager.assign(ParticipantId::new());
        rig.tick();
        rig.tick();
        let requests: Vec<_> = rig
            .sent
            .iter()
            .filter(|(_, packet)| packet.payload == Payload::RequestScene)
            .collect();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, Recipient::Lobby);
        assert!(requests[0].1.persist);
    }

    #[test]
    fn puppet_spawns_when_scenes_match_and_despawns_when_they_diverge() {
        let mut rig = Rig::new();
        let peer = ParticipantId::new();
        rig.manager.assign(peer);
        rig.manager.change_scene(peer, SceneId(6));

        rig.tick();
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Spawning));
        rig.tick();
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Spawned));
        assert_eq!(rig.manager.spawned_in_scene(), 1);

        rig.manager.change_scene(peer, SceneId(9));
        rig.tick();
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Despawning));
        rig.tick();
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Unspawned));
        assert_eq!(rig.manager.spawned_in_scene(), 0);
    }

    #[test]
    fn no_local_scene_despawns_everything_and_sends_nothing() {
        let mut rig = Rig::new();
        let peer = ParticipantId::new();
        rig.manager.assign(peer);
        rig.manager.change_scene(peer, SceneId(6));
        rig.tick();
        rig.tick();
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Spawned));

        rig.game.scene = SceneId::UNKNOWN;
        rig.sent.clear();
        rig.tick();
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Despawning));
        assert!(
            !rig.sent_kinds()
                .contains(&tandem_types::MessageKind::RemoteSnapshotUpdate)
        );
    }

    #[test]
    fn snapshot_is_sent_only_when_visible() {
        let mut rig = Rig::new();
        rig.tick();
        assert_eq!(
            rig.sent_kinds(),
            vec![tandem_types::MessageKind::RemoteSnapshotUpdate]
        );
        assert_eq!(rig.sent[0].0, Recipient::Relay);

        rig.sent.clear();
        rig.game.visible = false;
        rig.tick();
        assert!(rig.sent.is_empty());
    }

    #[test]
    fn leaving_while_spawned_frees_the_slot_after_despawn() {
        let mut rig = Rig::new();
        let peer = ParticipantId::new();
        rig.manager.assign(peer);
        rig.manager.change_scene(peer, SceneId(6));
        rig.tick();
        rig.tick();
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Spawned));

        let others: Vec<ParticipantId> = (0..15).map(|_| ParticipantId::new()).collect();
        for other in &others {
            rig.manager.assign(*other);
        }
        let queued = ParticipantId::new();
        rig.manager.assign(queued);
        assert_eq!(rig.manager.waiting_len(), 1);

        rig.manager.release(peer, &mut rig.memory);
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Despawning));
        assert_eq!(rig.manager.free_len(), 0);
        assert_eq!(rig.manager.slot_of(peer), None);

        rig.tick();
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Unspawned));
        assert_eq!(rig.manager.slot_of(queued), Some(0));
    }

    #[test]
    fn failed_release_despawn_is_retried() {
        let mut rig = Rig::new();
        let peer = ParticipantId::new();
        rig.manager.assign(peer);
        rig.manager.change_scene(peer, SceneId(6));
        rig.tick();
        rig.tick();

        rig.memory.fail_next(0, CommandKind::Deallocate);
        rig.manager.release(peer, &mut rig.memory);
        rig.tick();
        // Failed completion restored Spawned; the retry is already queued.
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Despawning));
        assert_eq!(rig.manager.free_len(), 15);
        rig.tick();
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Unspawned));
        assert_eq!(rig.manager.free_len(), 16);
    }

    #[test]
    fn snapshot_from_unknown_sender_assigns_it() {
        let mut rig = Rig::new();
        let stranger = ParticipantId::new();
        let outcome = rig.manager.apply_snapshot(
            stranger,
            &RemoteSnapshot::default(),
            &mut rig.memory,
            &rig.game,
        );
        assert_eq!(outcome, ApplyOutcome::Ignored);
        assert_eq!(rig.manager.slot_of(stranger), Some(0));
    }

    #[test]
    fn paused_game_ignores_snapshots() {
        let mut rig = Rig::new();
        rig.game.paused = true;
        let stranger = ParticipantId::new();
        rig.manager.apply_snapshot(
            stranger,
            &RemoteSnapshot::default(),
            &mut rig.memory,
            &rig.game,
        );
        assert_eq!(rig.manager.slot_of(stranger), None);
    }

    #[test]
    fn snapshot_applies_after_grace_and_broken_puppet_respawns() {
        let mut rig = Rig::new();
        let peer = ParticipantId::new();
        rig.manager.assign(peer);
        rig.manager.change_scene(peer, SceneId(6));
        rig.tick();
        rig.tick();
        let snapshot = RemoteSnapshot {
            position: [1.0, 2.0, 3.0],
            ..RemoteSnapshot::default()
        };
        let early = rig
            .manager
            .apply_snapshot(peer, &snapshot, &mut rig.memory, &rig.game);
        assert_eq!(early, ApplyOutcome::Ignored);

        rig.tick();
        rig.tick();
        let applied = rig
            .manager
            .apply_snapshot(peer, &snapshot, &mut rig.memory, &rig.game);
        assert!(matches!(applied, ApplyOutcome::Applied { .. }));

        rig.memory.clobber_sentinel(0);
        let broke = rig
            .manager
            .apply_snapshot(peer, &snapshot, &mut rig.memory, &rig.game);
        assert_eq!(broke, ApplyOutcome::Broke);
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Despawning));

        rig.tick();
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Spawning));
        rig.tick();
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Spawned));
    }

    #[test]
    fn broken_puppet_in_the_local_scene_retries_a_failed_despawn() {
        let mut rig = Rig::new();
        let peer = ParticipantId::new();
        rig.manager.assign(peer);
        rig.manager.change_scene(peer, SceneId(6));
        for _ in 0..4 {
            rig.tick();
        }
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Spawned));

        rig.memory.clobber_sentinel(0);
        rig.memory.fail_next(0, CommandKind::Deallocate);
        let broke = rig.manager.apply_snapshot(
            peer,
            &RemoteSnapshot::default(),
            &mut rig.memory,
            &rig.game,
        );
        assert_eq!(broke, ApplyOutcome::Broke);

        // The failed despawn restores Broken; the owner is still here, yet
        // the slot is despawned again in the same tick.
        rig.tick();
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Despawning));
        rig.tick();
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Spawning));
        rig.tick();
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Spawned));
    }

    fn commands_for(memory: &FlatMemory, slot: u8) -> Vec<CommandKind> {
        memory
            .history()
            .iter()
            .filter(|command| command.slot == slot)
            .map(|command| command.kind)
            .collect()
    }

    #[test]
    fn held_spawn_blocks_further_commands_across_scene_change_and_release() {
        let mut rig = Rig::new();
        let peer = ParticipantId::new();
        rig.manager.assign(peer);
        rig.manager.change_scene(peer, SceneId(6));
        rig.memory.set_hold(true);

        rig.tick();
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Spawning));

        rig.manager.change_scene(peer, SceneId(9));
        rig.tick();
        rig.manager.release(peer, &mut rig.memory);
        rig.tick();

        assert_eq!(commands_for(&rig.memory, 0), vec![CommandKind::Allocate]);
        let in_flight = rig.manager.slot(0).unwrap().in_flight().unwrap();
        assert_eq!(in_flight.kind, CommandKind::Allocate);
        assert_eq!(in_flight.issued_at, 1);
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Spawning));
        assert_eq!(rig.manager.free_len(), 15);

        // The spawn lands, then the pending release despawns it.
        rig.memory.set_hold(false);
        rig.tick();
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Despawning));
        assert_eq!(
            commands_for(&rig.memory, 0),
            vec![CommandKind::Allocate, CommandKind::Deallocate]
        );

        rig.tick();
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Unspawned));
        assert_eq!(rig.manager.free_len(), 16);
        assert_eq!(commands_for(&rig.memory, 0).len(), 2);
    }

    #[test]
    fn held_despawn_survives_reset_without_a_second_command() {
        let mut rig = Rig::new();
        let peer = ParticipantId::new();
        rig.manager.assign(peer);
        rig.manager.change_scene(peer, SceneId(6));
        rig.tick();
        rig.tick();
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Spawned));

        rig.memory.set_hold(true);
        rig.manager.change_scene(peer, SceneId(9));
        rig.tick();
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Despawning));

        rig.manager.reset(&mut rig.memory);
        rig.tick();
        rig.tick();
        assert_eq!(
            commands_for(&rig.memory, 0),
            vec![CommandKind::Allocate, CommandKind::Deallocate]
        );
        assert_eq!(rig.manager.free_len(), 15);

        rig.memory.set_hold(false);
        rig.tick();
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Unspawned));
        assert_eq!(rig.manager.free_len(), 16);
        assert_eq!(commands_for(&rig.memory, 0).len(), 2);
    }

    #[test]
    fn reset_clears_pool() {
        let mut rig = Rig::new();
        let peer = ParticipantId::new();
        rig.manager.assign(peer);
        rig.manager.change_scene(peer, SceneId(6));
        rig.tick();
        rig.tick();

        rig.manager.reset(&mut rig.memory);
        assert_eq!(rig.manager.slot_of(peer), None);
        assert_eq!(rig.manager.free_len(), 15);
        rig.tick();
        assert_eq!(rig.manager.free_len(), 16);
        assert_eq!(rig.manager.status(0), Some(SlotStatus::Unspawned));
    }
}
