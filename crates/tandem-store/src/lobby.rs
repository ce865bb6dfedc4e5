//! The relay-side, per-lobby store.
//!
//! On top of the authoritative persistent state, the relay tracks which
//! participants are in the lobby, the scene each last reported, and the last
//! persistent packet per sender and kind for replay to late joiners.
//!
//! Membership changes only on join and leave. Scene records are
//! last-writer-wins (no merge, no versioning) and may name a participant
//! that is not a member, such as one whose update arrived after it left.

use std::collections::{BTreeMap, BTreeSet};

use tandem_types::{MessageKind, Packet, ParticipantId, SceneId};
use tracing::debug;

use crate::store::SharedStore;

/// Authoritative state of one lobby on the relay.
#[derive(Debug, Clone, Default)]
pub struct LobbyStore {
    /// Persistent progress shared by the lobby.
    progress: SharedStore,
    /// Participants currently in the lobby.
    members: BTreeSet<ParticipantId>,
    /// Participant records: id -> last reported scene.
    scenes: BTreeMap<ParticipantId, SceneId>,
    /// Last persistent packet per (sender, kind).
    retained: BTreeMap<(ParticipantId, MessageKind), Packet>,
}

impl LobbyStore {
    /// An empty lobby with zeroed progress.
    pub fn new() -> Self {
        Self::default()
    }

    /// The authoritative persistent state.
    pub const fn progress(&self) -> &SharedStore {
        &self.progress
    }

    /// Mutable access to the authoritative persistent state.
    pub const fn progress_mut(&mut self) -> &mut SharedStore {
        &mut self.progress
    }

    /// Add a participant with an unknown scene. Returns `false` if the
    /// participant was already present (its record is left untouched).
    pub fn join(&mut self, participant: ParticipantId) -> bool {
        if !self.members.insert(participant) {
            return false;
        }
        self.scenes.insert(participant, SceneId::UNKNOWN);
        true
    }

    /// Remove a participant and everything retained on its behalf.
    /// Returns `false` if it was not present.
    pub fn leave(&mut self, participant: ParticipantId) -> bool {
        self.retained.retain(|(sender, _), _| *sender != participant);
        self.scenes.remove(&participant);
        self.members.remove(&participant)
    }

    /// Whether the participant is in the lobby.
    pub fn contains(&self, participant: ParticipantId) -> bool {
        self.members.contains(&participant)
    }

    /// Overwrite the participant's scene. Returns the previous value
    /// ([`SceneId::UNKNOWN`] if none was recorded).
    pub fn record_scene(&mut self, participant: ParticipantId, scene: SceneId) -> SceneId {
        self.scenes
            .insert(participant, scene)
            .unwrap_or(SceneId::UNKNOWN)
    }

    /// The participant's last reported scene.
    pub fn scene_of(&self, participant: ParticipantId) -> Option<SceneId> {
        self.scenes.get(&participant).copied()
    }

    /// Every participant in the lobby, in id order.
    pub fn members(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.members.iter().copied()
    }

    /// Number of participants in the lobby.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Other members whose recorded scene equals the sender's.
    ///
    /// Empty if the sender has no known scene.
    pub fn peers_in_scene_of(&self, sender: ParticipantId) -> Vec<ParticipantId> {
        let Some(scene) = self.scene_of(sender).filter(|s| s.is_known()) else {
            return Vec::new();
        };
        self.members
            .iter()
            .filter(|id| **id != sender && self.scenes.get(*id) == Some(&scene))
            .copied()
            .collect()
    }

    /// Keep a persistent packet from a member for replay. Non-persistent
    /// packets and packets from non-members are ignored.
    pub fn retain(&mut self, packet: &Packet) {
        if !packet.persist || !self.members.contains(&packet.sender) {
            return;
        }
        debug!(sender = %packet.sender, kind = ?packet.kind(), "Retaining persistent packet");
        self.retained
            .insert((packet.sender, packet.kind()), packet.clone());
    }

    /// Retained packets not sent by `exclude`, for replay to a new joiner.
    pub fn retained_for(&self, exclude: ParticipantId) -> Vec<Packet> {
        self.retained
            .iter()
            .filter(|((sender, _), _)| *sender != exclude)
            .map(|(_, packet)| packet.clone())
            .collect()
    }
}
