//! Relay-side handlers.
//!
//! The [`Relay`] owns one [`LobbyContext`] per lobby and routes each inbound
//! packet to a handler that receives that context explicitly. A packet for a
//! lobby with no context is dropped and logged.
//!
//! | Inbound | Handler effect |
//! |---------|----------------|
//! | `RequestStorage` | answer the sender with `StorageSnapshot` |
//! | `SaveBufferUpdate` | OR into the lobby buffer; on change broadcast it, persistent |
//! | `StarCountUpdate` | accept only if higher; on accept broadcast it, persistent |
//! | `SceneUpdate` | overwrite the sender's scene record; no rebroadcast |
//! | `RemoteSnapshotUpdate` | forward to peers recorded in the sender's scene |
//!
//! Independently of the handler, every packet is forwarded according to its
//! [`Recipient`], and persistent packets are retained for late joiners.
//! Packets from senders that are not lobby members are neither retained nor
//! forwarded; only their scene is recorded.

use std::collections::BTreeMap;

use tandem_store::LobbyStore;
use tandem_types::{LobbyId, Packet, ParticipantId, Payload, Recipient, SaveBuffer, SceneId};
use tracing::{debug, info, warn};

use crate::net::RelayOutbox;

/// Everything the relay keeps for one lobby.
#[derive(Debug, Clone)]
pub struct LobbyContext {
    /// The lobby.
    lobby: LobbyId,
    /// Authoritative state and participant records.
    store: LobbyStore,
}

impl LobbyContext {
    /// Fresh context with zeroed progress and no participants.
    pub fn new(lobby: LobbyId) -> Self {
        Self {
            lobby,
            store: LobbyStore::new(),
        }
    }

    /// The lobby id.
    pub const fn lobby(&self) -> LobbyId {
        self.lobby
    }

    /// The lobby store.
    pub const fn store(&self) -> &LobbyStore {
        &self.store
    }

    /// Send `packet` to every participant in the lobby.
    fn broadcast(&self, packet: &Packet, outbox: &mut dyn RelayOutbox) {
        for member in self.store.members() {
            outbox.send_to(member, packet.clone());
        }
    }
}

/// All lobbies hosted by this relay.
#[derive(Debug, Clone, Default)]
pub struct Relay {
    /// Per-lobby contexts.
    lobbies: BTreeMap<LobbyId, LobbyContext>,
}

impl Relay {
    /// A relay with no lobbies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate storage for a new lobby. Returns `false` if it existed.
    pub fn create_lobby(&mut self, lobby: LobbyId) -> bool {
        if self.lobbies.contains_key(&lobby) {
            return false;
        }
        self.lobbies.insert(lobby, LobbyContext::new(lobby));
        info!(%lobby, "Lobby storage created");
        true
    }

    /// Drop a lobby and everything stored for it.
    pub fn close_lobby(&mut self, lobby: LobbyId) -> bool {
        let closed = self.lobbies.remove(&lobby).is_some();
        if closed {
            info!(%lobby, "Lobby storage released");
        }
        closed
    }

    /// The context of `lobby`.
    pub fn lobby(&self, lobby: LobbyId) -> Option<&LobbyContext> {
        self.lobbies.get(&lobby)
    }

    /// Record a joining participant and replay retained packets to it.
    pub fn on_participant_joined(
        &mut self,
        lobby: LobbyId,
        participant: ParticipantId,
        outbox: &mut dyn RelayOutbox,
    ) {
        let Some(ctx) = self.lobbies.get_mut(&lobby) else {
            warn!(%lobby, %participant, "Join for unknown lobby");
            return;
        };
        ctx.store.join(participant);
        let replay = ctx.store.retained_for(participant);
        info!(%lobby, %participant, replayed = replay.len(), "Participant joined");
        for packet in replay {
            outbox.send_to(participant, packet);
        }
    }

    /// Remove a leaving participant's record.
    pub fn on_participant_left(&mut self, lobby: LobbyId, participant: ParticipantId) {
        let Some(ctx) = self.lobbies.get_mut(&lobby) else {
            warn!(%lobby, %participant, "Leave for unknown lobby");
            return;
        };
        ctx.store.leave(participant);
        info!(%lobby, %participant, "Participant left");
    }

    /// Handle one inbound packet addressed to `to`.
    pub fn handle(&mut self, to: Recipient, packet: &Packet, outbox: &mut dyn RelayOutbox) {
        let Some(ctx) = self.lobbies.get_mut(&packet.lobby) else {
            warn!(
                lobby = %packet.lobby,
                sender = %packet.sender,
                kind = ?packet.kind(),
                "No storage for lobby, dropping packet"
            );
            return;
        };
        if !ctx.store.contains(packet.sender) {
            if let Payload::SceneUpdate { scene } = &packet.payload {
                on_scene_update(ctx, packet.sender, *scene);
            }
            debug!(
                lobby = %packet.lobby,
                sender = %packet.sender,
                kind = ?packet.kind(),
                "Sender not in lobby, not forwarding"
            );
            return;
        }
        ctx.store.retain(packet);

        match &packet.payload {
            Payload::RequestStorage => on_request_storage(ctx, packet.sender, outbox),
            Payload::SaveBufferUpdate { save_buffer } => {
                on_save_buffer_update(ctx, packet.sender, save_buffer, outbox);
            }
            Payload::StarCountUpdate { star_count } => {
                on_star_count_update(ctx, packet.sender, *star_count, outbox);
            }
            Payload::SceneUpdate { scene } => on_scene_update(ctx, packet.sender, *scene),
            Payload::RemoteSnapshotUpdate { .. } => on_remote_snapshot(ctx, packet, outbox),
            Payload::StorageSnapshot { .. } => {
                debug!(sender = %packet.sender, "Ignoring storage snapshot sent to relay");
            }
            Payload::RequestScene => {}
        }

        forward(ctx, to, packet, outbox);
    }
}

/// Answer the requester with the lobby's stored progress.
pub fn on_request_storage(
    ctx: &LobbyContext,
    requester: ParticipantId,
    outbox: &mut dyn RelayOutbox,
) {
    let progress = ctx.store.progress();
    let reply = Packet::new(
        requester,
        ctx.lobby,
        Payload::StorageSnapshot {
            save_buffer: progress.save_buffer().clone(),
            star_count: progress.star_count(),
        },
        false,
    );
    info!(lobby = %ctx.lobby, %requester, "Sending lobby storage");
    outbox.send_to(requester, reply);
}

/// OR an inbound buffer into the lobby; broadcast the result on change.
pub fn on_save_buffer_update(
    ctx: &mut LobbyContext,
    sender: ParticipantId,
    save_buffer: &SaveBuffer,
    outbox: &mut dyn RelayOutbox,
) -> bool {
    if !ctx.store.progress_mut().absorb_save_buffer(save_buffer) {
        return false;
    }
    let merged = ctx.store.progress().save_buffer().clone();
    let update = Packet::new(
        sender,
        ctx.lobby,
        Payload::SaveBufferUpdate {
            save_buffer: merged,
        },
        true,
    );
    ctx.broadcast(&update, outbox);
    info!(lobby = %ctx.lobby, %sender, "Save buffer updated");
    true
}

/// Accept a strictly higher star count and broadcast it; drop anything else.
pub fn on_star_count_update(
    ctx: &mut LobbyContext,
    sender: ParticipantId,
    star_count: u32,
    outbox: &mut dyn RelayOutbox,
) -> bool {
    if !ctx.store.progress_mut().raise_star_count(star_count) {
        debug!(lobby = %ctx.lobby, %sender, star_count, "Stale star count dropped");
        return false;
    }
    let update = Packet::new(
        sender,
        ctx.lobby,
        Payload::StarCountUpdate { star_count },
        true,
    );
    ctx.broadcast(&update, outbox);
    info!(lobby = %ctx.lobby, %sender, star_count, "Star count updated");
    true
}

/// Overwrite the sender's scene record. Other participants are not told.
pub fn on_scene_update(ctx: &mut LobbyContext, sender: ParticipantId, scene: SceneId) {
    let previous = ctx.store.record_scene(sender, scene);
    info!(lobby = %ctx.lobby, participant = %sender, from = %previous, to = %scene, "Participant scene updated");
}

/// Forward a snapshot to the other participants in the sender's scene.
pub fn on_remote_snapshot(ctx: &LobbyContext, packet: &Packet, outbox: &mut dyn RelayOutbox) {
    for peer in ctx.store.peers_in_scene_of(packet.sender) {
        outbox.send_to(peer, packet.clone());
    }
}

/// Pass a packet on to the peers named by `to`.
fn forward(ctx: &LobbyContext, to: Recipient, packet: &Packet, outbox: &mut dyn RelayOutbox) {
    match to {
        Recipient::Relay => {}
        Recipient::Lobby => {
            for member in ctx.store.members().filter(|m| *m != packet.sender) {
                outbox.send_to(member, packet.clone());
            }
        }
        Recipient::Participant(target) => {
            if ctx.store.contains(target) {
                outbox.send_to(target, packet.clone());
            } else {
                debug!(lobby = %ctx.lobby, %target, kind = ?packet.kind(), "Unicast target not in lobby");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use tandem_types::{MessageKind, RemoteSnapshot, SAVE_BUFFER_LEN};

    struct Fixture {
        relay: Relay,
        lobby: LobbyId,
        a: ParticipantId,
        b: ParticipantId,
        out: Vec<(ParticipantId, Packet)>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut relay = Relay::new();
            let lobby = LobbyId::new();
            relay.create_lobby(lobby);
            let a = ParticipantId::new();
            let b = ParticipantId::new();
            let mut out = Vec::new();
            relay.on_participant_joined(lobby, a, &mut out);
            relay.on_participant_joined(lobby, b, &mut out);
            out.clear();
            Self {
                relay,
                lobby,
                a,
                b,
                out,
            }
        }

        fn send(&mut self, from: ParticipantId, to: Recipient, payload: Payload, persist: bool) {
            let packet = Packet::new(from, self.lobby, payload, persist);
            self.relay.handle(to, &packet, &mut self.out);
        }

        fn progress(&self) -> &tandem_store::SharedStore {
            self.relay.lobby(self.lobby).unwrap().store().progress()
        }
    }

    fn buffer_with_byte0(value: u8) -> SaveBuffer {
        let mut bytes = [0u8; SAVE_BUFFER_LEN];
        bytes[0] = value;
        SaveBuffer::from_array(bytes)
    }

    #[test]
    fn save_buffers_from_two_participants_converge() {
        let mut fx = Fixture::new();
        let (a, b) = (fx.a, fx.b);
        fx.send(
            a,
            Recipient::Relay,
            Payload::SaveBufferUpdate {
                save_buffer: buffer_with_byte0(0b1010_0000),
            },
            false,
        );
        fx.send(
            b,
            Recipient::Relay,
            Payload::SaveBufferUpdate {
                save_buffer: buffer_with_byte0(0b0101_0000),
            },
            false,
        );
        assert_eq!(fx.progress().save_buffer().byte(0), Some(0b1111_0000));

        // Each accepted update goes to both participants, persistent.
        assert_eq!(fx.out.len(), 4);
        assert!(fx.out.iter().all(|(_, p)| p.persist));
        let last = &fx.out[3].1.payload;
        assert_eq!(
            *last,
            Payload::SaveBufferUpdate {
                save_buffer: buffer_with_byte0(0b1111_0000)
            }
        );
    }

    #[test]
    fn duplicate_save_buffer_is_not_rebroadcast() {
        let mut fx = Fixture::new();
        let a = fx.a;
        let payload = Payload::SaveBufferUpdate {
            save_buffer: buffer_with_byte0(1),
        };
        fx.send(a, Recipient::Relay, payload.clone(), false);
        fx.out.clear();
        fx.send(a, Recipient::Relay, payload, false);
        assert!(fx.out.is_empty());
    }

    #[test]
    fn lower_star_count_is_never_broadcast() {
        let mut fx = Fixture::new();
        let a = fx.a;
        fx.send(a, Recipient::Relay, Payload::StarCountUpdate { star_count: 5 }, false);
        fx.send(a, Recipient::Relay, Payload::StarCountUpdate { star_count: 3 }, false);

        assert_eq!(fx.progress().star_count(), 5);
        assert_eq!(fx.out.len(), 2);
        assert!(
            fx.out
                .iter()
                .all(|(_, p)| p.payload == Payload::StarCountUpdate { star_count: 5 })
        );
    }

    #[test]
    fn storage_request_is_answered_to_requester_only() {
        let mut fx = Fixture::new();
        let (a, b) = (fx.a, fx.b);
        fx.send(a, Recipient::Relay, Payload::StarCountUpdate { star_count: 2 }, false);
        fx.out.clear();

        fx.send(b, Recipient::Relay, Payload::RequestStorage, false);
        assert_eq!(fx.out.len(), 1);
        assert_eq!(fx.out[0].0, b);
        assert!(matches!(
            fx.out[0].1.payload,
            Payload::StorageSnapshot { star_count: 2, .. }
        ));
    }

    #[test]
    fn scene_updates_are_recorded_last_writer_wins_and_not_rebroadcast() {
        let mut fx = Fixture::new();
        let a = fx.a;
        fx.send(a, Recipient::Relay, Payload::SceneUpdate { scene: SceneId(16) }, true);
        fx.send(a, Recipient::Relay, Payload::SceneUpdate { scene: SceneId(9) }, true);
        let store = fx.relay.lobby(fx.lobby).unwrap().store();
        assert_eq!(store.scene_of(a), Some(SceneId(9)));
        assert!(fx.out.is_empty());
    }

    #[test]
    fn snapshots_only_reach_peers_in_the_same_scene() {
        let mut fx = Fixture::new();
        let (a, b) = (fx.a, fx.b);
        let c = ParticipantId::new();
        fx.relay.on_participant_joined(fx.lobby, c, &mut fx.out);
        for (who, scene) in [(a, 6), (b, 6), (c, 7)] {
            fx.send(who, Recipient::Relay, Payload::SceneUpdate { scene: SceneId(scene) }, true);
        }
        fx.out.clear();

        fx.send(
            a,
            Recipient::Relay,
            Payload::RemoteSnapshotUpdate {
                snapshot: RemoteSnapshot::default(),
            },
            false,
        );
        assert_eq!(fx.out.len(), 1);
        assert_eq!(fx.out[0].0, b);
    }

    #[test]
    fn scene_request_is_forwarded_and_answered_peer_to_peer() {
        let mut fx = Fixture::new();
        let (a, b) = (fx.a, fx.b);
        fx.send(a, Recipient::Lobby, Payload::RequestScene, true);
        assert_eq!(fx.out.len(), 1);
        assert_eq!(fx.out[0].0, b);

        fx.out.clear();
        fx.send(
            b,
            Recipient::Participant(a),
            Payload::SceneUpdate { scene: SceneId(3) },
            false,
        );
        assert_eq!(fx.out.len(), 1);
        assert_eq!(fx.out[0].0, a);
    }

    #[test]
    fn late_joiner_receives_retained_packets() {
        let mut fx = Fixture::new();
        let a = fx.a;
        fx.send(a, Recipient::Lobby, Payload::SceneUpdate { scene: SceneId(4) }, true);
        fx.send(a, Recipient::Lobby, Payload::SceneUpdate { scene: SceneId(5) }, true);
        fx.send(a, Recipient::Lobby, Payload::RequestScene, true);
        fx.out.clear();

        let late = ParticipantId::new();
        fx.relay.on_participant_joined(fx.lobby, late, &mut fx.out);
        let kinds: Vec<MessageKind> = fx.out.iter().map(|(_, p)| p.kind()).collect();
        assert_eq!(kinds.len(), 2);
        assert!(kinds.contains(&MessageKind::SceneUpdate));
        assert!(kinds.contains(&MessageKind::RequestScene));
        assert!(fx.out.iter().any(|(_, p)| p.payload == Payload::SceneUpdate { scene: SceneId(5) }));

        fx.relay.on_participant_left(fx.lobby, a);
        fx.out.clear();
        let later = ParticipantId::new();
        fx.relay.on_participant_joined(fx.lobby, later, &mut fx.out);
        assert!(fx.out.is_empty());
    }

    #[test]
    fn departed_participant_is_not_readmitted_by_a_late_scene_update() {
        let mut fx = Fixture::new();
        let (a, b) = (fx.a, fx.b);
        fx.relay.on_participant_left(fx.lobby, a);
        fx.send(a, Recipient::Lobby, Payload::SceneUpdate { scene: SceneId(6) }, true);
        assert!(fx.out.is_empty());

        fx.send(b, Recipient::Relay, Payload::StarCountUpdate { star_count: 1 }, false);
        let targets: Vec<ParticipantId> = fx.out.iter().map(|(to, _)| *to).collect();
        assert_eq!(targets, vec![b]);

        let store = fx.relay.lobby(fx.lobby).unwrap().store();
        assert_eq!(store.member_count(), 1);
        assert_eq!(store.scene_of(a), Some(SceneId(6)));

        fx.out.clear();
        let late = ParticipantId::new();
        fx.relay.on_participant_joined(fx.lobby, late, &mut fx.out);
        assert!(fx.out.iter().all(|(_, p)| p.sender != a));
    }

    #[test]
    fn unknown_lobby_drops_packets() {
        let mut relay = Relay::new();
        let mut out: Vec<(ParticipantId, Packet)> = Vec::new();
        let packet = Packet::new(
            ParticipantId::new(),
            LobbyId::new(),
            Payload::RequestStorage,
            false,
        );
        relay.handle(Recipient::Relay, &packet, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn join_and_leave_maintain_records() {
        let mut fx = Fixture::new();
        let a = fx.a;
        let store = fx.relay.lobby(fx.lobby).unwrap().store();
        assert_eq!(store.scene_of(a), Some(SceneId::UNKNOWN));

        fx.relay.on_participant_left(fx.lobby, a);
        let store = fx.relay.lobby(fx.lobby).unwrap().store();
        assert_eq!(store.scene_of(a), None);
        assert_eq!(store.member_count(), 1);
        assert!(fx.relay.close_lobby(fx.lobby));
        assert!(fx.relay.lobby(fx.lobby).is_none());
    }
}
