//! One participant's view of a lobby: the tick entry point, the lobby
//! lifecycle hooks, and inbound packet dispatch.

use tandem_types::{Packet, ParticipantId, Payload, Recipient, SceneId};
use tracing::{debug, info};

use crate::config::{SessionConfig, TandemConfig};
use crate::game::GameView;
use crate::manager::PuppetManager;
use crate::memory::Guest;
use crate::net::{Link, Outbox};
use crate::sync::MergeEngine;

/// A participant connected to one lobby.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session settings.
    config: SessionConfig,
    /// Who we are and where.
    link: Link,
    /// Persistent-state reconciliation.
    merge: MergeEngine,
    /// Remote avatars.
    puppets: PuppetManager,
    /// Local scene as of the last tick.
    scene: SceneId,
}

impl Session {
    /// A session for `link` with an empty store and pool.
    pub fn new(config: &TandemConfig, link: Link) -> Self {
        Self {
            config: config.session.clone(),
            link,
            merge: MergeEngine::new(),
            puppets: PuppetManager::new(&config.puppets, &config.layout),
            scene: SceneId::UNKNOWN,
        }
    }

    /// Identity stamped on outgoing packets.
    pub const fn link(&self) -> Link {
        self.link
    }

    /// The merge engine.
    pub const fn merge(&self) -> &MergeEngine {
        &self.merge
    }

    /// The puppet pool.
    pub const fn puppets(&self) -> &PuppetManager {
        &self.puppets
    }

    /// Local scene as of the last tick.
    pub const fn scene(&self) -> SceneId {
        self.scene
    }

    /// Joined the lobby: start from an empty store and ask for the
    /// authoritative one.
    pub fn on_lobby_joined(&mut self, outbox: &mut dyn Outbox) {
        self.merge.reset();
        self.link
            .send(outbox, Recipient::Relay, Payload::RequestStorage, false);
        info!(lobby = %self.link.lobby, "Requested lobby storage");
    }

    /// (Re)connected to the relay: clear the pool and announce our scene.
    pub fn on_connected<G: Guest>(
        &mut self,
        guest: &mut G,
        game: &dyn GameView,
        outbox: &mut dyn Outbox,
    ) {
        self.puppets.reset(guest);
        if !game.player_exists() {
            return;
        }
        self.link.send(
            outbox,
            Recipient::Lobby,
            Payload::SceneUpdate { scene: self.scene },
            true,
        );
    }

    /// Another participant joined the lobby.
    pub fn on_participant_joined(&mut self, participant: ParticipantId) {
        if participant != self.link.me {
            self.puppets.assign(participant);
        }
    }

    /// Another participant left the lobby.
    pub fn on_participant_left<G: Guest>(&mut self, participant: ParticipantId, guest: &mut G) {
        self.puppets.release(participant, guest);
    }

    /// Run one simulation frame. Returns `false` while the local player is
    /// missing or the simulation is still warming up.
    pub fn tick<G: Guest>(
        &mut self,
        guest: &mut G,
        game: &mut dyn GameView,
        outbox: &mut dyn Outbox,
    ) -> bool {
        if !game.player_exists() || game.frame_counter() < self.config.warmup_frames {
            return false;
        }

        let scene = game.current_scene();
        if scene != self.scene {
            info!(from = %self.scene, to = %scene, "Local scene changed");
            self.scene = scene;
            self.link.send(
                outbox,
                Recipient::Lobby,
                Payload::SceneUpdate { scene },
                true,
            );
        }
        self.puppets.set_local_scene(scene);

        self.merge.reconcile(game, &self.link, outbox);
        self.puppets.tick(guest, &*game, &self.link, outbox);
        true
    }

    /// Dispatch one inbound packet.
    pub fn handle<G: Guest>(
        &mut self,
        packet: &Packet,
        guest: &mut G,
        game: &dyn GameView,
        outbox: &mut dyn Outbox,
    ) {
        if packet.lobby != self.link.lobby {
            debug!(lobby = %packet.lobby, kind = ?packet.kind(), "Packet for another lobby");
            return;
        }
        let from_self = packet.sender == self.link.me;
        match &packet.payload {
            Payload::StorageSnapshot {
                save_buffer,
                star_count,
            } => self
                .merge
                .on_storage_snapshot(save_buffer.clone(), *star_count),
            Payload::SaveBufferUpdate { save_buffer } => {
                self.merge.on_save_buffer_update(save_buffer);
            }
            Payload::StarCountUpdate { star_count } => {
                self.merge.on_star_count_update(*star_count);
            }
            _ if from_self => {
                debug!(kind = ?packet.kind(), "Ignoring own packet");
            }
            Payload::SceneUpdate { scene } => {
                self.puppets.change_scene(packet.sender, *scene);
            }
            Payload::RequestScene => {
                self.link.send(
                    outbox,
                    Recipient::Participant(packet.sender),
                    Payload::SceneUpdate {
                        scene: game.current_scene(),
                    },
                    false,
                );
            }
            Payload::RemoteSnapshotUpdate { snapshot } => {
                self.puppets
                    .apply_snapshot(packet.sender, snapshot, guest, game);
            }
            Payload::RequestStorage => {
                debug!(sender = %packet.sender, "Ignoring storage request");
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;
    use crate::harness::{FlatMemory, LocalGame};
    use tandem_types::{LobbyId, MessageKind, RemoteSnapshot};

    struct Participant {
        session: Session,
        memory: FlatMemory,
        game: LocalGame,
        sent: Vec<(Recipient, Packet)>,
    }

    impl Participant {
        fn new(lobby: LobbyId) -> Self {
            let config = TandemConfig::default();
            Self {
                session: Session::new(
                    &config,
                    Link {
                        me: ParticipantId::new(),
                        lobby,
                    },
                ),
                memory: FlatMemory::new(&config.layout),
                game: LocalGame::default(),
                sent: Vec::new(),
            }
        }

        fn tick(&mut self) -> bool {
            self.session
                .tick(&mut self.memory, &mut self.game, &mut self.sent)
        }

        fn receive(&mut self, packet: &Packet) {
            self.session
                .handle(packet, &mut self.memory, &self.game, &mut self.sent);
        }

        fn kinds(&self) -> Vec<MessageKind> {
            self.sent.iter().map(|(_, p)| p.kind()).collect()
        }
    }

    #[test]
    fn warm_up_gates_the_tick() {
        let mut p = Participant::new(LobbyId::new());
        p.game.frame_counter = 49;
        assert!(!p.tick());
        p.game.frame_counter = 50;
        p.game.player_exists = false;
        assert!(!p.tick());
        p.game.player_exists = true;
        assert!(p.tick());
    }

    #[test]
    fn scene_change_is_broadcast_persistently_once() {
        let mut p = Participant::new(LobbyId::new());
        p.game.scene = SceneId(16);
        p.tick();
        p.tick();
        let scene_updates: Vec<_> = p
            .sent
            .iter()
            .filter(|(_, packet)| packet.kind() == MessageKind::SceneUpdate)
            .collect();
        assert_eq!(scene_updates.len(), 1);
        assert_eq!(scene_updates[0].0, Recipient::Lobby);
        assert!(scene_updates[0].1.persist);
        assert_eq!(p.session.scene(), SceneId(16));
    }

    #[test]
    fn scene_request_is_answered_with_current_scene() {
        let lobby = LobbyId::new();
        let mut p = Participant::new(lobby);
        p.game.scene = SceneId(9);
        let asker = ParticipantId::new();
        p.receive(&Packet::new(asker, lobby, Payload::RequestScene, true));

        assert_eq!(p.sent.len(), 1);
        let (to, reply) = &p.sent[0];
        assert_eq!(*to, Recipient::Participant(asker));
        assert!(!reply.persist);
        assert_eq!(reply.payload, Payload::SceneUpdate { scene: SceneId(9) });
    }

    #[test]
    fn lobby_join_requests_storage() {
        let mut p = Participant::new(LobbyId::new());
        p.session.on_lobby_joined(&mut p.sent);
        assert_eq!(p.kinds(), vec![MessageKind::RequestStorage]);
        assert_eq!(p.sent[0].0, Recipient::Relay);
    }

    #[test]
    fn reconnect_resets_pool_and_resends_scene() {
        let lobby = LobbyId::new();
        let mut p = Participant::new(lobby);
        let peer = ParticipantId::new();
        p.session.on_participant_joined(peer);
        p.game.scene = SceneId(3);
        p.tick();
        p.sent.clear();

        p.session.on_connected(&mut p.memory, &p.game, &mut p.sent);
        assert_eq!(p.session.puppets().slot_of(peer), None);
        assert_eq!(p.kinds(), vec![MessageKind::SceneUpdate]);
        assert!(p.sent[0].1.persist);
    }

    #[test]
    fn remote_puppet_follows_scene_and_snapshots() {
        let lobby = LobbyId::new();
        let mut p = Participant::new(lobby);
        p.game.scene = SceneId(6);
        let peer = ParticipantId::new();
        p.session.on_participant_joined(peer);
        p.receive(&Packet::new(
            peer,
            lobby,
            Payload::SceneUpdate { scene: SceneId(6) },
            false,
        ));
        for _ in 0..4 {
            p.tick();
        }
        let slot = p.session.puppets().slot_of(peer).unwrap();
        assert_eq!(
            p.session.puppets().status(slot),
            Some(crate::puppet::SlotStatus::Spawned)
        );

        let snapshot = RemoteSnapshot {
            position: [4.0, 5.0, 6.0],
            ..RemoteSnapshot::default()
        };
        p.receive(&Packet::new(
            peer,
            lobby,
            Payload::RemoteSnapshotUpdate { snapshot },
            false,
        ));
        let object = p.memory.object_of(slot).unwrap();
        let x = crate::memory::Memory::read_u32(&p.memory, object + 0xA0);
        assert_eq!(x, 4.0f32.to_bits());
    }

    #[test]
    fn own_and_foreign_lobby_packets_are_ignored() {
        let lobby = LobbyId::new();
        let mut p = Participant::new(lobby);
        let me = p.session.link().me;
        p.receive(&Packet::new(
            me,
            lobby,
            Payload::RemoteSnapshotUpdate {
                snapshot: RemoteSnapshot::default(),
            },
            false,
        ));
        assert_eq!(p.session.puppets().slot_of(me), None);

        let stranger = ParticipantId::new();
        p.receive(&Packet::new(
            stranger,
            LobbyId::new(),
            Payload::RemoteSnapshotUpdate {
                snapshot: RemoteSnapshot::default(),
            },
            false,
        ));
        assert_eq!(p.session.puppets().slot_of(stranger), None);
    }
}
