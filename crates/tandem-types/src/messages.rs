//! The wire contract between participants and the relay.
//!
//! Every [`Packet`] carries its kind (the [`Payload`] variant), the
//! originating participant, the lobby, and a persistence flag telling the
//! relay whether to retain the value for late joiners. Encoding is left to
//! the transport; these types only derive `serde`.
//!
//! | Kind | Direction | Persisted |
//! |------|-----------|-----------|
//! | `RequestStorage` | participant -> relay | no |
//! | `StorageSnapshot` | relay -> participant | no |
//! | `SaveBufferUpdate` | both | yes (relay broadcasts) |
//! | `StarCountUpdate` | both | yes (relay broadcasts) |
//! | `SceneUpdate` | both | yes |
//! | `RequestScene` | participant -> participant | yes |
//! | `RemoteSnapshotUpdate` | participant -> participant | no |

use serde::{Deserialize, Serialize};

use crate::ids::{LobbyId, ParticipantId, SceneId};
use crate::progress::SaveBuffer;
use crate::snapshot::RemoteSnapshot;

/// Discriminant of a [`Payload`], used for logging and retention keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Ask the relay for the lobby's persistent state.
    RequestStorage,
    /// The relay's answer to [`MessageKind::RequestStorage`].
    StorageSnapshot,
    /// A merged save buffer.
    SaveBufferUpdate,
    /// A star count.
    StarCountUpdate,
    /// The sender's current scene.
    SceneUpdate,
    /// Ask peers to report their current scene.
    RequestScene,
    /// One tick of the sender's avatar state.
    RemoteSnapshotUpdate,
}

/// Message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Ask the relay for the lobby's persistent state.
    RequestStorage,
    /// Full persistent state of a lobby.
    StorageSnapshot {
        /// Authoritative save buffer.
        save_buffer: SaveBuffer,
        /// Authoritative star count.
        star_count: u32,
    },
    /// A save buffer to OR into the receiver's copy.
    SaveBufferUpdate {
        /// The merged buffer as known by the sender.
        save_buffer: SaveBuffer,
    },
    /// A star count to max into the receiver's copy.
    StarCountUpdate {
        /// The sender's star count.
        star_count: u32,
    },
    /// The sender moved to (or is currently in) a scene.
    SceneUpdate {
        /// The scene, or [`SceneId::UNKNOWN`].
        scene: SceneId,
    },
    /// Ask peers to answer with a [`Payload::SceneUpdate`].
    RequestScene,
    /// One tick of the sender's avatar state.
    RemoteSnapshotUpdate {
        /// The snapshot.
        snapshot: RemoteSnapshot,
    },
}

impl Payload {
    /// The kind of this payload.
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::RequestStorage => MessageKind::RequestStorage,
            Self::StorageSnapshot { .. } => MessageKind::StorageSnapshot,
            Self::SaveBufferUpdate { .. } => MessageKind::SaveBufferUpdate,
            Self::StarCountUpdate { .. } => MessageKind::StarCountUpdate,
            Self::SceneUpdate { .. } => MessageKind::SceneUpdate,
            Self::RequestScene => MessageKind::RequestScene,
            Self::RemoteSnapshotUpdate { .. } => MessageKind::RemoteSnapshotUpdate,
        }
    }
}

/// A message in flight between a participant and the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// The participant that originated the message. For relay-originated
    /// messages this is the participant whose message triggered it.
    pub sender: ParticipantId,
    /// The lobby the message belongs to.
    pub lobby: LobbyId,
    /// Whether the relay retains this value for late joiners.
    pub persist: bool,
    /// Message body.
    pub payload: Payload,
}

impl Packet {
    /// Build a packet.
    pub const fn new(sender: ParticipantId, lobby: LobbyId, payload: Payload, persist: bool) -> Self {
        Self {
            sender,
            lobby,
            persist,
            payload,
        }
    }

    /// The kind of the carried payload.
    pub const fn kind(&self) -> MessageKind {
        self.payload.kind()
    }
}

/// Where a participant-originated packet should go.
///
/// The relay always sees every packet; the recipient tells it whether to
/// additionally forward it to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recipient {
    /// Relay only.
    Relay,
    /// Relay, then every other participant in the lobby.
    Lobby,
    /// Relay, then exactly one participant.
    Participant(ParticipantId),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_payload() {
        let packet = Packet::new(
            ParticipantId::new(),
            LobbyId::new(),
            Payload::SceneUpdate { scene: SceneId(6) },
            true,
        );
        assert_eq!(packet.kind(), MessageKind::SceneUpdate);
        assert_eq!(Payload::RequestScene.kind(), MessageKind::RequestScene);
    }

    #[test]
    fn storage_snapshot_survives_json() {
        let mut bytes = [0u8; crate::SAVE_BUFFER_LEN];
        bytes[0] = 0b1010_0000;
        let packet = Packet::new(
            ParticipantId::new(),
            LobbyId::new(),
            Payload::StorageSnapshot {
                save_buffer: SaveBuffer::from_array(bytes),
                star_count: 12,
            },
            false,
        );
        let json = serde_json::to_string(&packet).unwrap();
        let back: Packet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, packet);
    }
}
