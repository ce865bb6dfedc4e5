//! Type-safe identifier wrappers.
//!
//! Participants and lobbies are identified by UUIDs handed out by the relay.
//! Scenes are identified by the simulation's own integer scene number, where
//! `-1` means "unknown / not in a scene".

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Stable identifier of a connected participant.
    ParticipantId
}

define_id! {
    /// Identifier of a lobby on the relay.
    LobbyId
}

/// A simulation scene number as reported by a participant.
///
/// The wire carries the raw integer; [`SceneId::UNKNOWN`] (`-1`) marks a
/// participant that is not in any scene (menus, loading, just joined).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SceneId(pub i32);

impl SceneId {
    /// Sentinel for "no scene".
    pub const UNKNOWN: Self = Self(-1);

    /// Whether this is a real scene rather than [`SceneId::UNKNOWN`].
    pub const fn is_known(self) -> bool {
        self.0 != Self::UNKNOWN.0
    }
}

impl Default for SceneId {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl core::fmt::Display for SceneId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
