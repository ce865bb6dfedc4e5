//! Shared type definitions for Tandem lobby synchronization.
//!
//! This crate is the single source of truth for the types that cross the
//! boundary between participants and the relay.
//!
//! # Modules
//!
//! - [`ids`] -- Typed participant/lobby identifiers and [`SceneId`]
//! - [`progress`] -- The fixed-length [`SaveBuffer`]
//! - [`snapshot`] -- [`RemoteSnapshot`], one tick of avatar state
//! - [`messages`] -- The [`Packet`] wire contract

pub mod ids;
pub mod messages;
pub mod progress;
pub mod snapshot;

// Re-export all public types at crate root for convenience.
pub use ids::{LobbyId, ParticipantId, SceneId};
pub use messages::{MessageKind, Packet, Payload, Recipient};
pub use progress::{SAVE_BUFFER_LEN, SaveBuffer, SaveBufferLengthError};
pub use snapshot::RemoteSnapshot;
