//! Merge engine, relay handlers, and puppet lifecycle for Tandem lobbies.
//!
//! A participant runs a [`Session`] once per simulation frame: it
//! reconciles persistent progress through the [`MergeEngine`] and drives
//! the [`PuppetManager`], which spawns, validates, and tears down the
//! puppet objects that stand in for remote participants. The relay runs a
//! [`Relay`], which merges inbound progress into per-lobby storage and
//! routes everything else.
//!
//! # Modules
//!
//! - [`config`] -- YAML configuration and the guest [`MemoryLayout`].
//! - [`memory`] -- [`Memory`] and [`CommandBuffer`], the guest interfaces.
//! - [`handle`] -- [`Anchor`] and the validated [`Handle`].
//! - [`game`] -- [`GameView`], the typed local simulation.
//! - [`projection`] -- Field-by-field snapshot writes.
//! - [`puppet`] -- One slot's spawn/despawn state machine.
//! - [`manager`] -- The fixed puppet pool.
//! - [`sync`] -- Participant-side persistent-state reconciliation.
//! - [`relay`] -- Relay-side handlers over an explicit [`LobbyContext`].
//! - [`net`] -- Outbound sinks.
//! - [`session`] -- Participant tick, lifecycle hooks, and dispatch.
//! - [`harness`] -- In-memory guest and game for tests and simulation.
//!
//! [`MemoryLayout`]: config::MemoryLayout
//! [`Memory`]: memory::Memory
//! [`CommandBuffer`]: memory::CommandBuffer
//! [`Anchor`]: handle::Anchor
//! [`Handle`]: handle::Handle
//! [`GameView`]: game::GameView
//! [`LobbyContext`]: relay::LobbyContext

pub mod config;
pub mod game;
pub mod handle;
pub mod harness;
pub mod manager;
pub mod memory;
pub mod net;
pub mod projection;
pub mod puppet;
pub mod relay;
pub mod session;
pub mod sync;

pub use config::{ConfigError, TandemConfig};
pub use manager::PuppetManager;
pub use net::{Link, Outbox, RelayOutbox};
pub use relay::Relay;
pub use session::Session;
pub use sync::MergeEngine;
