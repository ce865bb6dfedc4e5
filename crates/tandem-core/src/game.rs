//! The local simulation as seen by a participant session.
//!
//! [`GameView`] is the typed, game-level surface the host exposes on top of
//! raw memory: the local player, the progress values that replicate, the
//! snapshot of the local avatar, and the animation table used to resolve
//! remote animation ids.

use tandem_types::{RemoteSnapshot, SaveBuffer, SceneId};

/// Game-level access to the local simulation.
pub trait GameView {
    /// Whether the local player object exists.
    fn player_exists(&self) -> bool;

    /// Frames the simulation has run since boot.
    fn frame_counter(&self) -> u32;

    /// Whether the simulation is paused.
    fn is_paused(&self) -> bool;

    /// The scene the local player is in.
    fn current_scene(&self) -> SceneId;

    /// Whether the local player is drawn.
    fn player_visible(&self) -> bool;

    /// The active save file's progress block, as raw bytes.
    fn save_buffer(&self) -> Vec<u8>;

    /// Overwrite the active save file's progress block.
    fn write_save_buffer(&mut self, buffer: &SaveBuffer);

    /// The local star counter.
    fn star_count(&self) -> u32;

    /// Overwrite the local star counter.
    fn set_star_count(&mut self, value: u32);

    /// Capture this tick's state of the local avatar.
    fn capture_snapshot(&self) -> RemoteSnapshot;

    /// Animation payload for `id` from the local animation table.
    fn animation(&self, id: u16) -> Option<&[u8]>;
}
