//! Per-tick transient avatar state exchanged between participants.

use serde::{Deserialize, Serialize};

/// The minimal field set that drives one remote avatar for one tick.
///
/// Captured from the local player every tick and shipped outward; applied
/// field by field onto the matching puppet slot on every receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    /// Animation id, resolved against the receiver's animation table.
    pub animation_id: u16,
    /// Raw animation-block payload (frame, speed, accumulator).
    pub animation_block: Vec<u8>,
    /// World position.
    pub position: [f32; 3],
    /// Face angles (pitch, yaw, roll).
    pub rotation: [i32; 3],
    /// Vertical graphics offset (sinking into sand and similar).
    pub vertical_offset: u16,
    /// Collision-handled flag. The simulation clears it every frame.
    pub collision_handled: bool,
    /// Whether the avatar is drawn.
    pub visible: bool,
}

impl Default for RemoteSnapshot {
    fn default() -> Self {
        Self {
            animation_id: 0,
            animation_block: Vec::new(),
            position: [0.0; 3],
            rotation: [0; 3],
            vertical_offset: 0,
            collision_handled: false,
            visible: true,
        }
    }
}
