//! Field-level projection of a [`RemoteSnapshot`] onto a puppet object.
//!
//! A snapshot is applied one [`SnapshotField`] at a time, in
//! [`SnapshotField::ORDER`]. The caller re-validates the slot's anchor
//! before each field and hands in a fresh [`Handle`]; this module only
//! knows how to write each field and which ones to de-duplicate.
//!
//! | Field | Written as | De-duplicated |
//! |-------|------------|---------------|
//! | Animation | copied block + pointer | yes, by id |
//! | Animation block | raw bytes | no |
//! | Collision | word | no (the guest clears it every frame) |
//! | Vertical offset | half-word | no |
//! | Position | 3 x f32 | no |
//! | Rotation | 3 x i32 | no |
//! | Visibility | one of two half-word patterns | no |

use tandem_types::RemoteSnapshot;
use tracing::{debug, warn};

use crate::config::MemoryLayout;
use crate::game::GameView;
use crate::handle::Handle;
use crate::memory::Memory;

/// One independently applied field of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotField {
    /// Animation id, resolved through the local animation table.
    Animation,
    /// Raw animation-block payload.
    AnimationBlock,
    /// Collision-handled flag.
    Collision,
    /// Vertical graphics offset.
    VerticalOffset,
    /// World position.
    Position,
    /// Face angles.
    Rotation,
    /// Visibility flag.
    Visibility,
}

impl SnapshotField {
    /// The order in which fields are applied.
    pub const ORDER: [Self; 7] = [
        Self::Animation,
        Self::AnimationBlock,
        Self::Collision,
        Self::VerticalOffset,
        Self::Position,
        Self::Rotation,
        Self::Visibility,
    ];
}

/// What happened to one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOutcome {
    /// The field was written.
    Written,
    /// Same value as last time; nothing written.
    Unchanged,
    /// Nothing written: unknown animation, oversize payload, or address
    /// overflow.
    Skipped,
}

/// Everything a field write needs besides the handle.
pub struct FieldTarget<'a> {
    /// Guest memory.
    pub memory: &'a mut dyn Memory,
    /// Object layout.
    pub layout: &'a MemoryLayout,
    /// Source of animation payloads.
    pub game: &'a dyn GameView,
    /// Slot index, selecting the animation copy region.
    pub slot: u8,
}

/// Per-slot projection state: the de-dup cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    /// Animation id last copied into this slot's object.
    last_animation: Option<u16>,
}

impl Projection {
    /// An empty cache.
    pub const fn new() -> Self {
        Self {
            last_animation: None,
        }
    }

    /// Forget cached values. Called whenever the backing object changes.
    pub const fn reset(&mut self) {
        self.last_animation = None;
    }

    /// The animation id last written, if any.
    pub const fn last_animation(&self) -> Option<u16> {
        self.last_animation
    }

    /// Write one field of `snapshot` through `handle`.
    pub fn apply_field(
        &mut self,
        field: SnapshotField,
        snapshot: &RemoteSnapshot,
        handle: Handle,
        target: &mut FieldTarget<'_>,
    ) -> FieldOutcome {
        let layout = target.layout;
        let written = match field {
            SnapshotField::Animation => {
                return self.apply_animation(snapshot.animation_id, handle, target);
            }
            SnapshotField::AnimationBlock => {
                let max = usize::try_from(layout.animation_block_len).unwrap_or(usize::MAX);
                if snapshot.animation_block.len() > max {
                    warn!(
                        slot = target.slot,
                        len = snapshot.animation_block.len(),
                        max,
                        "Animation block payload too long, skipped"
                    );
                    return FieldOutcome::Skipped;
                }
                handle.write_bytes(
                    target.memory,
                    layout.animation_block_offset,
                    &snapshot.animation_block,
                )
            }
            SnapshotField::Collision => handle.write_u32(
                target.memory,
                layout.collision_offset,
                u32::from(snapshot.collision_handled),
            ),
            SnapshotField::VerticalOffset => handle.write_u16(
                target.memory,
                layout.vertical_offset_offset,
                snapshot.vertical_offset,
            ),
            SnapshotField::Position => handle.write_bytes(
                target.memory,
                layout.position_offset,
                &encode_position(snapshot.position),
            ),
            SnapshotField::Rotation => handle.write_bytes(
                target.memory,
                layout.rotation_offset,
                &encode_rotation(snapshot.rotation),
            ),
            SnapshotField::Visibility => {
                let pattern = if snapshot.visible {
                    layout.visible_pattern
                } else {
                    layout.hidden_pattern
                };
                handle.write_u16(target.memory, layout.visibility_offset, pattern)
            }
        };
        if written {
            FieldOutcome::Written
        } else {
            FieldOutcome::Skipped
        }
    }

    /// Copy the animation for `id` into the slot's region and point the
    /// object at it.
    ///
    /// The copied block embeds two offsets relative to its own start; they
    /// are rewritten to absolute addresses inside the copy.
    fn apply_animation(
        &mut self,
        id: u16,
        handle: Handle,
        target: &mut FieldTarget<'_>,
    ) -> FieldOutcome {
        if self.last_animation == Some(id) {
            return FieldOutcome::Unchanged;
        }
        let Some(block) = target.game.animation(id) else {
            debug!(slot = target.slot, animation = id, "Unknown animation id");
            return FieldOutcome::Skipped;
        };
        let layout = target.layout;
        let Some(plan) = AnimationCopy::plan(layout, target.slot, block) else {
            warn!(
                slot = target.slot,
                animation = id,
                len = block.len(),
                "Animation block does not fit the slot region"
            );
            return FieldOutcome::Skipped;
        };

        self.last_animation = Some(id);
        handle.write_u32(target.memory, layout.animation_pointer_offset, plan.pointer);
        target.memory.write_bytes(plan.region, block);
        target.memory.write_u32(plan.values_field, plan.values);
        target.memory.write_u32(plan.index_field, plan.index);
        FieldOutcome::Written
    }
}

/// Addresses and values for one animation copy, computed up front so that
/// nothing is written unless the whole copy is addressable.
struct AnimationCopy {
    /// Start of the slot's animation region.
    region: u32,
    /// Biased pointer to the region, stored into the object.
    pointer: u32,
    /// Address of the values-table field inside the copy.
    values_field: u32,
    /// Rebased values-table address.
    values: u32,
    /// Address of the index-table field inside the copy.
    index_field: u32,
    /// Rebased index-table address.
    index: u32,
}

impl AnimationCopy {
    fn plan(layout: &MemoryLayout, slot: u8, block: &[u8]) -> Option<Self> {
        let capacity = usize::try_from(layout.animation_block_size).ok()?;
        if block.len() > capacity {
            return None;
        }
        let region = layout.animation_address(slot)?;
        let values_rel = read_be_u32(block, layout.animation_values_offset)?;
        let index_rel = read_be_u32(block, layout.animation_index_offset)?;
        Some(Self {
            region,
            pointer: region.checked_add(layout.segment_bias)?,
            values_field: region.checked_add(layout.animation_values_offset)?,
            values: region.checked_add(values_rel)?,
            index_field: region.checked_add(layout.animation_index_offset)?,
            index: region.checked_add(index_rel)?,
        })
    }
}

/// Big-endian word at `offset` inside `bytes`.
fn read_be_u32(bytes: &[u8], offset: u32) -> Option<u32> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(4)?;
    let raw: [u8; 4] = bytes.get(start..end)?.try_into().ok()?;
    Some(u32::from_be_bytes(raw))
}

fn encode_position(position: [f32; 3]) -> Vec<u8> {
    position.iter().flat_map(|v| v.to_be_bytes()).collect()
}

fn encode_rotation(rotation: [i32; 3]) -> Vec<u8> {
    rotation.iter().flat_map(|v| v.to_be_bytes()).collect()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;
    use crate::handle::Anchor;
    use crate::harness::{FlatMemory, LocalGame};

    /// A fake animation block: 0x20 bytes, values at +0x14, index at +0x18.
    fn animation_block() -> Vec<u8> {
        let mut block = vec![0u8; 0x20];
        block[0x0C..0x10].copy_from_slice(&0x14u32.to_be_bytes());
        block[0x10..0x14].copy_from_slice(&0x18u32.to_be_bytes());
        block[0x1F] = 0xAB;
        block
    }

    fn live_handle(memory: &mut FlatMemory, layout: &MemoryLayout, slot: u8) -> Handle {
        let object = memory.place_object(slot).unwrap();
        Anchor::stamp(memory, layout, object);
        Anchor::for_slot(layout, slot)
            .unwrap()
            .resolve(memory, layout)
            .unwrap()
    }

    #[test]
    fn animation_is_copied_and_rebased() {
        let layout = MemoryLayout::default();
        let mut memory = FlatMemory::new(&layout);
        let handle = live_handle(&mut memory, &layout, 1);
        let mut game = LocalGame::default();
        game.animations.insert(7, animation_block());

        let snapshot = RemoteSnapshot {
            animation_id: 7,
            ..RemoteSnapshot::default()
        };
        let mut projection = Projection::default();
        let outcome = projection.apply_field(
            SnapshotField::Animation,
            &snapshot,
            handle,
            &mut FieldTarget {
                memory: &mut memory,
                layout: &layout,
                game: &game,
                slot: 1,
            },
        );
        assert_eq!(outcome, FieldOutcome::Written);

        let region = layout.animation_address(1).unwrap();
        assert_eq!(
            memory.read_u32(handle.address() + layout.animation_pointer_offset),
            region + 0x8000_0000
        );
        assert_eq!(memory.read_u32(region + 0x0C), region + 0x14);
        assert_eq!(memory.read_u32(region + 0x10), region + 0x18);
        assert_eq!(memory.read_u8(region + 0x1F), 0xAB);
        assert_eq!(projection.last_animation(), Some(7));
    }

    #[test]
    fn repeated_animation_id_is_not_rewritten() {
        let layout = MemoryLayout::default();
        let mut memory = FlatMemory::new(&layout);
        let handle = live_handle(&mut memory, &layout, 0);
        let mut game = LocalGame::default();
        game.animations.insert(2, animation_block());
        let snapshot = RemoteSnapshot {
            animation_id: 2,
            ..RemoteSnapshot::default()
        };
        let mut projection = Projection::default();
        let mut target = FieldTarget {
            memory: &mut memory,
            layout: &layout,
            game: &game,
            slot: 0,
        };

        let first = projection.apply_field(SnapshotField::Animation, &snapshot, handle, &mut target);
        let second =
            projection.apply_field(SnapshotField::Animation, &snapshot, handle, &mut target);
        assert_eq!(first, FieldOutcome::Written);
        assert_eq!(second, FieldOutcome::Unchanged);
    }

    #[test]
    fn unknown_animation_is_skipped_without_caching() {
        let layout = MemoryLayout::default();
        let mut memory = FlatMemory::new(&layout);
        let handle = live_handle(&mut memory, &layout, 0);
        let game = LocalGame::default();
        let snapshot = RemoteSnapshot {
            animation_id: 99,
            ..RemoteSnapshot::default()
        };
        let mut projection = Projection::default();
        let outcome = projection.apply_field(
            SnapshotField::Animation,
            &snapshot,
            handle,
            &mut FieldTarget {
                memory: &mut memory,
                layout: &layout,
                game: &game,
                slot: 0,
            },
        );
        assert_eq!(outcome, FieldOutcome::Skipped);
        assert_eq!(projection.last_animation(), None);
        assert_eq!(memory.read_u32(handle.address() + 0x3C), 0);
    }

    #[test]
    fn collision_is_rewritten_every_time() {
        let layout = MemoryLayout::default();
        let mut memory = FlatMemory::new(&layout);
        let handle = live_handle(&mut memory, &layout, 0);
        let game = LocalGame::default();
        let snapshot = RemoteSnapshot {
            collision_handled: true,
            ..RemoteSnapshot::default()
        };
        let mut projection = Projection::default();

        for _ in 0..2 {
            let outcome = projection.apply_field(
                SnapshotField::Collision,
                &snapshot,
                handle,
                &mut FieldTarget {
                    memory: &mut memory,
                    layout: &layout,
                    game: &game,
                    slot: 0,
                },
            );
            assert_eq!(outcome, FieldOutcome::Written);
            assert_eq!(memory.read_u32(handle.address() + 0x134), 1);
            // The guest clears the flag every frame.
            memory.write_u32(handle.address() + 0x134, 0);
        }
    }

    #[test]
    fn transform_and_visibility_fields_land_at_offsets() {
        let layout = MemoryLayout::default();
        let mut memory = FlatMemory::new(&layout);
        let handle = live_handle(&mut memory, &layout, 0);
        let game = LocalGame::default();
        let snapshot = RemoteSnapshot {
            position: [1.5, -2.0, 300.0],
            rotation: [0, 0x4000, -1],
            vertical_offset: 0x0020,
            visible: false,
            animation_block: vec![0, 1, 2, 3],
            ..RemoteSnapshot::default()
        };
        let mut projection = Projection::default();
        let mut target = FieldTarget {
            memory: &mut memory,
            layout: &layout,
            game: &game,
            slot: 0,
        };
        for field in [
            SnapshotField::AnimationBlock,
            SnapshotField::VerticalOffset,
            SnapshotField::Position,
            SnapshotField::Rotation,
            SnapshotField::Visibility,
        ] {
            assert_eq!(
                projection.apply_field(field, &snapshot, handle, &mut target),
                FieldOutcome::Written
            );
        }

        let base = handle.address();
        assert_eq!(memory.read_bytes(base + 0x40, 4), vec![0, 1, 2, 3]);
        assert_eq!(memory.read_u16(base + 0x3A), 0x0020);
        assert_eq!(memory.read_u32(base + 0xA0), 1.5f32.to_bits());
        assert_eq!(memory.read_u32(base + 0xA8), 300.0f32.to_bits());
        assert_eq!(memory.read_u32(base + 0xD4), 0x4000);
        assert_eq!(memory.read_u32(base + 0xD8), u32::MAX);
        assert_eq!(memory.read_u16(base + 0x02), 0x20);
    }

    #[test]
    fn oversize_animation_block_payload_is_skipped() {
        let layout = MemoryLayout::default();
        let mut memory = FlatMemory::new(&layout);
        let handle = live_handle(&mut memory, &layout, 0);
        let game = LocalGame::default();
        let snapshot = RemoteSnapshot {
            animation_block: vec![0xFF; 0x40],
            ..RemoteSnapshot::default()
        };
        let outcome = Projection::default().apply_field(
            SnapshotField::AnimationBlock,
            &snapshot,
            handle,
            &mut FieldTarget {
                memory: &mut memory,
                layout: &layout,
                game: &game,
                slot: 0,
            },
        );
        assert_eq!(outcome, FieldOutcome::Skipped);
        assert_eq!(memory.read_u8(handle.address() + 0x40), 0);
    }
}
