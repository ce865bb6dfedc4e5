//! Configuration loading and typed config structures.
//!
//! Configuration is read from YAML (conventionally `tandem-config.yaml`).
//! Every field has a default matching the guest layout this engine was
//! built against, so an empty file is a valid configuration. Unknown keys
//! are ignored, which lets the simulation harness keep its own section in
//! the same file.

use std::path::Path;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The values parsed but are not usable.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TandemConfig {
    /// Participant session gating.
    #[serde(default)]
    pub session: SessionConfig,

    /// Puppet pool parameters.
    #[serde(default)]
    pub puppets: PuppetConfig,

    /// Guest memory layout of puppet objects.
    #[serde(default)]
    pub layout: MemoryLayout,
}

impl TandemConfig {
    /// Load and validate configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if it is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the pool is empty or the sentinel
    /// word overlaps a field the projection writes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.puppets.pool_size == 0 {
            return Err(ConfigError::Invalid {
                reason: "puppets.pool_size must be at least 1".to_owned(),
            });
        }
        if self.layout.animation_block_size == 0 {
            return Err(ConfigError::Invalid {
                reason: "layout.animation_block_size must be non-zero".to_owned(),
            });
        }
        let sentinel = u64::from(self.layout.sentinel_offset);
        let sentinel_end = sentinel.saturating_add(4);
        for (name, offset, len) in self.layout.written_fields() {
            let start = u64::from(offset);
            let end = start.saturating_add(u64::from(len));
            if sentinel < end && start < sentinel_end {
                return Err(ConfigError::Invalid {
                    reason: format!("sentinel at {sentinel:#x} overlaps field {name}"),
                });
            }
        }
        Ok(())
    }
}

/// Participant session settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionConfig {
    /// Frames the simulation must have run before syncing starts.
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            warmup_frames: default_warmup_frames(),
        }
    }
}

/// Puppet pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PuppetConfig {
    /// Number of puppet slots. Fixed for the life of the manager.
    #[serde(default = "default_pool_size")]
    pub pool_size: u8,

    /// Ticks after a spawn completes before snapshots are applied.
    #[serde(default = "default_spawn_grace_ticks")]
    pub spawn_grace_ticks: u64,
}

impl Default for PuppetConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            spawn_grace_ticks: default_spawn_grace_ticks(),
        }
    }
}

/// Where puppet objects and their fields live in guest memory.
///
/// Addresses are physical guest addresses. Pointers stored in guest memory
/// carry [`segment_bias`](Self::segment_bias); [`Memory::dereference`]
/// strips it.
///
/// [`Memory::dereference`]: crate::memory::Memory::dereference
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[allow(clippy::struct_field_names)]
pub struct MemoryLayout {
    /// Base of the per-slot pointer table (one anchor per slot).
    #[serde(default = "default_pointer_table")]
    pub pointer_table: u32,
    /// Distance between consecutive anchors.
    #[serde(default = "default_pointer_stride")]
    pub pointer_stride: u32,
    /// Offset of the liveness sentinel inside a puppet object.
    #[serde(default = "default_sentinel_offset")]
    pub sentinel_offset: u32,
    /// The sentinel word.
    #[serde(default = "default_sentinel")]
    pub sentinel: u32,
    /// Base of the per-slot animation copy region.
    #[serde(default = "default_animation_region")]
    pub animation_region: u32,
    /// Size of one slot's animation region; one block must fit.
    #[serde(default = "default_animation_block_size")]
    pub animation_block_size: u32,
    /// Bias added to addresses when they are stored as guest pointers.
    #[serde(default = "default_segment_bias")]
    pub segment_bias: u32,
    /// Offset of the visibility (graphics flags) half-word.
    #[serde(default = "default_visibility_offset")]
    pub visibility_offset: u32,
    /// Offset of the vertical graphics offset half-word.
    #[serde(default = "default_vertical_offset_offset")]
    pub vertical_offset_offset: u32,
    /// Offset of the current-animation pointer.
    #[serde(default = "default_animation_pointer_offset")]
    pub animation_pointer_offset: u32,
    /// Offset of the raw animation block.
    #[serde(default = "default_animation_block_offset")]
    pub animation_block_offset: u32,
    /// Maximum length of the raw animation block payload.
    #[serde(default = "default_animation_block_len")]
    pub animation_block_len: u32,
    /// Offset of the position vector (3 x f32).
    #[serde(default = "default_position_offset")]
    pub position_offset: u32,
    /// Offset of the face angles (3 x i32).
    #[serde(default = "default_rotation_offset")]
    pub rotation_offset: u32,
    /// Offset of the collision-handled word.
    #[serde(default = "default_collision_offset")]
    pub collision_offset: u32,
    /// Offset, inside an animation block, of the values table pointer.
    #[serde(default = "default_animation_values_offset")]
    pub animation_values_offset: u32,
    /// Offset, inside an animation block, of the index table pointer.
    #[serde(default = "default_animation_index_offset")]
    pub animation_index_offset: u32,
    /// Graphics flags written when visible.
    #[serde(default = "default_visible_pattern")]
    pub visible_pattern: u16,
    /// Graphics flags written when hidden.
    #[serde(default = "default_hidden_pattern")]
    pub hidden_pattern: u16,
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self {
            pointer_table: default_pointer_table(),
            pointer_stride: default_pointer_stride(),
            sentinel_offset: default_sentinel_offset(),
            sentinel: default_sentinel(),
            animation_region: default_animation_region(),
            animation_block_size: default_animation_block_size(),
            segment_bias: default_segment_bias(),
            visibility_offset: default_visibility_offset(),
            vertical_offset_offset: default_vertical_offset_offset(),
            animation_pointer_offset: default_animation_pointer_offset(),
            animation_block_offset: default_animation_block_offset(),
            animation_block_len: default_animation_block_len(),
            position_offset: default_position_offset(),
            rotation_offset: default_rotation_offset(),
            collision_offset: default_collision_offset(),
            animation_values_offset: default_animation_values_offset(),
            animation_index_offset: default_animation_index_offset(),
            visible_pattern: default_visible_pattern(),
            hidden_pattern: default_hidden_pattern(),
        }
    }
}

impl MemoryLayout {
    /// Address of the anchor (pointer-table entry) for a slot.
    pub fn anchor_address(&self, slot: u8) -> Option<u32> {
        self.pointer_stride
            .checked_mul(u32::from(slot))
            .and_then(|off| self.pointer_table.checked_add(off))
    }

    /// Address of a slot's private animation copy region.
    pub fn animation_address(&self, slot: u8) -> Option<u32> {
        self.animation_block_size
            .checked_mul(u32::from(slot))
            .and_then(|off| self.animation_region.checked_add(off))
    }

    /// `(name, offset, length)` of every object field the projection writes.
    pub const fn written_fields(&self) -> [(&'static str, u32, u32); 7] {
        [
            ("visibility", self.visibility_offset, 2),
            ("vertical_offset", self.vertical_offset_offset, 2),
            ("animation_pointer", self.animation_pointer_offset, 4),
            (
                "animation_block",
                self.animation_block_offset,
                self.animation_block_len,
            ),
            ("position", self.position_offset, 12),
            ("rotation", self.rotation_offset, 12),
            ("collision", self.collision_offset, 4),
        ]
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

const fn default_warmup_frames() -> u32 {
    50
}
const fn default_pool_size() -> u8 {
    16
}
const fn default_spawn_grace_ticks() -> u64 {
    2
}
const fn default_pointer_table() -> u32 {
    0x0080_3004
}
const fn default_pointer_stride() -> u32 {
    0x08
}
const fn default_sentinel_offset() -> u32 {
    0x184
}
const fn default_sentinel() -> u32 {
    0xDEAD_BEEF
}
const fn default_animation_region() -> u32 {
    0x0080_4000
}
const fn default_animation_block_size() -> u32 {
    0x3288
}
const fn default_segment_bias() -> u32 {
    0x8000_0000
}
const fn default_visibility_offset() -> u32 {
    0x02
}
const fn default_vertical_offset_offset() -> u32 {
    0x3A
}
const fn default_animation_pointer_offset() -> u32 {
    0x3C
}
const fn default_animation_block_offset() -> u32 {
    0x40
}
const fn default_animation_block_len() -> u32 {
    0x10
}
const fn default_position_offset() -> u32 {
    0xA0
}
const fn default_rotation_offset() -> u32 {
    0xD0
}
const fn default_collision_offset() -> u32 {
    0x134
}
const fn default_animation_values_offset() -> u32 {
    0x0C
}
const fn default_animation_index_offset() -> u32 {
    0x10
}
const fn default_visible_pattern() -> u16 {
    0x21
}
const fn default_hidden_pattern() -> u16 {
    0x20
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_gives_defaults() {
        let config = TandemConfig::parse("{}").unwrap();
        assert_eq!(config, TandemConfig::default());
        assert_eq!(config.puppets.pool_size, 16);
        assert_eq!(config.session.warmup_frames, 50);
        assert_eq!(config.layout.sentinel, 0xDEAD_BEEF);
    }

    #[test]
    fn partial_yaml_overrides_only_named_fields() {
        let yaml = "puppets:\n  pool_size: 4\nlayout:\n  sentinel: 305419896\n";
        let config = TandemConfig::parse(yaml).unwrap();
        assert_eq!(config.puppets.pool_size, 4);
        assert_eq!(config.puppets.spawn_grace_ticks, 2);
        assert_eq!(config.layout.sentinel, 0x1234_5678);
        assert_eq!(config.layout.sentinel_offset, 0x184);
    }

    #[test]
    fn unknown_sections_are_ignored() {
        let yaml = "sim:\n  participants: 3\n";
        assert!(TandemConfig::parse(yaml).is_ok());
    }

    #[test]
    fn zero_pool_is_rejected() {
        let result = TandemConfig::parse("puppets:\n  pool_size: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn sentinel_overlapping_a_field_is_rejected() {
        let yaml = "layout:\n  sentinel_offset: 164\n"; // 0xA4, inside position
        assert!(matches!(
            TandemConfig::parse(yaml),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn slot_addresses_follow_stride() {
        let layout = MemoryLayout::default();
        assert_eq!(layout.anchor_address(0), Some(0x0080_3004));
        assert_eq!(layout.anchor_address(2), Some(0x0080_3014));
        assert_eq!(layout.animation_address(1), Some(0x0080_7288));
    }
}
