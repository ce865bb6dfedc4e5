//! Simulator settings.
//!
//! The simulator reads the same YAML file as the engine (`TANDEM_CONFIG`,
//! default `tandem-config.yaml`) and takes its own settings from the `sim`
//! section. A missing file means defaults for everything.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tandem_core::{ConfigError, TandemConfig};

use crate::error::SimError;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TANDEM_CONFIG";

/// Config file used when [`CONFIG_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "tandem-config.yaml";

/// Settings for one simulated lobby run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimConfig {
    /// Number of scripted participants.
    #[serde(default = "default_participants")]
    pub participants: u8,

    /// Ticks each participant's join is delayed after the previous one.
    #[serde(default = "default_join_stagger")]
    pub join_stagger: u64,

    /// Scripted ticks to run.
    #[serde(default = "default_ticks")]
    pub ticks: u64,

    /// Quiet ticks after the script stops, before convergence is checked.
    #[serde(default = "default_settle_ticks")]
    pub settle_ticks: u64,

    /// Wall-clock pacing between ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Seed for every random decision in the run.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Probability that a snapshot packet is lost.
    #[serde(default = "default_snapshot_loss")]
    pub snapshot_loss: f64,

    /// Shuffle each delivery batch.
    #[serde(default = "default_reorder")]
    pub reorder: bool,

    /// Per-tick probability that a participant unlocks progress.
    #[serde(default = "default_progress_chance")]
    pub progress_chance: f64,

    /// Per-tick probability that a participant changes scene.
    #[serde(default = "default_scene_change_chance")]
    pub scene_change_chance: f64,

    /// Scenes participants wander between.
    #[serde(default = "default_scenes")]
    pub scenes: Vec<i32>,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            participants: default_participants(),
            join_stagger: default_join_stagger(),
            ticks: default_ticks(),
            settle_ticks: default_settle_ticks(),
            tick_interval_ms: default_tick_interval_ms(),
            seed: default_seed(),
            snapshot_loss: default_snapshot_loss(),
            reorder: default_reorder(),
            progress_chance: default_progress_chance(),
            scene_change_chance: default_scene_change_chance(),
            scenes: default_scenes(),
            json_logs: false,
        }
    }
}

impl SimConfig {
    /// Check that the settings describe a runnable simulation.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.participants == 0 {
            return Err(invalid("participants must be at least 1"));
        }
        if self.tick_interval_ms == 0 {
            return Err(invalid("tick_interval_ms must be non-zero"));
        }
        if self.scenes.is_empty() {
            return Err(invalid("scenes must not be empty"));
        }
        for (name, p) in [
            ("snapshot_loss", self.snapshot_loss),
            ("progress_chance", self.progress_chance),
            ("scene_change_chance", self.scene_change_chance),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(invalid(&format!("{name} must be within 0..=1, got {p}")));
            }
        }
        Ok(())
    }
}

/// Where the config file is expected.
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV).map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Everything loaded at startup.
#[derive(Debug, Clone)]
pub struct Loaded {
    /// Engine configuration.
    pub core: TandemConfig,
    /// Simulator settings.
    pub sim: SimConfig,
    /// The file read, or `None` if defaults were used.
    pub source: Option<PathBuf>,
}

/// Load both configurations from `path`, or defaults if it does not exist.
pub fn load(path: &Path) -> Result<Loaded, SimError> {
    if !path.exists() {
        return Ok(Loaded {
            core: TandemConfig::default(),
            sim: SimConfig::default(),
            source: None,
        });
    }
    let contents = std::fs::read_to_string(path).map_err(ConfigError::from)?;
    let (core, sim) = parse(&contents)?;
    Ok(Loaded {
        core,
        sim,
        source: Some(path.to_path_buf()),
    })
}

/// Parse both configurations from one YAML document.
pub fn parse(yaml: &str) -> Result<(TandemConfig, SimConfig), SimError> {
    let core = TandemConfig::parse(yaml)?;
    let raw: serde_yml::Value = serde_yml::from_str(yaml).map_err(ConfigError::from)?;
    let sim = match raw.get("sim") {
        Some(section) => {
            serde_yml::from_value(section.clone()).map_err(ConfigError::from)?
        }
        None => SimConfig::default(),
    };
    sim.validate()?;
    Ok((core, sim))
}

fn invalid(reason: &str) -> SimError {
    SimError::Settings {
        reason: reason.to_owned(),
    }
}

const fn default_participants() -> u8 {
    3
}

const fn default_join_stagger() -> u64 {
    40
}

const fn default_ticks() -> u64 {
    600
}

const fn default_settle_ticks() -> u64 {
    30
}

const fn default_tick_interval_ms() -> u64 {
    16
}

const fn default_seed() -> u64 {
    0x5EED
}

const fn default_snapshot_loss() -> f64 {
    0.1
}

const fn default_reorder() -> bool {
    true
}

const fn default_progress_chance() -> f64 {
    0.02
}

const fn default_scene_change_chance() -> f64 {
    0.005
}

fn default_scenes() -> Vec<i32> {
    vec![6, 9, 16]
}
