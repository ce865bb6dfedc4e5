//! Error types for the simulator binary.

use tandem_core::ConfigError;

/// Top-level error for the simulator.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// The core configuration could not be loaded.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// The `sim` section is present but unusable.
    #[error("invalid sim settings: {reason}")]
    Settings {
        /// What is wrong.
        reason: String,
    },

    /// The run ended without the lobby converging.
    #[error("lobby did not converge: {reason}")]
    Diverged {
        /// Which value disagreed.
        reason: String,
    },
}
