//! Tandem lobby simulator.
//!
//! Runs one relay and several scripted participants in-process, connected
//! by a lossy, reordering loopback, and checks at the end that persistent
//! progress converged everywhere.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (`TANDEM_CONFIG`, default `tandem-config.yaml`)
//! 2. Initialize structured logging (text or JSON)
//! 3. Build the lobby
//! 4. Run the scripted ticks, then the settle ticks
//! 5. Log the report; fail if the lobby diverged

mod config;
mod error;
mod loopback;
mod world;

use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::SimError;
use crate::world::World;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the lobby did not
/// converge.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = config::config_path();
    let loaded = config::load(&path)?;
    init_logging(loaded.sim.json_logs);

    info!("tandem-sim starting");
    match &loaded.source {
        Some(source) => info!(path = %source.display(), "Configuration loaded"),
        None => info!(path = %path.display(), "Config file not found, using defaults"),
    }
    let sim = &loaded.sim;
    info!(
        participants = sim.participants,
        ticks = sim.ticks,
        seed = sim.seed,
        snapshot_loss = sim.snapshot_loss,
        reorder = sim.reorder,
        pool_size = loaded.core.puppets.pool_size,
        "Simulation configured"
    );

    let mut world = World::new(&loaded.core, sim)?;
    let mut interval = tokio::time::interval(Duration::from_millis(sim.tick_interval_ms));
    for _ in 0..sim.ticks {
        interval.tick().await;
        world.step(true);
    }
    for _ in 0..sim.settle_ticks {
        interval.tick().await;
        world.step(false);
    }

    let report = world.report();
    info!(
        ticks = report.ticks,
        participants = report.participants,
        progress_bits = report.progress_bits,
        star_count = report.star_count,
        spawned = ?report.spawned,
        snapshots_dropped = report.snapshots_dropped,
        delivered = report.delivered,
        "Simulation finished"
    );

    if !report.converged() {
        warn!(
            save_buffers_agree = report.save_buffers_agree,
            star_counts_agree = report.star_counts_agree,
            "Lobby diverged"
        );
        return Err(SimError::Diverged {
            reason: format!(
                "save buffers agree: {}, star counts agree: {}",
                report.save_buffers_agree, report.star_counts_agree
            ),
        }
        .into());
    }
    info!("Lobby converged");
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` filters, default `info`.
fn init_logging(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}
