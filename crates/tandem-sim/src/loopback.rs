//! The in-process "network" between participants and the relay.
//!
//! Each delivery batch may lose snapshot packets and may be shuffled.
//! Persistent-state and scene traffic is never dropped; convergence of
//! that traffic only relies on its merge rules, and the shuffle exercises
//! the out-of-order half of that.

use rand::distr::{Bernoulli, BernoulliError};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tandem_types::{MessageKind, Packet};

/// Lossy, reordering delivery.
#[derive(Debug, Clone)]
pub struct Loopback {
    /// Source of loss and shuffle decisions.
    rng: SmallRng,
    /// Snapshot loss distribution.
    loss: Bernoulli,
    /// Whether batches are shuffled.
    reorder: bool,
    /// Snapshots dropped so far.
    dropped: u64,
    /// Packets delivered so far.
    delivered: u64,
}

impl Loopback {
    /// A loopback with its own RNG stream.
    pub fn new(seed: u64, snapshot_loss: f64, reorder: bool) -> Result<Self, BernoulliError> {
        Ok(Self {
            rng: SmallRng::seed_from_u64(seed),
            loss: Bernoulli::new(snapshot_loss)?,
            reorder,
            dropped: 0,
            delivered: 0,
        })
    }

    /// Carry one batch: drop lost snapshots, then maybe shuffle.
    pub fn carry<T>(&mut self, batch: Vec<(T, Packet)>) -> Vec<(T, Packet)> {
        let mut kept = Vec::with_capacity(batch.len());
        for (to, packet) in batch {
            if packet.kind() == MessageKind::RemoteSnapshotUpdate && self.rng.sample(self.loss) {
                self.dropped = self.dropped.saturating_add(1);
                continue;
            }
            kept.push((to, packet));
        }
        if self.reorder {
            kept.shuffle(&mut self.rng);
        }
        self.delivered = self
            .delivered
            .saturating_add(u64::try_from(kept.len()).unwrap_or(u64::MAX));
        kept
    }

    /// Snapshots dropped so far.
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Packets delivered so far.
    pub const fn delivered(&self) -> u64 {
        self.delivered
    }
}
