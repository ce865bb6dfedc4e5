//! The participant side of the Persistent-State Merge Engine.
//!
//! Every tick [`MergeEngine::reconcile`] compares the local simulation
//! against the [`SharedStore`]: a differing save buffer becomes the OR of
//! both and is written into the simulation and sent; a higher local star
//! count is stored and sent; a higher stored star count is written down.
//! Inbound updates only touch the store; the next reconcile carries them
//! into the simulation.

use tandem_store::{SharedStore, StarReconcile};
use tandem_types::{Payload, Recipient, SaveBuffer};
use tracing::{debug, error, info};

use crate::game::GameView;
use crate::net::{Link, Outbox};

/// What one reconcile pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciled {
    /// The merged save buffer was written locally and sent.
    pub save_buffer_sent: bool,
    /// A higher local star count was stored and sent.
    pub star_count_sent: bool,
    /// The stored star count was written into the simulation.
    pub star_count_lowered: bool,
}

/// Participant merge engine, one per connection.
#[derive(Debug, Clone, Default)]
pub struct MergeEngine {
    /// Last known lobby state.
    store: SharedStore,
}

impl MergeEngine {
    /// An engine with an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The store.
    pub const fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Start over with an empty store, as on joining a lobby.
    pub fn reset(&mut self) {
        self.store = SharedStore::new();
    }

    /// Diff the simulation against the store in both directions.
    pub fn reconcile(
        &mut self,
        game: &mut dyn GameView,
        link: &Link,
        outbox: &mut dyn Outbox,
    ) -> Reconciled {
        let mut done = Reconciled::default();

        match self.store.reconcile_save_buffer(&game.save_buffer()) {
            Ok(Some(merged)) => {
                game.write_save_buffer(&merged);
                link.send(
                    outbox,
                    Recipient::Relay,
                    Payload::SaveBufferUpdate {
                        save_buffer: merged,
                    },
                    false,
                );
                done.save_buffer_sent = true;
            }
            Ok(None) => {}
            Err(err) => error!(%err, "Save buffer not reconciled"),
        }

        match self.store.reconcile_star_count(game.star_count()) {
            StarReconcile::Unchanged => {}
            StarReconcile::Raised(star_count) => {
                link.send(
                    outbox,
                    Recipient::Relay,
                    Payload::StarCountUpdate { star_count },
                    false,
                );
                done.star_count_sent = true;
            }
            StarReconcile::Lowered(star_count) => {
                game.set_star_count(star_count);
                done.star_count_lowered = true;
            }
        }
        done
    }

    /// Replace the store with the relay's authoritative copy.
    pub fn on_storage_snapshot(&mut self, save_buffer: SaveBuffer, star_count: u32) {
        self.store.replace(save_buffer, star_count);
        info!(star_count, "Received lobby storage");
    }

    /// OR an inbound buffer into the store.
    pub fn on_save_buffer_update(&mut self, save_buffer: &SaveBuffer) -> bool {
        let changed = self.store.absorb_save_buffer(save_buffer);
        if changed {
            debug!("Save buffer updated from lobby");
        }
        changed
    }

    /// Accept an inbound star count if it is higher.
    pub fn on_star_count_update(&mut self, star_count: u32) -> bool {
        let changed = self.store.raise_star_count(star_count);
        if changed {
            debug!(star_count, "Star count updated from lobby");
        }
        changed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::harness::LocalGame;
    use tandem_types::{LobbyId, Packet, ParticipantId, SAVE_BUFFER_LEN};

    fn link() -> Link {
        Link {
            me: ParticipantId::new(),
            lobby: LobbyId::new(),
        }
    }

    #[test]
    fn local_progress_is_merged_and_sent_once() {
        let mut engine = MergeEngine::new();
        let mut game = LocalGame::default();
        let mut sent: Vec<(Recipient, Packet)> = Vec::new();
        game.set_save_bits(0, 0b1010_0000);

        let first = engine.reconcile(&mut game, &link(), &mut sent);
        assert!(first.save_buffer_sent);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, Recipient::Relay);
        assert!(!sent[0].1.persist);

        let second = engine.reconcile(&mut game, &link(), &mut sent);
        assert_eq!(second, Reconciled::default());
        assert_eq!(sent.len(), 1);
    }

    #[test]
    fn inbound_bits_reach_the_simulation_without_echo_loss() {
        let mut engine = MergeEngine::new();
        let mut game = LocalGame::default();
        let mut sent: Vec<(Recipient, Packet)> = Vec::new();
        game.set_save_bits(0, 0b1010_0000);
        engine.reconcile(&mut game, &link(), &mut sent);

        let mut incoming = [0u8; SAVE_BUFFER_LEN];
        incoming[0] = 0b0101_0000;
        assert!(engine.on_save_buffer_update(&SaveBuffer::from_array(incoming)));
        assert!(!engine.on_save_buffer_update(&SaveBuffer::from_array(incoming)));

        engine.reconcile(&mut game, &link(), &mut sent);
        assert_eq!(game.save_byte(0), 0b1111_0000);
        assert_eq!(engine.store().save_buffer().byte(0), Some(0b1111_0000));
    }

    #[test]
    fn star_count_flows_up_and_down() {
        let mut engine = MergeEngine::new();
        let mut game = LocalGame::default();
        let mut sent: Vec<(Recipient, Packet)> = Vec::new();

        game.star_count = 4;
        assert!(engine.reconcile(&mut game, &link(), &mut sent).star_count_sent);
        assert_eq!(
            sent.last().unwrap().1.payload,
            Payload::StarCountUpdate { star_count: 4 }
        );

        assert!(engine.on_star_count_update(9));
        assert!(!engine.on_star_count_update(7));
        let pass = engine.reconcile(&mut game, &link(), &mut sent);
        assert!(pass.star_count_lowered);
        assert!(!pass.star_count_sent);
        assert_eq!(game.star_count, 9);
    }

    #[test]
    fn wrong_length_buffer_is_left_alone() {
        let mut engine = MergeEngine::new();
        let mut game = LocalGame {
            save: vec![0xFF; 64],
            ..LocalGame::default()
        };
        let mut sent: Vec<(Recipient, Packet)> = Vec::new();

        let pass = engine.reconcile(&mut game, &link(), &mut sent);
        assert!(!pass.save_buffer_sent);
        assert!(sent.is_empty());
        assert_eq!(game.save.len(), 64);
        assert!(engine.store().save_buffer().is_empty());
    }

    #[test]
    fn storage_snapshot_replaces_store() {
        let mut engine = MergeEngine::new();
        let mut bytes = [0u8; SAVE_BUFFER_LEN];
        bytes[5] = 1;
        engine.on_storage_snapshot(SaveBuffer::from_array(bytes), 12);
        assert_eq!(engine.store().star_count(), 12);
        assert_eq!(engine.store().save_buffer().byte(5), Some(1));

        engine.reset();
        assert_eq!(engine.store().star_count(), 0);
    }
}
