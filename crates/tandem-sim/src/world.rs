//! The simulated lobby: one relay, scripted participants, and the loopback
//! between them.
//!
//! Participants join one after another (`join_stagger` ticks apart) so that
//! late joiners exercise storage bootstrap and retained-packet replay. Each
//! participant's simulation starts at frame zero and is gated by the
//! session warm-up like a real boot.

use std::collections::BTreeMap;

use rand::distr::Bernoulli;
use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use tandem_core::harness::{FlatMemory, LocalGame};
use tandem_core::{Link, Relay, Session, TandemConfig};
use tandem_types::{LobbyId, Packet, ParticipantId, Recipient, SAVE_BUFFER_LEN, SceneId};
use tracing::{debug, info};

use crate::config::SimConfig;
use crate::error::SimError;
use crate::loopback::Loopback;

/// Animations every scripted participant knows.
const ANIMATION_COUNT: u16 = 4;

/// Size of one scripted animation block.
const ANIMATION_BLOCK_LEN: usize = 0x40;

/// Upper bound on delivery rounds per tick.
const MAX_PUMP_ROUNDS: usize = 8;

/// One scripted participant.
#[derive(Debug)]
struct Player {
    /// The engine under test.
    session: Session,
    /// Its guest memory.
    memory: FlatMemory,
    /// Its simulation.
    game: LocalGame,
    /// Packets waiting for the loopback.
    outbox: Vec<(Recipient, Packet)>,
    /// Tick at which it joins.
    join_at: u64,
    /// Whether it has joined.
    joined: bool,
}

impl Player {
    fn new(core: &TandemConfig, lobby: LobbyId, join_at: u64) -> Self {
        let link = Link {
            me: ParticipantId::new(),
            lobby,
        };
        let game = LocalGame {
            frame_counter: 0,
            animations: animation_table(),
            ..LocalGame::default()
        };
        Self {
            session: Session::new(core, link),
            memory: FlatMemory::new(&core.layout),
            game,
            outbox: Vec::new(),
            join_at,
            joined: false,
        }
    }

    const fn id(&self) -> ParticipantId {
        self.session.link().me
    }
}

/// Per-tick behaviour probabilities.
#[derive(Debug, Clone, Copy)]
struct Script {
    /// Unlock a progress bit.
    progress: Bernoulli,
    /// Wander to another scene.
    scene_change: Bernoulli,
}

impl Script {
    fn run(self, game: &mut LocalGame, rng: &mut SmallRng, scenes: &[i32]) {
        if rng.sample(self.progress) {
            let byte = rng.random_range(0..SAVE_BUFFER_LEN);
            let bit = rng.random_range(0..8u32);
            game.set_save_bits(byte, 1u8.checked_shl(bit).unwrap_or(0));
            if rng.random_bool(0.25) {
                game.star_count = game.star_count.saturating_add(1);
            }
        }
        if !game.scene.is_known() || rng.sample(self.scene_change) {
            if let Some(scene) = scenes.choose(rng) {
                game.scene = SceneId(*scene);
            }
        }

        let avatar = &mut game.avatar;
        for axis in &mut avatar.position {
            *axis += rng.random_range(-8.0f32..8.0);
        }
        for angle in &mut avatar.rotation {
            *angle = angle.wrapping_add(rng.random_range(-256..256));
        }
        if rng.random_bool(0.05) {
            avatar.animation_id = rng.random_range(0..ANIMATION_COUNT);
        }
        avatar.collision_handled = rng.random_bool(0.1);
    }
}

/// End-of-run summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Ticks run.
    pub ticks: u64,
    /// Participants that joined.
    pub participants: usize,
    /// Set bits in the relay's save buffer.
    pub progress_bits: u32,
    /// The relay's star count.
    pub star_count: u32,
    /// Every participant's simulation holds the relay's save buffer.
    pub save_buffers_agree: bool,
    /// Every participant's simulation holds the relay's star count.
    pub star_counts_agree: bool,
    /// Spawned puppets per participant, in join order.
    pub spawned: Vec<usize>,
    /// Snapshots lost in the loopback.
    pub snapshots_dropped: u64,
    /// Packets delivered by the loopback.
    pub delivered: u64,
}

impl Report {
    /// Persistent state converged everywhere.
    pub const fn converged(&self) -> bool {
        self.save_buffers_agree && self.star_counts_agree
    }
}

/// The whole simulated lobby.
#[derive(Debug)]
pub struct World {
    /// Scenes participants wander between.
    scenes: Vec<i32>,
    /// Behaviour probabilities.
    script: Script,
    /// The relay.
    relay: Relay,
    /// The one lobby.
    lobby: LobbyId,
    /// Participants in join order.
    players: Vec<Player>,
    /// Delivery.
    loopback: Loopback,
    /// Script randomness.
    rng: SmallRng,
    /// Ticks run.
    tick: u64,
}

impl World {
    /// Build the lobby described by `sim`.
    pub fn new(core: &TandemConfig, sim: &SimConfig) -> Result<Self, SimError> {
        sim.validate()?;
        let settings = |err: rand::distr::BernoulliError| SimError::Settings {
            reason: err.to_string(),
        };
        let loopback = Loopback::new(sim.seed.wrapping_add(1), sim.snapshot_loss, sim.reorder)
            .map_err(settings)?;
        let script = Script {
            progress: Bernoulli::new(sim.progress_chance).map_err(settings)?,
            scene_change: Bernoulli::new(sim.scene_change_chance).map_err(settings)?,
        };

        let lobby = LobbyId::new();
        let mut relay = Relay::new();
        relay.create_lobby(lobby);
        let players = (0..sim.participants)
            .map(|i| Player::new(core, lobby, u64::from(i).saturating_mul(sim.join_stagger)))
            .collect();

        Ok(Self {
            scenes: sim.scenes.clone(),
            script,
            relay,
            lobby,
            players,
            loopback,
            rng: SmallRng::seed_from_u64(sim.seed),
            tick: 0,
        })
    }

    /// Advance one tick. With `scripted` unset participants stop changing
    /// their simulation, so the lobby can settle.
    pub fn step(&mut self, scripted: bool) {
        self.tick = self.tick.saturating_add(1);
        self.admit_joiners();

        for player in self.players.iter_mut().filter(|p| p.joined) {
            player.game.frame_counter = player.game.frame_counter.saturating_add(1);
            if scripted {
                self.script.run(&mut player.game, &mut self.rng, &self.scenes);
            }
            player
                .session
                .tick(&mut player.memory, &mut player.game, &mut player.outbox);
        }
        self.pump();
    }

    /// Summarise the run.
    pub fn report(&self) -> Report {
        let store = self
            .relay
            .lobby(self.lobby)
            .map(|ctx| ctx.store().progress().clone())
            .unwrap_or_default();
        let joined: Vec<&Player> = self.players.iter().filter(|p| p.joined).collect();
        Report {
            ticks: self.tick,
            participants: joined.len(),
            progress_bits: store
                .save_buffer()
                .as_bytes()
                .iter()
                .map(|b| b.count_ones())
                .sum(),
            star_count: store.star_count(),
            save_buffers_agree: joined
                .iter()
                .all(|p| p.game.save.as_slice() == store.save_buffer().as_bytes().as_slice()),
            star_counts_agree: joined.iter().all(|p| p.game.star_count == store.star_count()),
            spawned: joined
                .iter()
                .map(|p| p.session.puppets().spawned_in_scene())
                .collect(),
            snapshots_dropped: self.loopback.dropped(),
            delivered: self.loopback.delivered(),
        }
    }

    fn admit_joiners(&mut self) {
        let tick = self.tick;
        let due: Vec<usize> = self
            .players
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.joined && p.join_at <= tick)
            .map(|(index, _)| index)
            .collect();

        for index in due {
            let existing: Vec<ParticipantId> = self
                .players
                .iter()
                .filter(|p| p.joined)
                .map(Player::id)
                .collect();
            let Some(player) = self.players.get_mut(index) else {
                continue;
            };
            let id = player.id();
            player.joined = true;
            player
                .session
                .on_connected(&mut player.memory, &player.game, &mut player.outbox);
            player.session.on_lobby_joined(&mut player.outbox);
            for other in &existing {
                player.session.on_participant_joined(*other);
            }

            for other in self.players.iter_mut().filter(|p| p.joined && p.id() != id) {
                other.session.on_participant_joined(id);
            }
            let mut replay = Vec::new();
            self.relay.on_participant_joined(self.lobby, id, &mut replay);
            self.deliver(replay);
            info!(participant = %id, tick, "Participant joined lobby");
        }
    }

    /// Move packets until every outbox is empty or the round limit is hit.
    fn pump(&mut self) {
        for _ in 0..MAX_PUMP_ROUNDS {
            let mut outbound = Vec::new();
            for player in &mut self.players {
                outbound.append(&mut player.outbox);
            }
            if outbound.is_empty() {
                return;
            }
            let mut relayed = Vec::new();
            for (to, packet) in self.loopback.carry(outbound) {
                self.relay.handle(to, &packet, &mut relayed);
            }
            self.deliver(relayed);
        }
        debug!(tick = self.tick, "Delivery round limit reached");
    }

    fn deliver(&mut self, batch: Vec<(ParticipantId, Packet)>) {
        for (target, packet) in self.loopback.carry(batch) {
            let Some(player) = self
                .players
                .iter_mut()
                .find(|p| p.joined && p.id() == target)
            else {
                continue;
            };
            player
                .session
                .handle(&packet, &mut player.memory, &player.game, &mut player.outbox);
        }
    }
}

/// The animation table every participant shares. Each block carries its
/// values and index tables right after the header.
fn animation_table() -> BTreeMap<u16, Vec<u8>> {
    (0..ANIMATION_COUNT)
        .map(|id| {
            let mut block = Vec::with_capacity(ANIMATION_BLOCK_LEN);
            block.extend_from_slice(&[0u8; 0x0C]);
            block.extend_from_slice(&0x14u32.to_be_bytes());
            block.extend_from_slice(&0x18u32.to_be_bytes());
            block.resize(ANIMATION_BLOCK_LEN, 0);
            for (byte, fill) in block.iter_mut().skip(0x14).zip(id.to_be_bytes().iter().cycle()) {
                *byte = *fill;
            }
            (id, block)
        })
        .collect()
}
