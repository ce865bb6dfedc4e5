//! Outbound message sinks.
//!
//! The engine never talks to a transport. Participants push `(Recipient,
//! Packet)` pairs into an [`Outbox`]; the relay pushes per-participant
//! packets into a [`RelayOutbox`]. A plain `Vec` implements both, which is
//! what tests and the simulator use.

use tandem_types::{LobbyId, Packet, ParticipantId, Payload, Recipient};

/// Where a participant sends packets.
pub trait Outbox {
    /// Queue `packet` for `to`.
    fn send(&mut self, to: Recipient, packet: Packet);
}

impl Outbox for Vec<(Recipient, Packet)> {
    fn send(&mut self, to: Recipient, packet: Packet) {
        self.push((to, packet));
    }
}

/// Where the relay sends packets.
pub trait RelayOutbox {
    /// Queue `packet` for one participant.
    fn send_to(&mut self, participant: ParticipantId, packet: Packet);
}

impl RelayOutbox for Vec<(ParticipantId, Packet)> {
    fn send_to(&mut self, participant: ParticipantId, packet: Packet) {
        self.push((participant, packet));
    }
}

/// A participant's identity within one lobby; stamps outgoing packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    /// The local participant.
    pub me: ParticipantId,
    /// The lobby joined.
    pub lobby: LobbyId,
}

impl Link {
    /// Packet from this participant in this lobby.
    pub const fn packet(&self, payload: Payload, persist: bool) -> Packet {
        Packet::new(self.me, self.lobby, payload, persist)
    }

    /// Build and queue a packet.
    pub fn send(&self, outbox: &mut dyn Outbox, to: Recipient, payload: Payload, persist: bool) {
        outbox.send(to, self.packet(payload, persist));
    }
}
