//! Interfaces to the host simulation's memory and command queue.
//!
//! The engine never owns guest memory. It reads and writes through
//! [`Memory`] and asks the guest to create or destroy puppet objects through
//! [`CommandBuffer`]. Commands complete asynchronously: a command submitted
//! on one tick reports its [`Completion`] on a later tick, and the Puppet
//! Manager drains completions at the start of every tick.
//!
//! All multi-byte values are big-endian, as in guest memory.

/// Scalar and buffer access to guest memory.
///
/// Reads from unmapped addresses return zero; writes to them are dropped.
/// That mirrors how the host behaves and keeps every accessor infallible.
pub trait Memory {
    /// Read one byte.
    fn read_u8(&self, address: u32) -> u8;

    /// Write one byte.
    fn write_u8(&mut self, address: u32, value: u8);

    /// Read `len` bytes starting at `address`.
    fn read_bytes(&self, address: u32, len: usize) -> Vec<u8>;

    /// Write `bytes` starting at `address`.
    fn write_bytes(&mut self, address: u32, bytes: &[u8]);

    /// Read a big-endian half-word.
    fn read_u16(&self, address: u32) -> u16 {
        let mut raw = [0u8; 2];
        for (dst, src) in raw.iter_mut().zip(self.read_bytes(address, 2)) {
            *dst = src;
        }
        u16::from_be_bytes(raw)
    }

    /// Write a big-endian half-word.
    fn write_u16(&mut self, address: u32, value: u16) {
        self.write_bytes(address, &value.to_be_bytes());
    }

    /// Read a big-endian word.
    fn read_u32(&self, address: u32) -> u32 {
        let mut raw = [0u8; 4];
        for (dst, src) in raw.iter_mut().zip(self.read_bytes(address, 4)) {
            *dst = src;
        }
        u32::from_be_bytes(raw)
    }

    /// Write a big-endian word.
    fn write_u32(&mut self, address: u32, value: u32) {
        self.write_bytes(address, &value.to_be_bytes());
    }

    /// Follow the guest pointer stored at `address`.
    ///
    /// Returns the physical address it points to, or `0` for null.
    fn dereference(&self, address: u32) -> u32;
}

/// What a [`Command`] asks the guest to do for a puppet slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CommandKind {
    /// Create the slot's backing object.
    Allocate,
    /// Destroy the slot's backing object.
    Deallocate,
}

/// A request submitted to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    /// The puppet slot the command is for.
    pub slot: u8,
    /// What to do.
    pub kind: CommandKind,
}

/// The guest's answer to a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// The puppet slot the command was for.
    pub slot: u8,
    /// What was asked.
    pub kind: CommandKind,
    /// The slot's object address after the command ran (`0` = none).
    pub address: u32,
}

/// Asynchronous command submission.
pub trait CommandBuffer {
    /// Queue a command. It completes on a later drain.
    fn submit(&mut self, command: Command);

    /// Take every completion that has become available since the last call.
    fn drain_completions(&mut self) -> Vec<Completion>;
}

/// A guest that offers both memory access and commands.
pub trait Guest: Memory + CommandBuffer {}

impl<T: Memory + CommandBuffer> Guest for T {}
