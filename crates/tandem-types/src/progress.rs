//! Persistent progress values shared by every participant in a lobby.
//!
//! The save buffer is a fixed 112-byte block of progress flags copied out of
//! the simulation's save file. Both sides of the wire assume the same length;
//! there is no negotiation, so a buffer of any other length is rejected at
//! the boundary with [`SaveBufferLengthError`].

use serde::{Deserialize, Serialize};

/// Length in bytes of the replicated save-progress block.
pub const SAVE_BUFFER_LEN: usize = 0x70;

/// A buffer of the wrong length crossed the boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("save buffer must be {expected} bytes, got {actual}")]
pub struct SaveBufferLengthError {
    /// The required length ([`SAVE_BUFFER_LEN`]).
    pub expected: usize,
    /// The length that was supplied.
    pub actual: usize,
}

/// Accumulated progress flags. Bits only ever turn on.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct SaveBuffer([u8; SAVE_BUFFER_LEN]);

impl SaveBuffer {
    /// An all-zero buffer (no progress).
    pub const fn zeroed() -> Self {
        Self([0; SAVE_BUFFER_LEN])
    }

    /// Build a buffer from a raw array.
    pub const fn from_array(bytes: [u8; SAVE_BUFFER_LEN]) -> Self {
        Self(bytes)
    }

    /// Copy a buffer out of a slice.
    ///
    /// # Errors
    ///
    /// Returns [`SaveBufferLengthError`] if `bytes` is not exactly
    /// [`SAVE_BUFFER_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SaveBufferLengthError> {
        let array: [u8; SAVE_BUFFER_LEN] =
            bytes.try_into().map_err(|_err| SaveBufferLengthError {
                expected: SAVE_BUFFER_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self(array))
    }

    /// Borrow the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; SAVE_BUFFER_LEN] {
        &self.0
    }

    /// Mutably borrow the raw bytes.
    pub const fn as_bytes_mut(&mut self) -> &mut [u8; SAVE_BUFFER_LEN] {
        &mut self.0
    }

    /// Read one byte, or `None` past the end.
    pub fn byte(&self, index: usize) -> Option<u8> {
        self.0.get(index).copied()
    }

    /// Whether every byte is zero.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Default for SaveBuffer {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl core::fmt::Debug for SaveBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let set = self.0.iter().filter(|b| **b != 0).count();
        f.debug_struct("SaveBuffer")
            .field("len", &SAVE_BUFFER_LEN)
            .field("nonzero_bytes", &set)
            .finish()
    }
}

impl TryFrom<Vec<u8>> for SaveBuffer {
    type Error = SaveBufferLengthError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        Self::from_slice(&bytes)
    }
}

impl From<SaveBuffer> for Vec<u8> {
    fn from(buffer: SaveBuffer) -> Self {
        buffer.0.to_vec()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn wrong_length_is_rejected() {
        let err = SaveBuffer::from_slice(&[0u8; 0x60]).unwrap_err();
        assert_eq!(err.expected, 112);
        assert_eq!(err.actual, 96);
    }

    #[test]
    fn wrong_length_fails_to_deserialize() {
        let json = serde_json::to_string(&vec![1u8; 4]).unwrap();
        let parsed: Result<SaveBuffer, _> = serde_json::from_str(&json);
        assert!(parsed.is_err());
    }

    #[test]
    fn zeroed_is_empty() {
        let mut buffer = SaveBuffer::zeroed();
        assert!(buffer.is_empty());
        buffer.as_bytes_mut()[3] = 0b100;
        assert!(!buffer.is_empty());
        assert_eq!(buffer.byte(3), Some(0b100));
        assert_eq!(buffer.byte(SAVE_BUFFER_LEN), None);
    }
}
