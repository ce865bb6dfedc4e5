//! Merge rules for persistent lobby state.
//!
//! Both rules form a join-semilattice: they are commutative, associative,
//! idempotent, and only ever move state "upwards". That is what lets every
//! participant and the relay apply updates in any order, any number of
//! times, and still land on the same value.
//!
//! - Save buffer: byte-wise OR. A bit, once set, stays set.
//! - Star count: maximum. The counter never decreases.

use tandem_types::SaveBuffer;

/// Byte-wise OR of two save buffers.
pub fn merge_save_buffer(a: &SaveBuffer, b: &SaveBuffer) -> SaveBuffer {
    let mut out = a.clone();
    absorb_save_buffer(&mut out, b);
    out
}

/// OR `incoming` into `target` in place. Returns `true` if any bit of
/// `target` changed.
pub fn absorb_save_buffer(target: &mut SaveBuffer, incoming: &SaveBuffer) -> bool {
    let mut changed = false;
    for (dst, src) in target.as_bytes_mut().iter_mut().zip(incoming.as_bytes()) {
        let merged = *dst | *src;
        if merged != *dst {
            *dst = merged;
            changed = true;
        }
    }
    changed
}

/// Maximum of two star counts.
pub const fn merge_star_count(a: u32, b: u32) -> u32 {
    if a >= b { a } else { b }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use tandem_types::SAVE_BUFFER_LEN;

    use super::*;

    /// Deterministic pseudo-random buffer (xorshift) so the algebraic
    /// checks cover more than a handful of hand-picked bytes.
    fn buffer(seed: u32) -> SaveBuffer {
        let mut state = seed.max(1);
        let mut bytes = [0u8; SAVE_BUFFER_LEN];
        for b in &mut bytes {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            *b = state.to_le_bytes()[0] & state.to_le_bytes()[2];
        }
        SaveBuffer::from_array(bytes)
    }

    #[test]
    fn save_merge_is_commutative() {
        for seed in 1..20 {
            let a = buffer(seed);
            let b = buffer(seed.wrapping_mul(7919));
            assert_eq!(merge_save_buffer(&a, &b), merge_save_buffer(&b, &a));
        }
    }

    #[test]
    fn save_merge_is_idempotent() {
        for seed in 1..20 {
            let a = buffer(seed);
            assert_eq!(merge_save_buffer(&a, &a), a);
        }
    }

    #[test]
    fn save_merge_is_associative() {
        for seed in 1..20 {
            let a = buffer(seed);
            let b = buffer(seed.wrapping_add(101));
            let c = buffer(seed.wrapping_mul(31).wrapping_add(7));
            assert_eq!(
                merge_save_buffer(&merge_save_buffer(&a, &b), &c),
                merge_save_buffer(&a, &merge_save_buffer(&b, &c)),
            );
        }
    }

    #[test]
    fn save_merge_keeps_every_bit() {
        let a = buffer(3);
        let b = buffer(4);
        let m = merge_save_buffer(&a, &b);
        for i in 0..SAVE_BUFFER_LEN {
            let merged = m.byte(i).unwrap();
            assert_eq!(merged & a.byte(i).unwrap(), a.byte(i).unwrap());
            assert_eq!(merged & b.byte(i).unwrap(), b.byte(i).unwrap());
        }
    }

    #[test]
    fn absorb_reports_change_only_when_bits_are_new() {
        let mut target = SaveBuffer::zeroed();
        let mut bytes = [0u8; SAVE_BUFFER_LEN];
        bytes[0] = 0b1010_0000;
        let incoming = SaveBuffer::from_array(bytes);

        assert!(absorb_save_buffer(&mut target, &incoming));
        assert!(!absorb_save_buffer(&mut target, &incoming));
        assert!(!absorb_save_buffer(&mut target, &SaveBuffer::zeroed()));
    }

    #[test]
    fn star_merge_is_max() {
        assert_eq!(merge_star_count(5, 3), 5);
        assert_eq!(merge_star_count(3, 5), 5);
        assert_eq!(merge_star_count(4, 4), 4);
        assert_eq!(merge_star_count(0, u32::MAX), u32::MAX);
    }
}
