//! SeqZero and SeqAuth arithmetic.
//!
//! A segmented message is identified by the 13 least significant bits of the
//! sequence number of its first segment (SeqZero). Replay protection needs
//! the full 24-bit sequence number back, which is reconstructed from the
//! sequence number of any later segment.

use core::fmt;

use crate::constants::{SEQ_MASK, SEQ_ZERO_MASK};

/// The 13-bit SeqZero field.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SeqZero(u16);

impl SeqZero {
    pub const MAX: u16 = SEQ_ZERO_MASK;

    /// Masks `value` to 13 bits.
    pub const fn new(value: u16) -> Self {
        Self(value & SEQ_ZERO_MASK)
    }

    /// SeqZero of a message whose first segment uses `sequence`.
    pub const fn from_sequence(sequence: u32) -> Self {
        Self((sequence & SEQ_ZERO_MASK as u32) as u16)
    }

    pub const fn value(self) -> u16 {
        self.0
    }
}

impl fmt::Display for SeqZero {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SeqZero {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeqZero({})", self.0)
    }
}

/// Reconstruct the sequence number of the first segment of a message.
///
/// `sequence` is the sequence number of a segment that carries `seq_zero`.
/// The first segment was sent no more than 8191 sequence numbers earlier,
/// so the high 11 bits either match or are one lower.
pub fn message_sequence(sequence: u32, seq_zero: SeqZero) -> u32 {
    let sequence = sequence & SEQ_MASK;
    let zero = u32::from(seq_zero.value());
    let base = (sequence & 0x00FF_E000) + zero;
    if sequence & u32::from(SEQ_ZERO_MASK) < zero {
        base.wrapping_sub(0x2000) & SEQ_MASK
    } else {
        base
    }
}

/// SeqAuth: the IV Index in the high bits, the 24-bit sequence below.
pub fn seq_auth(iv_index: u32, sequence: u32) -> u64 {
    (u64::from(iv_index) << 24) | u64::from(sequence & SEQ_MASK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_zero_masks_to_13_bits() {
        assert_eq!(SeqZero::new(0xFFFF).value(), 0x1FFF);
        assert_eq!(SeqZero::from_sequence(0x12_3456).value(), 0x1456);
    }

    #[test]
    fn test_message_sequence_same_block() {
        // First segment 0x001005, later segment 0x001007.
        assert_eq!(message_sequence(0x00_1007, SeqZero::new(0x1005)), 0x00_1005);
        assert_eq!(message_sequence(0x00_1005, SeqZero::new(0x1005)), 0x00_1005);
    }

    #[test]
    fn test_message_sequence_crosses_block_boundary() {
        // First segment 0x001FFE, later segment 0x002001: low bits wrapped.
        assert_eq!(message_sequence(0x00_2001, SeqZero::new(0x1FFE)), 0x00_1FFE);
    }

    #[test]
    fn test_message_sequence_never_leaves_24_bits() {
        let seq = message_sequence(0x00_0001, SeqZero::new(0x1FFF));
        assert!(seq <= SEQ_MASK);
    }

    #[test]
    fn test_seq_auth_layout() {
        assert_eq!(seq_auth(0x1234_5678, 0x00AB_CDEF), 0x0012_3456_78AB_CDEF);
        assert_eq!(seq_auth(0, 0xFF00_0001), 0x0000_0001);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn first_segment_recovered_from_any_later_segment(
            first in 0x2000u32..0x00FF_0000,
            delta in 0u32..0x2000,
        ) {
            let zero = SeqZero::from_sequence(first);
            prop_assert_eq!(message_sequence(first + delta, zero), first);
        }

        #[test]
        fn seq_auth_is_monotonic_in_sequence(iv in any::<u32>(), a in 0u32..=SEQ_MASK, b in 0u32..=SEQ_MASK) {
            prop_assert_eq!(a < b, seq_auth(iv, a) < seq_auth(iv, b));
        }
    }
}
