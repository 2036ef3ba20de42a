//! Segment Acknowledgment control message.

use alloc::vec::Vec;

use crate::constants::{ACK_PDU_SIZE, SEGMENT_ACK_OPCODE};
use crate::error::PduError;
use crate::sequence::SeqZero;

/// Segment Acknowledgment (control opcode 0x00, unsegmented).
///
/// Bit *i* of `block_ack` is set when segment *i* was received. An all-zero
/// block ack means the receiver is busy and cannot accept the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentAcknowledgment {
    /// Sent by a Friend on behalf of a Low Power node.
    pub on_behalf_of: bool,
    pub seq_zero: SeqZero,
    pub block_ack: u32,
}

impl SegmentAcknowledgment {
    pub fn new(seq_zero: SeqZero, block_ack: u32) -> Self {
        Self {
            on_behalf_of: false,
            seq_zero,
            block_ack,
        }
    }

    /// Build an ack from a reassembly slot vector.
    pub fn for_received<T>(seq_zero: SeqZero, slots: &[Option<T>]) -> Self {
        let block_ack = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .fold(0u32, |acc, (i, _)| acc | (1 << i));
        Self::new(seq_zero, block_ack)
    }

    pub fn is_busy(&self) -> bool {
        self.block_ack == 0
    }

    pub fn is_acknowledged(&self, offset: u8) -> bool {
        offset < 32 && self.block_ack & (1 << offset) != 0
    }

    /// Decode the 7-octet PDU, including the opcode octet.
    pub fn decode(raw: &[u8]) -> Result<Self, PduError> {
        if raw.len() != ACK_PDU_SIZE {
            return Err(PduError::InvalidLength {
                expected: ACK_PDU_SIZE,
                actual: raw.len(),
            });
        }
        if raw[0] != SEGMENT_ACK_OPCODE {
            return Err(PduError::InvalidValue {
                field: "ack opcode",
                value: raw[0],
            });
        }
        let on_behalf_of = raw[1] & 0x80 != 0;
        let seq_zero = SeqZero::new((u16::from(raw[1] & 0x7F) << 6) | u16::from(raw[2] >> 2));
        let block_ack = u32::from_be_bytes([raw[3], raw[4], raw[5], raw[6]]);
        Ok(Self {
            on_behalf_of,
            seq_zero,
            block_ack,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let zero = self.seq_zero.value();
        let obo = if self.on_behalf_of { 0x80 } else { 0x00 };
        let mut out = Vec::with_capacity(ACK_PDU_SIZE);
        out.push(SEGMENT_ACK_OPCODE);
        out.push(obo | (zero >> 6) as u8);
        out.push(((zero & 0x3F) as u8) << 2);
        out.extend_from_slice(&self.block_ack.to_be_bytes());
        out
    }
}
