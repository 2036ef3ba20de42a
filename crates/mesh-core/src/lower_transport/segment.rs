//! Segmented Access and Control PDUs.

use alloc::vec::Vec;
use core::fmt;

use crate::constants::{
    ACCESS_SEGMENT_PAYLOAD, AID_MASK, CONTROL_SEGMENT_PAYLOAD, MAX_SEGMENTS, OPCODE_MASK,
    SEG_MASK, SEGMENTED_HEADER_SIZE,
};
use crate::error::PduError;
use crate::sequence::SeqZero;

/// What a segment carries, with the fields that differ per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// `aid` is `None` when the device key is used (AKF = 0).
    /// `szmic` selects a 64-bit TransMIC.
    Access { aid: Option<u8>, szmic: bool },
    Control { opcode: u8 },
}

impl SegmentKind {
    /// Maximum payload octets per segment of this kind.
    pub fn max_payload(&self) -> usize {
        match self {
            SegmentKind::Access { .. } => ACCESS_SEGMENT_PAYLOAD,
            SegmentKind::Control { .. } => CONTROL_SEGMENT_PAYLOAD,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, SegmentKind::Control { .. })
    }
}

/// One segment of a segmented Lower Transport message.
#[derive(Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub seq_zero: SeqZero,
    /// Segment offset, `0..=seg_n`.
    pub seg_o: u8,
    /// Last segment number.
    pub seg_n: u8,
    pub payload: Vec<u8>,
}

impl Segment {
    /// Decode a segmented PDU (SEG bit set).
    pub fn decode(raw: &[u8], control: bool) -> Result<Self, PduError> {
        let min = SEGMENTED_HEADER_SIZE + 1;
        if raw.len() < min {
            return Err(PduError::TooShort {
                min,
                actual: raw.len(),
            });
        }
        if raw[0] & 0x80 == 0 {
            return Err(PduError::InvalidValue {
                field: "SEG",
                value: raw[0],
            });
        }

        let kind = if control {
            SegmentKind::Control {
                opcode: raw[0] & OPCODE_MASK,
            }
        } else {
            let akf = raw[0] & 0x40 != 0;
            SegmentKind::Access {
                aid: akf.then_some(raw[0] & AID_MASK),
                szmic: raw[1] & 0x80 != 0,
            }
        };

        let seq_zero = SeqZero::new((u16::from(raw[1] & 0x7F) << 6) | u16::from(raw[2] >> 2));
        let seg_o = ((raw[2] & 0x03) << 3) | (raw[3] >> 5);
        let seg_n = raw[3] & SEG_MASK;
        if seg_o > seg_n {
            return Err(PduError::SegmentOffsetOutOfRange { seg_o, seg_n });
        }

        let payload = &raw[SEGMENTED_HEADER_SIZE..];
        let max = kind.max_payload();
        if payload.len() > max {
            return Err(PduError::TooLong {
                max: SEGMENTED_HEADER_SIZE + max,
                actual: raw.len(),
            });
        }

        Ok(Segment {
            kind,
            seq_zero,
            seg_o,
            seg_n,
            payload: payload.to_vec(),
        })
    }

    /// Encode to wire format.
    pub fn encode(&self) -> Vec<u8> {
        let zero = self.seq_zero.value();
        let octet0 = match self.kind {
            SegmentKind::Access { aid, .. } => match aid {
                Some(aid) => 0x80 | 0x40 | (aid & AID_MASK),
                None => 0x80,
            },
            SegmentKind::Control { opcode } => 0x80 | (opcode & OPCODE_MASK),
        };
        let szmic = match self.kind {
            SegmentKind::Access { szmic: true, .. } => 0x80,
            _ => 0x00,
        };
        let octet1 = szmic | (zero >> 6) as u8;
        let octet2 = (((zero & 0x3F) as u8) << 2) | ((self.seg_o >> 3) & 0x03);
        let octet3 = ((self.seg_o & 0x07) << 5) | (self.seg_n & SEG_MASK);

        let mut out = Vec::with_capacity(SEGMENTED_HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&[octet0, octet1, octet2, octet3]);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn segment_count(&self) -> usize {
        usize::from(self.seg_n) + 1
    }

    pub fn is_single(&self) -> bool {
        self.seg_n == 0
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("kind", &self.kind)
            .field("seq_zero", &self.seq_zero)
            .field("seg_o", &self.seg_o)
            .field("seg_n", &self.seg_n)
            .field("len", &self.payload.len())
            .finish()
    }
}

/// Split an Upper Transport PDU into segments of `kind`.
///
/// Returns `TooLong` when more than 32 segments would be needed, and
/// `Empty` for an empty PDU.
pub fn split(kind: SegmentKind, seq_zero: SeqZero, pdu: &[u8]) -> Result<Vec<Segment>, PduError> {
    if pdu.is_empty() {
        return Err(PduError::Empty);
    }
    let chunk = kind.max_payload();
    let count = pdu.len().div_ceil(chunk);
    if count > MAX_SEGMENTS {
        return Err(PduError::TooLong {
            max: chunk * MAX_SEGMENTS,
            actual: pdu.len(),
        });
    }
    let seg_n = (count - 1) as u8;
    Ok(pdu
        .chunks(chunk)
        .enumerate()
        .map(|(offset, bytes)| Segment {
            kind,
            seq_zero,
            seg_o: offset as u8,
            seg_n,
            payload: bytes.to_vec(),
        })
        .collect())
}
