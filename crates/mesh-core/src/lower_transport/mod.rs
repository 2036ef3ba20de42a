//! Lower Transport PDU codec.
//!
//! The first octet's MSB (SEG) selects segmented or unsegmented format. The
//! CTL bit lives in the network header, so callers pass it in.

pub mod ack;
pub mod segment;

use alloc::vec::Vec;

use crate::constants::{
    AID_MASK, MAX_UNSEGMENTED_ACCESS_PAYLOAD, MAX_UNSEGMENTED_CONTROL_PAYLOAD, OPCODE_MASK,
    SEGMENT_ACK_OPCODE,
};
use crate::error::PduError;

pub use ack::SegmentAcknowledgment;
pub use segment::{Segment, SegmentKind, split};

/// An unsegmented Access or Control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsegmentedMessage {
    Access {
        aid: Option<u8>,
        upper_transport_pdu: Vec<u8>,
    },
    Control {
        opcode: u8,
        parameters: Vec<u8>,
    },
}

impl UnsegmentedMessage {
    pub fn payload(&self) -> &[u8] {
        match self {
            UnsegmentedMessage::Access {
                upper_transport_pdu,
                ..
            } => upper_transport_pdu,
            UnsegmentedMessage::Control { parameters, .. } => parameters,
        }
    }
}

/// A decoded Lower Transport PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LowerTransportPdu {
    Segment(Segment),
    Unsegmented(UnsegmentedMessage),
    Ack(SegmentAcknowledgment),
}

impl LowerTransportPdu {
    /// Decode `raw`; `control` is the CTL bit of the carrying network PDU.
    pub fn decode(raw: &[u8], control: bool) -> Result<Self, PduError> {
        let first = *raw.first().ok_or(PduError::Empty)?;

        if first & 0x80 != 0 {
            return Segment::decode(raw, control).map(LowerTransportPdu::Segment);
        }

        if control {
            let opcode = first & OPCODE_MASK;
            if opcode == SEGMENT_ACK_OPCODE {
                return SegmentAcknowledgment::decode(raw).map(LowerTransportPdu::Ack);
            }
            let parameters = &raw[1..];
            if parameters.len() > MAX_UNSEGMENTED_CONTROL_PAYLOAD {
                return Err(PduError::TooLong {
                    max: 1 + MAX_UNSEGMENTED_CONTROL_PAYLOAD,
                    actual: raw.len(),
                });
            }
            return Ok(LowerTransportPdu::Unsegmented(UnsegmentedMessage::Control {
                opcode,
                parameters: parameters.to_vec(),
            }));
        }

        if raw.len() < 2 {
            return Err(PduError::TooShort {
                min: 2,
                actual: raw.len(),
            });
        }
        let payload = &raw[1..];
        if payload.len() > MAX_UNSEGMENTED_ACCESS_PAYLOAD {
            return Err(PduError::TooLong {
                max: 1 + MAX_UNSEGMENTED_ACCESS_PAYLOAD,
                actual: raw.len(),
            });
        }
        let akf = first & 0x40 != 0;
        Ok(LowerTransportPdu::Unsegmented(UnsegmentedMessage::Access {
            aid: akf.then_some(first & AID_MASK),
            upper_transport_pdu: payload.to_vec(),
        }))
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            LowerTransportPdu::Segment(segment) => segment.encode(),
            LowerTransportPdu::Ack(ack) => ack.encode(),
            LowerTransportPdu::Unsegmented(UnsegmentedMessage::Access {
                aid,
                upper_transport_pdu,
            }) => {
                let header = match aid {
                    Some(aid) => 0x40 | (aid & AID_MASK),
                    None => 0x00,
                };
                let mut out = Vec::with_capacity(1 + upper_transport_pdu.len());
                out.push(header);
                out.extend_from_slice(upper_transport_pdu);
                out
            }
            LowerTransportPdu::Unsegmented(UnsegmentedMessage::Control { opcode, parameters }) => {
                let mut out = Vec::with_capacity(1 + parameters.len());
                out.push(opcode & OPCODE_MASK);
                out.extend_from_slice(parameters);
                out
            }
        }
    }

    /// Whether the carrying network PDU must have CTL set.
    pub fn is_control(&self) -> bool {
        match self {
            LowerTransportPdu::Segment(segment) => segment.kind.is_control(),
            LowerTransportPdu::Unsegmented(message) => {
                matches!(message, UnsegmentedMessage::Control { .. })
            }
            LowerTransportPdu::Ack(_) => true,
        }
    }
}
