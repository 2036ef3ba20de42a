//! The Lower Transport layer: replay protection, reassembly and
//! transmission behind one sans-IO interface.
//!
//! Callers feed decrypted network PDUs in and get [`LowerTransportEvent`]s
//! back. Nothing here performs I/O or reads the clock; `now` is always
//! passed in.

use std::time::Instant;

use mesh_core::constants::{MAX_UNSEGMENTED_ACCESS_PAYLOAD, MAX_UNSEGMENTED_CONTROL_PAYLOAD};
use mesh_core::constants::SEGMENT_ACK_OPCODE;
use mesh_core::lower_transport::{LowerTransportPdu, Segment, SegmentKind, UnsegmentedMessage};
use mesh_core::PduError;
use mesh_core::sequence::{message_sequence, seq_auth};
use mesh_core::{Address, AddressRange, SeqZero};

use crate::error::TransportError;
use crate::replay::ReplayCache;
use crate::sar::reassembly::{
    AckTransmission, ReassembledMessage, Reassembler, ReassemblyOutcome, SegmentMeta,
};
use crate::sar::transmission::{SendCompletion, SendRequest, TransmitOutput, Transmitter};
use crate::sar::SarParameters;

/// A decrypted network PDU handed up by the network layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingPdu {
    pub source: Address,
    pub destination: Address,
    pub ttl: u8,
    pub sequence: u32,
    pub iv_index: u32,
    /// CTL bit of the network header.
    pub control: bool,
    pub transport_pdu: Vec<u8>,
}

/// A Lower Transport PDU for the network layer to encrypt and send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingPdu {
    pub destination: Address,
    pub ttl: u8,
    pub control: bool,
    pub transport_pdu: Vec<u8>,
}

/// An Upper Transport PDU delivered to the layer above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub source: Address,
    pub destination: Address,
    pub kind: SegmentKind,
    pub seq_auth: u64,
    pub segmented: bool,
    pub payload: Vec<u8>,
}

impl From<ReassembledMessage> for ReceivedMessage {
    fn from(message: ReassembledMessage) -> Self {
        Self {
            source: message.source,
            destination: message.destination,
            kind: message.kind,
            seq_auth: message.seq_auth,
            segmented: true,
            payload: message.payload,
        }
    }
}

/// A message to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub destination: Address,
    /// Sequence number for the (first) PDU.
    pub sequence: u32,
    pub ttl: Option<u8>,
    pub kind: SegmentKind,
    pub payload: Vec<u8>,
    /// Force segmentation even when the payload fits one PDU.
    pub segmented: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LowerTransportEvent {
    Transmit(OutgoingPdu),
    Received(ReceivedMessage),
    SendCompleted(SendCompletion),
}

pub struct LowerTransportLayer {
    local: AddressRange,
    default_ttl: u8,
    replay: ReplayCache,
    reassembler: Reassembler,
    transmitter: Transmitter,
}

impl LowerTransportLayer {
    /// `local` covers the unicast addresses of our elements.
    pub fn new(local: AddressRange, params: SarParameters) -> Self {
        let params = params.clamped();
        Self {
            local,
            default_ttl: params.default_ttl,
            replay: ReplayCache::new(),
            reassembler: Reassembler::new(params),
            transmitter: Transmitter::new(params),
        }
    }

    pub fn local_addresses(&self) -> AddressRange {
        self.local
    }

    fn is_local(&self, address: Address) -> bool {
        self.local.contains(address)
    }

    /// Process one received network PDU.
    pub fn handle_network_pdu(&mut self, now: Instant, pdu: IncomingPdu) -> Vec<LowerTransportEvent> {
        let decoded = match LowerTransportPdu::decode(&pdu.transport_pdu, pdu.control) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(src = %pdu.source, error = %e, "dropping malformed lower transport PDU");
                return Vec::new();
            }
        };
        tracing::trace!(src = %pdu.source, dst = %pdu.destination, pdu = ?decoded, "lower transport PDU received");

        if pdu.destination.is_multicast() || self.is_local(pdu.destination) {
            let (sequence, sar_active) = match &decoded {
                LowerTransportPdu::Segment(segment) => (
                    message_sequence(pdu.sequence, segment.seq_zero),
                    self.reassembler.is_active(pdu.source, segment.seq_zero),
                ),
                _ => (pdu.sequence, false),
            };
            let received = seq_auth(pdu.iv_index, sequence);
            if !self.replay.check(pdu.source, received, sar_active).is_accepted() {
                return Vec::new();
            }
        }

        match decoded {
            LowerTransportPdu::Segment(segment) => self.handle_segment(now, &pdu, segment),
            LowerTransportPdu::Unsegmented(message) => {
                let kind = match &message {
                    UnsegmentedMessage::Access { aid, .. } => SegmentKind::Access {
                        aid: *aid,
                        szmic: false,
                    },
                    UnsegmentedMessage::Control { opcode, .. } => SegmentKind::Control { opcode: *opcode },
                };
                tracing::info!(src = %pdu.source, dst = %pdu.destination, len = message.payload().len(), "unsegmented message received");
                vec![LowerTransportEvent::Received(ReceivedMessage {
                    source: pdu.source,
                    destination: pdu.destination,
                    kind,
                    seq_auth: seq_auth(pdu.iv_index, pdu.sequence),
                    segmented: false,
                    payload: message.payload().to_vec(),
                })]
            }
            LowerTransportPdu::Ack(ack) => {
                if !self.is_local(pdu.destination) {
                    return Vec::new();
                }
                tracing::debug!(src = %pdu.source, seq_zero = %ack.seq_zero, block_ack = ack.block_ack, "segment ack received");
                let output = self.transmitter.on_ack(now, pdu.source, &ack);
                Self::transmit_events(output)
            }
        }
    }

    fn handle_segment(&mut self, now: Instant, pdu: &IncomingPdu, segment: Segment) -> Vec<LowerTransportEvent> {
        let meta = SegmentMeta {
            source: pdu.source,
            destination: pdu.destination,
            ttl: pdu.ttl,
            seq_auth: seq_auth(pdu.iv_index, message_sequence(pdu.sequence, segment.seq_zero)),
        };
        let targeted = self.is_local(pdu.destination);
        let (outcome, acks) = self.reassembler.on_segment(now, meta, segment, targeted);

        let mut events: Vec<LowerTransportEvent> = acks.into_iter().map(Self::ack_event).collect();
        if let ReassemblyOutcome::Completed(message) = outcome {
            events.push(LowerTransportEvent::Received(message.into()));
        }
        events
    }

    fn ack_event(ack: AckTransmission) -> LowerTransportEvent {
        LowerTransportEvent::Transmit(OutgoingPdu {
            destination: ack.destination,
            ttl: ack.ttl,
            control: true,
            transport_pdu: ack.ack.encode(),
        })
    }

    fn transmit_events(output: TransmitOutput) -> Vec<LowerTransportEvent> {
        let segments = output.segments.into_iter().map(|outgoing| {
            LowerTransportEvent::Transmit(OutgoingPdu {
                destination: outgoing.destination,
                ttl: outgoing.ttl,
                control: outgoing.segment.kind.is_control(),
                transport_pdu: outgoing.segment.encode(),
            })
        });
        let completions = output
            .completions
            .into_iter()
            .map(LowerTransportEvent::SendCompleted);
        segments.chain(completions).collect()
    }

    /// Send a message, segmenting it when required or requested.
    pub fn send(&mut self, now: Instant, message: OutgoingMessage) -> Result<Vec<LowerTransportEvent>, TransportError> {
        if message.payload.is_empty() {
            return Err(TransportError::EmptyMessage);
        }
        if let SegmentKind::Control { opcode } = message.kind
            && opcode == SEGMENT_ACK_OPCODE
        {
            return Err(TransportError::Pdu(PduError::InvalidValue {
                field: "opcode",
                value: opcode,
            }));
        }
        let ttl = message.ttl.unwrap_or(self.default_ttl);

        let unsegmented = match message.kind {
            SegmentKind::Access { aid, szmic: false }
                if !message.segmented && message.payload.len() <= MAX_UNSEGMENTED_ACCESS_PAYLOAD =>
            {
                Some(UnsegmentedMessage::Access {
                    aid,
                    upper_transport_pdu: message.payload.clone(),
                })
            }
            SegmentKind::Control { opcode }
                if !message.segmented && message.payload.len() <= MAX_UNSEGMENTED_CONTROL_PAYLOAD =>
            {
                Some(UnsegmentedMessage::Control {
                    opcode,
                    parameters: message.payload.clone(),
                })
            }
            _ => None,
        };

        if let Some(unsegmented) = unsegmented {
            let pdu = LowerTransportPdu::Unsegmented(unsegmented);
            tracing::debug!(dst = %message.destination, len = message.payload.len(), "sending unsegmented message");
            return Ok(vec![LowerTransportEvent::Transmit(OutgoingPdu {
                destination: message.destination,
                ttl,
                control: pdu.is_control(),
                transport_pdu: pdu.encode(),
            })]);
        }

        let output = self.transmitter.send(
            now,
            SendRequest {
                destination: message.destination,
                sequence: message.sequence,
                ttl: Some(ttl),
                kind: message.kind,
                payload: message.payload,
            },
        )?;
        Ok(Self::transmit_events(output))
    }

    /// Fire due timers in both directions.
    pub fn poll_timers(&mut self, now: Instant) -> Vec<LowerTransportEvent> {
        let mut events: Vec<LowerTransportEvent> = self
            .reassembler
            .poll_timers(now)
            .into_iter()
            .map(Self::ack_event)
            .collect();
        events.extend(Self::transmit_events(self.transmitter.poll_timers(now)));
        events
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.reassembler.next_deadline(), self.transmitter.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Stop sending the message with `seq_zero` without reporting it.
    pub fn cancel(&mut self, seq_zero: SeqZero) -> bool {
        self.transmitter.cancel(seq_zero)
    }

    pub fn is_receiving_from(&self, source: Address) -> bool {
        self.reassembler.is_receiving_from(source)
    }

    pub fn is_sending(&self, seq_zero: SeqZero) -> bool {
        self.transmitter.is_sending(seq_zero)
    }

    /// Bearer closed: drop all SAR state. In-flight sends complete with
    /// `Cancelled`. Replay state is kept.
    pub fn reset(&mut self) -> Vec<LowerTransportEvent> {
        self.reassembler.reset();
        let cancelled = self.transmitter.reset();
        if !cancelled.is_empty() {
            tracing::info!(count = cancelled.len(), "cancelled in-flight segmented messages");
        }
        cancelled
            .into_iter()
            .map(LowerTransportEvent::SendCompleted)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const PHONE: Address = Address(0x0001);
    const NODE: Address = Address(0x0100);

    fn layer(address: Address) -> LowerTransportLayer {
        LowerTransportLayer::new(AddressRange::new(address, address), SarParameters::default())
    }

    fn access(destination: Address, sequence: u32, payload: Vec<u8>) -> OutgoingMessage {
        OutgoingMessage {
            destination,
            sequence,
            ttl: None,
            kind: SegmentKind::Access {
                aid: Some(0x05),
                szmic: false,
            },
            payload,
            segmented: false,
        }
    }

    /// Deliver every `Transmit` in `events` from `source` to `receiver`,
    /// giving each PDU the next sequence number.
    fn deliver(
        now: Instant,
        receiver: &mut LowerTransportLayer,
        source: Address,
        sequence: &mut u32,
        events: &[LowerTransportEvent],
    ) -> Vec<LowerTransportEvent> {
        let mut out = Vec::new();
        for event in events {
            if let LowerTransportEvent::Transmit(pdu) = event {
                out.extend(receiver.handle_network_pdu(
                    now,
                    IncomingPdu {
                        source,
                        destination: pdu.destination,
                        ttl: pdu.ttl,
                        sequence: *sequence,
                        iv_index: 0,
                        control: pdu.control,
                        transport_pdu: pdu.transport_pdu.clone(),
                    },
                ));
                *sequence += 1;
            }
        }
        out
    }

    fn received(events: &[LowerTransportEvent]) -> Vec<&ReceivedMessage> {
        events
            .iter()
            .filter_map(|event| match event {
                LowerTransportEvent::Received(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_short_access_message_is_sent_unsegmented() {
        let now = Instant::now();
        let mut phone = layer(PHONE);
        let mut node = layer(NODE);

        let events = phone.send(now, access(NODE, 10, vec![1, 2, 3])).unwrap();
        assert_eq!(events.len(), 1);
        let LowerTransportEvent::Transmit(pdu) = &events[0] else {
            panic!("expected transmit, got {events:?}");
        };
        assert!(!pdu.control);
        assert_eq!(pdu.transport_pdu, vec![0x45, 1, 2, 3]);
        assert_eq!(pdu.ttl, 5);

        let mut seq = 10;
        let delivered = deliver(now, &mut node, PHONE, &mut seq, &events);
        let messages = received(&delivered);
        assert_eq!(messages.len(), 1);
        assert!(!messages[0].segmented);
        assert_eq!(messages[0].payload, vec![1, 2, 3]);
        assert_eq!(messages[0].seq_auth, 10);
    }

    #[test]
    fn test_segmented_exchange_completes_after_ack() {
        let now = Instant::now();
        let mut phone = layer(PHONE);
        let mut node = layer(NODE);
        let payload: Vec<u8> = (0..30).collect();

        let events = phone.send(now, access(NODE, 100, payload.clone())).unwrap();
        assert_eq!(events.len(), 3);
        assert!(phone.is_sending(SeqZero::from_sequence(100)));

        let mut phone_seq = 100;
        let delivered = deliver(now, &mut node, PHONE, &mut phone_seq, &events);
        let messages = received(&delivered);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].segmented);
        assert_eq!(messages[0].payload, payload);
        assert_eq!(messages[0].seq_auth, 100);

        let mut node_seq = 1;
        let back = deliver(now, &mut phone, NODE, &mut node_seq, &delivered);
        assert_eq!(
            back,
            vec![LowerTransportEvent::SendCompleted(SendCompletion {
                seq_zero: SeqZero::from_sequence(100),
                destination: NODE,
                result: Ok(()),
            })]
        );
        assert!(!phone.is_sending(SeqZero::from_sequence(100)));
        assert_eq!(phone.next_deadline(), None);
    }

    #[test]
    fn test_lost_segment_is_recovered_by_ack_timer() {
        let start = Instant::now();
        let mut phone = layer(PHONE);
        let mut node = layer(NODE);
        let payload: Vec<u8> = (0..30).collect();

        let events = phone.send(start, access(NODE, 200, payload.clone())).unwrap();
        // Segment 1 is lost.
        let mut phone_seq = 200;
        let mut first_pass = events.clone();
        first_pass.remove(1);
        let delivered = deliver(start, &mut node, PHONE, &mut phone_seq, &first_pass);
        assert!(received(&delivered).is_empty());
        assert!(node.is_receiving_from(PHONE));

        let deadline = node.next_deadline().unwrap();
        let acks = node.poll_timers(deadline);
        assert_eq!(acks.len(), 1);

        let mut node_seq = 1;
        let resent = deliver(deadline, &mut phone, NODE, &mut node_seq, &acks);
        assert_eq!(resent.len(), 1, "only the missing segment is resent");

        let delivered = deliver(deadline, &mut node, PHONE, &mut phone_seq, &resent);
        let messages = received(&delivered);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, payload);
    }

    #[test]
    fn test_replayed_pdu_is_dropped() {
        let now = Instant::now();
        let mut node = layer(NODE);
        let pdu = IncomingPdu {
            source: PHONE,
            destination: NODE,
            ttl: 5,
            sequence: 7,
            iv_index: 0,
            control: false,
            transport_pdu: vec![0x00, 0xAA],
        };
        assert_eq!(node.handle_network_pdu(now, pdu.clone()).len(), 1);
        assert!(node.handle_network_pdu(now, pdu).is_empty());
    }

    #[test]
    fn test_malformed_pdu_is_dropped() {
        let mut node = layer(NODE);
        let pdu = IncomingPdu {
            source: PHONE,
            destination: NODE,
            ttl: 5,
            sequence: 1,
            iv_index: 0,
            control: true,
            transport_pdu: vec![0x00, 0x01],
        };
        assert!(node.handle_network_pdu(Instant::now(), pdu).is_empty());
    }

    #[test]
    fn test_forced_segmentation_of_short_message() {
        let now = Instant::now();
        let mut phone = layer(PHONE);
        let mut message = access(NODE, 5, vec![1, 2]);
        message.segmented = true;
        let events = phone.send(now, message).unwrap();
        let LowerTransportEvent::Transmit(pdu) = &events[0] else {
            panic!("expected transmit");
        };
        assert_eq!(pdu.transport_pdu[0] & 0x80, 0x80);
    }

    #[test]
    fn test_szmic_forces_segmentation() {
        let now = Instant::now();
        let mut phone = layer(PHONE);
        let mut message = access(NODE, 5, vec![1, 2]);
        message.kind = SegmentKind::Access {
            aid: None,
            szmic: true,
        };
        let events = phone.send(now, message).unwrap();
        assert_eq!(events.len(), 1);
        assert!(phone.is_sending(SeqZero::from_sequence(5)));
    }

    #[test]
    fn test_ack_opcode_cannot_be_sent_as_message() {
        let mut phone = layer(PHONE);
        let mut message = access(NODE, 5, vec![1]);
        message.kind = SegmentKind::Control { opcode: 0x00 };
        assert!(matches!(
            phone.send(Instant::now(), message),
            Err(TransportError::Pdu(PduError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_empty_message_rejected() {
        let mut phone = layer(PHONE);
        assert_eq!(
            phone.send(Instant::now(), access(NODE, 1, Vec::new())),
            Err(TransportError::EmptyMessage)
        );
    }

    #[test]
    fn test_reset_cancels_unicast_sends() {
        let now = Instant::now();
        let mut phone = layer(PHONE);
        phone.send(now, access(NODE, 300, vec![0; 20])).unwrap();
        let events = phone.reset();
        assert_eq!(
            events,
            vec![LowerTransportEvent::SendCompleted(SendCompletion {
                seq_zero: SeqZero::from_sequence(300),
                destination: NODE,
                result: Err(TransportError::Cancelled),
            })]
        );
        assert_eq!(phone.next_deadline(), None);
    }

    #[test]
    fn test_unacknowledged_send_times_out() {
        let mut now = Instant::now();
        let mut phone = layer(PHONE);
        phone.send(now, access(NODE, 400, vec![0; 20])).unwrap();

        let mut completions = Vec::new();
        while let Some(deadline) = phone.next_deadline() {
            now = deadline;
            for event in phone.poll_timers(now) {
                if let LowerTransportEvent::SendCompleted(done) = event {
                    completions.push(done);
                }
            }
            assert!(now < Instant::now() + Duration::from_secs(60));
        }
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].result, Err(TransportError::Timeout));
    }
}
