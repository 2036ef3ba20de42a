//! Reassembly of incoming segmented messages.
//!
//! Slots are keyed by `(source, SeqZero)`. A slot lives until every segment
//! has arrived or the incomplete timeout passes without a new segment. For
//! messages addressed to us, an ack timer reports partial progress, and the
//! final ack is remembered per source so retransmitted segments of an
//! already completed message can be answered again.

use std::collections::HashMap;
use std::time::Instant;

use mesh_core::lower_transport::{Segment, SegmentAcknowledgment, SegmentKind};
use mesh_core::{Address, SeqZero};

use crate::sar::params::SarParameters;
use crate::timer::{TimerId, TimerQueue};

/// Network-layer fields of the PDU that carried a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentMeta {
    pub source: Address,
    pub destination: Address,
    pub ttl: u8,
    pub seq_auth: u64,
}

/// A fully reassembled Upper Transport PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassembledMessage {
    pub source: Address,
    pub destination: Address,
    pub kind: SegmentKind,
    pub seq_zero: SeqZero,
    pub seq_auth: u64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyOutcome {
    StillAccumulating,
    Completed(ReassembledMessage),
    /// Segment of a message already completed and acknowledged.
    DuplicateAlreadyAcked,
    Invalid,
}

/// An ack the caller must send to `destination`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckTransmission {
    pub destination: Address,
    pub ttl: u8,
    pub ack: SegmentAcknowledgment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReassemblyTimer {
    Discard(Address, SeqZero),
    Ack(Address, SeqZero),
}

#[derive(Debug)]
struct Slot {
    segments: Vec<Option<Segment>>,
    seg_n: u8,
    destination: Address,
    seq_auth: u64,
    ack_ttl: u8,
    targeted: bool,
    discard_timer: Option<TimerId>,
    ack_timer: Option<TimerId>,
}

impl Slot {
    fn is_complete(&self) -> bool {
        self.segments.iter().all(Option::is_some)
    }

    fn received_mask(&self) -> u32 {
        SegmentAcknowledgment::for_received(SeqZero::new(0), &self.segments).block_ack
    }
}

#[derive(Debug)]
struct CompletedAck {
    seq_zero: SeqZero,
    ack: SegmentAcknowledgment,
    ttl: u8,
    last_sent: Instant,
}

#[derive(Debug)]
pub struct Reassembler {
    params: SarParameters,
    slots: HashMap<(Address, SeqZero), Slot>,
    completed: HashMap<Address, CompletedAck>,
    timers: TimerQueue<ReassemblyTimer>,
}

impl Reassembler {
    pub fn new(params: SarParameters) -> Self {
        Self {
            params: params.clamped(),
            slots: HashMap::new(),
            completed: HashMap::new(),
            timers: TimerQueue::new(),
        }
    }

    fn ack_ttl(&self, received_ttl: u8) -> u8 {
        if received_ttl == 0 {
            0
        } else {
            self.params.default_ttl
        }
    }

    /// Feed one received segment.
    ///
    /// `targeted_at_us` is true when the destination is one of our unicast
    /// addresses; only then are acks produced.
    pub fn on_segment(
        &mut self,
        now: Instant,
        meta: SegmentMeta,
        segment: Segment,
        targeted_at_us: bool,
    ) -> (ReassemblyOutcome, Vec<AckTransmission>) {
        let source = meta.source;
        let seq_zero = segment.seq_zero;
        let mut acks = Vec::new();

        if let Some(done) = self.completed.get_mut(&source) {
            if done.seq_zero == seq_zero {
                if now >= done.last_sent + self.params.completed_ack_interval {
                    tracing::debug!(src = %source, %seq_zero, "message already acknowledged, resending ack");
                    done.last_sent = now;
                    acks.push(AckTransmission {
                        destination: source,
                        ttl: done.ttl,
                        ack: done.ack,
                    });
                } else {
                    tracing::debug!(src = %source, %seq_zero, "message already acknowledged, ack sent recently");
                }
                return (ReassemblyOutcome::DuplicateAlreadyAcked, acks);
            }
            // A new message from this source means the last ack arrived.
            self.completed.remove(&source);
        }

        let ack_ttl = self.ack_ttl(meta.ttl);

        if segment.is_single() {
            let message = ReassembledMessage {
                source,
                destination: meta.destination,
                kind: segment.kind,
                seq_zero,
                seq_auth: meta.seq_auth,
                payload: segment.payload.clone(),
            };
            if targeted_at_us {
                let ack = SegmentAcknowledgment::new(seq_zero, 1);
                self.remember_ack(now, source, ack, ack_ttl);
                acks.push(AckTransmission {
                    destination: source,
                    ttl: ack_ttl,
                    ack,
                });
            }
            tracing::info!(src = %source, %seq_zero, len = message.payload.len(), "single-segment message received");
            return (ReassemblyOutcome::Completed(message), acks);
        }

        let key = (source, seq_zero);
        let slot = self.slots.entry(key).or_insert_with(|| Slot {
            segments: vec![None; segment.segment_count()],
            seg_n: segment.seg_n,
            destination: meta.destination,
            seq_auth: meta.seq_auth,
            ack_ttl,
            targeted: targeted_at_us,
            discard_timer: None,
            ack_timer: None,
        });

        if segment.seg_n != slot.seg_n || usize::from(segment.seg_o) >= slot.segments.len() {
            tracing::warn!(
                src = %source,
                %seq_zero,
                seg_o = segment.seg_o,
                seg_n = segment.seg_n,
                expected_seg_n = slot.seg_n,
                "invalid segment"
            );
            return (ReassemblyOutcome::Invalid, acks);
        }

        let offset = usize::from(segment.seg_o);
        tracing::trace!(src = %source, %seq_zero, seg_o = offset, "segment stored");
        slot.segments[offset] = Some(segment);

        if slot.is_complete() {
            let Some(slot) = self.slots.remove(&key) else {
                return (ReassemblyOutcome::Invalid, acks);
            };
            self.cancel_slot_timers(&slot);

            let ack = SegmentAcknowledgment::for_received(seq_zero, &slot.segments);
            let mut kind = None;
            let mut payload = Vec::new();
            for segment in slot.segments.into_iter().flatten() {
                kind.get_or_insert(segment.kind);
                payload.extend_from_slice(&segment.payload);
            }
            let Some(kind) = kind else {
                return (ReassemblyOutcome::Invalid, acks);
            };

            if slot.targeted {
                self.remember_ack(now, source, ack, slot.ack_ttl);
                acks.push(AckTransmission {
                    destination: source,
                    ttl: slot.ack_ttl,
                    ack,
                });
            }
            tracing::info!(
                src = %source,
                dst = %slot.destination,
                %seq_zero,
                segments = usize::from(slot.seg_n) + 1,
                len = payload.len(),
                "segmented message reassembled"
            );
            let message = ReassembledMessage {
                source,
                destination: slot.destination,
                kind,
                seq_zero,
                seq_auth: slot.seq_auth,
                payload,
            };
            return (ReassemblyOutcome::Completed(message), acks);
        }

        // Any new segment restarts the incomplete timer.
        if let Some(id) = slot.discard_timer.take() {
            self.timers.cancel(id);
        }
        slot.discard_timer = Some(self.timers.schedule(
            now + self.params.incomplete_timeout,
            ReassemblyTimer::Discard(source, seq_zero),
        ));

        if slot.targeted && slot.ack_timer.is_none() {
            let delay = self.params.ack_delay(slot.ack_ttl);
            slot.ack_timer = Some(
                self.timers
                    .schedule(now + delay, ReassemblyTimer::Ack(source, seq_zero)),
            );
            tracing::debug!(src = %source, %seq_zero, ?delay, "ack timer started");
        }

        (ReassemblyOutcome::StillAccumulating, acks)
    }

    fn remember_ack(&mut self, now: Instant, source: Address, ack: SegmentAcknowledgment, ttl: u8) {
        self.completed.insert(
            source,
            CompletedAck {
                seq_zero: ack.seq_zero,
                ack,
                ttl,
                last_sent: now,
            },
        );
    }

    fn cancel_slot_timers(&mut self, slot: &Slot) {
        if let Some(id) = slot.discard_timer {
            self.timers.cancel(id);
        }
        if let Some(id) = slot.ack_timer {
            self.timers.cancel(id);
        }
    }

    /// Fire due timers. Returns acks for incomplete messages whose ack
    /// timer expired.
    pub fn poll_timers(&mut self, now: Instant) -> Vec<AckTransmission> {
        let mut acks = Vec::new();
        for timer in self.timers.expired(now) {
            match timer {
                ReassemblyTimer::Discard(source, seq_zero) => {
                    if let Some(slot) = self.slots.remove(&(source, seq_zero)) {
                        if let Some(id) = slot.ack_timer {
                            self.timers.cancel(id);
                        }
                        tracing::warn!(
                            src = %source,
                            %seq_zero,
                            received = format_args!("{:#010x}", slot.received_mask()),
                            "incomplete timeout expired, discarding message"
                        );
                    }
                }
                ReassemblyTimer::Ack(source, seq_zero) => {
                    if let Some(slot) = self.slots.get_mut(&(source, seq_zero)) {
                        slot.ack_timer = None;
                        let ack = SegmentAcknowledgment::for_received(seq_zero, &slot.segments);
                        tracing::debug!(src = %source, %seq_zero, block_ack = ack.block_ack, "ack timer expired");
                        acks.push(AckTransmission {
                            destination: source,
                            ttl: slot.ack_ttl,
                            ack,
                        });
                    }
                }
            }
        }
        acks
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Whether any message from `source` is partially received.
    pub fn is_receiving_from(&self, source: Address) -> bool {
        self.slots.keys().any(|(src, _)| *src == source)
    }

    /// Whether `(source, seq_zero)` is being reassembled or was the last
    /// message acknowledged to `source`.
    pub fn is_active(&self, source: Address, seq_zero: SeqZero) -> bool {
        self.slots.contains_key(&(source, seq_zero))
            || self
                .completed
                .get(&source)
                .is_some_and(|done| done.seq_zero == seq_zero)
    }

    pub fn in_progress(&self) -> usize {
        self.slots.len()
    }

    /// Drop every slot, stored ack and timer.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.completed.clear();
        self.timers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::lower_transport::split;
    use std::time::Duration;

    const PEER: Address = Address(0x0002);
    const US: Address = Address(0x0001);
    const GROUP: Address = Address(0xC001);

    fn meta(destination: Address) -> SegmentMeta {
        SegmentMeta {
            source: PEER,
            destination,
            ttl: 4,
            seq_auth: 1000,
        }
    }

    fn segments(zero: u16, len: usize) -> Vec<Segment> {
        let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
        split(
            SegmentKind::Access {
                aid: Some(1),
                szmic: false,
            },
            SeqZero::new(zero),
            &payload,
        )
        .unwrap()
    }

    #[test]
    fn test_out_of_order_completion() {
        let t0 = Instant::now();
        let mut r = Reassembler::new(SarParameters::default());
        let segs = segments(5, 30);

        let (o, acks) = r.on_segment(t0, meta(US), segs[2].clone(), true);
        assert_eq!(o, ReassemblyOutcome::StillAccumulating);
        assert!(acks.is_empty());
        assert!(r.is_receiving_from(PEER));
        r.on_segment(t0, meta(US), segs[0].clone(), true);
        let (o, acks) = r.on_segment(t0, meta(US), segs[1].clone(), true);

        let ReassemblyOutcome::Completed(message) = o else {
            panic!("expected completion, got {o:?}");
        };
        assert_eq!(message.payload, (0..30).map(|i| i as u8).collect::<Vec<_>>());
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].ack.block_ack, 0b111);
        assert_eq!(acks[0].destination, PEER);
        assert_eq!(acks[0].ttl, 5);
        assert!(!r.is_receiving_from(PEER));
        assert_eq!(r.next_deadline(), None);
    }

    #[test]
    fn test_ack_timer_reports_sparse_segments() {
        let t0 = Instant::now();
        let mut r = Reassembler::new(SarParameters::default());
        let segs = segments(9, 60); // five segments
        for i in [0, 2, 4] {
            r.on_segment(t0, meta(US), segs[i].clone(), true);
        }
        // ack delay = 150 ms + 50 ms * ttl 5
        assert!(r.poll_timers(t0 + Duration::from_millis(399)).is_empty());
        let acks = r.poll_timers(t0 + Duration::from_millis(400));
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].ack.block_ack, 0b10101);
    }

    #[test]
    fn test_duplicate_after_completion_reacks_with_rate_limit() {
        let t0 = Instant::now();
        let mut r = Reassembler::new(SarParameters::default());
        let segs = segments(3, 20);
        r.on_segment(t0, meta(US), segs[0].clone(), true);
        let (_, first) = r.on_segment(t0, meta(US), segs[1].clone(), true);
        assert!(r.is_active(PEER, SeqZero::new(3)));

        let (o, acks) = r.on_segment(t0 + Duration::from_millis(10), meta(US), segs[1].clone(), true);
        assert_eq!(o, ReassemblyOutcome::DuplicateAlreadyAcked);
        assert!(acks.is_empty(), "within the interval no ack is repeated");

        let later = t0 + Duration::from_millis(200);
        let (o, acks) = r.on_segment(later, meta(US), segs[0].clone(), true);
        assert_eq!(o, ReassemblyOutcome::DuplicateAlreadyAcked);
        assert_eq!(acks, first);
        // Nothing is re-emitted as a message.
        assert_eq!(r.in_progress(), 0);
    }

    #[test]
    fn test_new_message_clears_stored_ack() {
        let t0 = Instant::now();
        let mut r = Reassembler::new(SarParameters::default());
        let one = segments(3, 5);
        r.on_segment(t0, meta(US), one[0].clone(), true);
        assert!(r.is_active(PEER, SeqZero::new(3)));
        let two = segments(4, 5);
        let (o, _) = r.on_segment(t0, meta(US), two[0].clone(), true);
        assert!(matches!(o, ReassemblyOutcome::Completed(_)));
        assert!(!r.is_active(PEER, SeqZero::new(3)));
    }

    #[test]
    fn test_single_segment_completes_immediately() {
        let t0 = Instant::now();
        let mut r = Reassembler::new(SarParameters::default());
        let seg = segments(1, 4).remove(0);
        let (o, acks) = r.on_segment(t0, meta(US), seg, true);
        assert!(matches!(o, ReassemblyOutcome::Completed(ref m) if m.payload == vec![0, 1, 2, 3]));
        assert_eq!(acks[0].ack.block_ack, 1);
    }

    #[test]
    fn test_group_destination_never_acked() {
        let t0 = Instant::now();
        let mut r = Reassembler::new(SarParameters::default());
        let segs = segments(7, 24);
        let (_, acks) = r.on_segment(t0, meta(GROUP), segs[0].clone(), false);
        assert!(acks.is_empty());
        assert!(r.poll_timers(t0 + Duration::from_secs(1)).is_empty());
        let (o, acks) = r.on_segment(t0, meta(GROUP), segs[1].clone(), false);
        assert!(matches!(o, ReassemblyOutcome::Completed(_)));
        assert!(acks.is_empty());
        assert!(!r.is_active(PEER, SeqZero::new(7)));
    }

    #[test]
    fn test_incomplete_timeout_discards_and_restarts() {
        let t0 = Instant::now();
        let mut r = Reassembler::new(SarParameters::default());
        let segs = segments(2, 36);
        r.on_segment(t0, meta(US), segs[0].clone(), true);
        let t1 = t0 + Duration::from_secs(6);
        r.on_segment(t1, meta(US), segs[1].clone(), true);

        r.poll_timers(t0 + Duration::from_secs(11));
        assert!(r.is_receiving_from(PEER), "timer restarted by second segment");

        r.poll_timers(t1 + Duration::from_secs(10));
        assert!(!r.is_receiving_from(PEER));
        assert_eq!(r.next_deadline(), None);
    }

    #[test]
    fn test_mismatched_seg_n_is_invalid() {
        let t0 = Instant::now();
        let mut r = Reassembler::new(SarParameters::default());
        let segs = segments(2, 36);
        r.on_segment(t0, meta(US), segs[0].clone(), true);
        let mut odd = segs[1].clone();
        odd.seg_n = 5;
        odd.seg_o = 4;
        let (o, _) = r.on_segment(t0, meta(US), odd, true);
        assert_eq!(o, ReassemblyOutcome::Invalid);
    }

    #[test]
    fn test_same_seq_zero_from_two_sources() {
        let t0 = Instant::now();
        let mut r = Reassembler::new(SarParameters::default());
        let segs = segments(0x1FFF, 24);
        let other = SegmentMeta {
            source: Address(0x0003),
            ..meta(US)
        };
        r.on_segment(t0, meta(US), segs[0].clone(), true);
        r.on_segment(t0, other, segs[0].clone(), true);
        assert_eq!(r.in_progress(), 2);
        let (o, _) = r.on_segment(t0, other, segs[1].clone(), true);
        let ReassemblyOutcome::Completed(message) = o else {
            panic!("expected completion");
        };
        assert_eq!(message.source, Address(0x0003));
        assert!(r.is_receiving_from(PEER));
    }

    #[test]
    fn test_reset_drops_everything() {
        let t0 = Instant::now();
        let mut r = Reassembler::new(SarParameters::default());
        let segs = segments(2, 36);
        r.on_segment(t0, meta(US), segs[0].clone(), true);
        r.reset();
        assert_eq!(r.in_progress(), 0);
        assert_eq!(r.next_deadline(), None);
    }
}
