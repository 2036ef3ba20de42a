//! Transmission of outgoing segmented messages.
//!
//! Each in-flight message is keyed by its SeqZero. Unicast messages are
//! retransmitted until every segment is acknowledged or the retransmission
//! budget runs out. Group and virtual destinations never acknowledge, so
//! those messages are reported delivered at once and sent one extra time
//! after a random delay.

use std::collections::HashMap;
use std::time::Instant;

use mesh_core::constants::MAX_SEGMENTS;
use mesh_core::error::PduError;
use mesh_core::lower_transport::{Segment, SegmentAcknowledgment, SegmentKind, split};
use mesh_core::{Address, SeqZero};
use rand::Rng;

use crate::error::TransportError;
use crate::sar::params::{MULTICAST_RESEND_MAX, MULTICAST_RESEND_MIN, SarParameters};
use crate::timer::{TimerId, TimerQueue};

/// A segmented message to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub destination: Address,
    /// Sequence number allocated to the first segment.
    pub sequence: u32,
    /// `None` uses the default TTL.
    pub ttl: Option<u8>,
    pub kind: SegmentKind,
    pub payload: Vec<u8>,
}

/// A segment the caller must put on the air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingSegment {
    pub destination: Address,
    pub ttl: u8,
    pub segment: Segment,
}

/// Final result of a segmented send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendCompletion {
    pub seq_zero: SeqZero,
    pub destination: Address,
    pub result: Result<(), TransportError>,
}

/// Segments to transmit and sends that finished, produced by one call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransmitOutput {
    pub segments: Vec<OutgoingSegment>,
    pub completions: Vec<SendCompletion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransmitTimer {
    Retransmit(SeqZero),
    MulticastResend(SeqZero),
}

#[derive(Debug)]
struct OutgoingSet {
    destination: Address,
    ttl: u8,
    /// `None` once acknowledged.
    segments: Vec<Option<Segment>>,
    retransmissions_left: u8,
    timer: Option<TimerId>,
}

impl OutgoingSet {
    fn unacked(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().flatten()
    }

    fn outgoing(&self) -> Vec<OutgoingSegment> {
        self.unacked()
            .map(|segment| OutgoingSegment {
                destination: self.destination,
                ttl: self.ttl,
                segment: segment.clone(),
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct Transmitter {
    params: SarParameters,
    sets: HashMap<SeqZero, OutgoingSet>,
    timers: TimerQueue<TransmitTimer>,
}

impl Transmitter {
    pub fn new(params: SarParameters) -> Self {
        Self {
            params: params.clamped(),
            sets: HashMap::new(),
            timers: TimerQueue::new(),
        }
    }

    /// Segment `request` and emit the first transmission.
    pub fn send(
        &mut self,
        now: Instant,
        request: SendRequest,
    ) -> Result<TransmitOutput, TransportError> {
        let seq_zero = SeqZero::from_sequence(request.sequence);
        if self.sets.contains_key(&seq_zero) {
            return Err(TransportError::SequenceZeroInUse(seq_zero.value()));
        }

        let segments = split(request.kind, seq_zero, &request.payload).map_err(|e| match e {
            PduError::Empty => TransportError::EmptyMessage,
            PduError::TooLong { .. } => TransportError::MessageTooLong {
                len: request.payload.len(),
                max: request.kind.max_payload() * MAX_SEGMENTS,
            },
            other => TransportError::Pdu(other),
        })?;

        let ttl = request.ttl.unwrap_or(self.params.default_ttl);
        let destination = request.destination;
        let multicast = destination.is_multicast();

        let mut set = OutgoingSet {
            destination,
            ttl,
            segments: segments.into_iter().map(Some).collect(),
            retransmissions_left: self.params.retransmission_limit,
            timer: None,
        };

        let mut output = TransmitOutput {
            segments: set.outgoing(),
            completions: Vec::new(),
        };

        if multicast {
            let delay = rand::thread_rng().gen_range(MULTICAST_RESEND_MIN..=MULTICAST_RESEND_MAX);
            set.timer = Some(
                self.timers
                    .schedule(now + delay, TransmitTimer::MulticastResend(seq_zero)),
            );
            output.completions.push(SendCompletion {
                seq_zero,
                destination,
                result: Ok(()),
            });
            tracing::debug!(dst = %destination, %seq_zero, ?delay, "multicast segments sent, resend scheduled");
        } else {
            let interval = self.params.retransmit_interval(ttl);
            set.timer = Some(
                self.timers
                    .schedule(now + interval, TransmitTimer::Retransmit(seq_zero)),
            );
            tracing::debug!(
                dst = %destination,
                %seq_zero,
                segments = set.segments.len(),
                ?interval,
                "segmented message sent"
            );
        }

        self.sets.insert(seq_zero, set);
        Ok(output)
    }

    /// Handle a Segment Acknowledgment received from `source`.
    pub fn on_ack(
        &mut self,
        now: Instant,
        source: Address,
        ack: &SegmentAcknowledgment,
    ) -> TransmitOutput {
        let mut output = TransmitOutput::default();
        let seq_zero = ack.seq_zero;

        let Some(set) = self.sets.get_mut(&seq_zero) else {
            tracing::debug!(src = %source, %seq_zero, "ack for unknown message");
            return output;
        };
        if set.destination.is_multicast() {
            return output;
        }
        if source != set.destination && !ack.on_behalf_of {
            tracing::warn!(src = %source, dst = %set.destination, %seq_zero, "ack from unexpected source ignored");
            return output;
        }

        if ack.is_busy() {
            tracing::warn!(dst = %set.destination, %seq_zero, "receiver busy, cancelling message");
            self.finish(seq_zero, Err(TransportError::Busy), &mut output);
            return output;
        }

        let mut progress = false;
        for (offset, slot) in set.segments.iter_mut().enumerate() {
            if slot.is_some() && ack.is_acknowledged(offset as u8) {
                *slot = None;
                progress = true;
            }
        }

        if set.unacked().next().is_none() {
            tracing::info!(dst = %set.destination, %seq_zero, "segmented message delivered");
            self.finish(seq_zero, Ok(()), &mut output);
            return output;
        }

        // A repeated ack still asks for the missing segments, but costs a
        // retransmission.
        if !progress {
            if set.retransmissions_left == 0 {
                tracing::warn!(dst = %set.destination, %seq_zero, "segmented message timed out");
                self.finish(seq_zero, Err(TransportError::Timeout), &mut output);
                return output;
            }
            set.retransmissions_left -= 1;
        }

        // Resend the rest right away and restart the retransmission timer.
        if let Some(id) = set.timer.take() {
            self.timers.cancel(id);
        }
        let interval = self.params.retransmit_interval(set.ttl);
        set.timer = Some(
            self.timers
                .schedule(now + interval, TransmitTimer::Retransmit(seq_zero)),
        );
        output.segments = set.outgoing();
        tracing::debug!(%seq_zero, remaining = output.segments.len(), "partial ack, resending");
        output
    }

    fn finish(
        &mut self,
        seq_zero: SeqZero,
        result: Result<(), TransportError>,
        output: &mut TransmitOutput,
    ) {
        if let Some(set) = self.sets.remove(&seq_zero) {
            if let Some(id) = set.timer {
                self.timers.cancel(id);
            }
            output.completions.push(SendCompletion {
                seq_zero,
                destination: set.destination,
                result,
            });
        }
    }

    /// Fire due retransmission timers.
    pub fn poll_timers(&mut self, now: Instant) -> TransmitOutput {
        let mut output = TransmitOutput::default();
        for timer in self.timers.expired(now) {
            match timer {
                TransmitTimer::Retransmit(seq_zero) => {
                    let Some(set) = self.sets.get_mut(&seq_zero) else {
                        continue;
                    };
                    set.timer = None;
                    if set.retransmissions_left == 0 {
                        tracing::warn!(dst = %set.destination, %seq_zero, "segmented message timed out");
                        self.finish(seq_zero, Err(TransportError::Timeout), &mut output);
                        continue;
                    }
                    set.retransmissions_left -= 1;
                    let interval = self.params.retransmit_interval(set.ttl);
                    set.timer = Some(
                        self.timers
                            .schedule(now + interval, TransmitTimer::Retransmit(seq_zero)),
                    );
                    let segments = set.outgoing();
                    tracing::debug!(
                        %seq_zero,
                        segments = segments.len(),
                        left = set.retransmissions_left,
                        "retransmitting unacknowledged segments"
                    );
                    output.segments.extend(segments);
                }
                TransmitTimer::MulticastResend(seq_zero) => {
                    if let Some(set) = self.sets.remove(&seq_zero) {
                        tracing::debug!(dst = %set.destination, %seq_zero, "multicast resend");
                        output.segments.extend(set.outgoing());
                    }
                }
            }
        }
        output
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Drop the message silently.
    pub fn cancel(&mut self, seq_zero: SeqZero) -> bool {
        match self.sets.remove(&seq_zero) {
            Some(set) => {
                if let Some(id) = set.timer {
                    self.timers.cancel(id);
                }
                true
            }
            None => false,
        }
    }

    /// Drop every message. Unicast sends report `Cancelled`; multicast sends
    /// were already reported delivered.
    pub fn reset(&mut self) -> Vec<SendCompletion> {
        let completions = self
            .sets
            .drain()
            .filter(|(_, set)| !set.destination.is_multicast())
            .map(|(seq_zero, set)| SendCompletion {
                seq_zero,
                destination: set.destination,
                result: Err(TransportError::Cancelled),
            })
            .collect();
        self.timers.clear();
        completions
    }

    pub fn is_sending(&self, seq_zero: SeqZero) -> bool {
        self.sets.contains_key(&seq_zero)
    }

    pub fn in_flight(&self) -> usize {
        self.sets.len()
    }
}
