//! Segmentation and reassembly timing parameters.

use std::time::Duration;

use mesh_core::constants::DEFAULT_TTL;

pub const MIN_INCOMPLETE_TIMEOUT: Duration = Duration::from_secs(10);
pub const MIN_ACK_TIMER_BASE: Duration = Duration::from_millis(150);
pub const MIN_RETRANSMIT_BASE: Duration = Duration::from_millis(200);
pub const MIN_RETRANSMISSION_LIMIT: u8 = 2;
pub const PER_HOP_DELAY: Duration = Duration::from_millis(50);

/// Delay window before the single extra transmission of a group message.
pub const MULTICAST_RESEND_MIN: Duration = Duration::from_millis(500);
pub const MULTICAST_RESEND_MAX: Duration = Duration::from_millis(1500);

/// Timing knobs for both directions of SAR.
///
/// Values below the protocol floors are raised to the floor when read
/// through [`SarParameters::clamped`]; engines only ever see clamped values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SarParameters {
    /// How long an incomplete message is kept after its last segment.
    pub incomplete_timeout: Duration,
    pub ack_timer_base: Duration,
    pub ack_per_hop: Duration,
    pub retransmit_base: Duration,
    pub retransmit_per_hop: Duration,
    /// Retransmission rounds after the initial transmission.
    pub retransmission_limit: u8,
    /// Minimum spacing of repeated acks for an already completed message.
    pub completed_ack_interval: Duration,
    pub default_ttl: u8,
}

impl Default for SarParameters {
    fn default() -> Self {
        Self {
            incomplete_timeout: MIN_INCOMPLETE_TIMEOUT,
            ack_timer_base: MIN_ACK_TIMER_BASE,
            ack_per_hop: PER_HOP_DELAY,
            retransmit_base: MIN_RETRANSMIT_BASE,
            retransmit_per_hop: PER_HOP_DELAY,
            retransmission_limit: 5,
            completed_ack_interval: Duration::from_millis(150),
            default_ttl: DEFAULT_TTL,
        }
    }
}

impl SarParameters {
    pub fn clamped(self) -> Self {
        Self {
            incomplete_timeout: self.incomplete_timeout.max(MIN_INCOMPLETE_TIMEOUT),
            ack_timer_base: self.ack_timer_base.max(MIN_ACK_TIMER_BASE),
            retransmit_base: self.retransmit_base.max(MIN_RETRANSMIT_BASE),
            retransmission_limit: self.retransmission_limit.max(MIN_RETRANSMISSION_LIMIT),
            ..self
        }
    }

    /// Delay before acknowledging an incomplete message received with `ttl`.
    pub fn ack_delay(&self, ttl: u8) -> Duration {
        self.ack_timer_base + self.ack_per_hop * u32::from(ttl)
    }

    /// Delay between retransmission rounds of a message sent with `ttl`.
    pub fn retransmit_interval(&self, ttl: u8) -> Duration {
        self.retransmit_base + self.retransmit_per_hop * u32::from(ttl)
    }
}
