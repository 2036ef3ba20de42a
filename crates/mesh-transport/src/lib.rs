//! Lower Transport layer for Bluetooth Mesh.
//!
//! Segmentation and reassembly with block acknowledgments, retransmission,
//! and replay protection. The layer is sans-IO: every entry point takes the
//! current [`std::time::Instant`] and returns the PDUs to send, so it can be
//! driven by any runtime and tested with synthetic time.

pub mod error;
pub mod layer;
pub mod replay;
pub mod sar;
pub mod timer;

pub use error::TransportError;
pub use layer::{
    IncomingPdu, LowerTransportEvent, LowerTransportLayer, OutgoingMessage, OutgoingPdu,
    ReceivedMessage,
};
pub use replay::{ReplayCache, ReplayVerdict};
pub use sar::SarParameters;
pub use timer::{TimerId, TimerQueue};
