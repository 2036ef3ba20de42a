//! Segmentation and reassembly.

pub mod params;
pub mod reassembly;
pub mod transmission;

pub use params::SarParameters;
pub use reassembly::{AckTransmission, ReassembledMessage, Reassembler, ReassemblyOutcome, SegmentMeta};
pub use transmission::{OutgoingSegment, SendCompletion, SendRequest, TransmitOutput, Transmitter};
