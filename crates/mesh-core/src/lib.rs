//! Core types, constants, and wire formats for the Bluetooth Mesh stack.
//!
//! This crate defines addresses and the network model, the Lower Transport
//! segment and acknowledgment formats, SeqAuth arithmetic, and the
//! provisioning PDUs exchanged during device provisioning.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod address;
pub mod constants;
pub mod error;
pub mod lower_transport;
pub mod network;
pub mod provisioning;
pub mod sequence;

pub use address::{Address, AddressRange};
pub use error::{InvalidLength, PduError};
pub use lower_transport::{
    LowerTransportPdu, Segment, SegmentAcknowledgment, SegmentKind, UnsegmentedMessage,
};
pub use mesh_crypto::Algorithm;
pub use network::{IvIndex, KeyRefreshPhase, MeshNetwork, NetworkKey, Node, Security};
pub use provisioning::{
    AuthenticationMethod, InputAction, OutputAction, ProvisioningCapabilities, ProvisioningPdu,
    ProvisioningPduType, RemoteProvisioningError,
};
pub use sequence::SeqZero;
