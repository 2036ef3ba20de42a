//! Bearers for the Bluetooth Mesh stack.
//!
//! A bearer carries provisioning, network, beacon and proxy configuration
//! PDUs to a peer. This crate defines the [`Bearer`] trait, the proxy
//! protocol SAR framing used on MTU-limited links, and an in-memory
//! [`LoopbackBearer`] pair used by the node's demo and tests.

pub mod error;
pub mod framing;
pub mod loopback;
pub mod testing;
pub mod traits;

pub use error::BearerError;
pub use framing::{ProxyReassembler, segment};
pub use loopback::LoopbackBearer;
pub use traits::{Bearer, BearerEvent, DEFAULT_MTU, PduType, PduTypes};
