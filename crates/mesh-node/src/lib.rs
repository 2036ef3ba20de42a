//! Bluetooth Mesh provisioner node.
//!
//! Loads configuration, drives the sans-IO provisioning and Lower Transport
//! engines on tokio, and wires them to bearers and an in-memory network.

pub mod config;
pub mod demo;
pub mod device;
pub mod error;
pub mod logging;
pub mod network;
pub mod provisioner;
pub mod shutdown;
pub mod transport;

pub use config::NodeConfig;
pub use demo::{DemoOptions, DemoReport, run_demo};
pub use device::{DeviceOob, run_device};
pub use error::NodeError;
pub use network::{LocalNetwork, Loss, SequenceNumber};
pub use provisioner::{Provisioner, ProvisioningOptions};
pub use shutdown::{Shutdown, ShutdownHandle};
pub use transport::{TransportChannels, TransportService};
