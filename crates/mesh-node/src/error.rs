//! Error types for the node.

use mesh_core::RemoteProvisioningError;
use mesh_interfaces::BearerError;
use mesh_provisioning::ProvisioningError;
use mesh_transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("bearer error: {0}")]
    Bearer(#[from] BearerError),
    #[error("provisioning error: {0}")]
    Provisioning(#[from] ProvisioningError),
    #[error("device rejected provisioning: {0}")]
    DeviceFailed(RemoteProvisioningError),
    #[error("device and provisioner disagree on the {0}")]
    Mismatch(&'static str),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("timed out {0}")]
    Timeout(&'static str),
    #[error("node shut down")]
    Shutdown,
}
