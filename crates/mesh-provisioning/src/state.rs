//! Provisioner states and the events a manager emits.

use std::fmt;

use mesh_core::{ProvisioningCapabilities, ProvisioningPdu};

use crate::auth::AuthAction;
use crate::error::ProvisioningError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProvisioningState {
    #[default]
    Ready,
    RequestingCapabilities,
    CapabilitiesReceived(ProvisioningCapabilities),
    Provisioning,
    Complete,
    Failed(ProvisioningError),
}

impl ProvisioningState {
    pub fn name(&self) -> &'static str {
        match self {
            ProvisioningState::Ready => "ready",
            ProvisioningState::RequestingCapabilities => "requesting_capabilities",
            ProvisioningState::CapabilitiesReceived(_) => "capabilities_received",
            ProvisioningState::Provisioning => "provisioning",
            ProvisioningState::Complete => "complete",
            ProvisioningState::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProvisioningState::Complete | ProvisioningState::Failed(_))
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningState::Failed(err) => write!(f, "failed: {err}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Output of the provisioning manager, drained with `poll_events`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningEvent {
    /// Send this PDU over the bearer.
    Send(ProvisioningPdu),
    StateChanged(ProvisioningState),
    AuthActionRequired(AuthAction),
    /// The user finished entering the OOB value on the device.
    InputComplete,
    /// The bearer closed; the session was discarded.
    BearerReleased,
}
