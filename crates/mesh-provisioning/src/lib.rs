//! Provisioning state machines for the Bluetooth Mesh stack.
//!
//! [`ProvisioningManager`] drives a device from Invite to Complete on the
//! provisioner side; [`ProvisioningDevice`] is the matching responder.
//! Both are sans-IO: feed received PDUs in, drain events out.

pub mod auth;
pub mod data;
pub mod device;
pub mod error;
pub mod manager;
pub mod state;

pub use auth::AuthAction;
pub use data::{ProvisioningData, ProvisioningDataPayload, Role};
pub use device::{DeviceEvent, DeviceState, OobValue, ProvisioningDevice};
pub use error::ProvisioningError;
pub use manager::{DevicePublicKey, ProvisioningManager};
pub use state::{ProvisioningEvent, ProvisioningState};
