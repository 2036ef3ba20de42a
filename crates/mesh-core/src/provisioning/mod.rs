//! Provisioning PDUs, device capabilities and OOB authentication methods.

pub mod capabilities;
pub mod oob;
pub mod pdu;

pub use capabilities::{
    Algorithms, InputOobActions, OutputOobActions, ProvisioningCapabilities, PublicKeyType,
    StaticOobType,
};
pub use oob::{AuthenticationMethod, InputAction, OutputAction, PublicKeyMethod};
pub use pdu::{ProvisioningPdu, ProvisioningPduType, RemoteProvisioningError};
