//! Provisioning error types.
//!
//! Every error moves the session to `Failed`; none of them is recoverable
//! without starting over with a new Invite.

use mesh_core::{PduError, RemoteProvisioningError};
use mesh_crypto::CryptoError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvisioningError {
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("invalid PDU: {0}")]
    InvalidPdu(PduError),

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("algorithm not supported by the device")]
    UnsupportedAlgorithm,

    #[error("device not supported")]
    UnsupportedDevice,

    #[error("invalid OOB value format")]
    InvalidOobValueFormat,

    #[error("no unicast address available")]
    NoAddressAvailable,

    #[error("unicast address not specified")]
    AddressNotSpecified,

    #[error("network key not specified")]
    NetworkKeyNotSpecified,

    #[error("confirmation failed")]
    ConfirmationFailed,

    #[error("remote error: {0}")]
    RemoteError(RemoteProvisioningError),

    #[error("key generation failed: {0}")]
    KeyGenerationFailed(CryptoError),

    #[error("provisioning data could not be decrypted")]
    DecryptionFailed,

    #[error("bearer closed")]
    BearerClosed,
}

impl From<PduError> for ProvisioningError {
    fn from(err: PduError) -> Self {
        ProvisioningError::InvalidPdu(err)
    }
}

impl ProvisioningError {
    /// Error code a device reports for this failure in a Failed PDU.
    pub fn remote_code(&self) -> RemoteProvisioningError {
        match self {
            ProvisioningError::InvalidPdu(_) => RemoteProvisioningError::InvalidFormat,
            ProvisioningError::InvalidState(_) => RemoteProvisioningError::UnexpectedPdu,
            ProvisioningError::ConfirmationFailed => RemoteProvisioningError::ConfirmationFailed,
            ProvisioningError::DecryptionFailed => RemoteProvisioningError::DecryptionFailed,
            ProvisioningError::KeyGenerationFailed(_) => RemoteProvisioningError::OutOfResources,
            ProvisioningError::RemoteError(code) => *code,
            _ => RemoteProvisioningError::UnexpectedError,
        }
    }
}
