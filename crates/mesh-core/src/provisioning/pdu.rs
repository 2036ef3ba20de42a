//! Provisioning PDUs.
//!
//! Each PDU is a type octet followed by type-specific parameters. The
//! parameters (without the type octet) of Invite, Capabilities, Start and
//! both Public Key PDUs form the confirmation inputs.

use alloc::vec::Vec;
use core::fmt;

use mesh_crypto::Algorithm;

use crate::constants::{ENCRYPTED_PROVISIONING_DATA_SIZE, PUBLIC_KEY_SIZE, START_SIZE};
use crate::error::PduError;
use crate::provisioning::capabilities::ProvisioningCapabilities;
use crate::provisioning::oob::{AuthenticationMethod, PublicKeyMethod};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProvisioningPduType {
    Invite = 0x00,
    Capabilities = 0x01,
    Start = 0x02,
    PublicKey = 0x03,
    InputComplete = 0x04,
    Confirmation = 0x05,
    Random = 0x06,
    Data = 0x07,
    Complete = 0x08,
    Failed = 0x09,
}

impl ProvisioningPduType {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Invite),
            0x01 => Some(Self::Capabilities),
            0x02 => Some(Self::Start),
            0x03 => Some(Self::PublicKey),
            0x04 => Some(Self::InputComplete),
            0x05 => Some(Self::Confirmation),
            0x06 => Some(Self::Random),
            0x07 => Some(Self::Data),
            0x08 => Some(Self::Complete),
            0x09 => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Error code carried by a Provisioning Failed PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RemoteProvisioningError {
    InvalidPdu = 0x01,
    InvalidFormat = 0x02,
    UnexpectedPdu = 0x03,
    ConfirmationFailed = 0x04,
    OutOfResources = 0x05,
    DecryptionFailed = 0x06,
    UnexpectedError = 0x07,
    CannotAssignAddresses = 0x08,
    InvalidData = 0x09,
}

impl RemoteProvisioningError {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::InvalidPdu),
            0x02 => Some(Self::InvalidFormat),
            0x03 => Some(Self::UnexpectedPdu),
            0x04 => Some(Self::ConfirmationFailed),
            0x05 => Some(Self::OutOfResources),
            0x06 => Some(Self::DecryptionFailed),
            0x07 => Some(Self::UnexpectedError),
            0x08 => Some(Self::CannotAssignAddresses),
            0x09 => Some(Self::InvalidData),
            _ => None,
        }
    }
}

impl fmt::Display for RemoteProvisioningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::InvalidPdu => "invalid PDU",
            Self::InvalidFormat => "invalid format",
            Self::UnexpectedPdu => "unexpected PDU",
            Self::ConfirmationFailed => "confirmation failed",
            Self::OutOfResources => "out of resources",
            Self::DecryptionFailed => "decryption failed",
            Self::UnexpectedError => "unexpected error",
            Self::CannotAssignAddresses => "cannot assign addresses",
            Self::InvalidData => "invalid data",
        };
        f.write_str(text)
    }
}

/// A decoded provisioning PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningPdu {
    Invite {
        attention_timer: u8,
    },
    Capabilities(ProvisioningCapabilities),
    Start {
        algorithm: Algorithm,
        public_key: PublicKeyMethod,
        auth_method: AuthenticationMethod,
    },
    PublicKey {
        key: [u8; PUBLIC_KEY_SIZE],
    },
    InputComplete,
    /// 16 octets for the CMAC algorithm, 32 for HMAC.
    Confirmation(Vec<u8>),
    Random(Vec<u8>),
    /// Encrypted provisioning data followed by the 8-octet MIC.
    Data(Vec<u8>),
    Complete,
    Failed(RemoteProvisioningError),
}

fn expect_len(params: &[u8], expected: usize) -> Result<(), PduError> {
    if params.len() == expected {
        Ok(())
    } else {
        Err(PduError::InvalidLength {
            expected,
            actual: params.len(),
        })
    }
}

impl ProvisioningPdu {
    pub fn pdu_type(&self) -> ProvisioningPduType {
        match self {
            Self::Invite { .. } => ProvisioningPduType::Invite,
            Self::Capabilities(_) => ProvisioningPduType::Capabilities,
            Self::Start { .. } => ProvisioningPduType::Start,
            Self::PublicKey { .. } => ProvisioningPduType::PublicKey,
            Self::InputComplete => ProvisioningPduType::InputComplete,
            Self::Confirmation(_) => ProvisioningPduType::Confirmation,
            Self::Random(_) => ProvisioningPduType::Random,
            Self::Data(_) => ProvisioningPduType::Data,
            Self::Complete => ProvisioningPduType::Complete,
            Self::Failed(_) => ProvisioningPduType::Failed,
        }
    }

    /// Decode a PDU.
    ///
    /// An unrecognised type octet yields [`PduError::UnknownPduType`];
    /// every other error means a known PDU with bad parameters.
    pub fn decode(raw: &[u8]) -> Result<Self, PduError> {
        let (&type_byte, params) = raw.split_first().ok_or(PduError::Empty)?;
        let pdu_type =
            ProvisioningPduType::from_u8(type_byte).ok_or(PduError::UnknownPduType(type_byte))?;

        match pdu_type {
            ProvisioningPduType::Invite => {
                expect_len(params, 1)?;
                Ok(Self::Invite {
                    attention_timer: params[0],
                })
            }
            ProvisioningPduType::Capabilities => {
                ProvisioningCapabilities::decode(params).map(Self::Capabilities)
            }
            ProvisioningPduType::Start => {
                expect_len(params, START_SIZE)?;
                let algorithm = Algorithm::from_u8(params[0]).ok_or(PduError::InvalidValue {
                    field: "algorithm",
                    value: params[0],
                })?;
                let public_key =
                    PublicKeyMethod::from_u8(params[1]).ok_or(PduError::InvalidValue {
                        field: "public key method",
                        value: params[1],
                    })?;
                let auth_method =
                    AuthenticationMethod::from_bytes([params[2], params[3], params[4]])?;
                Ok(Self::Start {
                    algorithm,
                    public_key,
                    auth_method,
                })
            }
            ProvisioningPduType::PublicKey => {
                expect_len(params, PUBLIC_KEY_SIZE)?;
                let mut key = [0u8; PUBLIC_KEY_SIZE];
                key.copy_from_slice(params);
                Ok(Self::PublicKey { key })
            }
            ProvisioningPduType::InputComplete => {
                expect_len(params, 0)?;
                Ok(Self::InputComplete)
            }
            ProvisioningPduType::Confirmation | ProvisioningPduType::Random => {
                if params.len() != 16 && params.len() != 32 {
                    return Err(PduError::InvalidLength {
                        expected: 16,
                        actual: params.len(),
                    });
                }
                if pdu_type == ProvisioningPduType::Confirmation {
                    Ok(Self::Confirmation(params.to_vec()))
                } else {
                    Ok(Self::Random(params.to_vec()))
                }
            }
            ProvisioningPduType::Data => {
                expect_len(params, ENCRYPTED_PROVISIONING_DATA_SIZE)?;
                Ok(Self::Data(params.to_vec()))
            }
            ProvisioningPduType::Complete => {
                expect_len(params, 0)?;
                Ok(Self::Complete)
            }
            ProvisioningPduType::Failed => {
                expect_len(params, 1)?;
                RemoteProvisioningError::from_u8(params[0])
                    .map(Self::Failed)
                    .ok_or(PduError::InvalidValue {
                        field: "error code",
                        value: params[0],
                    })
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + PUBLIC_KEY_SIZE);
        out.push(self.pdu_type() as u8);
        match self {
            Self::Invite { attention_timer } => out.push(*attention_timer),
            Self::Capabilities(caps) => out.extend_from_slice(&caps.encode()),
            Self::Start {
                algorithm,
                public_key,
                auth_method,
            } => {
                out.push(*algorithm as u8);
                out.push(*public_key as u8);
                out.extend_from_slice(&auth_method.to_bytes());
            }
            Self::PublicKey { key } => out.extend_from_slice(key),
            Self::Confirmation(value) | Self::Random(value) | Self::Data(value) => {
                out.extend_from_slice(value)
            }
            Self::Failed(code) => out.push(*code as u8),
            Self::InputComplete | Self::Complete => {}
        }
        out
    }

    /// Parameters without the type octet.
    pub fn parameters(&self) -> Vec<u8> {
        let mut encoded = self.encode();
        encoded.remove(0);
        encoded
    }
}
