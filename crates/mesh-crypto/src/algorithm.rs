//! Provisioning algorithm identifiers.

use core::fmt;

/// Provisioning algorithm negotiated in the Start PDU.
///
/// Both algorithms use P-256 ECDH and AES-CCM for the data PDU. They differ
/// in the confirmation MAC and therefore in the length of the random,
/// confirmation and Auth Value fields.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Algorithm {
    /// BTM_ECDH_P256_CMAC_AES128_AES_CCM (formerly "FIPS P-256 Elliptic Curve").
    #[default]
    EcdhP256CmacAes128 = 0x00,
    /// BTM_ECDH_P256_HMAC_SHA256_AES_CCM.
    EcdhP256HmacSha256 = 0x01,
}

impl Algorithm {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::EcdhP256CmacAes128),
            0x01 => Some(Self::EcdhP256HmacSha256),
            _ => None,
        }
    }

    /// Bit of this algorithm in the Capabilities `algorithms` field.
    #[must_use]
    pub fn capability_bit(&self) -> u16 {
        1 << (*self as u8)
    }

    /// Length in octets of the random, confirmation and Auth Value fields.
    #[must_use]
    pub fn key_length(&self) -> usize {
        match self {
            Self::EcdhP256CmacAes128 => 16,
            Self::EcdhP256HmacSha256 => 32,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EcdhP256CmacAes128 => write!(f, "BTM_ECDH_P256_CMAC_AES128_AES_CCM"),
            Self::EcdhP256HmacSha256 => write!(f, "BTM_ECDH_P256_HMAC_SHA256_AES_CCM"),
        }
    }
}
