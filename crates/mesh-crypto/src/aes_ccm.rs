//! AES-128-CCM with the 13-octet nonce used throughout Bluetooth Mesh.

extern crate alloc;

use alloc::vec::Vec;

use aes::Aes128;
use ccm::Ccm;
use ccm::aead::consts::{U4, U8, U13};
use ccm::aead::generic_array::GenericArray;
use ccm::aead::{Aead, KeyInit, Payload};

use crate::CryptoError;

type Ccm32 = Ccm<Aes128, U4, U13>;
type Ccm64 = Ccm<Aes128, U8, U13>;

/// Nonce length for all mesh AES-CCM operations.
pub const NONCE_LENGTH: usize = 13;

/// Size of the message integrity check appended to the ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicSize {
    /// 32-bit MIC (TransMIC with SZMIC = 0, NetMIC on access PDUs).
    Bits32,
    /// 64-bit MIC (provisioning data, TransMIC with SZMIC = 1).
    Bits64,
}

impl MicSize {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            MicSize::Bits32 => 4,
            MicSize::Bits64 => 8,
        }
    }
}

/// Encrypt `data` and append the MIC.
pub fn encrypt(
    key: &[u8; 16],
    nonce: &[u8; NONCE_LENGTH],
    data: &[u8],
    aad: &[u8],
    mic: MicSize,
) -> Result<Vec<u8>, CryptoError> {
    let nonce = GenericArray::from_slice(nonce);
    let payload = Payload { msg: data, aad };
    let result = match mic {
        MicSize::Bits32 => Ccm32::new(GenericArray::from_slice(key)).encrypt(nonce, payload),
        MicSize::Bits64 => Ccm64::new(GenericArray::from_slice(key)).encrypt(nonce, payload),
    };
    result.map_err(|_| CryptoError::EncryptionFailed)
}

/// Verify the trailing MIC and decrypt.
pub fn decrypt(
    key: &[u8; 16],
    nonce: &[u8; NONCE_LENGTH],
    data_with_mic: &[u8],
    aad: &[u8],
    mic: MicSize,
) -> Result<Vec<u8>, CryptoError> {
    if data_with_mic.len() < mic.len() {
        return Err(CryptoError::InvalidLength {
            reason: "ciphertext shorter than MIC",
        });
    }
    let nonce = GenericArray::from_slice(nonce);
    let payload = Payload {
        msg: data_with_mic,
        aad,
    };
    let result = match mic {
        MicSize::Bits32 => Ccm32::new(GenericArray::from_slice(key)).decrypt(nonce, payload),
        MicSize::Bits64 => Ccm64::new(GenericArray::from_slice(key)).decrypt(nonce, payload),
    };
    result.map_err(|_| CryptoError::DecryptionFailed)
}
