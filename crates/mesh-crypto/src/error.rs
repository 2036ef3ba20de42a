use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    InvalidKeyLength { expected: usize, actual: usize },
    InvalidPublicKey,
    InvalidPrivateKey,
    KeyGenerationFailed,
    EncryptionFailed,
    DecryptionFailed,
    InvalidLength { reason: &'static str },
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::InvalidKeyLength { expected, actual } => {
                write!(f, "invalid key length: expected {expected}, got {actual}")
            }
            CryptoError::InvalidPublicKey => write!(f, "invalid P-256 public key"),
            CryptoError::InvalidPrivateKey => write!(f, "invalid P-256 private key"),
            CryptoError::KeyGenerationFailed => write!(f, "key pair generation failed"),
            CryptoError::EncryptionFailed => write!(f, "AES-CCM encryption failed"),
            CryptoError::DecryptionFailed => write!(f, "AES-CCM decryption failed"),
            CryptoError::InvalidLength { reason } => write!(f, "invalid length: {reason}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CryptoError {}
