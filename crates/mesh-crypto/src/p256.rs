//! P-256 Elliptic Curve Diffie-Hellman.
//!
//! Provides [`P256PrivateKey`] and [`P256PublicKey`] newtypes wrapping the
//! `p256` primitives. Public keys travel on the provisioning bearer as the
//! raw 64-octet `X || Y` concatenation, without the SEC1 `0x04` prefix.

use core::fmt;

use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};

use crate::CryptoError;

/// Length of a raw public key on the wire.
pub const PUBLIC_KEY_LENGTH: usize = 64;

/// A P-256 private scalar.
pub struct P256PrivateKey(SecretKey);

impl P256PrivateKey {
    /// Generate a random private key using the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        Self(SecretKey::random(&mut rand::rngs::OsRng))
    }

    /// Create a private key from its 32-octet big-endian scalar.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        SecretKey::from_slice(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidPrivateKey)
    }

    #[must_use]
    pub fn public_key(&self) -> P256PublicKey {
        P256PublicKey(self.0.public_key())
    }

    /// ECDH with the peer's public key, returning the X coordinate of the
    /// shared point.
    #[must_use]
    pub fn diffie_hellman(&self, peer: &P256PublicKey) -> [u8; 32] {
        let shared = p256::ecdh::diffie_hellman(self.0.to_nonzero_scalar(), peer.0.as_affine());
        (*shared.raw_secret_bytes()).into()
    }
}

impl fmt::Debug for P256PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("P256PrivateKey(..)")
    }
}

/// A P-256 public point.
#[derive(Clone, PartialEq, Eq)]
pub struct P256PublicKey(PublicKey);

impl P256PublicKey {
    /// Parse a raw `X || Y` public key. Points not on the curve are rejected.
    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_LENGTH]) -> Result<Self, CryptoError> {
        let mut sec1 = [0u8; PUBLIC_KEY_LENGTH + 1];
        sec1[0] = 0x04;
        sec1[1..].copy_from_slice(bytes);
        PublicKey::from_sec1_bytes(&sec1)
            .map(Self)
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    /// Raw `X || Y` encoding.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        let point = self.0.to_encoded_point(false);
        let mut out = [0u8; PUBLIC_KEY_LENGTH];
        out.copy_from_slice(&point.as_bytes()[1..]);
        out
    }
}

impl fmt::Debug for P256PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes();
        write!(f, "P256PublicKey(")?;
        for b in &bytes[..4] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..)")
    }
}
