//! The crypto seam consumed by the provisioning state machine.
//!
//! [`CryptoProvider`] bundles every cryptographic operation provisioning
//! needs. [`MeshCrypto`] implements it with the primitives in this crate;
//! callers that hold keys in a secure element can substitute their own.

use alloc::vec::Vec;
use core::fmt;

use rand::RngCore;

use crate::aes_ccm::{self, MicSize, NONCE_LENGTH};
use crate::aes_cmac::{aes_cmac, k1, s1};
use crate::algorithm::Algorithm;
use crate::hmac::{hmac_sha256, k5, s2};
use crate::p256::{P256PrivateKey, P256PublicKey, PUBLIC_KEY_LENGTH};
use crate::CryptoError;

/// An ephemeral provisioning key pair.
pub struct KeyPair {
    pub private_key: P256PrivateKey,
    pub public_key: [u8; PUBLIC_KEY_LENGTH],
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair").finish_non_exhaustive()
    }
}

/// ECDH shared secret (32 octets).
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.fill(0);
    }
}

/// Keys derived once both randoms are known.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub session_key: [u8; 16],
    /// The 13 least significant octets of `k1(.., "prsn")`.
    pub session_nonce: [u8; NONCE_LENGTH],
    pub device_key: [u8; 16],
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

impl Drop for SessionKeys {
    fn drop(&mut self) {
        self.session_key.fill(0);
        self.session_nonce.fill(0);
        self.device_key.fill(0);
    }
}

/// Cryptographic operations used during provisioning.
pub trait CryptoProvider: Send + Sync {
    /// Generate an ephemeral key pair for `algorithm`.
    fn generate_key_pair(&self, algorithm: Algorithm) -> Result<KeyPair, CryptoError>;

    /// ECDH between our private key and the peer's raw public key.
    fn shared_secret(
        &self,
        private_key: &P256PrivateKey,
        peer_public_key: &[u8; PUBLIC_KEY_LENGTH],
    ) -> Result<SharedSecret, CryptoError>;

    /// Confirmation value over `random` and `auth_value`, keyed from the
    /// confirmation inputs and the shared secret.
    fn confirmation(
        &self,
        algorithm: Algorithm,
        confirmation_inputs: &[u8],
        secret: &SharedSecret,
        random: &[u8],
        auth_value: &[u8],
    ) -> Vec<u8>;

    /// Session key, session nonce and device key.
    fn session_keys(
        &self,
        algorithm: Algorithm,
        confirmation_inputs: &[u8],
        secret: &SharedSecret,
        provisioner_random: &[u8],
        device_random: &[u8],
    ) -> SessionKeys;

    /// Encrypt the 25-octet provisioning data and append an 8-octet MIC.
    fn encrypt_provisioning_data(
        &self,
        keys: &SessionKeys,
        data: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Inverse of [`CryptoProvider::encrypt_provisioning_data`].
    fn decrypt_provisioning_data(
        &self,
        keys: &SessionKeys,
        data_with_mic: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Fill `buf` from a cryptographically secure source.
    fn random_bytes(&self, buf: &mut [u8]);
}

/// Default provider backed by RustCrypto primitives.
#[derive(Debug, Default, Clone, Copy)]
pub struct MeshCrypto;

impl MeshCrypto {
    pub fn new() -> Self {
        Self
    }
}

fn confirmation_salt(algorithm: Algorithm, inputs: &[u8]) -> Vec<u8> {
    match algorithm {
        Algorithm::EcdhP256CmacAes128 => s1(inputs).to_vec(),
        Algorithm::EcdhP256HmacSha256 => s2(inputs).to_vec(),
    }
}

impl CryptoProvider for MeshCrypto {
    fn generate_key_pair(&self, _algorithm: Algorithm) -> Result<KeyPair, CryptoError> {
        // Both algorithms share the P-256 curve.
        let private_key = P256PrivateKey::generate();
        let public_key = private_key.public_key().to_bytes();
        Ok(KeyPair {
            private_key,
            public_key,
        })
    }

    fn shared_secret(
        &self,
        private_key: &P256PrivateKey,
        peer_public_key: &[u8; PUBLIC_KEY_LENGTH],
    ) -> Result<SharedSecret, CryptoError> {
        let peer = P256PublicKey::from_bytes(peer_public_key)?;
        Ok(SharedSecret(private_key.diffie_hellman(&peer)))
    }

    fn confirmation(
        &self,
        algorithm: Algorithm,
        confirmation_inputs: &[u8],
        secret: &SharedSecret,
        random: &[u8],
        auth_value: &[u8],
    ) -> Vec<u8> {
        match algorithm {
            Algorithm::EcdhP256CmacAes128 => {
                let salt = s1(confirmation_inputs);
                let key = k1(secret.as_bytes(), &salt, b"prck");
                let mut data = Vec::with_capacity(random.len() + auth_value.len());
                data.extend_from_slice(random);
                data.extend_from_slice(auth_value);
                aes_cmac(&key, &data).to_vec()
            }
            Algorithm::EcdhP256HmacSha256 => {
                let salt = s2(confirmation_inputs);
                let mut n = Vec::with_capacity(32 + auth_value.len());
                n.extend_from_slice(secret.as_bytes());
                n.extend_from_slice(auth_value);
                let key = k5(&n, &salt, b"prck256");
                hmac_sha256(&key, random).to_vec()
            }
        }
    }

    fn session_keys(
        &self,
        algorithm: Algorithm,
        confirmation_inputs: &[u8],
        secret: &SharedSecret,
        provisioner_random: &[u8],
        device_random: &[u8],
    ) -> SessionKeys {
        let mut salt_input = confirmation_salt(algorithm, confirmation_inputs);
        salt_input.extend_from_slice(provisioner_random);
        salt_input.extend_from_slice(device_random);
        let provisioning_salt = s1(&salt_input);

        let session_key = k1(secret.as_bytes(), &provisioning_salt, b"prsk");
        let nonce = k1(secret.as_bytes(), &provisioning_salt, b"prsn");
        let device_key = k1(secret.as_bytes(), &provisioning_salt, b"prdk");

        let mut session_nonce = [0u8; NONCE_LENGTH];
        session_nonce.copy_from_slice(&nonce[16 - NONCE_LENGTH..]);

        SessionKeys {
            session_key,
            session_nonce,
            device_key,
        }
    }

    fn encrypt_provisioning_data(
        &self,
        keys: &SessionKeys,
        data: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        aes_ccm::encrypt(
            &keys.session_key,
            &keys.session_nonce,
            data,
            &[],
            MicSize::Bits64,
        )
    }

    fn decrypt_provisioning_data(
        &self,
        keys: &SessionKeys,
        data_with_mic: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        aes_ccm::decrypt(
            &keys.session_key,
            &keys.session_nonce,
            data_with_mic,
            &[],
            MicSize::Bits64,
        )
    }

    fn random_bytes(&self, buf: &mut [u8]) {
        rand::rngs::OsRng.fill_bytes(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(crypto: &MeshCrypto) -> (SharedSecret, SharedSecret) {
        let a = crypto
            .generate_key_pair(Algorithm::EcdhP256CmacAes128)
            .unwrap();
        let b = crypto
            .generate_key_pair(Algorithm::EcdhP256CmacAes128)
            .unwrap();
        let ab = crypto.shared_secret(&a.private_key, &b.public_key).unwrap();
        let ba = crypto.shared_secret(&b.private_key, &a.public_key).unwrap();
        (ab, ba)
    }

    #[test]
    fn test_shared_secret_symmetric() {
        let (ab, ba) = exchange(&MeshCrypto);
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_shared_secret_rejects_garbage_key() {
        let crypto = MeshCrypto;
        let pair = crypto
            .generate_key_pair(Algorithm::EcdhP256CmacAes128)
            .unwrap();
        assert_eq!(
            crypto.shared_secret(&pair.private_key, &[0xFF; 64]),
            Err(CryptoError::InvalidPublicKey)
        );
    }

    #[test]
    fn test_confirmation_lengths_follow_algorithm() {
        let crypto = MeshCrypto;
        let (secret, _) = exchange(&crypto);
        let cmac = crypto.confirmation(
            Algorithm::EcdhP256CmacAes128,
            b"inputs",
            &secret,
            &[1; 16],
            &[0; 16],
        );
        let hmac = crypto.confirmation(
            Algorithm::EcdhP256HmacSha256,
            b"inputs",
            &secret,
            &[1; 32],
            &[0; 32],
        );
        assert_eq!(cmac.len(), 16);
        assert_eq!(hmac.len(), 32);
    }

    #[test]
    fn test_confirmation_binds_auth_value() {
        let crypto = MeshCrypto;
        let (secret, _) = exchange(&crypto);
        let alg = Algorithm::EcdhP256CmacAes128;
        let a = crypto.confirmation(alg, b"in", &secret, &[1; 16], &[0; 16]);
        let mut auth = [0u8; 16];
        auth[15] = 1;
        let b = crypto.confirmation(alg, b"in", &secret, &[1; 16], &auth);
        assert_ne!(a, b);
    }

    #[test]
    fn test_session_keys_agree_and_data_roundtrips() {
        let crypto = MeshCrypto;
        let (ab, ba) = exchange(&crypto);
        let alg = Algorithm::EcdhP256CmacAes128;
        let k_prov = crypto.session_keys(alg, b"inputs", &ab, &[1; 16], &[2; 16]);
        let k_dev = crypto.session_keys(alg, b"inputs", &ba, &[1; 16], &[2; 16]);
        assert_eq!(k_prov, k_dev);

        let data = [0x42u8; 25];
        let ct = crypto.encrypt_provisioning_data(&k_prov, &data).unwrap();
        assert_eq!(ct.len(), 33);
        assert_eq!(crypto.decrypt_provisioning_data(&k_dev, &ct).unwrap(), data);
    }

    #[test]
    fn test_session_nonce_is_low_13_octets() {
        let crypto = MeshCrypto;
        let secret = SharedSecret::new([9; 32]);
        let alg = Algorithm::EcdhP256CmacAes128;
        let keys = crypto.session_keys(alg, b"x", &secret, &[1; 16], &[2; 16]);

        let mut salt_input = s1(b"x").to_vec();
        salt_input.extend_from_slice(&[1; 16]);
        salt_input.extend_from_slice(&[2; 16]);
        let full = k1(&[9; 32], &s1(&salt_input), b"prsn");
        assert_eq!(keys.session_nonce, full[3..]);
    }

    #[test]
    fn test_random_bytes_not_all_zero() {
        let mut buf = [0u8; 32];
        MeshCrypto.random_bytes(&mut buf);
        assert_ne!(buf, [0u8; 32]);
    }

    #[test]
    fn test_debug_redacts_key_material() {
        let secret = SharedSecret::new([0xAB; 32]);
        let dbg = format!("{secret:?}");
        assert!(!dbg.contains("ab"), "debug output leaked key bytes: {dbg}");
    }
}
