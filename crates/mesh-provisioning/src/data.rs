//! Session state shared by both ends of a provisioning exchange.
//!
//! [`ProvisioningData`] accumulates the confirmation inputs, holds the
//! ephemeral key pair, shared secret, randoms and confirmations, and derives
//! the session keys. Key material is zeroed on drop and never printed.

use std::fmt;

use mesh_core::constants::{
    ENCRYPTED_PROVISIONING_DATA_SIZE, NETWORK_KEY_SIZE, PROVISIONING_DATA_SIZE, PUBLIC_KEY_SIZE,
};
use mesh_core::{Address, Algorithm, PduError};
use mesh_crypto::{CryptoProvider, KeyPair, SessionKeys, SharedSecret};

use crate::error::ProvisioningError;

/// Which end of the exchange this session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Provisioner,
    Device,
}

/// Plaintext of the Provisioning Data PDU.
#[derive(Clone, PartialEq, Eq)]
pub struct ProvisioningDataPayload {
    pub network_key: [u8; NETWORK_KEY_SIZE],
    pub key_index: u16,
    pub flags: u8,
    pub iv_index: u32,
    pub unicast_address: Address,
}

impl ProvisioningDataPayload {
    /// `key(16) || key_index(2) || flags(1) || iv_index(4) || address(2)`,
    /// multi-octet fields big-endian.
    pub fn encode(&self) -> [u8; PROVISIONING_DATA_SIZE] {
        let mut out = [0u8; PROVISIONING_DATA_SIZE];
        out[..16].copy_from_slice(&self.network_key);
        out[16..18].copy_from_slice(&self.key_index.to_be_bytes());
        out[18] = self.flags;
        out[19..23].copy_from_slice(&self.iv_index.to_be_bytes());
        out[23..25].copy_from_slice(&self.unicast_address.to_be_bytes());
        out
    }

    pub fn decode(raw: &[u8]) -> Result<Self, PduError> {
        if raw.len() != PROVISIONING_DATA_SIZE {
            return Err(PduError::InvalidLength {
                expected: PROVISIONING_DATA_SIZE,
                actual: raw.len(),
            });
        }
        let mut network_key = [0u8; NETWORK_KEY_SIZE];
        network_key.copy_from_slice(&raw[..16]);
        Ok(Self {
            network_key,
            key_index: u16::from_be_bytes([raw[16], raw[17]]),
            flags: raw[18],
            iv_index: u32::from_be_bytes([raw[19], raw[20], raw[21], raw[22]]),
            unicast_address: Address::from_be_bytes([raw[23], raw[24]]),
        })
    }
}

impl fmt::Debug for ProvisioningDataPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningDataPayload")
            .field("key_index", &self.key_index)
            .field("flags", &self.flags)
            .field("iv_index", &self.iv_index)
            .field("unicast_address", &self.unicast_address)
            .finish_non_exhaustive()
    }
}

impl Drop for ProvisioningDataPayload {
    fn drop(&mut self) {
        self.network_key.fill(0);
    }
}

pub struct ProvisioningData {
    role: Role,
    algorithm: Algorithm,
    confirmation_inputs: Vec<u8>,
    key_pair: Option<KeyPair>,
    peer_public_key: Option<[u8; PUBLIC_KEY_SIZE]>,
    shared_secret: Option<SharedSecret>,
    random: Vec<u8>,
    peer_random: Option<Vec<u8>>,
    auth_value: Option<Vec<u8>>,
    confirmation: Option<Vec<u8>>,
    peer_confirmation: Option<Vec<u8>>,
    session_keys: Option<SessionKeys>,
}

impl ProvisioningData {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            algorithm: Algorithm::default(),
            confirmation_inputs: Vec::with_capacity(145),
            key_pair: None,
            peer_public_key: None,
            shared_secret: None,
            random: Vec::new(),
            peer_random: None,
            auth_value: None,
            confirmation: None,
            peer_confirmation: None,
            session_keys: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Append PDU parameters (without the type octet) to the confirmation
    /// inputs.
    pub fn accumulate(&mut self, parameters: &[u8]) {
        self.confirmation_inputs.extend_from_slice(parameters);
    }

    pub fn confirmation_inputs(&self) -> &[u8] {
        &self.confirmation_inputs
    }

    /// Generate the ephemeral key pair and our random for `algorithm`.
    pub fn generate_keys(
        &mut self,
        crypto: &dyn CryptoProvider,
        algorithm: Algorithm,
    ) -> Result<(), ProvisioningError> {
        let key_pair = crypto
            .generate_key_pair(algorithm)
            .map_err(ProvisioningError::KeyGenerationFailed)?;
        self.use_key_pair(crypto, algorithm, key_pair);
        Ok(())
    }

    /// Like [`ProvisioningData::generate_keys`] with a key pair whose public
    /// half was published out of band.
    pub fn use_key_pair(&mut self, crypto: &dyn CryptoProvider, algorithm: Algorithm, key_pair: KeyPair) {
        let mut random = vec![0u8; algorithm.key_length()];
        crypto.random_bytes(&mut random);

        self.algorithm = algorithm;
        self.key_pair = Some(key_pair);
        self.random = random;
    }

    pub fn public_key(&self) -> Option<&[u8; PUBLIC_KEY_SIZE]> {
        self.key_pair.as_ref().map(|pair| &pair.public_key)
    }

    pub fn random(&self) -> &[u8] {
        &self.random
    }

    /// Store the peer's public key and compute the shared secret.
    ///
    /// A key equal to ours is a reflection and fails the session.
    pub fn did_obtain_peer_public_key(
        &mut self,
        crypto: &dyn CryptoProvider,
        key: [u8; PUBLIC_KEY_SIZE],
    ) -> Result<(), ProvisioningError> {
        let pair = self
            .key_pair
            .as_ref()
            .ok_or(ProvisioningError::InvalidState("keys not generated"))?;
        if pair.public_key == key {
            return Err(ProvisioningError::InvalidPublicKey);
        }
        let secret = crypto
            .shared_secret(&pair.private_key, &key)
            .map_err(|_| ProvisioningError::InvalidPublicKey)?;
        self.peer_public_key = Some(key);
        self.shared_secret = Some(secret);
        Ok(())
    }

    pub fn has_shared_secret(&self) -> bool {
        self.shared_secret.is_some()
    }

    /// Store the Auth Value and compute our confirmation.
    pub fn did_obtain_auth_value(
        &mut self,
        crypto: &dyn CryptoProvider,
        auth_value: Vec<u8>,
    ) -> Result<(), ProvisioningError> {
        let secret = self
            .shared_secret
            .as_ref()
            .ok_or(ProvisioningError::InvalidState("no shared secret"))?;
        let confirmation = crypto.confirmation(
            self.algorithm,
            &self.confirmation_inputs,
            secret,
            &self.random,
            &auth_value,
        );
        self.auth_value = Some(auth_value);
        self.confirmation = Some(confirmation);
        Ok(())
    }

    pub fn has_auth_value(&self) -> bool {
        self.auth_value.is_some()
    }

    pub fn confirmation(&self) -> Option<&[u8]> {
        self.confirmation.as_deref()
    }

    /// Store the peer's confirmation. A copy of ours fails the session.
    pub fn did_obtain_peer_confirmation(&mut self, confirmation: Vec<u8>) -> Result<(), ProvisioningError> {
        if self.confirmation.as_deref() == Some(confirmation.as_slice()) {
            return Err(ProvisioningError::ConfirmationFailed);
        }
        self.peer_confirmation = Some(confirmation);
        Ok(())
    }

    pub fn has_peer_confirmation(&self) -> bool {
        self.peer_confirmation.is_some()
    }

    pub fn has_peer_random(&self) -> bool {
        self.peer_random.is_some()
    }

    /// Store the peer's random, check it against the peer's confirmation and
    /// derive the session keys.
    pub fn did_obtain_peer_random(
        &mut self,
        crypto: &dyn CryptoProvider,
        random: Vec<u8>,
    ) -> Result<(), ProvisioningError> {
        let (Some(secret), Some(auth_value), Some(expected)) = (
            self.shared_secret.as_ref(),
            self.auth_value.as_ref(),
            self.peer_confirmation.as_ref(),
        ) else {
            return Err(ProvisioningError::InvalidState("random before confirmation"));
        };

        let computed = crypto.confirmation(
            self.algorithm,
            &self.confirmation_inputs,
            secret,
            &random,
            auth_value,
        );
        if &computed != expected {
            return Err(ProvisioningError::ConfirmationFailed);
        }

        let (provisioner_random, device_random) = match self.role {
            Role::Provisioner => (&self.random, &random),
            Role::Device => (&random, &self.random),
        };
        let keys = crypto.session_keys(
            self.algorithm,
            &self.confirmation_inputs,
            secret,
            provisioner_random,
            device_random,
        );
        self.session_keys = Some(keys);
        self.peer_random = Some(random);
        Ok(())
    }

    pub fn device_key(&self) -> Option<[u8; 16]> {
        self.session_keys.as_ref().map(|keys| keys.device_key)
    }

    /// Encrypt `payload` into the Data PDU body (data followed by MIC).
    pub fn encrypt(
        &self,
        crypto: &dyn CryptoProvider,
        payload: &ProvisioningDataPayload,
    ) -> Result<Vec<u8>, ProvisioningError> {
        let keys = self
            .session_keys
            .as_ref()
            .ok_or(ProvisioningError::InvalidState("no session keys"))?;
        crypto
            .encrypt_provisioning_data(keys, &payload.encode())
            .map_err(|_| ProvisioningError::InvalidState("encryption failed"))
    }

    pub fn decrypt(
        &self,
        crypto: &dyn CryptoProvider,
        data: &[u8],
    ) -> Result<ProvisioningDataPayload, ProvisioningError> {
        if data.len() != ENCRYPTED_PROVISIONING_DATA_SIZE {
            return Err(ProvisioningError::InvalidPdu(PduError::InvalidLength {
                expected: ENCRYPTED_PROVISIONING_DATA_SIZE,
                actual: data.len(),
            }));
        }
        let keys = self
            .session_keys
            .as_ref()
            .ok_or(ProvisioningError::InvalidState("no session keys"))?;
        let mut plain = crypto
            .decrypt_provisioning_data(keys, data)
            .map_err(|_| ProvisioningError::DecryptionFailed)?;
        let payload = ProvisioningDataPayload::decode(&plain);
        plain.fill(0);
        Ok(payload?)
    }
}

impl fmt::Debug for ProvisioningData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningData")
            .field("role", &self.role)
            .field("algorithm", &self.algorithm)
            .field("inputs_len", &self.confirmation_inputs.len())
            .field("has_secret", &self.shared_secret.is_some())
            .field("has_auth_value", &self.auth_value.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for ProvisioningData {
    fn drop(&mut self) {
        self.random.fill(0);
        if let Some(value) = self.auth_value.as_mut() {
            value.fill(0);
        }
        if let Some(value) = self.peer_random.as_mut() {
            value.fill(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_crypto::MeshCrypto;

    fn payload() -> ProvisioningDataPayload {
        ProvisioningDataPayload {
            network_key: [0x7D; 16],
            key_index: 0x0123,
            flags: 0x02,
            iv_index: 0x1020_3040,
            unicast_address: Address(0x0B0C),
        }
    }

    /// Run both sides up to derived session keys.
    fn paired(algorithm: Algorithm) -> (ProvisioningData, ProvisioningData) {
        let crypto = MeshCrypto::new();
        let mut provisioner = ProvisioningData::new(Role::Provisioner);
        let mut device = ProvisioningData::new(Role::Device);
        provisioner.generate_keys(&crypto, algorithm).unwrap();
        device.generate_keys(&crypto, algorithm).unwrap();

        let p_key = *provisioner.public_key().unwrap();
        let d_key = *device.public_key().unwrap();
        for side in [&mut provisioner, &mut device] {
            side.accumulate(&[0x05]);
            side.accumulate(&p_key);
            side.accumulate(&d_key);
        }
        provisioner.did_obtain_peer_public_key(&crypto, d_key).unwrap();
        device.did_obtain_peer_public_key(&crypto, p_key).unwrap();

        let auth = vec![0u8; algorithm.key_length()];
        provisioner.did_obtain_auth_value(&crypto, auth.clone()).unwrap();
        device.did_obtain_auth_value(&crypto, auth).unwrap();

        let p_conf = provisioner.confirmation().unwrap().to_vec();
        let d_conf = device.confirmation().unwrap().to_vec();
        provisioner.did_obtain_peer_confirmation(d_conf).unwrap();
        device.did_obtain_peer_confirmation(p_conf).unwrap();

        let p_rand = provisioner.random().to_vec();
        let d_rand = device.random().to_vec();
        provisioner.did_obtain_peer_random(&crypto, d_rand).unwrap();
        device.did_obtain_peer_random(&crypto, p_rand).unwrap();
        (provisioner, device)
    }

    #[test]
    fn test_payload_layout() {
        let bytes = payload().encode();
        assert_eq!(&bytes[..16], &[0x7D; 16]);
        assert_eq!(&bytes[16..], &[0x01, 0x23, 0x02, 0x10, 0x20, 0x30, 0x40, 0x0B, 0x0C]);
        assert_eq!(ProvisioningDataPayload::decode(&bytes).unwrap(), payload());
        assert!(ProvisioningDataPayload::decode(&bytes[..24]).is_err());
    }

    #[test]
    fn test_both_sides_derive_the_same_device_key() {
        for algorithm in [Algorithm::EcdhP256CmacAes128, Algorithm::EcdhP256HmacSha256] {
            let (provisioner, device) = paired(algorithm);
            assert_eq!(provisioner.device_key(), device.device_key());
            assert!(provisioner.device_key().is_some());
            assert_eq!(provisioner.random().len(), algorithm.key_length());
        }
    }

    #[test]
    fn test_data_encrypted_by_provisioner_decrypts_on_device() {
        let crypto = MeshCrypto::new();
        let (provisioner, device) = paired(Algorithm::EcdhP256CmacAes128);
        let encrypted = provisioner.encrypt(&crypto, &payload()).unwrap();
        assert_eq!(encrypted.len(), ENCRYPTED_PROVISIONING_DATA_SIZE);
        assert_eq!(device.decrypt(&crypto, &encrypted).unwrap(), payload());

        let mut tampered = encrypted;
        tampered[3] ^= 0x01;
        assert_eq!(
            device.decrypt(&crypto, &tampered),
            Err(ProvisioningError::DecryptionFailed)
        );
    }

    #[test]
    fn test_reflected_public_key_rejected() {
        let crypto = MeshCrypto::new();
        let mut data = ProvisioningData::new(Role::Provisioner);
        data.generate_keys(&crypto, Algorithm::default()).unwrap();
        let ours = *data.public_key().unwrap();
        assert_eq!(
            data.did_obtain_peer_public_key(&crypto, ours),
            Err(ProvisioningError::InvalidPublicKey)
        );
        assert!(!data.has_shared_secret());
    }

    #[test]
    fn test_garbage_public_key_rejected() {
        let crypto = MeshCrypto::new();
        let mut data = ProvisioningData::new(Role::Provisioner);
        data.generate_keys(&crypto, Algorithm::default()).unwrap();
        assert_eq!(
            data.did_obtain_peer_public_key(&crypto, [0x01; 64]),
            Err(ProvisioningError::InvalidPublicKey)
        );
    }

    #[test]
    fn test_reflected_confirmation_rejected() {
        let (mut provisioner, _) = paired(Algorithm::EcdhP256CmacAes128);
        let ours = provisioner.confirmation().unwrap().to_vec();
        assert_eq!(
            provisioner.did_obtain_peer_confirmation(ours),
            Err(ProvisioningError::ConfirmationFailed)
        );
    }

    #[test]
    fn test_wrong_random_fails_confirmation() {
        let crypto = MeshCrypto::new();
        let mut data = ProvisioningData::new(Role::Provisioner);
        let mut peer = ProvisioningData::new(Role::Device);
        data.generate_keys(&crypto, Algorithm::default()).unwrap();
        peer.generate_keys(&crypto, Algorithm::default()).unwrap();
        let peer_key = *peer.public_key().unwrap();
        data.did_obtain_peer_public_key(&crypto, peer_key).unwrap();
        data.did_obtain_auth_value(&crypto, vec![0; 16]).unwrap();
        data.did_obtain_peer_confirmation(vec![0xEE; 16]).unwrap();
        assert_eq!(
            data.did_obtain_peer_random(&crypto, vec![0x11; 16]),
            Err(ProvisioningError::ConfirmationFailed)
        );
        assert_eq!(data.device_key(), None);
    }

    #[test]
    fn test_debug_is_redacted() {
        let (provisioner, _) = paired(Algorithm::EcdhP256CmacAes128);
        let text = format!("{provisioner:?} {:?}", payload());
        assert!(!text.contains("125"), "network key bytes leaked: {text}");
        assert!(text.contains("ProvisioningData"));
    }
}
