//! Unprovisioned-device side of the provisioning protocol.
//!
//! Answers a provisioner's PDUs and ends up holding the network key,
//! address and device key. Failures are reported to the provisioner with a
//! Failed PDU.

use std::collections::VecDeque;

use mesh_core::provisioning::{PublicKeyMethod, PublicKeyType, StaticOobType};
use mesh_core::{
    Algorithm, AuthenticationMethod, InputAction, OutputAction, PduError, ProvisioningCapabilities,
    ProvisioningPdu, RemoteProvisioningError,
};
use mesh_crypto::{CryptoProvider, KeyPair, MeshCrypto};

use crate::auth::{
    alphanumeric_auth_value, no_oob_auth_value, numeric_auth_value, random_alphanumeric,
    random_number, static_auth_value,
};
use crate::data::{ProvisioningData, ProvisioningDataPayload, Role};
use crate::error::ProvisioningError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Idle,
    Invited,
    Started,
    KeysExchanged,
    ConfirmationSent,
    RandomSent,
    Complete,
    Failed(RemoteProvisioningError),
}

/// Value a device shows for Output OOB authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OobValue {
    Numeric(u64),
    Alphanumeric(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Send(ProvisioningPdu),
    /// Attract attention for this many seconds.
    Attention(u8),
    /// Blink, beep, vibrate or display this value.
    OutputOob { action: OutputAction, value: OobValue },
    /// The user must enter the value the provisioner displays.
    InputRequested { action: InputAction, size: u8 },
    Provisioned,
    Failed(RemoteProvisioningError),
}

pub struct ProvisioningDevice<C: CryptoProvider = MeshCrypto> {
    crypto: C,
    capabilities: ProvisioningCapabilities,
    static_oob: Option<Vec<u8>>,
    oob_key_pair: Option<KeyPair>,
    public_key_method: PublicKeyMethod,
    state: DeviceState,
    data: Option<ProvisioningData>,
    auth_method: Option<AuthenticationMethod>,
    provisioned: Option<ProvisioningDataPayload>,
    events: VecDeque<DeviceEvent>,
}

impl ProvisioningDevice<MeshCrypto> {
    pub fn new(capabilities: ProvisioningCapabilities) -> Self {
        Self::with_crypto(capabilities, MeshCrypto::new())
    }
}

impl<C: CryptoProvider> ProvisioningDevice<C> {
    pub fn with_crypto(capabilities: ProvisioningCapabilities, crypto: C) -> Self {
        Self {
            crypto,
            capabilities,
            static_oob: None,
            oob_key_pair: None,
            public_key_method: PublicKeyMethod::NoOob,
            state: DeviceState::Idle,
            data: None,
            auth_method: None,
            provisioned: None,
            events: VecDeque::new(),
        }
    }

    /// Static OOB value printed on the device.
    pub fn with_static_oob(mut self, value: Vec<u8>) -> Self {
        self.capabilities.static_oob_type.0 |= StaticOobType::AVAILABLE;
        self.static_oob = Some(value);
        self
    }

    /// Generate a key pair whose public key is published out of band.
    pub fn with_oob_public_key(mut self) -> Result<Self, ProvisioningError> {
        let key_pair = self
            .crypto
            .generate_key_pair(self.capabilities.algorithms.strongest())
            .map_err(ProvisioningError::KeyGenerationFailed)?;
        self.capabilities.public_key_type.0 |= PublicKeyType::OOB_AVAILABLE;
        self.oob_key_pair = Some(key_pair);
        Ok(self)
    }

    /// The public key a provisioner reads out of band.
    pub fn oob_public_key(&self) -> Option<[u8; 64]> {
        self.oob_key_pair.as_ref().map(|pair| pair.public_key)
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn capabilities(&self) -> &ProvisioningCapabilities {
        &self.capabilities
    }

    /// Data received from the provisioner once `Complete`.
    pub fn provisioned(&self) -> Option<&ProvisioningDataPayload> {
        self.provisioned.as_ref()
    }

    pub fn device_key(&self) -> Option<[u8; 16]> {
        self.data.as_ref().and_then(ProvisioningData::device_key)
    }

    pub fn poll_events(&mut self) -> Vec<DeviceEvent> {
        self.events.drain(..).collect()
    }

    /// Drop the session, e.g. after the link closed.
    pub fn reset(&mut self) {
        self.state = DeviceState::Idle;
        self.data = None;
        self.auth_method = None;
    }

    // -----------------------------------------------------------------------
    // Input OOB
    // -----------------------------------------------------------------------

    /// The user entered a number shown by the provisioner.
    pub fn input_numeric(&mut self, value: u64) -> Result<(), ProvisioningError> {
        let length = self.auth_value_length();
        self.input_complete(Ok(numeric_auth_value(value, length)))
    }

    pub fn input_alphanumeric(&mut self, text: &str) -> Result<(), ProvisioningError> {
        let length = self.auth_value_length();
        self.input_complete(alphanumeric_auth_value(text, length))
    }

    fn input_complete(&mut self, value: Result<Vec<u8>, ProvisioningError>) -> Result<(), ProvisioningError> {
        let waiting = self.state == DeviceState::KeysExchanged
            && matches!(self.auth_method, Some(AuthenticationMethod::InputOob { .. }))
            && self.data.as_ref().is_some_and(|data| !data.has_auth_value());
        if !waiting {
            return Err(ProvisioningError::InvalidState("no input requested"));
        }
        let value = value?;
        self.set_auth_value(value)?;
        self.send(ProvisioningPdu::InputComplete, false);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Incoming PDUs
    // -----------------------------------------------------------------------

    pub fn handle_pdu(&mut self, raw: &[u8]) {
        let pdu = match ProvisioningPdu::decode(raw) {
            Ok(pdu) => pdu,
            Err(PduError::UnknownPduType(t)) => {
                tracing::warn!(pdu_type = t, "device received unknown provisioning PDU");
                self.fail(RemoteProvisioningError::InvalidPdu);
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "device received malformed provisioning PDU");
                self.fail(RemoteProvisioningError::InvalidFormat);
                return;
            }
        };

        let result = match (self.state, pdu) {
            (DeviceState::Idle, ProvisioningPdu::Invite { attention_timer }) => {
                self.on_invite(attention_timer);
                Ok(())
            }
            (
                DeviceState::Invited,
                ProvisioningPdu::Start {
                    algorithm,
                    public_key,
                    auth_method,
                },
            ) => self.on_start(algorithm, public_key, auth_method),
            (DeviceState::Started, ProvisioningPdu::PublicKey { key }) => self.on_public_key(key),
            (DeviceState::KeysExchanged, ProvisioningPdu::Confirmation(confirmation)) => {
                self.on_confirmation(confirmation)
            }
            (DeviceState::ConfirmationSent, ProvisioningPdu::Random(random)) => self.on_random(random),
            (DeviceState::RandomSent, ProvisioningPdu::Data(data)) => self.on_data(&data),
            (state, pdu) => {
                tracing::warn!(?state, pdu_type = ?pdu.pdu_type(), "device received unexpected PDU");
                Err(ProvisioningError::InvalidState("unexpected PDU"))
            }
        };

        if let Err(err) = result {
            self.fail(err.remote_code());
        }
    }

    fn on_invite(&mut self, attention_timer: u8) {
        let mut data = ProvisioningData::new(Role::Device);
        data.accumulate(&[attention_timer]);
        self.data = Some(data);
        self.events.push_back(DeviceEvent::Attention(attention_timer));
        self.send(ProvisioningPdu::Capabilities(self.capabilities), true);
        self.state = DeviceState::Invited;
    }

    fn supports(&self, method: &AuthenticationMethod) -> bool {
        let caps = &self.capabilities;
        match *method {
            AuthenticationMethod::NoOob => true,
            AuthenticationMethod::StaticOob => self.static_oob.is_some(),
            AuthenticationMethod::OutputOob { action, size } => {
                caps.output_oob_actions.supports(action) && size <= caps.output_oob_size
            }
            AuthenticationMethod::InputOob { action, size } => {
                caps.input_oob_actions.supports(action) && size <= caps.input_oob_size
            }
        }
    }

    fn on_start(
        &mut self,
        algorithm: Algorithm,
        public_key: PublicKeyMethod,
        auth_method: AuthenticationMethod,
    ) -> Result<(), ProvisioningError> {
        if !self.capabilities.algorithms.supports(algorithm) || !self.supports(&auth_method) {
            return Err(ProvisioningError::InvalidPdu(PduError::InvalidValue {
                field: "start",
                value: auth_method.to_bytes()[0],
            }));
        }
        let data = self
            .data
            .as_mut()
            .ok_or(ProvisioningError::InvalidState("not invited"))?;
        match public_key {
            PublicKeyMethod::NoOob => data.generate_keys(&self.crypto, algorithm)?,
            PublicKeyMethod::Oob => {
                let key_pair = self.oob_key_pair.take().ok_or(ProvisioningError::InvalidPdu(
                    PduError::InvalidValue {
                        field: "public key",
                        value: PublicKeyMethod::Oob as u8,
                    },
                ))?;
                data.use_key_pair(&self.crypto, algorithm, key_pair);
            }
        }
        let start = ProvisioningPdu::Start {
            algorithm,
            public_key,
            auth_method,
        };
        data.accumulate(&start.parameters());

        tracing::debug!(%algorithm, auth = %auth_method, "provisioning started");
        self.auth_method = Some(auth_method);
        self.public_key_method = public_key;
        self.state = DeviceState::Started;
        Ok(())
    }

    fn on_public_key(&mut self, key: [u8; 64]) -> Result<(), ProvisioningError> {
        let data = self
            .data
            .as_mut()
            .ok_or(ProvisioningError::InvalidState("no session"))?;
        let ours = *data
            .public_key()
            .ok_or(ProvisioningError::InvalidState("keys not generated"))?;
        data.accumulate(&key);
        data.did_obtain_peer_public_key(&self.crypto, key)?;

        // An out-of-band key is accumulated but never sent.
        if self.public_key_method == PublicKeyMethod::NoOob {
            self.send(ProvisioningPdu::PublicKey { key: ours }, true);
        } else if let Some(data) = self.data.as_mut() {
            data.accumulate(&ours);
        }
        self.state = DeviceState::KeysExchanged;

        let length = self.auth_value_length();
        match self.auth_method {
            Some(AuthenticationMethod::NoOob) | None => self.set_auth_value(no_oob_auth_value(length)),
            Some(AuthenticationMethod::StaticOob) => {
                let value = static_auth_value(self.static_oob.as_deref().unwrap_or_default(), length)?;
                self.set_auth_value(value)
            }
            Some(AuthenticationMethod::OutputOob { action, size }) => {
                let mut rng = rand::thread_rng();
                let (value, auth) = match action {
                    OutputAction::OutputAlphanumeric => {
                        let text = random_alphanumeric(&mut rng, size);
                        let auth = alphanumeric_auth_value(&text, length)?;
                        (OobValue::Alphanumeric(text), auth)
                    }
                    _ => {
                        let number = random_number(&mut rng, size);
                        (OobValue::Numeric(number), numeric_auth_value(number, length))
                    }
                };
                self.events.push_back(DeviceEvent::OutputOob { action, value });
                self.set_auth_value(auth)
            }
            Some(AuthenticationMethod::InputOob { action, size }) => {
                self.events.push_back(DeviceEvent::InputRequested { action, size });
                Ok(())
            }
        }
    }

    fn on_confirmation(&mut self, confirmation: Vec<u8>) -> Result<(), ProvisioningError> {
        if confirmation.len() != self.auth_value_length() {
            return Err(ProvisioningError::InvalidPdu(PduError::InvalidLength {
                expected: self.auth_value_length(),
                actual: confirmation.len(),
            }));
        }
        let data = self
            .data
            .as_mut()
            .filter(|data| data.has_auth_value())
            .ok_or(ProvisioningError::InvalidState("auth value unknown"))?;
        data.did_obtain_peer_confirmation(confirmation)?;
        let ours = data
            .confirmation()
            .map(<[u8]>::to_vec)
            .ok_or(ProvisioningError::InvalidState("no confirmation"))?;
        self.send(ProvisioningPdu::Confirmation(ours), false);
        self.state = DeviceState::ConfirmationSent;
        Ok(())
    }

    fn on_random(&mut self, random: Vec<u8>) -> Result<(), ProvisioningError> {
        if random.len() != self.auth_value_length() {
            return Err(ProvisioningError::InvalidPdu(PduError::InvalidLength {
                expected: self.auth_value_length(),
                actual: random.len(),
            }));
        }
        let data = self
            .data
            .as_mut()
            .ok_or(ProvisioningError::InvalidState("no session"))?;
        data.did_obtain_peer_random(&self.crypto, random)?;
        let ours = data.random().to_vec();
        self.send(ProvisioningPdu::Random(ours), false);
        self.state = DeviceState::RandomSent;
        Ok(())
    }

    fn on_data(&mut self, encrypted: &[u8]) -> Result<(), ProvisioningError> {
        let data = self
            .data
            .as_ref()
            .ok_or(ProvisioningError::InvalidState("no session"))?;
        let payload = data.decrypt(&self.crypto, encrypted)?;
        if !payload.unicast_address.is_unicast() {
            return Err(ProvisioningError::InvalidPdu(PduError::InvalidValue {
                field: "unicast address",
                value: 0,
            }));
        }
        tracing::info!(address = %payload.unicast_address, key_index = payload.key_index, "device provisioned");
        self.provisioned = Some(payload);
        self.send(ProvisioningPdu::Complete, false);
        self.state = DeviceState::Complete;
        self.events.push_back(DeviceEvent::Provisioned);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn auth_value_length(&self) -> usize {
        self.data
            .as_ref()
            .map_or(16, |data| data.algorithm().key_length())
    }

    fn set_auth_value(&mut self, value: Vec<u8>) -> Result<(), ProvisioningError> {
        let data = self
            .data
            .as_mut()
            .ok_or(ProvisioningError::InvalidState("no session"))?;
        data.did_obtain_auth_value(&self.crypto, value)
    }

    fn send(&mut self, pdu: ProvisioningPdu, accumulate: bool) {
        if accumulate && let Some(data) = self.data.as_mut() {
            data.accumulate(&pdu.parameters());
        }
        self.events.push_back(DeviceEvent::Send(pdu));
    }

    fn fail(&mut self, code: RemoteProvisioningError) {
        tracing::warn!(state = ?self.state, %code, "device provisioning failed");
        self.state = DeviceState::Failed(code);
        self.data = None;
        self.events.push_back(DeviceEvent::Send(ProvisioningPdu::Failed(code)));
        self.events.push_back(DeviceEvent::Failed(code));
    }
}

impl<C: CryptoProvider> std::fmt::Debug for ProvisioningDevice<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningDevice")
            .field("state", &self.state)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}
