//! Provisioner side of the provisioning protocol.
//!
//! ```text
//! PROVISIONER                               DEVICE
//!     |-- Invite ------------------------------>|
//!     |<------------------------- Capabilities --|
//!     |-- Start, PublicKey -------------------->|
//!     |<---------------------------- PublicKey --|   (unless OOB key)
//!     |            ECDH, Auth Value             |
//!     |-- Confirmation ------------------------>|
//!     |<------------------------- Confirmation --|
//!     |-- Random ------------------------------>|
//!     |<------------------------------- Random --|
//!     |-- Data -------------------------------->|
//!     |<----------------------------- Complete --|
//! ```
//!
//! The manager performs no I/O. PDUs to send, state changes and requests
//! for user input are queued as [`ProvisioningEvent`]s and drained with
//! [`ProvisioningManager::poll_events`].

use std::collections::VecDeque;

use mesh_core::constants::DEVICE_UUID_SIZE;
use mesh_core::network::provisioning_flags;
use mesh_core::provisioning::PublicKeyMethod;
use mesh_core::{
    Address, Algorithm, AuthenticationMethod, InputAction, MeshNetwork, Node, OutputAction,
    PduError, ProvisioningCapabilities, ProvisioningPdu, Security,
};
use mesh_crypto::{CryptoProvider, MeshCrypto};

use crate::auth::{
    AuthAction, alphanumeric_auth_value, no_oob_auth_value, numeric_auth_value, random_alphanumeric,
    random_number, static_auth_value,
};
use crate::data::{ProvisioningData, ProvisioningDataPayload, Role};
use crate::error::ProvisioningError;
use crate::state::{ProvisioningEvent, ProvisioningState};

/// How the device public key is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePublicKey {
    /// Exchanged in Public Key PDUs.
    #[default]
    InBand,
    /// Read out of band, e.g. from a QR code.
    OutOfBand([u8; 64]),
}

impl DevicePublicKey {
    pub fn method(&self) -> PublicKeyMethod {
        match self {
            DevicePublicKey::InBand => PublicKeyMethod::NoOob,
            DevicePublicKey::OutOfBand(_) => PublicKeyMethod::Oob,
        }
    }
}

pub struct ProvisioningManager<C: CryptoProvider = MeshCrypto> {
    device_uuid: [u8; DEVICE_UUID_SIZE],
    crypto: C,
    state: ProvisioningState,
    bearer_open: bool,
    capabilities: Option<ProvisioningCapabilities>,
    unicast_address: Option<Address>,
    suggested_unicast_address: Option<Address>,
    network_key_index: Option<u16>,
    auth_method: Option<AuthenticationMethod>,
    auth_action: Option<AuthAction>,
    security: Security,
    data: Option<ProvisioningData>,
    payload: Option<ProvisioningDataPayload>,
    events: VecDeque<ProvisioningEvent>,
}

impl ProvisioningManager<MeshCrypto> {
    pub fn new(device_uuid: [u8; DEVICE_UUID_SIZE]) -> Self {
        Self::with_crypto(device_uuid, MeshCrypto::new())
    }
}

impl<C: CryptoProvider> ProvisioningManager<C> {
    pub fn with_crypto(device_uuid: [u8; DEVICE_UUID_SIZE], crypto: C) -> Self {
        Self {
            device_uuid,
            crypto,
            state: ProvisioningState::Ready,
            bearer_open: false,
            capabilities: None,
            unicast_address: None,
            suggested_unicast_address: None,
            network_key_index: None,
            auth_method: None,
            auth_action: None,
            security: Security::Insecure,
            data: None,
            payload: None,
            events: VecDeque::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn device_uuid(&self) -> &[u8; DEVICE_UUID_SIZE] {
        &self.device_uuid
    }

    pub fn state(&self) -> &ProvisioningState {
        &self.state
    }

    pub fn capabilities(&self) -> Option<&ProvisioningCapabilities> {
        self.capabilities.as_ref()
    }

    pub fn unicast_address(&self) -> Option<Address> {
        self.unicast_address
    }

    /// Override the address picked when Capabilities arrived.
    pub fn set_unicast_address(&mut self, address: Address) {
        self.unicast_address = Some(address);
    }

    pub fn suggested_unicast_address(&self) -> Option<Address> {
        self.suggested_unicast_address
    }

    /// Network key to distribute. Defaults to the primary key.
    pub fn set_network_key_index(&mut self, index: u16) {
        self.network_key_index = Some(index);
    }

    /// Whether the chosen address fits the device's elements, is free and
    /// lies in one of our ranges. `None` before Capabilities.
    pub fn is_unicast_address_valid(&self, network: &MeshNetwork) -> Option<bool> {
        let caps = self.capabilities.as_ref()?;
        let address = self.unicast_address?;
        let count = caps.number_of_elements;
        let last = address.0.checked_add(u16::from(count).saturating_sub(1))?;
        let in_range = network
            .provisioner_ranges
            .iter()
            .any(|range| range.contains(address) && range.contains(Address(last)));
        Some(in_range && network.is_address_range_available(address, count))
    }

    /// Whether the device supports an algorithm we implement. `None` before
    /// Capabilities.
    pub fn is_device_supported(&self) -> Option<bool> {
        let caps = self.capabilities.as_ref()?;
        Some(
            caps.algorithms.supports(Algorithm::EcdhP256CmacAes128)
                || caps.algorithms.supports(Algorithm::EcdhP256HmacSha256),
        )
    }

    /// Drain queued events.
    pub fn poll_events(&mut self) -> Vec<ProvisioningEvent> {
        self.events.drain(..).collect()
    }

    // -----------------------------------------------------------------------
    // Bearer
    // -----------------------------------------------------------------------

    pub fn bearer_did_open(&mut self) {
        self.bearer_open = true;
    }

    /// Discard the session and return to `Ready`.
    pub fn bearer_did_close(&mut self) {
        tracing::debug!(state = self.state.name(), "bearer closed, releasing provisioning session");
        self.bearer_open = false;
        self.reset();
        self.events.push_back(ProvisioningEvent::BearerReleased);
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Send Invite, asking the device to identify itself for
    /// `attention_timer` seconds.
    pub fn identify(&mut self, attention_timer: u8) -> Result<(), ProvisioningError> {
        if matches!(self.state, ProvisioningState::Failed(_)) {
            self.reset();
        }
        if self.state != ProvisioningState::Ready {
            tracing::error!(state = self.state.name(), "identify called in invalid state");
            return Err(ProvisioningError::InvalidState(self.state.name()));
        }
        if !self.bearer_open {
            return Err(ProvisioningError::BearerClosed);
        }

        self.data = Some(ProvisioningData::new(Role::Provisioner));
        self.set_state(ProvisioningState::RequestingCapabilities);
        self.send(ProvisioningPdu::Invite { attention_timer }, true);
        Ok(())
    }

    /// Send Start and our public key.
    pub fn provision(
        &mut self,
        network: &MeshNetwork,
        algorithm: Algorithm,
        public_key: DevicePublicKey,
        auth_method: AuthenticationMethod,
    ) -> Result<(), ProvisioningError> {
        let ProvisioningState::CapabilitiesReceived(caps) = &self.state else {
            return Err(ProvisioningError::InvalidState(self.state.name()));
        };
        let element_count = caps.number_of_elements;
        if self.is_device_supported() != Some(true) {
            return Err(ProvisioningError::UnsupportedDevice);
        }
        if !caps.algorithms.supports(algorithm) {
            return Err(ProvisioningError::UnsupportedAlgorithm);
        }
        if self.unicast_address.is_none() {
            self.unicast_address = self.suggested_unicast_address;
        }
        let unicast_address = self
            .unicast_address
            .ok_or(ProvisioningError::AddressNotSpecified)?;
        let network_key = match self.network_key_index {
            Some(index) => network.network_key(index),
            None => network.primary_network_key(),
        }
        .ok_or(ProvisioningError::NetworkKeyNotSpecified)?;
        if !self.bearer_open {
            return Err(ProvisioningError::BearerClosed);
        }
        let data = self
            .data
            .as_mut()
            .ok_or(ProvisioningError::InvalidState("no session"))?;

        let keys = data.generate_keys(&self.crypto, algorithm).and_then(|()| match public_key {
            DevicePublicKey::OutOfBand(key) => data.did_obtain_peer_public_key(&self.crypto, key),
            DevicePublicKey::InBand => Ok(()),
        });
        if let Err(err) = keys {
            self.fail(err.clone());
            return Err(err);
        }

        self.network_key_index = Some(network_key.index);
        self.payload = Some(ProvisioningDataPayload {
            network_key: *network_key.distributed_key(),
            key_index: network_key.index,
            flags: provisioning_flags(network_key, &network.iv_index),
            iv_index: network.iv_index.index,
            unicast_address,
        });
        self.auth_method = Some(auth_method);
        self.security = match public_key {
            DevicePublicKey::InBand => Security::Insecure,
            DevicePublicKey::OutOfBand(_) => Security::Secure,
        };
        tracing::info!(
            %algorithm,
            auth = %auth_method,
            address = %unicast_address,
            elements = element_count,
            "starting provisioning"
        );
        self.set_state(ProvisioningState::Provisioning);

        self.send(
            ProvisioningPdu::Start {
                algorithm,
                public_key: public_key.method(),
                auth_method,
            },
            true,
        );
        let Some(our_key) = self.data.as_ref().and_then(|data| data.public_key().copied()) else {
            self.fail(ProvisioningError::InvalidState("keys not generated"));
            return Ok(());
        };
        self.send(ProvisioningPdu::PublicKey { key: our_key }, true);

        if let DevicePublicKey::OutOfBand(key) = public_key {
            if let Some(data) = self.data.as_mut() {
                data.accumulate(&key);
            }
            self.obtain_auth_value();
        }
        Ok(())
    }

    /// Static OOB key read from the device's documentation.
    pub fn provide_static_key(&mut self, key: &[u8]) -> Result<(), ProvisioningError> {
        self.check_auth_response(|action| matches!(action, AuthAction::ProvideStaticKey))?;
        let value = static_auth_value(key, self.auth_value_length());
        self.complete_auth_response(value)
    }

    /// Number output by the device (blink, beep, vibrate or display).
    pub fn provide_numeric(&mut self, value: u64) -> Result<(), ProvisioningError> {
        self.check_auth_response(|action| matches!(action, AuthAction::ProvideNumeric { .. }))?;
        let value = Ok(numeric_auth_value(value, self.auth_value_length()));
        self.complete_auth_response(value)
    }

    /// Text displayed by the device.
    pub fn provide_alphanumeric(&mut self, text: &str) -> Result<(), ProvisioningError> {
        self.check_auth_response(|action| matches!(action, AuthAction::ProvideAlphanumeric { .. }))?;
        let value = alphanumeric_auth_value(text, self.auth_value_length());
        self.complete_auth_response(value)
    }

    // -----------------------------------------------------------------------
    // Incoming PDUs
    // -----------------------------------------------------------------------

    /// Process a provisioning PDU received from the device.
    pub fn handle_pdu(&mut self, network: &mut MeshNetwork, raw: &[u8]) {
        let pdu = match ProvisioningPdu::decode(raw) {
            Ok(pdu) => pdu,
            Err(PduError::UnknownPduType(t)) => {
                tracing::warn!(pdu_type = t, "ignoring unknown provisioning PDU");
                return;
            }
            Err(PduError::Empty) => {
                tracing::warn!("ignoring empty provisioning PDU");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "invalid provisioning PDU");
                self.fail(ProvisioningError::InvalidPdu(e));
                return;
            }
        };
        tracing::trace!(state = self.state.name(), ?pdu, "provisioning PDU received");

        let requesting = self.state == ProvisioningState::RequestingCapabilities;
        let provisioning = self.state == ProvisioningState::Provisioning;
        match pdu {
            ProvisioningPdu::Failed(code) => {
                self.fail(ProvisioningError::RemoteError(code));
            }
            ProvisioningPdu::Capabilities(caps) if requesting => self.on_capabilities(network, caps),
            ProvisioningPdu::PublicKey { key } if provisioning => self.on_public_key(key),
            ProvisioningPdu::InputComplete if provisioning => self.on_input_complete(),
            ProvisioningPdu::Confirmation(confirmation) if provisioning => {
                self.on_confirmation(confirmation);
            }
            ProvisioningPdu::Random(random) if provisioning => self.on_random(random),
            ProvisioningPdu::Complete if provisioning => self.on_complete(network),
            pdu => {
                tracing::warn!(state = self.state.name(), pdu_type = ?pdu.pdu_type(), "unexpected provisioning PDU");
                self.fail(ProvisioningError::InvalidState(self.state.name()));
            }
        }
    }

    fn on_capabilities(&mut self, network: &MeshNetwork, caps: ProvisioningCapabilities) {
        if let Some(data) = self.data.as_mut() {
            data.accumulate(&caps.encode());
        }
        self.capabilities = Some(caps);
        if self.unicast_address.is_none() {
            self.unicast_address = network.next_available_unicast_address(caps.number_of_elements);
            self.suggested_unicast_address = self.unicast_address;
        }
        tracing::info!(
            elements = caps.number_of_elements,
            algorithms = caps.algorithms.0,
            suggested = ?self.suggested_unicast_address,
            "capabilities received"
        );
        self.set_state(ProvisioningState::CapabilitiesReceived(caps));
        if self.unicast_address.is_none() {
            self.fail(ProvisioningError::NoAddressAvailable);
        }
    }

    fn on_public_key(&mut self, key: [u8; 64]) {
        let Some(data) = self.data.as_mut() else {
            self.fail(ProvisioningError::InvalidState("no session"));
            return;
        };
        if data.has_shared_secret() {
            self.fail(ProvisioningError::InvalidState("public key already known"));
            return;
        }
        data.accumulate(&key);
        if let Err(err) = data.did_obtain_peer_public_key(&self.crypto, key) {
            tracing::warn!(error = %err, "device public key rejected");
            self.fail(err);
            return;
        }
        tracing::debug!("shared secret computed");
        self.obtain_auth_value();
    }

    fn on_input_complete(&mut self) {
        self.events.push_back(ProvisioningEvent::InputComplete);
        let length = self.auth_value_length();
        let Some(value) = self
            .auth_action
            .as_ref()
            .and_then(|action| action.displayed_auth_value(length))
        else {
            self.fail(ProvisioningError::InvalidState("input complete without input OOB"));
            return;
        };
        self.auth_value_received(value);
    }

    fn on_confirmation(&mut self, confirmation: Vec<u8>) {
        if confirmation.len() != self.auth_value_length() {
            self.fail(ProvisioningError::InvalidPdu(PduError::InvalidLength {
                expected: self.auth_value_length(),
                actual: confirmation.len(),
            }));
            return;
        }
        let Some(data) = self.data.as_mut().filter(|data| data.confirmation().is_some()) else {
            self.fail(ProvisioningError::InvalidState("confirmation not sent"));
            return;
        };
        if data.has_peer_confirmation() {
            tracing::debug!("ignoring repeated device confirmation");
            return;
        }
        if let Err(err) = data.did_obtain_peer_confirmation(confirmation) {
            tracing::warn!("device confirmation equals ours, aborting");
            self.fail(err);
            return;
        }
        let random = data.random().to_vec();
        self.send(ProvisioningPdu::Random(random), false);
    }

    fn on_random(&mut self, random: Vec<u8>) {
        if random.len() != self.auth_value_length() {
            self.fail(ProvisioningError::InvalidPdu(PduError::InvalidLength {
                expected: self.auth_value_length(),
                actual: random.len(),
            }));
            return;
        }
        let (Some(data), Some(payload)) = (self.data.as_mut(), self.payload.as_ref()) else {
            self.fail(ProvisioningError::InvalidState("no session"));
            return;
        };
        if data.has_peer_random() {
            tracing::debug!("ignoring repeated device random");
            return;
        }
        let encrypted = data
            .did_obtain_peer_random(&self.crypto, random)
            .and_then(|()| data.encrypt(&self.crypto, payload));
        match encrypted {
            Ok(encrypted) => {
                tracing::debug!("confirmation verified, sending provisioning data");
                self.send(ProvisioningPdu::Data(encrypted), false);
            }
            Err(err) => {
                tracing::warn!(error = %err, "device confirmation check failed");
                self.fail(err);
            }
        }
    }

    fn on_complete(&mut self, network: &mut MeshNetwork) {
        let device_key = self.data.as_ref().and_then(ProvisioningData::device_key);
        let element_count = self.capabilities.map(|caps| caps.number_of_elements);
        let (Some(device_key), Some(element_count), Some(unicast_address), Some(network_key_index)) = (
            device_key,
            element_count,
            self.unicast_address,
            self.network_key_index,
        ) else {
            self.fail(ProvisioningError::InvalidState("complete before data"));
            return;
        };
        let node = Node {
            uuid: self.device_uuid,
            unicast_address,
            element_count,
            device_key,
            network_key_index,
            security: self.security,
        };
        tracing::info!(address = %unicast_address, elements = node.element_count, "device provisioned");
        network.add_node(node);
        self.set_state(ProvisioningState::Complete);
    }

    // -----------------------------------------------------------------------
    // Authentication
    // -----------------------------------------------------------------------

    fn auth_value_length(&self) -> usize {
        self.data
            .as_ref()
            .map_or(16, |data| data.algorithm().key_length())
    }

    fn obtain_auth_value(&mut self) {
        let Some(method) = self.auth_method else {
            self.fail(ProvisioningError::InvalidState("no authentication method"));
            return;
        };
        let action = match method {
            AuthenticationMethod::NoOob => {
                let value = no_oob_auth_value(self.auth_value_length());
                self.auth_value_received(value);
                return;
            }
            AuthenticationMethod::StaticOob => AuthAction::ProvideStaticKey,
            AuthenticationMethod::OutputOob { action, size } => match action {
                OutputAction::OutputAlphanumeric => AuthAction::ProvideAlphanumeric {
                    max_characters: size,
                },
                _ => AuthAction::ProvideNumeric {
                    max_digits: size,
                    action,
                },
            },
            AuthenticationMethod::InputOob { action, size } => {
                let mut rng = rand::thread_rng();
                match action {
                    InputAction::InputAlphanumeric => {
                        AuthAction::DisplayAlphanumeric(random_alphanumeric(&mut rng, size))
                    }
                    _ => AuthAction::DisplayNumber {
                        value: random_number(&mut rng, size),
                        action,
                    },
                }
            }
        };
        tracing::debug!(?action, "authentication action required");
        self.auth_action = Some(action.clone());
        self.events.push_back(ProvisioningEvent::AuthActionRequired(action));
    }

    fn check_auth_response(&mut self, expected: impl Fn(&AuthAction) -> bool) -> Result<(), ProvisioningError> {
        let err = if !self.bearer_open {
            ProvisioningError::BearerClosed
        } else if self.state != ProvisioningState::Provisioning || self.data.is_none() {
            ProvisioningError::InvalidState(self.state.name())
        } else if !self.auth_action.as_ref().is_some_and(expected) {
            ProvisioningError::InvalidState("no matching authentication action")
        } else {
            return Ok(());
        };
        self.fail(err.clone());
        Err(err)
    }

    fn complete_auth_response(&mut self, value: Result<Vec<u8>, ProvisioningError>) -> Result<(), ProvisioningError> {
        match value {
            Ok(value) => {
                self.events.push_back(ProvisioningEvent::InputComplete);
                self.auth_value_received(value);
                Ok(())
            }
            Err(err) => {
                self.fail(err.clone());
                Err(err)
            }
        }
    }

    fn auth_value_received(&mut self, value: Vec<u8>) {
        self.auth_action = None;
        let Some(data) = self.data.as_mut() else {
            self.fail(ProvisioningError::InvalidState("no session"));
            return;
        };
        match data.did_obtain_auth_value(&self.crypto, value) {
            Ok(()) => {
                if let Some(confirmation) = data.confirmation().map(<[u8]>::to_vec) {
                    self.send(ProvisioningPdu::Confirmation(confirmation), false);
                }
            }
            Err(err) => self.fail(err),
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn send(&mut self, pdu: ProvisioningPdu, accumulate: bool) {
        if accumulate && let Some(data) = self.data.as_mut() {
            data.accumulate(&pdu.parameters());
        }
        tracing::trace!(pdu_type = ?pdu.pdu_type(), "sending provisioning PDU");
        self.events.push_back(ProvisioningEvent::Send(pdu));
    }

    fn set_state(&mut self, state: ProvisioningState) {
        if self.state == state {
            return;
        }
        match &state {
            ProvisioningState::Failed(err) => {
                tracing::error!(from = self.state.name(), error = %err, "provisioning failed");
            }
            _ => tracing::debug!(from = self.state.name(), to = state.name(), "provisioning state changed"),
        }
        self.state = state.clone();
        self.events.push_back(ProvisioningEvent::StateChanged(state));
    }

    fn fail(&mut self, err: ProvisioningError) {
        self.set_state(ProvisioningState::Failed(err));
    }

    fn reset(&mut self) {
        self.auth_method = None;
        self.auth_action = None;
        self.capabilities = None;
        self.data = None;
        self.payload = None;
        self.security = Security::Insecure;
        self.set_state(ProvisioningState::Ready);
    }
}

impl<C: CryptoProvider> std::fmt::Debug for ProvisioningManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningManager")
            .field("state", &self.state)
            .field("bearer_open", &self.bearer_open)
            .field("unicast_address", &self.unicast_address)
            .finish_non_exhaustive()
    }
}
