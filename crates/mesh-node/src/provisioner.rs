//! Drives a [`ProvisioningManager`] over a [`Bearer`].
//!
//! The manager is sans-IO: it consumes PDUs and emits events. This module
//! pumps those events onto the bearer, answers authentication actions from
//! the configured static key or from an OOB channel, and feeds every
//! provisioning PDU the bearer delivers back into the manager.

use std::time::Duration;

use tokio::sync::mpsc;

use mesh_core::{AuthenticationMethod, MeshNetwork, Node, ProvisioningCapabilities};
use mesh_interfaces::{Bearer, BearerEvent, PduType};
use mesh_provisioning::{
    AuthAction, DevicePublicKey, OobValue, ProvisioningError, ProvisioningEvent,
    ProvisioningManager, ProvisioningState,
};

use crate::config::{AlgorithmPreference, ProvisioningSection};
use crate::error::NodeError;

/// How to provision a device.
#[derive(Debug, Clone)]
pub struct ProvisioningOptions {
    pub attention_timer: u8,
    pub algorithm: AlgorithmPreference,
    /// `None` picks the strongest method both sides can use.
    pub auth_method: Option<AuthenticationMethod>,
    pub static_key: Option<[u8; 16]>,
    pub public_key: DevicePublicKey,
    pub timeout: Duration,
}

impl Default for ProvisioningOptions {
    fn default() -> Self {
        Self {
            attention_timer: 5,
            algorithm: AlgorithmPreference::Strongest,
            auth_method: None,
            static_key: None,
            public_key: DevicePublicKey::InBand,
            timeout: Duration::from_secs(60),
        }
    }
}

impl ProvisioningOptions {
    pub fn from_config(section: &ProvisioningSection) -> Result<Self, NodeError> {
        Ok(Self {
            attention_timer: section.attention_timer,
            algorithm: section.algorithm,
            auth_method: None,
            static_key: section.static_oob_key()?,
            public_key: DevicePublicKey::InBand,
            timeout: section.timeout(),
        })
    }
}

/// Provisions devices over one bearer.
pub struct Provisioner<'a, B: Bearer> {
    bearer: &'a B,
    options: ProvisioningOptions,
    /// Values the user read off the device (output OOB).
    oob_input: Option<mpsc::UnboundedReceiver<OobValue>>,
    /// Where to show values the user types into the device (input OOB).
    oob_display: Option<mpsc::UnboundedSender<OobValue>>,
}

impl<'a, B: Bearer> Provisioner<'a, B> {
    pub fn new(bearer: &'a B, options: ProvisioningOptions) -> Self {
        Self {
            bearer,
            options,
            oob_input: None,
            oob_display: None,
        }
    }

    pub fn with_oob_input(mut self, input: mpsc::UnboundedReceiver<OobValue>) -> Self {
        self.oob_input = Some(input);
        self
    }

    pub fn with_oob_display(mut self, display: mpsc::UnboundedSender<OobValue>) -> Self {
        self.oob_display = Some(display);
        self
    }

    /// Authentication method for a device with `caps`.
    pub fn choose_auth_method(&self, caps: &ProvisioningCapabilities) -> AuthenticationMethod {
        if let Some(method) = self.options.auth_method {
            return method;
        }
        if self.options.static_key.is_some() && caps.supports_static_oob() {
            return AuthenticationMethod::StaticOob;
        }
        if self.oob_input.is_some()
            && caps.supports_output_oob()
            && let Some(&action) = caps.output_oob_actions.actions().first()
        {
            return AuthenticationMethod::OutputOob {
                action,
                size: caps.output_oob_size,
            };
        }
        if self.oob_display.is_some()
            && caps.supports_input_oob()
            && let Some(&action) = caps.input_oob_actions.actions().first()
        {
            return AuthenticationMethod::InputOob {
                action,
                size: caps.input_oob_size,
            };
        }
        AuthenticationMethod::NoOob
    }

    /// Provision the device with `uuid` and return the node added to
    /// `network`.
    pub async fn provision(
        &mut self,
        network: &mut MeshNetwork,
        uuid: [u8; 16],
    ) -> Result<Node, NodeError> {
        let timeout = self.options.timeout;
        match tokio::time::timeout(timeout, self.run(network, uuid)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(?timeout, "provisioning timed out");
                Err(NodeError::Timeout("waiting for provisioning to complete"))
            }
        }
    }

    async fn run(&mut self, network: &mut MeshNetwork, uuid: [u8; 16]) -> Result<Node, NodeError> {
        let mut manager = ProvisioningManager::new(uuid);
        if self.bearer.is_open() {
            manager.bearer_did_open();
            manager.identify(self.options.attention_timer)?;
        } else {
            self.bearer.open().await?;
        }

        let mut capabilities = None;
        loop {
            // Answering an auth action queues more PDUs; drain until empty
            // before waiting on the bearer.
            let events = manager.poll_events();
            let idle = events.is_empty();
            for event in events {
                match event {
                    ProvisioningEvent::Send(pdu) => {
                        tracing::trace!(pdu_type = ?pdu.pdu_type(), "sending provisioning PDU");
                        self.bearer.send(&pdu.encode(), PduType::ProvisioningPdu).await?;
                    }
                    ProvisioningEvent::StateChanged(ProvisioningState::CapabilitiesReceived(caps)) => {
                        capabilities = Some(caps);
                    }
                    ProvisioningEvent::StateChanged(ProvisioningState::Complete) => {
                        let node = network
                            .node(&uuid)
                            .cloned()
                            .ok_or(ProvisioningError::InvalidState("node missing after completion"))?;
                        tracing::info!(address = %node.unicast_address, elements = node.element_count, "device provisioned");
                        return Ok(node);
                    }
                    ProvisioningEvent::StateChanged(ProvisioningState::Failed(err)) => {
                        tracing::warn!(error = %err, "provisioning failed");
                        return Err(err.into());
                    }
                    ProvisioningEvent::StateChanged(state) => {
                        tracing::debug!(state = state.name(), "provisioning state changed");
                    }
                    ProvisioningEvent::AuthActionRequired(action) => {
                        self.answer(&mut manager, action).await?;
                    }
                    ProvisioningEvent::InputComplete => {
                        tracing::debug!("OOB input complete");
                    }
                    ProvisioningEvent::BearerReleased => {
                        return Err(ProvisioningError::BearerClosed.into());
                    }
                }
            }

            if !idle {
                continue;
            }

            if let Some(caps) = capabilities.take()
                && matches!(manager.state(), ProvisioningState::CapabilitiesReceived(_))
            {
                let algorithm = self
                    .options
                    .algorithm
                    .select(&caps.algorithms)
                    .ok_or(ProvisioningError::UnsupportedAlgorithm)?;
                let auth_method = self.choose_auth_method(&caps);
                manager.provision(network, algorithm, self.options.public_key, auth_method)?;
                continue;
            }

            let Some(event) = self.bearer.next_event().await else {
                manager.bearer_did_close();
                return Err(ProvisioningError::BearerClosed.into());
            };
            match event {
                BearerEvent::Opened => {
                    manager.bearer_did_open();
                    manager.identify(self.options.attention_timer)?;
                }
                BearerEvent::Closed(reason) => {
                    tracing::warn!(?reason, "bearer closed during provisioning");
                    manager.bearer_did_close();
                }
                BearerEvent::DataReceived {
                    data,
                    pdu_type: PduType::ProvisioningPdu,
                } => manager.handle_pdu(network, &data),
                BearerEvent::DataReceived { pdu_type, .. } => {
                    tracing::trace!(?pdu_type, "ignoring non-provisioning PDU");
                }
            }
        }
    }

    async fn answer(
        &mut self,
        manager: &mut ProvisioningManager,
        action: AuthAction,
    ) -> Result<(), NodeError> {
        match action {
            AuthAction::ProvideStaticKey => {
                let key = self
                    .options
                    .static_key
                    .ok_or_else(|| NodeError::Config("static OOB key not configured".into()))?;
                manager.provide_static_key(&key)?;
            }
            AuthAction::ProvideNumeric { max_digits, action } => {
                tracing::info!(?action, max_digits, "waiting for the number output by the device");
                match self.read_oob().await? {
                    OobValue::Numeric(value) => manager.provide_numeric(value)?,
                    OobValue::Alphanumeric(_) => return Err(ProvisioningError::InvalidOobValueFormat.into()),
                }
            }
            AuthAction::ProvideAlphanumeric { max_characters } => {
                tracing::info!(max_characters, "waiting for the text displayed by the device");
                match self.read_oob().await? {
                    OobValue::Alphanumeric(text) => manager.provide_alphanumeric(&text)?,
                    OobValue::Numeric(value) => manager.provide_alphanumeric(&value.to_string())?,
                }
            }
            AuthAction::DisplayNumber { value, action } => {
                tracing::info!(value, ?action, "enter this number on the device");
                self.display(OobValue::Numeric(value));
            }
            AuthAction::DisplayAlphanumeric(text) => {
                tracing::info!(%text, "enter this text on the device");
                self.display(OobValue::Alphanumeric(text));
            }
        }
        Ok(())
    }

    async fn read_oob(&mut self) -> Result<OobValue, NodeError> {
        let input = self
            .oob_input
            .as_mut()
            .ok_or_else(|| NodeError::Config("no OOB input available".into()))?;
        input.recv().await.ok_or(NodeError::Shutdown)
    }

    fn display(&self, value: OobValue) {
        if let Some(display) = &self.oob_display
            && display.send(value).is_err()
        {
            tracing::warn!("OOB display closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::provisioning::{InputOobActions, OutputOobActions, StaticOobType};
    use mesh_core::{InputAction, OutputAction};
    use mesh_interfaces::LoopbackBearer;

    fn rich_capabilities() -> ProvisioningCapabilities {
        ProvisioningCapabilities {
            static_oob_type: StaticOobType(StaticOobType::AVAILABLE),
            output_oob_size: 6,
            output_oob_actions: OutputOobActions(
                OutputAction::Blink.capability_bit() | OutputAction::OutputNumeric.capability_bit(),
            ),
            input_oob_size: 4,
            input_oob_actions: InputOobActions(InputAction::Push.capability_bit()),
            ..ProvisioningCapabilities::default()
        }
    }

    #[test]
    fn defaults_to_no_oob() {
        let (bearer, _peer) = LoopbackBearer::pair();
        let provisioner = Provisioner::new(&bearer, ProvisioningOptions::default());
        assert_eq!(
            provisioner.choose_auth_method(&rich_capabilities()),
            AuthenticationMethod::NoOob
        );
    }

    #[test]
    fn prefers_static_then_output_then_input() {
        let (bearer, _peer) = LoopbackBearer::pair();
        let caps = rich_capabilities();
        let (_input_tx, input_rx) = mpsc::unbounded_channel();
        let (display_tx, _display_rx) = mpsc::unbounded_channel();

        let options = ProvisioningOptions {
            static_key: Some([1; 16]),
            ..ProvisioningOptions::default()
        };
        let provisioner = Provisioner::new(&bearer, options);
        assert_eq!(provisioner.choose_auth_method(&caps), AuthenticationMethod::StaticOob);

        let provisioner = Provisioner::new(&bearer, ProvisioningOptions::default())
            .with_oob_input(input_rx)
            .with_oob_display(display_tx.clone());
        assert_eq!(
            provisioner.choose_auth_method(&caps),
            AuthenticationMethod::OutputOob {
                action: OutputAction::Blink,
                size: 6
            }
        );

        let provisioner =
            Provisioner::new(&bearer, ProvisioningOptions::default()).with_oob_display(display_tx);
        assert_eq!(
            provisioner.choose_auth_method(&caps),
            AuthenticationMethod::InputOob {
                action: InputAction::Push,
                size: 4
            }
        );
    }

    #[test]
    fn static_key_ignored_when_device_has_none() {
        let (bearer, _peer) = LoopbackBearer::pair();
        let options = ProvisioningOptions {
            static_key: Some([1; 16]),
            ..ProvisioningOptions::default()
        };
        let provisioner = Provisioner::new(&bearer, options);
        assert_eq!(
            provisioner.choose_auth_method(&ProvisioningCapabilities::default()),
            AuthenticationMethod::NoOob
        );
    }

    #[test]
    fn explicit_method_wins() {
        let (bearer, _peer) = LoopbackBearer::pair();
        let options = ProvisioningOptions {
            auth_method: Some(AuthenticationMethod::NoOob),
            static_key: Some([1; 16]),
            ..ProvisioningOptions::default()
        };
        let provisioner = Provisioner::new(&bearer, options);
        assert_eq!(
            provisioner.choose_auth_method(&rich_capabilities()),
            AuthenticationMethod::NoOob
        );
    }
}
