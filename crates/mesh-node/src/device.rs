//! Drives a [`ProvisioningDevice`] over a [`Bearer`].

use tokio::sync::mpsc;

use mesh_interfaces::{Bearer, BearerEvent, PduType};
use mesh_provisioning::{DeviceEvent, OobValue, ProvisioningDataPayload, ProvisioningDevice, ProvisioningError};

use crate::error::NodeError;

/// Out-of-band channels between a device and its user.
#[derive(Default)]
pub struct DeviceOob {
    /// Receives values the device blinks, beeps or displays.
    pub output: Option<mpsc::UnboundedSender<OobValue>>,
    /// Supplies values the user enters on the device.
    pub input: Option<mpsc::UnboundedReceiver<OobValue>>,
}

/// Answer a provisioner until the device is provisioned.
///
/// A link that closes mid-session resets the device, which then waits for
/// the next Invite. Returns once the Complete PDU has been sent.
pub async fn run_device<B: Bearer>(
    bearer: &B,
    device: &mut ProvisioningDevice,
    mut oob: DeviceOob,
) -> Result<ProvisioningDataPayload, NodeError> {
    loop {
        let events = device.poll_events();
        let idle = events.is_empty();
        for event in events {
            match event {
                DeviceEvent::Send(pdu) => {
                    bearer.send(&pdu.encode(), PduType::ProvisioningPdu).await?;
                }
                DeviceEvent::Attention(seconds) => {
                    tracing::info!(seconds, "attention requested");
                }
                DeviceEvent::OutputOob { action, value } => {
                    tracing::info!(?action, ?value, "output OOB");
                    if let Some(output) = &oob.output
                        && output.send(value).is_err()
                    {
                        tracing::warn!("OOB output closed");
                    }
                }
                DeviceEvent::InputRequested { action, size } => {
                    tracing::info!(?action, size, "waiting for OOB input");
                    let input = oob
                        .input
                        .as_mut()
                        .ok_or_else(|| NodeError::Config("device has no OOB input".into()))?;
                    match input.recv().await.ok_or(NodeError::Shutdown)? {
                        OobValue::Numeric(value) => device.input_numeric(value)?,
                        OobValue::Alphanumeric(text) => device.input_alphanumeric(&text)?,
                    }
                }
                DeviceEvent::Provisioned => {
                    let payload = device
                        .provisioned()
                        .cloned()
                        .ok_or(ProvisioningError::InvalidState("provisioned without data"))?;
                    tracing::debug!(address = %payload.unicast_address, "device session complete");
                    return Ok(payload);
                }
                DeviceEvent::Failed(code) => {
                    tracing::warn!(error = %code, "device provisioning failed");
                    return Err(NodeError::DeviceFailed(code));
                }
            }
        }

        // OOB input queues InputComplete.
        if !idle {
            continue;
        }

        let Some(event) = bearer.next_event().await else {
            return Err(ProvisioningError::BearerClosed.into());
        };
        match event {
            BearerEvent::Opened => tracing::debug!("provisioning link opened"),
            BearerEvent::Closed(reason) => {
                tracing::debug!(?reason, "provisioning link closed, resetting device");
                device.reset();
            }
            BearerEvent::DataReceived {
                data,
                pdu_type: PduType::ProvisioningPdu,
            } => device.handle_pdu(&data),
            BearerEvent::DataReceived { pdu_type, .. } => {
                tracing::trace!(?pdu_type, "ignoring non-provisioning PDU");
            }
        }
    }
}
