//! End-to-end run of the stack inside one process.
//!
//! 1. A provisioner and a simulated device share a loopback bearer; the
//!    device is provisioned into the configured network.
//! 2. Both nodes get a Lower Transport service on an in-memory network,
//!    optionally lossy, and exchange segmented access messages in both
//!    directions.

use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use tokio::sync::mpsc;

use mesh_core::{Address, AddressRange, MeshNetwork, Node, ProvisioningCapabilities, SegmentKind};
use mesh_interfaces::{Bearer, LoopbackBearer};
use mesh_provisioning::ProvisioningDevice;
use mesh_transport::{LowerTransportLayer, OutgoingMessage, ReceivedMessage, SarParameters};

use crate::config::NodeConfig;
use crate::device::{DeviceOob, run_device};
use crate::error::NodeError;
use crate::network::{LocalNetwork, Loss, SequenceNumber};
use crate::provisioner::{Provisioner, ProvisioningOptions};
use crate::shutdown::Shutdown;
use crate::transport::TransportService;

pub struct DemoOptions {
    pub loss: Loss,
    /// Length of the access payload sent to the new node.
    pub payload_len: usize,
    /// Elements the simulated device reports.
    pub elements: u8,
    /// How long to wait for a message to arrive.
    pub receive_timeout: Duration,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            loss: Loss::None,
            payload_len: 60,
            elements: 2,
            receive_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
pub struct DemoReport {
    pub node: Node,
    /// Messages that reached their destination intact.
    pub messages_delivered: usize,
}

pub async fn run_demo(config: &NodeConfig, options: DemoOptions) -> Result<DemoReport, NodeError> {
    config.validate()?;
    let mut network = config.mesh_network()?;
    let local = config.network.local_address()?;
    let sar = config.sar.parameters(config.network.default_ttl()?);

    let node = provision_device(config, &mut network, options.elements).await?;
    tracing::info!(
        address = %node.unicast_address,
        elements = node.element_count,
        nodes = network.nodes.len(),
        "provisioning finished"
    );

    let messages_delivered = exchange_messages(
        &network,
        AddressRange::new(local, local),
        &node,
        sar,
        &options,
    )
    .await?;

    Ok(DemoReport {
        node,
        messages_delivered,
    })
}

async fn provision_device(
    config: &NodeConfig,
    network: &mut MeshNetwork,
    elements: u8,
) -> Result<Node, NodeError> {
    let (provisioner_bearer, device_bearer) = LoopbackBearer::pair();
    let provisioner_bearer = provisioner_bearer.with_name("provisioner");
    let device_bearer = device_bearer.with_name("device");

    let static_key = config.provisioning.static_oob_key()?;
    let mut device = ProvisioningDevice::new(ProvisioningCapabilities {
        number_of_elements: elements.max(1),
        ..ProvisioningCapabilities::default()
    });
    if let Some(key) = static_key {
        device = device.with_static_oob(key.to_vec());
    }

    let device_task = tokio::spawn(async move {
        let payload = run_device(&device_bearer, &mut device, DeviceOob::default()).await?;
        Ok::<_, NodeError>((payload, device.device_key()))
    });

    let mut uuid = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut uuid);
    tracing::info!(uuid = %hex::encode(uuid), "provisioning simulated device");

    let options = ProvisioningOptions::from_config(&config.provisioning)?;
    let node = Provisioner::new(&provisioner_bearer, options)
        .provision(network, uuid)
        .await;
    let node = match node {
        Ok(node) => node,
        Err(err) => {
            device_task.abort();
            return Err(err);
        }
    };

    let (payload, device_key) = device_task.await??;
    provisioner_bearer.close().await?;

    if payload.unicast_address != node.unicast_address {
        return Err(NodeError::Mismatch("unicast address"));
    }
    if device_key != Some(node.device_key) {
        return Err(NodeError::Mismatch("device key"));
    }
    Ok(node)
}

struct Endpoint {
    transport: Arc<TransportService>,
    sequence: Arc<SequenceNumber>,
    inbound: mpsc::UnboundedReceiver<ReceivedMessage>,
}

async fn exchange_messages(
    network: &MeshNetwork,
    local: AddressRange,
    node: &Node,
    sar: SarParameters,
    options: &DemoOptions,
) -> Result<usize, NodeError> {
    let shutdown = Shutdown::new();
    let mut local_network = LocalNetwork::new(network.iv_index.index).with_loss(options.loss.clone());

    let mut endpoint = |range: AddressRange| {
        let (service, channels) = TransportService::new(LowerTransportLayer::new(range, sar));
        let transport = Arc::new(service);
        let sequence = Arc::new(SequenceNumber::default());
        local_network.attach(range, Arc::clone(&transport), channels.outbound, Arc::clone(&sequence));
        Endpoint {
            transport,
            sequence,
            inbound: channels.inbound,
        }
    };
    let mut provisioner = endpoint(local);
    let mut device = endpoint(node.address_range());

    for handle in local_network.spawn(&shutdown.subscribe()) {
        shutdown.add_task(handle).await;
    }
    for side in [&provisioner, &device] {
        let transport = Arc::clone(&side.transport);
        let stop = shutdown.subscribe();
        shutdown.add_task(tokio::spawn(async move { transport.run(stop).await })).await;
    }

    let result = async {
        let mut delivered = 0;
        let request: Vec<u8> = (0..options.payload_len).map(|i| i as u8).collect();
        send_and_receive(&provisioner, &mut device, node.unicast_address, request, options).await?;
        delivered += 1;

        let response = b"provisioned and reachable".to_vec();
        send_and_receive(&device, &mut provisioner, local.low, response, options).await?;
        delivered += 1;
        Ok::<_, NodeError>(delivered)
    }
    .await;

    shutdown.stop_and_join().await;
    result
}

async fn send_and_receive(
    from: &Endpoint,
    to: &mut Endpoint,
    destination: Address,
    payload: Vec<u8>,
    options: &DemoOptions,
) -> Result<(), NodeError> {
    let message = OutgoingMessage {
        destination,
        sequence: from.sequence.next(),
        ttl: None,
        kind: SegmentKind::Access {
            aid: None,
            szmic: false,
        },
        payload: payload.clone(),
        segmented: true,
    };
    from.transport.send(message).await?;

    let received = tokio::time::timeout(options.receive_timeout, to.inbound.recv())
        .await
        .map_err(|_| NodeError::Timeout("waiting for the message to arrive"))?
        .ok_or(NodeError::Shutdown)?;
    if received.payload != payload {
        return Err(NodeError::Mismatch("message payload"));
    }
    tracing::info!(
        src = %received.source,
        dst = %received.destination,
        len = received.payload.len(),
        "message delivered"
    );
    Ok(())
}
