//! Core bearer trait and event types.

use crate::error::BearerError;

/// Smallest GATT MTU usable for proxy PDUs (ATT MTU 23 minus the 3-byte
/// ATT header).
pub const DEFAULT_MTU: usize = 20;

/// Kind of PDU carried by a bearer. The value is the proxy PDU message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PduType {
    NetworkPdu = 0x00,
    MeshBeacon = 0x01,
    ProxyConfiguration = 0x02,
    ProvisioningPdu = 0x03,
}

impl PduType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::NetworkPdu),
            0x01 => Some(Self::MeshBeacon),
            0x02 => Some(Self::ProxyConfiguration),
            0x03 => Some(Self::ProvisioningPdu),
            _ => None,
        }
    }

    fn mask(self) -> u8 {
        1 << self as u8
    }
}

/// Set of [`PduType`]s a bearer can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PduTypes(pub u8);

impl PduTypes {
    pub const NETWORK_PDU: PduTypes = PduTypes(1 << 0);
    pub const MESH_BEACON: PduTypes = PduTypes(1 << 1);
    pub const PROXY_CONFIGURATION: PduTypes = PduTypes(1 << 2);
    pub const PROVISIONING_PDU: PduTypes = PduTypes(1 << 3);
    pub const ALL: PduTypes = PduTypes(0x0F);

    pub fn contains(self, pdu_type: PduType) -> bool {
        self.0 & pdu_type.mask() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for PduTypes {
    type Output = PduTypes;

    fn bitor(self, rhs: PduTypes) -> PduTypes {
        PduTypes(self.0 | rhs.0)
    }
}

/// Async trait implemented by every bearer (loopback, GATT proxy, PB-ADV).
///
/// Protocol state machines produce PDUs as events rather than performing I/O
/// directly; a bearer moves those bytes to the peer and reports what comes
/// back through [`next_event`](Bearer::next_event).
pub trait Bearer: Send + Sync {
    /// Human-readable name (e.g. "loopback[provisioner]").
    fn name(&self) -> &str;

    fn supported_pdu_types(&self) -> PduTypes;

    fn supports(&self, pdu_type: PduType) -> bool {
        self.supported_pdu_types().contains(pdu_type)
    }

    /// Largest packet the link carries, including the proxy header byte.
    fn mtu(&self) -> usize {
        DEFAULT_MTU
    }

    fn is_open(&self) -> bool;

    /// Open the link. Emits [`BearerEvent::Opened`].
    fn open(&self) -> impl Future<Output = Result<(), BearerError>> + Send;

    /// Close the link. Emits [`BearerEvent::Closed`] with no error.
    fn close(&self) -> impl Future<Output = Result<(), BearerError>> + Send;

    /// Send one complete PDU, segmenting it to the MTU if needed.
    fn send(
        &self,
        data: &[u8],
        pdu_type: PduType,
    ) -> impl Future<Output = Result<(), BearerError>> + Send;

    /// Wait for the next event. `None` once the bearer is gone for good.
    fn next_event(&self) -> impl Future<Output = Option<BearerEvent>> + Send;
}

/// Events emitted by a bearer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BearerEvent {
    Opened,
    /// The link went down; `None` when closed locally.
    Closed(Option<BearerError>),
    /// A complete PDU arrived.
    DataReceived { data: Vec<u8>, pdu_type: PduType },
}
