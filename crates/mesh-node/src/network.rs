//! In-memory network layer connecting transport services.
//!
//! Stands in for the encrypted network layer and the advertising bearer:
//! each attached node gets a task that takes its outgoing lower transport
//! PDUs, stamps them with the node's next sequence number, and hands them to
//! every other node the destination addresses. An optional loss model drops
//! PDUs on the way.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use mesh_core::constants::SEQ_MASK;
use mesh_core::{Address, AddressRange};
use mesh_transport::{IncomingPdu, OutgoingPdu};

use crate::transport::TransportService;

/// 24-bit sequence number source of one node. Messages and the network PDUs
/// carrying them draw from the same counter.
#[derive(Debug, Default)]
pub struct SequenceNumber(AtomicU32);

impl SequenceNumber {
    pub fn new(start: u32) -> Self {
        Self(AtomicU32::new(start & SEQ_MASK))
    }

    pub fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) & SEQ_MASK
    }

    pub fn current(&self) -> u32 {
        self.0.load(Ordering::SeqCst) & SEQ_MASK
    }
}

/// Decides whether a PDU from `source` is lost.
pub type LossFilter = Arc<dyn Fn(Address, &OutgoingPdu) -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub enum Loss {
    #[default]
    None,
    /// Drop each PDU with this probability, in percent.
    Random(u8),
    Filter(LossFilter),
}

impl Loss {
    fn drops(&self, source: Address, pdu: &OutgoingPdu) -> bool {
        match self {
            Loss::None => false,
            Loss::Random(percent) => rand::thread_rng().gen_range(0..100) < u32::from(*percent),
            Loss::Filter(filter) => filter(source, pdu),
        }
    }
}

struct Member {
    range: AddressRange,
    transport: Arc<TransportService>,
    sequence: Arc<SequenceNumber>,
    outbound: mpsc::UnboundedReceiver<OutgoingPdu>,
}

pub struct LocalNetwork {
    iv_index: u32,
    loss: Loss,
    members: Vec<Member>,
}

impl LocalNetwork {
    pub fn new(iv_index: u32) -> Self {
        Self {
            iv_index,
            loss: Loss::None,
            members: Vec::new(),
        }
    }

    pub fn with_loss(mut self, loss: Loss) -> Self {
        self.loss = loss;
        self
    }

    /// Attach a node whose elements cover `range`.
    pub fn attach(
        &mut self,
        range: AddressRange,
        transport: Arc<TransportService>,
        outbound: mpsc::UnboundedReceiver<OutgoingPdu>,
        sequence: Arc<SequenceNumber>,
    ) {
        self.members.push(Member {
            range,
            transport,
            sequence,
            outbound,
        });
    }

    /// Start one forwarding task per attached node.
    pub fn spawn(self, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let peers: Arc<Vec<(AddressRange, Arc<TransportService>)>> = Arc::new(
            self.members
                .iter()
                .map(|member| (member.range, Arc::clone(&member.transport)))
                .collect(),
        );

        self.members
            .into_iter()
            .map(|member| {
                let peers = Arc::clone(&peers);
                let loss = self.loss.clone();
                let iv_index = self.iv_index;
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let Member {
                        range,
                        sequence,
                        mut outbound,
                        ..
                    } = member;
                    loop {
                        tokio::select! {
                            biased;
                            _ = shutdown.changed() => break,
                            pdu = outbound.recv() => {
                                let Some(pdu) = pdu else { break };
                                forward(&peers, range, &sequence, iv_index, &loss, pdu).await;
                            }
                        }
                    }
                    tracing::debug!(node = %range.low, "network bridge stopped");
                })
            })
            .collect()
    }
}

async fn forward(
    peers: &[(AddressRange, Arc<TransportService>)],
    range: AddressRange,
    sequence: &SequenceNumber,
    iv_index: u32,
    loss: &Loss,
    pdu: OutgoingPdu,
) {
    let sequence = sequence.next();
    if loss.drops(range.low, &pdu) {
        tracing::trace!(src = %range.low, dst = %pdu.destination, seq = sequence, "PDU lost");
        return;
    }
    for (peer_range, transport) in peers {
        if *peer_range == range {
            continue;
        }
        if !(pdu.destination.is_multicast() || peer_range.contains(pdu.destination)) {
            continue;
        }
        transport
            .handle_network_pdu(IncomingPdu {
                source: range.low,
                destination: pdu.destination,
                ttl: pdu.ttl,
                sequence,
                iv_index,
                control: pdu.control,
                transport_pdu: pdu.transport_pdu.clone(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_wraps_at_24_bits() {
        let sequence = SequenceNumber::new(0x00FF_FFFF);
        assert_eq!(sequence.next(), 0x00FF_FFFF);
        assert_eq!(sequence.next(), 0);
        assert_eq!(sequence.current(), 1);
    }

    #[test]
    fn loss_models() {
        let pdu = OutgoingPdu {
            destination: Address(0x0100),
            ttl: 5,
            control: false,
            transport_pdu: vec![0],
        };
        assert!(!Loss::None.drops(Address(1), &pdu));
        assert!(!Loss::Random(0).drops(Address(1), &pdu));
        assert!(Loss::Random(100).drops(Address(1), &pdu));
        let only_from_one = Loss::Filter(Arc::new(|source: Address, _: &OutgoingPdu| source == Address(1)));
        assert!(only_from_one.drops(Address(1), &pdu));
        assert!(!only_from_one.drops(Address(2), &pdu));
    }
}
