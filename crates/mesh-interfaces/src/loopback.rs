//! In-memory bearer pair connected by tokio channels.
//!
//! Each end segments outgoing PDUs to its MTU with the proxy SAR framing
//! and reassembles what arrives, so a loopback link exercises the same
//! framing a GATT proxy connection would.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc};

use crate::error::BearerError;
use crate::framing::{ProxyReassembler, segment};
use crate::traits::{Bearer, BearerEvent, DEFAULT_MTU, PduType, PduTypes};

#[derive(Debug)]
enum Signal {
    Packet(Vec<u8>),
    Event(BearerEvent),
}

struct Inbox {
    rx: mpsc::UnboundedReceiver<Signal>,
    reassembler: ProxyReassembler,
}

/// One end of an in-memory link. Create both ends with [`LoopbackBearer::pair`].
///
/// The link is shared: opening either end opens both, and closing either
/// end reports `Closed(None)` locally and `Closed(Some(LinkClosed))` to the
/// peer.
pub struct LoopbackBearer {
    name: String,
    mtu: usize,
    supported: PduTypes,
    link_up: Arc<AtomicBool>,
    /// Our own inbox, held weakly so the channel ends when the peer is dropped.
    own_tx: mpsc::WeakUnboundedSender<Signal>,
    peer_tx: mpsc::UnboundedSender<Signal>,
    inbox: Mutex<Inbox>,
}

impl LoopbackBearer {
    /// Two connected ends with the default MTU, carrying every PDU type.
    pub fn pair() -> (LoopbackBearer, LoopbackBearer) {
        Self::pair_with(DEFAULT_MTU, PduTypes::ALL)
    }

    pub fn pair_with(mtu: usize, supported: PduTypes) -> (LoopbackBearer, LoopbackBearer) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let link_up = Arc::new(AtomicBool::new(false));

        let a = LoopbackBearer::end("loopback[a]", mtu, supported, &link_up, &a_tx, b_tx.clone(), a_rx);
        let b = LoopbackBearer::end("loopback[b]", mtu, supported, &link_up, &b_tx, a_tx, b_rx);
        (a, b)
    }

    fn end(
        name: &str,
        mtu: usize,
        supported: PduTypes,
        link_up: &Arc<AtomicBool>,
        own_tx: &mpsc::UnboundedSender<Signal>,
        peer_tx: mpsc::UnboundedSender<Signal>,
        rx: mpsc::UnboundedReceiver<Signal>,
    ) -> Self {
        Self {
            name: name.to_string(),
            mtu: mtu.max(2),
            supported,
            link_up: Arc::clone(link_up),
            own_tx: own_tx.downgrade(),
            peer_tx,
            inbox: Mutex::new(Inbox {
                rx,
                reassembler: ProxyReassembler::new(),
            }),
        }
    }

    /// Rename this end, e.g. after the role it plays.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn notify_self(&self, event: BearerEvent) -> Result<(), BearerError> {
        let tx = self.own_tx.upgrade().ok_or(BearerError::LinkClosed)?;
        tx.send(Signal::Event(event))
            .map_err(|_| BearerError::LinkClosed)
    }

    fn notify_peer(&self, event: BearerEvent) -> Result<(), BearerError> {
        self.peer_tx
            .send(Signal::Event(event))
            .map_err(|_| BearerError::LinkClosed)
    }
}

impl Bearer for LoopbackBearer {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_pdu_types(&self) -> PduTypes {
        self.supported
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn is_open(&self) -> bool {
        self.link_up.load(Ordering::SeqCst)
    }

    async fn open(&self) -> Result<(), BearerError> {
        if self.link_up.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!(bearer = %self.name, "loopback link opened");
        let result = self
            .notify_self(BearerEvent::Opened)
            .and_then(|()| self.notify_peer(BearerEvent::Opened));
        if result.is_err() {
            self.link_up.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn close(&self) -> Result<(), BearerError> {
        if !self.link_up.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!(bearer = %self.name, "loopback link closed");
        // Either side may already be gone; closing still succeeds.
        let _ = self.notify_self(BearerEvent::Closed(None));
        let _ = self.notify_peer(BearerEvent::Closed(Some(BearerError::LinkClosed)));
        Ok(())
    }

    async fn send(&self, data: &[u8], pdu_type: PduType) -> Result<(), BearerError> {
        if !self.is_open() {
            return Err(BearerError::NotOpen);
        }
        if !self.supports(pdu_type) {
            return Err(BearerError::UnsupportedPduType(pdu_type));
        }
        let packets = segment(data, pdu_type, self.mtu);
        tracing::trace!(bearer = %self.name, ?pdu_type, len = data.len(), packets = packets.len(), "sending");
        for packet in packets {
            if self.peer_tx.send(Signal::Packet(packet)).is_err() {
                self.link_up.store(false, Ordering::SeqCst);
                return Err(BearerError::SendFailed(format!("{}: peer dropped", self.name)));
            }
        }
        Ok(())
    }

    async fn next_event(&self) -> Option<BearerEvent> {
        let mut inbox = self.inbox.lock().await;
        loop {
            match inbox.rx.recv().await? {
                Signal::Event(event) => {
                    if matches!(event, BearerEvent::Closed(Some(_))) {
                        self.link_up.store(false, Ordering::SeqCst);
                    }
                    return Some(event);
                }
                Signal::Packet(packet) => {
                    if let Some((data, pdu_type)) = inbox.reassembler.feed(&packet) {
                        return Some(BearerEvent::DataReceived { data, pdu_type });
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for LoopbackBearer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackBearer")
            .field("name", &self.name)
            .field("mtu", &self.mtu)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn pre_open_conformance() {
        let (a, b) = LoopbackBearer::pair();
        testing::assert_capabilities_consistent(&a);
        testing::assert_pre_open_conformance(&a).await;
        testing::assert_pre_open_conformance(&b).await;
    }

    #[tokio::test]
    async fn close_conformance() {
        let (a, _b) = LoopbackBearer::pair();
        a.open().await.unwrap();
        testing::assert_close_conformance(&a).await;
    }

    #[tokio::test]
    async fn open_is_reported_on_both_ends() {
        let (a, b) = LoopbackBearer::pair();
        a.open().await.unwrap();
        assert!(a.is_open() && b.is_open());
        assert_eq!(a.next_event().await, Some(BearerEvent::Opened));
        assert_eq!(b.next_event().await, Some(BearerEvent::Opened));
    }

    #[tokio::test]
    async fn large_pdu_crosses_small_mtu() {
        let (a, b) = LoopbackBearer::pair_with(20, PduTypes::ALL);
        a.open().await.unwrap();
        let _ = b.next_event().await;

        let pdu: Vec<u8> = (0..65u8).collect();
        a.send(&pdu, PduType::ProvisioningPdu).await.unwrap();
        assert_eq!(
            b.next_event().await,
            Some(BearerEvent::DataReceived {
                data: pdu,
                pdu_type: PduType::ProvisioningPdu,
            })
        );
    }

    #[tokio::test]
    async fn close_reports_link_closed_to_peer() {
        let (a, b) = LoopbackBearer::pair();
        b.open().await.unwrap();
        let _ = a.next_event().await;
        let _ = b.next_event().await;

        b.close().await.unwrap();
        assert_eq!(b.next_event().await, Some(BearerEvent::Closed(None)));
        assert_eq!(
            a.next_event().await,
            Some(BearerEvent::Closed(Some(BearerError::LinkClosed)))
        );
        assert_eq!(a.send(&[1], PduType::NetworkPdu).await, Err(BearerError::NotOpen));
    }

    #[tokio::test]
    async fn unsupported_pdu_type_is_rejected() {
        let (a, _b) = LoopbackBearer::pair_with(20, PduTypes::PROVISIONING_PDU);
        a.open().await.unwrap();
        assert_eq!(
            a.send(&[1], PduType::NetworkPdu).await,
            Err(BearerError::UnsupportedPduType(PduType::NetworkPdu))
        );
    }

    #[tokio::test]
    async fn dropped_peer_ends_event_stream() {
        let (a, b) = LoopbackBearer::pair();
        a.open().await.unwrap();
        drop(b);
        assert_eq!(a.next_event().await, Some(BearerEvent::Opened));
        assert_eq!(a.next_event().await, None);
        assert!(matches!(
            a.send(&[1], PduType::NetworkPdu).await,
            Err(BearerError::SendFailed(_))
        ));
    }
}
