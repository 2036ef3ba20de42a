//! Async driver around the sans-IO Lower Transport layer.
//!
//! The layer lives behind a `tokio::sync::Mutex`; every entry point locks
//! it, feeds the current time, and dispatches the resulting events:
//! transmissions go to the network channel, reassembled messages to the
//! inbound channel, and completions wake the task awaiting that send.
//! [`TransportService::run`] sleeps until the layer's next deadline and
//! fires its timers.

use std::collections::HashMap;

use tokio::sync::{Mutex, Notify, mpsc, oneshot, watch};

use mesh_core::{Address, SeqZero};
use mesh_transport::{
    IncomingPdu, LowerTransportEvent, LowerTransportLayer, OutgoingMessage, OutgoingPdu,
    ReceivedMessage, TransportError,
};

type Waiter = oneshot::Sender<Result<(), TransportError>>;

struct State {
    layer: LowerTransportLayer,
    waiters: HashMap<(Address, SeqZero), Waiter>,
}

/// Receiving ends of the channels a [`TransportService`] writes to.
pub struct TransportChannels {
    /// PDUs for the network layer to encrypt and send.
    pub outbound: mpsc::UnboundedReceiver<OutgoingPdu>,
    /// Messages for the upper transport layer.
    pub inbound: mpsc::UnboundedReceiver<ReceivedMessage>,
}

pub struct TransportService {
    state: Mutex<State>,
    timers_changed: Notify,
    outbound: mpsc::UnboundedSender<OutgoingPdu>,
    inbound: mpsc::UnboundedSender<ReceivedMessage>,
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

impl TransportService {
    pub fn new(layer: LowerTransportLayer) -> (Self, TransportChannels) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let service = Self {
            state: Mutex::new(State {
                layer,
                waiters: HashMap::new(),
            }),
            timers_changed: Notify::new(),
            outbound: outbound_tx,
            inbound: inbound_tx,
        };
        let channels = TransportChannels {
            outbound: outbound_rx,
            inbound: inbound_rx,
        };
        (service, channels)
    }

    /// Feed one PDU from the network layer.
    pub async fn handle_network_pdu(&self, pdu: IncomingPdu) {
        let mut state = self.state.lock().await;
        let events = state.layer.handle_network_pdu(now(), pdu);
        self.dispatch(&mut state, events);
        self.timers_changed.notify_one();
    }

    /// Send a message and wait until it is delivered.
    ///
    /// Unsegmented and group messages complete as soon as they are handed
    /// to the network layer. Segmented unicast messages complete when the
    /// receiver acknowledges every segment, or fail with `Timeout`, `Busy`
    /// or `Cancelled`.
    pub async fn send(&self, message: OutgoingMessage) -> Result<(), TransportError> {
        let key = (message.destination, SeqZero::from_sequence(message.sequence));
        let completion = {
            let mut state = self.state.lock().await;
            let events = state.layer.send(now(), message)?;
            let (tx, rx) = oneshot::channel();
            state.waiters.insert(key, tx);
            self.dispatch(&mut state, events);
            if state.waiters.contains_key(&key) && !state.layer.is_sending(key.1) {
                // Went out unsegmented; nothing will acknowledge it.
                state.waiters.remove(&key);
                return Ok(());
            }
            self.timers_changed.notify_one();
            rx
        };
        completion.await.unwrap_or(Err(TransportError::Cancelled))
    }

    /// Bearer closed: drop all SAR state, failing in-flight sends with
    /// `Cancelled`.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        let events = state.layer.reset();
        self.dispatch(&mut state, events);
        self.timers_changed.notify_one();
    }

    /// Whether a message from `source` is being reassembled.
    pub async fn is_receiving_from(&self, source: Address) -> bool {
        self.state.lock().await.layer.is_receiving_from(source)
    }

    /// Fire timers until `shutdown` is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let deadline = self.state.lock().await.layer.next_deadline();
            let sleep = async {
                match deadline {
                    Some(deadline) => {
                        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    tracing::debug!("transport timer loop shutting down");
                    break;
                }
                _ = self.timers_changed.notified() => {}
                _ = sleep => {
                    let mut state = self.state.lock().await;
                    let events = state.layer.poll_timers(now());
                    self.dispatch(&mut state, events);
                }
            }
        }
    }

    fn dispatch(&self, state: &mut State, events: Vec<LowerTransportEvent>) {
        for event in events {
            match event {
                LowerTransportEvent::Transmit(pdu) => {
                    if self.outbound.send(pdu).is_err() {
                        tracing::warn!("network layer gone, dropping outgoing PDU");
                    }
                }
                LowerTransportEvent::Received(message) => {
                    if self.inbound.send(message).is_err() {
                        tracing::warn!("upper transport gone, dropping received message");
                    }
                }
                LowerTransportEvent::SendCompleted(completion) => {
                    let key = (completion.destination, completion.seq_zero);
                    match state.waiters.remove(&key) {
                        Some(waiter) => {
                            let _ = waiter.send(completion.result);
                        }
                        None => {
                            tracing::debug!(dst = %completion.destination, seq_zero = %completion.seq_zero, "completion without waiter");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use mesh_core::{AddressRange, SegmentKind};
    use mesh_transport::SarParameters;

    const LOCAL: Address = Address(0x0001);
    const PEER: Address = Address(0x0100);

    fn service() -> (TransportService, TransportChannels) {
        let layer = LowerTransportLayer::new(AddressRange::new(LOCAL, LOCAL), SarParameters::default());
        TransportService::new(layer)
    }

    fn message(destination: Address, sequence: u32, len: usize) -> OutgoingMessage {
        OutgoingMessage {
            destination,
            sequence,
            ttl: None,
            kind: SegmentKind::Access {
                aid: None,
                szmic: false,
            },
            payload: vec![0x5A; len],
            segmented: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unsegmented_send_completes_immediately() {
        let (service, mut channels) = service();
        service.send(message(PEER, 1, 10)).await.unwrap();
        assert!(channels.outbound.try_recv().is_ok());
        assert!(channels.outbound.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn group_send_completes_without_acks() {
        let (service, mut channels) = service();
        service.send(message(Address(0xC001), 1, 30)).await.unwrap();
        let mut segments = 0;
        while channels.outbound.try_recv().is_ok() {
            segments += 1;
        }
        assert_eq!(segments, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_send_times_out() {
        let (service, mut channels) = service();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let service = std::sync::Arc::new(service);
        let timers = {
            let service = std::sync::Arc::clone(&service);
            tokio::spawn(async move { service.run(shutdown_rx).await })
        };

        let result = service.send(message(PEER, 1, 30)).await;
        assert_eq!(result, Err(TransportError::Timeout));

        // Initial round plus five retransmission rounds of three segments.
        let mut sent = 0;
        while channels.outbound.try_recv().is_ok() {
            sent += 1;
        }
        assert_eq!(sent, 3 * 6);

        shutdown_tx.send(true).unwrap();
        timers.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cancels_in_flight_send() {
        let (service, _channels) = service();
        let service = std::sync::Arc::new(service);
        let sender = {
            let service = std::sync::Arc::clone(&service);
            tokio::spawn(async move { service.send(message(PEER, 7, 30)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        service.reset().await;
        assert_eq!(sender.await.unwrap(), Err(TransportError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_message_is_rejected() {
        let (service, _channels) = service();
        assert_eq!(
            service.send(message(PEER, 1, 0)).await,
            Err(TransportError::EmptyMessage)
        );
    }
}
