//! Proxy protocol SAR framing for MTU-limited bearers.
//!
//! Every packet starts with one header byte: the top two bits are the SAR
//! field and the low six bits the [`PduType`]. A PDU that does not fit in
//! `mtu - 1` bytes is split into a first segment, zero or more
//! continuations and a last segment, all with the same message type.

use crate::traits::PduType;

const SAR_COMPLETE: u8 = 0b00;
const SAR_FIRST: u8 = 0b01;
const SAR_CONTINUATION: u8 = 0b10;
const SAR_LAST: u8 = 0b11;

const TYPE_MASK: u8 = 0b0011_1111;

fn header(sar: u8, pdu_type: PduType) -> u8 {
    (sar << 6) | pdu_type as u8
}

/// Split `data` into proxy packets of at most `mtu` bytes each.
///
/// An `mtu` below 2 is treated as 2, one header byte and one data byte.
pub fn segment(data: &[u8], pdu_type: PduType, mtu: usize) -> Vec<Vec<u8>> {
    let chunk = mtu.max(2) - 1;
    if data.len() <= chunk {
        let mut packet = Vec::with_capacity(data.len() + 1);
        packet.push(header(SAR_COMPLETE, pdu_type));
        packet.extend_from_slice(data);
        return vec![packet];
    }

    let count = data.len().div_ceil(chunk);
    data.chunks(chunk)
        .enumerate()
        .map(|(i, part)| {
            let sar = match i {
                0 => SAR_FIRST,
                i if i + 1 == count => SAR_LAST,
                _ => SAR_CONTINUATION,
            };
            let mut packet = Vec::with_capacity(part.len() + 1);
            packet.push(header(sar, pdu_type));
            packet.extend_from_slice(part);
            packet
        })
        .collect()
}

/// Stateful reassembler for incoming proxy packets.
///
/// - Continuations and last segments without a first segment are dropped.
/// - A segment whose type differs from the message in progress is dropped.
/// - A new complete message or first segment discards any partial message.
#[derive(Debug, Default)]
pub struct ProxyReassembler {
    pending: Option<(PduType, Vec<u8>)>,
}

impl ProxyReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a segmented message is partially received.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Feed one packet. Returns the PDU once its last segment arrives.
    pub fn feed(&mut self, packet: &[u8]) -> Option<(Vec<u8>, PduType)> {
        let (&first, body) = packet.split_first()?;
        let Some(pdu_type) = PduType::from_u8(first & TYPE_MASK) else {
            tracing::trace!(header = first, "dropping proxy packet of unknown type");
            return None;
        };

        match first >> 6 {
            SAR_COMPLETE => {
                if self.pending.take().is_some() {
                    tracing::debug!("complete message discarded partial proxy PDU");
                }
                Some((body.to_vec(), pdu_type))
            }
            SAR_FIRST => {
                if self.pending.is_some() {
                    tracing::debug!("first segment discarded partial proxy PDU");
                }
                self.pending = Some((pdu_type, body.to_vec()));
                None
            }
            sar => {
                let Some((pending_type, buffer)) = self.pending.as_mut() else {
                    tracing::trace!(sar, "dropping segment without first segment");
                    return None;
                };
                if *pending_type != pdu_type {
                    tracing::trace!(?pdu_type, expected = ?pending_type, "dropping segment of another type");
                    return None;
                }
                buffer.extend_from_slice(body);
                if sar == SAR_LAST {
                    self.pending.take().map(|(pdu_type, data)| (data, pdu_type))
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_pdu(n: usize) -> Vec<u8> {
        (0..n).map(|i| i as u8).collect()
    }

    #[test]
    fn single_complete_packet() {
        let pdu = fake_pdu(19);
        let packets = segment(&pdu, PduType::ProvisioningPdu, 20);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0][0], 0x03);

        let mut reassembler = ProxyReassembler::new();
        assert_eq!(
            reassembler.feed(&packets[0]),
            Some((pdu, PduType::ProvisioningPdu))
        );
    }

    #[test]
    fn segment_headers() {
        let packets = segment(&fake_pdu(50), PduType::NetworkPdu, 20);
        let headers: Vec<u8> = packets.iter().map(|p| p[0]).collect();
        assert_eq!(headers, vec![0x40, 0x80, 0xC0]);
        assert_eq!(packets[0].len(), 20);
        assert_eq!(packets[2].len(), 1 + 50 - 38);
    }

    #[test]
    fn segmented_pdu_reassembles() {
        let pdu = fake_pdu(65);
        let packets = segment(&pdu, PduType::ProvisioningPdu, 20);
        assert_eq!(packets.len(), 4);

        let mut reassembler = ProxyReassembler::new();
        for packet in &packets[..3] {
            assert!(reassembler.feed(packet).is_none());
            assert!(reassembler.is_pending());
        }
        assert_eq!(
            reassembler.feed(&packets[3]),
            Some((pdu, PduType::ProvisioningPdu))
        );
        assert!(!reassembler.is_pending());
    }

    #[test]
    fn exact_fit_is_not_segmented() {
        assert_eq!(segment(&fake_pdu(19), PduType::MeshBeacon, 20).len(), 1);
        assert_eq!(segment(&fake_pdu(20), PduType::MeshBeacon, 20).len(), 2);
    }

    #[test]
    fn empty_pdu_is_header_only() {
        let packets = segment(&[], PduType::ProxyConfiguration, 20);
        assert_eq!(packets, vec![vec![0x02]]);
    }

    #[test]
    fn continuation_without_first_is_dropped() {
        let packets = segment(&fake_pdu(40), PduType::NetworkPdu, 20);
        let mut reassembler = ProxyReassembler::new();
        assert!(reassembler.feed(&packets[1]).is_none());
        assert!(reassembler.feed(&packets[2]).is_none());
        assert!(!reassembler.is_pending());
    }

    #[test]
    fn segment_of_other_type_is_dropped() {
        let net = segment(&fake_pdu(40), PduType::NetworkPdu, 20);
        let prov = segment(&fake_pdu(40), PduType::ProvisioningPdu, 20);
        let mut reassembler = ProxyReassembler::new();
        reassembler.feed(&net[0]);
        assert!(reassembler.feed(&prov[1]).is_none());
        reassembler.feed(&net[1]);
        assert_eq!(
            reassembler.feed(&net[2]),
            Some((fake_pdu(40), PduType::NetworkPdu))
        );
    }

    #[test]
    fn new_first_segment_discards_partial() {
        let old = segment(&[0xAA; 40], PduType::NetworkPdu, 20);
        let new = segment(&[0xBB; 30], PduType::NetworkPdu, 20);
        let mut reassembler = ProxyReassembler::new();
        reassembler.feed(&old[0]);
        reassembler.feed(&old[1]);
        reassembler.feed(&new[0]);
        assert_eq!(
            reassembler.feed(&new[1]),
            Some((vec![0xBB; 30], PduType::NetworkPdu))
        );
    }

    #[test]
    fn complete_message_discards_partial() {
        let old = segment(&[0xAA; 40], PduType::NetworkPdu, 20);
        let mut reassembler = ProxyReassembler::new();
        reassembler.feed(&old[0]);
        assert_eq!(
            reassembler.feed(&[0x00, 0x01]),
            Some((vec![0x01], PduType::NetworkPdu))
        );
        assert!(!reassembler.is_pending());
        assert!(reassembler.feed(&old[2]).is_none());
    }

    #[test]
    fn unknown_type_and_empty_packets_are_dropped() {
        let mut reassembler = ProxyReassembler::new();
        assert!(reassembler.feed(&[]).is_none());
        assert!(reassembler.feed(&[0x04, 0x01]).is_none());
        assert!(reassembler.feed(&[0x3F]).is_none());
    }

    #[test]
    fn tiny_mtu_carries_one_byte_per_packet() {
        let packets = segment(&[1, 2, 3], PduType::NetworkPdu, 0);
        assert_eq!(packets.len(), 3);
        assert!(packets.iter().all(|p| p.len() == 2));
    }
}
