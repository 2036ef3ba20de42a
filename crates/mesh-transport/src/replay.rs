//! Replay protection keyed by source address.
//!
//! Each source remembers the last accepted SeqAuth and the one before it. A
//! PDU is accepted when its SeqAuth is newer than the last, equal to the last
//! while the same segmented message is still being reassembled, or falls
//! strictly between the previous and the last (a message processed after its
//! successor, which could never have been seen before).

use std::collections::HashMap;

use mesh_core::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SeqAuthRecord {
    last: u64,
    previous: Option<u64>,
}

/// Why a PDU was accepted. Returned so callers can log it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayVerdict {
    /// First PDU from this source, or newer than anything seen.
    Fresh,
    /// Same SeqAuth as the last one while reassembly is active.
    SameMessage,
    /// Older than the last but newer than the previous.
    LateArrival,
    Replayed,
}

impl ReplayVerdict {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, ReplayVerdict::Replayed)
    }
}

#[derive(Debug, Default)]
pub struct ReplayCache {
    entries: HashMap<Address, SeqAuthRecord>,
}

impl ReplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check `received` against the stored values for `source` and record
    /// it if accepted.
    ///
    /// `sar_active` is true when a segmented message with this SeqAuth is
    /// being reassembled or was acknowledged.
    pub fn check(&mut self, source: Address, received: u64, sar_active: bool) -> ReplayVerdict {
        let Some(record) = self.entries.get_mut(&source) else {
            self.entries.insert(
                source,
                SeqAuthRecord {
                    last: received,
                    previous: None,
                },
            );
            return ReplayVerdict::Fresh;
        };

        let late = record
            .previous
            .is_some_and(|previous| previous < received && received < record.last);

        let verdict = if received > record.last {
            ReplayVerdict::Fresh
        } else if received == record.last && sar_active {
            ReplayVerdict::SameMessage
        } else if late {
            ReplayVerdict::LateArrival
        } else {
            tracing::warn!(
                src = %source,
                seq_auth = received,
                last = record.last,
                "discarding replayed PDU"
            );
            return ReplayVerdict::Replayed;
        };

        match verdict {
            ReplayVerdict::Fresh => {
                record.previous = Some(record.last);
                record.last = received;
            }
            ReplayVerdict::LateArrival => record.previous = Some(received),
            ReplayVerdict::SameMessage | ReplayVerdict::Replayed => {}
        }
        verdict
    }

    /// Last accepted SeqAuth for `source`.
    pub fn last_seq_auth(&self, source: Address) -> Option<u64> {
        self.entries.get(&source).map(|record| record.last)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
