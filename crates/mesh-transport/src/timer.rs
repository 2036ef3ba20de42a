//! Runtime-independent timer queue.
//!
//! Engines schedule keyed deadlines here and the owner polls with the
//! current time. Nothing in this module sleeps; the async driver in the node
//! crate sleeps until [`TimerQueue::next_deadline`] and then calls
//! [`TimerQueue::expired`].

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

/// Handle for cancelling a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

/// Deadlines ordered by time, then by scheduling order.
#[derive(Debug)]
pub struct TimerQueue<K> {
    next_id: u64,
    by_deadline: BTreeMap<(Instant, TimerId), K>,
    deadlines: HashMap<TimerId, Instant>,
}

impl<K> TimerQueue<K> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            by_deadline: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }

    pub fn schedule(&mut self, deadline: Instant, key: K) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.by_deadline.insert((deadline, id), key);
        self.deadlines.insert(id, deadline);
        id
    }

    /// Cancel a timer. Returns its key if it had not fired yet.
    pub fn cancel(&mut self, id: TimerId) -> Option<K> {
        let deadline = self.deadlines.remove(&id)?;
        self.by_deadline.remove(&(deadline, id))
    }

    pub fn is_scheduled(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }

    /// Remove and return the keys of every timer due at or before `now`,
    /// earliest first.
    pub fn expired(&mut self, now: Instant) -> Vec<K> {
        let mut fired = Vec::new();
        while let Some(entry) = self.by_deadline.first_entry() {
            let (deadline, id) = *entry.key();
            if deadline > now {
                break;
            }
            self.deadlines.remove(&id);
            fired.push(entry.remove());
        }
        fired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.by_deadline.keys().next().map(|(deadline, _)| *deadline)
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_deadline.clear();
        self.deadlines.clear();
    }
}

impl<K> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}
