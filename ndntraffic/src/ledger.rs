//! Outstanding-request ledger.
//!
//! Records live in a slot arena. Three views index into the arena by slot
//! number:
//!
//! - **last-send** (`seq -> slot`): refreshed on every retransmission, gives
//!   the last-hop delay.
//! - **first-send** (`seq -> slot`): set once per logical request, gives the
//!   total delay across retransmissions.
//! - **time index** (`(sent_at, ordinal) -> slot`): ordered by send time, ties
//!   broken by insertion ordinal, used by the timeout sweeper.
//!
//! A slot is released only once no view references it.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// One request that has been sent and not yet satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub sequence_id: u32,
    /// Time of the most recent transmission.
    pub sent_at: Duration,
    /// Time of the first transmission of this logical request.
    pub first_sent_at: Duration,
    /// Number of transmissions so far, starting at 1.
    pub retransmit_count: u32,
}

/// Outcome of satisfying a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Satisfaction {
    pub sequence_id: u32,
    /// Delay since the most recent transmission.
    pub last_delay: Option<Duration>,
    /// Delay since the first transmission.
    pub total_delay: Option<Duration>,
    pub retransmit_count: u32,
}

#[derive(Debug)]
struct Slot {
    request: PendingRequest,
    time_key: Option<(Duration, u64)>,
}

/// Tracks every request sent but not yet satisfied.
#[derive(Debug, Default)]
pub struct Ledger {
    arena: Vec<Option<Slot>>,
    free: Vec<usize>,
    last_send: HashMap<u32, usize>,
    first_send: HashMap<u32, usize>,
    by_time: BTreeMap<(Duration, u64), usize>,
    next_ordinal: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a (re)transmission of `seq` at `now`.
    ///
    /// Sending an id that is still in the time index, without satisfying or
    /// retiring it first, is a caller bug.
    pub fn record_sent(&mut self, seq: u32, now: Duration) {
        let slot = match self.slot_of(seq) {
            Some(slot) => slot,
            None => self.allocate(PendingRequest {
                sequence_id: seq,
                sent_at: now,
                first_sent_at: now,
                retransmit_count: 0,
            }),
        };

        let first_is_new = !self.first_send.contains_key(&seq);
        let key = (now, self.next_ordinal);
        self.next_ordinal += 1;

        let Some(entry) = self.arena[slot].as_mut() else {
            return;
        };
        debug_assert!(
            entry.time_key.is_none(),
            "sequence {seq} sent twice without being satisfied or retired"
        );
        if let Some(old) = entry.time_key.replace(key) {
            self.by_time.remove(&old);
        }
        entry.request.sent_at = now;
        entry.request.retransmit_count += 1;
        if first_is_new {
            entry.request.first_sent_at = now;
            self.first_send.insert(seq, slot);
        }
        self.last_send.insert(seq, slot);
        self.by_time.insert(key, slot);
    }

    /// Satisfy `seq`, removing it from every view.
    ///
    /// Returns `None` if `seq` is not tracked, which is the normal outcome for
    /// duplicate or late responses.
    pub fn record_satisfied(&mut self, seq: u32, now: Duration) -> Option<Satisfaction> {
        let last = self.last_send.remove(&seq);
        let first = self.first_send.remove(&seq);
        let slot = last.or(first)?;
        let entry = self.release(slot)?;
        let request = entry.request;
        Some(Satisfaction {
            sequence_id: seq,
            last_delay: last.map(|_| now.saturating_sub(request.sent_at)),
            total_delay: first.map(|_| now.saturating_sub(request.first_sent_at)),
            retransmit_count: request.retransmit_count,
        })
    }

    /// Oldest outstanding request by send time.
    pub fn earliest_pending(&self) -> Option<(u32, Duration)> {
        self.by_time.first_key_value().and_then(|(&(sent_at, _), &slot)| {
            self.arena[slot]
                .as_ref()
                .map(|entry| (entry.request.sequence_id, sent_at))
        })
    }

    /// Remove `seq` from the time index after it timed out.
    ///
    /// The delay views keep the id, so a late response still reports its
    /// total delay and a retransmission keeps counting. Returns `false` if
    /// `seq` was not awaiting a timeout.
    pub fn retire(&mut self, seq: u32) -> bool {
        let Some(slot) = self.slot_of(seq) else {
            return false;
        };
        let Some(key) = self.arena[slot].as_mut().and_then(|e| e.time_key.take()) else {
            return false;
        };
        self.by_time.remove(&key);
        if !self.last_send.contains_key(&seq) && !self.first_send.contains_key(&seq) {
            self.release(slot);
        }
        true
    }

    pub fn get(&self, seq: u32) -> Option<&PendingRequest> {
        self.slot_of(seq)
            .and_then(|slot| self.arena[slot].as_ref())
            .map(|entry| &entry.request)
    }

    pub fn contains(&self, seq: u32) -> bool {
        self.slot_of(seq).is_some()
    }

    /// Number of transmissions recorded for `seq`.
    pub fn retransmit_count(&self, seq: u32) -> Option<u32> {
        self.get(seq).map(|r| r.retransmit_count)
    }

    /// Whether `seq` is waiting on a timeout.
    pub fn is_outstanding(&self, seq: u32) -> bool {
        self.slot_of(seq)
            .and_then(|slot| self.arena[slot].as_ref())
            .is_some_and(|entry| entry.time_key.is_some())
    }

    /// Number of requests in the time index.
    pub fn outstanding(&self) -> usize {
        self.by_time.len()
    }

    /// Number of tracked logical requests, retired ones included.
    pub fn len(&self) -> usize {
        self.arena.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.arena.clear();
        self.free.clear();
        self.last_send.clear();
        self.first_send.clear();
        self.by_time.clear();
    }

    fn slot_of(&self, seq: u32) -> Option<usize> {
        self.last_send
            .get(&seq)
            .or_else(|| self.first_send.get(&seq))
            .copied()
    }

    fn allocate(&mut self, request: PendingRequest) -> usize {
        let slot = Slot {
            request,
            time_key: None,
        };
        match self.free.pop() {
            Some(index) => {
                self.arena[index] = Some(slot);
                index
            }
            None => {
                self.arena.push(Some(slot));
                self.arena.len() - 1
            }
        }
    }

    fn release(&mut self, slot: usize) -> Option<Slot> {
        let entry = self.arena.get_mut(slot)?.take()?;
        if let Some(key) = entry.time_key {
            self.by_time.remove(&key);
        }
        self.free.push(slot);
        Some(entry)
    }
}
