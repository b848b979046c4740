//! Periodic timeout detection.
//!
//! Idle -> Armed -> Firing -> Armed. Each firing retires every ledger entry
//! whose deadline `sent_at + rto` has passed, oldest first, and stops at the
//! first entry still in time. The RTO is sampled once per firing, so backoff
//! applied by one expiry does not shift the deadlines of the rest of the
//! sweep. The sweeper re-arms unconditionally until disarmed.

use std::time::Duration;

use crate::context::{EventScheduler, Timer, TimerId};
use crate::error::Result;
use crate::ledger::Ledger;
use crate::rtt::RttEstimator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweeperState {
    Idle,
    Armed,
    Firing,
}

/// A request declared lost by the sweeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expired {
    pub sequence_id: u32,
    pub sent_at: Duration,
    pub retransmit_count: u32,
}

#[derive(Debug)]
pub struct TimeoutSweeper {
    interval: Duration,
    state: SweeperState,
    pending: Option<TimerId>,
}

impl TimeoutSweeper {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: SweeperState::Idle,
            pending: None,
        }
    }

    pub fn state(&self) -> SweeperState {
        self.state
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn pending(&self) -> Option<TimerId> {
        self.pending
    }

    /// Schedule the next check unless one is already pending.
    pub fn arm<S: EventScheduler + ?Sized>(&mut self, sched: &mut S) -> Result<()> {
        if self.pending.is_some() {
            return Ok(());
        }
        let id = sched.schedule_after(self.interval, Timer::CheckTimeouts)?;
        self.pending = Some(id);
        self.state = SweeperState::Armed;
        Ok(())
    }

    /// Run one check for timer `id`, then re-arm.
    ///
    /// `on_loss` is called for every retired entry after the estimator has
    /// been backed off. Returns the number of expired entries; a stale `id`
    /// expires nothing and does not re-arm.
    pub fn fire<S: EventScheduler + ?Sized>(
        &mut self,
        id: TimerId,
        sched: &mut S,
        ledger: &mut Ledger,
        rtt: &mut RttEstimator,
        mut on_loss: impl FnMut(Expired),
    ) -> Result<usize> {
        if self.pending != Some(id) {
            return Ok(0);
        }
        self.pending = None;
        self.state = SweeperState::Firing;

        let now = sched.now();
        let rto = rtt.current_rto();
        let mut expired = 0;
        while let Some((seq, sent_at)) = ledger.earliest_pending() {
            // An unrepresentable deadline never passes.
            match sent_at.checked_add(rto) {
                Some(deadline) if deadline <= now => {}
                _ => break,
            }
            let retransmit_count = ledger.retransmit_count(seq).unwrap_or(0);
            ledger.retire(seq);
            rtt.on_loss();
            expired += 1;
            on_loss(Expired {
                sequence_id: seq,
                sent_at,
                retransmit_count,
            });
        }

        self.arm(sched)?;
        Ok(expired)
    }

    /// Cancel the pending check, if any.
    pub fn disarm<S: EventScheduler + ?Sized>(&mut self, sched: &mut S) {
        if let Some(id) = self.pending.take() {
            sched.cancel(id);
        }
        self.state = SweeperState::Idle;
    }
}
