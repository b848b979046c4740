//! Services an application consumes from the node it runs on.
//!
//! Applications never block and never own a clock: they are driven by
//! callbacks and express suspension only as "schedule a timer at time T".
//! The same application code runs under the deterministic [`crate::sim`]
//! harness and the tokio [`crate::driver`].

use std::time::Duration;

use crate::error::{Result, TrafficError};
use crate::packet::{Data, Interest};

/// Identifies one scheduled timer. Unique per scheduler for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// What a timer means to the application that armed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    /// Emit the next request.
    SendNext,
    /// Re-evaluate outstanding requests against the RTO.
    CheckTimeouts,
    /// Emit the next pushed response.
    Push,
}

/// A 2-D position in metres.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Discrete-event scheduling.
pub trait EventScheduler {
    /// Current time since the start of the run.
    fn now(&self) -> Duration;

    /// Arrange for `timer` to be delivered back to the application at `at`.
    fn schedule_at(&mut self, at: Duration, timer: Timer) -> Result<TimerId>;

    /// Cancel a timer. Cancelling a fired or already-cancelled timer is a no-op.
    fn cancel(&mut self, id: TimerId);

    /// Schedule `timer` at `now + delay`.
    fn schedule_after(&mut self, delay: Duration, timer: Timer) -> Result<TimerId> {
        let now = self.now();
        let at = now
            .checked_add(delay)
            .ok_or(TrafficError::TimeOverflow { now, delay })?;
        self.schedule_at(at, timer)
    }
}

/// Fire-and-forget access to the network.
pub trait Face {
    fn send_interest(&mut self, interest: Interest);
    fn send_data(&mut self, data: Data);
}

/// Where the node currently is, if it has a mobility model.
pub trait PositionProvider {
    fn position(&self) -> Option<Position>;
}

/// Everything an application needs from its node.
pub trait NodeContext: EventScheduler + Face + PositionProvider {}

impl<T: EventScheduler + Face + PositionProvider> NodeContext for T {}
