//! Delay and outcome sinks.
//!
//! Reporters are pure observers: they return nothing and must never fail the
//! caller.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::packet::{NackReason, Name};

/// Receives per-request outcomes from a traffic source.
pub trait DelayReporter: Send + Sync {
    /// Delay between the last transmission of `seq` and its response.
    fn report_last_delay(&self, seq: u32, delay: Duration, hop_count: u32);

    /// Delay between the first transmission of `seq` and its response.
    fn report_full_delay(&self, seq: u32, delay: Duration, retransmit_count: u32, hop_count: u32);

    fn report_nack(&self, name: &Name, reason: NackReason);

    /// `seq` was declared lost after `retransmit_count` transmissions.
    fn report_timeout(&self, _seq: u32, _retransmit_count: u32) {}
}

/// One recorded reporter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEvent {
    LastDelay {
        seq: u32,
        delay: Duration,
        hop_count: u32,
    },
    FullDelay {
        seq: u32,
        delay: Duration,
        retransmit_count: u32,
        hop_count: u32,
    },
    Nack {
        name: Name,
        reason: NackReason,
    },
    Timeout {
        seq: u32,
        retransmit_count: u32,
    },
}

/// Emits every outcome as a `tracing` event under `ndntraffic::delay`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl DelayReporter for TracingReporter {
    fn report_last_delay(&self, seq: u32, delay: Duration, hop_count: u32) {
        tracing::info!(target: "ndntraffic::delay", seq, ?delay, hop_count, kind = "last", "delay");
    }

    fn report_full_delay(&self, seq: u32, delay: Duration, retransmit_count: u32, hop_count: u32) {
        tracing::info!(
            target: "ndntraffic::delay",
            seq,
            ?delay,
            retransmit_count,
            hop_count,
            kind = "full",
            "delay"
        );
    }

    fn report_nack(&self, name: &Name, reason: NackReason) {
        tracing::info!(target: "ndntraffic::delay", %name, %reason, "nack");
    }

    fn report_timeout(&self, seq: u32, retransmit_count: u32) {
        tracing::info!(target: "ndntraffic::delay", seq, retransmit_count, "timeout");
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl DelayReporter for NullReporter {
    fn report_last_delay(&self, _seq: u32, _delay: Duration, _hop_count: u32) {}
    fn report_full_delay(&self, _seq: u32, _delay: Duration, _retx: u32, _hop_count: u32) {}
    fn report_nack(&self, _name: &Name, _reason: NackReason) {}
}

/// Keeps every event in memory; clones share the same log.
#[derive(Debug, Default, Clone)]
pub struct MemoryReporter {
    events: Arc<Mutex<Vec<ReportEvent>>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReportEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// `(seq, delay, hop_count)` of every last-delay report.
    pub fn last_delays(&self) -> Vec<(u32, Duration, u32)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ReportEvent::LastDelay {
                    seq,
                    delay,
                    hop_count,
                } => Some((*seq, *delay, *hop_count)),
                _ => None,
            })
            .collect()
    }

    /// Sequence numbers reported as timed out, in order.
    pub fn timeouts(&self) -> Vec<u32> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ReportEvent::Timeout { seq, .. } => Some(*seq),
                _ => None,
            })
            .collect()
    }

    pub fn nacks(&self) -> Vec<(Name, NackReason)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ReportEvent::Nack { name, reason } => Some((name.clone(), *reason)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ReportEvent) {
        self.events.lock().push(event);
    }
}

impl DelayReporter for MemoryReporter {
    fn report_last_delay(&self, seq: u32, delay: Duration, hop_count: u32) {
        self.push(ReportEvent::LastDelay {
            seq,
            delay,
            hop_count,
        });
    }

    fn report_full_delay(&self, seq: u32, delay: Duration, retransmit_count: u32, hop_count: u32) {
        self.push(ReportEvent::FullDelay {
            seq,
            delay,
            retransmit_count,
            hop_count,
        });
    }

    fn report_nack(&self, name: &Name, reason: NackReason) {
        self.push(ReportEvent::Nack {
            name: name.clone(),
            reason,
        });
    }

    fn report_timeout(&self, seq: u32, retransmit_count: u32) {
        self.push(ReportEvent::Timeout {
            seq,
            retransmit_count,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_reporter_clones_share_log() {
        let reporter = MemoryReporter::new();
        let clone = reporter.clone();
        clone.report_last_delay(1, Duration::from_millis(5), 2);
        clone.report_timeout(2, 1);
        clone.report_nack(&Name::from("/cam/3"), NackReason::Congestion);

        assert_eq!(reporter.len(), 3);
        assert_eq!(reporter.last_delays(), vec![(1, Duration::from_millis(5), 2)]);
        assert_eq!(reporter.timeouts(), vec![2]);
        assert_eq!(
            reporter.nacks(),
            vec![(Name::from("/cam/3"), NackReason::Congestion)]
        );
    }
}
