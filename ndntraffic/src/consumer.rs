//! The request-issuing traffic source.
//!
//! A [`Consumer`] sends one Interest per scheduler tick, tracks it in the
//! [`Ledger`], feeds round-trip samples to the [`RttEstimator`] and lets the
//! [`TimeoutSweeper`] declare losses. Lost sequence numbers are queued and take
//! the next send slot ahead of fresh ones. With a relay configured the
//! consumer also re-emits pushed responses it overhears.

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::app::App;
use crate::config::ConsumerConfig;
use crate::context::{NodeContext, Timer, TimerId};
use crate::error::{Result, TrafficError};
use crate::ledger::Ledger;
use crate::packet::{Data, Interest, Nack};
use crate::relay::{PushRelay, RelayAction};
use crate::report::{DelayReporter, TracingReporter};
use crate::rtt::RttEstimator;
use crate::schedule::{RequestScheduler, SchedulePolicy};
use crate::sweeper::TimeoutSweeper;

/// Counters exposed for inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Interests sent, retransmissions included.
    pub interests_sent: u64,
    /// Ticks skipped because the node was outside its zone.
    pub skipped: u64,
    pub satisfied: u64,
    /// Timeouts declared by the sweeper.
    pub retransmissions: u64,
    pub nacks: u64,
    /// Responses with no matching outstanding request.
    pub unsolicited: u64,
}

pub struct Consumer {
    config: ConsumerConfig,
    ledger: Ledger,
    rtt: RttEstimator,
    scheduler: RequestScheduler,
    sweeper: TimeoutSweeper,
    rng: StdRng,
    relay: Option<PushRelay>,
    reporter: Arc<dyn DelayReporter>,
    /// Next fresh sequence number.
    next_seq: u32,
    /// Sequence numbers waiting to be retransmitted, lowest first.
    retx_queue: BTreeSet<u32>,
    stats: ConsumerStats,
    running: bool,
}

impl Consumer {
    /// Build a consumer that reports through [`TracingReporter`].
    pub fn new(config: ConsumerConfig) -> Result<Self> {
        Self::with_reporter(config, Arc::new(TracingReporter))
    }

    pub fn with_reporter(
        config: ConsumerConfig,
        reporter: Arc<dyn DelayReporter>,
    ) -> Result<Self> {
        config.validate()?;
        let scheduler = RequestScheduler::new(
            SchedulePolicy::from_config(&config),
            config.interval(),
            Timer::SendNext,
        )
        .with_seed(config.seed);
        Ok(Self {
            ledger: Ledger::new(),
            rtt: RttEstimator::new(config.rtt.clone()),
            scheduler,
            sweeper: TimeoutSweeper::new(config.timeout_check_interval),
            rng: StdRng::seed_from_u64(config.seed),
            relay: config.relay.clone().map(PushRelay::new),
            reporter,
            next_seq: 0,
            retx_queue: BTreeSet::new(),
            stats: ConsumerStats::default(),
            running: false,
            config,
        })
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn scheduler(&self) -> &RequestScheduler {
        &self.scheduler
    }

    pub fn sweeper(&self) -> &TimeoutSweeper {
        &self.sweeper
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// Pushed responses re-emitted by the relay.
    pub fn forwarded(&self) -> u64 {
        self.relay.as_ref().map_or(0, PushRelay::forwarded)
    }

    /// Sequence numbers queued for retransmission.
    pub fn retransmit_queue(&self) -> impl Iterator<Item = u32> + '_ {
        self.retx_queue.iter().copied()
    }

    /// Next sequence number to send, retransmissions first.
    fn next_sequence(&mut self) -> Option<u32> {
        if let Some(seq) = self.retx_queue.pop_first() {
            return Some(seq);
        }
        if self.next_seq == self.config.max_seq {
            return None;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        Some(seq)
    }

    fn send_next(&mut self, ctx: &mut dyn NodeContext) {
        let position = ctx.position();
        if !self.scheduler.policy().admits(position) {
            self.stats.skipped += 1;
            match position {
                Some(p) => tracing::debug!(x = p.x, y = p.y, "outside zone, skipping send"),
                None => tracing::warn!("position unknown, skipping send"),
            }
            return;
        }

        let Some(seq) = self.next_sequence() else {
            tracing::debug!(max_seq = self.config.max_seq, "sequence space exhausted");
            return;
        };

        let interest = Interest::new(
            self.config.prefix.with_sequence(seq),
            self.rng.gen(),
            self.config.lifetime,
        )
        .with_must_be_fresh(self.config.must_be_fresh);

        let now = ctx.now();
        self.ledger.record_sent(seq, now);
        let transmissions = self.ledger.retransmit_count(seq).unwrap_or(1);
        tracing::debug!(name = %interest.name, seq, transmissions, at = ?now, "sending interest");
        self.stats.interests_sent += 1;
        ctx.send_interest(interest);
    }

    fn check_timeouts(&mut self, id: TimerId, ctx: &mut dyn NodeContext) -> Result<()> {
        let reporter = &self.reporter;
        let retx_queue = &mut self.retx_queue;
        let stats = &mut self.stats;
        let expired = self
            .sweeper
            .fire(id, ctx, &mut self.ledger, &mut self.rtt, |lost| {
                tracing::debug!(
                    seq = lost.sequence_id,
                    transmissions = lost.retransmit_count,
                    "request timed out"
                );
                stats.retransmissions += 1;
                retx_queue.insert(lost.sequence_id);
                reporter.report_timeout(lost.sequence_id, lost.retransmit_count);
            })?;
        if expired > 0 {
            tracing::debug!(expired, rto = ?self.rtt.current_rto(), "timeouts processed");
            // No-op while a send is pending: a loss takes the next slot.
            self.scheduler.arm(ctx)?;
        }
        Ok(())
    }

    fn satisfy(&mut self, data: &Data, ctx: &mut dyn NodeContext) {
        let Some(seq) = data.name.sequence() else {
            self.stats.unsolicited += 1;
            return;
        };
        if data.name != self.config.prefix.with_sequence(seq) {
            tracing::trace!(name = %data.name, prefix = %self.config.prefix, "foreign response");
            self.stats.unsolicited += 1;
            return;
        }
        let now = ctx.now();
        let Some(done) = self.ledger.record_satisfied(seq, now) else {
            self.stats.unsolicited += 1;
            return;
        };
        self.retx_queue.remove(&seq);
        self.stats.satisfied += 1;

        let hop_count = data.hop_count().unwrap_or(0);
        if let Some(delay) = done.last_delay {
            // Karn: a retransmitted request gives an ambiguous sample.
            if done.retransmit_count == 1 {
                self.rtt.on_sample(delay);
            }
            self.reporter.report_last_delay(seq, delay, hop_count);
        }
        if let Some(delay) = done.total_delay {
            self.reporter
                .report_full_delay(seq, delay, done.retransmit_count, hop_count);
        }
        tracing::debug!(
            seq,
            hop_count,
            transmissions = done.retransmit_count,
            "request satisfied"
        );
    }

    /// Stop after a failed re-arm and hand the error back.
    fn fail(&mut self, err: TrafficError, ctx: &mut dyn NodeContext) -> Result<()> {
        tracing::warn!(
            error = %err,
            prefix = %self.config.prefix,
            "cannot re-arm timer, stopping consumer"
        );
        self.stop(ctx);
        Err(err)
    }
}

impl App for Consumer {
    fn start(&mut self, ctx: &mut dyn NodeContext) -> Result<()> {
        if self.running {
            return Err(TrafficError::AlreadyRunning);
        }
        self.running = true;
        tracing::info!(
            prefix = %self.config.prefix,
            frequency = self.config.frequency,
            policy = ?self.scheduler.policy(),
            "consumer started"
        );
        let armed = self
            .scheduler
            .arm(ctx)
            .and_then(|_| self.sweeper.arm(ctx));
        match armed {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e, ctx),
        }
    }

    fn stop(&mut self, ctx: &mut dyn NodeContext) {
        self.scheduler.cancel(ctx);
        self.sweeper.disarm(ctx);
        if self.running {
            tracing::info!(
                prefix = %self.config.prefix,
                sent = self.stats.interests_sent,
                satisfied = self.stats.satisfied,
                retransmissions = self.stats.retransmissions,
                "consumer stopped"
            );
        }
        self.scheduler.reset();
        self.ledger.clear();
        self.rtt.reset();
        self.retx_queue.clear();
        self.next_seq = 0;
        self.running = false;
    }

    fn on_timer(&mut self, id: TimerId, timer: Timer, ctx: &mut dyn NodeContext) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        match timer {
            Timer::SendNext => {
                if !self.scheduler.on_fire(id) {
                    return Ok(());
                }
                self.send_next(ctx);
                match self.scheduler.arm(ctx) {
                    Ok(_) => Ok(()),
                    Err(e) => self.fail(e, ctx),
                }
            }
            Timer::CheckTimeouts => match self.check_timeouts(id, ctx) {
                Ok(()) => Ok(()),
                Err(e) => self.fail(e, ctx),
            },
            Timer::Push => Ok(()),
        }
    }

    fn on_data(&mut self, data: &Data, ctx: &mut dyn NodeContext) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        tracing::debug!(
            name = %data.name,
            pushed = data.pushed,
            hop_count = ?data.hop_count(),
            "data received"
        );
        if data.pushed {
            if let Some(relay) = self.relay.as_mut() {
                if let RelayAction::Forward(copy) = relay.inspect(data) {
                    ctx.send_data(copy);
                }
            }
            return Ok(());
        }
        self.satisfy(data, ctx);
        Ok(())
    }

    fn on_nack(&mut self, nack: &Nack, _ctx: &mut dyn NodeContext) {
        if !self.running {
            return;
        }
        self.stats.nacks += 1;
        tracing::info!(name = %nack.name(), reason = %nack.reason, "nack received");
        self.reporter.report_nack(nack.name(), nack.reason);
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("prefix", &self.config.prefix)
            .field("running", &self.running)
            .field("next_seq", &self.next_seq)
            .field("outstanding", &self.ledger.outstanding())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RelayConfig, RttConfig};
    use crate::context::{EventScheduler, Face, Position, PositionProvider};
    use crate::packet::{NackReason, Name};
    use crate::report::MemoryReporter;
    use bytes::Bytes;
    use std::time::Duration;

    #[derive(Default)]
    struct TestNode {
        now: Duration,
        next_id: u64,
        timers: Vec<(TimerId, Duration, Timer)>,
        cancelled: Vec<TimerId>,
        sent: Vec<Interest>,
        position: Option<Position>,
    }

    impl TestNode {
        /// Id of the latest timer of kind `timer`.
        fn last(&self, timer: Timer) -> TimerId {
            self.timers
                .iter()
                .rev()
                .find(|(_, _, t)| *t == timer)
                .map(|(id, _, _)| *id)
                .unwrap()
        }
    }

    impl EventScheduler for TestNode {
        fn now(&self) -> Duration {
            self.now
        }

        fn schedule_at(&mut self, at: Duration, timer: Timer) -> Result<TimerId> {
            self.next_id += 1;
            self.timers.push((TimerId(self.next_id), at, timer));
            Ok(TimerId(self.next_id))
        }

        fn cancel(&mut self, id: TimerId) {
            self.cancelled.push(id);
        }
    }

    impl Face for TestNode {
        fn send_interest(&mut self, interest: Interest) {
            self.sent.push(interest);
        }

        fn send_data(&mut self, _data: Data) {}
    }

    impl PositionProvider for TestNode {
        fn position(&self) -> Option<Position> {
            self.position
        }
    }

    fn consumer(reporter: &MemoryReporter) -> Consumer {
        let config = ConsumerConfig {
            prefix: "/cam".into(),
            ..Default::default()
        };
        Consumer::with_reporter(config, Arc::new(reporter.clone())).unwrap()
    }

    fn response(seq: u32) -> Data {
        Data::new(Name::from("/cam").with_sequence(seq), Bytes::new()).with_hop_count(1)
    }

    #[test]
    fn send_then_satisfy_samples_rtt() {
        let reporter = MemoryReporter::new();
        let mut node = TestNode::default();
        let mut c = consumer(&reporter);
        c.start(&mut node).unwrap();
        let id = node.last(Timer::SendNext);
        c.on_timer(id, Timer::SendNext, &mut node).unwrap();
        assert_eq!(node.sent.len(), 1);
        assert_eq!(node.sent[0].name.to_string(), "/cam/0");

        node.now = Duration::from_millis(80);
        c.on_data(&response(0), &mut node).unwrap();
        assert_eq!(c.rtt().srtt(), Some(Duration::from_millis(80)));
        assert_eq!(reporter.last_delays(), vec![(0, Duration::from_millis(80), 1)]);

        // Duplicate: ignored.
        c.on_data(&response(0), &mut node).unwrap();
        assert_eq!(reporter.last_delays().len(), 1);
        assert_eq!(c.stats().unsolicited, 1);
    }

    #[test]
    fn response_under_another_prefix_is_unsolicited() {
        let reporter = MemoryReporter::new();
        let mut node = TestNode::default();
        let mut c = consumer(&reporter);
        c.start(&mut node).unwrap();
        c.on_timer(node.last(Timer::SendNext), Timer::SendNext, &mut node).unwrap();

        node.now = Duration::from_millis(30);
        let foreign = Data::new(Name::from("/cam/extra").with_sequence(0), Bytes::new());
        c.on_data(&foreign, &mut node).unwrap();
        let other = Data::new(Name::from("/mic").with_sequence(0), Bytes::new());
        c.on_data(&other, &mut node).unwrap();

        assert_eq!(c.stats().satisfied, 0);
        assert_eq!(c.stats().unsolicited, 2);
        assert!(c.ledger().is_outstanding(0));
        assert_eq!(c.rtt().srtt(), None);
        assert!(reporter.is_empty());
    }

    #[test]
    fn relay_and_rtt_config_survive_construction() {
        let config = ConsumerConfig {
            prefix: "/cam".into(),
            rtt: RttConfig {
                initial_rto: Duration::from_millis(300),
                ..Default::default()
            },
            relay: Some(RelayConfig { max_hops: 2 }),
            ..Default::default()
        };
        let c = Consumer::new(config.clone()).unwrap();
        assert_eq!(c.config(), &config);
        assert_eq!(c.rtt().current_rto(), Duration::from_millis(300));
        assert_eq!(c.forwarded(), 0);
    }

    #[test]
    fn unusable_frequency_is_rejected() {
        for frequency in [1e-300, 4e9] {
            let config = ConsumerConfig {
                frequency,
                ..Default::default()
            };
            assert!(matches!(
                Consumer::new(config),
                Err(TrafficError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn nack_keeps_request_outstanding() {
        let reporter = MemoryReporter::new();
        let mut node = TestNode::default();
        let mut c = consumer(&reporter);
        c.start(&mut node).unwrap();
        let id = node.last(Timer::SendNext);
        c.on_timer(id, Timer::SendNext, &mut node).unwrap();

        let nack = Nack::new(node.sent[0].clone(), NackReason::NoRoute);
        c.on_nack(&nack, &mut node);
        assert!(c.ledger().is_outstanding(0));
        assert_eq!(reporter.nacks().len(), 1);
    }

    #[test]
    fn stop_cancels_timers_and_clears_state() {
        let reporter = MemoryReporter::new();
        let mut node = TestNode::default();
        let mut c = consumer(&reporter);
        c.start(&mut node).unwrap();
        let id = node.last(Timer::SendNext);
        c.on_timer(id, Timer::SendNext, &mut node).unwrap();

        c.stop(&mut node);
        assert_eq!(node.cancelled.len(), 2);
        assert!(c.ledger().is_empty());
        assert!(!c.is_running());

        c.stop(&mut node);
        assert_eq!(node.cancelled.len(), 2);
        assert!(matches!(c.start(&mut node), Ok(())));
    }

    #[test]
    fn retransmission_skips_rtt_sample() {
        let reporter = MemoryReporter::new();
        let mut node = TestNode::default();
        let mut c = consumer(&reporter);
        c.start(&mut node).unwrap();
        c.on_timer(node.last(Timer::SendNext), Timer::SendNext, &mut node).unwrap();

        // Initial RTO is 1s; the first check at or past it retires seq 0.
        node.now = Duration::from_millis(1000);
        c.on_timer(node.last(Timer::CheckTimeouts), Timer::CheckTimeouts, &mut node)
            .unwrap();
        assert_eq!(reporter.timeouts(), vec![0]);
        assert_eq!(c.retransmit_queue().collect::<Vec<_>>(), vec![0]);

        c.on_timer(node.last(Timer::SendNext), Timer::SendNext, &mut node).unwrap();
        assert_eq!(node.sent[1].name.to_string(), "/cam/0");
        assert_eq!(c.ledger().retransmit_count(0), Some(2));

        node.now = Duration::from_millis(1050);
        c.on_data(&response(0), &mut node).unwrap();
        assert_eq!(c.rtt().srtt(), None);
        assert_eq!(c.rtt().multiplier(), 2);
        assert_eq!(c.stats().satisfied, 1);
    }
}
