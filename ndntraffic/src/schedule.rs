//! Request scheduling.
//!
//! A [`RequestScheduler`] keeps at most one pending fire. The policy decides
//! the delay to the next fire: the first fire may be offset or randomized,
//! every later fire is one interval (`1 / frequency`) after the previous one.
//! Position gating does not change the cadence; it only lets the caller skip
//! a tick. A scheduler owns a seeded generator only when its policy draws a
//! random first fire.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};

use crate::config::{ConsumerConfig, Randomize, Zone};
use crate::context::{EventScheduler, Position, Timer, TimerId};
use crate::error::{Result, TrafficError};

/// Upper bound of an exponential first-fire delay, in intervals.
const EXPONENTIAL_CAP_INTERVALS: f64 = 50.0;

/// Random placement of the first fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// `U[0, 2 * interval]`
    Uniform,
    /// `Exp(mean = interval)`, capped at `50 * interval`.
    Exponential,
}

impl Jitter {
    fn sample(self, interval: Duration, rng: &mut StdRng) -> Duration {
        let mean = interval.as_secs_f64();
        let secs = match self {
            Jitter::Uniform => rng.gen_range(0.0..=2.0 * mean),
            Jitter::Exponential => Exp::new(1.0 / mean)
                .map(|exp| exp.sample(rng))
                .unwrap_or(mean)
                .min(EXPONENTIAL_CAP_INTERVALS * mean),
        };
        Duration::from_secs_f64(secs)
    }
}

/// When the first fire happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstFire {
    Offset(Duration),
    Jittered(Jitter),
}

impl FirstFire {
    fn from_randomize(randomize: Randomize, offset: Duration) -> Self {
        match randomize {
            Randomize::None => FirstFire::Offset(offset),
            Randomize::Uniform => FirstFire::Jittered(Jitter::Uniform),
            Randomize::Exponential => FirstFire::Jittered(Jitter::Exponential),
        }
    }

    fn delay(self, interval: Duration, rng: Option<&mut StdRng>) -> Duration {
        match self {
            FirstFire::Offset(offset) => offset,
            FirstFire::Jittered(jitter) => {
                rng.map_or(interval, |rng| jitter.sample(interval, rng))
            }
        }
    }

    fn is_random(self) -> bool {
        matches!(self, FirstFire::Jittered(_))
    }
}

/// How a traffic source paces its requests.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulePolicy {
    /// Fixed interval from an initial offset.
    Constant { initial_offset: Duration },
    /// Randomized first fire, fixed interval afterwards.
    Jittered { jitter: Jitter },
    /// Like the wrapped cadence, but sends are skipped outside `zone`.
    PositionGated { zone: Zone, first: FirstFire },
}

impl SchedulePolicy {
    pub fn from_config(config: &ConsumerConfig) -> Self {
        let first = FirstFire::from_randomize(config.randomize, config.initial_offset);
        match (config.zone, first) {
            (Some(zone), first) => SchedulePolicy::PositionGated { zone, first },
            (None, FirstFire::Offset(initial_offset)) => {
                SchedulePolicy::Constant { initial_offset }
            }
            (None, FirstFire::Jittered(jitter)) => SchedulePolicy::Jittered { jitter },
        }
    }

    /// Delay from now to the next fire.
    ///
    /// A random first fire drawn without `rng` falls back to one interval.
    pub fn next_delay(
        &self,
        state: &ScheduleState,
        interval: Duration,
        rng: Option<&mut StdRng>,
    ) -> Duration {
        if !state.is_first_fire {
            return interval;
        }
        match self {
            SchedulePolicy::Constant { initial_offset } => *initial_offset,
            SchedulePolicy::Jittered { jitter } => {
                FirstFire::Jittered(*jitter).delay(interval, rng)
            }
            SchedulePolicy::PositionGated { first, .. } => first.delay(interval, rng),
        }
    }

    /// Whether the first fire is drawn at random.
    pub fn is_random(&self) -> bool {
        match self {
            SchedulePolicy::Constant { .. } => false,
            SchedulePolicy::Jittered { .. } => true,
            SchedulePolicy::PositionGated { first, .. } => first.is_random(),
        }
    }

    /// Whether a send may happen at `position`. Ungated policies always
    /// admit; a gated policy rejects an unknown position.
    pub fn admits(&self, position: Option<Position>) -> bool {
        match self {
            SchedulePolicy::PositionGated { zone, .. } => {
                position.is_some_and(|p| zone.contains(p.x, p.y))
            }
            _ => true,
        }
    }
}

/// Per-source schedule bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleState {
    pub next_fire_time: Option<Duration>,
    pub is_first_fire: bool,
}

impl Default for ScheduleState {
    fn default() -> Self {
        Self {
            next_fire_time: None,
            is_first_fire: true,
        }
    }
}

/// Arms one timer at a time according to a [`SchedulePolicy`].
#[derive(Debug)]
pub struct RequestScheduler {
    policy: SchedulePolicy,
    interval: Duration,
    timer: Timer,
    state: ScheduleState,
    pending: Option<TimerId>,
    /// Present only for a random policy.
    rng: Option<StdRng>,
}

impl RequestScheduler {
    pub fn new(policy: SchedulePolicy, interval: Duration, timer: Timer) -> Self {
        let rng = policy.is_random().then(|| StdRng::seed_from_u64(0));
        Self {
            policy,
            interval,
            timer,
            state: ScheduleState::default(),
            pending: None,
            rng,
        }
    }

    /// Seed the first-fire draw. No effect on a deterministic policy.
    pub fn with_seed(mut self, seed: u64) -> Self {
        if self.rng.is_some() {
            self.rng = Some(StdRng::seed_from_u64(seed));
        }
        self
    }

    pub fn policy(&self) -> &SchedulePolicy {
        &self.policy
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Arm the next fire. A no-op returning `false` if one is already pending.
    pub fn arm<S: EventScheduler + ?Sized>(&mut self, sched: &mut S) -> Result<bool> {
        if self.pending.is_some() {
            return Ok(false);
        }
        let delay = self
            .policy
            .next_delay(&self.state, self.interval, self.rng.as_mut());
        let now = sched.now();
        let at = now
            .checked_add(delay)
            .ok_or(TrafficError::TimeOverflow { now, delay })?;
        let id = sched.schedule_at(at, self.timer)?;
        self.pending = Some(id);
        self.state.next_fire_time = Some(at);
        self.state.is_first_fire = false;
        Ok(true)
    }

    /// Consume the pending fire. Returns `false` for a stale or unknown `id`.
    pub fn on_fire(&mut self, id: TimerId) -> bool {
        if self.pending != Some(id) {
            return false;
        }
        self.pending = None;
        true
    }

    /// Cancel the pending fire, if any.
    pub fn cancel<S: EventScheduler + ?Sized>(&mut self, sched: &mut S) {
        if let Some(id) = self.pending.take() {
            sched.cancel(id);
        }
        self.state.next_fire_time = None;
    }

    /// Forget history so the next `arm` is a first fire again.
    pub fn reset(&mut self) {
        self.state = ScheduleState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct ManualScheduler {
        now: Duration,
        next_id: u64,
        scheduled: Vec<(TimerId, Duration)>,
    }

    impl EventScheduler for ManualScheduler {
        fn now(&self) -> Duration {
            self.now
        }

        fn schedule_at(&mut self, at: Duration, _timer: Timer) -> Result<TimerId> {
            self.next_id += 1;
            self.scheduled.push((TimerId(self.next_id), at));
            Ok(TimerId(self.next_id))
        }

        fn cancel(&mut self, _id: TimerId) {}
    }

    #[test]
    fn constant_rate_cadence() {
        let mut sched = ManualScheduler::default();
        let mut s = RequestScheduler::new(
            SchedulePolicy::Constant {
                initial_offset: Duration::ZERO,
            },
            Duration::from_millis(250),
            Timer::SendNext,
        );
        assert!(s.arm(&mut sched).unwrap());
        assert_eq!(sched.scheduled[0].1, Duration::ZERO);

        let id = sched.scheduled[0].0;
        assert!(s.on_fire(id));
        assert!(s.arm(&mut sched).unwrap());
        assert_eq!(sched.scheduled[1].1, Duration::from_millis(250));
    }

    #[test]
    fn arm_while_pending_is_noop() {
        let mut sched = ManualScheduler::default();
        let mut s = RequestScheduler::new(
            SchedulePolicy::Constant {
                initial_offset: Duration::ZERO,
            },
            Duration::from_secs(1),
            Timer::SendNext,
        );
        assert!(s.arm(&mut sched).unwrap());
        assert!(!s.arm(&mut sched).unwrap());
        assert!(!s.arm(&mut sched).unwrap());
        assert_eq!(sched.scheduled.len(), 1);
        assert!(!s.on_fire(TimerId(42)));
        assert!(s.is_pending());
    }

    #[test]
    fn uniform_first_fire_within_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let policy = SchedulePolicy::Jittered {
            jitter: Jitter::Uniform,
        };
        let interval = Duration::from_millis(500);
        for _ in 0..1000 {
            let d = policy.next_delay(&ScheduleState::default(), interval, Some(&mut rng));
            assert!(d <= Duration::from_secs(1), "{d:?}");
        }
        let steady = ScheduleState {
            next_fire_time: None,
            is_first_fire: false,
        };
        assert_eq!(policy.next_delay(&steady, interval, Some(&mut rng)), interval);
    }

    #[test]
    fn exponential_first_fire_is_capped() {
        let mut rng = StdRng::seed_from_u64(11);
        let policy = SchedulePolicy::Jittered {
            jitter: Jitter::Exponential,
        };
        let interval = Duration::from_millis(100);
        let mut total = 0.0;
        for _ in 0..2000 {
            let d = policy.next_delay(&ScheduleState::default(), interval, Some(&mut rng));
            assert!(d <= Duration::from_secs(5));
            total += d.as_secs_f64();
        }
        let mean = total / 2000.0;
        assert!(mean > 0.08 && mean < 0.12, "mean = {mean}");
    }

    #[test]
    fn same_seed_same_schedule() {
        let policy = SchedulePolicy::Jittered {
            jitter: Jitter::Uniform,
        };
        let interval = Duration::from_secs(1);
        let first = ScheduleState::default();
        let a = policy.next_delay(&first, interval, Some(&mut StdRng::seed_from_u64(3)));
        let b = policy.next_delay(&first, interval, Some(&mut StdRng::seed_from_u64(3)));
        assert_eq!(a, b);

        let mut sched_a = ManualScheduler::default();
        let mut sched_b = ManualScheduler::default();
        let build = || {
            RequestScheduler::new(policy.clone(), interval, Timer::SendNext).with_seed(3)
        };
        build().arm(&mut sched_a).unwrap();
        build().arm(&mut sched_b).unwrap();
        assert_eq!(sched_a.scheduled[0].1, a);
        assert_eq!(sched_b.scheduled[0].1, a);
    }

    #[test]
    fn only_random_policies_own_a_generator() {
        let constant = RequestScheduler::new(
            SchedulePolicy::Constant {
                initial_offset: Duration::ZERO,
            },
            Duration::from_secs(1),
            Timer::Push,
        )
        .with_seed(9);
        assert!(constant.rng.is_none());

        let gated = RequestScheduler::new(
            SchedulePolicy::PositionGated {
                zone: Zone::default(),
                first: FirstFire::Jittered(Jitter::Uniform),
            },
            Duration::from_secs(1),
            Timer::SendNext,
        );
        assert!(gated.rng.is_some());
    }

    #[test]
    fn overflowing_offset_is_an_error() {
        let mut sched = ManualScheduler {
            now: Duration::from_secs(10),
            ..Default::default()
        };
        let mut s = RequestScheduler::new(
            SchedulePolicy::Constant {
                initial_offset: Duration::MAX,
            },
            Duration::from_secs(1),
            Timer::SendNext,
        );
        assert!(matches!(
            s.arm(&mut sched),
            Err(TrafficError::TimeOverflow { .. })
        ));
        assert!(!s.is_pending());
        assert!(sched.scheduled.is_empty());
    }

    #[test]
    fn position_gate() {
        let policy = SchedulePolicy::PositionGated {
            zone: Zone::new(50.0, 950.0, 50.0, 750.0),
            first: FirstFire::Offset(Duration::ZERO),
        };
        assert!(!policy.admits(Some(Position::new(10.0, 100.0))));
        assert!(policy.admits(Some(Position::new(500.0, 400.0))));
        assert!(!policy.admits(None));

        let ungated = SchedulePolicy::Constant {
            initial_offset: Duration::ZERO,
        };
        assert!(ungated.admits(None));
    }

    #[test]
    fn policy_from_config() {
        let config = ConsumerConfig {
            randomize: Randomize::Exponential,
            ..Default::default()
        };
        assert_eq!(
            SchedulePolicy::from_config(&config),
            SchedulePolicy::Jittered {
                jitter: Jitter::Exponential
            }
        );

        let config = ConsumerConfig {
            zone: Some(Zone::default()),
            randomize: Randomize::Uniform,
            ..Default::default()
        };
        assert!(matches!(
            SchedulePolicy::from_config(&config),
            SchedulePolicy::PositionGated {
                first: FirstFire::Jittered(Jitter::Uniform),
                ..
            }
        ));
    }
}
