//! RTT estimation using the Jacobson/Karels mean-deviation algorithm.
//!
//! SRTT   = 7/8 * SRTT   + 1/8 * sample
//! RTTVAR = 3/4 * RTTVAR + 1/4 * |SRTT - sample|
//! RTO    = min(max(SRTT + 4 * RTTVAR, min_rto) * multiplier, max_rto)
//!
//! The multiplier doubles on every loss (capped at `max_multiplier`) and
//! returns to 1 on every sample.

use std::time::Duration;

use crate::config::RttConfig;

/// RTT estimator with exponential backoff.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    config: RttConfig,
    /// Smoothed RTT.
    srtt: Option<Duration>,
    /// Mean deviation.
    rttvar: Option<Duration>,
    /// Backoff multiplier, always a power of two.
    multiplier: u32,
}

impl RttEstimator {
    pub fn new(config: RttConfig) -> Self {
        Self {
            config,
            srtt: None,
            rttvar: None,
            multiplier: 1,
        }
    }

    /// Update the estimator with a new RTT sample.
    pub fn on_sample(&mut self, sample: Duration) {
        match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => {
                let diff = if srtt > sample {
                    srtt - sample
                } else {
                    sample - srtt
                };
                self.rttvar = Some((rttvar * 3 + diff) / 4);
                self.srtt = Some((srtt * 7 + sample) / 8);
            }
            _ => {
                // First sample: SRTT = sample, RTTVAR = sample / 2
                self.srtt = Some(sample);
                self.rttvar = Some(sample / 2);
            }
        }
        self.multiplier = 1;
    }

    /// Record a detected loss: double the backoff multiplier.
    pub fn on_loss(&mut self) {
        self.multiplier = self
            .multiplier
            .saturating_mul(2)
            .min(self.config.max_multiplier);
    }

    /// Current retransmission timeout.
    pub fn current_rto(&self) -> Duration {
        let base = match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => (srtt + rttvar * 4).max(self.config.min_rto),
            _ => self.config.initial_rto,
        };
        base.saturating_mul(self.multiplier).min(self.config.max_rto)
    }

    /// Returns the smoothed RTT, or `None` before the first sample.
    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    /// Returns the mean deviation, or `None` before the first sample.
    pub fn rttvar(&self) -> Option<Duration> {
        self.rttvar
    }

    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }

    /// Forget all samples and backoff.
    pub fn reset(&mut self) {
        self.srtt = None;
        self.rttvar = None;
        self.multiplier = 1;
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new(RttConfig::default())
    }
}
