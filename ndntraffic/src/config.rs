//! Application configuration.
//!
//! Every config derives `Deserialize` so scenarios can be described in JSON.
//! Durations are written as integer milliseconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrafficError};
use crate::packet::Name;

/// How the first request of a run is placed in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Randomize {
    /// First request at the configured initial offset.
    #[default]
    None,
    /// First request drawn from `U[0, 2 / frequency]`.
    Uniform,
    /// First request drawn from `Exp(mean = 1 / frequency)`, capped at `50 / frequency`.
    Exponential,
}

/// Axis-aligned rectangle in which a node is allowed to send.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Zone {
    pub fn new(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    /// Bounds are inclusive.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    pub fn validate(&self) -> Result<()> {
        let finite = [self.min_x, self.max_x, self.min_y, self.max_y]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.min_x > self.max_x || self.min_y > self.max_y {
            return Err(TrafficError::InvalidConfig(format!(
                "zone [{}, {}] x [{}, {}] is empty or not finite",
                self.min_x, self.max_x, self.min_y, self.max_y
            )));
        }
        Ok(())
    }
}

impl Default for Zone {
    fn default() -> Self {
        Self::new(50.0, 950.0, 50.0, 750.0)
    }
}

/// Retransmission-timeout estimator parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RttConfig {
    /// RTO used before the first RTT sample.
    #[serde(with = "millis")]
    pub initial_rto: Duration,
    /// Floor applied to `srtt + 4 * rttvar`.
    #[serde(with = "millis")]
    pub min_rto: Duration,
    /// Absolute ceiling on the backed-off RTO.
    #[serde(with = "millis")]
    pub max_rto: Duration,
    /// Ceiling on the exponential backoff multiplier.
    pub max_multiplier: u32,
}

impl Default for RttConfig {
    fn default() -> Self {
        Self {
            initial_rto: Duration::from_secs(1),
            min_rto: Duration::from_millis(100),
            max_rto: Duration::from_secs(60),
            max_multiplier: 64,
        }
    }
}

impl RttConfig {
    pub fn validate(&self) -> Result<()> {
        if self.initial_rto.is_zero() || self.min_rto.is_zero() {
            return Err(TrafficError::InvalidConfig(
                "initial_rto and min_rto must be positive".into(),
            ));
        }
        if self.min_rto > self.max_rto {
            return Err(TrafficError::InvalidConfig(format!(
                "min_rto {:?} exceeds max_rto {:?}",
                self.min_rto, self.max_rto
            )));
        }
        if self.max_multiplier == 0 {
            return Err(TrafficError::InvalidConfig(
                "max_multiplier must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Parameters of the pushed-response relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Pushed responses whose hop-count tag exceeds this are not re-forwarded.
    pub max_hops: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { max_hops: 1 }
    }
}

/// Configuration of a requesting node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub prefix: Name,
    #[serde(with = "millis")]
    pub lifetime: Duration,
    /// Requests per second.
    pub frequency: f64,
    pub randomize: Randomize,
    #[serde(with = "millis")]
    pub initial_offset: Duration,
    /// Period of the timeout sweeper, independent of the request interval.
    #[serde(with = "millis")]
    pub timeout_check_interval: Duration,
    pub must_be_fresh: bool,
    /// Sequence numbers are drawn from `0..max_seq`.
    pub max_seq: u32,
    /// When set, requests are only emitted while the node is inside the zone.
    pub zone: Option<Zone>,
    /// Seed for nonces and jitter.
    pub seed: u64,
    pub rtt: RttConfig,
    /// When set, pushed responses are re-forwarded one hop.
    pub relay: Option<RelayConfig>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            prefix: Name::root(),
            lifetime: Duration::from_secs(1),
            frequency: 1.0,
            randomize: Randomize::None,
            initial_offset: Duration::ZERO,
            timeout_check_interval: Duration::from_millis(50),
            must_be_fresh: false,
            max_seq: u32::MAX,
            zone: None,
            seed: 0,
            rtt: RttConfig::default(),
            relay: None,
        }
    }
}

impl ConsumerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Time between steady-state requests.
    pub fn interval(&self) -> Duration {
        interval_of(self.frequency)
    }

    pub fn validate(&self) -> Result<()> {
        validate_frequency(self.frequency)?;
        if self.timeout_check_interval.is_zero() {
            return Err(TrafficError::InvalidConfig(
                "timeout_check_interval must be positive".into(),
            ));
        }
        if self.lifetime.is_zero() {
            return Err(TrafficError::InvalidConfig("lifetime must be positive".into()));
        }
        if let Some(zone) = &self.zone {
            zone.validate()?;
        }
        self.rtt.validate()
    }
}

/// Configuration of a producing node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub prefix: Name,
    pub payload_size: usize,
    /// Zero means unlimited freshness.
    #[serde(with = "millis")]
    pub freshness: Duration,
    /// Pushes per second.
    pub frequency: f64,
    /// Whether to push responses proactively; requests are always answered.
    pub push: bool,
    #[serde(with = "millis")]
    pub initial_offset: Duration,
    /// Fake signature value; 0 denotes a valid signature.
    pub signature: u32,
    pub key_locator: Option<Name>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            prefix: Name::root(),
            payload_size: 1024,
            freshness: Duration::ZERO,
            frequency: 1.0,
            push: true,
            initial_offset: Duration::ZERO,
            signature: 0,
            key_locator: None,
        }
    }
}

impl ProducerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn interval(&self) -> Duration {
        interval_of(self.frequency)
    }

    pub fn validate(&self) -> Result<()> {
        validate_frequency(self.frequency)
    }
}

/// `1 / frequency`, saturating at `Duration::MAX` for a frequency that
/// [`validate_frequency`] rejects.
fn interval_of(frequency: f64) -> Duration {
    Duration::try_from_secs_f64(1.0 / frequency).unwrap_or(Duration::MAX)
}

/// The interval must be representable and non-zero.
fn validate_frequency(frequency: f64) -> Result<()> {
    if !(frequency.is_finite() && frequency > 0.0) {
        return Err(TrafficError::InvalidConfig(format!(
            "frequency must be positive and finite, got {frequency}"
        )));
    }
    match Duration::try_from_secs_f64(1.0 / frequency) {
        Ok(interval) if !interval.is_zero() => Ok(()),
        _ => Err(TrafficError::InvalidConfig(format!(
            "frequency {frequency} has no representable non-zero interval"
        ))),
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
