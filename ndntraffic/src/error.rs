use std::time::Duration;

use thiserror::Error;

/// All errors produced by the traffic engine.
#[derive(Debug, Error)]
pub enum TrafficError {
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("unknown packet type: 0x{0:02x}")]
    UnknownPacketType(u8),

    #[error("unknown nack reason: 0x{0:02x}")]
    UnknownNackReason(u8),

    #[error("name component is not valid utf-8")]
    InvalidNameComponent,

    #[error("{field} too large to encode: {len} exceeds {max}")]
    FieldTooLarge {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("scheduler is unavailable")]
    SchedulerUnavailable,

    #[error("cannot schedule at {at:?}: current time is {now:?}")]
    TimeInPast { at: Duration, now: Duration },

    #[error("deadline overflows: {delay:?} after {now:?}")]
    TimeOverflow { now: Duration, delay: Duration },

    #[error("application is already running")]
    AlreadyRunning,

    #[error("application is not running")]
    NotRunning,

    #[error("node {0} not found")]
    NodeNotFound(usize),

    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TrafficError>;
