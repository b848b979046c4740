//! ndntraffic -- request/response traffic generation for named-data networks.
//!
//! Provides the reliability and pacing engine of a traffic source:
//! - **Ledger**: outstanding requests indexed by sequence number and send time
//! - **RTT estimation**: Jacobson/Karels smoothing with exponential backoff
//! - **Timeout sweeping**: periodic RTO checks feeding a retransmission queue
//! - **Scheduling**: constant-rate, jittered and position-gated cadences
//! - **Push relay**: one-hop re-forwarding of unsolicited responses
//!
//! Applications are sans-IO ([`App`]) and run unchanged under the
//! deterministic [`sim::Simulator`] or the tokio [`driver`].

pub mod app;
pub mod config;
pub mod consumer;
pub mod context;
pub mod driver;
pub mod error;
pub mod forwarder;
pub mod ledger;
pub mod packet;
pub mod producer;
pub mod relay;
pub mod report;
pub mod rtt;
pub mod schedule;
pub mod sim;
pub mod sweeper;

// Re-export key public types at crate root.
pub use app::App;
pub use config::{ConsumerConfig, ProducerConfig, Randomize, RelayConfig, RttConfig, Zone};
pub use consumer::{Consumer, ConsumerStats};
pub use context::{EventScheduler, Face, NodeContext, Position, PositionProvider, Timer, TimerId};
pub use error::{Result, TrafficError};
pub use forwarder::Forwarder;
pub use ledger::Ledger;
pub use packet::{Data, Interest, Nack, NackReason, Name, Packet};
pub use producer::Producer;
pub use relay::{PushRelay, RelayAction};
pub use report::{DelayReporter, MemoryReporter, NullReporter, TracingReporter};
pub use rtt::RttEstimator;
pub use schedule::{RequestScheduler, SchedulePolicy};
pub use sweeper::TimeoutSweeper;
