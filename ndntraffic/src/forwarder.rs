//! Relay-only node.

use crate::app::App;
use crate::config::RelayConfig;
use crate::context::{NodeContext, Timer, TimerId};
use crate::error::{Result, TrafficError};
use crate::packet::{Data, Nack};
use crate::relay::{PushRelay, RelayAction};

/// Re-emits pushed responses within the relay radius and issues no requests
/// of its own.
#[derive(Debug, Default)]
pub struct Forwarder {
    relay: PushRelay,
    running: bool,
    dropped: u64,
}

impl Forwarder {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            relay: PushRelay::new(config),
            running: false,
            dropped: 0,
        }
    }

    pub fn forwarded(&self) -> u64 {
        self.relay.forwarded()
    }

    /// Pushed responses seen but not relayed.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl App for Forwarder {
    fn start(&mut self, _ctx: &mut dyn NodeContext) -> Result<()> {
        if self.running {
            return Err(TrafficError::AlreadyRunning);
        }
        self.running = true;
        tracing::info!("forwarder started");
        Ok(())
    }

    fn stop(&mut self, _ctx: &mut dyn NodeContext) {
        if self.running {
            tracing::info!(forwarded = self.relay.forwarded(), "forwarder stopped");
        }
        self.running = false;
    }

    fn on_timer(&mut self, _id: TimerId, _timer: Timer, _ctx: &mut dyn NodeContext) -> Result<()> {
        Ok(())
    }

    fn on_data(&mut self, data: &Data, ctx: &mut dyn NodeContext) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        match self.relay.inspect(data) {
            RelayAction::Forward(copy) => ctx.send_data(copy),
            RelayAction::Drop => self.dropped += 1,
            RelayAction::Deliver => {}
        }
        Ok(())
    }

    fn on_nack(&mut self, nack: &Nack, _ctx: &mut dyn NodeContext) {
        tracing::info!(name = %nack.name(), reason = %nack.reason, "nack received");
    }

    fn is_running(&self) -> bool {
        self.running
    }
}
