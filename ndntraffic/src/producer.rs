//! Proactive producer.
//!
//! Answers every Interest with a regular response and, independently, pushes
//! a response for its prefix on a fixed cadence.

use bytes::Bytes;

use crate::app::App;
use crate::config::ProducerConfig;
use crate::context::{NodeContext, Timer, TimerId};
use crate::error::{Result, TrafficError};
use crate::packet::{Data, Interest, Name, SignatureInfo};
use crate::schedule::{RequestScheduler, SchedulePolicy};

pub struct Producer {
    config: ProducerConfig,
    scheduler: RequestScheduler,
    content: Bytes,
    running: bool,
    pushed: u64,
    answered: u64,
}

impl Producer {
    pub fn new(config: ProducerConfig) -> Result<Self> {
        config.validate()?;
        let scheduler = RequestScheduler::new(
            SchedulePolicy::Constant {
                initial_offset: config.initial_offset,
            },
            config.interval(),
            Timer::Push,
        );
        let content = Bytes::from(vec![0u8; config.payload_size]);
        Ok(Self {
            config,
            scheduler,
            content,
            running: false,
            pushed: 0,
            answered: 0,
        })
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Number of pushed responses emitted.
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    /// Number of Interests answered.
    pub fn answered(&self) -> u64 {
        self.answered
    }

    fn make_data(&self, name: Name, pushed: bool) -> Data {
        Data::new(name, self.content.clone())
            .with_freshness(self.config.freshness)
            .with_pushed(pushed)
            .with_signature(SignatureInfo::fake(
                self.config.signature,
                self.config.key_locator.clone(),
            ))
    }

    fn push(&mut self, ctx: &mut dyn NodeContext) -> Result<()> {
        let data = self.make_data(self.config.prefix.clone(), true);
        tracing::debug!(name = %data.name, at = ?ctx.now(), "pushing data");
        ctx.send_data(data);
        self.pushed += 1;
        if let Err(e) = self.scheduler.arm(ctx) {
            tracing::warn!(error = %e, "cannot re-arm push timer, stopping producer");
            self.stop(ctx);
            return Err(e);
        }
        Ok(())
    }
}

impl App for Producer {
    fn start(&mut self, ctx: &mut dyn NodeContext) -> Result<()> {
        if self.running {
            return Err(TrafficError::AlreadyRunning);
        }
        self.running = true;
        tracing::info!(prefix = %self.config.prefix, push = self.config.push, "producer started");
        if self.config.push {
            if let Err(e) = self.scheduler.arm(ctx) {
                self.stop(ctx);
                return Err(e);
            }
        }
        Ok(())
    }

    fn stop(&mut self, ctx: &mut dyn NodeContext) {
        self.scheduler.cancel(ctx);
        self.scheduler.reset();
        if self.running {
            tracing::info!(prefix = %self.config.prefix, pushed = self.pushed, "producer stopped");
        }
        self.running = false;
    }

    fn on_timer(&mut self, id: TimerId, timer: Timer, ctx: &mut dyn NodeContext) -> Result<()> {
        if !self.running || timer != Timer::Push || !self.scheduler.on_fire(id) {
            return Ok(());
        }
        self.push(ctx)
    }

    fn on_interest(&mut self, interest: &Interest, ctx: &mut dyn NodeContext) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        if !self.config.prefix.is_prefix_of(&interest.name) {
            return Ok(());
        }
        tracing::debug!(name = %interest.name, "answering interest");
        let data = self.make_data(interest.name.clone(), false);
        ctx.send_data(data);
        self.answered += 1;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("prefix", &self.config.prefix)
            .field("running", &self.running)
            .field("pushed", &self.pushed)
            .field("answered", &self.answered)
            .finish()
    }
}
