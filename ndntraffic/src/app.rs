//! The callback surface every node application implements.

use crate::context::{NodeContext, Timer, TimerId};
use crate::error::Result;
use crate::packet::{Data, Interest, Nack};

/// An application driven by a discrete-event executor.
///
/// Callbacks for one instance never run concurrently. A callback returning an
/// error has already stopped the application and cancelled its timers.
pub trait App {
    fn start(&mut self, ctx: &mut dyn NodeContext) -> Result<()>;

    /// Cancel every pending timer and clear all state. Idempotent.
    fn stop(&mut self, ctx: &mut dyn NodeContext);

    fn on_timer(&mut self, id: TimerId, timer: Timer, ctx: &mut dyn NodeContext) -> Result<()>;

    fn on_interest(&mut self, _interest: &Interest, _ctx: &mut dyn NodeContext) -> Result<()> {
        Ok(())
    }

    fn on_data(&mut self, _data: &Data, _ctx: &mut dyn NodeContext) -> Result<()> {
        Ok(())
    }

    fn on_nack(&mut self, _nack: &Nack, _ctx: &mut dyn NodeContext) {}

    fn is_running(&self) -> bool;
}
