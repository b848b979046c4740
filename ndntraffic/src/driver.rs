//! Wall-clock execution on tokio.
//!
//! Each application runs inside its own task. Inbound packets arrive over an
//! mpsc channel, outbound packets leave over another, and timers are served
//! from a local queue with `tokio::time::sleep_until`. Every callback of one
//! application runs on that task, so its state is never touched concurrently.
//! Time inside a callback is frozen at the instant the callback started.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::app::App;
use crate::context::{EventScheduler, Face, Position, PositionProvider, Timer, TimerId};
use crate::error::{Result, TrafficError};
use crate::packet::{Data, Interest, Packet};

/// Depth of the inbound channel.
const INBOUND_CAPACITY: usize = 1024;

enum Inbound {
    Packet(Packet),
    Stop,
}

/// A position that can be updated from outside the node's task.
#[derive(Debug, Clone, Default)]
pub struct SharedPosition(Arc<RwLock<Option<Position>>>);

impl SharedPosition {
    pub fn new(position: Option<Position>) -> Self {
        Self(Arc::new(RwLock::new(position)))
    }

    pub fn set(&self, position: Option<Position>) {
        *self.0.write() = position;
    }
}

impl PositionProvider for SharedPosition {
    fn position(&self) -> Option<Position> {
        *self.0.read()
    }
}

/// Pending timers, earliest first. Cancelled ids are dropped lazily.
#[derive(Default)]
struct TimerQueue {
    heap: BinaryHeap<Reverse<(Duration, TimerId)>>,
    live: HashMap<TimerId, Timer>,
    next_id: u64,
}

impl TimerQueue {
    fn insert(&mut self, at: Duration, timer: Timer) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.heap.push(Reverse((at, id)));
        self.live.insert(id, timer);
        id
    }

    fn cancel(&mut self, id: TimerId) {
        self.live.remove(&id);
    }

    fn next_deadline(&mut self) -> Option<Duration> {
        while let Some(Reverse((at, id))) = self.heap.peek().copied() {
            if self.live.contains_key(&id) {
                return Some(at);
            }
            self.heap.pop();
        }
        None
    }

    fn pop_due(&mut self, now: Duration) -> Option<(TimerId, Timer)> {
        while let Some(Reverse((at, id))) = self.heap.peek().copied() {
            if at > now {
                return None;
            }
            self.heap.pop();
            if let Some(timer) = self.live.remove(&id) {
                return Some((id, timer));
            }
        }
        None
    }
}

struct DriverContext<'a, P> {
    now: Duration,
    timers: &'a mut TimerQueue,
    outbound: &'a mpsc::UnboundedSender<Packet>,
    position: &'a P,
}

impl<P> EventScheduler for DriverContext<'_, P> {
    fn now(&self) -> Duration {
        self.now
    }

    fn schedule_at(&mut self, at: Duration, timer: Timer) -> Result<TimerId> {
        if at < self.now {
            return Err(TrafficError::TimeInPast { at, now: self.now });
        }
        if self.outbound.is_closed() {
            return Err(TrafficError::SchedulerUnavailable);
        }
        Ok(self.timers.insert(at, timer))
    }

    fn cancel(&mut self, id: TimerId) {
        self.timers.cancel(id);
    }
}

impl<P> DriverContext<'_, P> {
    fn emit(&self, packet: Packet) {
        if self.outbound.send(packet).is_err() {
            tracing::debug!("outbound channel closed, packet dropped");
        }
    }
}

impl<P> Face for DriverContext<'_, P> {
    fn send_interest(&mut self, interest: Interest) {
        self.emit(Packet::Interest(interest));
    }

    fn send_data(&mut self, data: Data) {
        self.emit(Packet::Data(data));
    }
}

impl<P: PositionProvider> PositionProvider for DriverContext<'_, P> {
    fn position(&self) -> Option<Position> {
        self.position.position()
    }
}

/// Handle to a running node task.
pub struct DriverHandle {
    inbound: mpsc::Sender<Inbound>,
    task: JoinHandle<Result<()>>,
}

impl DriverHandle {
    /// Hand a packet to the application.
    pub async fn deliver(&self, packet: Packet) -> Result<()> {
        self.inbound
            .send(Inbound::Packet(packet))
            .await
            .map_err(|_| TrafficError::NotRunning)
    }

    /// Stop the application and wait for its task to finish.
    ///
    /// Returns the error that ended the task early, if any.
    pub async fn stop(self) -> Result<()> {
        // The task may already have exited on its own error.
        let _ = self.inbound.send(Inbound::Stop).await;
        self.task
            .await
            .map_err(|e| TrafficError::Internal(format!("node task failed: {e}")))?
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Start `app` on its own task. Outbound packets are written to `outbound`.
pub fn spawn<A, P>(app: A, outbound: mpsc::UnboundedSender<Packet>, position: P) -> DriverHandle
where
    A: App + Send + 'static,
    P: PositionProvider + Send + 'static,
{
    let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
    let task = tokio::spawn(run(app, rx, outbound, position));
    DriverHandle { inbound: tx, task }
}

async fn run<A, P>(
    mut app: A,
    mut inbound: mpsc::Receiver<Inbound>,
    outbound: mpsc::UnboundedSender<Packet>,
    position: P,
) -> Result<()>
where
    A: App,
    P: PositionProvider,
{
    let epoch = Instant::now();
    let mut timers = TimerQueue::default();

    macro_rules! ctx {
        () => {
            DriverContext {
                now: epoch.elapsed(),
                timers: &mut timers,
                outbound: &outbound,
                position: &position,
            }
        };
    }

    app.start(&mut ctx!())?;

    loop {
        let deadline = timers.next_deadline().map(|at| epoch + at);
        tokio::select! {
            msg = inbound.recv() => {
                let packet = match msg {
                    Some(Inbound::Packet(packet)) => packet,
                    Some(Inbound::Stop) | None => {
                        app.stop(&mut ctx!());
                        return Ok(());
                    }
                };
                match packet {
                    Packet::Interest(interest) => app.on_interest(&interest, &mut ctx!())?,
                    Packet::Data(data) => app.on_data(&data, &mut ctx!())?,
                    Packet::Nack(nack) => app.on_nack(&nack, &mut ctx!()),
                }
            }
            _ = sleep_until(deadline) => {
                let now = epoch.elapsed();
                while let Some((id, timer)) = timers.pop_due(now) {
                    app.on_timer(id, timer, &mut ctx!())?;
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
