//! Deterministic discrete-event harness.
//!
//! Nodes share a broadcast medium: every packet a node sends is encoded once
//! and delivered, after `link_delay`, to every other running node within
//! `range`. Responses are tagged on delivery with the number of links they
//! crossed. Events at the same instant run in the order they were scheduled,
//! and all randomness comes from `SimConfig::seed`, so a run is a pure
//! function of its inputs.

use std::any::Any;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::app::App;
use crate::context::{EventScheduler, Face, Position, PositionProvider, Timer, TimerId};
use crate::error::{Result, TrafficError};
use crate::packet::{Data, Interest, Packet};

pub type NodeId = usize;

/// Medium parameters.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// One-way delay of every link.
    pub link_delay: Duration,
    /// Radio range in metres.
    pub range: f64,
    /// Probability that a single delivery is lost, in `[0.0, 1.0]`.
    pub loss_rate: f64,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            link_delay: Duration::from_millis(2),
            range: 250.0,
            loss_rate: 0.0,
            seed: 0,
        }
    }
}

/// Where a node is over time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mobility {
    /// No position. The node hears, and is heard by, every other node.
    None,
    Static(Position),
    /// Constant velocity in metres per second from `origin` at time zero.
    Linear { origin: Position, velocity: (f64, f64) },
}

impl Mobility {
    pub fn position_at(&self, t: Duration) -> Option<Position> {
        match *self {
            Mobility::None => None,
            Mobility::Static(p) => Some(p),
            Mobility::Linear { origin, velocity } => {
                let s = t.as_secs_f64();
                Some(Position::new(origin.x + velocity.0 * s, origin.y + velocity.1 * s))
            }
        }
    }
}

/// One packet put on the medium.
#[derive(Debug, Clone)]
pub struct Transmission {
    pub at: Duration,
    pub from: NodeId,
    pub packet: Packet,
}

/// Lets the harness hand back concrete application types.
trait SimApp: App {
    fn as_any(&self) -> &dyn Any;
}

impl<T: App + Any> SimApp for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Node {
    app: Box<dyn SimApp>,
    mobility: Mobility,
}

enum EventKind {
    Start,
    Stop,
    Timer { id: TimerId, timer: Timer },
    Deliver { wire: Bytes, hop_count: Option<u32> },
}

struct Event {
    at: Duration,
    order: u64,
    node: NodeId,
    kind: EventKind,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        (self.at, self.order) == (other.at, other.order)
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.order).cmp(&(other.at, other.order))
    }
}

/// Shared state every node context writes into.
struct Core {
    now: Duration,
    queue: BinaryHeap<Reverse<Event>>,
    next_order: u64,
    next_timer: u64,
    cancelled: HashSet<TimerId>,
    /// Owner of every timer still in the queue.
    timers: HashMap<TimerId, NodeId>,
}

impl Core {
    fn push(&mut self, at: Duration, node: NodeId, kind: EventKind) {
        let order = self.next_order;
        self.next_order += 1;
        self.queue.push(Reverse(Event {
            at,
            order,
            node,
            kind,
        }));
    }
}

/// The [`crate::context::NodeContext`] handed to an application during one
/// callback.
struct SimContext<'a> {
    node: NodeId,
    position: Option<Position>,
    core: &'a mut Core,
    outbox: Vec<Packet>,
}

impl EventScheduler for SimContext<'_> {
    fn now(&self) -> Duration {
        self.core.now
    }

    fn schedule_at(&mut self, at: Duration, timer: Timer) -> Result<TimerId> {
        if at < self.core.now {
            return Err(TrafficError::TimeInPast {
                at,
                now: self.core.now,
            });
        }
        self.core.next_timer += 1;
        let id = TimerId(self.core.next_timer);
        self.core.timers.insert(id, self.node);
        self.core.push(at, self.node, EventKind::Timer { id, timer });
        Ok(id)
    }

    fn cancel(&mut self, id: TimerId) {
        if self.core.timers.get(&id) == Some(&self.node) {
            self.core.cancelled.insert(id);
        }
    }
}

impl Face for SimContext<'_> {
    fn send_interest(&mut self, interest: Interest) {
        self.outbox.push(Packet::Interest(interest));
    }

    fn send_data(&mut self, data: Data) {
        self.outbox.push(Packet::Data(data));
    }
}

impl PositionProvider for SimContext<'_> {
    fn position(&self) -> Option<Position> {
        self.position
    }
}

pub struct Simulator {
    config: SimConfig,
    nodes: Vec<Node>,
    core: Core,
    rng: StdRng,
    trace: Vec<Transmission>,
    failures: Vec<(NodeId, TrafficError)>,
}

impl Simulator {
    pub fn new(config: SimConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            nodes: Vec::new(),
            core: Core {
                now: Duration::ZERO,
                queue: BinaryHeap::new(),
                next_order: 0,
                next_timer: 0,
                cancelled: HashSet::new(),
                timers: HashMap::new(),
            },
            rng,
            trace: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn add_node<A: App + 'static>(&mut self, app: A, mobility: Mobility) -> NodeId {
        self.nodes.push(Node {
            app: Box::new(app),
            mobility,
        });
        self.nodes.len() - 1
    }

    pub fn start_at(&mut self, node: NodeId, at: Duration) -> Result<()> {
        self.check(node, at)?;
        self.core.push(at, node, EventKind::Start);
        Ok(())
    }

    pub fn stop_at(&mut self, node: NodeId, at: Duration) -> Result<()> {
        self.check(node, at)?;
        self.core.push(at, node, EventKind::Stop);
        Ok(())
    }

    /// Deliver `packet` to `node` at `at` as if it came over a link, without
    /// touching the medium or its hop-count tag.
    pub fn inject(&mut self, node: NodeId, at: Duration, packet: Packet) -> Result<()> {
        self.check(node, at)?;
        let hop_count = match &packet {
            Packet::Data(d) => d.hop_count(),
            _ => None,
        };
        let wire = packet.encode()?;
        self.core.push(at, node, EventKind::Deliver { wire, hop_count });
        Ok(())
    }

    pub fn now(&self) -> Duration {
        self.core.now
    }

    /// Process every event scheduled at or before `end`, then advance the
    /// clock to `end`.
    pub fn run_until(&mut self, end: Duration) {
        while let Some(Reverse(event)) = self.core.queue.peek() {
            if event.at > end {
                break;
            }
            let Some(Reverse(event)) = self.core.queue.pop() else {
                break;
            };
            self.core.now = event.at;
            self.dispatch(event);
        }
        self.core.now = self.core.now.max(end);
    }

    /// Borrow the application on `node` as its concrete type.
    pub fn app<A: App + 'static>(&self, node: NodeId) -> Option<&A> {
        self.nodes.get(node)?.app.as_any().downcast_ref::<A>()
    }

    pub fn position(&self, node: NodeId) -> Option<Position> {
        self.nodes.get(node)?.mobility.position_at(self.core.now)
    }

    /// Everything put on the medium so far.
    pub fn transmissions(&self) -> &[Transmission] {
        &self.trace
    }

    /// Errors returned by application callbacks and packets that could not
    /// be put on the medium, in order.
    pub fn failures(&self) -> &[(NodeId, TrafficError)] {
        &self.failures
    }

    /// Events still queued, cancelled timers included.
    pub fn pending_events(&self) -> usize {
        self.core.queue.len()
    }

    fn check(&self, node: NodeId, at: Duration) -> Result<()> {
        if node >= self.nodes.len() {
            return Err(TrafficError::NodeNotFound(node));
        }
        if at < self.core.now {
            return Err(TrafficError::TimeInPast {
                at,
                now: self.core.now,
            });
        }
        Ok(())
    }

    fn dispatch(&mut self, event: Event) {
        let node_id = event.node;
        if let EventKind::Timer { id, .. } = &event.kind {
            self.core.timers.remove(id);
            if self.core.cancelled.remove(id) {
                return;
            }
        }

        let Some(node) = self.nodes.get_mut(node_id) else {
            return;
        };
        let mut ctx = SimContext {
            node: node_id,
            position: node.mobility.position_at(self.core.now),
            core: &mut self.core,
            outbox: Vec::new(),
        };

        let result = match event.kind {
            EventKind::Start => node.app.start(&mut ctx),
            EventKind::Stop => {
                node.app.stop(&mut ctx);
                Ok(())
            }
            EventKind::Timer { id, timer } => node.app.on_timer(id, timer, &mut ctx),
            EventKind::Deliver { wire, hop_count } => {
                if !node.app.is_running() {
                    return;
                }
                match Packet::decode(&wire) {
                    Ok(Packet::Interest(interest)) => node.app.on_interest(&interest, &mut ctx),
                    Ok(Packet::Data(mut data)) => {
                        data.hop_count = hop_count;
                        node.app.on_data(&data, &mut ctx)
                    }
                    Ok(Packet::Nack(nack)) => {
                        node.app.on_nack(&nack, &mut ctx);
                        Ok(())
                    }
                    Err(e) => {
                        tracing::warn!(node = node_id, error = %e, "undecodable packet dropped");
                        Ok(())
                    }
                }
            }
        };

        let outbox = std::mem::take(&mut ctx.outbox);
        if let Err(e) = result {
            tracing::warn!(node = node_id, error = %e, "application failed");
            self.failures.push((node_id, e));
        }
        for packet in outbox {
            self.broadcast(node_id, packet);
        }
    }

    fn broadcast(&mut self, from: NodeId, packet: Packet) {
        let now = self.core.now;
        let origin = self.nodes[from].mobility.position_at(now);
        let hop_count = match &packet {
            Packet::Data(d) => Some(d.hop_count().unwrap_or(0) + 1),
            _ => None,
        };
        let wire = match packet.encode() {
            Ok(wire) => wire,
            Err(e) => {
                tracing::warn!(from, name = %packet.name(), error = %e, "cannot encode packet");
                self.failures.push((from, e));
                return;
            }
        };
        let at = now + self.config.link_delay;

        for (to, node) in self.nodes.iter().enumerate() {
            if to == from {
                continue;
            }
            let in_range = match (origin, node.mobility.position_at(now)) {
                (Some(a), Some(b)) => a.distance(&b) <= self.config.range,
                _ => true,
            };
            if !in_range {
                continue;
            }
            if self.config.loss_rate > 0.0 && self.rng.gen_bool(self.config.loss_rate.min(1.0)) {
                tracing::trace!(from, to, name = %packet.name(), "delivery lost");
                continue;
            }
            self.core.push(
                at,
                to,
                EventKind::Deliver {
                    wire: wire.clone(),
                    hop_count,
                },
            );
        }
        self.trace.push(Transmission {
            at: now,
            from,
            packet,
        });
    }
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("now", &self.core.now)
            .field("nodes", &self.nodes.len())
            .field("pending_events", &self.core.queue.len())
            .finish()
    }
}
