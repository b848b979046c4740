//! One-hop relaying of pushed responses.
//!
//! A pushed response that arrived over a link (it carries a hop-count tag) is
//! re-emitted once, with a fresh encoding, as long as the tag is within the
//! relay radius. A pushed response without a tag was produced locally or
//! served from the local cache and is never re-emitted, which keeps a node
//! from re-pushing its own output. A response that cannot be re-encoded is
//! dropped.

use crate::config::RelayConfig;
use crate::error::Result;
use crate::packet::Data;

/// What to do with an incoming response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// Re-emit this response downstream.
    Forward(Data),
    /// A regular response: hand it to the request-tracking path.
    Deliver,
    /// Pushed, but not ours to relay.
    Drop,
}

#[derive(Debug, Clone, Default)]
pub struct PushRelay {
    config: RelayConfig,
    forwarded: u64,
}

impl PushRelay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            forwarded: 0,
        }
    }

    /// Classify `data` and, for relayed responses, prepare the copy to send.
    pub fn inspect(&mut self, data: &Data) -> RelayAction {
        if !data.pushed {
            return RelayAction::Deliver;
        }
        match data.hop_count() {
            None => {
                tracing::debug!(
                    name = %data.name,
                    "pushed data without hop count, treating as local"
                );
                RelayAction::Drop
            }
            Some(hops) if hops > self.config.max_hops => {
                tracing::debug!(name = %data.name, hops, "pushed data beyond relay radius");
                RelayAction::Drop
            }
            Some(hops) => match reencode(data) {
                Ok(copy) => {
                    tracing::debug!(name = %data.name, hops, "forwarding pushed data");
                    self.forwarded += 1;
                    RelayAction::Forward(copy)
                }
                Err(e) => {
                    tracing::warn!(name = %data.name, error = %e, "cannot re-encode pushed data");
                    RelayAction::Drop
                }
            },
        }
    }

    /// Number of responses forwarded so far.
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }
}

/// Rebuild the packet from its own encoding. The hop-count tag belongs to the
/// incoming link and is carried over so the next link can extend it.
fn reencode(data: &Data) -> Result<Data> {
    let mut copy = Data::decode(&data.encode()?)?;
    copy.hop_count = data.hop_count;
    Ok(copy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Name;
    use bytes::Bytes;

    fn pushed() -> Data {
        Data::new(Name::from("/cam"), Bytes::from_static(b"frame")).with_pushed(true)
    }

    #[test]
    fn forwards_tagged_push_once() {
        let mut relay = PushRelay::default();
        let data = pushed().with_hop_count(1);
        match relay.inspect(&data) {
            RelayAction::Forward(copy) => {
                assert_eq!(copy.name, data.name);
                assert!(copy.pushed);
                assert_eq!(copy.content, data.content);
                assert_eq!(copy.hop_count(), Some(1));
            }
            other => panic!("expected forward, got {other:?}"),
        }
        assert_eq!(relay.forwarded(), 1);
    }

    #[test]
    fn never_forwards_untagged_push() {
        let mut relay = PushRelay::default();
        assert_eq!(relay.inspect(&pushed()), RelayAction::Drop);
        assert_eq!(relay.forwarded(), 0);
    }

    #[test]
    fn drops_push_beyond_radius() {
        let mut relay = PushRelay::new(RelayConfig { max_hops: 1 });
        assert_eq!(relay.inspect(&pushed().with_hop_count(2)), RelayAction::Drop);

        let mut wide = PushRelay::new(RelayConfig { max_hops: 3 });
        assert!(matches!(
            wide.inspect(&pushed().with_hop_count(2)),
            RelayAction::Forward(_)
        ));
    }

    #[test]
    fn unencodable_push_is_dropped() {
        let mut relay = PushRelay::default();
        let mut name = Name::from("/cam");
        name.push("f".repeat(usize::from(u16::MAX) + 1));
        let data = Data::new(name, Bytes::new())
            .with_pushed(true)
            .with_hop_count(1);
        assert_eq!(relay.inspect(&data), RelayAction::Drop);
        assert_eq!(relay.forwarded(), 0);
    }

    #[test]
    fn regular_data_is_delivered() {
        let mut relay = PushRelay::default();
        let data = Data::new(Name::from("/cam/1"), Bytes::new()).with_hop_count(1);
        assert_eq!(relay.inspect(&data), RelayAction::Deliver);
    }
}
