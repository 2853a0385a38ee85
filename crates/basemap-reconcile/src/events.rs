//! Change and deletion events for consumers of the network.
//!
//! Records elsewhere (measures, cross-source mappings) reference edges and
//! nodes by id and linear reference. The engine does not touch them; it
//! tells their owners what moved or disappeared and lets them re-validate.
//! Delivery is at-least-once, so consumers deduplicate on
//! [`ReimportEvent::idempotency_key`].

use std::convert::Infallible;
use std::hash::{Hash, Hasher};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher24;

use crate::network::{EdgeId, NodeId};
use crate::types::{Point, Polyline};

/// Fixed key so fingerprints are comparable across runs and processes.
const FINGERPRINT_KEY: [u8; 16] = [0u8; 16];

/// Why an entity was reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeCause {
    /// Geometry moved by more than the strong-change distance.
    StronglyAltered,
    /// The edge was shortened by a split.
    Split,
    /// Attribute layers could not be carried over and were reset.
    AttributesReset,
    /// The edge's feature is no longer delivered.
    AbsentFromSnapshot,
    /// The node lost its last edge.
    Orphaned,
}

/// The entity an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Entity {
    Edge(EdgeId),
    Node(NodeId),
}

/// One notification emitted by a reimport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ReimportEvent {
    EdgeChanged {
        edge: EdgeId,
        previous: Polyline,
        cause: ChangeCause,
        timestamp: SystemTime,
    },
    EdgeDeleted {
        edge: EdgeId,
        previous: Polyline,
        cause: ChangeCause,
        timestamp: SystemTime,
    },
    NodeDeleted {
        node: NodeId,
        previous: Point,
        cause: ChangeCause,
        timestamp: SystemTime,
    },
}

impl ReimportEvent {
    /// The affected entity.
    #[must_use]
    pub const fn entity(&self) -> Entity {
        match self {
            Self::EdgeChanged { edge, .. } | Self::EdgeDeleted { edge, .. } => Entity::Edge(*edge),
            Self::NodeDeleted { node, .. } => Entity::Node(*node),
        }
    }

    /// Why the entity was reported.
    #[must_use]
    pub const fn cause(&self) -> ChangeCause {
        match self {
            Self::EdgeChanged { cause, .. }
            | Self::EdgeDeleted { cause, .. }
            | Self::NodeDeleted { cause, .. } => *cause,
        }
    }

    /// Run timestamp the event belongs to.
    #[must_use]
    pub const fn timestamp(&self) -> SystemTime {
        match self {
            Self::EdgeChanged { timestamp, .. }
            | Self::EdgeDeleted { timestamp, .. }
            | Self::NodeDeleted { timestamp, .. } => *timestamp,
        }
    }

    /// Key under which redelivered events compare equal.
    #[must_use]
    pub const fn idempotency_key(&self) -> (Entity, ChangeCause, SystemTime) {
        (self.entity(), self.cause(), self.timestamp())
    }

    /// SipHash-2-4 over the pre-change geometry.
    ///
    /// Lets a consumer tell whether its stored copy of the geometry is the
    /// one the event refers to without comparing coordinates.
    #[must_use]
    pub fn geometry_fingerprint(&self) -> u64 {
        let mut hasher = SipHasher24::new_with_key(&FINGERPRINT_KEY);
        match self {
            Self::EdgeChanged { previous, .. } | Self::EdgeDeleted { previous, .. } => {
                previous.len().hash(&mut hasher);
                for p in previous.points() {
                    hash_point(*p, &mut hasher);
                }
            }
            Self::NodeDeleted { previous, .. } => hash_point(*previous, &mut hasher),
        }
        hasher.finish()
    }
}

fn hash_point(p: Point, hasher: &mut impl Hasher) {
    p.x.to_bits().hash(hasher);
    p.y.to_bits().hash(hasher);
}

/// Receiver of reimport events.
pub trait EventSink {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Deliver one event. Called in emission order.
    ///
    /// # Errors
    ///
    /// Returns the sink's error if the event could not be delivered.
    fn publish(&mut self, event: ReimportEvent) -> Result<(), Self::Error>;
}

impl EventSink for Vec<ReimportEvent> {
    type Error = Infallible;

    fn publish(&mut self, event: ReimportEvent) -> Result<(), Self::Error> {
        self.push(event);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn changed(geometry: Polyline, timestamp: SystemTime) -> ReimportEvent {
        ReimportEvent::EdgeChanged {
            edge: EdgeId(3),
            previous: geometry,
            cause: ChangeCause::StronglyAltered,
            timestamp,
        }
    }

    fn line(x: f64) -> Polyline {
        Polyline::new(vec![Point::new(0.0, 0.0), Point::new(x, 0.0)])
    }

    #[test]
    fn idempotency_key_ignores_geometry() {
        let a = changed(line(1.0), at(10));
        let b = changed(line(2.0), at(10));
        assert_eq!(a.idempotency_key(), b.idempotency_key());
        assert_ne!(a.idempotency_key(), changed(line(1.0), at(11)).idempotency_key());
    }

    #[test]
    fn fingerprint_tracks_geometry() {
        let a = changed(line(1.0), at(10));
        assert_eq!(a.geometry_fingerprint(), changed(line(1.0), at(99)).geometry_fingerprint());
        assert_ne!(a.geometry_fingerprint(), changed(line(2.0), at(10)).geometry_fingerprint());
    }

    #[test]
    fn vec_sink_keeps_order() {
        let mut sink: Vec<ReimportEvent> = Vec::new();
        sink.publish(changed(line(1.0), at(1))).unwrap();
        sink.publish(ReimportEvent::NodeDeleted {
            node: NodeId(4),
            previous: Point::new(1.0, 2.0),
            cause: ChangeCause::Orphaned,
            timestamp: at(1),
        })
        .unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(sink[1].entity(), Entity::Node(NodeId(4)));
        assert_eq!(sink[1].cause(), ChangeCause::Orphaned);
    }

    #[test]
    fn serde_tags_kind() {
        let json = serde_json::to_value(changed(line(1.0), at(1))).unwrap();
        assert_eq!(json["kind"], "edge-changed");
        assert_eq!(json["cause"], "strongly-altered");
    }
}
