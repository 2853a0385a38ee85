//! Persisted network entities: nodes, edges and the ephemeral imported
//! feature they are reconciled against.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attributes::EdgeAttributes;
use crate::types::{Point, Polyline};

/// Storage identity of a node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Storage identity of an edge.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EdgeId(pub u64);

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// External id of a survey feature, stable across reimports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TechnicalId(pub String);

impl fmt::Display for TechnicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TechnicalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Source system an entity originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    /// Delivered by the external base-map survey; subject to reimport.
    #[default]
    BaseMap,
    /// Digitised by an operator.
    Operator,
    /// Taken over from a third-party network.
    ThirdParty,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BaseMap => "base-map",
            Self::Operator => "operator",
            Self::ThirdParty => "third-party",
        })
    }
}

/// A network node. Its lifetime is derived entirely from edge references.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub point: Point,
    pub provenance: Provenance,
}

/// Non-linear, non-geometric edge properties. These are owned by the
/// survey and overwritten on every reimport.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EdgeProperties {
    /// Street or path name.
    pub name: Option<String>,
    /// Road category as delivered by the survey.
    pub category: Option<String>,
}

/// A network edge.
///
/// `geometry` runs from the `from` node to the `to` node; its point order
/// defines the stationing direction that all attribute layers refer to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    pub geometry: Polyline,
    pub provenance: Provenance,
    /// Survey id used to match the edge against imported features.
    pub technical_id: Option<TechnicalId>,
    #[serde(default)]
    pub properties: EdgeProperties,
    pub attributes: EdgeAttributes,
}

impl Edge {
    /// The endpoint opposite `node`, or `None` if `node` is not an endpoint.
    #[must_use]
    pub fn other_end(&self, node: NodeId) -> Option<NodeId> {
        if node == self.from {
            Some(self.to)
        } else if node == self.to {
            Some(self.from)
        } else {
            None
        }
    }

    /// Geometry point at the `node` end of the edge.
    #[must_use]
    pub fn point_at_node(&self, node: NodeId) -> Option<Point> {
        if node == self.from {
            self.geometry.first().copied()
        } else if node == self.to {
            self.geometry.last().copied()
        } else {
            None
        }
    }
}

/// One record of a survey snapshot. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedFeature {
    pub technical_id: TechnicalId,
    pub geometry: Polyline,
    /// Raw source attributes, interpreted only by the attribute mapper.
    #[serde(default)]
    pub raw: BTreeMap<String, String>,
}
