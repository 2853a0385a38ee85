//! In-memory collaborators.
//!
//! Used by the integration tests and by the command-line driver, which
//! loads a network and a snapshot from JSON, reconciles them and writes
//! the result back out. None of these can fail.

use std::collections::BTreeMap;
use std::convert::Infallible;

use serde::{Deserialize, Serialize};

use crate::collab::{FeatureSource, MappingStore, NetworkStore};
use crate::linref::Span;
use crate::network::{Edge, EdgeId, ImportedFeature, Node, NodeId, Provenance, TechnicalId};
use crate::types::BoundingBox;

/// Serialised form of a [`MemoryNetwork`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// A network held in ordered maps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "NetworkSnapshot", into = "NetworkSnapshot")]
pub struct MemoryNetwork {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<EdgeId, Edge>,
    next_edge_id: u64,
    views_refreshed: usize,
}

impl MemoryNetwork {
    /// Empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Network holding `nodes` and `edges`.
    #[must_use]
    pub fn from_parts(
        nodes: impl IntoIterator<Item = Node>,
        edges: impl IntoIterator<Item = Edge>,
    ) -> Self {
        Self::from(NetworkSnapshot {
            nodes: nodes.into_iter().collect(),
            edges: edges.into_iter().collect(),
        })
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// How often [`NetworkStore::refresh_views`] was called.
    #[must_use]
    pub const fn views_refreshed(&self) -> usize {
        self.views_refreshed
    }

    /// Find an edge by technical id regardless of provenance.
    #[must_use]
    pub fn edge_with_technical_id(&self, technical_id: &str) -> Option<&Edge> {
        self.edges
            .values()
            .find(|e| e.technical_id.as_ref().is_some_and(|t| t.0 == technical_id))
    }
}

impl From<NetworkSnapshot> for MemoryNetwork {
    fn from(snapshot: NetworkSnapshot) -> Self {
        let next_edge_id = snapshot.edges.iter().map(|e| e.id.0 + 1).max().unwrap_or(1);
        Self {
            nodes: snapshot.nodes.into_iter().map(|n| (n.id, n)).collect(),
            edges: snapshot.edges.into_iter().map(|e| (e.id, e)).collect(),
            next_edge_id,
            views_refreshed: 0,
        }
    }
}

impl From<MemoryNetwork> for NetworkSnapshot {
    fn from(network: MemoryNetwork) -> Self {
        Self {
            nodes: network.nodes.into_values().collect(),
            edges: network.edges.into_values().collect(),
        }
    }
}

impl NetworkStore for MemoryNetwork {
    type Error = Infallible;

    fn count_edges(&self, provenance: Provenance) -> Result<usize, Self::Error> {
        Ok(self.edges.values().filter(|e| e.provenance == provenance).count())
    }

    fn node(&self, id: NodeId) -> Result<Option<Node>, Self::Error> {
        Ok(self.nodes.get(&id).copied())
    }

    fn edge(&self, id: EdgeId) -> Result<Option<Edge>, Self::Error> {
        Ok(self.edges.get(&id).cloned())
    }

    fn edge_by_technical_id(
        &self,
        provenance: Provenance,
        technical_id: &TechnicalId,
    ) -> Result<Option<Edge>, Self::Error> {
        Ok(self
            .edges
            .values()
            .find(|e| e.provenance == provenance && e.technical_id.as_ref() == Some(technical_id))
            .cloned())
    }

    fn edges_in(
        &self,
        provenance: Provenance,
        bbox: &BoundingBox,
    ) -> Result<Vec<Edge>, Self::Error> {
        Ok(self
            .edges
            .values()
            .filter(|e| e.provenance == provenance)
            .filter(|e| e.geometry.bounding_box().is_some_and(|b| b.intersects(bbox)))
            .cloned()
            .collect())
    }

    fn next_node_id(&self) -> Result<NodeId, Self::Error> {
        Ok(NodeId(self.nodes.keys().next_back().map_or(1, |id| id.0 + 1)))
    }

    fn allocate_edge_id(&mut self) -> Result<EdgeId, Self::Error> {
        let id = EdgeId(self.next_edge_id);
        self.next_edge_id += 1;
        Ok(id)
    }

    fn insert_node(&mut self, node: Node) -> Result<(), Self::Error> {
        self.nodes.insert(node.id, node);
        Ok(())
    }

    fn insert_edge(&mut self, edge: Edge) -> Result<(), Self::Error> {
        self.next_edge_id = self.next_edge_id.max(edge.id.0 + 1);
        self.edges.insert(edge.id, edge);
        Ok(())
    }

    fn update_edge(&mut self, edge: &Edge) -> Result<(), Self::Error> {
        self.edges.insert(edge.id, edge.clone());
        Ok(())
    }

    fn delete_edge(&mut self, id: EdgeId) -> Result<Option<Edge>, Self::Error> {
        Ok(self.edges.remove(&id))
    }

    fn delete_node(&mut self, id: NodeId) -> Result<Option<Node>, Self::Error> {
        Ok(self.nodes.remove(&id))
    }

    fn orphaned_nodes(&self, provenance: Provenance) -> Result<Vec<Node>, Self::Error> {
        let referenced: std::collections::HashSet<NodeId> =
            self.edges.values().flat_map(|e| [e.from, e.to]).collect();
        Ok(self
            .nodes
            .values()
            .filter(|n| n.provenance == provenance && !referenced.contains(&n.id))
            .copied()
            .collect())
    }

    fn refresh_views(&mut self) -> Result<(), Self::Error> {
        self.views_refreshed += 1;
        Ok(())
    }
}

/// A link from an edge to an edge of another source system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossSourceMapping {
    pub edge: EdgeId,
    /// Id of the edge in the other system.
    pub foreign_edge: String,
    /// Extent of `edge` the link refers to.
    pub span: Span,
}

/// Cross-source mapping table held in memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryMappings {
    entries: Vec<CrossSourceMapping>,
}

impl MemoryMappings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mapping: CrossSourceMapping) {
        self.entries.push(mapping);
    }

    /// Mappings of `edge`.
    pub fn for_edge(&self, edge: EdgeId) -> impl Iterator<Item = &CrossSourceMapping> {
        self.entries.iter().filter(move |m| m.edge == edge)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MappingStore for MemoryMappings {
    type Error = Infallible;

    fn delete_by_edge(&mut self, edge: EdgeId) -> Result<usize, Self::Error> {
        let before = self.entries.len();
        self.entries.retain(|m| m.edge != edge);
        Ok(before - self.entries.len())
    }
}

/// A snapshot held in memory, cut into rectangular partitions.
#[derive(Debug, Clone, Default)]
pub struct MemoryFeatureSource {
    features: Vec<ImportedFeature>,
    partitions: Vec<BoundingBox>,
}

impl MemoryFeatureSource {
    /// Use explicit partitions.
    #[must_use]
    pub const fn with_partitions(
        features: Vec<ImportedFeature>,
        partitions: Vec<BoundingBox>,
    ) -> Self {
        Self {
            features,
            partitions,
        }
    }

    /// Tile the features' extent into square cells of `cell_size`, keeping
    /// only cells that touch a feature. A non-positive or non-finite size
    /// yields one partition covering everything.
    #[must_use]
    pub fn grid(features: Vec<ImportedFeature>, cell_size: f64) -> Self {
        let boxes: Vec<BoundingBox> = features
            .iter()
            .filter_map(|f| f.geometry.bounding_box())
            .collect();
        let Some(extent) = BoundingBox::around(boxes.iter().flat_map(|b| [b.min, b.max])) else {
            return Self::with_partitions(features, Vec::new());
        };
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Self::with_partitions(features, vec![extent]);
        }

        let mut partitions = Vec::new();
        let mut row = 0_u32;
        loop {
            let y0 = cell_size.mul_add(f64::from(row), extent.min.y);
            if y0 > extent.max.y {
                break;
            }
            let mut col = 0_u32;
            loop {
                let x0 = cell_size.mul_add(f64::from(col), extent.min.x);
                if x0 > extent.max.x {
                    break;
                }
                let cell = BoundingBox::new(
                    crate::types::Point::new(x0, y0),
                    crate::types::Point::new(x0 + cell_size, y0 + cell_size),
                );
                if boxes.iter().any(|b| b.intersects(&cell)) {
                    partitions.push(cell);
                }
                col += 1;
            }
            row += 1;
        }
        Self::with_partitions(features, partitions)
    }
}

impl FeatureSource for MemoryFeatureSource {
    type Error = Infallible;

    fn partitions(&self) -> Result<Vec<BoundingBox>, Self::Error> {
        Ok(self.partitions.clone())
    }

    fn read_features(&self, partition: &BoundingBox) -> Result<Vec<ImportedFeature>, Self::Error> {
        Ok(self
            .features
            .iter()
            .filter(|f| f.geometry.bounding_box().is_some_and(|b| b.intersects(partition)))
            .cloned()
            .collect())
    }
}
