//! Local adjacency view over the edges loaded for one partition.
//!
//! Split detection walks outward from an edge's endpoints; this view
//! answers "which edges touch this node" without going back to storage.
//! Edge payloads are kept next to the graph and replaced in place when an
//! executor rewrites an edge.

use std::collections::HashMap;

use petgraph::graph::{EdgeIndex, NodeIndex as GraphNode};
use petgraph::stable_graph::StableUnGraph;

use crate::network::{Edge, EdgeId, NodeId};

/// Undirected graph of network nodes and edges.
#[derive(Debug, Default)]
pub struct NetworkGraph {
    graph: StableUnGraph<NodeId, EdgeId>,
    nodes: HashMap<NodeId, GraphNode>,
    links: HashMap<EdgeId, EdgeIndex>,
    edges: HashMap<EdgeId, Edge>,
}

impl NetworkGraph {
    /// Build the view from a set of edges.
    #[must_use]
    pub fn from_edges(edges: impl IntoIterator<Item = Edge>) -> Self {
        let mut graph = Self::default();
        for edge in edges {
            graph.upsert(edge);
        }
        graph
    }

    /// Number of edges in the view.
    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether the view holds no edges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Look up an edge.
    #[must_use]
    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    /// Edges with `node` as an endpoint, in ascending id order.
    pub fn incident(&self, node: NodeId) -> Vec<&Edge> {
        let Some(&ix) = self.nodes.get(&node) else {
            return Vec::new();
        };
        let mut found: Vec<&Edge> = self
            .graph
            .edges(ix)
            .filter_map(|e| self.edges.get(e.weight()))
            .collect();
        found.sort_by_key(|e| e.id);
        found.dedup_by_key(|e| e.id);
        found
    }

    /// Insert an edge or replace a previous version of it, rewiring the
    /// graph if its endpoints changed.
    pub fn upsert(&mut self, edge: Edge) {
        if let Some(previous) = self.edges.get(&edge.id) {
            if previous.from == edge.from && previous.to == edge.to {
                self.edges.insert(edge.id, edge);
                return;
            }
            if let Some(ix) = self.links.remove(&edge.id) {
                self.graph.remove_edge(ix);
            }
        }
        let a = self.node(edge.from);
        let b = self.node(edge.to);
        let ix = self.graph.add_edge(a, b, edge.id);
        self.links.insert(edge.id, ix);
        self.edges.insert(edge.id, edge);
    }

    fn node(&mut self, id: NodeId) -> GraphNode {
        *self
            .nodes
            .entry(id)
            .or_insert_with(|| self.graph.add_node(id))
    }
}
