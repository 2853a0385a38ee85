//! Coordinate-snapping node index for one reconciliation run.
//!
//! Resolves endpoint coordinates to nodes: a coordinate within
//! [`snap_tolerance`](crate::ReconcileConfig::snap_tolerance) of an indexed
//! node reuses it, anything else fabricates a new node that later lookups
//! in the same run will see. Two distinct input points never collapse onto
//! one node.
//!
//! The index is owned by the run that created it and is never persisted.

use std::collections::HashMap;

use rstar::RTree;
use rstar::primitives::GeomWithData;

use crate::network::{Node, NodeId, Provenance};
use crate::types::{Point, ReconcileError};

/// An indexed node position carrying the node itself.
type IndexedNode = GeomWithData<[f64; 2], Node>;

/// Fixed-radius spatial lookup of nodes.
#[derive(Debug)]
pub struct NodeIndex {
    tree: RTree<IndexedNode>,
    nodes: HashMap<NodeId, Node>,
    created: Vec<NodeId>,
    next_id: u64,
    snap_tolerance: f64,
    provenance: Provenance,
}

impl NodeIndex {
    /// Create an empty index.
    ///
    /// Fabricated nodes get consecutive ids starting at `first_free_id`
    /// and carry `provenance`.
    #[must_use]
    pub fn new(snap_tolerance: f64, first_free_id: NodeId, provenance: Provenance) -> Self {
        Self {
            tree: RTree::new(),
            nodes: HashMap::new(),
            created: Vec::new(),
            next_id: first_free_id.0,
            snap_tolerance,
            provenance,
        }
    }

    /// Register an already persisted node. Returns `false` if it was
    /// indexed before.
    pub fn insert_existing(&mut self, node: Node) -> bool {
        if self.nodes.contains_key(&node.id) {
            return false;
        }
        self.next_id = self.next_id.max(node.id.0 + 1);
        self.register(node);
        true
    }

    /// Whether `id` is indexed.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Look up an indexed node.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Number of indexed nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes fabricated since the last call, in creation order.
    pub fn take_created(&mut self) -> Vec<Node> {
        self.created
            .drain(..)
            .filter_map(|id| self.nodes.get(&id).copied())
            .collect()
    }

    /// Resolve both endpoints of an edge.
    ///
    /// When both points snap to the same node, the strictly closer point
    /// keeps it (on a tie, `a` keeps it) and the other gets a new node.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::CoincidentEndpoints`] if `a == b`.
    pub fn find_or_create(&mut self, a: Point, b: Point) -> Result<(Node, Node), ReconcileError> {
        if a == b {
            return Err(ReconcileError::CoincidentEndpoints { x: a.x, y: a.y });
        }
        let found_a = self.nearest_within(a);
        let found_b = self.nearest_within(b);
        let resolved = match (found_a, found_b) {
            (Some((na, da)), Some((nb, db))) if na.id == nb.id => {
                if db < da {
                    (self.create(a), nb)
                } else {
                    (na, self.create(b))
                }
            }
            (found_a, found_b) => {
                let na = match found_a {
                    Some((n, _)) => n,
                    None => self.create(a),
                };
                let nb = match found_b {
                    Some((n, _)) => n,
                    None => self.create(b),
                };
                (na, nb)
            }
        };
        Ok(resolved)
    }

    /// Resolve the free endpoint of an edge whose other endpoint is known.
    ///
    /// The fixed node is returned unchanged in the first slot when
    /// `fixed_is_from`, otherwise in the second. The free point never
    /// snaps onto the fixed node.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::CoincidentEndpoints`] if `free` equals the
    /// fixed node's position.
    pub fn find_or_create_with_one_fixed(
        &mut self,
        free: Point,
        fixed: &Node,
        fixed_is_from: bool,
    ) -> Result<(Node, Node), ReconcileError> {
        if free == fixed.point {
            return Err(ReconcileError::CoincidentEndpoints {
                x: free.x,
                y: free.y,
            });
        }
        let resolved = match self.nearest_within(free) {
            Some((n, _)) if n.id != fixed.id => n,
            _ => self.create(free),
        };
        Ok(if fixed_is_from {
            (*fixed, resolved)
        } else {
            (resolved, *fixed)
        })
    }

    /// Closest indexed node within the snap tolerance. Equal distances
    /// resolve to the lower id so results do not depend on tree layout.
    fn nearest_within(&self, p: Point) -> Option<(Node, f64)> {
        let radius_sq = self.snap_tolerance * self.snap_tolerance;
        self.tree
            .locate_within_distance([p.x, p.y], radius_sq)
            .map(|entry| (entry.data, entry.data.point.distance(p)))
            .min_by(|(na, da), (nb, db)| da.total_cmp(db).then(na.id.cmp(&nb.id)))
    }

    fn create(&mut self, p: Point) -> Node {
        let node = Node {
            id: NodeId(self.next_id),
            point: p,
            provenance: self.provenance,
        };
        self.next_id += 1;
        self.created.push(node.id);
        self.register(node);
        node
    }

    fn register(&mut self, node: Node) {
        self.tree
            .insert(GeomWithData::new([node.point.x, node.point.y], node));
        self.nodes.insert(node.id, node);
    }
}
