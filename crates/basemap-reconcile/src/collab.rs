//! Seams to the systems around the engine.
//!
//! The engine owns no I/O. Snapshot delivery, attribute mapping, storage
//! and the cross-source mapping table are reached through these traits.
//! Any error they return aborts the run; storage is expected to wrap the
//! whole run in one transaction so an aborted run leaves no trace.

use crate::attributes::EdgeAttributes;
use crate::network::{
    Edge, EdgeId, EdgeProperties, ImportedFeature, Node, NodeId, Provenance, TechnicalId,
};
use crate::types::{BoundingBox, ReconcileError};

/// Domain attributes derived from one imported feature.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedAttributes {
    /// Overwrite the edge's properties on every reimport.
    pub properties: EdgeProperties,
    /// Initial layers for edges created from the feature.
    pub attributes: EdgeAttributes,
}

/// Delivers the survey snapshot.
pub trait FeatureSource {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Non-overlapping partitions covering the snapshot.
    ///
    /// # Errors
    ///
    /// Returns the source's error if the partitioning cannot be obtained.
    fn partitions(&self) -> Result<Vec<BoundingBox>, Self::Error>;

    /// All features of `partition`. Features crossing a partition boundary
    /// may be delivered by more than one partition.
    ///
    /// # Errors
    ///
    /// Returns the source's error if the features cannot be read.
    fn read_features(&self, partition: &BoundingBox) -> Result<Vec<ImportedFeature>, Self::Error>;
}

/// Turns raw feature attributes into domain attributes. Must be pure.
pub trait AttributeMapper {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Map one feature.
    ///
    /// # Errors
    ///
    /// Returns the mapper's error if the raw attributes cannot be mapped.
    fn map_attributes(&self, feature: &ImportedFeature) -> Result<MappedAttributes, Self::Error>;
}

/// Persistent network storage.
///
/// Lookups return edges with their attribute layers loaded.
#[allow(clippy::missing_errors_doc)]
pub trait NetworkStore {
    type Error: std::error::Error + Send + Sync + 'static;

    fn count_edges(&self, provenance: Provenance) -> Result<usize, Self::Error>;

    fn node(&self, id: NodeId) -> Result<Option<Node>, Self::Error>;

    fn edge(&self, id: EdgeId) -> Result<Option<Edge>, Self::Error>;

    fn edge_by_technical_id(
        &self,
        provenance: Provenance,
        technical_id: &TechnicalId,
    ) -> Result<Option<Edge>, Self::Error>;

    /// Edges of `provenance` whose bounding box intersects `bbox`.
    fn edges_in(
        &self,
        provenance: Provenance,
        bbox: &BoundingBox,
    ) -> Result<Vec<Edge>, Self::Error>;

    /// Smallest node id not yet in use.
    fn next_node_id(&self) -> Result<NodeId, Self::Error>;

    /// Reserve a fresh edge id.
    fn allocate_edge_id(&mut self) -> Result<EdgeId, Self::Error>;

    fn insert_node(&mut self, node: Node) -> Result<(), Self::Error>;

    fn insert_edge(&mut self, edge: Edge) -> Result<(), Self::Error>;

    /// Replace a stored edge by id.
    fn update_edge(&mut self, edge: &Edge) -> Result<(), Self::Error>;

    fn delete_edge(&mut self, id: EdgeId) -> Result<Option<Edge>, Self::Error>;

    fn delete_node(&mut self, id: NodeId) -> Result<Option<Node>, Self::Error>;

    /// Nodes of `provenance` that no edge references.
    fn orphaned_nodes(&self, provenance: Provenance) -> Result<Vec<Node>, Self::Error>;

    /// Refresh derived views once all changes are written.
    fn refresh_views(&mut self) -> Result<(), Self::Error>;
}

/// Table linking edges to edges of other source systems by linear
/// reference.
pub trait MappingStore {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Remove every mapping of `edge`; returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the entries cannot be removed.
    fn delete_by_edge(&mut self, edge: EdgeId) -> Result<usize, Self::Error>;
}

/// Wrap a storage failure.
pub(crate) fn storage_error(err: impl std::error::Error + Send + Sync + 'static) -> ReconcileError {
    ReconcileError::Storage(Box::new(err))
}
