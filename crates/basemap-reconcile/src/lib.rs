//! basemap-reconcile: Base-map reimport engine for a road and cycle-path
//! network (sans-IO).
//!
//! Reconciles a persisted, topologically connected network against a fresh
//! survey snapshot while keeping operator-entered, linearly referenced
//! attributes attached to the right stretch of road:
//! partition -> match by technical id -> classify -> split detection ->
//! topological update -> create -> delete -> orphan sweep -> events.
//!
//! This crate has **no I/O dependencies**. The snapshot, storage, the
//! attribute mapper and event delivery are reached through the traits in
//! [`collab`] and [`events`]; [`memory`] provides in-memory versions.

pub mod attributes;
pub mod classify;
pub mod collab;
pub mod events;
pub mod graph;
pub mod linref;
pub mod memory;
pub mod network;
pub mod node_index;
pub mod reimport;
pub mod split;
pub mod stats;
pub mod topology;
pub mod types;

pub use attributes::{EdgeAttributes, Orientable, Sided};
pub use classify::{Classification, TopologicalUpdate, classify};
pub use collab::{AttributeMapper, FeatureSource, MappedAttributes, MappingStore, NetworkStore};
pub use events::{ChangeCause, EventSink, ReimportEvent};
pub use linref::{Layer, Segment, Span};
pub use network::{
    Edge, EdgeId, EdgeProperties, ImportedFeature, Node, NodeId, Provenance, TechnicalId,
};
pub use node_index::NodeIndex;
pub use reimport::{Collaborators, Reimport};
pub use split::{SplitUpdate, find_split_if_exists};
pub use stats::ReimportStatistics;
pub use topology::TopologyExecutor;
pub use types::{BoundingBox, Point, Polyline, ReconcileConfig, ReconcileError};
