//! Partitioned reimport orchestration.
//!
//! A run walks the snapshot partition by partition. Each partition loads
//! the existing edges around it, matches them with the partition's
//! features by technical id, classifies the matches and creates edges for
//! the rest. Topological updates are held back until every partition has
//! created its edges, so split detection sees new pieces wherever they
//! were delivered. Deletions, the orphan sweep and event delivery come
//! last, because an edge missing from one partition may still be
//! delivered by a neighbour.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::{Instant, SystemTime};

use tracing::{debug, info, info_span, warn};

use crate::classify::{Classification, TopologicalUpdate, classify};
use crate::collab::{
    AttributeMapper, FeatureSource, MappedAttributes, MappingStore, NetworkStore, storage_error,
};
use crate::events::{ChangeCause, EventSink, ReimportEvent};
use crate::graph::NetworkGraph;
use crate::network::{Edge, EdgeId, ImportedFeature, NodeId, TechnicalId};
use crate::node_index::NodeIndex;
use crate::split::find_split_if_exists;
use crate::stats::ReimportStatistics;
use crate::topology::{TopologyExecutor, UpdateContext};
use crate::types::{BoundingBox, Polyline, ReconcileConfig, ReconcileError};

/// Everything a run talks to.
pub struct Collaborators<'a, S, A, N, M, E> {
    pub source: &'a S,
    pub mapper: &'a A,
    pub network: &'a mut N,
    pub mappings: &'a mut M,
    pub events: &'a mut E,
}

/// A configured reimport.
#[derive(Debug, Clone)]
pub struct Reimport {
    config: ReconcileConfig,
    timestamp: Option<SystemTime>,
}

/// State shared by all partitions of one run.
struct RunState {
    nodes: NodeIndex,
    stats: ReimportStatistics,
    /// Technical ids delivered by any partition so far.
    seen: HashSet<TechnicalId>,
    /// Edges matched or created by any partition so far.
    processed: HashSet<EdgeId>,
    deletion_candidates: BTreeSet<EdgeId>,
    changed: BTreeMap<EdgeId, ChangeCause>,
    /// Geometry of each edge before the run first rewrote it.
    previous: HashMap<EdgeId, Polyline>,
    /// Topological updates waiting for the topology pass.
    pending: Vec<TopologicalUpdate>,
    /// Latest version of every edge loaded or created by any partition.
    touched: BTreeMap<EdgeId, Edge>,
}

impl RunState {
    fn remember(&mut self, edge: &Edge) {
        self.previous
            .entry(edge.id)
            .or_insert_with(|| edge.geometry.clone());
    }
}

/// Edges loaded for one partition, keyed by id.
struct Loaded {
    edges: BTreeMap<EdgeId, Edge>,
    by_technical_id: HashMap<TechnicalId, EdgeId>,
}

impl Loaded {
    fn insert(&mut self, edge: Edge) {
        if let Some(tid) = &edge.technical_id {
            self.by_technical_id.insert(tid.clone(), edge.id);
        }
        self.edges.insert(edge.id, edge);
    }
}

impl Reimport {
    /// Create a reimport with a checked configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::InvalidConfig`] if `config` does not
    /// validate.
    pub fn new(config: ReconcileConfig) -> Result<Self, ReconcileError> {
        config.validate()?;
        Ok(Self {
            config,
            timestamp: None,
        })
    }

    /// Stamp events with `timestamp` instead of the wall clock at run start.
    #[must_use]
    pub const fn at(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Reconcile the network against the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::EmptyNetwork`] without reading anything
    /// if the network has no edges of the configured provenance, and the
    /// wrapped collaborator error if any collaborator fails. Per-edge
    /// problems are counted in the statistics instead.
    pub fn run<S, A, N, M, E>(
        &self,
        mut c: Collaborators<'_, S, A, N, M, E>,
    ) -> Result<ReimportStatistics, ReconcileError>
    where
        S: FeatureSource,
        A: AttributeMapper,
        N: NetworkStore,
        M: MappingStore,
        E: EventSink,
    {
        let start = Instant::now();
        let timestamp = self.timestamp.unwrap_or_else(SystemTime::now);
        let provenance = self.config.provenance;

        if c.network.count_edges(provenance).map_err(storage_error)? == 0 {
            return Err(ReconcileError::EmptyNetwork(provenance));
        }
        let partitions = c
            .source
            .partitions()
            .map_err(|e| ReconcileError::FeatureSource(Box::new(e)))?;
        info!(partitions = partitions.len(), %provenance, "reimport started");

        let first_free = c.network.next_node_id().map_err(storage_error)?;
        let mut run = RunState {
            nodes: NodeIndex::new(self.config.snap_tolerance, first_free, provenance),
            stats: ReimportStatistics::default(),
            seen: HashSet::new(),
            processed: HashSet::new(),
            deletion_candidates: BTreeSet::new(),
            changed: BTreeMap::new(),
            previous: HashMap::new(),
            pending: Vec::new(),
            touched: BTreeMap::new(),
        };

        for (index, partition) in partitions.iter().enumerate() {
            let _span = info_span!("partition", index).entered();
            let stats = self.reconcile_partition(partition, &mut c, &mut run)?;
            info!(
                features = stats.features_read,
                matched = stats.matched(),
                created = stats.created_edges,
                topological = stats.topological,
                "partition done"
            );
            run.stats += stats;
        }

        {
            let _span = info_span!("topology", updates = run.pending.len()).entered();
            self.apply_updates(&mut c, &mut run)?;
            info!(
                splits = run.stats.splits,
                simple = run.stats.simple_updates,
                fatal = run.stats.fatal_errors,
                "topology done"
            );
        }

        let mut deletions = Vec::new();
        let deleted = self.delete_absent(&mut c, &mut run, timestamp, &mut deletions)?;
        let mut events = Vec::new();
        Self::emit_changes(&run, &deleted, timestamp, &mut events);
        events.append(&mut deletions);
        self.sweep_orphans(&mut c, &mut run, timestamp, &mut events)?;
        c.network.refresh_views().map_err(storage_error)?;

        for event in events {
            c.events
                .publish(event)
                .map_err(|e| ReconcileError::EventSink(Box::new(e)))?;
        }

        let mut stats = run.stats;
        stats.duration = start.elapsed();
        info!(
            partitions = stats.partitions,
            matched = stats.matched(),
            created = stats.created_edges,
            deleted = stats.deleted_edges,
            fatal = stats.fatal_errors,
            "reimport finished"
        );
        Ok(stats)
    }

    fn reconcile_partition<S, A, N, M, E>(
        &self,
        partition: &BoundingBox,
        c: &mut Collaborators<'_, S, A, N, M, E>,
        run: &mut RunState,
    ) -> Result<ReimportStatistics, ReconcileError>
    where
        S: FeatureSource,
        A: AttributeMapper,
        N: NetworkStore,
        M: MappingStore,
    {
        let mut stats = ReimportStatistics {
            partitions: 1,
            ..ReimportStatistics::default()
        };

        let mut features = Vec::new();
        for feature in c
            .source
            .read_features(partition)
            .map_err(|e| ReconcileError::FeatureSource(Box::new(e)))?
        {
            if run.seen.insert(feature.technical_id.clone()) {
                let mapped = c
                    .mapper
                    .map_attributes(&feature)
                    .map_err(|e| ReconcileError::Mapping {
                        technical_id: feature.technical_id.clone(),
                        source: Box::new(e),
                    })?;
                features.push((feature, mapped));
            }
        }
        stats.features_read = features.len();

        let envelope = partition.expanded(self.config.max_edge_displacement);
        let mut loaded = Loaded {
            edges: BTreeMap::new(),
            by_technical_id: HashMap::new(),
        };
        for edge in c
            .network
            .edges_in(self.config.provenance, &envelope)
            .map_err(storage_error)?
        {
            Self::seed_nodes(&edge, &*c.network, &mut run.nodes)?;
            loaded.insert(edge);
        }
        let bbox_ids: Vec<EdgeId> = loaded.edges.keys().copied().collect();

        let unmatched = self.classify_matched(features, c, run, &mut loaded, &mut stats)?;
        self.create_unmatched(unmatched, c, run, &mut loaded, &mut stats)?;

        for id in bbox_ids {
            if !run.processed.contains(&id) {
                run.deletion_candidates.insert(id);
            }
        }
        run.touched.extend(loaded.edges);
        Ok(stats)
    }

    fn seed_nodes<N: NetworkStore>(
        edge: &Edge,
        network: &N,
        nodes: &mut NodeIndex,
    ) -> Result<(), ReconcileError> {
        for id in [edge.from, edge.to] {
            if nodes.contains(id) {
                continue;
            }
            match network.node(id).map_err(storage_error)? {
                Some(node) => {
                    nodes.insert_existing(node);
                }
                None => warn!(edge = %edge.id, node = %id, "edge references missing node"),
            }
        }
        Ok(())
    }

    /// Classify every feature that matches an existing edge. Topological
    /// updates are queued on the run; the unmatched features are returned.
    fn classify_matched<S, A, N: NetworkStore, M, E>(
        &self,
        features: Vec<(ImportedFeature, MappedAttributes)>,
        c: &mut Collaborators<'_, S, A, N, M, E>,
        run: &mut RunState,
        loaded: &mut Loaded,
        stats: &mut ReimportStatistics,
    ) -> Result<Vec<(ImportedFeature, MappedAttributes)>, ReconcileError> {
        let mut unmatched = Vec::new();

        for (feature, mapped) in features {
            let id = match loaded.by_technical_id.get(&feature.technical_id) {
                Some(id) => Some(*id),
                None => {
                    // The edge may have moved further than the load margin.
                    let found = c
                        .network
                        .edge_by_technical_id(self.config.provenance, &feature.technical_id)
                        .map_err(storage_error)?;
                    match found {
                        Some(edge) => {
                            Self::seed_nodes(&edge, &*c.network, &mut run.nodes)?;
                            let id = edge.id;
                            loaded.insert(edge);
                            Some(id)
                        }
                        None => None,
                    }
                }
            };
            let Some(edge) = id.and_then(|id| loaded.edges.get_mut(&id)) else {
                unmatched.push((feature, mapped));
                continue;
            };
            run.processed.insert(edge.id);

            let before = edge.clone();
            match classify(&feature, &mapped.properties, edge, &self.config) {
                Err(err) => {
                    warn!(edge = %edge.id, %err, "feature rejected");
                    stats.validation_errors += 1;
                }
                Ok(Classification::NoChange) => stats.unchanged += 1,
                Ok(Classification::AttributeOnly) => stats.attribute_only += 1,
                Ok(Classification::MinorDrift { .. }) => {
                    stats.minor_drift += 1;
                    run.remember(&before);
                }
                Ok(Classification::Topological { update, .. }) => {
                    stats.topological += 1;
                    run.pending.push(update);
                }
            }
            if *edge != before {
                c.network.update_edge(edge).map_err(storage_error)?;
            }
        }
        Ok(unmatched)
    }

    fn create_unmatched<S, A, N: NetworkStore, M, E>(
        &self,
        unmatched: Vec<(ImportedFeature, MappedAttributes)>,
        c: &mut Collaborators<'_, S, A, N, M, E>,
        run: &mut RunState,
        loaded: &mut Loaded,
        stats: &mut ReimportStatistics,
    ) -> Result<(), ReconcileError> {
        for (feature, mapped) in unmatched {
            let Some((start, end)) = feature
                .geometry
                .endpoints()
                .filter(|_| feature.geometry.is_valid_edge_geometry())
            else {
                warn!(technical_id = %feature.technical_id, "degenerate feature geometry");
                stats.validation_errors += 1;
                continue;
            };
            if !mapped.attributes.is_full_coverage() {
                warn!(technical_id = %feature.technical_id, "mapped layers do not cover the edge");
                stats.validation_errors += 1;
                continue;
            }
            let (from, to) = match run.nodes.find_or_create(start, end) {
                Ok(nodes) => nodes,
                Err(err) => {
                    warn!(technical_id = %feature.technical_id, %err, "feature rejected");
                    stats.validation_errors += 1;
                    continue;
                }
            };
            Self::persist_created_nodes(&mut *c.network, &mut run.nodes, stats)?;

            let edge = Edge {
                id: c.network.allocate_edge_id().map_err(storage_error)?,
                from: from.id,
                to: to.id,
                geometry: feature.geometry,
                provenance: self.config.provenance,
                technical_id: Some(feature.technical_id),
                properties: mapped.properties,
                attributes: mapped.attributes,
            };
            debug!(edge = %edge.id, from = %edge.from, to = %edge.to, "edge created");
            c.network.insert_edge(edge.clone()).map_err(storage_error)?;
            run.processed.insert(edge.id);
            stats.created_edges += 1;
            loaded.insert(edge);
        }
        Ok(())
    }

    /// Run split detection and the executors over every queued update,
    /// against all edges the partitions loaded or created.
    fn apply_updates<S, A, N: NetworkStore, M: MappingStore, E>(
        &self,
        c: &mut Collaborators<'_, S, A, N, M, E>,
        run: &mut RunState,
    ) -> Result<(), ReconcileError> {
        let updates = std::mem::take(&mut run.pending);
        if updates.is_empty() {
            return Ok(());
        }
        let executor = TopologyExecutor::new(self.config.clone());
        let mut graph = NetworkGraph::from_edges(std::mem::take(&mut run.touched).into_values());
        // Edges with an update of their own, plus partners already taken
        // over by a split, are never reused as continuations.
        let mut claimed: HashSet<EdgeId> = updates.iter().map(|u| u.edge_id).collect();

        for update in updates {
            let Some(edge) = graph.edge(update.edge_id).cloned() else {
                continue;
            };
            let split =
                find_split_if_exists(&update, &graph, &claimed, &mut run.stats, &self.config);
            let mut ctx = UpdateContext {
                stats: &mut run.stats,
                nodes: &mut run.nodes,
                strongly_changed: &mut run.changed,
                mappings: &mut *c.mappings,
            };
            let rewritten = match split {
                Some(split) => {
                    let edges = executor.execute_split_update(&split, &graph, &mut ctx)?;
                    if !edges.is_empty() {
                        claimed.extend(split.partners());
                    }
                    edges
                }
                None => vec![executor.execute_simple_update(&update, &edge, &mut ctx)?],
            };
            Self::persist_created_nodes(&mut *c.network, &mut run.nodes, &mut run.stats)?;

            for updated in rewritten {
                let Some(current) = graph.edge(updated.id) else {
                    continue;
                };
                if *current == updated {
                    continue;
                }
                run.remember(current);
                c.network.update_edge(&updated).map_err(storage_error)?;
                graph.upsert(updated);
            }
        }
        Ok(())
    }

    fn persist_created_nodes<N: NetworkStore>(
        network: &mut N,
        nodes: &mut NodeIndex,
        stats: &mut ReimportStatistics,
    ) -> Result<(), ReconcileError> {
        for node in nodes.take_created() {
            debug!(node = %node.id, x = node.point.x, y = node.point.y, "node created");
            network.insert_node(node).map_err(storage_error)?;
            stats.created_nodes += 1;
        }
        Ok(())
    }

    /// Delete candidates that no partition delivered. Returns the deleted ids.
    fn delete_absent<S, A, N: NetworkStore, M: MappingStore, E>(
        &self,
        c: &mut Collaborators<'_, S, A, N, M, E>,
        run: &mut RunState,
        timestamp: SystemTime,
        events: &mut Vec<ReimportEvent>,
    ) -> Result<HashSet<EdgeId>, ReconcileError> {
        let mut deleted = HashSet::new();
        for id in std::mem::take(&mut run.deletion_candidates) {
            if run.processed.contains(&id) {
                continue;
            }
            let Some(edge) = c.network.edge(id).map_err(storage_error)? else {
                continue;
            };
            let Some(tid) = &edge.technical_id else {
                continue;
            };
            if edge.provenance != self.config.provenance || run.seen.contains(tid) {
                continue;
            }
            c.network.delete_edge(id).map_err(storage_error)?;
            run.stats.invalidated_mappings +=
                c.mappings.delete_by_edge(id).map_err(storage_error)?;
            run.stats.deleted_edges += 1;
            debug!(edge = %id, technical_id = %tid, "edge deleted");
            let previous = run.previous.get(&id).cloned().unwrap_or(edge.geometry);
            events.push(ReimportEvent::EdgeDeleted {
                edge: id,
                previous,
                cause: ChangeCause::AbsentFromSnapshot,
                timestamp,
            });
            deleted.insert(id);
        }
        Ok(deleted)
    }

    fn emit_changes(
        run: &RunState,
        deleted: &HashSet<EdgeId>,
        timestamp: SystemTime,
        events: &mut Vec<ReimportEvent>,
    ) {
        for (&edge, &cause) in &run.changed {
            if deleted.contains(&edge) {
                continue;
            }
            let Some(previous) = run.previous.get(&edge) else {
                continue;
            };
            events.push(ReimportEvent::EdgeChanged {
                edge,
                previous: previous.clone(),
                cause,
                timestamp,
            });
        }
    }

    fn sweep_orphans<S, A, N: NetworkStore, M, E>(
        &self,
        c: &mut Collaborators<'_, S, A, N, M, E>,
        run: &mut RunState,
        timestamp: SystemTime,
        events: &mut Vec<ReimportEvent>,
    ) -> Result<(), ReconcileError> {
        let orphans = c
            .network
            .orphaned_nodes(self.config.provenance)
            .map_err(storage_error)?;
        for node in orphans {
            let id: NodeId = node.id;
            c.network.delete_node(id).map_err(storage_error)?;
            run.stats.deleted_nodes += 1;
            debug!(node = %id, "orphaned node deleted");
            events.push(ReimportEvent::NodeDeleted {
                node: id,
                previous: node.point,
                cause: ChangeCause::Orphaned,
                timestamp,
            });
        }
        Ok(())
    }
}
