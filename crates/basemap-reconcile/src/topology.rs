//! Topological update and split execution.
//!
//! A simple update moves an edge onto its new geometry: endpoints are
//! resolved through the snapping index, the stationing direction of the
//! new geometry is compared with the old one, and every attribute layer is
//! carried over by reprojecting its boundaries point by point. A split
//! update shares the old edge's layers out along a detected chain.
//!
//! Per-edge trouble never escapes as an error. An update that cannot be
//! executed consistently leaves the edge as it was and is counted; only
//! collaborator failures are returned.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::attributes::{EdgeAttributes, LayerTransform, Orientable};
use crate::classify::TopologicalUpdate;
use crate::collab::{MappingStore, storage_error};
use crate::events::ChangeCause;
use crate::graph::NetworkGraph;
use crate::linref::{Layer, Span};
use crate::network::{Edge, EdgeId};
use crate::node_index::NodeIndex;
use crate::split::{Anchor, SplitUpdate};
use crate::stats::ReimportStatistics;
use crate::types::{Polyline, ReconcileConfig, ReconcileError};

/// Difference between projected endpoint fractions below which the
/// direction is decided by endpoint distances instead.
const DIRECTION_EPSILON: f64 = 1e-6;

/// Mutable run state an executor writes into.
pub struct UpdateContext<'a, M> {
    pub stats: &'a mut ReimportStatistics,
    pub nodes: &'a mut NodeIndex,
    /// Edges to report after the run, with the reason.
    pub strongly_changed: &'a mut BTreeMap<EdgeId, ChangeCause>,
    pub mappings: &'a mut M,
}

impl<M: MappingStore> UpdateContext<'_, M> {
    fn report(&mut self, edge: EdgeId, cause: ChangeCause) {
        let previous = self.strongly_changed.insert(edge, cause);
        if previous.is_none() {
            self.stats.strongly_changed += 1;
        }
    }

    fn invalidate_mappings(&mut self, edge: EdgeId) -> Result<(), ReconcileError> {
        let removed = self.mappings.delete_by_edge(edge).map_err(storage_error)?;
        self.stats.invalidated_mappings += removed;
        Ok(())
    }

    fn fatal(&mut self, edge: &Edge, err: &ReconcileError) -> Edge {
        warn!(edge = %edge.id, %err, "update skipped, edge left unchanged");
        self.stats.fatal_errors += 1;
        edge.clone()
    }
}

/// Executes topological updates and splits.
#[derive(Debug, Clone)]
pub struct TopologyExecutor {
    config: ReconcileConfig,
}

impl TopologyExecutor {
    #[must_use]
    pub const fn new(config: ReconcileConfig) -> Self {
        Self { config }
    }

    /// Move `edge` onto the update's new geometry.
    ///
    /// Returns the updated edge, or `edge` unchanged if the update was
    /// rejected (counted as a fatal or validation error).
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Storage`] if the mapping store fails.
    pub fn execute_simple_update<M: MappingStore>(
        &self,
        update: &TopologicalUpdate,
        edge: &Edge,
        ctx: &mut UpdateContext<'_, M>,
    ) -> Result<Edge, ReconcileError> {
        let old = &update.old_geometry;
        let new = &update.new_geometry;
        if !new.is_valid_edge_geometry() || !old.is_valid_edge_geometry() {
            let err = ReconcileError::DegenerateGeometry(format!("update of edge {}", edge.id));
            return Ok(ctx.fatal(edge, &err));
        }
        let Some(reversed) = detect_reversal(old, new) else {
            return Ok(ctx.fatal(edge, &ReconcileError::IndeterminateDirection(edge.id)));
        };
        let (from, to) = match ctx.nodes.find_or_create(update.new_start, update.new_end) {
            Ok(nodes) => nodes,
            Err(err) => {
                warn!(edge = %edge.id, %err, "endpoints rejected");
                ctx.stats.validation_errors += 1;
                return Ok(edge.clone());
            }
        };

        let shift = [update.new_start, update.new_end]
            .into_iter()
            .filter_map(|p| old.project(p))
            .map(|pr| pr.distance)
            .fold(0.0, f64::max);
        let mut cause = None;
        let attributes = if shift > self.config.extreme_shift {
            warn!(edge = %edge.id, shift, "endpoint shift too large, attributes reset");
            ctx.stats.extreme_resets += 1;
            cause = Some(ChangeCause::AttributesReset);
            EdgeAttributes::unknown(edge.attributes.two_sided)
        } else {
            let reprojected = edge.attributes.transform(&Reproject {
                old,
                new,
                reversed,
                tolerance: self.config.reprojection_tolerance,
            });
            if reversed {
                reprojected.flipped()
            } else {
                reprojected
            }
        };
        if cause.is_none() && old.hausdorff_distance(new) > self.config.strong_change_distance {
            cause = Some(ChangeCause::StronglyAltered);
        }
        if let Some(cause) = cause {
            ctx.report(edge.id, cause);
        }
        ctx.invalidate_mappings(edge.id)?;

        ctx.stats.simple_updates += 1;
        if reversed {
            ctx.stats.reversed += 1;
        }
        debug!(edge = %edge.id, reversed, shift, "simple update");
        Ok(Edge {
            from: from.id,
            to: to.id,
            geometry: new.clone(),
            attributes,
            ..edge.clone()
        })
    }

    /// Share the updated edge's attributes out along the split chain.
    ///
    /// Returns every rewritten edge, the updated edge first. An empty
    /// result means the split was rejected and nothing changed.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Storage`] if the mapping store fails.
    pub fn execute_split_update<M: MappingStore>(
        &self,
        split: &SplitUpdate,
        graph: &NetworkGraph,
        ctx: &mut UpdateContext<'_, M>,
    ) -> Result<Vec<Edge>, ReconcileError> {
        let Some(origin) = graph.edge(split.update.edge_id) else {
            warn!(edge = %split.update.edge_id, "split origin not in graph");
            ctx.stats.fatal_errors += 1;
            return Ok(Vec::new());
        };
        let Some(anchor) = ctx.nodes.get(split.anchor_node).copied() else {
            warn!(edge = %origin.id, node = %split.anchor_node, "split anchor not indexed");
            ctx.stats.fatal_errors += 1;
            return Ok(Vec::new());
        };
        let fixed_is_from = (split.anchor == Anchor::From) != split.reversed;
        let (from, to) = match ctx
            .nodes
            .find_or_create_with_one_fixed(split.split_point, &anchor, fixed_is_from)
        {
            Ok(nodes) => nodes,
            Err(err) => {
                warn!(edge = %origin.id, %err, "split point rejected");
                ctx.stats.validation_errors += 1;
                return Ok(Vec::new());
            }
        };

        let inherited = |span: Span, reversed: bool| {
            let part = origin.attributes.slice(span);
            if reversed { part.reversed() } else { part }
        };

        let mut rewritten = Vec::with_capacity(split.chain.len());
        for link in &split.chain {
            if link.is_origin {
                rewritten.insert(
                    0,
                    Edge {
                        from: from.id,
                        to: to.id,
                        geometry: split.update.new_geometry.clone(),
                        attributes: inherited(link.span, link.reversed),
                        ..origin.clone()
                    },
                );
            } else if let Some(partner) = graph.edge(link.edge_id) {
                // Values the partner already knows win over inherited ones.
                let mut attributes = inherited(link.span, link.reversed);
                attributes.assign_known_within(Span::FULL, &partner.attributes);
                rewritten.push(Edge {
                    attributes,
                    ..partner.clone()
                });
            }
        }

        ctx.report(origin.id, ChangeCause::Split);
        ctx.invalidate_mappings(origin.id)?;
        ctx.stats.splits += 1;
        if split.reversed {
            ctx.stats.reversed += 1;
        }
        debug!(edge = %origin.id, partners = rewritten.len().saturating_sub(1), "split executed");
        Ok(rewritten)
    }
}

/// Whether `new` runs against the stationing of `old`, or `None` if that
/// cannot be decided.
fn detect_reversal(old: &Polyline, new: &Polyline) -> Option<bool> {
    let (new_start, new_end) = new.endpoints()?;
    let start = old.project(new_start)?;
    let end = old.project(new_end)?;
    if (start.fraction - end.fraction).abs() > DIRECTION_EPSILON {
        return Some(start.fraction > end.fraction);
    }
    let (old_start, old_end) = old.endpoints()?;
    let along = new_start.distance(old_start) + new_end.distance(old_end);
    let against = new_start.distance(old_end) + new_end.distance(old_start);
    if (along - against).abs() > DIRECTION_EPSILON {
        Some(against < along)
    } else {
        None
    }
}

/// Carries layer boundaries from the old geometry onto the new one.
///
/// Result spans are expressed in the new geometry's stationing; values
/// are not reoriented here.
struct Reproject<'a> {
    old: &'a Polyline,
    new: &'a Polyline,
    reversed: bool,
    tolerance: f64,
}

impl Reproject<'_> {
    fn boundary(&self, fraction: f64) -> Option<f64> {
        if fraction <= 0.0 {
            return Some(if self.reversed { 1.0 } else { 0.0 });
        }
        if fraction >= 1.0 {
            return Some(if self.reversed { 0.0 } else { 1.0 });
        }
        let at = self.old.point_at(fraction)?;
        let projection = self.new.project(at)?;
        (projection.distance <= self.tolerance).then_some(projection.fraction)
    }
}

impl LayerTransform for Reproject<'_> {
    fn apply<T: Orientable>(&self, layer: &Layer<T>) -> Layer<T> {
        let mut out = Layer::default();
        for segment in layer.segments() {
            let from = self.boundary(segment.span.from);
            let to = self.boundary(segment.span.to);
            if let (Some(a), Some(b)) = (from, to) {
                out.paint(Span::new(a, b), segment.value.clone());
            }
        }
        out
    }
}
