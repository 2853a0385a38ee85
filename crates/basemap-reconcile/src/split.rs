//! Split detection.
//!
//! When the snapshot adds detail, an edge may come back shorter with one
//! endpoint unchanged while the rest of its old extent is now covered by
//! other edges that meet it at a new interior node. Such a change is not a
//! shape change of one edge but a split, and the attributes of the old edge
//! have to be shared out across the whole chain.
//!
//! The search starts at the old endpoint that moved and walks back along
//! the old geometry towards the new split point, one edge per hop. It is
//! iterative with a run-wide visited set and a hop ceiling, so it
//! terminates on any graph.

use std::collections::HashSet;

use tracing::debug;

use crate::classify::TopologicalUpdate;
use crate::graph::NetworkGraph;
use crate::linref::{SLIVER, Span};
use crate::network::{Edge, EdgeId, NodeId};
use crate::stats::ReimportStatistics;
use crate::types::{Point, Polyline, ReconcileConfig};

/// Which old endpoint the shortened edge still starts or ends at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// The old `from` node is kept; the split lies towards the old end.
    From,
    /// The old `to` node is kept; the split lies towards the old start.
    To,
}

/// One edge of a split chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainLink {
    pub edge_id: EdgeId,
    /// Extent of the old edge this link takes over.
    pub span: Span,
    /// Whether the link's stationing runs against the old edge's.
    pub reversed: bool,
    /// Whether this is the edge being updated.
    pub is_origin: bool,
}

/// A topological update resolved as a split.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitUpdate {
    pub update: TopologicalUpdate,
    pub anchor: Anchor,
    /// Node the updated edge stays attached to.
    pub anchor_node: NodeId,
    /// Whether the new geometry runs against the old stationing.
    pub reversed: bool,
    /// The new interior endpoint of the updated edge.
    pub split_point: Point,
    /// Position of the split point on the old geometry.
    pub split_fraction: f64,
    /// All participating edges ordered along the old geometry; their spans
    /// partition `[0, 1]`.
    pub chain: Vec<ChainLink>,
}

impl SplitUpdate {
    /// The chain link of the updated edge.
    #[must_use]
    pub fn origin(&self) -> Option<&ChainLink> {
        self.chain.iter().find(|l| l.is_origin)
    }

    /// Ids of the edges that continue the updated one.
    pub fn partners(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.chain.iter().filter(|l| !l.is_origin).map(|l| l.edge_id)
    }
}

/// Partial chain on the search stack.
struct Walk {
    node: NodeId,
    position: f64,
    links: Vec<ChainLink>,
}

/// Decide whether `update` is really a split of its edge.
///
/// Edges in `claimed` belong to other updates of the same pass and are
/// never used as continuations. Returns `None` for a plain shape change;
/// an update whose endpoints both still match the old endpoints is
/// counted in [`ReimportStatistics::split_single_edge`].
#[must_use]
pub fn find_split_if_exists(
    update: &TopologicalUpdate,
    graph: &NetworkGraph,
    claimed: &HashSet<EdgeId>,
    stats: &mut ReimportStatistics,
    config: &ReconcileConfig,
) -> Option<SplitUpdate> {
    let edge = graph.edge(update.edge_id)?;
    let old = &update.old_geometry;
    let (old_start, old_end) = old.endpoints()?;
    let tol = config.split_tolerance;
    let (ns, ne) = (update.new_start, update.new_end);
    let near = |a: Point, b: Point| a.distance(b) <= tol;

    if (near(ns, old_start) && near(ne, old_end)) || (near(ns, old_end) && near(ne, old_start)) {
        debug!(edge = %edge.id, "split search: edge alone matches");
        stats.split_single_edge += 1;
        return None;
    }

    let (anchor, reversed, anchored, free) = if near(ns, old_start) {
        (Anchor::From, false, ns, ne)
    } else if near(ne, old_start) {
        (Anchor::From, true, ne, ns)
    } else if near(ne, old_end) {
        (Anchor::To, false, ne, ns)
    } else if near(ns, old_end) {
        (Anchor::To, true, ns, ne)
    } else {
        return None;
    };
    // The origin keeps its anchor node, so the anchored end must snap to it.
    let anchor_point = match anchor {
        Anchor::From => old_start,
        Anchor::To => old_end,
    };
    if anchored.distance(anchor_point) > config.snap_tolerance {
        debug!(edge = %edge.id, "split search: anchored end moved off its node");
        return None;
    }

    let projection = old.project(free)?;
    let split_fraction = projection.fraction;
    if projection.distance > tol || split_fraction <= SLIVER || split_fraction >= 1.0 - SLIVER {
        return None;
    }
    let origin_span = match anchor {
        Anchor::From => Span::new(0.0, split_fraction),
        Anchor::To => Span::new(split_fraction, 1.0),
    };
    let kept = old.slice(origin_span.from, origin_span.to)?;
    if update.new_geometry.hausdorff_distance(&kept) > tol {
        debug!(edge = %edge.id, "split search: new geometry leaves the old one");
        return None;
    }

    let (anchor_node, start_node, start_position) = match anchor {
        Anchor::From => (edge.from, edge.to, 1.0),
        Anchor::To => (edge.to, edge.from, 0.0),
    };
    let origin = ChainLink {
        edge_id: edge.id,
        span: origin_span,
        reversed,
        is_origin: true,
    };
    let search = ChainSearch {
        graph,
        claimed,
        origin: edge,
        old,
        split_point: free,
        split_fraction,
        config,
    };
    let mut chain = search.run(start_node, start_position)?;
    chain.push(origin);
    chain.sort_by(|a, b| a.span.from.total_cmp(&b.span.from));

    debug!(
        edge = %edge.id,
        links = chain.len(),
        split_fraction,
        reversed,
        "split detected"
    );
    Some(SplitUpdate {
        update: update.clone(),
        anchor,
        anchor_node,
        reversed,
        split_point: free,
        split_fraction,
        chain,
    })
}

struct ChainSearch<'a> {
    graph: &'a NetworkGraph,
    claimed: &'a HashSet<EdgeId>,
    origin: &'a Edge,
    old: &'a Polyline,
    split_point: Point,
    split_fraction: f64,
    config: &'a ReconcileConfig,
}

impl ChainSearch<'_> {
    /// Depth-first walk from `start` towards the split point. Returns the
    /// continuation links, or `None` if no chain reaches the split.
    fn run(&self, start: NodeId, position: f64) -> Option<Vec<ChainLink>> {
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut stack = vec![Walk {
            node: start,
            position,
            links: Vec::new(),
        }];

        while let Some(walk) = stack.pop() {
            if !visited.insert(walk.node) || walk.links.len() >= self.config.max_split_hops {
                continue;
            }
            let mut next: Vec<(f64, Walk)> = Vec::new();
            for candidate in self.graph.incident(walk.node) {
                let Some(step) = self.step(&walk, candidate) else {
                    continue;
                };
                if step.reached {
                    let mut links = walk.links;
                    links.push(step.link);
                    return Some(links);
                }
                if visited.contains(&step.far) {
                    continue;
                }
                let mut links = walk.links.clone();
                links.push(step.link);
                let remaining = (step.position - self.split_fraction).abs();
                next.push((
                    remaining,
                    Walk {
                        node: step.far,
                        position: step.position,
                        links,
                    },
                ));
            }
            // Closest to the split is explored first.
            next.sort_by(|a, b| b.0.total_cmp(&a.0));
            stack.extend(next.into_iter().map(|(_, w)| w));
        }
        None
    }

    fn step(&self, walk: &Walk, candidate: &Edge) -> Option<Step> {
        if candidate.id == self.origin.id
            || candidate.provenance != self.origin.provenance
            || self.claimed.contains(&candidate.id)
            || walk.links.iter().any(|l| l.edge_id == candidate.id)
        {
            return None;
        }
        let far = candidate.other_end(walk.node)?;
        if far == walk.node {
            return None;
        }
        let far_point = candidate.point_at_node(far)?;
        let tol = self.config.split_tolerance;
        let projection = self.old.project(far_point)?;
        if projection.distance > tol {
            return None;
        }

        let reached = far_point.distance(self.split_point) <= tol;
        let position = if reached {
            self.split_fraction
        } else {
            projection.fraction
        };
        let slack = tol / self.old.length();
        let towards_split = if walk.position > self.split_fraction {
            position < walk.position - SLIVER && position >= self.split_fraction - slack
        } else {
            position > walk.position + SLIVER && position <= self.split_fraction + slack
        };
        if !towards_split {
            return None;
        }

        let span = Span::new(position, walk.position);
        let covered = self.old.slice(span.from, span.to)?;
        if candidate.geometry.hausdorff_distance(&covered) > tol {
            return None;
        }
        let (from_fraction, to_fraction) = if candidate.from == walk.node {
            (walk.position, position)
        } else {
            (position, walk.position)
        };
        Some(Step {
            far,
            position,
            reached,
            link: ChainLink {
                edge_id: candidate.id,
                span,
                reversed: from_fraction > to_fraction,
                is_origin: false,
            },
        })
    }
}

struct Step {
    far: NodeId,
    position: f64,
    reached: bool,
    link: ChainLink,
}
