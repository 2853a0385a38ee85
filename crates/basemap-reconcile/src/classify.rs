//! Edge update classification.
//!
//! Compares one existing edge against its freshly imported counterpart and
//! decides how much work the change needs. Only the cheap outcomes are
//! applied here; a topological change is handed on as a
//! [`TopologicalUpdate`] so split detection can reinterpret it before the
//! edge is touched.

use tracing::debug;

use crate::network::{Edge, EdgeId, EdgeProperties, ImportedFeature};
use crate::types::{Point, Polyline, ReconcileConfig, ReconcileError};

/// One existing edge paired with the geometry it should take on.
#[derive(Debug, Clone, PartialEq)]
pub struct TopologicalUpdate {
    /// The edge to move.
    pub edge_id: EdgeId,
    /// Stored geometry before the update.
    pub old_geometry: Polyline,
    /// Imported geometry, in the snapshot's point order.
    pub new_geometry: Polyline,
    /// First point of the new geometry.
    pub new_start: Point,
    /// Last point of the new geometry.
    pub new_end: Point,
}

/// Outcome of comparing an edge with its imported feature.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Geometry and properties identical.
    NoChange,
    /// Identical geometry, properties overwritten.
    AttributeOnly,
    /// Endpoints kept, interior shifted within the drift tolerance. The new
    /// geometry has already been written to the edge.
    MinorDrift { attributes_changed: bool },
    /// Needs a topological update. The edge's geometry is untouched.
    Topological {
        attributes_changed: bool,
        update: TopologicalUpdate,
    },
}

impl Classification {
    /// Whether the edge's properties were changed by the classification.
    #[must_use]
    pub const fn attributes_changed(&self) -> bool {
        match self {
            Self::NoChange => false,
            Self::AttributeOnly => true,
            Self::MinorDrift { attributes_changed }
            | Self::Topological {
                attributes_changed, ..
            } => *attributes_changed,
        }
    }
}

/// Classify `edge` against `feature` and apply the non-topological parts.
///
/// `properties` are the feature's mapped properties; they always replace
/// the edge's. Classifying the same edge against the same feature again
/// yields [`Classification::NoChange`] for everything but topological
/// changes, which stay topological until executed.
///
/// # Errors
///
/// Returns [`ReconcileError::DegenerateGeometry`] if the feature geometry
/// cannot be an edge geometry. The edge is not modified in that case.
pub fn classify(
    feature: &ImportedFeature,
    properties: &EdgeProperties,
    edge: &mut Edge,
    config: &ReconcileConfig,
) -> Result<Classification, ReconcileError> {
    let new_geometry = &feature.geometry;
    let Some((new_start, new_end)) = new_geometry
        .endpoints()
        .filter(|_| new_geometry.is_valid_edge_geometry())
    else {
        return Err(ReconcileError::DegenerateGeometry(format!(
            "feature {} has {} points and length {}",
            feature.technical_id,
            new_geometry.len(),
            new_geometry.length()
        )));
    };

    let attributes_changed = edge.properties != *properties;
    if attributes_changed {
        edge.properties = properties.clone();
    }

    if edge.geometry == *new_geometry {
        debug!(edge = %edge.id, attributes_changed, "geometry unchanged");
        return Ok(if attributes_changed {
            Classification::AttributeOnly
        } else {
            Classification::NoChange
        });
    }

    let endpoints_kept = edge.geometry.endpoints().is_some_and(|(old_start, old_end)| {
        old_start.distance(new_start) <= config.snap_tolerance
            && old_end.distance(new_end) <= config.snap_tolerance
    });
    if endpoints_kept {
        let deviation = edge.geometry.hausdorff_distance(new_geometry);
        if deviation <= config.drift_tolerance {
            debug!(edge = %edge.id, deviation, "minor drift");
            edge.geometry = new_geometry.clone();
            return Ok(Classification::MinorDrift { attributes_changed });
        }
    }

    debug!(edge = %edge.id, endpoints_kept, "topological change");
    Ok(Classification::Topological {
        attributes_changed,
        update: TopologicalUpdate {
            edge_id: edge.id,
            old_geometry: edge.geometry.clone(),
            new_geometry: new_geometry.clone(),
            new_start,
            new_end,
        },
    })
}
