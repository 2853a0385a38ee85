//! Shared types for the base-map reconciliation engine: planar geometry,
//! run configuration and the error taxonomy.

use geo::{Closest, ClosestPoint, Line};
use serde::{Deserialize, Serialize};

use crate::network::{Provenance, TechnicalId};

/// A 2D point in a projected, metric coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Easting in metres.
    pub x: f64,
    /// Northing in metres.
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    ///
    /// Avoids the square root for comparison purposes.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Linear interpolation towards `other`; `t = 0` is `self`, `t = 1` is `other`.
    #[must_use]
    pub fn lerp(self, other: Self, t: f64) -> Self {
        Self::new(
            t.mul_add(other.x - self.x, self.x),
            t.mul_add(other.y - self.y, self.y),
        )
    }
}

/// Convert a crate `Point` to a `geo::Coord`.
pub(crate) const fn point_to_coord(p: Point) -> geo::Coord<f64> {
    geo::Coord { x: p.x, y: p.y }
}

/// Convert a `geo::Coord` back to a crate `Point`.
pub(crate) const fn coord_to_point(c: geo::Coord<f64>) -> Point {
    Point::new(c.x, c.y)
}

/// Find the closest point on a `geo::Line` to a query point.
fn closest_coord_on_line(line: &Line<f64>, query: &geo::Point<f64>) -> geo::Coord<f64> {
    match line.closest_point(query) {
        Closest::Intersection(p) | Closest::SinglePoint(p) => p.into(),
        Closest::Indeterminate => line.start,
    }
}

/// Result of projecting a point onto a [`Polyline`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Linear reference of the nearest point, as a fraction of the
    /// polyline's length from its first point.
    pub fraction: f64,
    /// Orthogonal distance from the query point to the polyline.
    pub distance: f64,
    /// The nearest point on the polyline.
    pub point: Point,
}

/// An ordered sequence of points. Edge geometries and imported feature
/// geometries are both polylines; their first point is the stationing start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline(Vec<Point>);

impl Polyline {
    /// Create a new polyline from a vector of points.
    #[must_use]
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    /// Returns `true` if the polyline has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of points in the polyline.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the first point, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Point> {
        self.0.first()
    }

    /// Returns the last point, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Point> {
        self.0.last()
    }

    /// Returns a slice of all points.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// First and last point, or `None` for an empty polyline.
    #[must_use]
    pub fn endpoints(&self) -> Option<(Point, Point)> {
        Some((*self.first()?, *self.last()?))
    }

    /// Total Euclidean length.
    #[must_use]
    pub fn length(&self) -> f64 {
        self.0.windows(2).map(|w| w[0].distance(w[1])).sum()
    }

    /// A polyline is usable as an edge geometry when it has at least two
    /// points, a positive length and distinct first and last points.
    #[must_use]
    pub fn is_valid_edge_geometry(&self) -> bool {
        self.len() >= 2
            && self.length() > 0.0
            && self.endpoints().is_some_and(|(a, b)| a != b)
    }

    /// The polyline with its point order reversed.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self(self.0.iter().rev().copied().collect())
    }

    /// The point at linear reference `fraction` (clamped to `[0, 1]`).
    ///
    /// Returns `None` for polylines without positive length.
    #[must_use]
    pub fn point_at(&self, fraction: f64) -> Option<Point> {
        let total = self.length();
        if self.len() < 2 || total <= 0.0 {
            return None;
        }
        let target = fraction.clamp(0.0, 1.0) * total;
        let mut walked = 0.0;
        for w in self.0.windows(2) {
            let seg = w[0].distance(w[1]);
            if seg > 0.0 && walked + seg >= target {
                return Some(w[0].lerp(w[1], (target - walked) / seg));
            }
            walked += seg;
        }
        self.last().copied()
    }

    /// Project `p` onto the polyline.
    ///
    /// Ties between equally distant segments resolve to the one nearest
    /// the stationing start. Returns `None` for polylines without positive
    /// length.
    #[must_use]
    pub fn project(&self, p: Point) -> Option<Projection> {
        let total = self.length();
        if self.len() < 2 || total <= 0.0 {
            return None;
        }
        let query = geo::Point::new(p.x, p.y);
        let mut best: Option<Projection> = None;
        let mut walked = 0.0;
        for w in self.0.windows(2) {
            let line = Line::new(point_to_coord(w[0]), point_to_coord(w[1]));
            let nearest = coord_to_point(closest_coord_on_line(&line, &query));
            let distance = nearest.distance(p);
            if best.is_none_or(|b| distance < b.distance) {
                best = Some(Projection {
                    fraction: ((walked + w[0].distance(nearest)) / total).clamp(0.0, 1.0),
                    distance,
                    point: nearest,
                });
            }
            walked += w[0].distance(w[1]);
        }
        best
    }

    /// The part of the polyline between two linear references.
    ///
    /// Returns `None` unless `from < to` after clamping.
    #[must_use]
    pub fn slice(&self, from: f64, to: f64) -> Option<Self> {
        let from = from.clamp(0.0, 1.0);
        let to = to.clamp(0.0, 1.0);
        if from >= to {
            return None;
        }
        let total = self.length();
        let start = self.point_at(from)?;
        let end = self.point_at(to)?;
        let mut points = vec![start];
        let mut walked = 0.0;
        for w in self.0.windows(2) {
            walked += w[0].distance(w[1]);
            let at = walked / total;
            if at > from && at < to && points.last() != Some(&w[1]) {
                points.push(w[1]);
            }
        }
        if points.last() != Some(&end) {
            points.push(end);
        }
        Some(Self(points))
    }

    /// Vertex-based symmetric Hausdorff distance to another polyline.
    ///
    /// Every vertex of each polyline is projected onto the other; the
    /// largest orthogonal distance wins. Returns infinity when either
    /// polyline has no positive length.
    #[must_use]
    pub fn hausdorff_distance(&self, other: &Self) -> f64 {
        let one_way = |a: &Self, b: &Self| {
            a.points()
                .iter()
                .map(|p| b.project(*p).map_or(f64::INFINITY, |pr| pr.distance))
                .fold(0.0, f64::max)
        };
        one_way(self, other).max(one_way(other, self))
    }

    /// Join consecutive polylines into one, dropping duplicated joints.
    #[must_use]
    pub fn concat<'a>(parts: impl IntoIterator<Item = &'a Self>) -> Self {
        let mut points: Vec<Point> = Vec::new();
        for part in parts {
            for p in part.points() {
                if points.last() != Some(p) {
                    points.push(*p);
                }
            }
        }
        Self(points)
    }

    /// Axis-aligned bounding box, or `None` for an empty polyline.
    #[must_use]
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::around(self.0.iter().copied())
    }
}

/// Axis-aligned rectangle used for partitions and spatial queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Lower-left corner.
    pub min: Point,
    /// Upper-right corner.
    pub max: Point,
}

impl BoundingBox {
    /// Create a box from two corners in any order.
    #[must_use]
    pub fn new(a: Point, b: Point) -> Self {
        Self {
            min: Point::new(a.x.min(b.x), a.y.min(b.y)),
            max: Point::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    /// Smallest box containing all `points`, or `None` if there are none.
    pub fn around(points: impl IntoIterator<Item = Point>) -> Option<Self> {
        points.into_iter().fold(None, |acc: Option<Self>, p| {
            Some(acc.map_or_else(|| Self::new(p, p), |b| b.including(p)))
        })
    }

    /// The box grown to include `p`.
    #[must_use]
    pub fn including(self, p: Point) -> Self {
        Self {
            min: Point::new(self.min.x.min(p.x), self.min.y.min(p.y)),
            max: Point::new(self.max.x.max(p.x), self.max.y.max(p.y)),
        }
    }

    /// The box grown by `margin` on every side.
    #[must_use]
    pub fn expanded(self, margin: f64) -> Self {
        Self {
            min: Point::new(self.min.x - margin, self.min.y - margin),
            max: Point::new(self.max.x + margin, self.max.y + margin),
        }
    }

    /// Whether the two boxes share at least one point (touching counts).
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }
}

/// Tuned tolerances for one reconciliation run.
///
/// All distances are in the units of the projected coordinate system
/// (metres). The numeric defaults are starting points, not semantics;
/// every value can be overridden and is checked by [`validate`](Self::validate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Radius within which a coordinate reuses an existing node. Must stay
    /// below the smallest real-world separation of two distinct nodes.
    pub snap_tolerance: f64,

    /// Margin added around each partition when loading existing edges, so
    /// an edge whose geometry moved by up to this amount is still matched.
    pub max_edge_displacement: f64,

    /// Hausdorff bound under which a geometry change with unchanged
    /// endpoints is treated as drift rather than a topological change.
    pub drift_tolerance: f64,

    /// Orthogonal distance within which an attribute boundary on the old
    /// geometry may be carried over to the new geometry.
    pub reprojection_tolerance: f64,

    /// Endpoint shift beyond which attribute layers are reset instead of
    /// reprojected.
    pub extreme_shift: f64,

    /// Hausdorff distance above which an updated edge is reported as
    /// strongly altered.
    pub strong_change_distance: f64,

    /// Tolerance for matching a chain of edges against an old geometry
    /// during split detection. The anchored end of a split must still lie
    /// within [`snap_tolerance`](Self::snap_tolerance) of its old position.
    pub split_tolerance: f64,

    /// Maximum number of continuation edges a split chain may contain.
    pub max_split_hops: usize,

    /// Provenance of the edges this run reconciles.
    pub provenance: Provenance,
}

impl ReconcileConfig {
    /// Default [`snap_tolerance`](Self::snap_tolerance).
    pub const DEFAULT_SNAP_TOLERANCE: f64 = 0.3;
    /// Default [`max_edge_displacement`](Self::max_edge_displacement).
    pub const DEFAULT_MAX_EDGE_DISPLACEMENT: f64 = 100.0;
    /// Default [`drift_tolerance`](Self::drift_tolerance).
    pub const DEFAULT_DRIFT_TOLERANCE: f64 = 1.0;
    /// Default [`reprojection_tolerance`](Self::reprojection_tolerance).
    pub const DEFAULT_REPROJECTION_TOLERANCE: f64 = 25.0;
    /// Default [`extreme_shift`](Self::extreme_shift).
    pub const DEFAULT_EXTREME_SHIFT: f64 = 150.0;
    /// Default [`strong_change_distance`](Self::strong_change_distance).
    pub const DEFAULT_STRONG_CHANGE_DISTANCE: f64 = 10.0;
    /// Default [`split_tolerance`](Self::split_tolerance).
    pub const DEFAULT_SPLIT_TOLERANCE: f64 = 2.0;
    /// Default [`max_split_hops`](Self::max_split_hops).
    pub const DEFAULT_MAX_SPLIT_HOPS: usize = 8;

    /// Check the configuration for values the engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::InvalidConfig`] if a distance is negative
    /// or non-finite, the snap tolerance is not positive or not below the
    /// drift tolerance, or the hop ceiling is zero.
    pub fn validate(&self) -> Result<(), ReconcileError> {
        let distances = [
            ("snap_tolerance", self.snap_tolerance),
            ("max_edge_displacement", self.max_edge_displacement),
            ("drift_tolerance", self.drift_tolerance),
            ("reprojection_tolerance", self.reprojection_tolerance),
            ("extreme_shift", self.extreme_shift),
            ("strong_change_distance", self.strong_change_distance),
            ("split_tolerance", self.split_tolerance),
        ];
        for (name, value) in distances {
            if !value.is_finite() || value < 0.0 {
                return Err(ReconcileError::InvalidConfig(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        if self.snap_tolerance <= 0.0 {
            return Err(ReconcileError::InvalidConfig(
                "snap_tolerance must be positive".to_string(),
            ));
        }
        if self.snap_tolerance >= self.drift_tolerance {
            return Err(ReconcileError::InvalidConfig(format!(
                "snap_tolerance ({}) must be smaller than drift_tolerance ({})",
                self.snap_tolerance, self.drift_tolerance
            )));
        }
        if self.max_split_hops == 0 {
            return Err(ReconcileError::InvalidConfig(
                "max_split_hops must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            snap_tolerance: Self::DEFAULT_SNAP_TOLERANCE,
            max_edge_displacement: Self::DEFAULT_MAX_EDGE_DISPLACEMENT,
            drift_tolerance: Self::DEFAULT_DRIFT_TOLERANCE,
            reprojection_tolerance: Self::DEFAULT_REPROJECTION_TOLERANCE,
            extreme_shift: Self::DEFAULT_EXTREME_SHIFT,
            strong_change_distance: Self::DEFAULT_STRONG_CHANGE_DISTANCE,
            split_tolerance: Self::DEFAULT_SPLIT_TOLERANCE,
            max_split_hops: Self::DEFAULT_MAX_SPLIT_HOPS,
            provenance: Provenance::BaseMap,
        }
    }
}

/// Boxed error returned by an external collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during reconciliation.
///
/// Validation errors reject a single item and are normally counted in
/// [`ReimportStatistics`](crate::stats::ReimportStatistics) rather than
/// propagated. Configuration and collaborator errors abort the whole run.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// An edge would start and end at the same coordinate.
    #[error("edge endpoints coincide at ({x}, {y})")]
    CoincidentEndpoints {
        /// Easting of the shared coordinate.
        x: f64,
        /// Northing of the shared coordinate.
        y: f64,
    },

    /// A geometry is unusable (too few points, zero length).
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    /// The stationing direction of a new geometry relative to the old one
    /// could not be determined.
    #[error("cannot determine stationing direction of edge {0}")]
    IndeterminateDirection(crate::network::EdgeId),

    /// Run configuration is invalid.
    #[error("invalid reconcile configuration: {0}")]
    InvalidConfig(String),

    /// The existing network has no edges of the reconciled provenance.
    #[error("network has no edges of provenance {0}; refusing to reimport")]
    EmptyNetwork(Provenance),

    /// The feature source failed.
    #[error("feature source failed: {0}")]
    FeatureSource(#[source] BoxError),

    /// The attribute mapper rejected a feature.
    #[error("attribute mapping failed for feature {technical_id}: {source}")]
    Mapping {
        /// Technical id of the offending feature.
        technical_id: TechnicalId,
        /// Mapper error.
        #[source]
        source: BoxError,
    },

    /// Network or mapping storage failed.
    #[error("network storage failed: {0}")]
    Storage(#[source] BoxError),

    /// The event sink failed.
    #[error("event sink failed: {0}")]
    EventSink(#[source] BoxError),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn straight(len: f64) -> Polyline {
        Polyline::new(vec![Point::new(0.0, 0.0), Point::new(len, 0.0)])
    }

    fn l_shape() -> Polyline {
        Polyline::new(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
        ])
    }

    // --- Point tests ---

    #[test]
    fn point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance(b) - 5.0).abs() < f64::EPSILON);
        assert!((a.distance_squared(b) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn point_lerp_midpoint() {
        let m = Point::new(0.0, 0.0).lerp(Point::new(10.0, 4.0), 0.5);
        assert_eq!(m, Point::new(5.0, 2.0));
    }

    // --- Polyline tests ---

    #[test]
    fn polyline_length_sums_segments() {
        assert!((l_shape().length() - 20.0).abs() < 1e-12);
    }

    #[test]
    fn point_at_walks_across_vertices() {
        let pl = l_shape();
        assert_eq!(pl.point_at(0.0), Some(Point::new(0.0, 0.0)));
        assert_eq!(pl.point_at(0.5), Some(Point::new(10.0, 0.0)));
        let p = pl.point_at(0.75).unwrap();
        assert!(p.distance(Point::new(10.0, 5.0)) < 1e-9);
        assert_eq!(pl.point_at(1.0), Some(Point::new(10.0, 10.0)));
    }

    #[test]
    fn point_at_zero_length_is_none() {
        let pl = Polyline::new(vec![Point::new(1.0, 1.0), Point::new(1.0, 1.0)]);
        assert!(pl.point_at(0.5).is_none());
    }

    #[test]
    fn project_reports_fraction_and_distance() {
        let pl = l_shape();
        let pr = pl.project(Point::new(12.0, 5.0)).unwrap();
        assert!((pr.fraction - 0.75).abs() < 1e-9);
        assert!((pr.distance - 2.0).abs() < 1e-9);
        assert!(pr.point.distance(Point::new(10.0, 5.0)) < 1e-9);
    }

    #[test]
    fn project_beyond_end_clamps_to_end() {
        let pr = straight(100.0).project(Point::new(150.0, 0.0)).unwrap();
        assert!((pr.fraction - 1.0).abs() < 1e-12);
        assert!((pr.distance - 50.0).abs() < 1e-9);
    }

    #[test]
    fn slice_keeps_interior_vertices() {
        let s = l_shape().slice(0.25, 0.75).unwrap();
        assert_eq!(s.len(), 3);
        assert!(s.points()[0].distance(Point::new(5.0, 0.0)) < 1e-9);
        assert_eq!(s.points()[1], Point::new(10.0, 0.0));
        assert!(s.points()[2].distance(Point::new(10.0, 5.0)) < 1e-9);
        assert!(l_shape().slice(0.5, 0.5).is_none());
    }

    #[test]
    fn hausdorff_of_offset_lines() {
        let a = straight(10.0);
        let b = Polyline::new(vec![Point::new(0.0, 0.5), Point::new(10.0, 0.5)]);
        assert!((a.hausdorff_distance(&b) - 0.5).abs() < 1e-9);
        assert!(a.hausdorff_distance(&a.reversed()) < 1e-12);
    }

    #[test]
    fn concat_drops_shared_joints() {
        let a = straight(10.0);
        let b = Polyline::new(vec![Point::new(10.0, 0.0), Point::new(10.0, 10.0)]);
        assert_eq!(Polyline::concat([&a, &b]), l_shape());
    }

    #[test]
    fn edge_geometry_validity() {
        assert!(straight(1.0).is_valid_edge_geometry());
        assert!(!Polyline::new(vec![Point::new(0.0, 0.0)]).is_valid_edge_geometry());
        let closed = Polyline::new(vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 0.0),
        ]);
        assert!(!closed.is_valid_edge_geometry());
    }

    // --- BoundingBox tests ---

    #[test]
    fn bounding_box_expand_and_intersect() {
        let a = BoundingBox::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0));
        let b = BoundingBox::new(Point::new(15.0, 0.0), Point::new(20.0, 10.0));
        assert!(!a.intersects(&b));
        assert!(a.expanded(5.0).intersects(&b));
        let touching = BoundingBox::new(Point::new(10.0, 10.0), Point::new(12.0, 12.0));
        assert!(a.intersects(&touching));
    }

    #[test]
    fn bounding_box_around_points() {
        let bb = l_shape().bounding_box().unwrap();
        assert_eq!(bb.min, Point::new(0.0, 0.0));
        assert_eq!(bb.max, Point::new(10.0, 10.0));
        assert!(Polyline::new(vec![]).bounding_box().is_none());
    }

    // --- ReconcileConfig tests ---

    #[test]
    fn default_config_is_valid() {
        assert!(ReconcileConfig::default().validate().is_ok());
    }

    #[test]
    fn config_rejects_negative_distance() {
        let config = ReconcileConfig {
            drift_tolerance: -1.0,
            ..ReconcileConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ReconcileError::InvalidConfig(ref s)) if s.contains("drift_tolerance")
        ));
    }

    #[test]
    fn config_rejects_snap_above_drift() {
        let config = ReconcileConfig {
            snap_tolerance: 2.0,
            drift_tolerance: 1.0,
            ..ReconcileConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_serde_fills_missing_fields() {
        let config: ReconcileConfig = serde_json::from_str(r#"{"snap_tolerance": 0.1}"#).unwrap();
        assert!((config.snap_tolerance - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.max_split_hops, ReconcileConfig::DEFAULT_MAX_SPLIT_HOPS);
    }

    // --- ReconcileError tests ---

    #[test]
    fn error_display() {
        let err = ReconcileError::EmptyNetwork(Provenance::BaseMap);
        assert_eq!(
            err.to_string(),
            "network has no edges of provenance base-map; refusing to reimport"
        );
        let err = ReconcileError::CoincidentEndpoints { x: 1.0, y: 2.0 };
        assert_eq!(err.to_string(), "edge endpoints coincide at (1, 2)");
    }
}
