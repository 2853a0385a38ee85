//! Linear referencing: spans along an edge and fully covering layers of
//! `(span, value)` segments.
//!
//! A [`Layer`] always partitions `[0, 1]`: segments are sorted, adjacent,
//! non-overlapping, and the first starts at 0 while the last ends at 1.
//! Every operation in this module that returns a layer preserves that
//! invariant, so callers never have to repair coverage themselves.

use serde::{Deserialize, Serialize};

/// Spans shorter than this are numerical noise and get absorbed by a
/// neighbour.
pub const SLIVER: f64 = 1e-9;

/// A closed sub-interval of `[0, 1]` measured from the stationing start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Start of the span, the smaller linear reference.
    pub from: f64,
    /// End of the span, the larger linear reference.
    pub to: f64,
}

impl Span {
    /// The whole edge.
    pub const FULL: Self = Self { from: 0.0, to: 1.0 };

    /// Create a span from two linear references in any order, clamped to
    /// `[0, 1]`.
    #[must_use]
    pub fn new(a: f64, b: f64) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self {
            from: lo.clamp(0.0, 1.0),
            to: hi.clamp(0.0, 1.0),
        }
    }

    /// Length as a fraction of the edge.
    #[must_use]
    pub fn len(&self) -> f64 {
        self.to - self.from
    }

    /// Whether the span is shorter than [`SLIVER`].
    #[must_use]
    pub fn is_sliver(&self) -> bool {
        self.len() < SLIVER
    }

    /// Overlap of two spans, if it is longer than a sliver.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let s = Self {
            from: self.from.max(other.from),
            to: self.to.min(other.to),
        };
        (!s.is_sliver()).then_some(s)
    }

    /// The span mirrored for the opposite stationing direction.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            from: 1.0 - self.to,
            to: 1.0 - self.from,
        }
    }

    /// Express `fraction` (relative to the whole edge) relative to this span.
    #[must_use]
    pub fn to_local(&self, fraction: f64) -> f64 {
        ((fraction - self.from) / self.len()).clamp(0.0, 1.0)
    }

    /// Express a `local` fraction of this span relative to the whole edge.
    #[must_use]
    pub fn to_global(&self, local: f64) -> f64 {
        local.mul_add(self.len(), self.from)
    }
}

/// One linearly referenced value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment<T> {
    /// Where along the edge the value applies.
    pub span: Span,
    /// The value over the span.
    pub value: T,
}

/// Why a list of segments does not form a layer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoverageError {
    /// No segments at all.
    #[error("layer has no segments")]
    Empty,
    /// The segments leave part of `[0, 1]` uncovered.
    #[error("layer has a gap at {0}")]
    Gap(f64),
    /// Two segments claim the same stretch.
    #[error("layer has an overlap at {0}")]
    Overlap(f64),
    /// A segment is empty, reversed, or outside `[0, 1]`.
    #[error("layer segment [{0}, {1}] is invalid")]
    InvalidSegment(f64, f64),
}

/// An ordered list of segments that partitions `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Segment<T>>", into = "Vec<Segment<T>>")]
#[serde(bound(
    serialize = "T: Clone + Serialize",
    deserialize = "T: Deserialize<'de>"
))]
pub struct Layer<T>(Vec<Segment<T>>);

/// Tolerance used when checking segment adjacency.
const COVERAGE_EPSILON: f64 = 1e-9;

impl<T> Layer<T> {
    /// A layer holding `value` over the whole edge.
    #[must_use]
    pub fn full(value: T) -> Self {
        Self(vec![Segment {
            span: Span::FULL,
            value,
        }])
    }

    /// Build a layer from explicit segments.
    ///
    /// # Errors
    ///
    /// Returns a [`CoverageError`] unless the segments, in order, cover
    /// `[0, 1]` without gaps or overlaps.
    pub fn try_from_segments(segments: Vec<Segment<T>>) -> Result<Self, CoverageError> {
        check_coverage(&segments)?;
        Ok(Self(segments))
    }

    /// Segments in stationing order.
    #[must_use]
    pub fn segments(&self) -> &[Segment<T>] {
        &self.0
    }

    /// Whether the layer partitions `[0, 1]`.
    #[must_use]
    pub fn is_full_coverage(&self) -> bool {
        check_coverage(&self.0).is_ok()
    }

    /// Value in effect at `fraction`. Boundaries belong to the later segment.
    #[must_use]
    pub fn value_at(&self, fraction: f64) -> Option<&T> {
        self.0
            .iter()
            .rev()
            .find(|s| s.span.from <= fraction)
            .or_else(|| self.0.first())
            .map(|s| &s.value)
    }

    /// Apply `f` to every value, keeping spans.
    #[must_use]
    pub fn map<U>(&self, f: impl Fn(&T) -> U) -> Layer<U> {
        Layer(
            self.0
                .iter()
                .map(|s| Segment {
                    span: s.span,
                    value: f(&s.value),
                })
                .collect(),
        )
    }
}

impl<T: Clone + PartialEq> Layer<T> {
    /// The layer as seen from the opposite stationing direction:
    /// every `[a, b]` becomes `[1 - b, 1 - a]` and the order flips.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self(
            self.0
                .iter()
                .rev()
                .map(|s| Segment {
                    span: s.span.reversed(),
                    value: s.value.clone(),
                })
                .collect(),
        )
    }

    /// The part of the layer inside `span`, rescaled to `[0, 1]`.
    ///
    /// A sliver `span` yields the value at its start over the whole result.
    #[must_use]
    pub fn slice(&self, span: Span) -> Self {
        if span.is_sliver() {
            return self
                .value_at(span.from)
                .map_or_else(|| self.clone(), |v| Self::full(v.clone()));
        }
        let segments = self
            .0
            .iter()
            .filter_map(|s| {
                s.span.intersection(&span).map(|overlap| Segment {
                    span: Span::new(span.to_local(overlap.from), span.to_local(overlap.to)),
                    value: s.value.clone(),
                })
            })
            .collect();
        let mut sliced = Self(segments);
        sliced.normalize();
        sliced
    }

    /// Overwrite `span` with `value`. Later paints win over earlier ones.
    pub fn paint(&mut self, span: Span, value: T) {
        if span.is_sliver() {
            return;
        }
        let mut out = Vec::with_capacity(self.0.len() + 2);
        let mut inserted = false;
        for s in self.0.drain(..) {
            if s.span.to <= span.from || s.span.from >= span.to {
                if !inserted && s.span.from >= span.to {
                    out.push(Segment {
                        span,
                        value: value.clone(),
                    });
                    inserted = true;
                }
                out.push(s);
                continue;
            }
            if s.span.from < span.from {
                out.push(Segment {
                    span: Span {
                        from: s.span.from,
                        to: span.from,
                    },
                    value: s.value.clone(),
                });
            }
            if !inserted {
                out.push(Segment {
                    span,
                    value: value.clone(),
                });
                inserted = true;
            }
            if s.span.to > span.to {
                out.push(Segment {
                    span: Span {
                        from: span.to,
                        to: s.span.to,
                    },
                    value: s.value,
                });
            }
        }
        if !inserted {
            out.push(Segment { span, value });
        }
        self.0 = out;
        self.normalize();
    }

    /// Paint a whole `[0, 1]` layer into `outer`, scaling it to fit.
    pub fn assign_within(&mut self, outer: Span, inner: &Self) {
        self.assign_within_where(outer, inner, |_| true);
    }

    /// Like [`assign_within`](Self::assign_within), but only inner values
    /// accepted by `keep` are painted; elsewhere the current values stay.
    pub fn assign_within_where(&mut self, outer: Span, inner: &Self, keep: impl Fn(&T) -> bool) {
        for s in &inner.0 {
            if keep(&s.value) {
                let span = Span::new(outer.to_global(s.span.from), outer.to_global(s.span.to));
                self.paint(span, s.value.clone());
            }
        }
    }

    /// Merge equal neighbours, absorb slivers, and pin the outer
    /// boundaries to 0 and 1.
    fn normalize(&mut self) {
        let mut out: Vec<Segment<T>> = Vec::with_capacity(self.0.len());
        for mut s in self.0.drain(..) {
            if s.span.is_sliver() {
                if let Some(last) = out.last_mut() {
                    last.span.to = last.span.to.max(s.span.to);
                }
                continue;
            }
            if let Some(last) = out.last_mut() {
                if last.value == s.value {
                    last.span.to = s.span.to;
                    continue;
                }
                s.span.from = last.span.to;
            }
            out.push(s);
        }
        if let Some(first) = out.first_mut() {
            first.span.from = 0.0;
        }
        if let Some(last) = out.last_mut() {
            last.span.to = 1.0;
        }
        self.0 = out;
    }
}

impl<T: Default> Default for Layer<T> {
    fn default() -> Self {
        Self::full(T::default())
    }
}

impl<T> TryFrom<Vec<Segment<T>>> for Layer<T> {
    type Error = CoverageError;

    fn try_from(segments: Vec<Segment<T>>) -> Result<Self, Self::Error> {
        Self::try_from_segments(segments)
    }
}

impl<T> From<Layer<T>> for Vec<Segment<T>> {
    fn from(layer: Layer<T>) -> Self {
        layer.0
    }
}

fn check_coverage<T>(segments: &[Segment<T>]) -> Result<(), CoverageError> {
    let (Some(first), Some(last)) = (segments.first(), segments.last()) else {
        return Err(CoverageError::Empty);
    };
    for s in segments {
        if !(s.span.from >= 0.0 && s.span.to <= 1.0 && s.span.from < s.span.to) {
            return Err(CoverageError::InvalidSegment(s.span.from, s.span.to));
        }
    }
    if first.span.from > COVERAGE_EPSILON {
        return Err(CoverageError::Gap(0.0));
    }
    if last.span.to < 1.0 - COVERAGE_EPSILON {
        return Err(CoverageError::Gap(last.span.to));
    }
    for w in segments.windows(2) {
        let (end, start) = (w[0].span.to, w[1].span.from);
        if start > end + COVERAGE_EPSILON {
            return Err(CoverageError::Gap(end));
        }
        if start < end - COVERAGE_EPSILON {
            return Err(CoverageError::Overlap(start));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn seg(from: f64, to: f64, value: &'static str) -> Segment<&'static str> {
        Segment {
            span: Span { from, to },
            value,
        }
    }

    fn ab() -> Layer<&'static str> {
        Layer::try_from_segments(vec![seg(0.0, 0.5, "A"), seg(0.5, 1.0, "B")]).unwrap()
    }

    fn assert_spans(layer: &Layer<&'static str>, expected: &[(f64, f64, &str)]) {
        assert!(layer.is_full_coverage(), "not covering: {layer:?}");
        assert_eq!(layer.segments().len(), expected.len(), "{layer:?}");
        for (s, (from, to, value)) in layer.segments().iter().zip(expected) {
            assert!((s.span.from - from).abs() < 1e-9, "{layer:?}");
            assert!((s.span.to - to).abs() < 1e-9, "{layer:?}");
            assert_eq!(s.value, *value);
        }
    }

    #[test]
    fn span_new_orders_and_clamps() {
        let s = Span::new(1.2, 0.3);
        assert!((s.from - 0.3).abs() < f64::EPSILON);
        assert!((s.to - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn span_local_global_inverse() {
        let s = Span::new(0.2, 0.6);
        assert!((s.to_global(s.to_local(0.5)) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn try_from_segments_rejects_gap_and_overlap() {
        let gap = Layer::try_from_segments(vec![seg(0.0, 0.4, "A"), seg(0.5, 1.0, "B")]);
        assert_eq!(gap, Err(CoverageError::Gap(0.4)));
        let overlap = Layer::try_from_segments(vec![seg(0.0, 0.6, "A"), seg(0.5, 1.0, "B")]);
        assert_eq!(overlap, Err(CoverageError::Overlap(0.5)));
        let short = Layer::try_from_segments(vec![seg(0.0, 0.9, "A")]);
        assert!(matches!(short, Err(CoverageError::Gap(_))));
        let empty: Result<Layer<&str>, _> = Layer::try_from_segments(vec![]);
        assert_eq!(empty, Err(CoverageError::Empty));
    }

    #[test]
    fn value_at_boundary_belongs_to_later_segment() {
        let layer = ab();
        assert_eq!(layer.value_at(0.25), Some(&"A"));
        assert_eq!(layer.value_at(0.5), Some(&"B"));
        assert_eq!(layer.value_at(1.0), Some(&"B"));
    }

    #[test]
    fn reversed_mirrors_spans() {
        let layer = Layer::try_from_segments(vec![seg(0.0, 0.2, "A"), seg(0.2, 1.0, "B")]).unwrap();
        assert_spans(&layer.reversed(), &[(0.0, 0.8, "B"), (0.8, 1.0, "A")]);
    }

    #[test]
    fn slice_rescales_to_unit() {
        assert_spans(&ab().slice(Span::new(0.25, 0.75)), &[(0.0, 0.5, "A"), (0.5, 1.0, "B")]);
        assert_spans(&ab().slice(Span::new(0.5, 1.0)), &[(0.0, 1.0, "B")]);
    }

    #[test]
    fn paint_splits_existing_segment() {
        let mut layer = Layer::full("U");
        layer.paint(Span::new(0.25, 0.5), "X");
        assert_spans(&layer, &[(0.0, 0.25, "U"), (0.25, 0.5, "X"), (0.5, 1.0, "U")]);
    }

    #[test]
    fn paint_later_wins_and_merges() {
        let mut layer = ab();
        layer.paint(Span::new(0.4, 1.0), "A");
        assert_spans(&layer, &[(0.0, 1.0, "A")]);
    }

    #[test]
    fn paint_at_edges() {
        let mut layer = ab();
        layer.paint(Span::new(0.0, 0.1), "S");
        layer.paint(Span::new(0.9, 1.0), "E");
        assert_spans(
            &layer,
            &[(0.0, 0.1, "S"), (0.1, 0.5, "A"), (0.5, 0.9, "B"), (0.9, 1.0, "E")],
        );
    }

    #[test]
    fn sliver_paint_is_ignored() {
        let mut layer = ab();
        layer.paint(Span::new(0.3, 0.3 + 1e-12), "X");
        assert_eq!(layer, ab());
    }

    #[test]
    fn assign_within_embeds_scaled_layer() {
        let mut layer = Layer::full("U");
        layer.assign_within(Span::new(0.5, 1.0), &ab());
        assert_spans(&layer, &[(0.0, 0.5, "U"), (0.5, 0.75, "A"), (0.75, 1.0, "B")]);
    }

    #[test]
    fn assign_within_where_keeps_filtered_values() {
        let mut layer = Layer::full("P");
        let inner = Layer::try_from_segments(vec![seg(0.0, 0.5, "?"), seg(0.5, 1.0, "B")]).unwrap();
        layer.assign_within_where(Span::FULL, &inner, |v| *v != "?");
        assert_spans(&layer, &[(0.0, 0.5, "P"), (0.5, 1.0, "B")]);
    }

    #[test]
    fn slices_reassemble_original() {
        let original = Layer::try_from_segments(vec![
            seg(0.0, 0.3, "A"),
            seg(0.3, 0.7, "B"),
            seg(0.7, 1.0, "C"),
        ])
        .unwrap();
        let cut = [Span::new(0.0, 0.45), Span::new(0.45, 0.8), Span::new(0.8, 1.0)];
        let mut rebuilt = Layer::full("?");
        for span in cut {
            rebuilt.assign_within(span, &original.slice(span));
        }
        assert_spans(&rebuilt, &[(0.0, 0.3, "A"), (0.3, 0.7, "B"), (0.7, 1.0, "C")]);
    }

    #[test]
    fn serde_rejects_non_covering_layer() {
        let json = r#"[{"span":{"from":0.0,"to":0.5},"value":"A"}]"#;
        assert!(serde_json::from_str::<Layer<String>>(json).is_err());
        let ok = r#"[{"span":{"from":0.0,"to":1.0},"value":"A"}]"#;
        let layer: Layer<String> = serde_json::from_str(ok).unwrap();
        assert_eq!(layer, Layer::full("A".to_string()));
    }
}
