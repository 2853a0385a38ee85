//! Operator-maintained edge attributes.
//!
//! Each attribute kind is an independent [`Layer`] over the edge's
//! stationing. Jurisdiction and surface come as [`Sided`] pairs; for a
//! single-sided edge both sides carry the same layer. Values know how they
//! change when the stationing direction flips ([`Orientable`]).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::linref::{Layer, Span};

/// A linearly referenced attribute value.
///
/// `Default` is the "unknown" value a span falls back to when it cannot
/// be carried over from an old geometry.
pub trait Orientable: Clone + PartialEq + Default + fmt::Debug {
    /// The value as seen when the stationing direction is reversed.
    #[must_use]
    fn reoriented(&self) -> Self {
        self.clone()
    }

    /// Whether this is the unknown default.
    fn is_unknown(&self) -> bool {
        *self == Self::default()
    }
}

/// Responsible authority for a stretch of road.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Jurisdiction {
    #[default]
    Unknown,
    Authority(String),
}

impl Orientable for Jurisdiction {}

/// Surface material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Material {
    #[default]
    Unknown,
    Asphalt,
    Concrete,
    Paving,
    Gravel,
    Unpaved,
}

/// Physical form of the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Form {
    #[default]
    Unknown,
    Carriageway,
    CyclePath,
    SharedPath,
    CycleLane,
    Track,
    Crossing,
}

/// Surface and form of a stretch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Surface {
    /// Paving material.
    pub material: Material,
    /// Kind of way the surface belongs to.
    pub form: Form,
}

impl Orientable for Surface {}

/// Direction-qualified speed limits in km/h.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Speed {
    /// Limit when travelling in stationing direction.
    pub with_stationing: Option<u16>,
    /// Limit when travelling against stationing direction.
    pub against_stationing: Option<u16>,
}

impl Orientable for Speed {
    fn reoriented(&self) -> Self {
        Self {
            with_stationing: self.against_stationing,
            against_stationing: self.with_stationing,
        }
    }
}

/// Permitted travel direction relative to the stationing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    #[default]
    Unknown,
    Both,
    WithStationing,
    AgainstStationing,
    Closed,
}

impl Orientable for Direction {
    fn reoriented(&self) -> Self {
        match self {
            Self::WithStationing => Self::AgainstStationing,
            Self::AgainstStationing => Self::WithStationing,
            other => *other,
        }
    }
}

/// Travel direction on the left and right side of the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DirectionPair {
    /// Direction on the left side, seen along the stationing.
    pub left: Direction,
    /// Direction on the right side, seen along the stationing.
    pub right: Direction,
}

impl DirectionPair {
    /// The same direction on both sides.
    #[must_use]
    pub const fn both_sides(direction: Direction) -> Self {
        Self {
            left: direction,
            right: direction,
        }
    }

    /// Sides swapped and each value inverted, for reversed stationing.
    #[must_use]
    pub fn flipped(&self) -> Self {
        Self {
            left: self.right.reoriented(),
            right: self.left.reoriented(),
        }
    }
}

/// Left and right sub-layers of one attribute kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "T: Clone + Serialize",
    deserialize = "T: Deserialize<'de>"
))]
pub struct Sided<T> {
    /// Layer of the left side, seen along the stationing.
    pub left: Layer<T>,
    /// Layer of the right side, seen along the stationing.
    pub right: Layer<T>,
}

impl<T: Orientable> Sided<T> {
    /// Both sides sharing one layer.
    #[must_use]
    pub fn mirrored(layer: Layer<T>) -> Self {
        Self {
            left: layer.clone(),
            right: layer,
        }
    }

    fn is_full_coverage(&self) -> bool {
        self.left.is_full_coverage() && self.right.is_full_coverage()
    }

    fn transform(&self, t: &impl LayerTransform) -> Self {
        Self {
            left: t.apply(&self.left),
            right: t.apply(&self.right),
        }
    }

    fn flipped(&self) -> Self {
        Self {
            left: self.right.map(T::reoriented),
            right: self.left.map(T::reoriented),
        }
    }
}

impl<T: Orientable> Default for Sided<T> {
    fn default() -> Self {
        Self::mirrored(Layer::default())
    }
}

/// A per-layer operation applied uniformly to every attribute layer.
pub trait LayerTransform {
    /// Produce the transformed layer. Must return a fully covering layer.
    fn apply<T: Orientable>(&self, layer: &Layer<T>) -> Layer<T>;
}

/// All linearly referenced attributes of one edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeAttributes {
    /// Whether left and right sides carry distinct values.
    pub two_sided: bool,
    /// Responsible authority per side.
    pub jurisdiction: Sided<Jurisdiction>,
    /// Surface and form per side.
    pub surface: Sided<Surface>,
    /// Speed limits, shared by both sides.
    pub speed: Layer<Speed>,
    /// Permitted travel direction per side.
    pub direction: DirectionPair,
}

impl EdgeAttributes {
    /// Every layer unknown over the whole edge.
    #[must_use]
    pub fn unknown(two_sided: bool) -> Self {
        Self {
            two_sided,
            jurisdiction: Sided::default(),
            surface: Sided::default(),
            speed: Layer::default(),
            direction: DirectionPair::default(),
        }
    }

    /// Whether every layer partitions `[0, 1]`.
    #[must_use]
    pub fn is_full_coverage(&self) -> bool {
        self.jurisdiction.is_full_coverage()
            && self.surface.is_full_coverage()
            && self.speed.is_full_coverage()
    }

    /// Apply `t` to every layer. The direction pair is not linearly
    /// referenced and is kept.
    #[must_use]
    pub fn transform(&self, t: &impl LayerTransform) -> Self {
        Self {
            two_sided: self.two_sided,
            jurisdiction: self.jurisdiction.transform(t),
            surface: self.surface.transform(t),
            speed: t.apply(&self.speed),
            direction: self.direction,
        }
    }

    /// Swap sides and reorient every value without touching spans. Used
    /// when spans were already expressed in the new stationing.
    #[must_use]
    pub fn flipped(&self) -> Self {
        Self {
            two_sided: self.two_sided,
            jurisdiction: self.jurisdiction.flipped(),
            surface: self.surface.flipped(),
            speed: self.speed.map(Speed::reoriented),
            direction: self.direction.flipped(),
        }
    }

    /// The attributes as seen from the opposite stationing direction.
    #[must_use]
    pub fn reversed(&self) -> Self {
        self.transform(&Reverse).flipped()
    }

    /// The attributes inside `span`, rescaled to a whole edge.
    #[must_use]
    pub fn slice(&self, span: Span) -> Self {
        self.transform(&Slice(span))
    }

    /// Overwrite `span` with `other`, scaled to fit.
    pub fn assign_within(&mut self, span: Span, other: &Self) {
        *self = self.merge(span, other, false);
    }

    /// Like [`assign_within`](Self::assign_within), but unknown values in
    /// `other` leave the current values in place.
    pub fn assign_known_within(&mut self, span: Span, other: &Self) {
        *self = self.merge(span, other, true);
    }

    fn merge(&self, span: Span, other: &Self, known_only: bool) -> Self {
        fn embed<T: Orientable>(
            base: &Layer<T>,
            span: Span,
            inner: &Layer<T>,
            known_only: bool,
        ) -> Layer<T> {
            let mut out = base.clone();
            out.assign_within_where(span, inner, |v| !known_only || !v.is_unknown());
            out
        }
        let direction = if known_only {
            DirectionPair {
                left: keep_known(self.direction.left, other.direction.left),
                right: keep_known(self.direction.right, other.direction.right),
            }
        } else {
            other.direction
        };
        Self {
            two_sided: self.two_sided || other.two_sided,
            jurisdiction: Sided {
                left: embed(&self.jurisdiction.left, span, &other.jurisdiction.left, known_only),
                right: embed(&self.jurisdiction.right, span, &other.jurisdiction.right, known_only),
            },
            surface: Sided {
                left: embed(&self.surface.left, span, &other.surface.left, known_only),
                right: embed(&self.surface.right, span, &other.surface.right, known_only),
            },
            speed: embed(&self.speed, span, &other.speed, known_only),
            direction,
        }
    }
}

fn keep_known(current: Direction, incoming: Direction) -> Direction {
    if incoming.is_unknown() { current } else { incoming }
}

struct Reverse;

impl LayerTransform for Reverse {
    fn apply<T: Orientable>(&self, layer: &Layer<T>) -> Layer<T> {
        layer.reversed()
    }
}

struct Slice(Span);

impl LayerTransform for Slice {
    fn apply<T: Orientable>(&self, layer: &Layer<T>) -> Layer<T> {
        layer.slice(self.0)
    }
}
