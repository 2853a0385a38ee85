//! Run statistics.
//!
//! Every per-edge outcome of a reimport, including anomalies that were
//! absorbed rather than raised, is counted here. Each partition fills its
//! own [`ReimportStatistics`] and the orchestrator merges them with `+=`.

use std::ops::AddAssign;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Serde helpers for `Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Counters collected over one reimport run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_field_names)]
pub struct ReimportStatistics {
    /// Partitions processed.
    pub partitions: usize,
    /// Imported features read (after de-duplication across partitions).
    pub features_read: usize,

    /// Matched edges whose geometry and properties were identical.
    pub unchanged: usize,
    /// Matched edges where only non-geometric properties changed.
    pub attribute_only: usize,
    /// Matched edges whose geometry drifted without topology impact.
    pub minor_drift: usize,
    /// Matched edges that needed a topological update.
    pub topological: usize,

    /// Topological updates executed without a split.
    pub simple_updates: usize,
    /// Updates whose new geometry ran against the old stationing.
    pub reversed: usize,
    /// Topological updates resolved as splits.
    pub splits: usize,
    /// Split searches that found the edge alone already matches.
    pub split_single_edge: usize,

    /// Edges created from unmatched features.
    pub created_edges: usize,
    /// Nodes fabricated by the snapping index.
    pub created_nodes: usize,
    /// Edges deleted because their feature disappeared.
    pub deleted_edges: usize,
    /// Orphaned nodes swept at the end of the run.
    pub deleted_nodes: usize,

    /// Updates whose attribute layers were reset to unknown.
    pub extreme_resets: usize,
    /// Edges left untouched because the update was inconsistent.
    pub fatal_errors: usize,
    /// Rejected input items (degenerate geometry, coincident endpoints).
    pub validation_errors: usize,
    /// Edges reported as strongly altered.
    pub strongly_changed: usize,
    /// Cross-source mapping entries deleted.
    pub invalidated_mappings: usize,

    /// Wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl ReimportStatistics {
    /// Matched edges of any classification.
    #[must_use]
    pub const fn matched(&self) -> usize {
        self.unchanged + self.attribute_only + self.minor_drift + self.topological
    }

    /// Format the statistics as a human-readable table.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Reimport Statistics\n{}", "=".repeat(40)));
        lines.push(format!(
            "Duration: {:.3}ms",
            self.duration.as_secs_f64() * 1000.0
        ));
        lines.push(format!("Partitions: {}", self.partitions));
        lines.push(format!("Features read: {}", self.features_read));
        lines.push(String::new());

        let sections: [(&str, &[(&str, usize)]); 4] = [
            (
                "Classification",
                &[
                    ("unchanged", self.unchanged),
                    ("attribute only", self.attribute_only),
                    ("minor drift", self.minor_drift),
                    ("topological", self.topological),
                ],
            ),
            (
                "Topology",
                &[
                    ("simple updates", self.simple_updates),
                    ("reversed", self.reversed),
                    ("splits", self.splits),
                    ("split single edge", self.split_single_edge),
                    ("extreme resets", self.extreme_resets),
                    ("strongly changed", self.strongly_changed),
                ],
            ),
            (
                "Network",
                &[
                    ("created edges", self.created_edges),
                    ("created nodes", self.created_nodes),
                    ("deleted edges", self.deleted_edges),
                    ("deleted nodes", self.deleted_nodes),
                    ("invalidated mappings", self.invalidated_mappings),
                ],
            ),
            (
                "Anomalies",
                &[
                    ("fatal errors", self.fatal_errors),
                    ("validation errors", self.validation_errors),
                ],
            ),
        ];

        for (title, rows) in sections {
            lines.push(format!("{title}\n{}", "-".repeat(40)));
            for (label, value) in rows {
                lines.push(format!("  {label:<28} {value:>9}"));
            }
            lines.push(String::new());
        }

        lines.join("\n")
    }
}

impl AddAssign for ReimportStatistics {
    fn add_assign(&mut self, rhs: Self) {
        self.partitions += rhs.partitions;
        self.features_read += rhs.features_read;
        self.unchanged += rhs.unchanged;
        self.attribute_only += rhs.attribute_only;
        self.minor_drift += rhs.minor_drift;
        self.topological += rhs.topological;
        self.simple_updates += rhs.simple_updates;
        self.reversed += rhs.reversed;
        self.splits += rhs.splits;
        self.split_single_edge += rhs.split_single_edge;
        self.created_edges += rhs.created_edges;
        self.created_nodes += rhs.created_nodes;
        self.deleted_edges += rhs.deleted_edges;
        self.deleted_nodes += rhs.deleted_nodes;
        self.extreme_resets += rhs.extreme_resets;
        self.fatal_errors += rhs.fatal_errors;
        self.validation_errors += rhs.validation_errors;
        self.strongly_changed += rhs.strongly_changed;
        self.invalidated_mappings += rhs.invalidated_mappings;
        self.duration += rhs.duration;
    }
}
