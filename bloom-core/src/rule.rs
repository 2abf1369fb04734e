//! Achievement rules and the threshold conditions they unlock on.

use crate::{SubjectKind, SubjectSnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// RULE ID
// ============================================================================

/// Stable synthetic identifier for a rule, e.g. `individual.basic.first_point`.
///
/// Unlike the display name, the id survives wording changes in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RuleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// METRICS AND CONDITIONS
// ============================================================================

/// A numeric field a condition can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Score,
    TotalIndividuals,
    TotalGroups,
    TotalScore,
    AverageScore,
    HighScoreCount,
}

impl Metric {
    /// Whether subjects of `kind` carry this metric.
    pub fn applies_to(self, kind: SubjectKind) -> bool {
        match self {
            Metric::Score => matches!(kind, SubjectKind::Individual | SubjectKind::Group),
            _ => kind == SubjectKind::Aggregate,
        }
    }
}

/// A pure predicate over one subject snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// `metric >= value`
    AtLeast { metric: Metric, value: f64 },
    /// `metric < value`
    Below { metric: Metric, value: f64 },
    /// `min <= metric <= max`
    Between { metric: Metric, min: f64, max: f64 },
    /// Every nested condition holds.
    All(Vec<Condition>),
}

impl Condition {
    pub fn at_least(metric: Metric, value: f64) -> Self {
        Condition::AtLeast { metric, value }
    }

    pub fn below(metric: Metric, value: f64) -> Self {
        Condition::Below { metric, value }
    }

    pub fn between(metric: Metric, min: f64, max: f64) -> Self {
        Condition::Between { metric, min, max }
    }

    /// Evaluate against a snapshot. A metric the snapshot does not carry
    /// never satisfies a condition.
    pub fn holds(&self, snapshot: &SubjectSnapshot) -> bool {
        match self {
            Condition::AtLeast { metric, value } => {
                snapshot.metric(*metric).is_some_and(|m| m >= *value)
            }
            Condition::Below { metric, value } => {
                snapshot.metric(*metric).is_some_and(|m| m < *value)
            }
            Condition::Between { metric, min, max } => snapshot
                .metric(*metric)
                .is_some_and(|m| m >= *min && m <= *max),
            Condition::All(conditions) => conditions.iter().all(|c| c.holds(snapshot)),
        }
    }

    /// Every metric referenced, depth first.
    pub fn metrics(&self) -> Vec<Metric> {
        let mut out = Vec::new();
        self.collect_metrics(&mut out);
        out
    }

    fn collect_metrics(&self, out: &mut Vec<Metric>) {
        match self {
            Condition::AtLeast { metric, .. }
            | Condition::Below { metric, .. }
            | Condition::Between { metric, .. } => out.push(*metric),
            Condition::All(conditions) => {
                for c in conditions {
                    c.collect_metrics(out);
                }
            }
        }
    }

    /// Whether the condition can stop holding as the subject's scores grow.
    ///
    /// Unlocks are permanent either way; this only matters for progress views.
    pub fn is_monotonic(&self) -> bool {
        match self {
            Condition::AtLeast { .. } => true,
            Condition::Below { .. } | Condition::Between { .. } => false,
            Condition::All(conditions) => conditions.iter().all(Condition::is_monotonic),
        }
    }
}

// ============================================================================
// RULE
// ============================================================================

fn default_since() -> u8 {
    1
}

/// One entry of the achievement catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub kind: SubjectKind,
    /// First catalog version that contains this rule.
    #[serde(default = "default_since")]
    pub since: u8,
    pub category: String,
    pub icon: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "when")]
    pub condition: Condition,
}

impl Rule {
    /// True when the rule targets the snapshot's kind and its condition holds.
    pub fn holds(&self, snapshot: &SubjectSnapshot) -> bool {
        self.kind == snapshot.kind() && self.condition.holds(snapshot)
    }
}
