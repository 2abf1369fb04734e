//! Subjects: the score-bearing entities achievements are evaluated against.
//!
//! Snapshots are owned by the data layer. The engine only ever reads a copy
//! handed to it on each state-changing event.

use crate::{Metric, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// SUBJECT KIND
// ============================================================================

/// Which catalog a subject is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    /// A single student ("flower").
    #[serde(alias = "flower")]
    Individual,
    /// A team of students ("garden").
    #[serde(alias = "garden")]
    Group,
    /// Summary statistics over a class.
    #[serde(alias = "class")]
    Aggregate,
}

impl SubjectKind {
    pub const ALL: [SubjectKind; 3] = [
        SubjectKind::Individual,
        SubjectKind::Group,
        SubjectKind::Aggregate,
    ];

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Individual => "individual",
            SubjectKind::Group => "group",
            SubjectKind::Aggregate => "aggregate",
        }
    }

    /// Tag used by legacy ledger keys.
    pub fn legacy_tag(&self) -> &'static str {
        match self {
            SubjectKind::Individual => "flower",
            SubjectKind::Group => "garden",
            SubjectKind::Aggregate => "class",
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "individual" | "flower" => Ok(SubjectKind::Individual),
            "group" | "garden" => Ok(SubjectKind::Group),
            "aggregate" | "class" => Ok(SubjectKind::Aggregate),
            _ => Err(ValidationError::UnknownSubjectKind {
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// SNAPSHOTS
// ============================================================================

/// A student at the time of a scoring event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndividualSnapshot {
    pub id: String,
    pub name: String,
    pub score: u64,
}

/// A team at the time of a scoring event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub id: String,
    pub name: String,
    pub score: u64,
}

/// Derived class statistics. Never persisted; recomputed from the roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub scope_id: String,
    pub total_individuals: u64,
    pub total_groups: u64,
    pub total_score: u64,
    pub average_score: f64,
    pub high_score_count: u64,
}

/// Score at or above which a subject counts toward `high_score_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighScoreThresholds {
    pub individual: u64,
    pub group: u64,
}

impl Default for HighScoreThresholds {
    fn default() -> Self {
        Self {
            individual: 20,
            group: 100,
        }
    }
}

impl IndividualSnapshot {
    pub fn new(id: impl Into<String>, name: impl Into<String>, score: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            score,
        }
    }
}

impl GroupSnapshot {
    pub fn new(id: impl Into<String>, name: impl Into<String>, score: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            score,
        }
    }
}

impl AggregateSnapshot {
    /// Recompute class statistics from the individuals and groups in scope.
    ///
    /// `total_score` covers both individuals and groups, while
    /// `average_score` is the mean individual score.
    pub fn from_roster(
        scope_id: impl Into<String>,
        individuals: &[IndividualSnapshot],
        groups: &[GroupSnapshot],
        thresholds: HighScoreThresholds,
    ) -> Self {
        let individual_total = individuals
            .iter()
            .fold(0u64, |acc, i| acc.saturating_add(i.score));
        let group_total = groups
            .iter()
            .fold(0u64, |acc, g| acc.saturating_add(g.score));

        let average_score = if individuals.is_empty() {
            0.0
        } else {
            individual_total as f64 / individuals.len() as f64
        };

        let high_score_count = individuals
            .iter()
            .filter(|i| i.score >= thresholds.individual)
            .count()
            + groups
                .iter()
                .filter(|g| g.score >= thresholds.group)
                .count();

        Self {
            scope_id: scope_id.into(),
            total_individuals: individuals.len() as u64,
            total_groups: groups.len() as u64,
            total_score: individual_total.saturating_add(group_total),
            average_score,
            high_score_count: high_score_count as u64,
        }
    }
}

/// Any subject the engine can evaluate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubjectSnapshot {
    Individual(IndividualSnapshot),
    Group(GroupSnapshot),
    Aggregate(AggregateSnapshot),
}

impl From<IndividualSnapshot> for SubjectSnapshot {
    fn from(s: IndividualSnapshot) -> Self {
        SubjectSnapshot::Individual(s)
    }
}

impl From<GroupSnapshot> for SubjectSnapshot {
    fn from(s: GroupSnapshot) -> Self {
        SubjectSnapshot::Group(s)
    }
}

impl From<AggregateSnapshot> for SubjectSnapshot {
    fn from(s: AggregateSnapshot) -> Self {
        SubjectSnapshot::Aggregate(s)
    }
}

impl SubjectSnapshot {
    pub fn kind(&self) -> SubjectKind {
        match self {
            SubjectSnapshot::Individual(_) => SubjectKind::Individual,
            SubjectSnapshot::Group(_) => SubjectKind::Group,
            SubjectSnapshot::Aggregate(_) => SubjectKind::Aggregate,
        }
    }

    pub fn subject_id(&self) -> &str {
        match self {
            SubjectSnapshot::Individual(s) => &s.id,
            SubjectSnapshot::Group(s) => &s.id,
            SubjectSnapshot::Aggregate(s) => &s.scope_id,
        }
    }

    /// Display name, for kinds that have one.
    pub fn display_name(&self) -> Option<&str> {
        match self {
            SubjectSnapshot::Individual(s) => Some(&s.name),
            SubjectSnapshot::Group(s) => Some(&s.name),
            SubjectSnapshot::Aggregate(_) => None,
        }
    }

    /// Score, for kinds that have one.
    pub fn score(&self) -> Option<u64> {
        match self {
            SubjectSnapshot::Individual(s) => Some(s.score),
            SubjectSnapshot::Group(s) => Some(s.score),
            SubjectSnapshot::Aggregate(_) => None,
        }
    }

    /// Read a metric. `None` when the metric does not exist on this kind.
    pub fn metric(&self, metric: Metric) -> Option<f64> {
        match (self, metric) {
            (SubjectSnapshot::Individual(s), Metric::Score) => Some(s.score as f64),
            (SubjectSnapshot::Group(s), Metric::Score) => Some(s.score as f64),
            (SubjectSnapshot::Aggregate(s), Metric::TotalIndividuals) => {
                Some(s.total_individuals as f64)
            }
            (SubjectSnapshot::Aggregate(s), Metric::TotalGroups) => Some(s.total_groups as f64),
            (SubjectSnapshot::Aggregate(s), Metric::TotalScore) => Some(s.total_score as f64),
            (SubjectSnapshot::Aggregate(s), Metric::AverageScore) => Some(s.average_score),
            (SubjectSnapshot::Aggregate(s), Metric::HighScoreCount) => {
                Some(s.high_score_count as f64)
            }
            _ => None,
        }
    }

    /// Check the invariants the type system cannot express.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let SubjectSnapshot::Aggregate(s) = self {
            if !s.average_score.is_finite() || s.average_score < 0.0 {
                return Err(self.malformed(format!(
                    "average_score must be a finite non-negative number, got {}",
                    s.average_score
                )));
            }
        }
        Ok(())
    }

    fn malformed(&self, reason: String) -> ValidationError {
        ValidationError::MalformedSubjectState {
            kind: self.kind(),
            subject_id: self.subject_id().to_string(),
            reason,
        }
    }

    /// Parse a raw row from the data layer.
    ///
    /// Both the snake_case names and the camelCase names used by the web
    /// client (`totalFlowers`, `avgScore`, ...) are accepted. Missing or
    /// negative numbers are rejected.
    pub fn from_json(
        kind: SubjectKind,
        subject_id: &str,
        value: &JsonValue,
    ) -> Result<Self, ValidationError> {
        let malformed = |reason: String| ValidationError::MalformedSubjectState {
            kind,
            subject_id: subject_id.to_string(),
            reason,
        };

        let object = value
            .as_object()
            .ok_or_else(|| malformed("expected a JSON object".to_string()))?;
        let field = |names: &[&str]| names.iter().find_map(|name| object.get(*name));

        let count = |names: &[&str]| -> Result<u64, ValidationError> {
            let raw = field(names).ok_or_else(|| malformed(format!("missing field {}", names[0])))?;
            read_count(raw).map_err(|reason| malformed(format!("{}: {}", names[0], reason)))
        };

        let snapshot = match kind {
            SubjectKind::Individual | SubjectKind::Group => {
                let score = count(&["score"])?;
                let name = field(&["name"])
                    .and_then(JsonValue::as_str)
                    .unwrap_or(subject_id)
                    .to_string();
                if kind == SubjectKind::Individual {
                    SubjectSnapshot::Individual(IndividualSnapshot::new(subject_id, name, score))
                } else {
                    SubjectSnapshot::Group(GroupSnapshot::new(subject_id, name, score))
                }
            }
            SubjectKind::Aggregate => {
                let average_names = ["average_score", "averageScore", "avgScore"];
                let average = field(&average_names)
                    .ok_or_else(|| malformed("missing field average_score".to_string()))?
                    .as_f64()
                    .ok_or_else(|| malformed("average_score: must be a number".to_string()))?;

                SubjectSnapshot::Aggregate(AggregateSnapshot {
                    scope_id: subject_id.to_string(),
                    total_individuals: count(&[
                        "total_individuals",
                        "totalIndividuals",
                        "totalFlowers",
                    ])?,
                    total_groups: count(&["total_groups", "totalGroups", "totalGardens"])?,
                    total_score: count(&["total_score", "totalScore"])?,
                    average_score: average,
                    high_score_count: count(&["high_score_count", "highScoreCount"])?,
                })
            }
        };

        snapshot.validate()?;
        Ok(snapshot)
    }
}

/// Accept non-negative integers, including integral floats such as `12.0`.
fn read_count(raw: &JsonValue) -> Result<u64, String> {
    if let Some(n) = raw.as_u64() {
        return Ok(n);
    }
    match raw.as_f64() {
        Some(f) if f < 0.0 => Err(format!("must be non-negative, got {}", f)),
        // `u64::MAX as f64` is 2^64, one past the representable range.
        Some(f) if f.is_finite() && f >= u64::MAX as f64 => Err(format!("out of range, got {}", f)),
        Some(f) if f.is_finite() && f.fract() == 0.0 => Ok(f as u64),
        Some(f) => Err(format!("must be an integer, got {}", f)),
        None => Err("must be a number".to_string()),
    }
}
