//! Bloom Catalog - Achievement Rule Tables
//!
//! All rules live in one embedded table (`catalog/rules.json`), each tagged
//! with the catalog version that introduced it. A [`Catalog`] is the subset of
//! that table visible at one version, validated once at load and immutable
//! afterwards.

use bloom_core::{CatalogError, CatalogVersion, Condition, Rule, SubjectKind};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// The built-in rule table.
pub const BUILTIN_TABLE: &str = include_str!("../catalog/rules.json");

const TABLE_FORMAT: u8 = 1;

static CLASSIC: Lazy<Result<Arc<Catalog>, CatalogError>> =
    Lazy::new(|| Catalog::from_json(BUILTIN_TABLE, CatalogVersion::Classic).map(Arc::new));

static EXTENDED: Lazy<Result<Arc<Catalog>, CatalogError>> =
    Lazy::new(|| Catalog::from_json(BUILTIN_TABLE, CatalogVersion::Extended).map(Arc::new));

// ============================================================================
// TABLE FORMAT
// ============================================================================

/// Display label for a category tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryLabel {
    pub tag: String,
    pub label: String,
}

#[derive(Debug, Deserialize)]
struct RuleTable {
    format: u8,
    categories: Vec<CategoryLabel>,
    rules: Vec<Rule>,
}

// ============================================================================
// CATALOG
// ============================================================================

/// Rules for every subject kind at one catalog version.
#[derive(Debug, Clone)]
pub struct Catalog {
    version: CatalogVersion,
    individual: Vec<Rule>,
    group: Vec<Rule>,
    aggregate: Vec<Rule>,
    categories: Vec<CategoryLabel>,
    labels: HashMap<String, usize>,
}

impl Catalog {
    /// The built-in catalog at `version`, parsed on first use and shared.
    pub fn builtin(version: CatalogVersion) -> Result<Arc<Catalog>, CatalogError> {
        let cell = match version {
            CatalogVersion::Classic => &CLASSIC,
            CatalogVersion::Extended => &EXTENDED,
        };
        match Lazy::force(cell) {
            Ok(catalog) => Ok(Arc::clone(catalog)),
            Err(e) => Err(e.clone()),
        }
    }

    /// Parse and validate a rule table, keeping rules visible at `version`.
    pub fn from_json(json: &str, version: CatalogVersion) -> Result<Catalog, CatalogError> {
        let table: RuleTable = serde_json::from_str(json).map_err(|e| CatalogError::Parse {
            reason: e.to_string(),
        })?;

        if table.format != TABLE_FORMAT {
            return Err(CatalogError::Parse {
                reason: format!("unsupported table format {}", table.format),
            });
        }

        let mut ids = HashSet::new();
        for rule in &table.rules {
            if !ids.insert(rule.id.as_str()) {
                return Err(CatalogError::DuplicateRuleId {
                    id: rule.id.to_string(),
                });
            }
            if rule.since == 0 {
                return Err(CatalogError::Parse {
                    reason: format!("rule {} has since = 0", rule.id),
                });
            }
        }

        let labels: HashMap<String, usize> = table
            .categories
            .iter()
            .enumerate()
            .map(|(i, c)| (c.tag.clone(), i))
            .collect();

        let mut catalog = Catalog {
            version,
            individual: Vec::new(),
            group: Vec::new(),
            aggregate: Vec::new(),
            categories: table.categories,
            labels,
        };

        let mut identities = HashSet::new();
        for rule in table.rules {
            if rule.since > version.as_u8() {
                continue;
            }

            validate_condition(&rule, &rule.condition)?;

            if !identities.insert((rule.kind, rule.category.clone(), rule.name.clone())) {
                return Err(CatalogError::DuplicateIdentity {
                    kind: rule.kind,
                    category: rule.category,
                    name: rule.name,
                });
            }

            if !catalog.labels.contains_key(&rule.category) {
                return Err(CatalogError::MissingCategoryLabel {
                    category: rule.category,
                });
            }

            catalog.rules_mut(rule.kind).push(rule);
        }

        for kind in SubjectKind::ALL {
            if catalog.rules_for(kind).is_empty() {
                return Err(CatalogError::EmptyKind { kind });
            }
        }

        tracing::debug!(
            version = version.as_u8(),
            individual = catalog.individual.len(),
            group = catalog.group.len(),
            aggregate = catalog.aggregate.len(),
            "Loaded achievement catalog"
        );

        Ok(catalog)
    }

    fn rules_mut(&mut self, kind: SubjectKind) -> &mut Vec<Rule> {
        match kind {
            SubjectKind::Individual => &mut self.individual,
            SubjectKind::Group => &mut self.group,
            SubjectKind::Aggregate => &mut self.aggregate,
        }
    }

    /// Rules for `kind` in declaration order.
    pub fn rules_for(&self, kind: SubjectKind) -> &[Rule] {
        match kind {
            SubjectKind::Individual => &self.individual,
            SubjectKind::Group => &self.group,
            SubjectKind::Aggregate => &self.aggregate,
        }
    }

    /// Look up a rule by its stable id.
    pub fn rule(&self, kind: SubjectKind, id: &str) -> Option<&Rule> {
        self.rules_for(kind).iter().find(|r| r.id.as_str() == id)
    }

    /// Look up a rule by its display identity, as legacy ledger keys store it.
    pub fn rule_by_identity(&self, kind: SubjectKind, category: &str, name: &str) -> Option<&Rule> {
        self.rules_for(kind)
            .iter()
            .find(|r| r.category == category && r.name == name)
    }

    pub fn category_label(&self, tag: &str) -> Option<&str> {
        self.labels
            .get(tag)
            .map(|&i| self.categories[i].label.as_str())
    }

    /// Every labelled category, in display order.
    pub fn categories(&self) -> &[CategoryLabel] {
        &self.categories
    }

    pub fn version(&self) -> CatalogVersion {
        self.version
    }

    /// Total rules across all kinds.
    pub fn len(&self) -> usize {
        self.individual.len() + self.group.len() + self.aggregate.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All rules, kind by kind.
    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        SubjectKind::ALL
            .into_iter()
            .flat_map(move |kind| self.rules_for(kind).iter())
    }
}

fn validate_condition(rule: &Rule, condition: &Condition) -> Result<(), CatalogError> {
    let invalid = |reason: String| CatalogError::InvalidThreshold {
        id: rule.id.to_string(),
        reason,
    };
    let check_value = |value: f64| {
        if value.is_finite() && value >= 0.0 {
            Ok(())
        } else {
            Err(invalid(format!("{} is not a non-negative number", value)))
        }
    };

    match condition {
        Condition::All(conditions) => {
            if conditions.is_empty() {
                return Err(CatalogError::EmptyCondition {
                    id: rule.id.to_string(),
                });
            }
            for c in conditions {
                validate_condition(rule, c)?;
            }
            return Ok(());
        }
        Condition::AtLeast { value, .. } | Condition::Below { value, .. } => check_value(*value)?,
        Condition::Between { min, max, .. } => {
            check_value(*min)?;
            check_value(*max)?;
            if min > max {
                return Err(invalid(format!("range {}..={} is empty", min, max)));
            }
        }
    }

    for metric in condition.metrics() {
        if !metric.applies_to(rule.kind) {
            return Err(CatalogError::MetricNotApplicable {
                id: rule.id.to_string(),
                kind: rule.kind,
                metric,
            });
        }
    }

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bloom_core::Metric;

    fn table(rules: &str) -> String {
        format!(
            r#"{{"format": 1,
                "categories": [{{"tag": "basic", "label": "基础"}}],
                "rules": [{}]}}"#,
            rules
        )
    }

    const MINIMAL: &str = r#"
        {"id": "i.1", "kind": "individual", "category": "basic", "icon": "", "name": "a", "description": "",
         "when": {"at_least": {"metric": "score", "value": 1}}},
        {"id": "g.1", "kind": "group", "category": "basic", "icon": "", "name": "a", "description": "",
         "when": {"at_least": {"metric": "score", "value": 1}}},
        {"id": "c.1", "kind": "aggregate", "category": "basic", "icon": "", "name": "a", "description": "",
         "when": {"at_least": {"metric": "total_score", "value": 1}}}"#;

    #[test]
    fn test_builtin_rule_counts() {
        let classic = Catalog::builtin(CatalogVersion::Classic).unwrap();
        assert_eq!(classic.rules_for(SubjectKind::Individual).len(), 22);
        assert_eq!(classic.rules_for(SubjectKind::Group).len(), 22);
        assert_eq!(classic.rules_for(SubjectKind::Aggregate).len(), 20);

        let extended = Catalog::builtin(CatalogVersion::Extended).unwrap();
        assert_eq!(extended.rules_for(SubjectKind::Individual).len(), 41);
        assert_eq!(extended.rules_for(SubjectKind::Group).len(), 37);
        assert_eq!(extended.rules_for(SubjectKind::Aggregate).len(), 35);
        assert_eq!(extended.len(), 113);
        assert_eq!(extended.version(), CatalogVersion::Extended);
    }

    #[test]
    fn test_builtin_is_shared() {
        let a = Catalog::builtin(CatalogVersion::Extended).unwrap();
        let b = Catalog::builtin(CatalogVersion::Extended).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_extended_starts_with_classic() {
        let classic = Catalog::builtin(CatalogVersion::Classic).unwrap();
        let extended = Catalog::builtin(CatalogVersion::Extended).unwrap();
        for kind in SubjectKind::ALL {
            let old = classic.rules_for(kind);
            assert_eq!(old, &extended.rules_for(kind)[..old.len()]);
        }
    }

    #[test]
    fn test_extended_only_adds_new_categories() {
        let classic = Catalog::builtin(CatalogVersion::Classic).unwrap();
        let extended = Catalog::builtin(CatalogVersion::Extended).unwrap();
        let old: HashSet<(SubjectKind, &str)> =
            classic.iter().map(|r| (r.kind, r.category.as_str())).collect();
        let added: Vec<&Rule> = extended.iter().filter(|r| r.since > 1).collect();

        assert!(!added.is_empty());
        for rule in added {
            assert!(
                !old.contains(&(rule.kind, rule.category.as_str())),
                "{} lands in a classic category",
                rule.id
            );
        }
    }

    #[test]
    fn test_rules_for_is_restartable() {
        let catalog = Catalog::builtin(CatalogVersion::Extended).unwrap();
        let first: Vec<_> = catalog.rules_for(SubjectKind::Group).iter().map(|r| &r.id).collect();
        let second: Vec<_> = catalog.rules_for(SubjectKind::Group).iter().map(|r| &r.id).collect();
        assert_eq!(first, second);
        assert_eq!(first[0].as_str(), "group.basic.founded");
    }

    #[test]
    fn test_lookup_by_id_and_identity() {
        let catalog = Catalog::builtin(CatalogVersion::Extended).unwrap();

        let rule = catalog
            .rule(SubjectKind::Individual, "individual.basic.first_point")
            .unwrap();
        assert_eq!(rule.name, "初露锋芒");
        assert_eq!(rule.condition, Condition::at_least(Metric::Score, 1.0));

        let balanced = catalog
            .rule_by_identity(SubjectKind::Group, "special", "均衡发展")
            .unwrap();
        assert_eq!(balanced.condition, Condition::between(Metric::Score, 30.0, 80.0));

        assert!(catalog.rule(SubjectKind::Group, "individual.basic.first_point").is_none());
    }

    #[test]
    fn test_category_labels() {
        let catalog = Catalog::builtin(CatalogVersion::Extended).unwrap();
        assert_eq!(catalog.category_label("basic"), Some("🌱 基础成就"));
        assert_eq!(catalog.category_label("progress"), Some("📈 进步成就"));
        assert_eq!(catalog.category_label("nope"), None);
        assert_eq!(catalog.categories()[0].tag, "basic");
    }

    #[test]
    fn test_classic_hides_later_rules() {
        let classic = Catalog::builtin(CatalogVersion::Classic).unwrap();
        assert!(classic.iter().all(|r| r.since == 1));
        assert!(classic
            .rule(SubjectKind::Individual, "individual.time.early_bird")
            .is_none());
    }

    #[test]
    fn test_every_builtin_rule_targets_its_own_kind() {
        let catalog = Catalog::builtin(CatalogVersion::Extended).unwrap();
        for kind in SubjectKind::ALL {
            for rule in catalog.rules_for(kind) {
                assert_eq!(rule.kind, kind);
                assert!(rule.id.as_str().starts_with(kind.as_str()));
                assert!(catalog.category_label(&rule.category).is_some());
            }
        }
    }

    #[test]
    fn test_from_json_minimal() {
        let catalog = Catalog::from_json(&table(MINIMAL), CatalogVersion::Classic).unwrap();
        assert_eq!(catalog.len(), 3);
        assert!(!catalog.is_empty());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            Catalog::from_json("{not json", CatalogVersion::Classic),
            Err(CatalogError::Parse { .. })
        ));
        assert!(matches!(
            Catalog::from_json(
                r#"{"format": 9, "categories": [], "rules": []}"#,
                CatalogVersion::Classic
            ),
            Err(CatalogError::Parse { .. })
        ));
    }

    #[test]
    fn test_rejects_duplicate_rule_id() {
        let rules = format!(
            "{},{}",
            MINIMAL,
            r#"{"id": "i.1", "kind": "individual", "category": "basic", "icon": "", "name": "b",
                "description": "", "when": {"at_least": {"metric": "score", "value": 2}}}"#
        );
        assert_eq!(
            Catalog::from_json(&table(&rules), CatalogVersion::Classic).unwrap_err(),
            CatalogError::DuplicateRuleId { id: "i.1".to_string() }
        );
    }

    #[test]
    fn test_rejects_duplicate_identity() {
        let rules = format!(
            "{},{}",
            MINIMAL,
            r#"{"id": "i.2", "kind": "individual", "category": "basic", "icon": "", "name": "a",
                "description": "", "when": {"at_least": {"metric": "score", "value": 2}}}"#
        );
        assert!(matches!(
            Catalog::from_json(&table(&rules), CatalogVersion::Classic),
            Err(CatalogError::DuplicateIdentity { kind: SubjectKind::Individual, .. })
        ));
    }

    #[test]
    fn test_duplicate_identity_outside_version_is_ignored() {
        let rules = format!(
            "{},{}",
            MINIMAL,
            r#"{"id": "i.2", "kind": "individual", "since": 2, "category": "basic", "icon": "",
                "name": "a", "description": "", "when": {"at_least": {"metric": "score", "value": 2}}}"#
        );
        assert!(Catalog::from_json(&table(&rules), CatalogVersion::Classic).is_ok());
        assert!(Catalog::from_json(&table(&rules), CatalogVersion::Extended).is_err());
    }

    #[test]
    fn test_rejects_metric_for_wrong_kind() {
        let rules = format!(
            "{},{}",
            MINIMAL,
            r#"{"id": "g.2", "kind": "group", "category": "basic", "icon": "", "name": "b",
                "description": "", "when": {"at_least": {"metric": "average_score", "value": 2}}}"#
        );
        assert_eq!(
            Catalog::from_json(&table(&rules), CatalogVersion::Classic).unwrap_err(),
            CatalogError::MetricNotApplicable {
                id: "g.2".to_string(),
                kind: SubjectKind::Group,
                metric: Metric::AverageScore,
            }
        );
    }

    #[test]
    fn test_rejects_empty_all_and_bad_ranges() {
        let empty_all = format!(
            "{},{}",
            MINIMAL,
            r#"{"id": "c.2", "kind": "aggregate", "category": "basic", "icon": "", "name": "b",
                "description": "", "when": {"all": []}}"#
        );
        assert!(matches!(
            Catalog::from_json(&table(&empty_all), CatalogVersion::Classic),
            Err(CatalogError::EmptyCondition { .. })
        ));

        let inverted = format!(
            "{},{}",
            MINIMAL,
            r#"{"id": "g.2", "kind": "group", "category": "basic", "icon": "", "name": "b",
                "description": "", "when": {"between": {"metric": "score", "min": 80, "max": 30}}}"#
        );
        assert!(matches!(
            Catalog::from_json(&table(&inverted), CatalogVersion::Classic),
            Err(CatalogError::InvalidThreshold { .. })
        ));

        let negative = format!(
            "{},{}",
            MINIMAL,
            r#"{"id": "g.2", "kind": "group", "category": "basic", "icon": "", "name": "b",
                "description": "", "when": {"below": {"metric": "score", "value": -1}}}"#
        );
        assert!(matches!(
            Catalog::from_json(&table(&negative), CatalogVersion::Classic),
            Err(CatalogError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_rejects_missing_kind_and_label() {
        let only_individual = r#"{"id": "i.1", "kind": "individual", "category": "basic", "icon": "",
            "name": "a", "description": "", "when": {"at_least": {"metric": "score", "value": 1}}}"#;
        assert!(matches!(
            Catalog::from_json(&table(only_individual), CatalogVersion::Classic),
            Err(CatalogError::EmptyKind { kind: SubjectKind::Group })
        ));

        let unlabelled = format!(
            "{},{}",
            MINIMAL,
            r#"{"id": "i.2", "kind": "individual", "category": "mystery", "icon": "", "name": "b",
                "description": "", "when": {"at_least": {"metric": "score", "value": 2}}}"#
        );
        assert_eq!(
            Catalog::from_json(&table(&unlabelled), CatalogVersion::Classic).unwrap_err(),
            CatalogError::MissingCategoryLabel { category: "mystery".to_string() }
        );
    }
}
