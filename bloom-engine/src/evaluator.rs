//! Condition evaluation: which catalog rules hold for a snapshot right now.

use std::sync::Arc;

use bloom_catalog::Catalog;
use bloom_core::{Rule, SubjectSnapshot};

/// Pure rule matcher over one catalog.
///
/// Every call re-evaluates every rule for the snapshot's kind. Range rules can
/// stop holding as a score grows, so there is no "already crossed" shortcut.
#[derive(Debug, Clone)]
pub struct ConditionEvaluator {
    catalog: Arc<Catalog>,
}

impl ConditionEvaluator {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Rules that hold for `snapshot`, in catalog declaration order.
    pub fn evaluate(&self, snapshot: &SubjectSnapshot) -> Vec<&Rule> {
        self.catalog
            .rules_for(snapshot.kind())
            .iter()
            .filter(|rule| rule.holds(snapshot))
            .collect()
    }

    pub fn holds(&self, rule: &Rule, snapshot: &SubjectSnapshot) -> bool {
        rule.holds(snapshot)
    }
}
