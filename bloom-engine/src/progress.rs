//! Progress lists: every rule for a subject, flagged unlocked or locked.

use bloom_core::{BloomResult, RuleId, SubjectKind, SubjectSnapshot};
use bloom_storage::LedgerKey;
use serde::Serialize;

use crate::engine::{ensure_matches, AchievementEngine};

/// Icon shown for rules that are still locked.
pub const LOCKED_ICON: &str = "🔒";

/// One rule in a progress list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressItem {
    pub rule_id: RuleId,
    pub icon: String,
    pub name: String,
    pub description: String,
    /// The rule's condition holds for the current snapshot.
    pub live: bool,
    /// The ledger holds an unlock for this rule.
    pub recorded: bool,
}

impl ProgressItem {
    /// A recorded unlock stays unlocked even after the condition stops holding.
    pub fn unlocked(&self) -> bool {
        self.live || self.recorded
    }

    pub fn display_icon(&self) -> &str {
        if self.unlocked() {
            &self.icon
        } else {
            LOCKED_ICON
        }
    }
}

/// Rules of one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressGroup {
    pub category: String,
    pub label: String,
    pub items: Vec<ProgressItem>,
}

/// Full progress list for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressView {
    pub kind: SubjectKind,
    pub subject_id: String,
    /// Categories in order of first appearance in the catalog.
    pub groups: Vec<ProgressGroup>,
    pub unlocked: usize,
    pub total: usize,
}

impl ProgressView {
    pub fn items(&self) -> impl Iterator<Item = &ProgressItem> {
        self.groups.iter().flat_map(|g| g.items.iter())
    }

    pub fn item(&self, rule_id: &str) -> Option<&ProgressItem> {
        self.items().find(|i| i.rule_id.as_str() == rule_id)
    }

    pub fn locked(&self) -> usize {
        self.total - self.unlocked
    }
}

impl AchievementEngine {
    /// Build the progress list for a subject without recording anything.
    pub async fn progress(
        &self,
        kind: SubjectKind,
        subject_id: &str,
        snapshot: &SubjectSnapshot,
    ) -> BloomResult<ProgressView> {
        ensure_matches(kind, subject_id, snapshot)?;
        snapshot.validate()?;

        let catalog = self.catalog();
        let rules = catalog.rules_for(kind);
        let keys: Vec<LedgerKey> = rules
            .iter()
            .map(|rule| LedgerKey::new(kind, subject_id, rule))
            .collect();
        let recorded = self.ledger().unlocked_among(&keys).await?;

        let mut groups: Vec<ProgressGroup> = Vec::new();
        let mut unlocked = 0;

        for (rule, recorded) in rules.iter().zip(recorded) {
            let item = ProgressItem {
                rule_id: rule.id.clone(),
                icon: rule.icon.clone(),
                name: rule.name.clone(),
                description: rule.description.clone(),
                live: self.evaluator().holds(rule, snapshot),
                recorded,
            };
            if item.unlocked() {
                unlocked += 1;
            }

            match groups.iter_mut().find(|g| g.category == rule.category) {
                Some(group) => group.items.push(item),
                None => groups.push(ProgressGroup {
                    category: rule.category.clone(),
                    label: catalog
                        .category_label(&rule.category)
                        .unwrap_or(&rule.category)
                        .to_string(),
                    items: vec![item],
                }),
            }
        }

        Ok(ProgressView {
            kind,
            subject_id: subject_id.to_string(),
            groups,
            unlocked,
            total: rules.len(),
        })
    }
}
