//! Composite unlock keys.
//!
//! A `LedgerKey` names one (subject, rule) pair. It carries both the stable
//! rule id and the rule's display identity so it can be written in either
//! [`KeyFormat`]. Equality only looks at the stable part.

use bloom_core::{KeyFormat, Rule, RuleId, SubjectKind};
use std::hash::{Hash, Hasher};

/// Prefix of every V2 key.
const V2_PREFIX: &str = "v2:";

/// Identifies a (subject kind, subject id, rule) triple in the ledger.
///
/// # Formats
///
/// - `Legacy`: `{tag}_{subjectId}_{category}_{displayName}`, e.g.
///   `flower_12_basic_初露锋芒`. Kept byte-for-byte compatible with ledgers
///   written by the web client. Renaming a rule orphans these entries.
/// - `V2`: `v2:{kind}:{len}:{subjectId}:{ruleId}`. The subject id is length
///   prefixed so arbitrary ids cannot collide, and the rule is addressed by
///   its stable id.
#[derive(Debug, Clone)]
pub struct LedgerKey {
    inner: LedgerKeyInner,
}

#[derive(Debug, Clone)]
struct LedgerKeyInner {
    kind: SubjectKind,
    subject_id: String,
    rule_id: RuleId,
    category: String,
    rule_name: String,
}

impl LedgerKey {
    /// Key for `rule` unlocked by the subject `(kind, subject_id)`.
    pub fn new(kind: SubjectKind, subject_id: impl Into<String>, rule: &Rule) -> Self {
        Self::from_parts(
            kind,
            subject_id,
            rule.id.clone(),
            rule.category.clone(),
            rule.name.clone(),
        )
    }

    pub fn from_parts(
        kind: SubjectKind,
        subject_id: impl Into<String>,
        rule_id: RuleId,
        category: impl Into<String>,
        rule_name: impl Into<String>,
    ) -> Self {
        Self {
            inner: LedgerKeyInner {
                kind,
                subject_id: subject_id.into(),
                rule_id,
                category: category.into(),
                rule_name: rule_name.into(),
            },
        }
    }

    pub fn kind(&self) -> SubjectKind {
        self.inner.kind
    }

    pub fn subject_id(&self) -> &str {
        &self.inner.subject_id
    }

    pub fn rule_id(&self) -> &RuleId {
        &self.inner.rule_id
    }

    pub fn category(&self) -> &str {
        &self.inner.category
    }

    pub fn rule_name(&self) -> &str {
        &self.inner.rule_name
    }

    /// Serialize for storage.
    pub fn encode(&self, format: KeyFormat) -> String {
        let k = &self.inner;
        match format {
            KeyFormat::Legacy => format!(
                "{}_{}_{}_{}",
                k.kind.legacy_tag(),
                k.subject_id,
                k.category,
                k.rule_name
            ),
            KeyFormat::V2 => format!(
                "{}{}:{}:{}:{}",
                V2_PREFIX,
                k.kind.as_str(),
                k.subject_id.len(),
                k.subject_id,
                k.rule_id
            ),
        }
    }

    /// Recover `(kind, subject_id, rule_id)` from a V2 key.
    ///
    /// Returns `None` for legacy keys and anything malformed. Category and
    /// display name are not part of the V2 encoding; look the rule up in the
    /// catalog to rebuild a full key.
    pub fn decode_v2(encoded: &str) -> Option<(SubjectKind, String, RuleId)> {
        let rest = encoded.strip_prefix(V2_PREFIX)?;

        let (kind, rest) = rest.split_once(':')?;
        let kind = match kind {
            "individual" => SubjectKind::Individual,
            "group" => SubjectKind::Group,
            "aggregate" => SubjectKind::Aggregate,
            _ => return None,
        };

        let (len, rest) = rest.split_once(':')?;
        if len.is_empty() || !len.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let len: usize = len.parse().ok()?;

        let subject_id = rest.get(..len)?;
        let rule_id = rest.get(len..)?.strip_prefix(':')?;
        if rule_id.is_empty() {
            return None;
        }

        Some((kind, subject_id.to_string(), RuleId::new(rule_id)))
    }
}

impl PartialEq for LedgerKey {
    fn eq(&self, other: &Self) -> bool {
        self.inner.kind == other.inner.kind
            && self.inner.subject_id == other.inner.subject_id
            && self.inner.rule_id == other.inner.rule_id
    }
}

impl Eq for LedgerKey {}

impl Hash for LedgerKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.kind.hash(state);
        self.inner.subject_id.hash(state);
        self.inner.rule_id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(kind: SubjectKind, subject: &str) -> LedgerKey {
        LedgerKey::from_parts(
            kind,
            subject,
            RuleId::new("individual.basic.first_point"),
            "basic",
            "初露锋芒",
        )
    }

    #[test]
    fn test_legacy_encoding_matches_existing_ledgers() {
        assert_eq!(
            key(SubjectKind::Individual, "12").encode(KeyFormat::Legacy),
            "flower_12_basic_初露锋芒"
        );
        assert_eq!(
            key(SubjectKind::Aggregate, "class-3").encode(KeyFormat::Legacy),
            "class_class-3_basic_初露锋芒"
        );
    }

    #[test]
    fn test_v2_encoding() {
        assert_eq!(
            key(SubjectKind::Group, "g_1").encode(KeyFormat::V2),
            "v2:group:3:g_1:individual.basic.first_point"
        );
    }

    #[test]
    fn test_v2_decode() {
        let encoded = key(SubjectKind::Group, "a:b").encode(KeyFormat::V2);
        let (kind, subject, rule) = LedgerKey::decode_v2(&encoded).unwrap();
        assert_eq!(kind, SubjectKind::Group);
        assert_eq!(subject, "a:b");
        assert_eq!(rule.as_str(), "individual.basic.first_point");
    }

    #[test]
    fn test_v2_decode_rejects_malformed() {
        assert!(LedgerKey::decode_v2("flower_12_basic_初露锋芒").is_none());
        assert!(LedgerKey::decode_v2("v2:planet:1:a:r").is_none());
        assert!(LedgerKey::decode_v2("v2:group:9:a:r").is_none());
        assert!(LedgerKey::decode_v2("v2:group:1:a:").is_none());
        assert!(LedgerKey::decode_v2("v2:group:+1:a:r").is_none());
        assert!(LedgerKey::decode_v2("v2:group:1:ab").is_none());
    }

    #[test]
    fn test_identity_ignores_display_fields() {
        let a = key(SubjectKind::Individual, "1");
        let renamed = LedgerKey::from_parts(
            SubjectKind::Individual,
            "1",
            RuleId::new("individual.basic.first_point"),
            "basic",
            "first point",
        );
        assert_eq!(a, renamed);
        assert_eq!(a.encode(KeyFormat::V2), renamed.encode(KeyFormat::V2));
        assert_ne!(a.encode(KeyFormat::Legacy), renamed.encode(KeyFormat::Legacy));
        assert_ne!(a, key(SubjectKind::Group, "1"));
    }
}
