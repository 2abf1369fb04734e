//! Import of unlock ledgers written by the web client.
//!
//! The client stored unlocks as a JSON array of strings in the form
//! `{flower|garden|class}_{subjectId}_{category}_{displayName}`. Subject ids
//! may themselves contain `_`, so each split point is tried against the
//! catalog's `(category, displayName)` pairs.
//!
//! V2 keys are accepted too, so dumps can move between key formats.

use bloom_catalog::Catalog;
use bloom_core::{BloomResult, SubjectKind, ValidationError};
use bloom_storage::{LedgerKey, UnlockLedger};
use tracing::{debug, info};

/// Summary of a legacy import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Entries newly recorded in the target ledger.
    pub imported: usize,
    /// Entries the target ledger already held.
    pub already_present: usize,
    /// Entries that match no rule in the catalog, verbatim.
    pub unmatched: Vec<String>,
}

/// Map one legacy entry to a ledger key, if the catalog knows the rule.
pub fn parse_legacy_key(catalog: &Catalog, entry: &str) -> Option<LedgerKey> {
    let (kind, rest) = SubjectKind::ALL.into_iter().find_map(|kind| {
        entry
            .strip_prefix(kind.legacy_tag())
            .and_then(|r| r.strip_prefix('_'))
            .map(|r| (kind, r))
    })?;

    // Earliest split first, so the longest `_{category}_{name}` suffix wins
    // and a name that ends with another rule's suffix cannot shadow it.
    let splits: Vec<usize> = rest.match_indices('_').map(|(i, _)| i).collect();
    for (n, &subject_end) in splits.iter().enumerate() {
        if subject_end == 0 {
            continue;
        }
        for &category_end in &splits[n + 1..] {
            let category = &rest[subject_end + 1..category_end];
            let name = &rest[category_end + 1..];
            if let Some(rule) = catalog.rule_by_identity(kind, category, name) {
                return Some(LedgerKey::new(kind, &rest[..subject_end], rule));
            }
        }
    }

    None
}

/// Map a ledger entry in either format to a key.
///
/// V2 entries carry the rule id, which must still exist in the catalog.
pub fn parse_ledger_entry(catalog: &Catalog, entry: &str) -> Option<LedgerKey> {
    match LedgerKey::decode_v2(entry) {
        Some((kind, subject_id, rule_id)) => catalog
            .rule(kind, rule_id.as_str())
            .map(|rule| LedgerKey::new(kind, subject_id, rule)),
        None => parse_legacy_key(catalog, entry),
    }
}

/// Record every entry of a ledger dump into `ledger`.
///
/// Entries may be legacy strings or V2 keys, so a dump taken from either
/// kind of ledger can be moved into the other. Safe to run repeatedly:
/// entries already present are counted, not duplicated.
pub async fn import_legacy(
    catalog: &Catalog,
    ledger: &dyn UnlockLedger,
    json: &str,
) -> BloomResult<MigrationReport> {
    let entries: Vec<String> =
        serde_json::from_str(json).map_err(|e| ValidationError::InvalidValue {
            field: "legacy_ledger".to_string(),
            reason: e.to_string(),
        })?;

    let mut report = MigrationReport::default();
    for entry in entries {
        match parse_ledger_entry(catalog, &entry) {
            Some(key) => {
                if ledger.record_unlock(&key).await? {
                    report.imported += 1;
                } else {
                    report.already_present += 1;
                }
            }
            None => {
                debug!(entry = %entry, "Legacy unlock matches no catalog rule");
                report.unmatched.push(entry);
            }
        }
    }

    info!(
        imported = report.imported,
        already_present = report.already_present,
        unmatched = report.unmatched.len(),
        target_format = ?ledger.key_format(),
        "Imported legacy unlock ledger"
    );

    Ok(report)
}
