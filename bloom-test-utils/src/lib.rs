//! Bloom Test Utilities
//!
//! Shared test infrastructure for the bloom workspace:
//! - Proptest generators for subject snapshots
//! - A ledger wrapper that fails on demand
//! - Fixtures for the classroom scenarios the engine is tested against
//! - Assertions for bloom error variants

pub use bloom_catalog::Catalog;
pub use bloom_core::{
    AggregateSnapshot, BloomError, BloomResult, CatalogVersion, EngineConfig, GroupSnapshot,
    HighScoreThresholds, IndividualSnapshot, KeyFormat, StorageError, SubjectKind,
    SubjectSnapshot, ValidationError,
};
pub use bloom_engine::{AchievementEngine, Unlocked};
pub use bloom_storage::{InMemoryLedger, LedgerKey, UnlockLedger};

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

// ============================================================================
// FLAKY LEDGER
// ============================================================================

/// Ledger wrapper that can be switched off, or set to fail after a number of
/// successful writes.
///
/// While unavailable every call returns `StoreUnavailable`. Keys written
/// before the outage stay in the inner ledger.
pub struct FlakyLedger {
    inner: Arc<dyn UnlockLedger>,
    available: AtomicBool,
    /// Writes left before the ledger goes down; negative means unlimited.
    writes_left: AtomicI64,
}

impl FlakyLedger {
    pub fn new(inner: Arc<dyn UnlockLedger>) -> Self {
        Self {
            inner,
            available: AtomicBool::new(true),
            writes_left: AtomicI64::new(-1),
        }
    }

    /// Wrap a fresh in-memory ledger.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryLedger::default()))
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if available {
            self.writes_left.store(-1, Ordering::SeqCst);
        }
    }

    /// Allow `writes` more successful `record_unlock` calls, then go down.
    pub fn fail_after(&self, writes: u32) {
        self.writes_left.store(i64::from(writes), Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &Arc<dyn UnlockLedger> {
        &self.inner
    }

    fn check(&self) -> BloomResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(BloomError::store_unavailable("ledger switched off by test"))
        }
    }

    fn take_write(&self) -> BloomResult<()> {
        self.check()?;
        let left = self.writes_left.load(Ordering::SeqCst);
        if left == 0 {
            self.available.store(false, Ordering::SeqCst);
            return Err(BloomError::store_unavailable("ledger write budget exhausted"));
        }
        if left > 0 {
            self.writes_left.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl UnlockLedger for FlakyLedger {
    fn key_format(&self) -> KeyFormat {
        self.inner.key_format()
    }

    async fn has_unlocked(&self, key: &LedgerKey) -> BloomResult<bool> {
        self.check()?;
        self.inner.has_unlocked(key).await
    }

    async fn record_unlock(&self, key: &LedgerKey) -> BloomResult<bool> {
        self.take_write()?;
        self.inner.record_unlock(key).await
    }

    async fn unlocked_among(&self, keys: &[LedgerKey]) -> BloomResult<Vec<bool>> {
        self.check()?;
        self.inner.unlocked_among(keys).await
    }

    async fn len(&self) -> BloomResult<u64> {
        self.check()?;
        self.inner.len().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for bloom subject types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_subject_kind() -> impl Strategy<Value = SubjectKind> {
        prop_oneof![
            Just(SubjectKind::Individual),
            Just(SubjectKind::Group),
            Just(SubjectKind::Aggregate),
        ]
    }

    /// Ids as the data layer hands them out, underscores included.
    pub fn arb_subject_id() -> impl Strategy<Value = String> {
        "[a-z0-9][a-z0-9_-]{0,15}"
    }

    /// Scores spanning every threshold in the built-in catalog.
    pub fn arb_score() -> impl Strategy<Value = u64> {
        prop_oneof![0u64..=60, 60u64..=400]
    }

    pub fn arb_individual() -> impl Strategy<Value = IndividualSnapshot> {
        (arb_subject_id(), "[a-z]{1,8}", arb_score())
            .prop_map(|(id, name, score)| IndividualSnapshot::new(id, name, score))
    }

    pub fn arb_group() -> impl Strategy<Value = GroupSnapshot> {
        (arb_subject_id(), "[a-z]{1,8}", arb_score())
            .prop_map(|(id, name, score)| GroupSnapshot::new(id, name, score))
    }

    /// A roster of individuals and groups for one class.
    pub fn arb_roster() -> impl Strategy<Value = (Vec<IndividualSnapshot>, Vec<GroupSnapshot>)> {
        (
            prop::collection::vec(arb_score(), 0..30),
            prop::collection::vec(arb_score(), 0..15),
        )
            .prop_map(|(individual_scores, group_scores)| {
                let individuals = individual_scores
                    .into_iter()
                    .enumerate()
                    .map(|(i, s)| IndividualSnapshot::new(format!("f{}", i), "flower", s))
                    .collect();
                let groups = group_scores
                    .into_iter()
                    .enumerate()
                    .map(|(i, s)| GroupSnapshot::new(format!("g{}", i), "garden", s))
                    .collect();
                (individuals, groups)
            })
    }

    /// Aggregate snapshots derived from a generated roster, so the
    /// statistics are always mutually consistent.
    pub fn arb_aggregate() -> impl Strategy<Value = AggregateSnapshot> {
        (arb_subject_id(), arb_roster()).prop_map(|(scope, (individuals, groups))| {
            AggregateSnapshot::from_roster(
                scope,
                &individuals,
                &groups,
                HighScoreThresholds::default(),
            )
        })
    }

    pub fn arb_snapshot() -> impl Strategy<Value = SubjectSnapshot> {
        prop_oneof![
            arb_individual().prop_map(SubjectSnapshot::from),
            arb_group().prop_map(SubjectSnapshot::from),
            arb_aggregate().prop_map(SubjectSnapshot::from),
        ]
    }

    /// Non-decreasing score sequences, as produced by a run of awards.
    pub fn arb_score_history() -> impl Strategy<Value = Vec<u64>> {
        prop::collection::vec(0u64..=10, 1..20).prop_map(|steps| {
            steps
                .into_iter()
                .scan(0u64, |total, step| {
                    *total += step;
                    Some(*total)
                })
                .collect()
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built engines and snapshots for common scenarios.

    use super::*;
    use tempfile::TempDir;

    pub fn individual(id: &str, score: u64) -> SubjectSnapshot {
        IndividualSnapshot::new(id, format!("花朵{}", id), score).into()
    }

    pub fn group(id: &str, score: u64) -> SubjectSnapshot {
        GroupSnapshot::new(id, format!("花田{}", id), score).into()
    }

    /// A class with 10 individuals, 5 groups, total score 310, average
    /// individual score 16 and 5 high scorers.
    pub fn scenario_class() -> AggregateSnapshot {
        AggregateSnapshot {
            scope_id: "class-1".to_string(),
            total_individuals: 10,
            total_groups: 5,
            total_score: 310,
            average_score: 16.0,
            high_score_count: 5,
        }
    }

    /// A roster that aggregates to [`scenario_class`] under the default
    /// thresholds.
    pub fn scenario_roster() -> (Vec<IndividualSnapshot>, Vec<GroupSnapshot>) {
        let individuals = (0..10)
            .map(|i| {
                let score = if i < 5 { 22 } else { 10 };
                IndividualSnapshot::new(format!("f{}", i), format!("花朵{}", i), score)
            })
            .collect();
        let groups = (0..5)
            .map(|i| GroupSnapshot::new(format!("g{}", i), format!("花田{}", i), 30))
            .collect();
        (individuals, groups)
    }

    /// Engine over the given catalog version and a fresh in-memory ledger.
    pub fn engine_with(version: CatalogVersion) -> AchievementEngine {
        let catalog = Catalog::builtin(version).expect("built-in catalog loads");
        AchievementEngine::new(catalog, Arc::new(InMemoryLedger::default()))
    }

    /// Engine over the default (extended) catalog.
    pub fn test_engine() -> AchievementEngine {
        engine_with(CatalogVersion::default())
    }

    pub fn classic_engine() -> AchievementEngine {
        engine_with(CatalogVersion::Classic)
    }

    /// Engine whose ledger can be taken down mid-test.
    pub fn flaky_engine(version: CatalogVersion) -> (AchievementEngine, Arc<FlakyLedger>) {
        let ledger = Arc::new(FlakyLedger::in_memory());
        let catalog = Catalog::builtin(version).expect("built-in catalog loads");
        let engine = AchievementEngine::new(catalog, ledger.clone());
        (engine, ledger)
    }

    /// Config for an LMDB ledger in a fresh temporary directory. Keep the
    /// `TempDir` alive for as long as the ledger is used.
    pub fn durable_config() -> (EngineConfig, TempDir) {
        let dir = TempDir::new().expect("create temp dir");
        let config = EngineConfig {
            ledger_path: Some(dir.path().join("ledger")),
            ledger_max_size_mb: 10,
            ..EngineConfig::development()
        };
        (config, dir)
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for bloom results.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &BloomResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_store_unavailable<T: std::fmt::Debug>(result: &BloomResult<T>) {
        match result {
            Err(BloomError::Storage(StorageError::StoreUnavailable { .. })) => {}
            other => panic!("Expected StoreUnavailable, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_malformed<T: std::fmt::Debug>(result: &BloomResult<T>) {
        match result {
            Err(BloomError::Validation(ValidationError::MalformedSubjectState { .. })) => {}
            other => panic!("Expected MalformedSubjectState, got: {:?}", other),
        }
    }

    /// Assert the unlocks carry exactly these rule ids, in this order.
    #[track_caller]
    pub fn assert_rule_ids(unlocked: &[Unlocked], expected: &[&str]) {
        let actual: Vec<&str> = unlocked.iter().map(|u| u.rule.id.as_str()).collect();
        assert_eq!(actual, expected, "Unexpected unlocked rules");
    }
}
