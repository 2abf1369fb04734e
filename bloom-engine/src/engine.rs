//! Achievement orchestration: evaluate, dedupe against the ledger, report.

use std::sync::Arc;

use bloom_catalog::Catalog;
use bloom_core::{
    AggregateSnapshot, BloomError, BloomResult, EngineConfig, GroupSnapshot, HighScoreThresholds,
    IndividualSnapshot, Rule, SubjectKind, SubjectSnapshot, ValidationError,
};
use bloom_storage::{open_ledger, LedgerKey, UnlockLedger};
use futures_util::stream::{self, StreamExt};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::evaluator::ConditionEvaluator;

// ============================================================================
// RESULT TYPES
// ============================================================================

/// A rule unlocked for the first time, with the subject state that earned it.
#[derive(Debug, Clone, PartialEq)]
pub struct Unlocked {
    pub rule: Rule,
    pub subject: SubjectSnapshot,
}

impl Unlocked {
    pub fn kind(&self) -> SubjectKind {
        self.subject.kind()
    }

    pub fn subject_id(&self) -> &str {
        self.subject.subject_id()
    }
}

/// Subject state carried by a [`CheckRequest`].
#[derive(Debug, Clone)]
pub enum CheckPayload {
    Snapshot(SubjectSnapshot),
    /// An unparsed row from the data layer.
    Raw(JsonValue),
}

/// One subject to check as part of a batch.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub kind: SubjectKind,
    pub subject_id: String,
    pub payload: CheckPayload,
}

impl CheckRequest {
    pub fn snapshot(snapshot: impl Into<SubjectSnapshot>) -> Self {
        let snapshot = snapshot.into();
        Self {
            kind: snapshot.kind(),
            subject_id: snapshot.subject_id().to_string(),
            payload: CheckPayload::Snapshot(snapshot),
        }
    }

    pub fn raw(kind: SubjectKind, subject_id: impl Into<String>, value: JsonValue) -> Self {
        Self {
            kind,
            subject_id: subject_id.into(),
            payload: CheckPayload::Raw(value),
        }
    }
}

/// A check that stopped early.
///
/// `unlocked` holds the rules recorded before the failure. They are in the
/// ledger, so a retry will not report them again.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialCheck {
    pub unlocked: Vec<Unlocked>,
    pub error: BloomError,
}

impl From<BloomError> for PartialCheck {
    fn from(error: BloomError) -> Self {
        Self {
            unlocked: Vec::new(),
            error,
        }
    }
}

/// A subject whose check failed inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub kind: SubjectKind,
    pub subject_id: String,
    pub error: BloomError,
}

/// Outcome of [`AchievementEngine::check_batch`].
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// New unlocks, grouped by request in request order, catalog order within.
    /// Includes unlocks recorded by a check that failed partway.
    pub unlocked: Vec<Unlocked>,
    /// Subjects whose check completed.
    pub checked: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn unlocked_count(&self) -> usize {
        self.unlocked.len()
    }

    /// New unlocks for one subject.
    pub fn for_subject<'a>(
        &'a self,
        kind: SubjectKind,
        subject_id: &'a str,
    ) -> impl Iterator<Item = &'a Unlocked> + 'a {
        self.unlocked
            .iter()
            .filter(move |u| u.kind() == kind && u.subject_id() == subject_id)
    }

    /// True when every subject was checked.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures worth retrying later.
    pub fn retryable(&self) -> impl Iterator<Item = &BatchFailure> {
        self.failures.iter().filter(|f| f.error.is_retryable())
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Evaluates subjects against the catalog and records first-time unlocks.
///
/// Cheap to clone; clones share the catalog and ledger.
#[derive(Clone)]
pub struct AchievementEngine {
    evaluator: ConditionEvaluator,
    ledger: Arc<dyn UnlockLedger>,
    thresholds: HighScoreThresholds,
    batch_concurrency: usize,
}

impl AchievementEngine {
    pub fn new(catalog: Arc<Catalog>, ledger: Arc<dyn UnlockLedger>) -> Self {
        Self {
            evaluator: ConditionEvaluator::new(catalog),
            ledger,
            thresholds: HighScoreThresholds::default(),
            batch_concurrency: EngineConfig::default().batch_concurrency,
        }
    }

    /// Build the catalog and ledger described by `config`.
    pub fn from_config(config: &EngineConfig) -> BloomResult<Self> {
        config.validate()?;
        let catalog = Catalog::builtin(config.catalog_version)?;
        let ledger = open_ledger(config)?;

        info!(
            catalog_version = config.catalog_version.as_u8(),
            rules = catalog.len(),
            key_format = ?config.key_format,
            durable = config.ledger_path.is_some(),
            "Achievement engine ready"
        );

        Ok(Self::new(catalog, ledger)
            .with_thresholds(config.high_score_thresholds())
            .with_batch_concurrency(config.batch_concurrency))
    }

    pub fn with_thresholds(mut self, thresholds: HighScoreThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Zero is treated as one.
    pub fn with_batch_concurrency(mut self, batch_concurrency: usize) -> Self {
        self.batch_concurrency = batch_concurrency.max(1);
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        self.evaluator.catalog()
    }

    pub fn evaluator(&self) -> &ConditionEvaluator {
        &self.evaluator
    }

    pub fn ledger(&self) -> &Arc<dyn UnlockLedger> {
        &self.ledger
    }

    pub fn thresholds(&self) -> HighScoreThresholds {
        self.thresholds
    }

    pub fn batch_concurrency(&self) -> usize {
        self.batch_concurrency
    }

    /// Evaluate `snapshot` and record every held rule not yet in the ledger.
    ///
    /// Returns the newly unlocked rules in catalog order. A rule already in
    /// the ledger is never returned again, even if it stopped holding and
    /// started holding again in between.
    ///
    /// # Errors
    ///
    /// - `MalformedSubjectState` if the snapshot does not belong to
    ///   `(kind, subject_id)` or fails validation. Nothing is recorded.
    /// - `StoreUnavailable` if the ledger fails. Rules recorded before the
    ///   failure stay recorded and are not reported again on retry;
    ///   [`try_check_and_notify`](Self::try_check_and_notify) returns them.
    pub async fn check_and_notify(
        &self,
        kind: SubjectKind,
        subject_id: &str,
        snapshot: &SubjectSnapshot,
    ) -> BloomResult<Vec<Unlocked>> {
        self.try_check_and_notify(kind, subject_id, snapshot)
            .await
            .map_err(|partial| partial.error)
    }

    /// Like [`check_and_notify`](Self::check_and_notify), but a ledger
    /// failure partway through still hands back the unlocks recorded
    /// before it.
    pub async fn try_check_and_notify(
        &self,
        kind: SubjectKind,
        subject_id: &str,
        snapshot: &SubjectSnapshot,
    ) -> Result<Vec<Unlocked>, PartialCheck> {
        ensure_matches(kind, subject_id, snapshot).map_err(BloomError::from)?;
        snapshot.validate().map_err(BloomError::from)?;

        let held = self.evaluator.evaluate(snapshot);
        debug!(%kind, subject_id, held = held.len(), "Evaluated achievement rules");

        if held.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<LedgerKey> = held
            .iter()
            .map(|rule| LedgerKey::new(kind, subject_id, rule))
            .collect();

        let present = self
            .ledger
            .unlocked_among(&keys)
            .await
            .inspect_err(|e| warn!(%kind, subject_id, error = %e, "Achievement check deferred"))?;

        let mut unlocked = Vec::new();
        for ((rule, key), already) in held.iter().zip(&keys).zip(present) {
            if already {
                continue;
            }

            match self.ledger.record_unlock(key).await {
                Ok(true) => {
                    info!(%kind, subject_id, rule_id = %rule.id, name = %rule.name, "Achievement unlocked");
                    unlocked.push(Unlocked {
                        rule: (*rule).clone(),
                        subject: snapshot.clone(),
                    });
                }
                // Lost a race with a concurrent check for the same subject.
                Ok(false) => {
                    debug!(%kind, subject_id, rule_id = %rule.id, "Unlock recorded concurrently");
                }
                Err(e) => {
                    warn!(
                        %kind,
                        subject_id,
                        rule_id = %rule.id,
                        recorded = unlocked.len(),
                        error = %e,
                        "Achievement check deferred"
                    );
                    return Err(PartialCheck { unlocked, error: e });
                }
            }
        }

        Ok(unlocked)
    }

    /// Parse a raw data-layer row, then check it.
    pub async fn check_raw(
        &self,
        kind: SubjectKind,
        subject_id: &str,
        value: &JsonValue,
    ) -> BloomResult<Vec<Unlocked>> {
        let snapshot = SubjectSnapshot::from_json(kind, subject_id, value)?;
        self.check_and_notify(kind, subject_id, &snapshot).await
    }

    /// Check many subjects concurrently.
    ///
    /// At most `batch_concurrency` checks run at once. A failing subject is
    /// logged and reported in [`BatchReport::failures`]; it never stops the
    /// others.
    pub async fn check_batch(&self, requests: Vec<CheckRequest>) -> BatchReport {
        let outcomes: Vec<_> = stream::iter(requests)
            .map(|request| async move {
                let result = match &request.payload {
                    CheckPayload::Snapshot(snapshot) => {
                        self.try_check_and_notify(request.kind, &request.subject_id, snapshot)
                            .await
                    }
                    CheckPayload::Raw(value) => {
                        match SubjectSnapshot::from_json(request.kind, &request.subject_id, value) {
                            Ok(snapshot) => {
                                self.try_check_and_notify(
                                    request.kind,
                                    &request.subject_id,
                                    &snapshot,
                                )
                                .await
                            }
                            Err(e) => Err(PartialCheck::from(BloomError::from(e))),
                        }
                    }
                };
                (request, result)
            })
            .buffered(self.batch_concurrency)
            .collect()
            .await;

        let mut report = BatchReport::default();
        for (request, result) in outcomes {
            match result {
                Ok(unlocked) => {
                    report.checked += 1;
                    report.unlocked.extend(unlocked);
                }
                Err(PartialCheck { unlocked, error }) => {
                    warn!(
                        kind = %request.kind,
                        subject_id = %request.subject_id,
                        recorded = unlocked.len(),
                        error = %error,
                        "Batch achievement check failed for subject"
                    );
                    report.unlocked.extend(unlocked);
                    report.failures.push(BatchFailure {
                        kind: request.kind,
                        subject_id: request.subject_id,
                        error,
                    });
                }
            }
        }

        debug!(
            checked = report.checked,
            failed = report.failures.len(),
            unlocked = report.unlocked.len(),
            "Batch achievement check finished"
        );

        report
    }

    /// Recompute class statistics from the roster and check them.
    pub async fn check_scope(
        &self,
        scope_id: &str,
        individuals: &[IndividualSnapshot],
        groups: &[GroupSnapshot],
    ) -> BloomResult<Vec<Unlocked>> {
        let stats = AggregateSnapshot::from_roster(scope_id, individuals, groups, self.thresholds);
        self.check_and_notify(SubjectKind::Aggregate, scope_id, &stats.into())
            .await
    }
}

/// Reject a snapshot passed under the wrong `(kind, subject_id)`.
pub(crate) fn ensure_matches(
    kind: SubjectKind,
    subject_id: &str,
    snapshot: &SubjectSnapshot,
) -> Result<(), ValidationError> {
    let reason = if snapshot.kind() != kind {
        format!("snapshot is a {} subject", snapshot.kind())
    } else if snapshot.subject_id() != subject_id {
        format!("snapshot belongs to subject {}", snapshot.subject_id())
    } else {
        return Ok(());
    };

    Err(ValidationError::MalformedSubjectState {
        kind,
        subject_id: subject_id.to_string(),
        reason,
    })
}
