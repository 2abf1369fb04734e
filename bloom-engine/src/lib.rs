//! Bloom Engine - Achievement Evaluation
//!
//! On every score change the caller hands the engine a subject snapshot. The
//! engine evaluates every catalog rule for that subject's kind, records the
//! ones that hold and are not yet in the unlock ledger, and returns them in
//! catalog order. Turning unlocks into notifications is a separate step
//! ([`NotificationHub::dispatch`]).
//!
//! ```ignore
//! let engine = AchievementEngine::from_config(&EngineConfig::from_env())?;
//! let hub = NotificationHub::new(256);
//!
//! let snapshot = IndividualSnapshot::new("12", "小明", 5).into();
//! let unlocked = engine
//!     .check_and_notify(SubjectKind::Individual, "12", &snapshot)
//!     .await?;
//! hub.dispatch(engine.catalog(), &unlocked);
//! ```

pub mod engine;
pub mod evaluator;
pub mod migrate;
pub mod notify;
pub mod progress;
pub mod telemetry;

pub use engine::{
    AchievementEngine, BatchFailure, BatchReport, CheckPayload, CheckRequest, PartialCheck,
    Unlocked,
};
pub use evaluator::ConditionEvaluator;
pub use migrate::{import_legacy, parse_ledger_entry, parse_legacy_key, MigrationReport};
pub use notify::{AchievementNotification, NotificationHub};
pub use progress::{ProgressGroup, ProgressItem, ProgressView, LOCKED_ICON};
pub use telemetry::{init_tracing, LogFormat, TracingConfig};

pub use bloom_catalog::Catalog;
pub use bloom_core::{
    AggregateSnapshot, BloomError, BloomResult, CatalogVersion, EngineConfig, GroupSnapshot,
    IndividualSnapshot, KeyFormat, SubjectKind, SubjectSnapshot,
};
pub use bloom_storage::{open_ledger, InMemoryLedger, LedgerKey, LmdbLedger, UnlockLedger};
