//! Bloom Core - Data Types
//!
//! Subject snapshots, achievement rules, errors and configuration shared by
//! every other bloom crate. No I/O happens here.

pub mod config;
pub mod error;
pub mod rule;
pub mod subject;

pub use config::{CatalogVersion, EngineConfig, KeyFormat};
pub use error::{
    BloomError, BloomResult, CatalogError, ConfigError, StorageError, ValidationError,
};
pub use rule::{Condition, Metric, Rule, RuleId};
pub use subject::{
    AggregateSnapshot, GroupSnapshot, HighScoreThresholds, IndividualSnapshot, SubjectKind,
    SubjectSnapshot,
};
