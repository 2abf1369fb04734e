//! Error types for bloom operations

use crate::{Metric, SubjectKind};
use thiserror::Error;

/// Unlock ledger errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// The backing store could not be read or written. Callers treat the
    /// check as deferred; a retry re-checks the ledger first.
    #[error("Unlock store unavailable: {reason}")]
    StoreUnavailable { reason: String },
}

/// Validation errors for subject input and parsed values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Malformed {kind} subject state for {subject_id}: {reason}")]
    MalformedSubjectState {
        kind: SubjectKind,
        subject_id: String,
        reason: String,
    },

    #[error("Unknown subject kind: {value}")]
    UnknownSubjectKind { value: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Rule catalog errors, raised while loading a catalog table.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Failed to parse catalog: {reason}")]
    Parse { reason: String },

    #[error("Unsupported catalog version: {version}")]
    UnsupportedVersion { version: u8 },

    #[error("Duplicate rule id: {id}")]
    DuplicateRuleId { id: String },

    #[error("Duplicate rule identity in {kind} catalog: {category}/{name}")]
    DuplicateIdentity {
        kind: SubjectKind,
        category: String,
        name: String,
    },

    #[error("Rule {id} uses metric {metric:?}, which does not apply to {kind} subjects")]
    MetricNotApplicable {
        id: String,
        kind: SubjectKind,
        metric: Metric,
    },

    #[error("Rule {id} has an empty condition group")]
    EmptyCondition { id: String },

    #[error("Rule {id} has an invalid threshold: {reason}")]
    InvalidThreshold { id: String, reason: String },

    #[error("Catalog has no rules for {kind} subjects")]
    EmptyKind { kind: SubjectKind },

    #[error("Category {category} has no display label")]
    MissingCategoryLabel { category: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Telemetry initialization failed: {reason}")]
    TelemetryInit { reason: String },
}

/// Master error type for all bloom errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BloomError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl BloomError {
    /// Shorthand for a `StoreUnavailable` storage error.
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        BloomError::Storage(StorageError::StoreUnavailable {
            reason: reason.into(),
        })
    }

    /// Whether retrying the same operation later can succeed.
    ///
    /// Only store outages qualify. Malformed input and catalog problems fail
    /// the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BloomError::Storage(StorageError::StoreUnavailable { .. }))
    }
}

/// Result type alias for bloom operations.
pub type BloomResult<T> = Result<T, BloomError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_store_unavailable() {
        let err = StorageError::StoreUnavailable {
            reason: "disk full".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Unlock store unavailable"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_validation_error_display_malformed_subject() {
        let err = ValidationError::MalformedSubjectState {
            kind: SubjectKind::Individual,
            subject_id: "42".to_string(),
            reason: "missing field score".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("individual"));
        assert!(msg.contains("42"));
        assert!(msg.contains("missing field score"));
    }

    #[test]
    fn test_catalog_error_display_metric_not_applicable() {
        let err = CatalogError::MetricNotApplicable {
            id: "group.basic.first_point".to_string(),
            kind: SubjectKind::Group,
            metric: Metric::AverageScore,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("group.basic.first_point"));
        assert!(msg.contains("AverageScore"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "batch_concurrency".to_string(),
            value: "0".to_string(),
            reason: "must be greater than 0".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("batch_concurrency"));
        assert!(msg.contains("must be greater than 0"));
    }

    #[test]
    fn test_bloom_error_from_variants() {
        let storage = BloomError::from(StorageError::StoreUnavailable {
            reason: "offline".to_string(),
        });
        assert!(matches!(storage, BloomError::Storage(_)));

        let validation = BloomError::from(ValidationError::UnknownSubjectKind {
            value: "planet".to_string(),
        });
        assert!(matches!(validation, BloomError::Validation(_)));

        let catalog = BloomError::from(CatalogError::UnsupportedVersion { version: 9 });
        assert!(matches!(catalog, BloomError::Catalog(_)));

        let config = BloomError::from(ConfigError::TelemetryInit {
            reason: "already set".to_string(),
        });
        assert!(matches!(config, BloomError::Config(_)));
    }

    #[test]
    fn test_only_store_unavailable_is_retryable() {
        assert!(BloomError::store_unavailable("offline").is_retryable());

        let malformed = BloomError::from(ValidationError::MalformedSubjectState {
            kind: SubjectKind::Group,
            subject_id: "g1".to_string(),
            reason: "negative score".to_string(),
        });
        assert!(!malformed.is_retryable());
        assert!(!BloomError::from(CatalogError::UnsupportedVersion { version: 3 }).is_retryable());
    }
}
