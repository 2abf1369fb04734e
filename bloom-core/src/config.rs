//! Engine configuration

use crate::{BloomError, BloomResult, CatalogError, ConfigError, HighScoreThresholds, ValidationError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_HIGH_SCORE_INDIVIDUAL: u64 = 20;
const DEFAULT_HIGH_SCORE_GROUP: u64 = 100;
const DEFAULT_LEDGER_MAX_SIZE_MB: usize = 64;
const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;
const DEFAULT_BATCH_CONCURRENCY: usize = 16;
/// Largest LMDB map size accepted, in MiB (1 TiB).
const MAX_LEDGER_SIZE_MB: usize = 1024 * 1024;

// ============================================================================
// CATALOG VERSION / KEY FORMAT
// ============================================================================

/// Which generation of the built-in rule table to load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogVersion {
    /// The original 22/22/20 rule set.
    Classic,
    /// Classic plus every category added by the later rule table.
    #[default]
    Extended,
}

impl CatalogVersion {
    pub fn as_u8(self) -> u8 {
        match self {
            CatalogVersion::Classic => 1,
            CatalogVersion::Extended => 2,
        }
    }

    pub fn from_u8(version: u8) -> Result<Self, CatalogError> {
        match version {
            1 => Ok(CatalogVersion::Classic),
            2 => Ok(CatalogVersion::Extended),
            other => Err(CatalogError::UnsupportedVersion { version: other }),
        }
    }
}

/// How ledger keys are serialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyFormat {
    /// `{tag}_{subjectId}_{category}_{displayName}`, as held by existing ledgers.
    Legacy,
    /// Length-prefixed and keyed by the stable rule id.
    #[default]
    V2,
}

impl FromStr for KeyFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" | "v1" => Ok(KeyFormat::Legacy),
            "v2" => Ok(KeyFormat::V2),
            _ => Err(ValidationError::InvalidValue {
                field: "key_format".to_string(),
                reason: format!("unknown key format '{}'", s),
            }),
        }
    }
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

/// Settings for catalog selection, the unlock ledger and fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub catalog_version: CatalogVersion,
    pub key_format: KeyFormat,
    /// Individual score that counts toward `high_score_count`.
    pub high_score_individual: u64,
    /// Group score that counts toward `high_score_count`.
    pub high_score_group: u64,
    /// LMDB directory. `None` keeps the ledger in memory.
    pub ledger_path: Option<PathBuf>,
    pub ledger_max_size_mb: usize,
    /// Buffered notifications per subscriber before lagging.
    pub notification_capacity: usize,
    /// Maximum concurrent subject checks in a batch.
    pub batch_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            catalog_version: CatalogVersion::default(),
            key_format: KeyFormat::default(),
            high_score_individual: DEFAULT_HIGH_SCORE_INDIVIDUAL,
            high_score_group: DEFAULT_HIGH_SCORE_GROUP,
            ledger_path: None,
            ledger_max_size_mb: DEFAULT_LEDGER_MAX_SIZE_MB,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }
}

impl EngineConfig {
    /// Load from `BLOOM_*` environment variables.
    ///
    /// Unset or unparseable values fall back to defaults; `validate()`
    /// catches values that parse but are out of range.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let catalog_version = lookup("BLOOM_CATALOG_VERSION")
            .and_then(|s| s.trim().parse::<u8>().ok())
            .and_then(|v| CatalogVersion::from_u8(v).ok())
            .unwrap_or(defaults.catalog_version);

        let key_format = lookup("BLOOM_KEY_FORMAT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.key_format);

        let high_score_individual = lookup("BLOOM_HIGH_SCORE_INDIVIDUAL")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.high_score_individual);

        let high_score_group = lookup("BLOOM_HIGH_SCORE_GROUP")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.high_score_group);

        let ledger_path = lookup("BLOOM_LEDGER_PATH").map(PathBuf::from);

        let ledger_max_size_mb = lookup("BLOOM_LEDGER_MAX_SIZE_MB")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.ledger_max_size_mb);

        let notification_capacity = lookup("BLOOM_NOTIFICATION_CAPACITY")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.notification_capacity);

        let batch_concurrency = lookup("BLOOM_BATCH_CONCURRENCY")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.batch_concurrency);

        Self {
            catalog_version,
            key_format,
            high_score_individual,
            high_score_group,
            ledger_path,
            ledger_max_size_mb,
            notification_capacity,
            batch_concurrency,
        }
    }

    /// In-memory ledger and small buffers.
    pub fn development() -> Self {
        Self {
            ledger_path: None,
            notification_capacity: 32,
            batch_concurrency: 4,
            ..Self::default()
        }
    }

    /// Durable ledger under `ledger_path`.
    pub fn production(ledger_path: impl Into<PathBuf>) -> Self {
        Self {
            ledger_path: Some(ledger_path.into()),
            ledger_max_size_mb: 1024,
            notification_capacity: 1024,
            batch_concurrency: 64,
            ..Self::default()
        }
    }

    pub fn high_score_thresholds(&self) -> HighScoreThresholds {
        HighScoreThresholds {
            individual: self.high_score_individual,
            group: self.high_score_group,
        }
    }

    pub fn validate(&self) -> BloomResult<()> {
        fn invalid(field: &str, value: impl ToString, reason: &str) -> BloomError {
            BloomError::Config(ConfigError::InvalidValue {
                field: field.to_string(),
                value: value.to_string(),
                reason: reason.to_string(),
            })
        }

        if self.high_score_individual == 0 {
            return Err(invalid(
                "high_score_individual",
                self.high_score_individual,
                "high_score_individual must be greater than 0",
            ));
        }

        if self.high_score_group == 0 {
            return Err(invalid(
                "high_score_group",
                self.high_score_group,
                "high_score_group must be greater than 0",
            ));
        }

        if let Some(path) = &self.ledger_path {
            if path.as_os_str().is_empty() {
                return Err(invalid(
                    "ledger_path",
                    "",
                    "ledger_path must not be empty when set",
                ));
            }
        }

        if self.ledger_max_size_mb == 0 {
            return Err(invalid(
                "ledger_max_size_mb",
                self.ledger_max_size_mb,
                "ledger_max_size_mb must be greater than 0",
            ));
        }

        if self.ledger_max_size_mb > MAX_LEDGER_SIZE_MB {
            return Err(invalid(
                "ledger_max_size_mb",
                self.ledger_max_size_mb,
                "ledger_max_size_mb must be at most 1048576 (1 TiB)",
            ));
        }

        if self.notification_capacity == 0 {
            return Err(invalid(
                "notification_capacity",
                self.notification_capacity,
                "notification_capacity must be greater than 0",
            ));
        }

        if self.batch_concurrency == 0 {
            return Err(invalid(
                "batch_concurrency",
                self.batch_concurrency,
                "batch_concurrency must be greater than 0",
            ));
        }

        Ok(())
    }
}
