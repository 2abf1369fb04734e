//! LMDB-backed unlock ledger.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a durable, memory-mapped
//! set of unlock keys. Every key maps to a one-byte presence marker.
//!
//! # Atomicity
//!
//! LMDB allows one write transaction at a time per environment, across
//! threads and processes. `record_unlock` performs its existence check and
//! insert inside the same write transaction, so two racing callers for the
//! same key cannot both observe "absent".

use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bloom_core::{BloomError, BloomResult, KeyFormat};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use crate::key::LedgerKey;
use crate::UnlockLedger;

/// Stored value for every unlocked key.
const PRESENT: &[u8] = &[1];

/// Error type for LMDB ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbLedgerError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Every LMDB failure is an unavailable store from the engine's point of view.
impl From<LmdbLedgerError> for BloomError {
    fn from(e: LmdbLedgerError) -> Self {
        BloomError::store_unavailable(e.to_string())
    }
}

/// Counters for ledger traffic since open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStats {
    /// Lookups and record attempts that found the key present.
    pub hits: u64,
    /// Lookups that found the key absent.
    pub misses: u64,
    /// Keys written for the first time.
    pub inserts: u64,
}

/// Durable unlock ledger.
pub struct LmdbLedger {
    env: Env,
    db: Database<Bytes, Bytes>,
    format: KeyFormat,
    stats: Arc<RwLock<LedgerStats>>,
}

impl LmdbLedger {
    /// Open (or create) a ledger in `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment or database cannot be opened.
    pub fn open<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        format: KeyFormat,
    ) -> Result<Self, LmdbLedgerError> {
        let map_size = max_size_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| {
                LmdbLedgerError::EnvOpen(format!("map size of {} MiB overflows", max_size_mb))
            })?;

        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process and
        // the files are not truncated or modified by anything else.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbLedgerError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbLedgerError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbLedgerError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbLedgerError::Transaction(e.to_string()))?;

        tracing::info!(
            path = %path.as_ref().display(),
            max_size_mb,
            ?format,
            "Opened LMDB unlock ledger"
        );

        Ok(Self {
            env,
            db,
            format,
            stats: Arc::new(RwLock::new(LedgerStats::default())),
        })
    }

    pub fn stats(&self) -> LedgerStats {
        self.stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn record_stat(&self, update: impl FnOnce(&mut LedgerStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }

    /// Whether a raw encoded key is present. Used by migration checks.
    pub fn contains_encoded(&self, encoded: &str) -> BloomResult<bool> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbLedgerError::Transaction(e.to_string()))?;

        let present = self
            .db
            .get(&rtxn, encoded.as_bytes())
            .map_err(|e| LmdbLedgerError::Transaction(e.to_string()))?
            .is_some();

        Ok(present)
    }
}

#[async_trait]
impl UnlockLedger for LmdbLedger {
    fn key_format(&self) -> KeyFormat {
        self.format
    }

    async fn has_unlocked(&self, key: &LedgerKey) -> BloomResult<bool> {
        let present = self.contains_encoded(&key.encode(self.format))?;
        if present {
            self.record_stat(|s| s.hits += 1);
        } else {
            self.record_stat(|s| s.misses += 1);
        }
        Ok(present)
    }

    async fn record_unlock(&self, key: &LedgerKey) -> BloomResult<bool> {
        let encoded = key.encode(self.format);

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbLedgerError::Transaction(e.to_string()))?;

        let exists = self
            .db
            .get(&wtxn, encoded.as_bytes())
            .map_err(|e| LmdbLedgerError::Transaction(e.to_string()))?
            .is_some();

        if exists {
            // Dropping the transaction aborts it.
            drop(wtxn);
            self.record_stat(|s| s.hits += 1);
            tracing::debug!(key = %encoded, "Unlock already recorded");
            return Ok(false);
        }

        self.db
            .put(&mut wtxn, encoded.as_bytes(), PRESENT)
            .map_err(|e| LmdbLedgerError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbLedgerError::Transaction(e.to_string()))?;

        self.record_stat(|s| s.inserts += 1);
        Ok(true)
    }

    async fn len(&self) -> BloomResult<u64> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbLedgerError::Transaction(e.to_string()))?;

        let len = self
            .db
            .len(&rtxn)
            .map_err(|e| LmdbLedgerError::Transaction(e.to_string()))?;

        Ok(len)
    }
}
