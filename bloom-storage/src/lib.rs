//! Bloom Storage - Unlock Ledger
//!
//! The ledger is the only shared mutable state in bloom: a durable set of
//! composite keys, one per (subject, rule) pair that has already produced a
//! notification. Keys are only ever added.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bloom_core::{BloomError, BloomResult, EngineConfig, KeyFormat};

mod key;
mod lmdb_ledger;

pub use key::LedgerKey;
pub use lmdb_ledger::{LedgerStats, LmdbLedger, LmdbLedgerError};

// ============================================================================
// LEDGER PORT
// ============================================================================

/// Persistence port for unlock records.
///
/// Implementations must make [`record_unlock`](UnlockLedger::record_unlock) an
/// atomic check-and-set: of any number of concurrent calls for the same key,
/// exactly one returns `true`.
///
/// No removal operation exists; unlocks are permanent.
#[async_trait]
pub trait UnlockLedger: Send + Sync {
    /// Serialization used for stored keys.
    fn key_format(&self) -> KeyFormat;

    async fn has_unlocked(&self, key: &LedgerKey) -> BloomResult<bool>;

    /// Record `key`, returning `true` only if it was not present before.
    async fn record_unlock(&self, key: &LedgerKey) -> BloomResult<bool>;

    /// Presence of each key, in input order.
    async fn unlocked_among(&self, keys: &[LedgerKey]) -> BloomResult<Vec<bool>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.has_unlocked(key).await?);
        }
        Ok(out)
    }

    /// Number of recorded keys.
    async fn len(&self) -> BloomResult<u64>;
}

// ============================================================================
// IN-MEMORY LEDGER
// ============================================================================

/// Non-durable ledger for tests and development.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    keys: Arc<RwLock<HashSet<String>>>,
    format: KeyFormat,
}

impl InMemoryLedger {
    pub fn new(format: KeyFormat) -> Self {
        Self {
            keys: Arc::new(RwLock::new(HashSet::new())),
            format,
        }
    }

    /// All stored keys, sorted.
    pub fn encoded_keys(&self) -> BloomResult<Vec<String>> {
        let keys = self.keys.read().map_err(|_| lock_poisoned())?;
        let mut out: Vec<String> = keys.iter().cloned().collect();
        out.sort();
        Ok(out)
    }
}

fn lock_poisoned() -> BloomError {
    BloomError::store_unavailable("in-memory ledger lock poisoned")
}

#[async_trait]
impl UnlockLedger for InMemoryLedger {
    fn key_format(&self) -> KeyFormat {
        self.format
    }

    async fn has_unlocked(&self, key: &LedgerKey) -> BloomResult<bool> {
        let keys = self.keys.read().map_err(|_| lock_poisoned())?;
        Ok(keys.contains(&key.encode(self.format)))
    }

    async fn record_unlock(&self, key: &LedgerKey) -> BloomResult<bool> {
        let encoded = key.encode(self.format);
        let mut keys = self.keys.write().map_err(|_| lock_poisoned())?;
        Ok(keys.insert(encoded))
    }

    async fn unlocked_among(&self, keys: &[LedgerKey]) -> BloomResult<Vec<bool>> {
        let stored = self.keys.read().map_err(|_| lock_poisoned())?;
        Ok(keys
            .iter()
            .map(|k| stored.contains(&k.encode(self.format)))
            .collect())
    }

    async fn len(&self) -> BloomResult<u64> {
        let keys = self.keys.read().map_err(|_| lock_poisoned())?;
        Ok(keys.len() as u64)
    }
}

// ============================================================================
// FACTORY
// ============================================================================

/// Open the ledger described by `config`: LMDB when `ledger_path` is set,
/// otherwise in memory.
pub fn open_ledger(config: &EngineConfig) -> BloomResult<Arc<dyn UnlockLedger>> {
    match &config.ledger_path {
        Some(path) => {
            let ledger = LmdbLedger::open(path, config.ledger_max_size_mb, config.key_format)?;
            Ok(Arc::new(ledger))
        }
        None => {
            tracing::info!(format = ?config.key_format, "Using in-memory unlock ledger");
            Ok(Arc::new(InMemoryLedger::new(config.key_format)))
        }
    }
}
