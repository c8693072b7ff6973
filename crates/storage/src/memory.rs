//! In-process forecast store.
//!
//! Useful for dry runs against a snapshot and for tests. Follows the same
//! contract as the SQLite store: one batched existence query, and each
//! write applied as a whole.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::record::{ForecastRecord, RecordKey};
use crate::store::{ForecastStore, WriteMode};

/// Call counters, for callers that need to assert batching behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    pub existence_queries: u64,
    pub writes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryForecastStore {
    rows: Arc<RwLock<HashMap<RecordKey, ForecastRecord>>>,
    stats: Arc<RwLock<MemoryStoreStats>>,
}

impl MemoryForecastStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    pub async fn get(&self, key: &RecordKey) -> Option<ForecastRecord> {
        self.rows.read().await.get(key).cloned()
    }

    pub async fn stats(&self) -> MemoryStoreStats {
        *self.stats.read().await
    }
}

#[async_trait]
impl ForecastStore for MemoryForecastStore {
    async fn existing_keys(&self, keys: &[RecordKey]) -> StorageResult<HashSet<RecordKey>> {
        self.stats.write().await.existence_queries += 1;
        let rows = self.rows.read().await;
        Ok(keys.iter().filter(|k| rows.contains_key(*k)).cloned().collect())
    }

    async fn write(&self, records: &[ForecastRecord], mode: WriteMode) -> StorageResult<u64> {
        self.stats.write().await.writes += 1;
        if let Some(bad) = records.iter().find(|r| r.value.is_nan()) {
            return Err(StorageError::InvalidRow(format!(
                "{} at ({}, {}) has no value",
                bad.variable, bad.latitude, bad.longitude
            )));
        }

        let mut rows = self.rows.write().await;
        let mut written = 0u64;
        for record in records {
            let key = record.key();
            match mode {
                WriteMode::InsertIgnore if rows.contains_key(&key) => {}
                _ => {
                    rows.insert(key, record.clone());
                    written += 1;
                }
            }
        }
        Ok(written)
    }
}
