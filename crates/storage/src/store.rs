//! Storage collaborator seen by the deduplicator.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::error::StorageResult;
use crate::record::{ForecastRecord, RecordKey};

/// How a write treats keys that already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Keep the stored row, drop the incoming one
    InsertIgnore,
    /// Overwrite value, run time and source of the stored row
    Upsert,
}

/// Persistent store of forecast records.
///
/// `write` must apply a whole batch in one transaction: either every row
/// is applied or none is. Callers pass batches without repeated keys.
#[async_trait]
pub trait ForecastStore: Send + Sync {
    /// The subset of `keys` already present, found with one batched query.
    async fn existing_keys(&self, keys: &[RecordKey]) -> StorageResult<HashSet<RecordKey>>;

    /// Write `records`, returning the number of rows inserted or updated.
    async fn write(&self, records: &[ForecastRecord], mode: WriteMode) -> StorageResult<u64>;
}
