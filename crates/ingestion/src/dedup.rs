//! Merging record batches into a store without duplicating keys.
//!
//! A batch is collapsed on its uniqueness key, checked against the store in
//! one query, then written in one transaction. Rows the store reports as
//! not written (another writer got there first) count as skipped.

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use storage::{ForecastRecord, ForecastStore, RecordKey, StorageError, StorageResult, WriteMode};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What to do with records whose key is already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MergePolicy {
    /// Keep the stored row
    #[default]
    RejectDuplicates,
    /// Overwrite the stored value
    ReplaceOnConflict,
}

impl MergePolicy {
    fn write_mode(self) -> WriteMode {
        match self {
            MergePolicy::RejectDuplicates => WriteMode::InsertIgnore,
            MergePolicy::ReplaceOnConflict => WriteMode::Upsert,
        }
    }
}

/// Counts for one merged batch.
///
/// `inserted` and `replaced` follow the existence check made before the
/// write. Under [`MergePolicy::ReplaceOnConflict`] a key that another writer
/// inserts between that check and the upsert is overwritten but still
/// counted as inserted, since an upsert reports one affected row either way.
/// `committed()` is exact in both cases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub inserted: u64,
    pub skipped: u64,
    pub replaced: u64,
    /// Records dropped because an earlier record in the batch had the same key
    pub batch_duplicates: u64,
}

impl MergeOutcome {
    /// Rows added or changed by this batch.
    pub fn committed(&self) -> u64 {
        self.inserted + self.replaced
    }
}

/// A batch that was not committed. Nothing from it reached the store.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Storage error, {uncommitted} records not committed: {source}")]
    Storage {
        #[source]
        source: StorageError,
        uncommitted: u64,
    },

    #[error("Storage call timed out after {after:?}, {uncommitted} records not committed")]
    Timeout { after: Duration, uncommitted: u64 },

    #[error("Merge cancelled, {uncommitted} records not committed")]
    Cancelled { uncommitted: u64 },
}

impl MergeError {
    /// Always zero: a failed batch is rolled back as a whole.
    pub fn committed(&self) -> u64 {
        0
    }

    pub fn uncommitted(&self) -> u64 {
        match self {
            MergeError::Storage { uncommitted, .. }
            | MergeError::Timeout { uncommitted, .. }
            | MergeError::Cancelled { uncommitted } => *uncommitted,
        }
    }
}

/// Applies a [`MergePolicy`] to record batches.
#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    policy: MergePolicy,
    dry_run: bool,
    timeout: Option<Duration>,
}

impl Deduplicator {
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            policy,
            dry_run: false,
            timeout: None,
        }
    }

    /// Check existence only; never write.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Bound every storage call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub async fn merge(
        &self,
        records: Vec<ForecastRecord>,
        store: &dyn ForecastStore,
        cancel: &CancellationToken,
    ) -> Result<MergeOutcome, MergeError> {
        let batch_size = records.len() as u64;
        if cancel.is_cancelled() {
            return Err(MergeError::Cancelled {
                uncommitted: batch_size,
            });
        }
        if records.is_empty() {
            return Ok(MergeOutcome::default());
        }

        let (unique, batch_duplicates) = collapse(records, self.policy);
        if batch_duplicates > 0 {
            debug!(duplicates = batch_duplicates, "Collapsed duplicate keys in batch");
        }

        let keys: Vec<RecordKey> = unique.iter().map(ForecastRecord::key).collect();
        let existing = self
            .guarded(cancel, batch_size, store.existing_keys(&keys))
            .await?;

        let conflicting = keys.iter().filter(|k| existing.contains(*k)).count() as u64;
        let new = unique.len() as u64 - conflicting;

        let mut outcome = MergeOutcome {
            batch_duplicates,
            ..Default::default()
        };

        if self.dry_run {
            outcome.inserted = new;
            match self.policy {
                MergePolicy::RejectDuplicates => outcome.skipped = conflicting,
                MergePolicy::ReplaceOnConflict => outcome.replaced = conflicting,
            }
            info!(
                inserted = outcome.inserted,
                skipped = outcome.skipped,
                replaced = outcome.replaced,
                "Dry run, nothing written"
            );
            return Ok(outcome);
        }

        let to_write: Vec<ForecastRecord> = match self.policy {
            MergePolicy::RejectDuplicates => unique
                .into_iter()
                .zip(&keys)
                .filter(|(_, key)| !existing.contains(*key))
                .map(|(record, _)| record)
                .collect(),
            MergePolicy::ReplaceOnConflict => unique,
        };
        let attempted = to_write.len() as u64;

        let written = self
            .guarded(
                cancel,
                batch_size,
                store.write(&to_write, self.policy.write_mode()),
            )
            .await?
            .min(attempted);
        let unwritten = attempted - written;
        if unwritten > 0 {
            warn!(
                unwritten,
                "Store skipped rows written concurrently by another writer"
            );
        }

        match self.policy {
            MergePolicy::RejectDuplicates => {
                outcome.inserted = written;
                outcome.skipped = conflicting + unwritten;
            }
            MergePolicy::ReplaceOnConflict => {
                // Split by the earlier existence check; see MergeOutcome
                outcome.inserted = new.saturating_sub(unwritten);
                outcome.replaced = conflicting.min(written);
                outcome.skipped = unwritten;
            }
        }

        info!(
            inserted = outcome.inserted,
            skipped = outcome.skipped,
            replaced = outcome.replaced,
            "Merged batch"
        );
        Ok(outcome)
    }

    async fn guarded<T>(
        &self,
        cancel: &CancellationToken,
        uncommitted: u64,
        call: impl Future<Output = StorageResult<T>>,
    ) -> Result<T, MergeError> {
        let bounded = async {
            let result = match self.timeout {
                Some(after) => match tokio::time::timeout(after, call).await {
                    Ok(result) => result,
                    Err(_) => return Err(MergeError::Timeout { after, uncommitted }),
                },
                None => call.await,
            };
            result.map_err(|source| MergeError::Storage {
                source,
                uncommitted,
            })
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MergeError::Cancelled { uncommitted }),
            result = bounded => result,
        }
    }
}

/// Drop repeated keys. Reject keeps the first record of a key, replace the
/// last; either way the record takes the position of the key's first
/// occurrence.
fn collapse(records: Vec<ForecastRecord>, policy: MergePolicy) -> (Vec<ForecastRecord>, u64) {
    let mut positions: HashMap<RecordKey, usize> = HashMap::with_capacity(records.len());
    let mut unique: Vec<ForecastRecord> = Vec::with_capacity(records.len());
    let mut duplicates = 0u64;

    for record in records {
        let key = record.key();
        match positions.get(&key) {
            Some(&pos) => {
                duplicates += 1;
                if policy == MergePolicy::ReplaceOnConflict {
                    unique[pos] = record;
                }
            }
            None => {
                positions.insert(key, unique.len());
                unique.push(record);
            }
        }
    }
    (unique, duplicates)
}
