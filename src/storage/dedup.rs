//! Cross-run dedup index
//!
//! Maps a stable item id to whether it has already been resolved. The index
//! is loaded once at startup and persisted after every batch, so a crash
//! costs at most one batch of re-work.
//!
//! Done is monotonic: once an id is marked done, later `mark_done` or
//! `mark_failed` calls for it are silent no-ops.

use super::atomic::{read_json, write_json_atomic};
use super::StorageResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Persisted resolution state of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    Done,
    Failed,
}

/// One entry of the dedup index file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupRecord {
    pub state: RecordState,

    /// Number of attempts recorded for this id, across runs
    pub attempts: u32,

    /// When the record last changed
    pub ts: DateTime<Utc>,

    /// Reason of the most recent failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// False if the last failure was permanent; such ids are skipped on later
    /// runs unless reprocessing is forced
    #[serde(default = "default_retryable", skip_serializing_if = "is_retryable")]
    pub retryable: bool,
}

fn default_retryable() -> bool {
    true
}

fn is_retryable(retryable: &bool) -> bool {
    *retryable
}

/// In-memory dedup index guarded by a single mutex
///
/// The lock is only held for map bookkeeping; serialization to disk happens on
/// a snapshot after the lock is released.
#[derive(Debug, Default)]
pub struct DedupIndex {
    records: Mutex<BTreeMap<String, DedupRecord>>,
}

impl DedupIndex {
    /// Creates an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads an index from disk
    ///
    /// A missing file yields an empty index; a corrupt file is an error.
    pub fn load(path: &Path) -> StorageResult<Self> {
        let records: BTreeMap<String, DedupRecord> = read_json(path)?.unwrap_or_default();
        tracing::debug!(
            "Loaded dedup index with {} records from {}",
            records.len(),
            path.display()
        );
        Ok(Self {
            records: Mutex::new(records),
        })
    }

    /// Atomically writes the index to disk
    pub fn persist(&self, path: &Path) -> StorageResult<()> {
        let snapshot = self.lock().clone();
        write_json_atomic(path, &snapshot)?;
        tracing::trace!(
            "Persisted {} dedup records to {}",
            snapshot.len(),
            path.display()
        );
        Ok(())
    }

    /// Returns true if `id` has been processed successfully
    pub fn is_done(&self, id: &str) -> bool {
        self.lock()
            .get(id)
            .map_or(false, |r| r.state == RecordState::Done)
    }

    /// Returns true if `id` failed with a non-retryable error
    pub fn is_permanently_failed(&self, id: &str) -> bool {
        self.lock()
            .get(id)
            .map_or(false, |r| r.state == RecordState::Failed && !r.retryable)
    }

    /// Returns a copy of the record for `id`
    pub fn record(&self, id: &str) -> Option<DedupRecord> {
        self.lock().get(id).cloned()
    }

    /// Marks `id` as done
    ///
    /// Returns false (and changes nothing) if it was already done.
    pub fn mark_done(&self, id: &str) -> bool {
        let mut records = self.lock();
        match records.get_mut(id) {
            Some(record) if record.state == RecordState::Done => false,
            Some(record) => {
                record.state = RecordState::Done;
                record.attempts += 1;
                record.ts = Utc::now();
                record.reason = None;
                record.retryable = true;
                true
            }
            None => {
                records.insert(
                    id.to_string(),
                    DedupRecord {
                        state: RecordState::Done,
                        attempts: 1,
                        ts: Utc::now(),
                        reason: None,
                        retryable: true,
                    },
                );
                true
            }
        }
    }

    /// Records a failed attempt for `id`
    ///
    /// Returns false (and changes nothing) if the id is already done.
    pub fn mark_failed(&self, id: &str, reason: &str, retryable: bool) -> bool {
        let mut records = self.lock();
        let record = records
            .entry(id.to_string())
            .or_insert_with(|| DedupRecord {
                state: RecordState::Failed,
                attempts: 0,
                ts: Utc::now(),
                reason: None,
                retryable,
            });

        if record.state == RecordState::Done {
            return false;
        }

        record.attempts += 1;
        record.ts = Utc::now();
        record.reason = Some(reason.to_string());
        record.retryable = retryable;
        true
    }

    /// Number of ids in the index
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns (done, failed) counts
    pub fn counts(&self) -> (usize, usize) {
        let records = self.lock();
        let done = records
            .values()
            .filter(|r| r.state == RecordState::Done)
            .count();
        (done, records.len() - done)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, DedupRecord>> {
        // The map is always left consistent between statements, so a panic in
        // another holder does not invalidate it.
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
