//! Crash-safe progress checkpoint
//!
//! The checkpoint is rewritten at every batch boundary, after the dedup index
//! has been persisted. It is the resume boundary: a checkpoint naming batch
//! `i` means every id in its `resolved_ids` was actually resolved.
//!
//! Other processes (status commands, dashboards) may read the file at any
//! time. Only the engine writes it.

use super::atomic::{read_json, write_json_atomic};
use super::StorageResult;
use crate::output::StatsSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Durable progress marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Index of the last batch whose results are fully persisted
    pub batch_index: usize,

    /// Ids resolved (done, or failed with no retry left) in that batch
    pub resolved_ids: Vec<String>,

    /// Counters of the run at the time of writing
    pub stats: StatsSnapshot,

    /// Identifier of the run that wrote this checkpoint
    #[serde(default)]
    pub run_id: String,

    /// True once the run drained normally; false while in progress or after
    /// a cancellation
    #[serde(default)]
    pub completed: bool,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Batch index a resumed run should continue numbering from
    pub fn resume_index(&self) -> usize {
        if self.completed {
            0
        } else {
            self.batch_index + 1
        }
    }
}

/// Single-writer checkpoint store
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    run_id: String,
    previous: Option<Checkpoint>,
    last_written: Option<Checkpoint>,
}

impl CheckpointStore {
    /// Opens the store at `path`, reading any existing checkpoint
    pub fn open(path: impl Into<PathBuf>, run_id: impl Into<String>) -> StorageResult<Self> {
        let path = path.into();
        let previous = Self::read(&path)?;
        Ok(Self {
            path,
            run_id: run_id.into(),
            previous,
            last_written: None,
        })
    }

    /// Reads a checkpoint file without opening a store
    ///
    /// Returns `Ok(None)` if no checkpoint exists (cold start).
    pub fn read(path: &Path) -> StorageResult<Option<Checkpoint>> {
        read_json(path)
    }

    /// Re-reads the checkpoint currently on disk
    pub fn load(&self) -> StorageResult<Option<Checkpoint>> {
        Self::read(&self.path)
    }

    /// The checkpoint that existed when the store was opened
    pub fn previous(&self) -> Option<&Checkpoint> {
        self.previous.as_ref()
    }

    /// The most recent checkpoint written by this store
    pub fn last_written(&self) -> Option<&Checkpoint> {
        self.last_written.as_ref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records the completion of a batch
    pub fn record(
        &mut self,
        batch_index: usize,
        resolved_ids: Vec<String>,
        stats: StatsSnapshot,
    ) -> StorageResult<()> {
        let checkpoint = Checkpoint {
            batch_index,
            resolved_ids,
            stats,
            run_id: self.run_id.clone(),
            completed: false,
            updated_at: Utc::now(),
        };
        self.write(checkpoint)
    }

    /// Marks the run as fully drained
    ///
    /// Keeps the last batch's index and resolved ids; if this run wrote no
    /// batch at all, the previous checkpoint's index is carried forward.
    pub fn mark_completed(&mut self, stats: StatsSnapshot) -> StorageResult<()> {
        let (batch_index, resolved_ids) = match (&self.last_written, &self.previous) {
            (Some(last), _) => (last.batch_index, last.resolved_ids.clone()),
            (None, Some(previous)) => (previous.batch_index, Vec::new()),
            (None, None) => (0, Vec::new()),
        };

        let checkpoint = Checkpoint {
            batch_index,
            resolved_ids,
            stats,
            run_id: self.run_id.clone(),
            completed: true,
            updated_at: Utc::now(),
        };
        self.write(checkpoint)
    }

    fn write(&mut self, checkpoint: Checkpoint) -> StorageResult<()> {
        write_json_atomic(&self.path, &checkpoint).map_err(|e| {
            tracing::error!(
                "Failed to write checkpoint for batch {}: {}",
                checkpoint.batch_index,
                e
            );
            e
        })?;
        tracing::debug!(
            "Checkpoint written: batch {} ({} resolved, completed={})",
            checkpoint.batch_index,
            checkpoint.resolved_ids.len(),
            checkpoint.completed
        );
        self.last_written = Some(checkpoint);
        Ok(())
    }
}
