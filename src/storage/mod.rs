//! Storage module for the engine's own state files
//!
//! This module owns everything the engine writes to its state directory:
//! - Atomic write-temp-then-rename helpers shared by all state files
//! - The dedup index (which item ids are already resolved, across runs)
//! - The checkpoint (progress marker rewritten at every batch boundary)
//!
//! Crawled content is not stored here; processors write their own output.

mod atomic;
mod checkpoint;
mod dedup;

pub use atomic::{read_json, temp_path_for, write_atomic, write_json_atomic};
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use dedup::{DedupIndex, DedupRecord, RecordState};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the checkpoint inside a state directory
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// File name of the dedup index inside a state directory
pub const DEDUP_FILE: &str = "dedup.json";

/// Errors that can occur while reading or writing state files
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt state file {path:?}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Paths of the state files inside a state directory
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub checkpoint: PathBuf,
    pub dedup: PathBuf,
}

impl StatePaths {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            checkpoint: state_dir.join(CHECKPOINT_FILE),
            dedup: state_dir.join(DEDUP_FILE),
        }
    }

    /// Removes both state files, for a fresh start
    ///
    /// Missing files are not an error.
    pub fn clear(&self) -> StorageResult<()> {
        for path in [&self.checkpoint, &self.dedup] {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::info!("Removed state file {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::io(path, e)),
            }
        }
        Ok(())
    }
}
