//! Read-only view of a state directory
//!
//! Used by the `--status` command. Nothing here writes to the state
//! directory; the checkpoint and dedup files are owned by the engine.

use crate::storage::{Checkpoint, CheckpointStore, DedupIndex, StatePaths, StorageResult};
use std::path::Path;

/// What a state directory says about past runs
#[derive(Debug, Clone)]
pub struct StateStatus {
    pub checkpoint: Option<Checkpoint>,
    pub done: usize,
    pub failed: usize,
}

impl StateStatus {
    /// Returns true if the last run stopped before draining
    pub fn is_interrupted(&self) -> bool {
        self.checkpoint.as_ref().map_or(false, |cp| !cp.completed)
    }
}

/// Loads checkpoint and dedup counts from a state directory
pub fn load_status(state_dir: &Path) -> StorageResult<StateStatus> {
    let paths = StatePaths::new(state_dir);
    let checkpoint = CheckpointStore::read(&paths.checkpoint)?;
    let (done, failed) = DedupIndex::load(&paths.dedup)?.counts();

    Ok(StateStatus {
        checkpoint,
        done,
        failed,
    })
}

/// Prints a state directory summary to stdout
pub fn print_status(status: &StateStatus) {
    println!("=== State Directory ===\n");
    println!("Dedup index:");
    println!("  Done: {}", status.done);
    println!("  Failed: {}", status.failed);
    println!();

    match &status.checkpoint {
        None => println!("No checkpoint (next run is a cold start)"),
        Some(cp) => {
            println!("Last checkpoint:");
            println!("  Run: {}", cp.run_id);
            println!("  Batch: {}", cp.batch_index);
            println!("  Resolved in batch: {}", cp.resolved_ids.len());
            println!("  Updated: {}", cp.updated_at.to_rfc3339());
            if cp.completed {
                println!("  State: completed");
            } else {
                println!(
                    "  State: interrupted (next run continues at batch {})",
                    cp.resume_index()
                );
            }
            println!();
            super::print_statistics(&cp.stats);
        }
    }
}
