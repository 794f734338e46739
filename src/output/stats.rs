//! Run statistics
//!
//! `RunStats` is owned by the orchestrator and shared by reference with the
//! worker pool; every counter is an atomic so completions can be recorded
//! without a lock. `StatsSnapshot` is the serializable view written into
//! checkpoints and returned to callers.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one run
#[derive(Debug, Default)]
pub struct RunStats {
    listed: AtomicU64,
    skipped_duplicate: AtomicU64,
    skipped_permanent: AtomicU64,
    skipped_malformed: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    subitems_done: AtomicU64,
    retried: AtomicU64,
    throttled: AtomicU64,
    cooldowns: AtomicU64,
    batches: AtomicU64,
}

macro_rules! counter {
    ($add:ident, $field:ident) => {
        pub fn $add(&self, n: u64) {
            self.$field.fetch_add(n, Ordering::Relaxed);
        }
    };
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(add_listed, listed);
    counter!(add_skipped_duplicate, skipped_duplicate);
    counter!(add_skipped_permanent, skipped_permanent);
    counter!(add_skipped_malformed, skipped_malformed);
    counter!(add_processed, processed);
    counter!(add_failed, failed);
    counter!(add_subitems, subitems_done);
    counter!(add_retried, retried);
    counter!(add_throttled, throttled);
    counter!(add_cooldowns, cooldowns);
    counter!(add_batches, batches);

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            listed: self.listed.load(Ordering::Relaxed),
            skipped_duplicate: self.skipped_duplicate.load(Ordering::Relaxed),
            skipped_permanent: self.skipped_permanent.load(Ordering::Relaxed),
            skipped_malformed: self.skipped_malformed.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            subitems_done: self.subitems_done.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            cooldowns: self.cooldowns.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of the run counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSnapshot {
    /// Items returned by the lister
    pub listed: u64,

    /// Items skipped because they were already done (or listed twice)
    pub skipped_duplicate: u64,

    /// Items skipped because an earlier run recorded a permanent failure
    pub skipped_permanent: u64,

    /// Items dropped at listing time because they had no usable id
    pub skipped_malformed: u64,

    /// Items processed successfully in this run
    pub processed: u64,

    /// Items that ended the run failed
    pub failed: u64,

    /// Sub-items (images, attachments) reported by the processor
    #[serde(alias = "images_or_subitems_done")]
    pub subitems_done: u64,

    /// Re-dispatches of previously failed items
    pub retried: u64,

    /// Throttle signals observed
    pub throttled: u64,

    /// Global pauses triggered by repeated throttling
    pub cooldowns: u64,

    /// Batches completed and checkpointed
    pub batches: u64,
}

impl StatsSnapshot {
    /// Items that reached a terminal state in this run
    pub fn resolved(&self) -> u64 {
        self.processed + self.failed
    }

    /// Share of resolved items that succeeded, in percent
    pub fn success_rate(&self) -> f64 {
        let resolved = self.resolved();
        if resolved == 0 {
            0.0
        } else {
            (self.processed as f64 / resolved as f64) * 100.0
        }
    }
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &StatsSnapshot) {
    println!("=== Run Statistics ===\n");

    println!("Listing:");
    println!("  Listed: {}", stats.listed);
    println!("  Skipped (already done): {}", stats.skipped_duplicate);
    if stats.skipped_permanent > 0 {
        println!("  Skipped (permanent failure): {}", stats.skipped_permanent);
    }
    if stats.skipped_malformed > 0 {
        println!("  Skipped (malformed): {}", stats.skipped_malformed);
    }
    println!();

    println!("Processing:");
    println!("  Batches: {}", stats.batches);
    println!("  Processed: {}", stats.processed);
    println!("  Failed: {}", stats.failed);
    println!("  Retried: {}", stats.retried);
    println!("  Sub-items written: {}", stats.subitems_done);
    println!();

    if stats.throttled > 0 {
        println!("Throttling:");
        println!("  Throttle signals: {}", stats.throttled);
        println!("  Global cooldowns: {}", stats.cooldowns);
        println!();
    }

    println!(
        "Success Rate: {:.1}% ({} / {} items resolved successfully)",
        stats.success_rate(),
        stats.processed,
        stats.resolved()
    );
}
