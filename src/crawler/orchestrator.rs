//! Crawl orchestrator - main run loop
//!
//! This module contains the run loop that ties everything together:
//! - Listing the work once and filtering it through the dedup index
//! - Resuming batch numbering after an interrupted run
//! - Dispatching batches through the worker pool
//! - Persisting the dedup index and the checkpoint at every batch boundary
//! - Stopping cleanly on cancellation

use crate::config::{EngineConfig, MalformedPolicy};
use crate::crawler::pool::WorkerPool;
use crate::crawler::rate::RateController;
use crate::crawler::scheduler::{BatchReport, BatchScheduler};
use crate::item::{ItemError, ItemLister, ItemProcessor, WorkItem};
use crate::output::{RunStats, StatsSnapshot};
use crate::storage::{CheckpointStore, DedupIndex, StatePaths};
use crate::EngineError;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Listing,
    Resuming,
    Scheduling,
    Running(usize),
    Checkpointing(usize),
    Draining,
    Terminal(Termination),
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Completed,
    Cancelled,
    Fatal,
}

/// Non-fatal end of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every listed item reached a terminal state
    Completed,

    /// Cancellation was observed at a batch boundary; the next run resumes
    Cancelled,
}

/// Returned by a run that did not hit a fatal error
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub stats: StatsSnapshot,

    /// Batches dispatched and checkpointed in this run
    pub batches: usize,

    pub elapsed: Duration,
}

/// A run stopped by a listing or persistence failure
///
/// Everything persisted before the failure stays valid; the partial counters
/// describe the work done up to that point.
#[derive(Debug, Error)]
#[error("run {run_id} failed: {error}")]
pub struct CrawlFailure {
    pub run_id: String,

    #[source]
    pub error: EngineError,

    pub partial: StatsSnapshot,
}

/// Drives one run of a lister and a processor
///
/// An orchestrator is consumed by [`CrawlOrchestrator::run`]; build a new one
/// for every run.
pub struct CrawlOrchestrator<L, P> {
    config: EngineConfig,
    paths: StatePaths,
    lister: L,
    processor: P,
    stats: RunStats,
    cancel: CancellationToken,
    phase: Phase,
    run_id: String,
}

impl<L, P> CrawlOrchestrator<L, P>
where
    L: ItemLister,
    P: ItemProcessor,
{
    /// Creates a new orchestrator
    ///
    /// # Arguments
    ///
    /// * `config` - Engine settings; validated here
    /// * `state_dir` - Directory holding the checkpoint and the dedup index
    /// * `lister` - Produces the work list
    /// * `processor` - Handles one item
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlOrchestrator)` - Ready to run
    /// * `Err(EngineError)` - The configuration is invalid
    pub fn new(
        config: EngineConfig,
        state_dir: impl AsRef<Path>,
        lister: L,
        processor: P,
    ) -> Result<Self, EngineError> {
        crate::config::validate_engine_config(&config)?;

        Ok(Self {
            config,
            paths: StatePaths::new(state_dir.as_ref()),
            lister,
            processor,
            stats: RunStats::new(),
            cancel: CancellationToken::new(),
            phase: Phase::Idle,
            run_id: new_run_id(),
        })
    }

    /// Replaces the cancellation token, e.g. with a child of a parent token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops the run at the next batch boundary when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Counters of the run so far
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Runs to completion, cancellation, or a fatal error
    ///
    /// Per-item failures never surface here. Only a listing failure, a
    /// persistence failure, or a malformed item under the abort policy stop
    /// the run early.
    pub async fn run(mut self) -> Result<RunSummary, CrawlFailure> {
        let start = Instant::now();
        tracing::info!("Starting run {}", self.run_id);

        match self.execute().await {
            Ok((outcome, batches)) => {
                self.enter(Phase::Terminal(match outcome {
                    RunOutcome::Completed => Termination::Completed,
                    RunOutcome::Cancelled => Termination::Cancelled,
                }));

                let stats = self.stats.snapshot();
                tracing::info!(
                    "Run {} {}: {} processed, {} failed in {} batches ({:?})",
                    self.run_id,
                    match outcome {
                        RunOutcome::Completed => "completed",
                        RunOutcome::Cancelled => "cancelled",
                    },
                    stats.processed,
                    stats.failed,
                    batches,
                    start.elapsed()
                );

                Ok(RunSummary {
                    run_id: self.run_id,
                    outcome,
                    stats,
                    batches,
                    elapsed: start.elapsed(),
                })
            }
            Err(error) => {
                self.enter(Phase::Terminal(Termination::Fatal));
                tracing::error!("Run {} failed: {}", self.run_id, error);

                Err(CrawlFailure {
                    run_id: self.run_id,
                    error,
                    partial: self.stats.snapshot(),
                })
            }
        }
    }

    async fn execute(&mut self) -> Result<(RunOutcome, usize), EngineError> {
        self.enter(Phase::Listing);
        let listed = self.lister.list().await?;
        self.stats.add_listed(listed.len() as u64);
        tracing::info!("Listed {} items", listed.len());

        self.enter(Phase::Resuming);
        let dedup = DedupIndex::load(&self.paths.dedup)?;
        let mut checkpoints = CheckpointStore::open(&self.paths.checkpoint, &self.run_id)?;
        let first_index = match checkpoints.previous() {
            Some(previous) if !previous.completed => {
                tracing::info!(
                    "Resuming interrupted run {} after batch {}",
                    previous.run_id,
                    previous.batch_index
                );
                previous.resume_index()
            }
            Some(previous) => {
                tracing::debug!("Previous run {} completed", previous.run_id);
                0
            }
            None => {
                tracing::info!("No checkpoint found, starting cold");
                0
            }
        };

        let (remaining, skipped) = self.filter(listed, &dedup)?;
        if skipped.already_done + skipped.permanent > 0 {
            tracing::info!(
                "Skipping {} already-done and {} permanently failed items",
                skipped.already_done,
                skipped.permanent
            );
        }

        self.enter(Phase::Scheduling);
        let mut scheduler = BatchScheduler::new(
            remaining,
            self.config.batch_size,
            self.config.max_attempts,
            first_index,
        );
        tracing::info!(
            "{} items to process in batches of {}",
            scheduler.remaining(),
            self.config.batch_size
        );

        let rate = Arc::new(RateController::from_config(&self.config));
        let pool = WorkerPool::new(self.config.max_concurrency, self.config.item_timeout(), rate);

        let mut batches = 0;
        let mut outcome = RunOutcome::Completed;
        let start = Instant::now();

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!(
                    "Cancellation requested; stopping with {} items left",
                    scheduler.remaining()
                );
                outcome = RunOutcome::Cancelled;
                break;
            }

            let Some(batch) = scheduler.next_batch()? else {
                break;
            };

            self.enter(Phase::Running(batch.index));
            self.stats.add_retried(batch.retries as u64);
            let results = pool.run(&batch.items, &self.processor, &self.stats).await;
            let report = scheduler.complete(&batch, &results)?;
            let abort = self.absorb(&report, &dedup);

            self.enter(Phase::Checkpointing(batch.index));
            self.stats.add_batches(1);
            dedup.persist(&self.paths.dedup)?;
            checkpoints.record(batch.index, report.resolved_ids, self.stats.snapshot())?;
            batches += 1;

            if let Some(error) = abort {
                return Err(error);
            }

            let stats = self.stats.snapshot();
            let elapsed = start.elapsed().as_secs_f64();
            tracing::info!(
                "Progress: batch {} done, {} processed, {} failed, {} left, {:.2} items/sec",
                batch.index,
                stats.processed,
                stats.failed,
                scheduler.remaining(),
                if elapsed > 0.0 {
                    stats.resolved() as f64 / elapsed
                } else {
                    0.0
                }
            );
        }

        self.enter(Phase::Draining);
        match outcome {
            RunOutcome::Completed => {
                dedup.persist(&self.paths.dedup)?;
                checkpoints.mark_completed(self.stats.snapshot())?;
            }
            RunOutcome::Cancelled => {
                // The last checkpoint already covers every finished batch
                tracing::info!("Run interrupted; the next run resumes from the last checkpoint");
            }
        }

        Ok((outcome, batches))
    }

    /// Drops malformed, duplicate and already-resolved items
    fn filter(
        &self,
        listed: Vec<WorkItem>,
        dedup: &DedupIndex,
    ) -> Result<(Vec<WorkItem>, Skipped), EngineError> {
        let mut seen = HashSet::new();
        let mut remaining = Vec::with_capacity(listed.len());
        let mut skipped = Skipped::default();

        for item in listed {
            if item.id().trim().is_empty() {
                match self.config.malformed_items {
                    MalformedPolicy::Skip => {
                        tracing::warn!("Skipping listed item with an empty id");
                        self.stats.add_skipped_malformed(1);
                        continue;
                    }
                    MalformedPolicy::Abort => {
                        return Err(EngineError::MalformedItem {
                            id: item.id().to_string(),
                            reason: "empty id".to_string(),
                        });
                    }
                }
            }

            if !seen.insert(item.id().to_string()) {
                tracing::debug!("Item {} listed twice", item.id());
                self.stats.add_skipped_duplicate(1);
                continue;
            }

            if !self.config.force_reprocess {
                if dedup.is_done(item.id()) {
                    self.stats.add_skipped_duplicate(1);
                    skipped.already_done += 1;
                    continue;
                }
                if dedup.is_permanently_failed(item.id()) {
                    tracing::debug!("Skipping {}: failed permanently in an earlier run", item.id());
                    self.stats.add_skipped_permanent(1);
                    skipped.permanent += 1;
                    continue;
                }
            }

            remaining.push(item);
        }

        Ok((remaining, skipped))
    }

    /// Records a batch report in the dedup index and the counters
    ///
    /// Returns the error to stop with if a malformed item was seen under the
    /// abort policy. The batch is still persisted first.
    fn absorb(&self, report: &BatchReport, dedup: &DedupIndex) -> Option<EngineError> {
        for id in &report.done {
            dedup.mark_done(id);
        }

        let mut abort = None;
        for (id, error) in report.failures() {
            dedup.mark_failed(id, &error.to_string(), error.is_retryable());

            if let ItemError::Malformed(reason) = error {
                match self.config.malformed_items {
                    MalformedPolicy::Skip => {
                        tracing::warn!("Skipping malformed item {}: {}", id, reason);
                    }
                    MalformedPolicy::Abort => {
                        abort.get_or_insert_with(|| EngineError::MalformedItem {
                            id: id.clone(),
                            reason: reason.clone(),
                        });
                    }
                }
            }
        }

        for (id, error) in &report.failed {
            tracing::warn!("Giving up on {}: {}", id, error);
        }
        self.stats.add_failed(report.failed.len() as u64);

        abort
    }

    fn enter(&mut self, phase: Phase) {
        tracing::trace!("Run {}: {:?} -> {:?}", self.run_id, self.phase, phase);
        self.phase = phase;
    }
}

/// Items dropped by the dedup index before scheduling
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Skipped {
    already_done: u64,
    permanent: u64,
}

fn new_run_id() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string()
}
