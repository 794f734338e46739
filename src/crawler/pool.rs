//! Bounded-concurrency worker pool
//!
//! A batch is fanned out over at most `max_concurrency` in-flight process
//! calls. Every call is paced by the shared rate controller, bounded by the
//! item timeout, and shielded from panics, so one bad item can never take
//! down the batch.

use crate::crawler::rate::{RateController, ThrottleSignal};
use crate::item::{ItemError, ItemProcessor, ItemResult, WorkItem};
use crate::output::RunStats;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Executes batches of items against a processor
#[derive(Debug, Clone)]
pub struct WorkerPool {
    max_concurrency: usize,
    item_timeout: Duration,
    rate: Arc<RateController>,
}

impl WorkerPool {
    /// Creates a new pool
    ///
    /// # Arguments
    ///
    /// * `max_concurrency` - Upper bound on simultaneous process calls (at least 1)
    /// * `item_timeout` - Deadline for a single process call
    /// * `rate` - Rate controller shared by every dispatch of the run
    pub fn new(max_concurrency: usize, item_timeout: Duration, rate: Arc<RateController>) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            item_timeout,
            rate,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn rate(&self) -> &Arc<RateController> {
        &self.rate
    }

    /// Runs every item of a batch and waits for all of them
    ///
    /// Returns exactly one result per input item, in input order. Per-item
    /// failures (including timeouts and panics) are carried in the results.
    pub async fn run<P>(&self, items: &[WorkItem], processor: &P, stats: &RunStats) -> Vec<ItemResult>
    where
        P: ItemProcessor + ?Sized,
    {
        let mut results: Vec<(usize, ItemResult)> = stream::iter(items.iter().enumerate())
            .map(|(position, item)| async move {
                (position, self.dispatch(item, processor, stats).await)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        results.sort_by_key(|(position, _)| *position);
        results.into_iter().map(|(_, result)| result).collect()
    }

    async fn dispatch<P>(&self, item: &WorkItem, processor: &P, stats: &RunStats) -> ItemResult
    where
        P: ItemProcessor + ?Sized,
    {
        self.rate.acquire().await;
        tracing::trace!("Dispatching {}", item.id());

        let call = AssertUnwindSafe(processor.process(item)).catch_unwind();
        let outcome = match tokio::time::timeout(self.item_timeout, call).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                tracing::error!("Processor panicked on {}: {}", item.id(), message);
                Err(ItemError::Permanent(format!("processor panicked: {}", message)))
            }
            Err(_) => Err(ItemError::Timeout(self.item_timeout)),
        };

        match &outcome {
            Ok(summary) => {
                self.rate.report_success();
                stats.add_processed(1);
                stats.add_subitems(summary.subitems);
                tracing::debug!("Processed {}", item.id());
            }
            Err(err) => {
                if let Some(retry_after) = err.throttle_hint() {
                    stats.add_throttled(1);
                    if let ThrottleSignal::Cooldown(pause) = self.rate.report_throttled(retry_after)
                    {
                        stats.add_cooldowns(1);
                        tracing::warn!("Cooling down for {:?} after {}", pause, item.id());
                    }
                }
                tracing::debug!("Item {} failed: {}", item.id(), err);
            }
        }

        ItemResult {
            id: item.id().to_string(),
            outcome,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
