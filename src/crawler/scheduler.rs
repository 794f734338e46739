//! Batch scheduler for one run
//!
//! This module handles:
//! - Deterministic partitioning of the remaining work list into batches
//! - Per-item state transitions (Pending -> InFlight -> Done/Failed)
//! - Bounded retry: retryable failures go to the front of the next batch
//!   until the attempt budget is spent

use crate::item::{ItemError, ItemResult, WorkItem};
use crate::state::ItemState;
use crate::EngineError;
use std::collections::{HashMap, VecDeque};

/// A group of items dispatched together and checkpointed together
#[derive(Debug, Clone)]
pub struct Batch {
    /// Run-wide batch number; continues after an interrupted run
    pub index: usize,

    pub items: Vec<WorkItem>,

    /// How many of `items` are re-dispatches of earlier failures
    pub retries: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(WorkItem::id)
    }
}

/// What happened to a batch once its results were absorbed
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub index: usize,

    /// Ids that succeeded, in dispatch order
    pub done: Vec<String>,

    /// Failures with no attempt left (or not retryable), in dispatch order
    pub failed: Vec<(String, ItemError)>,

    /// Failures that will be dispatched again in the next batch
    pub requeued: Vec<(String, ItemError)>,

    /// Ids that never reported back and went back to pending
    pub recovered: Vec<String>,

    /// Every id that reached a terminal state in this batch, in dispatch order
    pub resolved_ids: Vec<String>,
}

impl BatchReport {
    /// All failures of this batch, final or not
    pub fn failures(&self) -> impl Iterator<Item = &(String, ItemError)> {
        self.failed.iter().chain(self.requeued.iter())
    }
}

/// Hands out batches and tracks every item of the run
pub struct BatchScheduler {
    batch_size: usize,
    max_attempts: u32,
    next_index: usize,

    /// Items never dispatched, in listing order
    queue: VecDeque<WorkItem>,

    /// Failed items waiting for the next batch
    retry: Vec<WorkItem>,

    states: HashMap<String, ItemState>,
    attempts: HashMap<String, u32>,
}

impl BatchScheduler {
    /// Creates a scheduler over the items still to be processed
    ///
    /// # Arguments
    ///
    /// * `items` - Work list after dedup filtering, in listing order
    /// * `batch_size` - Maximum items per batch (at least 1)
    /// * `max_attempts` - Dispatches allowed per item in this run (at least 1)
    /// * `first_index` - Index of the first batch handed out
    pub fn new(items: Vec<WorkItem>, batch_size: usize, max_attempts: u32, first_index: usize) -> Self {
        let states = items
            .iter()
            .map(|item| (item.id().to_string(), ItemState::Pending))
            .collect();

        Self {
            batch_size: batch_size.max(1),
            max_attempts: max_attempts.max(1),
            next_index: first_index,
            queue: items.into(),
            retry: Vec::new(),
            states,
            attempts: HashMap::new(),
        }
    }

    /// Returns true once every item has reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.queue.is_empty() && self.retry.is_empty()
    }

    /// Items not yet dispatched plus items waiting for a retry
    pub fn remaining(&self) -> usize {
        self.queue.len() + self.retry.len()
    }

    /// Index the next batch will carry
    pub fn next_index(&self) -> usize {
        self.next_index
    }

    pub fn state_of(&self, id: &str) -> Option<&ItemState> {
        self.states.get(id)
    }

    /// Number of dispatches of `id` in this run
    pub fn attempts(&self, id: &str) -> u32 {
        self.attempts.get(id).copied().unwrap_or(0)
    }

    /// Takes the next batch and marks its items in flight
    ///
    /// Retries come first, then fresh items fill the batch in listing order.
    /// Returns `Ok(None)` once nothing is left.
    pub fn next_batch(&mut self) -> Result<Option<Batch>, EngineError> {
        if self.is_finished() {
            return Ok(None);
        }

        let mut items: Vec<WorkItem> = std::mem::take(&mut self.retry);
        let retries = items.len();
        let room = self.batch_size.saturating_sub(items.len());
        let fresh = room.min(self.queue.len());
        items.extend(self.queue.drain(..fresh));

        for item in &items {
            self.transition(item.id(), ItemState::InFlight)?;
            *self.attempts.entry(item.id().to_string()).or_insert(0) += 1;
        }

        let batch = Batch {
            index: self.next_index,
            items,
            retries,
        };
        self.next_index += 1;

        tracing::debug!(
            "Scheduled batch {} with {} items ({} retries)",
            batch.index,
            batch.len(),
            batch.retries
        );
        Ok(Some(batch))
    }

    /// Absorbs the results of a dispatched batch
    ///
    /// Successes become Done. Retryable failures with attempts left go back
    /// to Pending and are queued for the next batch; every other failure
    /// becomes terminal. An item with no result is treated as never having
    /// run.
    pub fn complete(&mut self, batch: &Batch, results: &[ItemResult]) -> Result<BatchReport, EngineError> {
        let by_id: HashMap<&str, &ItemResult> =
            results.iter().map(|r| (r.id.as_str(), r)).collect();

        let mut report = BatchReport {
            index: batch.index,
            ..BatchReport::default()
        };

        for item in &batch.items {
            let id = item.id();
            let Some(result) = by_id.get(id) else {
                let current = self.current(id)?;
                if current != ItemState::InFlight {
                    return Err(EngineError::InvalidTransition {
                        id: id.to_string(),
                        from: current,
                        to: ItemState::Pending,
                    });
                }
                self.transition(id, current.recovered())?;
                if let Some(count) = self.attempts.get_mut(id) {
                    *count = count.saturating_sub(1);
                }
                tracing::warn!("No result for {} in batch {}; re-queueing", id, batch.index);
                self.retry.push(item.clone());
                report.recovered.push(id.to_string());
                continue;
            };

            match &result.outcome {
                Ok(_) => {
                    self.transition(id, ItemState::Done)?;
                    report.done.push(id.to_string());
                    report.resolved_ids.push(id.to_string());
                }
                Err(err) => {
                    self.transition(id, ItemState::Failed(err.to_string()))?;

                    if err.is_retryable() && self.attempts(id) < self.max_attempts {
                        self.transition(id, ItemState::Pending)?;
                        self.retry.push(item.clone());
                        report.requeued.push((id.to_string(), err.clone()));
                    } else {
                        report.failed.push((id.to_string(), err.clone()));
                        report.resolved_ids.push(id.to_string());
                    }
                }
            }
        }

        Ok(report)
    }

    fn current(&self, id: &str) -> Result<ItemState, EngineError> {
        self.states
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::MalformedItem {
                id: id.to_string(),
                reason: "not scheduled in this run".to_string(),
            })
    }

    fn transition(&mut self, id: &str, next: ItemState) -> Result<(), EngineError> {
        let current = self.current(id)?;
        if current == next {
            return Ok(());
        }
        if !current.can_transition_to(&next) {
            return Err(EngineError::InvalidTransition {
                id: id.to_string(),
                from: current,
                to: next,
            });
        }
        self.states.insert(id.to_string(), next);
        Ok(())
    }
}
