//! Work items and the two collaborator contracts the engine drives
//!
//! The engine never knows where items come from or what processing them
//! means. Callers provide an [`ItemLister`] that produces the full work list
//! once per run and an [`ItemProcessor`] that handles one item, writing its
//! own output as a side effect.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A unit of work: a stable identifier plus source-specific payload
///
/// Items are immutable once listed. The identifier is the dedup key and must
/// be stable across runs (a URL, a content hash, an upstream id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    id: String,
    #[serde(default)]
    payload: serde_json::Value,
}

impl WorkItem {
    /// Creates an item with an empty payload
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: serde_json::Value::Null,
        }
    }

    /// Creates an item carrying a payload for the processor
    pub fn with_payload(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    /// The stable identifier of this item
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The opaque payload handed to the processor
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
}

/// What a successful `process` call reports back, for statistics only
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSummary {
    /// Number of sub-items (images, attachments, files) written for this item
    pub subitems: u64,

    /// Free-form note, e.g. the output path
    pub note: Option<String>,
}

impl ProcessSummary {
    pub fn with_subitems(subitems: u64) -> Self {
        Self {
            subitems,
            note: None,
        }
    }
}

/// Per-item failure, always converted into an [`ItemResult`] by the pool
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ItemError {
    /// Network-level or upstream hiccup, eligible for retry in a later batch
    #[error("transient failure: {0}")]
    Transient(String),

    /// The remote source asked us to slow down (HTTP 429 or equivalent)
    #[error("throttled by source")]
    Throttled { retry_after: Option<Duration> },

    /// The processor did not finish within the item timeout
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Non-retryable failure reported by the processor
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The item payload could not be understood
    #[error("malformed item: {0}")]
    Malformed(String),
}

impl ItemError {
    /// Returns true if a later attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Throttled { .. } | Self::Timeout(_)
        )
    }

    /// Returns the source's retry hint if this is a throttle signal
    pub fn throttle_hint(&self) -> Option<Option<Duration>> {
        match self {
            Self::Throttled { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// The outcome of one dispatch of one item
#[derive(Debug, Clone, PartialEq)]
pub struct ItemResult {
    pub id: String,
    pub outcome: Result<ProcessSummary, ItemError>,
}

impl ItemResult {
    pub fn ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&ItemError> {
        self.outcome.as_ref().err()
    }
}

/// Failure to produce the work list; always fatal for the run
#[derive(Debug, Error)]
pub enum ListingError {
    #[error("source unreachable: {0}")]
    Unreachable(String),

    #[error("failed to read item list: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid item list: {0}")]
    Invalid(String),
}

/// Produces the full list of work items for a run
///
/// Called exactly once per run. Must be idempotent.
#[async_trait]
pub trait ItemLister: Send + Sync {
    async fn list(&self) -> Result<Vec<WorkItem>, ListingError>;
}

/// Handles a single work item
///
/// Implementations perform their own output writing and must represent every
/// failure as an [`ItemError`]. Panics are caught by the pool, but should not
/// be relied upon.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(&self, item: &WorkItem) -> Result<ProcessSummary, ItemError>;
}

#[async_trait]
impl<T: ItemLister + ?Sized> ItemLister for std::sync::Arc<T> {
    async fn list(&self) -> Result<Vec<WorkItem>, ListingError> {
        (**self).list().await
    }
}

#[async_trait]
impl<T: ItemProcessor + ?Sized> ItemProcessor for std::sync::Arc<T> {
    async fn process(&self, item: &WorkItem) -> Result<ProcessSummary, ItemError> {
        (**self).process(item).await
    }
}
