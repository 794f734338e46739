//! Harvest: a resumable crawl orchestration engine
//!
//! This crate drives an arbitrary "fetch one item" operation over an arbitrary
//! "list items" operation under bounded concurrency and adaptive rate limiting,
//! isolating per-item failures and persisting enough state to resume after an
//! interruption without re-processing finished work.

pub mod config;
pub mod crawler;
pub mod item;
pub mod output;
pub mod sources;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for engine operations
///
/// Only listing failures and persistence failures are allowed to terminate a
/// run. Per-item problems are carried as [`item::ItemError`] values inside
/// results and never surface here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Listing failed: {0}")]
    Listing(#[from] item::ListingError),

    #[error("Malformed item {id:?}: {reason}")]
    MalformedItem { id: String, reason: String },

    #[error("Persistence error: {0}")]
    Persistence(#[from] storage::StorageError),

    #[error("Invalid state transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: state::ItemState,
        to: state::ItemState,
    },

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::{Config, EngineConfig, MalformedPolicy};
pub use crawler::{CrawlFailure, CrawlOrchestrator, RunOutcome, RunSummary};
pub use item::{ItemError, ItemLister, ItemProcessor, ItemResult, ProcessSummary, WorkItem};
pub use output::{RunStats, StatsSnapshot};
pub use state::{ItemState, RateState};
