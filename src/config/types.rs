use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure for the `harvest` binary
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    pub source: SourceConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
}

/// Engine behavior configuration
///
/// This is the only configuration the library itself consumes. It is passed
/// in by value; the engine never reads configuration files on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of simultaneously in-flight process calls
    #[serde(rename = "max-concurrency")]
    pub max_concurrency: usize,

    /// Number of items per batch (checkpoint granularity)
    #[serde(rename = "batch-size")]
    pub batch_size: usize,

    /// Minimum time between two dispatches (milliseconds)
    #[serde(rename = "base-delay")]
    pub base_delay_ms: u64,

    /// Upper bound for the adaptive delay (milliseconds)
    #[serde(rename = "max-delay")]
    pub max_delay_ms: u64,

    /// Multiplier applied to the delay on every throttle signal
    #[serde(rename = "backoff-factor")]
    pub backoff_factor: f64,

    /// Multiplier applied to the delay after a run of successes
    #[serde(rename = "recovery-factor")]
    pub recovery_factor: f64,

    /// Consecutive successes needed before the delay decays
    #[serde(rename = "recovery-after")]
    pub recovery_after: u32,

    /// Throttles within the window above which the whole pool pauses
    #[serde(rename = "throttle-threshold")]
    pub throttle_threshold: u32,

    /// Sliding window for counting throttles (milliseconds)
    #[serde(rename = "throttle-window")]
    pub throttle_window_ms: u64,

    /// Length of a global pause (milliseconds)
    #[serde(rename = "cooldown")]
    pub cooldown_ms: u64,

    /// Total attempts per item within one run (1 = no retry)
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Timeout for a single process call (milliseconds)
    #[serde(rename = "item-timeout")]
    pub item_timeout_ms: u64,

    /// Process items even if the dedup index says they are done
    #[serde(rename = "force-reprocess")]
    pub force_reprocess: bool,

    /// What to do with items that cannot be understood
    #[serde(rename = "malformed-items")]
    pub malformed_items: MalformedPolicy,
}

impl EngineConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.throttle_window_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_millis(self.item_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            batch_size: 50,
            base_delay_ms: 500,
            max_delay_ms: 60_000,
            backoff_factor: 2.0,
            recovery_factor: 0.5,
            recovery_after: 10,
            throttle_threshold: 5,
            throttle_window_ms: 60_000,
            cooldown_ms: 30_000,
            max_attempts: 1,
            item_timeout_ms: 30_000,
            force_reprocess: false,
            malformed_items: MalformedPolicy::Skip,
        }
    }
}

/// Policy for items whose payload cannot be understood
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Record the item as permanently failed and continue
    #[default]
    Skip,

    /// Stop the run with a fatal error
    Abort,
}

/// Where the work list comes from
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Path to a newline-delimited list of URLs
    #[serde(rename = "url-list")]
    pub url_list: String,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory holding the checkpoint and dedup index
    #[serde(rename = "state-dir")]
    pub state_dir: String,

    /// Directory the downloader writes fetched documents to
    #[serde(rename = "content-dir")]
    pub content_dir: String,
}
