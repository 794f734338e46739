//! Output module for run statistics and state reporting
//!
//! This module handles:
//! - Live run counters and their serializable snapshots
//! - Printing statistics for humans
//! - Read-only status reports over a state directory

pub mod stats;
pub mod status;

pub use stats::{print_statistics, RunStats, StatsSnapshot};
pub use status::{load_status, print_status, StateStatus};
