//! State module for tracking crawl progress
//!
//! This module provides the small state types shared by the engine components.
//!
//! # Components
//!
//! - `ItemState`: Tracks the lifecycle of an individual work item within a run
//! - `RateState`: Dispatch timing and throttle bookkeeping owned by the rate controller

mod item_state;
mod rate_state;

// Re-export main types
pub use item_state::ItemState;
pub use rate_state::RateState;
