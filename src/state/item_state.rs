//! Item state definitions for tracking progress within a run
//!
//! This module defines the states a work item moves through between being
//! listed and being resolved.

use std::fmt;

/// Represents the current state of a work item in the current run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemState {
    // ===== Active States =====
    /// Item is listed and waiting for a batch slot
    Pending,

    /// Item has been dispatched to a worker
    InFlight,

    // ===== Terminal States =====
    /// Processor succeeded
    Done,

    /// Processor failed and the item will not be attempted again this run
    Failed(String),
}

impl ItemState {
    /// Returns true if this is a terminal state (no further processing this run)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }

    /// Returns true if this is an active state (item may still be processed)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::InFlight)
    }

    /// Returns true if this represents a successful completion
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns the failure reason, if any
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Checks whether moving from this state to `next` is allowed
    ///
    /// `Failed -> Pending` is the bounded-retry re-enqueue and
    /// `InFlight -> Pending` is crash recovery. `Done` never changes.
    pub fn can_transition_to(&self, next: &ItemState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InFlight)
                | (Self::InFlight, Self::Done)
                | (Self::InFlight, Self::Failed(_))
                | (Self::InFlight, Self::Pending)
                | (Self::Failed(_), Self::Pending)
        )
    }

    /// The state an item found at startup should be treated as
    ///
    /// Anything that was in flight when the process died is not done.
    pub fn recovered(&self) -> ItemState {
        match self {
            Self::InFlight => Self::Pending,
            other => other.clone(),
        }
    }

    /// Short machine-readable name of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Done => "done",
            Self::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed ({})", reason),
            other => write!(f, "{}", other.as_str()),
        }
    }
}
