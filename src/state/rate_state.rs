use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Dispatch timing and throttle bookkeeping for one run
///
/// This structure is mutated only by the rate controller. Workers never touch
/// it directly; they observe it through `acquire`.
#[derive(Debug, Clone)]
pub struct RateState {
    /// When the most recent dispatch slot was handed out
    pub last_dispatch: Option<Instant>,

    /// Current minimum interval between two dispatches
    pub current_delay: Duration,

    /// Throttle signals seen since the last success
    pub consecutive_throttles: u32,

    /// Successes seen since the last delay decay or throttle
    pub consecutive_successes: u32,

    /// Timestamps of recent throttle signals (sliding window)
    pub recent_throttles: VecDeque<Instant>,

    /// Global pause: no dispatch may start before this instant
    pub paused_until: Option<Instant>,
}

impl RateState {
    /// Creates a fresh state that starts at the base delay
    pub fn new(base_delay: Duration) -> Self {
        Self {
            last_dispatch: None,
            current_delay: base_delay,
            consecutive_throttles: 0,
            consecutive_successes: 0,
            recent_throttles: VecDeque::new(),
            paused_until: None,
        }
    }

    /// Earliest instant at which the next dispatch may start
    pub fn next_slot(&self, now: Instant) -> Instant {
        let mut slot = match self.last_dispatch {
            Some(last) => std::cmp::max(now, last + self.current_delay),
            None => now,
        };

        if let Some(paused_until) = self.paused_until {
            slot = std::cmp::max(slot, paused_until);
        }

        slot
    }

    /// Records that a dispatch slot was taken
    pub fn record_dispatch(&mut self, at: Instant) {
        self.last_dispatch = Some(at);
    }

    /// Returns true while a global cooldown is in effect
    pub fn is_paused(&self, now: Instant) -> bool {
        self.paused_until.map_or(false, |until| until > now)
    }

    /// Drops throttle timestamps that fell out of the sliding window
    pub fn prune_throttles(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.recent_throttles.front() {
            if now.duration_since(*front) > window {
                self.recent_throttles.pop_front();
            } else {
                break;
            }
        }
    }
}
