//! Adaptive rate controller shared by all workers
//!
//! Every dispatch goes through [`RateController::acquire`]. The controller
//! keeps a minimum interval between dispatches, widens it multiplicatively
//! when the source throttles us, narrows it again after a run of successes,
//! and pauses the whole pool when throttles cluster inside a sliding window.

use crate::config::EngineConfig;
use crate::state::RateState;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Smallest delay a throttle signal backs off to when the base delay is zero
const MIN_THROTTLE_DELAY: Duration = Duration::from_millis(100);

/// Tuning knobs of the controller
#[derive(Debug, Clone, PartialEq)]
pub struct RatePolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub recovery_factor: f64,
    pub recovery_after: u32,
    pub throttle_threshold: u32,
    pub throttle_window: Duration,
    pub cooldown: Duration,
}

impl RatePolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            backoff_factor: config.backoff_factor,
            recovery_factor: config.recovery_factor,
            recovery_after: config.recovery_after,
            throttle_threshold: config.throttle_threshold,
            throttle_window: config.throttle_window(),
            cooldown: config.cooldown(),
        }
    }
}

/// What a throttle report did to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleSignal {
    /// The per-dispatch delay grew to the contained value
    Backoff(Duration),

    /// Too many throttles in the window: every dispatch is paused for the
    /// contained duration
    Cooldown(Duration),
}

/// Shared, lock-protected dispatch pacing
///
/// The mutex is held only for the arithmetic on [`RateState`]; waiting
/// always happens after it has been released.
#[derive(Debug)]
pub struct RateController {
    policy: RatePolicy,
    state: Mutex<RateState>,
}

impl RateController {
    pub fn new(policy: RatePolicy) -> Self {
        let state = RateState::new(policy.base_delay);
        Self {
            policy,
            state: Mutex::new(state),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(RatePolicy::from_config(config))
    }

    /// Waits until the caller may dispatch
    ///
    /// Each caller reserves the next free slot under the lock, so concurrent
    /// callers are spaced by the current delay instead of all waking at once.
    /// A cooldown that starts while a caller waits voids its reservation; the
    /// caller then reserves a slot after the pause.
    pub async fn acquire(&self) {
        let mut slot = self.reserve();

        loop {
            if slot > Instant::now() {
                tracing::trace!(
                    "Waiting {:?} for dispatch slot",
                    slot.saturating_duration_since(Instant::now())
                );
                tokio::time::sleep_until(slot).await;
            }

            let rescheduled = {
                let mut state = self.lock();
                let now = Instant::now();
                if state.is_paused(now) {
                    let slot = state.next_slot(now);
                    state.record_dispatch(slot);
                    Some(slot)
                } else {
                    None
                }
            };

            match rescheduled {
                Some(next) => {
                    tracing::debug!("Cooldown started while waiting; dispatch moved past the pause");
                    slot = next;
                }
                None => return,
            }
        }
    }

    fn reserve(&self) -> Instant {
        let mut state = self.lock();
        let slot = state.next_slot(Instant::now());
        state.record_dispatch(slot);
        slot
    }

    /// Records a successful item
    pub fn report_success(&self) {
        let mut state = self.lock();
        state.consecutive_throttles = 0;
        state.consecutive_successes += 1;

        if state.consecutive_successes < self.policy.recovery_after {
            return;
        }
        state.consecutive_successes = 0;

        if state.current_delay > self.policy.base_delay {
            let decayed = state
                .current_delay
                .mul_f64(self.policy.recovery_factor)
                .max(self.policy.base_delay);
            tracing::debug!(
                "Rate recovery: delay {:?} -> {:?}",
                state.current_delay,
                decayed
            );
            state.current_delay = decayed;
        }
    }

    /// Records a throttle signal from the source
    ///
    /// The delay becomes `max(delay * backoff_factor, retry_after)`, capped at
    /// the maximum delay. When the number of throttles inside the sliding
    /// window exceeds the threshold, a global cooldown starts.
    pub fn report_throttled(&self, retry_after: Option<Duration>) -> ThrottleSignal {
        let now = Instant::now();
        let mut state = self.lock();

        state.consecutive_successes = 0;
        state.consecutive_throttles += 1;

        let scaled = Duration::try_from_secs_f64(
            state.current_delay.as_secs_f64() * self.policy.backoff_factor,
        )
        .unwrap_or(self.policy.max_delay);
        let backed_off = scaled
            .max(MIN_THROTTLE_DELAY)
            .max(retry_after.unwrap_or(Duration::ZERO));
        state.current_delay = backed_off.min(self.policy.max_delay);

        state.recent_throttles.push_back(now);
        state.prune_throttles(now, self.policy.throttle_window);

        if state.recent_throttles.len() > self.policy.throttle_threshold as usize {
            let until = now + self.policy.cooldown;
            state.paused_until = Some(match state.paused_until {
                Some(existing) => existing.max(until),
                None => until,
            });
            state.recent_throttles.clear();
            tracing::warn!(
                "{} throttles within {:?}; pausing all dispatches for {:?}",
                state.consecutive_throttles,
                self.policy.throttle_window,
                self.policy.cooldown
            );
            return ThrottleSignal::Cooldown(self.policy.cooldown);
        }

        tracing::debug!(
            "Throttled (#{} in a row); delay now {:?}",
            state.consecutive_throttles,
            state.current_delay
        );
        ThrottleSignal::Backoff(state.current_delay)
    }

    /// Current minimum interval between dispatches
    pub fn current_delay(&self) -> Duration {
        self.lock().current_delay
    }

    /// Returns true while a global cooldown is in effect
    pub fn is_paused(&self) -> bool {
        self.lock().is_paused(Instant::now())
    }

    /// Copy of the internal state
    pub fn snapshot(&self) -> RateState {
        self.lock().clone()
    }

    pub fn policy(&self) -> &RatePolicy {
        &self.policy
    }

    fn lock(&self) -> MutexGuard<'_, RateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
