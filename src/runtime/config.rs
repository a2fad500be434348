//! Event loop configuration types.
//!
//! These types hold the concrete values that drive loop behavior. In most
//! cases you should use [`LoopBuilder`](super::builder::LoopBuilder) rather
//! than creating a [`LoopConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `events_capacity` | 16 |
//! | `poll_timeout` | 10 s |
//! | `min_arm_delay` | 100 µs |
//! | `missed_tick_behavior` | [`MissedTickBehavior::Skip`] |
//! | `callback_panic` | [`CallbackPanicPolicy::Propagate`] |
//! | `thread_name` | `"reactimer-loop"` |

use crate::time::{MissedTickBehavior, DEFAULT_MIN_ARM_DELAY};
use std::time::Duration;

/// Default name for loop threads.
pub const DEFAULT_THREAD_NAME: &str = "reactimer-loop";

/// What happens after a timer callback panics.
///
/// Either way the whole expiry batch finishes first: remaining callbacks run,
/// repeating timers are rescheduled, and the facility is re-armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallbackPanicPolicy {
    /// Re-raise the first panic on the loop thread.
    #[default]
    Propagate,
    /// Log and abort the process.
    Abort,
}

/// Event loop configuration.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Maximum readiness events handled per poll.
    pub events_capacity: usize,
    /// Longest a single poll blocks when nothing wakes it.
    pub poll_timeout: Duration,
    /// Lower bound on the delay programmed into the timer facility.
    pub min_arm_delay: Duration,
    /// How repeating timers catch up after a late firing.
    pub missed_tick_behavior: MissedTickBehavior,
    /// What happens after a callback panics.
    pub callback_panic: CallbackPanicPolicy,
    /// Name given to threads started by [`LoopThread`](super::LoopThread).
    pub thread_name: String,
}

impl LoopConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.events_capacity == 0 {
            self.events_capacity = 1;
        }
        if self.poll_timeout.is_zero() {
            self.poll_timeout = Duration::from_millis(1);
        }
        if self.min_arm_delay.is_zero() {
            self.min_arm_delay = Duration::from_micros(1);
        }
        if self.thread_name.is_empty() {
            self.thread_name = DEFAULT_THREAD_NAME.to_string();
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            events_capacity: 16,
            poll_timeout: Duration::from_secs(10),
            min_arm_delay: DEFAULT_MIN_ARM_DELAY,
            missed_tick_behavior: MissedTickBehavior::Skip,
            callback_panic: CallbackPanicPolicy::Propagate,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}
