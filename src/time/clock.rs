//! Time sources for timer processing.
//!
//! [`TimerQueue`](super::TimerQueue) asks its time source for "now" when it
//! scans for expired timers and when it converts an absolute deadline into the
//! relative delay the kernel facility wants. Production uses [`WallClock`];
//! deterministic tests use [`VirtualClock`].

use crate::types::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Time source abstraction for getting the current time.
pub trait TimeSource: Send + Sync + std::fmt::Debug {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// System wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct WallClock;

impl WallClock {
    /// Creates a new wall clock time source.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Virtual time source for lab testing.
///
/// Time only advances when explicitly told to do so.
///
/// # Example
///
/// ```
/// use reactimer::time::{TimeSource, VirtualClock};
/// use reactimer::types::Timestamp;
/// use std::time::Duration;
///
/// let clock = VirtualClock::starting_at(Timestamp::from_millis(1_000));
/// clock.advance(Duration::from_millis(250));
/// assert_eq!(clock.now(), Timestamp::from_millis(1_250));
/// ```
#[derive(Debug)]
pub struct VirtualClock {
    /// Current time in microseconds.
    now: AtomicU64,
}

impl VirtualClock {
    /// Creates a virtual clock starting at the given time.
    #[must_use]
    pub fn starting_at(time: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(time.as_micros()),
        }
    }

    /// Advances time by the given duration.
    pub fn advance(&self, by: Duration) {
        let micros = u64::try_from(by.as_micros()).unwrap_or(u64::MAX);
        let _ = self
            .now
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |now| {
                Some(now.saturating_add(micros))
            });
    }

    /// Advances time to `time`; a target in the past is a no-op.
    pub fn advance_to(&self, time: Timestamp) {
        self.now.fetch_max(time.as_micros(), Ordering::AcqRel);
    }

    /// Sets the current time, even backwards.
    pub fn set(&self, time: Timestamp) {
        self.now.store(time.as_micros(), Ordering::Release);
    }
}

impl Default for VirtualClock {
    /// Starts one second after the epoch so that every reading is valid.
    fn default() -> Self {
        Self::starting_at(Timestamp::from_unix(1, 0))
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_micros(self.now.load(Ordering::Acquire))
    }
}
