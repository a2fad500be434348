//! The schedulable timer unit.

use super::sequence;
use crate::types::{TimerId, TimerKey, Timestamp};
use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Boxed timer callback; runs on the owning loop's thread only.
pub(crate) type TimerCallback = Box<dyn FnMut()>;

/// How a repeating timer picks its next expiration after firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissedTickBehavior {
    /// `expiration + interval`, even if that is already due; missed ticks
    /// fire back to back until caught up.
    Burst,
    /// `now + interval`; the schedule shifts by however late the firing was.
    Delay,
    /// The first `expiration + k * interval` strictly after `now`. Missed
    /// ticks are dropped and the schedule stays on its original grid.
    #[default]
    Skip,
}

impl MissedTickBehavior {
    /// Computes the next expiration for a timer that was due at `expiration`
    /// and processed at `now`.
    #[must_use]
    pub fn next_expiration(
        self,
        expiration: Timestamp,
        now: Timestamp,
        interval: Duration,
    ) -> Timestamp {
        match self {
            Self::Burst => expiration + interval,
            Self::Delay => now + interval,
            Self::Skip => {
                let period = u64::try_from(interval.as_micros()).unwrap_or(u64::MAX);
                if period == 0 {
                    return now;
                }
                let behind = now.as_micros().saturating_sub(expiration.as_micros());
                let periods = behind / period + 1;
                Timestamp::from_micros(
                    expiration
                        .as_micros()
                        .saturating_add(periods.saturating_mul(period)),
                )
            }
        }
    }
}

/// Allocator for the identity half of [`TimerId`]s, one per queue.
///
/// Shared with every handle that can schedule into the queue so ids can be
/// computed on any thread before the timer reaches the owner.
#[derive(Debug)]
pub(crate) struct TimerKeys {
    next: AtomicU64,
}

impl TimerKeys {
    pub(crate) const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocates a fresh id: a new key plus a new global sequence.
    pub(crate) fn allocate(&self) -> TimerId {
        let key = TimerKey(self.next.fetch_add(1, Ordering::Relaxed));
        TimerId::new(key, sequence::next_sequence())
    }
}

/// One scheduled callback.
///
/// Owned by its [`TimerQueue`](super::TimerQueue) from insertion until it
/// fires as a one-shot, is cancelled, or the queue is dropped.
pub struct Timer {
    callback: TimerCallback,
    expiration: Timestamp,
    interval: Duration,
    repeat: bool,
    id: TimerId,
}

impl Timer {
    pub(crate) fn new(
        id: TimerId,
        callback: TimerCallback,
        when: Timestamp,
        interval: Duration,
    ) -> Self {
        Self {
            callback,
            expiration: when,
            interval,
            repeat: !interval.is_zero(),
            id,
        }
    }

    /// Next fire time, or [`Timestamp::INVALID`] once a one-shot is retired.
    #[must_use]
    pub const fn expiration(&self) -> Timestamp {
        self.expiration
    }

    /// Repeat interval; zero for one-shots.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns true if the timer reschedules itself after firing.
    #[must_use]
    pub const fn repeat(&self) -> bool {
        self.repeat
    }

    /// Globally unique sequence number.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.id.sequence
    }

    pub(crate) const fn key(&self) -> TimerKey {
        self.id.key
    }

    pub(crate) const fn id(&self) -> TimerId {
        self.id
    }

    /// Invokes the callback once, synchronously. Panics propagate.
    pub fn run(&mut self) {
        (self.callback)();
    }

    /// Moves the expiration forward after a firing, or retires a one-shot.
    pub fn restart(&mut self, now: Timestamp, behavior: MissedTickBehavior) {
        self.expiration = if self.repeat {
            behavior.next_expiration(self.expiration, now, self.interval)
        } else {
            Timestamp::INVALID
        };
    }

    /// Number of timer sequences issued in this process so far.
    #[must_use]
    pub fn num_created() -> u64 {
        sequence::num_created()
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.id)
            .field("expiration", &self.expiration)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
