//! Identifier types for timers.

use core::fmt;

/// Identity of a timer slot within one [`TimerQueue`](crate::time::TimerQueue).
///
/// Keys are handed out by the queue's allocator in creation order and are
/// never reused, so on equal expirations they break ties deterministically.
/// Key zero is reserved for [`TimerId::NONE`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimerKey(pub(crate) u64);

impl TimerKey {
    /// Returns the raw key value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimerKey({})", self.0)
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "K{}", self.0)
    }
}

/// Opaque cancellation handle for a scheduled timer.
///
/// A `TimerId` never grants access to the timer it names; its only use is to
/// be passed back to the queue (or loop) that issued it. Passing it to a
/// different queue is a caller error with unspecified (but memory-safe)
/// results. The default value names no timer.
#[derive(Clone, Copy, Default)]
pub struct TimerId {
    pub(crate) key: TimerKey,
    pub(crate) sequence: u64,
}

impl TimerId {
    /// A handle that names no timer; cancelling it is a no-op.
    pub const NONE: Self = Self {
        key: TimerKey(0),
        sequence: 0,
    };

    pub(crate) const fn new(key: TimerKey, sequence: u64) -> Self {
        Self { key, sequence }
    }

    /// Returns true if this handle names no timer.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.key.0 == 0 && self.sequence == 0
    }

    pub(crate) const fn active(self) -> ActiveTimer {
        ActiveTimer {
            key: self.key,
            sequence: self.sequence,
        }
    }
}

impl fmt::Debug for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("TimerId(none)")
        } else {
            write!(f, "TimerId({}#{})", self.key, self.sequence)
        }
    }
}

/// Key of the identity index: `(identity, sequence)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct ActiveTimer {
    pub(crate) key: TimerKey,
    pub(crate) sequence: u64,
}
