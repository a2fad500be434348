//! Reactor abstraction for descriptor readiness.
//!
//! The event loop blocks in exactly one place: [`Reactor::poll`]. Everything
//! that can wake it is a registered descriptor (the timer facility) or the
//! reactor's own notifier (cross-thread functors, quit).
//!
//! ```text
//! ┌────────────────────────────── EventLoop ──────────────────────────────┐
//! │                                                                       │
//! │   TimerQueue ── facility fd ──┐                                       │
//! │                               ▼                                       │
//! │                        ┌─────────────┐        ┌──────────────────┐    │
//! │   LoopHandle ── wake ─▶│   Reactor   │──────▶ │ Events (token →  │    │
//! │   (any thread)         │ (PollReactor)│       │  readiness)      │    │
//! │                        └─────────────┘        └──────────────────┘    │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Reactor`] | Trait for readiness backends |
//! | [`Interest`] | Readiness to wait for |
//! | [`Events`] | Container for poll results |
//! | [`Event`] | Single readiness notification |
//! | [`Token`] | Identifier linking registrations to events |
//!
//! # Level Triggering
//!
//! [`PollReactor`] registers descriptors level-triggered: a timer descriptor
//! that has not been acknowledged keeps reporting readable, so a missed event
//! is retried on the next poll instead of being lost.

pub mod interest;
pub mod poll;

pub use interest::Interest;
pub use poll::PollReactor;

use std::io;
use std::os::fd::BorrowedFd;
use std::time::Duration;

/// Token identifying a registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub usize);

impl Token {
    /// Creates a new token.
    #[must_use]
    pub const fn new(val: usize) -> Self {
        Self(val)
    }
}

/// Readiness event from the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Token identifying the registered source.
    pub token: Token,
    /// Readiness flags that triggered.
    pub ready: Interest,
}

impl Event {
    /// Creates a new event with specified token and readiness flags.
    #[must_use]
    pub const fn new(token: Token, ready: Interest) -> Self {
        Self { token, ready }
    }

    /// Creates a readable event.
    #[must_use]
    pub const fn readable(token: Token) -> Self {
        Self {
            token,
            ready: Interest::READABLE,
        }
    }

    /// Returns true if the source is readable.
    #[must_use]
    pub const fn is_readable(&self) -> bool {
        self.ready.is_readable()
    }
}

/// Container for events returned by [`Reactor::poll`].
///
/// Re-use across polls to avoid allocation.
#[derive(Debug)]
pub struct Events {
    inner: Vec<Event>,
    capacity: usize,
}

impl Events {
    /// Creates a new events buffer with the given capacity.
    ///
    /// The capacity limits the maximum number of events that can be stored.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Clears all events, maintaining capacity.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Pushes an event.
    ///
    /// Events beyond capacity are dropped; level triggering reports them again
    /// on the next poll.
    pub(crate) fn push(&mut self, event: Event) {
        if self.inner.len() < self.capacity {
            self.inner.push(event);
        }
    }

    /// Returns the number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if no events are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the capacity (maximum number of events).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterates over events.
    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.inner.iter()
    }
}

impl<'a> IntoIterator for &'a Events {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Readiness backend shared between a loop and its handles.
///
/// Implementations must be `Send + Sync`: [`wake`](Self::wake) is called from
/// arbitrary threads while the owner blocks in [`poll`](Self::poll).
pub trait Reactor: Send + Sync + std::fmt::Debug {
    /// Registers `fd` for `interest`, reported under `token`.
    ///
    /// The caller must keep the descriptor open until it is deregistered.
    ///
    /// # Errors
    ///
    /// - `io::ErrorKind::AlreadyExists` if `token` is already registered
    /// - platform errors from the backend
    fn register(&self, fd: BorrowedFd<'_>, token: Token, interest: Interest) -> io::Result<()>;

    /// Removes the registration for `token`.
    ///
    /// # Errors
    ///
    /// - `io::ErrorKind::NotFound` if `token` is not registered
    /// - platform errors from the backend
    fn deregister(&self, fd: BorrowedFd<'_>, token: Token) -> io::Result<()>;

    /// Waits up to `timeout` (forever if `None`) and fills `events`.
    ///
    /// Returns the number of events stored. A [`wake`](Self::wake) returns
    /// early with zero events.
    ///
    /// # Errors
    ///
    /// Platform errors from the wait. `Interrupted` is left to the caller.
    fn poll(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize>;

    /// Interrupts a blocking [`poll`](Self::poll) from any thread.
    ///
    /// Multiple wakes before the next poll coalesce into one.
    ///
    /// # Errors
    ///
    /// Platform errors from the notifier.
    fn wake(&self) -> io::Result<()>;

    /// Returns the number of active registrations.
    fn registration_count(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn event_readable() {
        init_test("event_readable");
        let event = Event::readable(Token::new(7));
        crate::assert_with_log!(event.is_readable(), "readable flag", true, event.is_readable());
        assert_eq!(event.token, Token(7));
        crate::test_complete!("event_readable");
    }

    #[test]
    fn events_capacity_limit_respected() {
        init_test("events_capacity_limit_respected");
        let mut events = Events::with_capacity(2);
        for i in 0..5 {
            events.push(Event::readable(Token::new(i)));
        }
        crate::assert_with_log!(events.len() == 2, "len capped", 2usize, events.len());
        let tokens: Vec<_> = events.iter().map(|e| e.token.0).collect();
        assert_eq!(tokens, vec![0, 1]);

        events.clear();
        assert!(events.is_empty());
        assert_eq!(events.capacity(), 2);
        crate::test_complete!("events_capacity_limit_respected");
    }

    #[test]
    fn token_ordering() {
        assert!(Token::new(1) < Token::new(2));
        assert_eq!(Token::new(3), Token(3));
    }
}
