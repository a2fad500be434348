//! Cross-thread access to an [`EventLoop`].
//!
//! A [`LoopHandle`] never touches the timer queue itself. Every operation is
//! packaged as a functor and either run immediately (caller is the loop
//! thread) or pushed onto the loop's lock-free queue followed by a reactor
//! wakeup. Callers never block and never learn when the functor ran.
//!
//! ```text
//!   any thread                         loop thread
//!   ──────────                         ───────────
//!   run_after(cb) ─┬─ allocate TimerId
//!                  ├─ push functor ──▶ SegQueue ──▶ do_pending_functors
//!                  └─ wake reactor ──▶ poll returns     └─ insert Timer
//!   returns TimerId
//! ```
//!
//! The returned [`TimerId`] is valid immediately, but a `cancel` racing the
//! insertion from a third thread may arrive first and find nothing.

use super::event_loop::EventLoop;
use super::reactor::Reactor;
use crate::error::{Error, ErrorKind, Result};
use crate::time::{TimeSource, TimerKeys};
use crate::types::{TimerId, Timestamp};
use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

pub(crate) type Functor = Box<dyn FnOnce(&EventLoop) + Send>;

/// State shared between a loop and its handles.
pub(crate) struct LoopShared {
    pub(crate) owner: ThreadId,
    pub(crate) pending: SegQueue<Functor>,
    pub(crate) reactor: Arc<dyn Reactor>,
    pub(crate) quit: AtomicBool,
    pub(crate) calling_pending: AtomicBool,
    pub(crate) alive: AtomicBool,
    pub(crate) keys: Arc<TimerKeys>,
    pub(crate) clock: Arc<dyn TimeSource>,
}

/// `Send + Sync` handle to an [`EventLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<LoopShared>,
}

impl LoopHandle {
    pub(crate) fn new(shared: Arc<LoopShared>) -> Self {
        Self { shared }
    }

    /// Returns true if the caller is the loop's thread.
    #[must_use]
    pub fn is_in_loop_thread(&self) -> bool {
        thread::current().id() == self.shared.owner
    }

    /// Fails unless the caller is the loop's thread.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotInLoopThread`] naming both threads.
    pub fn assert_in_loop_thread(&self) -> Result<()> {
        if self.is_in_loop_thread() {
            return Ok(());
        }
        Err(Error::new(ErrorKind::NotInLoopThread).with_message(format!(
            "loop owned by {:?}, called from {:?}",
            self.shared.owner,
            thread::current().id()
        )))
    }

    /// Returns true while the loop has not been dropped.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    /// Current time from the loop's clock.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.shared.clock.now()
    }

    /// Runs `f` on the loop thread: immediately if already there, otherwise
    /// after the loop wakes.
    pub fn run_in_loop<F>(&self, f: F)
    where
        F: FnOnce(&EventLoop) + Send + 'static,
    {
        if self.is_in_loop_thread() {
            match EventLoop::current() {
                Some(event_loop) if event_loop.shares(&self.shared) => f(&event_loop),
                _ => tracing::warn!("loop no longer exists; functor dropped"),
            }
            return;
        }
        self.queue_in_loop(f);
    }

    /// Queues `f` to run on the loop thread during a later turn, even when
    /// called from the loop thread.
    ///
    /// Functors run in the order they were queued. If the loop is gone, `f`
    /// is dropped on the calling thread.
    pub fn queue_in_loop<F>(&self, f: F)
    where
        F: FnOnce(&EventLoop) + Send + 'static,
    {
        if !self.is_alive() {
            tracing::warn!("loop no longer exists; functor dropped");
            return;
        }
        self.shared.pending.push(Box::new(f));
        if !self.is_alive() {
            // The loop was dropped between the check and the push, possibly
            // after its final drain.
            let dropped = self.drain_stranded();
            tracing::warn!(dropped, "loop exited while queueing; functors dropped");
            return;
        }
        tracing::debug!(pending = self.shared.pending.len(), "functor queued");

        if !self.is_in_loop_thread() || self.shared.calling_pending.load(Ordering::Acquire) {
            if let Err(e) = self.wakeup() {
                tracing::error!(error = %e, "failed to wake event loop");
            }
        }
    }

    fn drain_stranded(&self) -> usize {
        let mut dropped = 0;
        while self.shared.pending.pop().is_some() {
            dropped += 1;
        }
        dropped
    }

    /// Interrupts the loop's current poll.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::Wakeup`] if the reactor notifier fails.
    pub fn wakeup(&self) -> Result<()> {
        self.shared.reactor.wake().map_err(|e| {
            Error::new(ErrorKind::Wakeup)
                .with_message("reactor notify failed")
                .with_source(e)
        })
    }

    /// Asks the loop to return from [`EventLoop::run`] after its current turn.
    pub fn quit(&self) {
        self.shared.quit.store(true, Ordering::Release);
        if !self.is_in_loop_thread() {
            if let Err(e) = self.wakeup() {
                tracing::error!(error = %e, "failed to wake event loop for quit");
            }
        }
    }

    /// Schedules `callback` once at `when`.
    pub fn run_at<F>(&self, when: Timestamp, callback: F) -> TimerId
    where
        F: FnMut() + Send + 'static,
    {
        self.add_timer(callback, when, Duration::ZERO)
    }

    /// Schedules `callback` once after `delay`.
    pub fn run_after<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: FnMut() + Send + 'static,
    {
        self.run_at(self.now() + delay, callback)
    }

    /// Schedules `callback` every `interval`, first after one interval.
    pub fn run_every<F>(&self, interval: Duration, callback: F) -> TimerId
    where
        F: FnMut() + Send + 'static,
    {
        self.add_timer(callback, self.now() + interval, interval)
    }

    /// Schedules `callback` at `when`, repeating every `interval` if non-zero.
    ///
    /// The id is allocated here, on the calling thread; the insertion happens
    /// on the loop thread. Returns [`TimerId::NONE`] if the loop is already
    /// gone.
    pub fn add_timer<F>(&self, callback: F, when: Timestamp, interval: Duration) -> TimerId
    where
        F: FnMut() + Send + 'static,
    {
        if !self.is_alive() {
            tracing::warn!("loop no longer exists; timer not scheduled");
            return TimerId::NONE;
        }
        let id = self.shared.keys.allocate();
        self.run_in_loop(move |event_loop| {
            event_loop.insert_marshaled(id, Box::new(callback), when, interval);
        });
        id
    }

    /// Cancels `id` on the loop thread. Unknown or stale ids are ignored.
    pub fn cancel(&self, id: TimerId) {
        self.run_in_loop(move |event_loop| {
            event_loop.cancel(id);
        });
    }
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("owner", &self.shared.owner)
            .field("alive", &self.is_alive())
            .field("pending", &self.shared.pending.len())
            .finish()
    }
}
