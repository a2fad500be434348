//! The owning event loop.
//!
//! An [`EventLoop`] is pinned to the thread that created it (it is `!Send`)
//! and owns that thread's [`TimerQueue`]. Each [`turn`](EventLoop::turn):
//!
//! 1. blocks in the reactor until the timer facility is readable, a
//!    [`LoopHandle`] wakes it, or the poll timeout passes;
//! 2. runs every due timer callback ([`TimerQueue::handle_read`]);
//! 3. drains the functors queued from other threads, in arrival order.
//!
//! Functors queued while step 3 is running wait for the next turn; the queue
//! wakes the reactor so that turn does not block.
//!
//! At most one loop exists per thread; a thread-local tracks it so that
//! [`EventLoop::current`] and same-thread [`LoopHandle::run_in_loop`] calls can
//! reach it.

use super::builder::LoopBuilder;
use super::config::LoopConfig;
use super::handle::{LoopHandle, LoopShared};
use super::reactor::{Events, Interest, PollReactor, Reactor, Token};
use crate::error::{Error, ErrorKind, Result};
use crate::time::{
    CancelOutcome, TimeSource, Timer, TimerCallback, TimerFacility, TimerKeys, TimerQueue,
};
use crate::types::{TimerId, Timestamp};
use crossbeam_queue::SegQueue;
use std::cell::{Cell, RefCell};
use std::io;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Reactor token of the timer facility descriptor.
pub(crate) const TIMER_TOKEN: Token = Token(0);

thread_local! {
    static CURRENT: RefCell<Weak<LoopInner>> = const { RefCell::new(Weak::new()) };
}

struct LoopInner {
    shared: Arc<LoopShared>,
    queue: TimerQueue,
    events: RefCell<Events>,
    poll_timeout: Duration,
    facility_registered: bool,
    looping: Cell<bool>,
    in_turn: Cell<bool>,
    iteration: Cell<u64>,
    fatal: RefCell<Option<Error>>,
}

impl Drop for LoopInner {
    fn drop(&mut self) {
        self.shared.alive.store(false, Ordering::SeqCst);
        if self.facility_registered {
            let reactor = &self.shared.reactor;
            let result = self
                .queue
                .with_facility_fd(|fd| fd.map(|fd| reactor.deregister(fd, TIMER_TOKEN)));
            if let Some(Err(e)) = result {
                tracing::warn!(error = %e, "failed to deregister timer facility");
            }
        }
        let mut dropped = 0usize;
        while self.shared.pending.pop().is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::warn!(dropped, "event loop dropped with queued functors");
        }
        tracing::debug!(
            iterations = self.iteration.get(),
            timers = self.queue.len(),
            "event loop destroyed"
        );
    }
}

/// Resets a flag when the scope ends, including by unwinding.
struct FlagGuard<'a>(&'a Cell<bool>);

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Reactor loop that owns one thread's timers.
///
/// # Example
///
/// ```no_run
/// use reactimer::EventLoop;
/// use std::time::Duration;
///
/// let event_loop = EventLoop::new()?;
/// let handle = event_loop.handle();
/// event_loop.run_after(Duration::from_millis(10), move || handle.quit())?;
/// event_loop.run()?;
/// # Ok::<(), reactimer::Error>(())
/// ```
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

impl EventLoop {
    /// Creates a loop on the calling thread with default configuration, the
    /// system clock, and the platform timer facility.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::LoopAlreadyExists`] if this thread already has a loop
    /// - [`ErrorKind::TimerFacility`] / [`ErrorKind::Reactor`] if the OS
    ///   resources cannot be created
    /// - [`ErrorKind::Unsupported`] where no timer facility exists
    pub fn new() -> Result<Self> {
        LoopBuilder::new().build()
    }

    /// Returns a builder for a customized loop.
    #[must_use]
    pub fn builder() -> LoopBuilder {
        LoopBuilder::new()
    }

    pub(crate) fn from_parts(
        config: &LoopConfig,
        facility: Box<dyn TimerFacility>,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        if CURRENT.with(|current| current.borrow().upgrade().is_some()) {
            return Err(Error::new(ErrorKind::LoopAlreadyExists).with_message(format!(
                "thread {:?} already owns an event loop",
                thread::current().id()
            )));
        }

        let reactor: Arc<dyn Reactor> =
            Arc::new(PollReactor::new().map_err(|e| Error::reactor("create", e))?);
        let keys = Arc::new(TimerKeys::new());
        let queue = TimerQueue::with_keys(facility, Arc::clone(&clock), Arc::clone(&keys))
            .with_missed_tick_behavior(config.missed_tick_behavior)
            .with_panic_policy(config.callback_panic);

        let facility_registered = queue
            .with_facility_fd(|fd| {
                fd.map(|fd| reactor.register(fd, TIMER_TOKEN, Interest::READABLE))
                    .transpose()
            })
            .map_err(|e| Error::reactor("register", e))?
            .is_some();

        let shared = Arc::new(LoopShared {
            owner: thread::current().id(),
            pending: SegQueue::new(),
            reactor,
            quit: AtomicBool::new(false),
            calling_pending: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            keys,
            clock,
        });
        let inner = Rc::new(LoopInner {
            shared,
            queue,
            events: RefCell::new(Events::with_capacity(config.events_capacity)),
            poll_timeout: config.poll_timeout,
            facility_registered,
            looping: Cell::new(false),
            in_turn: Cell::new(false),
            iteration: Cell::new(0),
            fatal: RefCell::new(None),
        });
        CURRENT.with(|current| *current.borrow_mut() = Rc::downgrade(&inner));

        tracing::debug!(
            thread = ?inner.shared.owner,
            facility_registered,
            poll_timeout_ms = inner.poll_timeout.as_millis() as u64,
            "event loop created"
        );
        Ok(Self { inner })
    }

    /// The loop owned by the calling thread, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT
            .with(|current| current.borrow().upgrade())
            .map(|inner| Self { inner })
    }

    pub(crate) fn shares(&self, shared: &Arc<LoopShared>) -> bool {
        Arc::ptr_eq(&self.inner.shared, shared)
    }

    /// Returns a `Send + Sync` handle for other threads.
    #[must_use]
    pub fn handle(&self) -> LoopHandle {
        LoopHandle::new(Arc::clone(&self.inner.shared))
    }

    /// The loop's timer queue.
    #[must_use]
    pub fn timer_queue(&self) -> &TimerQueue {
        &self.inner.queue
    }

    /// Current time from the loop's clock.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.inner.shared.clock.now()
    }

    /// Number of completed turns.
    #[must_use]
    pub fn iteration(&self) -> u64 {
        self.inner.iteration.get()
    }

    /// Runs `callback` once at `when`.
    ///
    /// # Errors
    ///
    /// Fatal facility errors from re-arming.
    pub fn run_at<F>(&self, when: Timestamp, callback: F) -> Result<TimerId>
    where
        F: FnMut() + 'static,
    {
        self.inner.queue.add_timer(callback, when, Duration::ZERO)
    }

    /// Runs `callback` once after `delay`.
    ///
    /// # Errors
    ///
    /// Fatal facility errors from re-arming.
    pub fn run_after<F>(&self, delay: Duration, callback: F) -> Result<TimerId>
    where
        F: FnMut() + 'static,
    {
        self.run_at(self.now() + delay, callback)
    }

    /// Runs `callback` every `interval`, first after one interval.
    ///
    /// # Errors
    ///
    /// Fatal facility errors from re-arming.
    pub fn run_every<F>(&self, interval: Duration, callback: F) -> Result<TimerId>
    where
        F: FnMut() + 'static,
    {
        self.inner
            .queue
            .add_timer(callback, self.now() + interval, interval)
    }

    /// Cancels a timer created by this loop.
    pub fn cancel(&self, id: TimerId) -> CancelOutcome {
        self.inner.queue.cancel(id)
    }

    /// Inserts a timer whose id was allocated on another thread.
    pub(crate) fn insert_marshaled(
        &self,
        id: TimerId,
        callback: TimerCallback,
        when: Timestamp,
        interval: Duration,
    ) {
        let timer = Timer::new(id, callback, when, interval);
        if let Err(e) = self.inner.queue.insert_timer(timer) {
            self.record_fatal(e);
        }
    }

    /// Stores an error raised where no caller can receive it. The next
    /// [`turn`](Self::turn) returns it.
    pub(crate) fn record_fatal(&self, error: Error) {
        tracing::error!(error = %error, "fatal error in marshaled functor");
        let mut slot = self.inner.fatal.borrow_mut();
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    fn take_fatal(&self) -> Result<()> {
        match self.inner.fatal.borrow_mut().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Asks [`run`](Self::run) to return after the current turn.
    pub fn quit(&self) {
        self.inner.shared.quit.store(true, Ordering::Release);
    }

    /// Runs turns until [`quit`](Self::quit) is called or a fatal error occurs.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::LoopAlreadyRunning`] if called from inside `run`
    /// - any fatal error returned by [`turn`](Self::turn)
    ///
    /// # Panics
    ///
    /// Re-raises timer callback panics under
    /// [`CallbackPanicPolicy::Propagate`](super::CallbackPanicPolicy::Propagate).
    pub fn run(&self) -> Result<()> {
        if self.inner.looping.replace(true) {
            return Err(Error::new(ErrorKind::LoopAlreadyRunning));
        }
        let _looping = FlagGuard(&self.inner.looping);
        tracing::info!(thread = ?self.inner.shared.owner, "event loop running");

        let result = loop {
            if self.inner.shared.quit.load(Ordering::Acquire) {
                break Ok(());
            }
            if let Err(e) = self.turn() {
                break Err(e);
            }
        };
        self.inner.shared.quit.store(false, Ordering::Release);

        match &result {
            Ok(()) => tracing::info!(iterations = self.iteration(), "event loop stopped"),
            Err(e) => tracing::error!(error = %e, "event loop stopped on fatal error"),
        }
        result
    }

    /// Performs one poll, timer dispatch, and functor drain.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::LoopAlreadyRunning`] if called from inside a turn
    /// - fatal reactor or facility errors, including ones recorded by
    ///   marshaled functors
    pub fn turn(&self) -> Result<()> {
        if self.inner.in_turn.replace(true) {
            return Err(Error::new(ErrorKind::LoopAlreadyRunning)
                .with_message("turn re-entered from a callback"));
        }
        let _in_turn = FlagGuard(&self.inner.in_turn);
        self.take_fatal()?;

        let timeout = self.poll_timeout();
        let timer_ready = {
            let mut events = self.inner.events.borrow_mut();
            match self.inner.shared.reactor.poll(&mut events, Some(timeout)) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => events.clear(),
                Err(e) => {
                    tracing::error!(error = %e, "reactor poll failed");
                    return Err(Error::reactor("poll", e));
                }
            }
            events
                .iter()
                .any(|event| event.token == TIMER_TOKEN && event.is_readable())
        };
        self.inner.iteration.set(self.inner.iteration.get() + 1);

        if timer_ready || self.unregistered_timer_due() {
            self.inner.queue.handle_read()?;
        }
        self.do_pending_functors();
        self.take_fatal()
    }

    fn poll_timeout(&self) -> Duration {
        if !self.inner.shared.pending.is_empty() {
            return Duration::ZERO;
        }
        if self.inner.facility_registered {
            return self.inner.poll_timeout;
        }
        // Without a descriptor the deadline has to bound the wait itself.
        self.inner.queue.next_expiration().map_or(self.inner.poll_timeout, |next| {
            next.saturating_duration_since(self.now())
                .min(self.inner.poll_timeout)
        })
    }

    fn unregistered_timer_due(&self) -> bool {
        !self.inner.facility_registered
            && self
                .inner
                .queue
                .next_expiration()
                .is_some_and(|next| next <= self.now())
    }

    fn do_pending_functors(&self) {
        let shared = &self.inner.shared;
        shared.calling_pending.store(true, Ordering::Release);
        let _calling = CallingPending(&shared.calling_pending);

        let batch = shared.pending.len();
        let mut ran = 0usize;
        while ran < batch {
            let Some(functor) = shared.pending.pop() else {
                break;
            };
            functor(self);
            ran += 1;
        }
        if ran > 0 {
            tracing::trace!(ran, "pending functors drained");
        }
    }
}

struct CallingPending<'a>(&'a AtomicBool);

impl Drop for CallingPending<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("thread", &self.inner.shared.owner)
            .field("iteration", &self.inner.iteration.get())
            .field("queue", &self.inner.queue)
            .finish_non_exhaustive()
    }
}
