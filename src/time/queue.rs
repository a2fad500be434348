//! Thread-confined timer queue.
//!
//! [`TimerQueue`] owns every live [`Timer`] of one event loop and keeps them in
//! two indices that agree whenever no expiry batch is in flight:
//!
//! | Index | Key | Value | Used for |
//! |-------|-----|-------|----------|
//! | time-ordered | `(expiration, key)` | the `Timer` (owner) | due scan, next deadline |
//! | identity | `(key, sequence)` | expiration | cancel lookup |
//!
//! The identity index stores only the expiration, which together with the key
//! locates the owning entry in the time-ordered index; there are no pointers
//! shared between the two.
//!
//! # Expiry processing
//!
//! ```text
//!   facility readable
//!         │
//!         ▼
//!   acknowledge ──▶ take_expired(now) ──▶ run callbacks ──▶ reset ──▶ re-arm
//!                   (leaves both indices)  (phase =           (repeaters back in,
//!                                          ProcessingBatch)    others dropped)
//! ```
//!
//! While callbacks run, the queue is in [`QueuePhase::ProcessingBatch`] and no
//! `RefCell` borrow is held, so callbacks may call [`TimerQueue::add_timer`] and
//! [`TimerQueue::cancel`] re-entrantly. A cancel that misses both indices in
//! that phase is recorded in the batch's rejection set. A batch member in that
//! set is skipped if it has not run yet, and the reset step refuses to
//! reschedule anything in it. A repeating timer cancelled by itself, or by a
//! sibling in the same batch, therefore never runs again.
//!
//! # Thread confinement
//!
//! `TimerQueue` is `!Send` and `!Sync`; no lock guards the indices. Other
//! threads reach it only through [`LoopHandle`](crate::runtime::LoopHandle),
//! which marshals closures onto the owning thread.

use super::facility::TimerFacility;
use super::timer::{MissedTickBehavior, Timer, TimerKeys};
use super::TimeSource;
use crate::error::{Error, Result};
use crate::runtime::config::CallbackPanicPolicy;
use crate::types::id::ActiveTimer;
use crate::types::{TimerId, TimerKey, Timestamp};
use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// Time-ordered index key. The key half keeps equal expirations distinct.
type Entry = (Timestamp, TimerKey);

/// Externally observable processing phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePhase {
    /// No expiry batch in flight; both indices agree.
    Idle,
    /// Callbacks of an expiry batch are running.
    ProcessingBatch,
}

/// Result of [`TimerQueue::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The timer was live and has been destroyed.
    Removed,
    /// The timer is not indexed but a batch is running; it will not be
    /// rescheduled.
    Deferred,
    /// Unknown, already fired as a one-shot, or already cancelled.
    NotFound,
}

/// Counters for queue diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStats {
    /// Timers inserted.
    pub added: u64,
    /// Callback invocations.
    pub fired: u64,
    /// Repeating timers put back after firing.
    pub rescheduled: u64,
    /// Timers removed by cancel while indexed.
    pub canceled: u64,
    /// Cancels recorded in a batch's rejection set.
    pub deferred_cancels: u64,
    /// Facility arm calls.
    pub arms: u64,
    /// Facility disarm calls.
    pub disarms: u64,
    /// Callbacks that panicked.
    pub panics: u64,
}

enum Phase {
    Idle,
    ProcessingBatch { canceled: BTreeSet<ActiveTimer> },
}

struct Inner {
    timers: BTreeMap<Entry, Timer>,
    active: BTreeMap<ActiveTimer, Timestamp>,
    phase: Phase,
    facility: Box<dyn TimerFacility>,
    stats: TimerStats,
}

impl Inner {
    /// Inserts into both indices. Returns true if `timer` is now the earliest.
    fn insert(&mut self, timer: Timer) -> bool {
        let when = timer.expiration();
        let key = timer.key();
        let earliest_changed = self
            .timers
            .keys()
            .next()
            .map_or(true, |&(first, _)| when < first);

        let prev = self.active.insert(timer.id().active(), when);
        debug_assert!(prev.is_none(), "timer {key} indexed twice");
        let prev = self.timers.insert((when, key), timer);
        debug_assert!(prev.is_none(), "timer {key} indexed twice");

        tracing::trace!(%key, expiration = %when, earliest_changed, "timer inserted");
        earliest_changed
    }

    /// Moves every timer with `expiration <= now` out of both indices.
    fn take_expired(&mut self, now: Timestamp) -> Vec<Timer> {
        let sentry = (now, TimerKey(u64::MAX));
        let pending = self.timers.split_off(&sentry);
        let expired = mem::replace(&mut self.timers, pending);

        expired
            .into_values()
            .inspect(|timer| {
                let removed = self.active.remove(&timer.id().active());
                debug_assert!(removed.is_some(), "expired timer missing from identity index");
            })
            .collect()
    }

    /// Reinserts repeating timers that were not cancelled during the batch and
    /// hands back the rest for destruction.
    fn reset(
        &mut self,
        expired: Vec<Timer>,
        canceled: &BTreeSet<ActiveTimer>,
        now: Timestamp,
        behavior: MissedTickBehavior,
    ) -> Vec<Timer> {
        let mut retired = Vec::new();
        for mut timer in expired {
            if timer.repeat() && !canceled.contains(&timer.id().active()) {
                timer.restart(now, behavior);
                self.stats.rescheduled += 1;
                self.insert(timer);
            } else {
                retired.push(timer);
            }
        }
        retired
    }

    fn arm(&mut self, deadline: Timestamp, now: Timestamp) -> Result<()> {
        self.facility.arm(deadline, now).map_err(|e| {
            tracing::error!(error = %e, %deadline, "failed to arm timer facility");
            Error::facility("arm", e)
        })?;
        self.stats.arms += 1;
        tracing::debug!(%deadline, %now, "timer facility armed");
        Ok(())
    }

    /// Programs the facility for the earliest remaining timer, or disarms it.
    fn rearm(&mut self, now: Timestamp) -> Result<()> {
        if let Some(&(next, _)) = self.timers.keys().next() {
            return self.arm(next, now);
        }
        self.facility.disarm().map_err(|e| {
            tracing::error!(error = %e, "failed to disarm timer facility");
            Error::facility("disarm", e)
        })?;
        self.stats.disarms += 1;
        tracing::debug!("timer facility disarmed");
        Ok(())
    }
}

/// Owner of all live timers for one event loop.
///
/// # Example
///
/// ```
/// use reactimer::time::{LabFacility, TimeSource, TimerQueue, VirtualClock};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let clock = Arc::new(VirtualClock::default());
/// let queue = TimerQueue::new(Box::new(LabFacility::new()), clock.clone());
///
/// let when = clock.now() + Duration::from_millis(100);
/// let id = queue.add_timer(|| println!("fired"), when, Duration::ZERO)?;
/// assert_eq!(queue.len(), 1);
///
/// queue.cancel(id);
/// assert!(queue.is_empty());
/// # Ok::<(), reactimer::Error>(())
/// ```
pub struct TimerQueue {
    inner: RefCell<Inner>,
    clock: Arc<dyn TimeSource>,
    keys: Arc<TimerKeys>,
    missed_tick: MissedTickBehavior,
    panic_policy: CallbackPanicPolicy,
}

impl TimerQueue {
    /// Creates an empty queue driving `facility`, reading time from `clock`.
    #[must_use]
    pub fn new(facility: Box<dyn TimerFacility>, clock: Arc<dyn TimeSource>) -> Self {
        Self::with_keys(facility, clock, Arc::new(TimerKeys::new()))
    }

    pub(crate) fn with_keys(
        facility: Box<dyn TimerFacility>,
        clock: Arc<dyn TimeSource>,
        keys: Arc<TimerKeys>,
    ) -> Self {
        Self {
            inner: RefCell::new(Inner {
                timers: BTreeMap::new(),
                active: BTreeMap::new(),
                phase: Phase::Idle,
                facility,
                stats: TimerStats::default(),
            }),
            clock,
            keys,
            missed_tick: MissedTickBehavior::default(),
            panic_policy: CallbackPanicPolicy::default(),
        }
    }

    /// Sets how repeating timers catch up after a late firing.
    #[must_use]
    pub fn with_missed_tick_behavior(mut self, behavior: MissedTickBehavior) -> Self {
        self.missed_tick = behavior;
        self
    }

    /// Sets what happens after a callback panics.
    #[must_use]
    pub fn with_panic_policy(mut self, policy: CallbackPanicPolicy) -> Self {
        self.panic_policy = policy;
        self
    }

    pub(crate) fn keys(&self) -> &Arc<TimerKeys> {
        &self.keys
    }

    /// Returns the queue's time source.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn TimeSource> {
        &self.clock
    }

    /// Schedules `callback` at `when`, repeating every `interval` if non-zero.
    ///
    /// The facility is reprogrammed only if the new timer becomes the earliest.
    ///
    /// # Errors
    ///
    /// Returns a fatal [`ErrorKind::TimerFacility`](crate::ErrorKind::TimerFacility)
    /// error if re-arming fails; the timer stays scheduled.
    pub fn add_timer<F>(&self, callback: F, when: Timestamp, interval: Duration) -> Result<TimerId>
    where
        F: FnMut() + 'static,
    {
        let id = self.keys.allocate();
        self.insert_timer(Timer::new(id, Box::new(callback), when, interval))?;
        Ok(id)
    }

    pub(crate) fn insert_timer(&self, timer: Timer) -> Result<()> {
        let when = timer.expiration();
        let mut inner = self.inner.borrow_mut();
        inner.stats.added += 1;
        if inner.insert(timer) {
            inner.arm(when, self.clock.now())?;
        }
        Ok(())
    }

    /// Cancels the timer named by `id`.
    ///
    /// Cancelling twice, or cancelling a one-shot that already fired, is a
    /// no-op. The facility is not reprogrammed; a wakeup for a cancelled
    /// deadline simply finds nothing due.
    pub fn cancel(&self, id: TimerId) -> CancelOutcome {
        if id.is_none() {
            return CancelOutcome::NotFound;
        }
        let active = id.active();
        let mut inner = self.inner.borrow_mut();

        if let Some(when) = inner.active.remove(&active) {
            let timer = inner.timers.remove(&(when, id.key));
            debug_assert!(timer.is_some(), "identity index out of sync for {id:?}");
            inner.stats.canceled += 1;
            drop(inner);
            tracing::trace!(timer = ?id, "timer cancelled");
            // Callback captures may re-enter the queue when dropped.
            drop(timer);
            return CancelOutcome::Removed;
        }

        let Inner { phase, stats, .. } = &mut *inner;
        match phase {
            Phase::ProcessingBatch { canceled } => {
                canceled.insert(active);
                stats.deferred_cancels += 1;
                tracing::trace!(timer = ?id, "cancel deferred to end of batch");
                CancelOutcome::Deferred
            }
            Phase::Idle => CancelOutcome::NotFound,
        }
    }

    /// Handles a readable event from the facility: runs every due callback,
    /// reschedules repeating timers, and reprograms the facility.
    ///
    /// Returns the number of callbacks run. Due timers cancelled by an earlier
    /// callback of the same batch are not run and not counted.
    ///
    /// # Errors
    ///
    /// Fatal facility errors from the read or the re-arm. A re-arm failure is
    /// reported only after the whole batch has been processed.
    ///
    /// # Panics
    ///
    /// With [`CallbackPanicPolicy::Propagate`], re-raises the first callback
    /// panic of the batch after all bookkeeping is complete.
    pub fn handle_read(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut expired = {
            let mut inner = self.inner.borrow_mut();
            if matches!(inner.phase, Phase::ProcessingBatch { .. }) {
                return Err(Error::internal("expiry processing re-entered"));
            }
            let expirations = inner.facility.acknowledge().map_err(|e| {
                tracing::error!(error = %e, "failed to read timer facility");
                Error::facility("read", e)
            })?;
            let expired = inner.take_expired(now);
            tracing::trace!(%now, expirations, due = expired.len(), "timer facility fired");
            inner.phase = Phase::ProcessingBatch {
                canceled: BTreeSet::new(),
            };
            expired
        };

        let mut first_panic: Option<Box<dyn Any + Send>> = None;
        let mut panics = 0;
        let mut fired = 0usize;
        for timer in &mut expired {
            if self.canceled_in_batch(timer.id().active()) {
                tracing::trace!(timer = ?timer.id(), "skipping timer cancelled earlier in batch");
                continue;
            }
            fired += 1;
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| timer.run())) {
                panics += 1;
                tracing::error!(
                    timer = ?timer.id(),
                    message = panic_message(payload.as_ref()),
                    "timer callback panicked"
                );
                first_panic.get_or_insert(payload);
            }
        }

        let (retired, rearmed) = {
            let mut inner = self.inner.borrow_mut();
            let canceled = match mem::replace(&mut inner.phase, Phase::Idle) {
                Phase::ProcessingBatch { canceled } => canceled,
                Phase::Idle => BTreeSet::new(),
            };
            inner.stats.fired += fired as u64;
            inner.stats.panics += panics;
            let retired = inner.reset(expired, &canceled, now, self.missed_tick);
            let rearmed = inner.rearm(self.clock.now());
            (retired, rearmed)
        };
        drop(retired);

        if let Some(payload) = first_panic {
            match self.panic_policy {
                CallbackPanicPolicy::Propagate => panic::resume_unwind(payload),
                CallbackPanicPolicy::Abort => {
                    tracing::error!("aborting after timer callback panic");
                    std::process::abort();
                }
            }
        }
        rearmed?;
        Ok(fired)
    }

    fn canceled_in_batch(&self, active: ActiveTimer) -> bool {
        match &self.inner.borrow().phase {
            Phase::ProcessingBatch { canceled } => canceled.contains(&active),
            Phase::Idle => false,
        }
    }

    /// Number of live, indexed timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().timers.len()
    }

    /// Returns true if no timer is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().timers.is_empty()
    }

    /// Earliest indexed expiration.
    #[must_use]
    pub fn next_expiration(&self) -> Option<Timestamp> {
        self.inner.borrow().timers.keys().next().map(|&(when, _)| when)
    }

    /// Current processing phase.
    #[must_use]
    pub fn phase(&self) -> QueuePhase {
        match self.inner.borrow().phase {
            Phase::Idle => QueuePhase::Idle,
            Phase::ProcessingBatch { .. } => QueuePhase::ProcessingBatch,
        }
    }

    /// Size of the current batch's rejection set (zero when idle).
    #[must_use]
    pub fn pending_cancel_count(&self) -> usize {
        match &self.inner.borrow().phase {
            Phase::Idle => 0,
            Phase::ProcessingBatch { canceled } => canceled.len(),
        }
    }

    /// Snapshot of the diagnostic counters.
    #[must_use]
    pub fn stats(&self) -> TimerStats {
        self.inner.borrow().stats
    }

    /// Returns the descriptor to register with the reactor, if any.
    pub(crate) fn with_facility_fd<R>(
        &self,
        f: impl FnOnce(Option<std::os::fd::BorrowedFd<'_>>) -> R,
    ) -> R {
        let inner = self.inner.borrow();
        f(inner.facility.as_fd())
    }

    /// Verifies that both indices describe the same set of timers.
    ///
    /// # Errors
    ///
    /// Returns an internal error describing the first disagreement found.
    pub fn check_invariants(&self) -> Result<()> {
        let inner = self.inner.borrow();
        if matches!(inner.phase, Phase::ProcessingBatch { .. }) {
            return Err(Error::internal("indices are not at rest during a batch"));
        }
        if inner.timers.len() != inner.active.len() {
            return Err(Error::internal(format!(
                "index sizes differ: {} time-ordered, {} identity",
                inner.timers.len(),
                inner.active.len()
            )));
        }
        for (&(when, key), timer) in &inner.timers {
            if timer.key() != key || timer.expiration() != when {
                return Err(Error::internal(format!(
                    "time-ordered entry ({when}, {key}) holds {timer:?}"
                )));
            }
            match inner.active.get(&timer.id().active()) {
                Some(&indexed) if indexed == when => {}
                other => {
                    return Err(Error::internal(format!(
                        "identity entry for {:?} is {other:?}, expected {when}",
                        timer.id()
                    )));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("TimerQueue")
            .field("len", &inner.timers.len())
            .field("next_expiration", &inner.timers.keys().next().map(|e| e.0))
            .field("stats", &inner.stats)
            .field("missed_tick", &self.missed_tick)
            .field("panic_policy", &self.panic_policy)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, lab_queue, LAB_EPOCH};
    use crate::time::facility::{FacilityOp, LabFacility};
    use crate::time::VirtualClock;
    use std::cell::{Cell, RefCell as StdRefCell};
    use std::io;
    use std::rc::{Rc, Weak};

    struct Fixture {
        clock: Arc<VirtualClock>,
        facility: LabFacility,
        queue: Rc<TimerQueue>,
    }

    fn fixture() -> Fixture {
        init_test_logging();
        let (queue, clock, facility) = lab_queue();
        Fixture {
            clock,
            facility,
            queue: Rc::new(queue),
        }
    }

    fn at(ms: u64) -> Timestamp {
        LAB_EPOCH + Duration::from_millis(ms)
    }

    fn log() -> Rc<StdRefCell<Vec<&'static str>>> {
        Rc::new(StdRefCell::new(Vec::new()))
    }

    fn push(log: &Rc<StdRefCell<Vec<&'static str>>>, name: &'static str) -> impl FnMut() {
        let log = Rc::clone(log);
        move || log.borrow_mut().push(name)
    }

    #[test]
    fn add_indexes_and_arms_once_for_earliest() {
        let f = fixture();
        f.queue
            .add_timer(|| {}, at(100), Duration::ZERO)
            .expect("add");
        f.queue.add_timer(|| {}, at(200), Duration::ZERO).expect("add");
        f.queue.add_timer(|| {}, at(100), Duration::ZERO).expect("add");

        assert_eq!(f.queue.len(), 3);
        assert_eq!(f.queue.next_expiration(), Some(at(100)));
        assert_eq!(
            f.facility.ops(),
            vec![FacilityOp::Arm { deadline: at(100) }]
        );

        f.queue.add_timer(|| {}, at(50), Duration::ZERO).expect("add");
        assert_eq!(f.facility.arm_count(), 2);
        assert_eq!(f.facility.armed(), Some(at(50)));
        f.queue.check_invariants().expect("indices agree");
    }

    #[test]
    fn due_timers_fire_in_expiration_then_identity_order() {
        let f = fixture();
        let fired = log();
        f.queue
            .add_timer(push(&fired, "b"), at(20), Duration::ZERO)
            .expect("add");
        f.queue
            .add_timer(push(&fired, "a"), at(10), Duration::ZERO)
            .expect("add");
        f.queue
            .add_timer(push(&fired, "c"), at(20), Duration::ZERO)
            .expect("add");
        f.queue
            .add_timer(push(&fired, "late"), at(30), Duration::ZERO)
            .expect("add");

        f.clock.advance_to(at(20));
        assert_eq!(f.queue.handle_read().expect("read"), 3);
        assert_eq!(*fired.borrow(), vec!["a", "b", "c"]);
        assert_eq!(f.queue.len(), 1);
        assert_eq!(f.facility.armed(), Some(at(30)));
        f.queue.check_invariants().expect("indices agree");
    }

    #[test]
    fn one_shot_is_destroyed_after_firing() {
        let f = fixture();
        let id = f.queue.add_timer(|| {}, at(10), Duration::ZERO).expect("add");
        f.clock.advance_to(at(10));
        f.queue.handle_read().expect("read");

        assert!(f.queue.is_empty());
        assert_eq!(f.queue.cancel(id), CancelOutcome::NotFound);
        assert_eq!(f.facility.ops().last(), Some(&FacilityOp::Disarm));
    }

    #[test]
    fn repeating_timer_reschedules_on_its_grid() {
        let f = fixture();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        f.queue
            .add_timer(move || c.set(c.get() + 1), at(50), Duration::from_millis(50))
            .expect("add");

        f.clock.advance_to(at(52));
        f.queue.handle_read().expect("read");
        assert_eq!(f.queue.next_expiration(), Some(at(100)));

        f.clock.advance_to(at(101));
        f.queue.handle_read().expect("read");
        assert_eq!(f.queue.next_expiration(), Some(at(150)));
        assert_eq!(count.get(), 2);
        assert_eq!(f.queue.stats().rescheduled, 2);
    }

    #[test]
    fn cancel_is_idempotent() {
        let f = fixture();
        let id = f.queue.add_timer(|| {}, at(10), Duration::ZERO).expect("add");

        assert_eq!(f.queue.cancel(id), CancelOutcome::Removed);
        assert_eq!(f.queue.cancel(id), CancelOutcome::NotFound);
        assert_eq!(f.queue.cancel(TimerId::NONE), CancelOutcome::NotFound);
        assert_eq!(f.queue.stats().canceled, 1);
        assert!(f.queue.is_empty());
        f.queue.check_invariants().expect("indices agree");
    }

    #[test]
    fn cancelled_timer_never_runs() {
        let f = fixture();
        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        let id = f
            .queue
            .add_timer(move || r.set(true), at(100), Duration::ZERO)
            .expect("add");
        f.queue.cancel(id);

        f.clock.advance_to(at(200));
        assert_eq!(f.queue.handle_read().expect("read"), 0);
        assert!(!ran.get());
    }

    #[test]
    fn sibling_cancelled_in_batch_neither_runs_nor_reschedules() {
        let f = fixture();
        let fired = log();
        let sibling: Rc<Cell<TimerId>> = Rc::new(Cell::new(TimerId::NONE));

        let queue: Weak<TimerQueue> = Rc::downgrade(&f.queue);
        let target = Rc::clone(&sibling);
        let fired_a = Rc::clone(&fired);
        f.queue
            .add_timer(
                move || {
                    fired_a.borrow_mut().push("one-shot");
                    let queue = queue.upgrade().expect("queue alive");
                    assert_eq!(queue.phase(), QueuePhase::ProcessingBatch);
                    assert_eq!(queue.cancel(target.get()), CancelOutcome::Deferred);
                    assert_eq!(queue.pending_cancel_count(), 1);
                },
                at(10),
                Duration::ZERO,
            )
            .expect("add");
        let id = f
            .queue
            .add_timer(push(&fired, "repeating"), at(10), Duration::from_millis(10))
            .expect("add");
        sibling.set(id);

        f.clock.advance_to(at(10));
        let ran = f.queue.handle_read().expect("read");
        assert_eq!(ran, 1, "cancelled sibling is skipped");
        assert_eq!(f.queue.len(), 0);
        assert_eq!(f.queue.phase(), QueuePhase::Idle);
        assert_eq!(f.queue.pending_cancel_count(), 0);

        f.clock.advance(Duration::from_millis(100));
        f.queue.handle_read().expect("read");
        assert_eq!(*fired.borrow(), vec!["one-shot"]);
        assert_eq!(f.queue.stats().fired, 1);
        f.queue.check_invariants().expect("indices agree");
    }

    #[test]
    fn repeating_timer_cancelling_itself_is_not_resurrected() {
        let f = fixture();
        let count = Rc::new(Cell::new(0));
        let me: Rc<Cell<TimerId>> = Rc::new(Cell::new(TimerId::NONE));

        let queue = Rc::downgrade(&f.queue);
        let (c, this) = (Rc::clone(&count), Rc::clone(&me));
        let id = f
            .queue
            .add_timer(
                move || {
                    c.set(c.get() + 1);
                    if c.get() == 2 {
                        let queue = queue.upgrade().expect("queue alive");
                        queue.cancel(this.get());
                    }
                },
                at(10),
                Duration::from_millis(10),
            )
            .expect("add");
        me.set(id);

        for step in 1..=5 {
            f.clock.advance_to(at(10 * step));
            f.queue.handle_read().expect("read");
        }
        assert_eq!(count.get(), 2);
        assert!(f.queue.is_empty());
        assert_eq!(f.queue.stats().deferred_cancels, 1);
    }

    #[test]
    fn callback_may_add_timers_reentrantly() {
        let f = fixture();
        let fired = log();
        let queue = Rc::downgrade(&f.queue);
        let inner_log = Rc::clone(&fired);
        f.queue
            .add_timer(
                move || {
                    let queue = queue.upgrade().expect("queue alive");
                    queue
                        .add_timer(push(&inner_log, "child"), at(40), Duration::ZERO)
                        .expect("nested add");
                },
                at(10),
                Duration::ZERO,
            )
            .expect("add");

        f.clock.advance_to(at(10));
        f.queue.handle_read().expect("read");
        assert_eq!(f.queue.len(), 1);
        assert_eq!(f.facility.armed(), Some(at(40)));

        f.clock.advance_to(at(40));
        f.queue.handle_read().expect("read");
        assert_eq!(*fired.borrow(), vec!["child"]);
    }

    #[test]
    fn panicking_callback_finishes_batch_then_propagates() {
        let f = fixture();
        let fired = log();
        f.queue
            .add_timer(|| panic!("boom"), at(10), Duration::from_millis(10))
            .expect("add");
        f.queue
            .add_timer(push(&fired, "after"), at(10), Duration::ZERO)
            .expect("add");

        f.clock.advance_to(at(10));
        let queue = Rc::clone(&f.queue);
        let result = panic::catch_unwind(AssertUnwindSafe(|| queue.handle_read()));
        assert!(result.is_err(), "panic must not be swallowed");

        assert_eq!(*fired.borrow(), vec!["after"]);
        assert_eq!(f.queue.phase(), QueuePhase::Idle);
        assert_eq!(f.queue.len(), 1, "repeating timer still rescheduled");
        assert_eq!(f.queue.stats().panics, 1);
        assert_eq!(f.facility.armed(), Some(at(20)));
        f.queue.check_invariants().expect("indices agree");
    }

    #[test]
    fn facility_read_failure_is_fatal() {
        let f = fixture();
        f.queue.add_timer(|| {}, at(10), Duration::ZERO).expect("add");
        f.facility.fail_next_acknowledge(io::ErrorKind::Other);

        let err = f.queue.handle_read().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::TimerFacility);
        assert!(err.is_fatal());
        assert_eq!(f.queue.len(), 1, "nothing processed without a read");
    }

    #[test]
    fn facility_arm_failure_surfaces_from_add() {
        let f = fixture();
        f.facility.fail_next_arm(io::ErrorKind::InvalidInput);
        let err = f
            .queue
            .add_timer(|| {}, at(10), Duration::ZERO)
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::TimerFacility);
    }

    #[test]
    fn spurious_wakeup_runs_nothing_and_rearms() {
        let f = fixture();
        f.queue.add_timer(|| {}, at(10), Duration::ZERO).expect("add");
        f.facility.clear_ops();

        assert_eq!(f.queue.handle_read().expect("read"), 0);
        assert_eq!(
            f.facility.ops(),
            vec![
                FacilityOp::Acknowledge,
                FacilityOp::Arm { deadline: at(10) }
            ]
        );
    }

    #[test]
    fn delay_behavior_restarts_from_now() {
        init_test_logging();
        let clock = Arc::new(VirtualClock::starting_at(Timestamp::from_millis(1_000)));
        let queue = TimerQueue::new(Box::new(LabFacility::new()), clock.clone())
            .with_missed_tick_behavior(MissedTickBehavior::Delay);
        queue
            .add_timer(|| {}, at(10), Duration::from_millis(10))
            .expect("add");

        clock.advance_to(at(17));
        queue.handle_read().expect("read");
        assert_eq!(queue.next_expiration(), Some(at(27)));
    }
}
