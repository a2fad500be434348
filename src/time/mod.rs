//! Timers: identities, clocks, the kernel facility, and the per-loop queue.
//!
//! - [`Timer`]: one callback with an expiration and optional repeat interval
//! - [`TimerQueue`]: thread-confined owner of all timers for one loop
//! - [`TimerFacility`]: the pollable countdown that wakes the loop
//! - [`TimeSource`]: where "now" comes from ([`WallClock`] or [`VirtualClock`])
//!
//! # Virtual vs Wall Time
//!
//! The queue never reads the system clock directly. Production loops use
//! [`WallClock`] with [`TimerFd`]; deterministic tests pair a [`VirtualClock`]
//! with a [`LabFacility`] and drive [`TimerQueue::handle_read`] by hand.

mod clock;
pub mod facility;
mod queue;
mod sequence;
mod timer;

pub use clock::{TimeSource, VirtualClock, WallClock};
pub use facility::{FacilityOp, LabFacility, TimerFacility, DEFAULT_MIN_ARM_DELAY};
#[cfg(target_os = "linux")]
pub use facility::TimerFd;
pub use queue::{CancelOutcome, QueuePhase, TimerQueue, TimerStats};
pub use sequence::num_created;
pub use timer::{MissedTickBehavior, Timer};

pub(crate) use timer::{TimerCallback, TimerKeys};
