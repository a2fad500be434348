//! Kernel timer facility abstraction.
//!
//! A [`TimerFacility`] is the countdown primitive that wakes the owning loop
//! when the earliest timer is due. The queue programs it with absolute
//! deadlines; implementations translate those into whatever the backend
//! needs.
//!
//! | Backend | Type | Module |
//! |---------|------|--------|
//! | Linux `timerfd` | [`TimerFd`] | `timerfd.rs` |
//! | Testing | [`LabFacility`] | `lab.rs` |
//!
//! # Contract
//!
//! - `arm` replaces any previous deadline.
//! - `disarm` cancels the pending deadline, if any.
//! - After the facility signals readiness, the owner must call
//!   `acknowledge` before re-arming, or the signal may repeat spuriously.
//! - All failures are fatal to the owning loop; callers surface them.

pub mod lab;
#[cfg(target_os = "linux")]
pub mod timerfd;

pub use lab::{FacilityOp, LabFacility};
#[cfg(target_os = "linux")]
pub use timerfd::TimerFd;

use crate::types::Timestamp;
use std::io;
use std::os::fd::BorrowedFd;
use std::time::Duration;

/// Default lower bound on the delay programmed into a facility.
///
/// Deadlines already in the past are armed this far in the future so the
/// facility still fires.
pub const DEFAULT_MIN_ARM_DELAY: Duration = Duration::from_micros(100);

/// A pollable deadline primitive.
pub trait TimerFacility: std::fmt::Debug {
    /// Arms the facility to signal at `deadline`, replacing any earlier
    /// setting. `now` is the caller's current time.
    fn arm(&mut self, deadline: Timestamp, now: Timestamp) -> io::Result<()>;

    /// Cancels any pending deadline.
    fn disarm(&mut self) -> io::Result<()>;

    /// Consumes the readiness signal and returns the number of expirations
    /// it reported (zero for a spurious wakeup).
    fn acknowledge(&mut self) -> io::Result<u64>;

    /// Descriptor to register for readable interest, if the facility has one.
    fn as_fd(&self) -> Option<BorrowedFd<'_>>;
}
