//! Linux `timerfd` facility.
//!
//! Uses a `CLOCK_MONOTONIC` timer descriptor in non-blocking mode. Deadlines
//! are converted to a relative delay from the caller's `now`, clamped to the
//! configured minimum, so wall-clock adjustments do not skew the countdown.

#![allow(unsafe_code)]

use super::{TimerFacility, DEFAULT_MIN_ARM_DELAY};
use crate::types::Timestamp;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::time::Duration;

/// `timerfd`-backed kernel timer facility.
#[derive(Debug)]
pub struct TimerFd {
    fd: OwnedFd,
    min_delay: Duration,
}

impl TimerFd {
    /// Creates a disarmed timer descriptor.
    ///
    /// # Errors
    ///
    /// Returns the OS error if `timerfd_create` fails (e.g., out of
    /// descriptors).
    pub fn new() -> io::Result<Self> {
        Self::with_min_delay(DEFAULT_MIN_ARM_DELAY)
    }

    /// Creates a disarmed timer descriptor with a custom minimum arm delay.
    pub fn with_min_delay(min_delay: Duration) -> io::Result<Self> {
        // SAFETY: timerfd_create takes no pointers.
        let raw = unsafe {
            libc::timerfd_create(
                libc::CLOCK_MONOTONIC,
                libc::TFD_NONBLOCK | libc::TFD_CLOEXEC,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `raw` is a freshly created descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        Ok(Self {
            fd,
            min_delay: min_delay.max(Duration::from_nanos(1)),
        })
    }

    /// Returns the minimum delay applied when arming.
    #[must_use]
    pub const fn min_delay(&self) -> Duration {
        self.min_delay
    }

    fn set_time(&self, value: Duration) -> io::Result<()> {
        let spec = libc::itimerspec {
            it_interval: libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
            it_value: libc::timespec {
                tv_sec: value.as_secs() as libc::time_t,
                tv_nsec: value.subsec_nanos() as libc::c_long,
            },
        };
        // SAFETY: `spec` outlives the call and the old-value pointer may be null.
        let rc = unsafe {
            libc::timerfd_settime(self.fd.as_raw_fd(), 0, &spec, std::ptr::null_mut())
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl TimerFacility for TimerFd {
    fn arm(&mut self, deadline: Timestamp, now: Timestamp) -> io::Result<()> {
        let delay = deadline.saturating_duration_since(now).max(self.min_delay);
        self.set_time(delay)
    }

    fn disarm(&mut self) -> io::Result<()> {
        self.set_time(Duration::ZERO)
    }

    fn acknowledge(&mut self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        // SAFETY: `buf` is valid for writes of its full length.
        let n = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(0);
            }
            return Err(err);
        }
        if n as usize != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("timerfd read returned {n} bytes instead of 8"),
            ));
        }
        Ok(u64::from_ne_bytes(buf))
    }

    fn as_fd(&self) -> Option<BorrowedFd<'_>> {
        Some(self.fd.as_fd())
    }
}
