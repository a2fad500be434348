//! Recording test double for the kernel timer facility.
//!
//! [`LabFacility`] has no descriptor and never fires on its own: tests advance
//! a [`VirtualClock`](crate::time::VirtualClock) and call
//! [`TimerQueue::handle_read`](crate::time::TimerQueue::handle_read) directly.
//! Every arm, disarm, and acknowledge is appended to a shared log, and a
//! one-shot error can be injected into each operation.
//!
//! ```
//! use reactimer::time::{FacilityOp, LabFacility};
//!
//! let facility = LabFacility::new();
//! let observer = facility.clone();
//! // ... hand `facility` to a TimerQueue, then inspect through `observer` ...
//! assert!(observer.ops().is_empty());
//! ```

use super::TimerFacility;
use crate::types::Timestamp;
use parking_lot::Mutex;
use std::io;
use std::os::fd::BorrowedFd;
use std::sync::Arc;

/// One recorded facility operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacilityOp {
    /// Armed for `deadline`.
    Arm {
        /// Absolute deadline requested.
        deadline: Timestamp,
    },
    /// Disarmed.
    Disarm,
    /// Readiness signal consumed.
    Acknowledge,
}

#[derive(Debug, Default)]
struct LabState {
    ops: Vec<FacilityOp>,
    armed: Option<Timestamp>,
    fail_arm: Option<io::ErrorKind>,
    fail_disarm: Option<io::ErrorKind>,
    fail_acknowledge: Option<io::ErrorKind>,
}

/// In-memory facility that records every operation.
///
/// Clones share state, so a test keeps one clone as an observer after moving the
/// other into the queue.
#[derive(Debug, Clone, Default)]
pub struct LabFacility {
    state: Arc<Mutex<LabState>>,
}

impl LabFacility {
    /// Creates a disarmed facility with an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the operation log.
    #[must_use]
    pub fn ops(&self) -> Vec<FacilityOp> {
        self.state.lock().ops.clone()
    }

    /// Clears the operation log, keeping the armed deadline.
    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    /// Number of arm operations recorded.
    #[must_use]
    pub fn arm_count(&self) -> usize {
        self.state
            .lock()
            .ops
            .iter()
            .filter(|op| matches!(op, FacilityOp::Arm { .. }))
            .count()
    }

    /// The currently armed deadline, if any.
    #[must_use]
    pub fn armed(&self) -> Option<Timestamp> {
        self.state.lock().armed
    }

    /// Makes the next `arm` fail with `kind`.
    pub fn fail_next_arm(&self, kind: io::ErrorKind) {
        self.state.lock().fail_arm = Some(kind);
    }

    /// Makes the next `disarm` fail with `kind`.
    pub fn fail_next_disarm(&self, kind: io::ErrorKind) {
        self.state.lock().fail_disarm = Some(kind);
    }

    /// Makes the next `acknowledge` fail with `kind`.
    pub fn fail_next_acknowledge(&self, kind: io::ErrorKind) {
        self.state.lock().fail_acknowledge = Some(kind);
    }
}

impl TimerFacility for LabFacility {
    fn arm(&mut self, deadline: Timestamp, _now: Timestamp) -> io::Result<()> {
        let mut state = self.state.lock();
        if let Some(kind) = state.fail_arm.take() {
            return Err(io::Error::new(kind, "injected arm failure"));
        }
        state.ops.push(FacilityOp::Arm { deadline });
        state.armed = Some(deadline);
        Ok(())
    }

    fn disarm(&mut self) -> io::Result<()> {
        let mut state = self.state.lock();
        if let Some(kind) = state.fail_disarm.take() {
            return Err(io::Error::new(kind, "injected disarm failure"));
        }
        state.ops.push(FacilityOp::Disarm);
        state.armed = None;
        Ok(())
    }

    fn acknowledge(&mut self) -> io::Result<u64> {
        let mut state = self.state.lock();
        if let Some(kind) = state.fail_acknowledge.take() {
            return Err(io::Error::new(kind, "injected read failure"));
        }
        state.ops.push(FacilityOp::Acknowledge);
        Ok(u64::from(state.armed.take().is_some()))
    }

    fn as_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }
}
