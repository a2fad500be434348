//! Reactimer: a thread-confined timer queue for single-threaded reactor loops.
//!
//! # Overview
//!
//! Any thread may schedule a one-shot or repeating callback for a wall-clock
//! time and cancel it later, while every piece of timer bookkeeping runs on
//! the event loop's own thread. The loop sleeps on a kernel timer facility
//! (`timerfd` on Linux) programmed for the earliest pending deadline.
//!
//! # Core Guarantees
//!
//! - **No locks on the hot path**: the timer indices are touched only by the
//!   owning thread; other threads marshal closures through a lock-free queue
//! - **Ids before insertion**: a [`TimerId`] is returned immediately, even when
//!   the insertion itself still has to travel to the loop thread
//! - **Cancel wins**: a repeating timer cancelled from any callback of the
//!   batch it fires in, including its own, is never rescheduled
//! - **No drift**: repeating timers stay on their `t0 + k * interval` grid
//! - **Loud failures**: facility errors are fatal, callback panics are
//!   re-raised after the batch's bookkeeping completes
//!
//! # Module Structure
//!
//! - [`types`]: [`Timestamp`], [`TimerId`]
//! - [`time`]: timers, clocks, the kernel facility, and [`TimerQueue`]
//! - [`runtime`]: [`EventLoop`], [`LoopHandle`], [`LoopThread`], configuration
//! - [`error`]: error types
//!
//! # Example
//!
//! ```no_run
//! use reactimer::runtime::LoopBuilder;
//! use std::time::Duration;
//!
//! let loop_thread = LoopBuilder::new().thread_name("timers").spawn()?;
//! let handle = loop_thread.handle();
//!
//! let id = handle.run_every(Duration::from_millis(50), || println!("tick"));
//! std::thread::sleep(Duration::from_millis(300));
//! handle.cancel(id);
//!
//! loop_thread.join()?;
//! # Ok::<(), reactimer::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod error;
pub mod runtime;
pub mod time;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{Error, ErrorCategory, ErrorKind, Result};
pub use runtime::{CallbackPanicPolicy, EventLoop, LoopBuilder, LoopConfig, LoopHandle, LoopThread};
pub use time::{CancelOutcome, MissedTickBehavior, Timer, TimerQueue};
pub use types::{TimerId, Timestamp};
