//! Core value types.
//!
//! - [`timestamp`]: Microsecond wall-clock [`Timestamp`]
//! - [`id`]: Timer identifiers ([`TimerId`], [`TimerKey`])

pub mod id;
pub mod timestamp;

pub use id::{TimerId, TimerKey};
pub use timestamp::Timestamp;
