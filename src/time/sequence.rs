//! Process-wide timer sequence numbers.
//!
//! Every timer gets a sequence that is strictly greater than any handed out
//! before it, from any thread, for the lifetime of the process. Zero is never
//! issued; it marks [`TimerId::NONE`](crate::types::TimerId::NONE).

use std::sync::atomic::{AtomicU64, Ordering};

static NUM_CREATED: AtomicU64 = AtomicU64::new(0);

/// Returns the next sequence number.
pub(crate) fn next_sequence() -> u64 {
    NUM_CREATED.fetch_add(1, Ordering::Relaxed) + 1
}

/// Returns how many sequence numbers have been issued so far.
#[must_use]
pub fn num_created() -> u64 {
    NUM_CREATED.load(Ordering::Relaxed)
}
