//! Interest flags for descriptor readiness.
//!
//! The loop only ever waits for the timer descriptor to become readable, so
//! readable is the one flag there is.

/// Readiness to monitor on a registered descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest(u8);

impl Interest {
    /// No interest.
    pub const NONE: Interest = Interest(0);
    /// Interest in readable events.
    pub const READABLE: Interest = Interest(0b01);

    /// Returns interest in readable events.
    #[must_use]
    pub const fn readable() -> Self {
        Self::READABLE
    }

    /// Returns true if readable interest is set.
    #[must_use]
    pub const fn is_readable(&self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }
}
