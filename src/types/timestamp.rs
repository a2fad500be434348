//! Microsecond-resolution wall-clock timestamps.

use core::fmt;
use std::ops::Add;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MICROS_PER_SECOND: u64 = 1_000_000;

/// A point in wall-clock time, in microseconds since the Unix epoch.
///
/// The zero value is reserved as [`Timestamp::INVALID`]; a retired one-shot
/// timer carries it as its expiration.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The invalid timestamp (epoch).
    pub const INVALID: Self = Self(0);

    /// The latest representable timestamp.
    pub const MAX: Self = Self(u64::MAX);

    /// Returns the current wall-clock time.
    ///
    /// Clocks set before the Unix epoch report [`Timestamp::INVALID`].
    #[must_use]
    pub fn now() -> Self {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(Self::INVALID, |d| Self(d.as_micros() as u64))
    }

    /// Creates a timestamp from microseconds since the epoch.
    #[must_use]
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Creates a timestamp from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000))
    }

    /// Creates a timestamp from Unix seconds plus a microsecond remainder.
    #[must_use]
    pub const fn from_unix(secs: u64, micros: u32) -> Self {
        Self(
            secs.saturating_mul(MICROS_PER_SECOND)
                .saturating_add(micros as u64),
        )
    }

    /// Returns the timestamp as microseconds since the epoch.
    #[must_use]
    pub const fn as_micros(self) -> u64 {
        self.0
    }

    /// Returns whole seconds since the epoch.
    #[must_use]
    pub const fn as_secs(self) -> u64 {
        self.0 / MICROS_PER_SECOND
    }

    /// Returns true unless this is [`Timestamp::INVALID`].
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 > 0
    }

    /// Adds a duration, saturating at [`Timestamp::MAX`].
    #[must_use]
    pub fn saturating_add(self, delta: Duration) -> Self {
        let micros = u64::try_from(delta.as_micros()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(micros))
    }

    /// Returns how far `self` lies after `earlier`, or zero if it does not.
    #[must_use]
    pub const fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        time.duration_since(UNIX_EPOCH)
            .map_or(Self::INVALID, |d| Self(d.as_micros() as u64))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}us)", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:06}",
            self.0 / MICROS_PER_SECOND,
            self.0 % MICROS_PER_SECOND
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        assert_eq!(Timestamp::from_millis(1).as_micros(), 1_000);
        assert_eq!(Timestamp::from_unix(2, 500).as_micros(), 2_000_500);
        assert_eq!(Timestamp::from_unix(2, 500).as_secs(), 2);
    }

    #[test]
    fn validity() {
        assert!(!Timestamp::INVALID.is_valid());
        assert!(!Timestamp::default().is_valid());
        assert!(Timestamp::from_micros(1).is_valid());
        assert!(Timestamp::now().is_valid());
    }

    #[test]
    fn arithmetic_saturates() {
        let t = Timestamp::from_millis(10);
        assert_eq!(t + Duration::from_millis(5), Timestamp::from_millis(15));
        assert_eq!(Timestamp::MAX + Duration::from_secs(1), Timestamp::MAX);
        assert_eq!(
            Timestamp::from_millis(15).saturating_duration_since(t),
            Duration::from_millis(5)
        );
        assert_eq!(t.saturating_duration_since(Timestamp::MAX), Duration::ZERO);
    }

    #[test]
    fn display_is_seconds_dot_micros() {
        assert_eq!(Timestamp::from_unix(12, 34).to_string(), "12.000034");
    }
}
