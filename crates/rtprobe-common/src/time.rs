//! Monotonic timebase shared between the clock and the scheduler.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;
use std::time::Duration;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A point on the monotonic clock, in nanoseconds since the clock's origin.
///
/// Unlike `std::time::Instant` this can be constructed from raw values,
/// which keeps deadline arithmetic testable with a simulated clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Clock origin.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Create a timestamp from nanoseconds since the origin.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Create a timestamp from a `timespec`-style split value.
    #[must_use]
    pub const fn from_secs_nanos(secs: u64, nanos: u32) -> Self {
        Self(secs * NANOS_PER_SEC + nanos as u64)
    }

    /// Nanoseconds since the origin.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Whole seconds part.
    #[must_use]
    pub const fn secs(self) -> u64 {
        self.0 / NANOS_PER_SEC
    }

    /// Sub-second nanoseconds part, always < 1e9.
    #[must_use]
    pub const fn subsec_nanos(self) -> u32 {
        (self.0 % NANOS_PER_SEC) as u32
    }

    /// Time elapsed from `earlier` to `self`, or zero if `earlier` is later.
    #[must_use]
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        let delta = u64::try_from(rhs.as_nanos()).unwrap_or(u64::MAX);
        Timestamp(self.0.saturating_add(delta))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}s", self.secs(), self.subsec_nanos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_roundtrip() {
        let ts = Timestamp::from_secs_nanos(12, 999_999_999);
        assert_eq!(ts.secs(), 12);
        assert_eq!(ts.subsec_nanos(), 999_999_999);

        // Adding one nanosecond carries into the seconds field.
        let next = ts + Duration::from_nanos(1);
        assert_eq!(next.secs(), 13);
        assert_eq!(next.subsec_nanos(), 0);
    }

    #[test]
    fn test_saturating_duration_since() {
        let a = Timestamp::from_nanos(1_000);
        let b = Timestamp::from_nanos(1_250);
        assert_eq!(b.saturating_duration_since(a), Duration::from_nanos(250));
        assert_eq!(a.saturating_duration_since(b), Duration::ZERO);
    }

    #[test]
    fn test_display() {
        assert_eq!(Timestamp::from_secs_nanos(3, 5_000).to_string(), "3.000005000s");
    }
}
