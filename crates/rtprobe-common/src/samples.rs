//! Latency samples produced by the periodic scheduler.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::time::Duration;

/// Wake-up latency of one cycle: actual wake time minus its deadline.
///
/// Stored in nanoseconds and never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LatencySample(u64);

impl LatencySample {
    /// Create a sample from nanoseconds.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Create a sample from a duration, saturating at `u64::MAX` nanoseconds.
    #[must_use]
    pub fn from_duration(duration: Duration) -> Self {
        Self(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
    }

    /// Latency in nanoseconds.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Latency as a duration.
    #[must_use]
    pub const fn as_duration(self) -> Duration {
        Duration::from_nanos(self.0)
    }
}

impl From<Duration> for LatencySample {
    fn from(duration: Duration) -> Self {
        Self::from_duration(duration)
    }
}

impl fmt::Display for LatencySample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// Upper bound on samples reserved up front; longer runs grow the log as they go.
pub const MAX_PREALLOCATED_SAMPLES: usize = 1 << 20;

/// Samples of one run, in cycle order.
///
/// Holds one sample per completed cycle; a cancelled run holds fewer than
/// `requested` samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleLog {
    samples: Vec<LatencySample>,
    period: Duration,
    requested: u64,
}

impl SampleLog {
    /// Create an empty log sized for `requested` cycles.
    ///
    /// At most [`MAX_PREALLOCATED_SAMPLES`] are reserved, so any iteration
    /// count is accepted.
    #[must_use]
    pub fn with_capacity(period: Duration, requested: u64) -> Self {
        let capacity = usize::try_from(requested)
            .unwrap_or(usize::MAX)
            .min(MAX_PREALLOCATED_SAMPLES);
        Self {
            samples: Vec::with_capacity(capacity),
            period,
            requested,
        }
    }

    /// Append the sample of the cycle that just completed.
    pub fn record(&mut self, sample: LatencySample) {
        self.samples.push(sample);
    }

    /// Configured period of the run.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Iteration count the run was started with.
    #[must_use]
    pub fn requested(&self) -> u64 {
        self.requested
    }

    /// Returns true if every requested cycle completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.samples.len() as u64 == self.requested
    }

    /// Samples in cycle order.
    #[must_use]
    pub fn samples(&self) -> &[LatencySample] {
        &self.samples
    }
}

impl Deref for SampleLog {
    type Target = [LatencySample];

    fn deref(&self) -> &[LatencySample] {
        &self.samples
    }
}
