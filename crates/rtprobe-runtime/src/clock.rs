//! Monotonic clock and absolute-time sleep.
//!
//! On Linux, [`MonotonicClock`] uses `CLOCK_MONOTONIC` with
//! `clock_nanosleep(TIMER_ABSTIME)`, so a late wake-up never shifts the
//! next deadline. [`SimulatedClock`] replays a fixed wake-up overshoot
//! for deterministic tests of the scheduling loop.

use rtprobe_common::time::Timestamp;
use std::time::Duration;

/// Time source and sleep primitive for the periodic scheduler.
pub trait Clock {
    /// Current monotonic time, immune to wall-clock adjustment.
    fn now(&self) -> Timestamp;

    /// Block the calling thread until at least `deadline`.
    ///
    /// Returns immediately if `deadline` has already passed.
    fn sleep_until(&mut self, deadline: Timestamp);
}

/// The host's `CLOCK_MONOTONIC`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    /// Create a clock handle.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "linux")]
impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        use nix::time::{clock_gettime, ClockId};

        // CLOCK_MONOTONIC is always present on Linux; a failure here means
        // the process cannot measure time at all.
        match clock_gettime(ClockId::CLOCK_MONOTONIC) {
            Ok(ts) => Timestamp::from_secs_nanos(
                u64::try_from(ts.tv_sec()).unwrap_or(0),
                u32::try_from(ts.tv_nsec()).unwrap_or(0),
            ),
            Err(e) => {
                tracing::error!(error = %e, "clock_gettime(CLOCK_MONOTONIC) failed");
                Timestamp::ZERO
            }
        }
    }

    fn sleep_until(&mut self, deadline: Timestamp) {
        #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
        let ts = libc::timespec {
            tv_sec: deadline.secs() as libc::time_t,
            tv_nsec: deadline.subsec_nanos() as libc::c_long,
        };

        loop {
            // SAFETY: ts is a valid timespec and the remaining-time pointer may be
            // null for TIMER_ABSTIME sleeps
            let rc = unsafe {
                libc::clock_nanosleep(
                    libc::CLOCK_MONOTONIC,
                    libc::TIMER_ABSTIME,
                    &ts,
                    std::ptr::null_mut(),
                )
            };
            // An absolute sleep interrupted by a signal is simply resumed;
            // the deadline does not move.
            if rc != libc::EINTR {
                if rc != 0 {
                    tracing::warn!(rc, "clock_nanosleep failed");
                }
                break;
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        use std::sync::OnceLock;
        use std::time::Instant;

        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        let origin = *ORIGIN.get_or_init(Instant::now);
        Timestamp::ZERO + origin.elapsed()
    }

    fn sleep_until(&mut self, deadline: Timestamp) {
        let remaining = deadline.saturating_duration_since(self.now());
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
    }
}

/// Deterministic clock that advances only when slept on.
///
/// Each `sleep_until` wakes exactly `overshoot` after the requested deadline
/// (or after the current time, if the deadline already passed), and the
/// requested deadlines are recorded for inspection.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    now: Timestamp,
    overshoots: Vec<Duration>,
    deadlines: Vec<Timestamp>,
}

impl SimulatedClock {
    /// A perfect sleep primitive starting at `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self::with_overshoot(start, Duration::ZERO)
    }

    /// A sleep primitive that always wakes `overshoot` late.
    #[must_use]
    pub fn with_overshoot(start: Timestamp, overshoot: Duration) -> Self {
        Self::with_overshoots(start, vec![overshoot])
    }

    /// Wake-up overshoots applied cyclically, one per sleep.
    ///
    /// An empty list behaves like a perfect sleep.
    #[must_use]
    pub fn with_overshoots(start: Timestamp, overshoots: Vec<Duration>) -> Self {
        Self {
            now: start,
            overshoots,
            deadlines: Vec::new(),
        }
    }

    /// Deadlines passed to `sleep_until`, in call order.
    #[must_use]
    pub fn deadlines(&self) -> &[Timestamp] {
        &self.deadlines
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> Timestamp {
        self.now
    }

    fn sleep_until(&mut self, deadline: Timestamp) {
        let overshoot = if self.overshoots.is_empty() {
            Duration::ZERO
        } else {
            self.overshoots[self.deadlines.len() % self.overshoots.len()]
        };
        self.deadlines.push(deadline);
        self.now = self.now.max(deadline) + overshoot;
    }
}
