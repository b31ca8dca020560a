//! Drift-free periodic scheduler.
//!
//! Each cycle sleeps until an absolute deadline, measures how late it woke,
//! and advances the deadline by exactly one period from the previous
//! deadline. A late wake-up only produces a larger sample; it never shifts
//! or shortens later intervals.

use crate::clock::{Clock, MonotonicClock};
use rtprobe_common::config::ScheduleConfig;
use rtprobe_common::samples::{LatencySample, SampleLog};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace};

/// Periodic wake-up loop over a [`Clock`].
///
/// The scheduler does not elevate the thread itself; it measures whatever
/// scheduling context is active when [`run`](Self::run) is called.
#[derive(Debug)]
pub struct PeriodicScheduler<C: Clock> {
    clock: C,
    progress_interval: u64,
}

impl PeriodicScheduler<MonotonicClock> {
    /// Scheduler over the host's monotonic clock.
    #[must_use]
    pub fn monotonic() -> Self {
        Self::new(MonotonicClock::new())
    }
}

impl<C: Clock> PeriodicScheduler<C> {
    /// Create a scheduler over `clock`.
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            progress_interval: 0,
        }
    }

    /// Log a progress line every `interval` cycles (0 disables).
    #[must_use]
    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    /// The underlying clock.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Run `config.iterations` cycles and return one sample per cycle.
    pub fn run(&mut self, config: &ScheduleConfig) -> SampleLog {
        let never = AtomicBool::new(false);
        self.run_until(config, &never)
    }

    /// Run until all cycles complete or `stop` is set.
    ///
    /// `stop` is checked before each sleep, never during one; a stopped run
    /// returns the samples of the cycles that completed.
    pub fn run_until(&mut self, config: &ScheduleConfig, stop: &AtomicBool) -> SampleLog {
        let mut log = SampleLog::with_capacity(config.period, config.iterations);

        info!(
            period_us = config.period.as_micros(),
            iterations = config.iterations,
            "Starting periodic loop"
        );

        let mut deadline = self.clock.now();

        for cycle in 1..=config.iterations {
            if stop.load(Ordering::Relaxed) {
                info!(completed = cycle - 1, "Stop requested, ending periodic loop");
                break;
            }

            self.clock.sleep_until(deadline);
            let woke = self.clock.now();

            let sample = LatencySample::from_duration(woke.saturating_duration_since(deadline));
            deadline = deadline + config.period;
            log.record(sample);

            trace!(cycle, latency_ns = sample.as_nanos(), "Cycle complete");
            if self.progress_interval > 0 && cycle % self.progress_interval == 0 {
                debug!(
                    cycle,
                    total = config.iterations,
                    latency_us = sample.as_duration().as_micros(),
                    "Periodic progress"
                );
            }
        }

        info!(
            completed = log.len(),
            requested = config.iterations,
            "Periodic loop finished"
        );
        log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use rtprobe_common::time::Timestamp;
    use std::sync::Arc;
    use std::time::Duration;

    const START: Timestamp = Timestamp::from_nanos(5_000_000);

    fn config(period_ns: u64, iterations: u64) -> ScheduleConfig {
        ScheduleConfig {
            period: Duration::from_nanos(period_ns),
            iterations,
            ..Default::default()
        }
    }

    fn expected_deadlines(period_ns: u64, n: u64) -> Vec<Timestamp> {
        (0..n)
            .map(|i| Timestamp::from_nanos(START.as_nanos() + i * period_ns))
            .collect()
    }

    #[test]
    fn test_perfect_sleep_yields_zero_latency() {
        let mut scheduler = PeriodicScheduler::new(SimulatedClock::new(START));
        let log = scheduler.run(&config(1000, 5));

        assert_eq!(log.len(), 5);
        assert!(log.is_complete());
        assert!(log.iter().all(|s| s.as_nanos() == 0));
        assert_eq!(scheduler.clock().deadlines(), expected_deadlines(1000, 5));
    }

    #[test]
    fn test_fixed_overshoot_does_not_drift() {
        let clock = SimulatedClock::with_overshoot(START, Duration::from_nanos(250));
        let mut scheduler = PeriodicScheduler::new(clock);
        let log = scheduler.run(&config(1000, 50));

        assert_eq!(log.len(), 50);
        assert!(log.iter().all(|s| s.as_nanos() == 250));
        // Deadlines advance by exactly one period; the overshoot never compounds.
        assert_eq!(scheduler.clock().deadlines(), expected_deadlines(1000, 50));
    }

    #[test]
    fn test_late_cycle_does_not_catch_up() {
        let overshoots = [0, 2500, 0, 0].map(Duration::from_nanos).to_vec();
        let clock = SimulatedClock::with_overshoots(START, overshoots);
        let mut scheduler = PeriodicScheduler::new(clock);
        let log = scheduler.run(&config(1000, 5));

        let samples: Vec<u64> = log.iter().map(|s| s.as_nanos()).collect();
        // The second cycle wakes 2.5 periods late; following deadlines are
        // already due, so the backlog drains as decreasing latencies.
        assert_eq!(samples, vec![0, 2500, 1500, 500, 0]);
        assert_eq!(scheduler.clock().deadlines(), expected_deadlines(1000, 5));
    }

    #[test]
    fn test_zero_iterations() {
        let mut scheduler = PeriodicScheduler::new(SimulatedClock::new(START));
        let log = scheduler.run(&config(1000, 0));

        assert!(log.is_empty());
        assert!(log.is_complete());
        assert!(scheduler.clock().deadlines().is_empty());
    }

    #[test]
    fn test_stop_before_start() {
        let mut scheduler = PeriodicScheduler::new(SimulatedClock::new(START));
        let stop = AtomicBool::new(true);
        let log = scheduler.run_until(&config(1000, 10), &stop);

        assert!(log.is_empty());
        assert!(!log.is_complete());
        assert_eq!(log.requested(), 10);
    }

    #[test]
    fn test_huge_iteration_count_stopped_before_start() {
        let config = config(1000, u64::MAX / 2);
        config.validate(4).unwrap();

        let mut scheduler = PeriodicScheduler::new(SimulatedClock::new(START));
        let log = scheduler.run_until(&config, &AtomicBool::new(true));

        assert!(log.is_empty());
        assert_eq!(log.requested(), u64::MAX / 2);
        assert!(scheduler.clock().deadlines().is_empty());
    }

    /// Clock that raises the stop flag after a number of sleeps.
    struct StoppingClock {
        inner: SimulatedClock,
        stop: Arc<AtomicBool>,
        after: usize,
    }

    impl Clock for StoppingClock {
        fn now(&self) -> Timestamp {
            self.inner.now()
        }

        fn sleep_until(&mut self, deadline: Timestamp) {
            self.inner.sleep_until(deadline);
            if self.inner.deadlines().len() >= self.after {
                self.stop.store(true, Ordering::Relaxed);
            }
        }
    }

    #[test]
    fn test_stop_between_cycles_keeps_completed_samples() {
        let stop = Arc::new(AtomicBool::new(false));
        let clock = StoppingClock {
            inner: SimulatedClock::with_overshoot(START, Duration::from_nanos(10)),
            stop: Arc::clone(&stop),
            after: 3,
        };
        let mut scheduler = PeriodicScheduler::new(clock).with_progress_interval(1);
        let log = scheduler.run_until(&config(1000, 100), &stop);

        // The cycle in flight when the flag was raised still records its sample.
        assert_eq!(log.len(), 3);
        assert!(log.iter().all(|s| s.as_nanos() == 10));
        assert!(!log.is_complete());
    }

    #[test]
    fn test_monotonic_run_records_every_cycle() {
        let mut scheduler = PeriodicScheduler::monotonic();
        let log = scheduler.run(&config(200_000, 10));

        assert_eq!(log.len(), 10);
        assert_eq!(log.period(), Duration::from_micros(200));
    }
}
