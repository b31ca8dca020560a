//! Latency and elevation acceptance tests.
//!
//! The unprivileged tests run the periodic loop against the real
//! monotonic clock and check the statistics pipeline end to end. The
//! privileged tests elevate the test thread and hold it to a latency bound.
//!
//! # Acceptance Criteria (privileged)
//!
//! - Maximum latency < 100µs on an idle PREEMPT_RT host
//! - Every requested cycle completes
//! - The thread is back on SCHED_OTHER after revert

use super::common::{
    check_rt_prerequisites, has_stress_ng, is_root, measurement_cpu, num_cpus, print_stats,
    start_stress_ng, AcceptanceCriteria,
};
use rtprobe_common::config::{ReportConfig, ScheduleConfig};
use rtprobe_common::error::RtError;
use rtprobe_common::stats::{aggregate, histogram, percentile, LatencySummary};
use rtprobe_runtime::clock::{Clock, MonotonicClock};
use rtprobe_runtime::platform::{LinuxPlatform, RtPlatform, SchedPolicy, ThreadPolicy};
use rtprobe_runtime::realtime::{check_rt_capabilities, elevate_current_thread};
use rtprobe_runtime::scheduler::PeriodicScheduler;
use std::time::Duration;

fn schedule(period: Duration, iterations: u64) -> ScheduleConfig {
    ScheduleConfig {
        period,
        iterations,
        priority: 80,
        cpu: measurement_cpu(),
    }
}

/// Unelevated run: one sample per cycle and consistent statistics.
#[test]
fn test_unprivileged_run_statistics() {
    let config = schedule(Duration::from_micros(500), 200);
    let log = PeriodicScheduler::monotonic().run(&config);

    assert_eq!(log.len(), 200);
    assert!(log.is_complete());

    let stats = aggregate(&log);
    print_stats("unprivileged", &stats);
    assert_eq!(stats.count, 200);
    assert!(stats.min_ns as f64 <= stats.mean_ns);
    assert!(stats.mean_ns <= stats.max_ns as f64);
    assert!(stats.stddev_ns >= 0.0);

    let hist = histogram(&log, 15);
    assert_eq!(hist.total(), 200);

    let p50 = percentile(&log, 50.0).unwrap();
    let p99 = percentile(&log, 99.0).unwrap();
    assert!(p50 <= p99);
    assert_eq!(percentile(&log, 100.0).unwrap().as_nanos(), stats.max_ns);
}

/// Deadlines advance from the previous deadline, so the run never ends
/// early and the total time only exceeds nominal by the last wake-up.
#[test]
fn test_run_does_not_drift_short() {
    let period = Duration::from_millis(1);
    let iterations = 50;
    let config = schedule(period, iterations);

    let clock = MonotonicClock::new();
    let start = clock.now();
    let log = PeriodicScheduler::new(clock).run(&config);
    let elapsed = MonotonicClock::new().now().saturating_duration_since(start);

    // The first deadline is the start instant, so n cycles span n - 1 periods.
    let nominal = period * (iterations as u32 - 1);
    assert!(elapsed >= nominal, "elapsed {elapsed:?} < nominal {nominal:?}");

    let last = log.last().unwrap().as_duration();
    assert!(elapsed >= nominal + last);
}

#[test]
fn test_summary_from_real_run() {
    let config = schedule(Duration::from_micros(200), 100);
    let log = PeriodicScheduler::monotonic().run(&config);
    let summary = LatencySummary::from_samples(&log, &ReportConfig::default());

    assert_eq!(summary.stats.count, 100);
    assert_eq!(summary.histogram.total(), 100);
    assert!(summary.verdict.is_some());
    assert!(summary
        .percentiles
        .windows(2)
        .all(|w| w[0].1 <= w[1].1));
}

/// An out-of-range CPU is rejected before any privileged call.
#[test]
fn test_invalid_cpu_rejected() {
    let config = ScheduleConfig {
        cpu: num_cpus() + 8,
        ..schedule(Duration::from_millis(1), 10)
    };

    let err = elevate_current_thread(&config).unwrap_err();
    assert!(matches!(err, RtError::InvalidConfiguration(_)));
}

/// Without privileges the elevation fails cleanly and leaves the thread
/// on the default policy.
#[test]
fn test_unprivileged_elevation_fails_cleanly() {
    let caps = check_rt_capabilities();
    if is_root() || caps.can_use_rt_scheduling() {
        eprintln!("Skipping test: process may be allowed SCHED_FIFO");
        return;
    }

    let err = elevate_current_thread(&schedule(Duration::from_millis(1), 10)).unwrap_err();
    assert!(err.is_elevation_failure(), "unexpected error: {err}");
    assert!(err.to_string().contains("sudo"));

    let policy = LinuxPlatform::new().query_policy().unwrap();
    assert_eq!(policy.policy, SchedPolicy::Other);
}

#[test]
fn test_capabilities_match_host() {
    let caps = check_rt_capabilities();
    assert_eq!(caps.online_cpus, num_cpus());
    assert_eq!(caps.is_root, is_root());
}

/// Elevated run on an idle host.
#[test]
#[ignore = "Requires root"]
fn test_elevated_run_meets_criteria() {
    if let Err(e) = check_rt_prerequisites() {
        eprintln!("Skipping test: {}", e);
        return;
    }

    let config = schedule(Duration::from_millis(1), 5000);
    let mut handle = elevate_current_thread(&config).expect("elevation failed");

    let policy = handle.current_policy().unwrap();
    assert_eq!(policy.policy, SchedPolicy::Fifo);
    assert_eq!(policy.priority, 80);

    let log = PeriodicScheduler::monotonic().run(&config);
    handle.revert();

    let stats = aggregate(&log);
    print_stats("elevated, no load", &stats);

    let criteria = AcceptanceCriteria::default();
    assert!(
        criteria.check(&stats, config.iterations),
        "Latency test failed: max={}µs",
        stats.max().as_micros()
    );
}

/// Revert returns the thread to SCHED_OTHER even when the handle is only dropped.
#[test]
#[ignore = "Requires root"]
fn test_drop_restores_default_policy() {
    if let Err(e) = check_rt_prerequisites() {
        eprintln!("Skipping test: {}", e);
        return;
    }

    {
        let _handle =
            elevate_current_thread(&schedule(Duration::from_millis(1), 1)).expect("elevation failed");
        let policy = LinuxPlatform::new().query_policy().unwrap();
        assert_eq!(policy.policy, SchedPolicy::Fifo);
    }

    let policy = LinuxPlatform::new().query_policy().unwrap();
    assert_eq!(policy, ThreadPolicy::DEFAULT);
}

/// Elevated run with every other CPU busy.
#[test]
#[ignore = "Requires root and stress-ng"]
fn test_elevated_run_under_cpu_load() {
    if let Err(e) = check_rt_prerequisites() {
        eprintln!("Skipping test: {}", e);
        return;
    }

    if !has_stress_ng() {
        eprintln!("Skipping test: stress-ng not available");
        return;
    }

    let cpus = num_cpus();
    println!("Running elevated latency test under CPU load ({} workers)...", cpus);

    let mut stress = start_stress_ng(cpus, 0).expect("Failed to start stress-ng");
    std::thread::sleep(Duration::from_secs(2));

    let config = schedule(Duration::from_millis(1), 10_000);
    let result = elevate_current_thread(&config).map(|mut handle| {
        let log = PeriodicScheduler::monotonic().run(&config);
        handle.revert();
        log
    });

    let _ = stress.kill();
    let _ = stress.wait();

    let log = result.expect("elevation failed");
    let stats = aggregate(&log);
    print_stats("elevated, CPU load", &stats);

    let criteria = AcceptanceCriteria {
        max_latency: Duration::from_micros(200),
        ..Default::default()
    };
    assert!(
        criteria.check(&stats, config.iterations),
        "Latency test failed under CPU load: max={}µs",
        stats.max().as_micros()
    );
}
