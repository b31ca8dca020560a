//! Common utilities for integration tests.
//!
//! Provides helpers for:
//! - Checking real-time prerequisites (PREEMPT_RT, privileges)
//! - Generating background load
//! - Judging a measured run against acceptance criteria

#![allow(dead_code)] // Not every helper is used by every test binary

use rtprobe_common::stats::LatencyStats;
use std::fs;
use std::process::{Command, Stdio};
use std::time::Duration;

/// Check if the system has PREEMPT_RT kernel.
pub fn has_preempt_rt() -> bool {
    if let Ok(version) = fs::read_to_string("/proc/version") {
        version.contains("PREEMPT_RT") || version.contains("PREEMPT RT")
    } else {
        false
    }
}

/// Check if running as root (required for RT priority).
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Check if stress-ng is available.
pub fn has_stress_ng() -> bool {
    Command::new("which")
        .arg("stress-ng")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Get the number of CPUs.
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

/// Highest-numbered CPU, the usual choice for `isolcpus=`.
pub fn measurement_cpu() -> usize {
    num_cpus() - 1
}

/// Check all prerequisites for privileged real-time tests.
pub fn check_rt_prerequisites() -> Result<(), String> {
    if !has_preempt_rt() {
        eprintln!("WARNING: PREEMPT_RT kernel not detected - latency results may be unreliable");
    }

    if is_root() {
        Ok(())
    } else {
        Err("Not running as root - RT priority tests will fail".to_string())
    }
}

/// Start stress-ng load generators.
///
/// Returns the child process handle.
pub fn start_stress_ng(cpu_workers: usize, io_workers: usize) -> Result<std::process::Child, String> {
    Command::new("stress-ng")
        .arg("--cpu")
        .arg(cpu_workers.to_string())
        .arg("--io")
        .arg(io_workers.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("Failed to start stress-ng: {}", e))
}

/// Acceptance criteria for elevated latency runs.
pub struct AcceptanceCriteria {
    /// Maximum acceptable worst-case latency.
    pub max_latency: Duration,
    /// Minimum fraction of requested cycles that must complete.
    pub min_completion: f64,
}

impl Default for AcceptanceCriteria {
    fn default() -> Self {
        Self {
            max_latency: Duration::from_micros(100),
            min_completion: 1.0,
        }
    }
}

impl AcceptanceCriteria {
    /// Check if a run meets the acceptance criteria.
    pub fn check(&self, stats: &LatencyStats, requested: u64) -> bool {
        let completion = if requested == 0 {
            1.0
        } else {
            stats.count as f64 / requested as f64
        };
        stats.max() <= self.max_latency && completion >= self.min_completion
    }
}

/// Print a short summary of a run.
pub fn print_stats(label: &str, stats: &LatencyStats) {
    println!("Results ({label}):");
    println!("  Min:     {:.2} µs", stats.min_ns as f64 / 1000.0);
    println!("  Mean:    {:.2} µs", stats.mean_ns / 1000.0);
    println!("  Max:     {:.2} µs", stats.max_ns as f64 / 1000.0);
    println!("  Stddev:  {:.2} µs", stats.stddev_ns / 1000.0);
    println!("  Samples: {}", stats.count);
}
