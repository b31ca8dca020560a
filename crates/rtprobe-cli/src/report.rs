//! Run report: system information, latency summary, and recommendations.
//!
//! Rendered either as human-readable text or as JSON for tooling.

use rtprobe_common::config::{ScheduleConfig, VerdictThresholds};
use rtprobe_common::stats::{Histogram, LatencyStats, LatencySummary, LatencyVerdict};
use rtprobe_runtime::realtime::{AffinityWarning, RtCapabilities};
use serde::Serialize;
use std::time::Duration;

/// Width of the longest histogram bar, in characters.
pub const HISTOGRAM_BAR_WIDTH: usize = 40;

/// Reference tool for long stress runs.
const CYCLICTEST_HINT: &str = "sudo cyclictest -t1 -p 80 -a 2 -m -i 1000 -l 3600000";

/// Everything known about one probe invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Host capabilities probed before elevation.
    pub capabilities: RtCapabilities,
    /// Schedule the measured loop ran with.
    pub schedule: ScheduleConfig,
    /// Thresholds the verdict was graded against.
    pub thresholds: VerdictThresholds,
    /// Set if the thread could not be pinned.
    pub affinity_warning: Option<AffinityWarning>,
    /// Cycles that produced a sample.
    pub completed: usize,
    /// Signal that ended the run early, if any.
    pub stopped_by: Option<String>,
    /// Statistics of the elevated run.
    pub summary: LatencySummary,
    /// Statistics of the unelevated baseline run, with `--compare`.
    pub baseline: Option<LatencySummary>,
}

impl RunReport {
    /// Returns true if every requested cycle ran.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed as u64 >= self.schedule.iterations
    }

    /// Whether the worst case calls for tuning advice.
    #[must_use]
    pub fn needs_tuning(&self) -> bool {
        !self.summary.stats.is_empty() && self.summary.stats.max() >= self.thresholds.very_good
    }
}

fn us(ns: u64) -> f64 {
    ns as f64 / 1000.0
}

fn duration_us(d: Duration) -> u128 {
    d.as_micros()
}

/// Render the report as text.
#[must_use]
pub fn render_text(report: &RunReport) -> String {
    let mut output = String::new();

    output.push_str(&render_system_info(&report.capabilities, report.schedule.cpu));
    output.push('\n');

    output.push_str(&format!(
        "Schedule: period {} us, {} iterations, SCHED_FIFO priority {}, CPU {}\n",
        duration_us(report.schedule.period),
        report.schedule.iterations,
        report.schedule.priority,
        report.schedule.cpu
    ));
    if let Some(warning) = &report.affinity_warning {
        output.push_str(&format!("Warning: {warning}\n"));
    }
    if !report.is_complete() {
        output.push_str(&format!(
            "Run stopped early{}: {} of {} cycles completed\n",
            report
                .stopped_by
                .as_ref()
                .map(|s| format!(" by {s}"))
                .unwrap_or_default(),
            report.completed,
            report.schedule.iterations
        ));
    }
    output.push('\n');

    if report.summary.stats.is_empty() {
        output.push_str("No latency samples recorded.\n");
        return output;
    }

    output.push_str(&render_summary(&report.summary));
    output.push('\n');
    output.push_str("Latency histogram:\n");
    output.push_str(&render_histogram(&report.summary.histogram));

    if let Some(baseline) = &report.baseline {
        output.push('\n');
        output.push_str(&render_comparison(&baseline.stats, &report.summary.stats));
    }

    output.push('\n');
    output.push_str(&render_recommendations(report));
    output
}

/// Render the report as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn render_json(report: &RunReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

fn render_system_info(caps: &RtCapabilities, cpu: usize) -> String {
    let mut output = String::from("System:\n");

    output.push_str(&format!(
        "  Kernel:        {}{}\n",
        caps.kernel_release.as_deref().unwrap_or("unknown"),
        if caps.preempt_rt { " (PREEMPT_RT)" } else { "" }
    ));
    output.push_str(&format!("  Online CPUs:   {}\n", caps.online_cpus));

    let isolated = if caps.isolated_cpus.is_empty() {
        "none".to_string()
    } else {
        caps.isolated_cpus
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    };
    output.push_str(&format!("  Isolated CPUs: {isolated}\n"));
    output.push_str(&format!("  Running as root: {}\n", caps.is_root));
    output.push_str(&format!(
        "  RLIMIT_RTPRIO: {}\n",
        format_limit(caps.rtprio_limit)
    ));
    output.push_str(&format!(
        "  RLIMIT_MEMLOCK: {}\n",
        format_limit(caps.memlock_limit)
    ));

    if !caps.is_isolated(cpu) {
        output.push_str(&format!(
            "  Note: CPU {cpu} is not isolated; expect scheduler noise\n"
        ));
    }
    output
}

fn format_limit(limit: Option<u64>) -> String {
    match limit {
        None => "unknown".to_string(),
        #[cfg(target_family = "unix")]
        Some(l) if l == nix::libc::RLIM_INFINITY => "unlimited".to_string(),
        Some(l) => l.to_string(),
    }
}

fn render_summary(summary: &LatencySummary) -> String {
    let stats = &summary.stats;
    let mut output = String::from("Latency:\n");

    output.push_str(&format!("  Samples: {:>10}\n", stats.count));
    output.push_str(&format!("  Min:     {:>10.2} us\n", us(stats.min_ns)));
    output.push_str(&format!("  Max:     {:>10.2} us", us(stats.max_ns)));
    if let Some(verdict) = summary.verdict {
        output.push_str(&format!("  <- {verdict}"));
    }
    output.push('\n');
    output.push_str(&format!("  Mean:    {:>10.2} us\n", stats.mean_ns / 1000.0));
    output.push_str(&format!("  Stddev:  {:>10.2} us\n", stats.stddev_ns / 1000.0));

    for (p, ns) in &summary.percentiles {
        output.push_str(&format!("  p{:<7}{:>10.2} us\n", p, us(*ns)));
    }
    output
}

/// Render one line per bin with a bar scaled to the fullest bin.
#[must_use]
pub fn render_histogram(histogram: &Histogram) -> String {
    let max_count = histogram.max_count();
    if max_count == 0 {
        return "  (no data)\n".to_string();
    }

    let mut output = String::new();
    for bin in histogram.bins() {
        let bar_len = bin.count * HISTOGRAM_BAR_WIDTH / max_count;
        output.push_str(&format!(
            "  {:>8.1}-{:<8.1} us: {}",
            us(bin.lower_ns),
            us(bin.upper_ns),
            "#".repeat(bar_len)
        ));
        if bin.count > 0 {
            output.push_str(&format!(" {}", bin.count));
        }
        output.push('\n');
    }
    output
}

/// Relative reduction from `before` to `after`, in percent.
fn improvement(before: f64, after: f64) -> Option<f64> {
    (before > 0.0).then(|| (before - after) / before * 100.0)
}

fn format_improvement(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.1}%"))
}

/// Side-by-side table of an unelevated baseline and the elevated run.
#[must_use]
pub fn render_comparison(baseline: &LatencyStats, elevated: &LatencyStats) -> String {
    let rows = [
        ("Min", us(baseline.min_ns), us(elevated.min_ns)),
        ("Max", us(baseline.max_ns), us(elevated.max_ns)),
        ("Mean", baseline.mean_ns / 1000.0, elevated.mean_ns / 1000.0),
        ("Stddev", baseline.stddev_ns / 1000.0, elevated.stddev_ns / 1000.0),
    ];

    let mut output = String::from("Comparison:\n");
    output.push_str(&format!(
        "  {:<8} {:>14} {:>14} {:>12}\n",
        "Metric", "Baseline (us)", "Real-time (us)", "Improvement"
    ));
    for (name, before, after) in rows {
        output.push_str(&format!(
            "  {:<8} {:>14.2} {:>14.2} {:>12}\n",
            name,
            before,
            after,
            format_improvement(improvement(before, after))
        ));
    }
    output
}

fn render_recommendations(report: &RunReport) -> String {
    let mut output = String::from("Recommendations:\n");

    match report.summary.verdict {
        Some(verdict) if verdict.is_realtime_ready() && !report.needs_tuning() => {
            output.push_str(
                "  Real-time configuration looks good; this host suits strict latency budgets.\n",
            );
        }
        _ => {
            output.push_str(&format!(
                "  Worst-case latency is at or above {} us. Check:\n",
                duration_us(report.thresholds.very_good)
            ));
            if !report.capabilities.preempt_rt {
                output.push_str("  - RT kernel active: uname -r should mention 'rt' or 'realtime'\n");
            }
            if !report.capabilities.is_isolated(report.schedule.cpu) {
                output.push_str(&format!(
                    "  - Isolated CPUs: /sys/devices/system/cpu/isolated should include CPU {} (isolcpus=)\n",
                    report.schedule.cpu
                ));
            }
            output.push_str("  - RT limits: ulimit -r should be 99\n");
            if report.summary.verdict == Some(LatencyVerdict::CheckConfiguration) {
                output.push_str(
                    "  - Background load: IRQ affinity, CPU frequency scaling and SMT siblings\n",
                );
            }
        }
    }

    output.push_str(&format!("\nFor long stress runs use cyclictest:\n  {CYCLICTEST_HINT}\n"));
    output
}
