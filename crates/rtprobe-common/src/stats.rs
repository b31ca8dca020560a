//! Latency statistics: aggregate stats, percentiles, and histogram binning.
//!
//! Every function here is pure, never mutates its input, and never fails.
//! Empty input degrades to zero-valued or empty results, meaning "no data".

use crate::config::{ReportConfig, VerdictThresholds};
use crate::samples::LatencySample;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Default number of histogram bins.
pub const DEFAULT_HISTOGRAM_BINS: usize = 15;

/// Aggregate statistics over one sample sequence, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LatencyStats {
    /// Number of samples the stats were computed from.
    pub count: usize,
    /// Minimum latency.
    pub min_ns: u64,
    /// Maximum latency.
    pub max_ns: u64,
    /// Arithmetic mean.
    pub mean_ns: f64,
    /// Population standard deviation.
    pub stddev_ns: f64,
}

impl LatencyStats {
    /// Get jitter (max - min) in nanoseconds.
    #[must_use]
    pub fn jitter_ns(&self) -> u64 {
        self.max_ns - self.min_ns
    }

    /// Worst-case latency as a duration.
    #[must_use]
    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.max_ns)
    }

    /// Returns true if computed from an empty sequence.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Compute min, max, mean and population standard deviation.
///
/// An empty slice yields all-zero stats. The mean is accumulated in `u128`
/// so long runs of large samples cannot overflow. The standard deviation
/// uses the two-pass population formula: the measured run is the whole
/// population of interest, so the variance divides by `n`, not `n - 1`.
#[must_use]
pub fn aggregate(samples: &[LatencySample]) -> LatencyStats {
    let Some(first) = samples.first() else {
        return LatencyStats::default();
    };

    let mut min_ns = first.as_nanos();
    let mut max_ns = min_ns;
    let mut sum: u128 = 0;
    for sample in samples {
        let ns = sample.as_nanos();
        min_ns = min_ns.min(ns);
        max_ns = max_ns.max(ns);
        sum += u128::from(ns);
    }

    let n = samples.len() as f64;
    // Float rounding must not push the mean outside the observed range.
    let mean_ns = (sum as f64 / n).clamp(min_ns as f64, max_ns as f64);

    let variance = samples
        .iter()
        .map(|s| {
            let diff = s.as_nanos() as f64 - mean_ns;
            diff * diff
        })
        .sum::<f64>()
        / n;

    LatencyStats {
        count: samples.len(),
        min_ns,
        max_ns,
        mean_ns,
        stddev_ns: variance.sqrt(),
    }
}

/// Nearest-rank percentile without interpolation.
///
/// Sorts a private copy of `samples` and returns the element at index
/// `floor(p / 100 * (n - 1))`. Linear interpolation between ranks (as some
/// external tools do) would give different values near the boundaries.
///
/// Returns `None` for an empty slice or a `p` outside `[0, 100]` (including NaN).
#[must_use]
pub fn percentile(samples: &[LatencySample], p: f64) -> Option<LatencySample> {
    if samples.is_empty() || !is_valid_percentile(p) {
        return None;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    Some(rank(&sorted, p))
}

/// Compute several percentiles from a single sorted copy.
///
/// Invalid percentiles (< 0, > 100, or NaN) are skipped.
#[must_use]
pub fn percentiles(samples: &[LatencySample], ps: &[f64]) -> Vec<(f64, LatencySample)> {
    if samples.is_empty() {
        return vec![];
    }

    let mut sorted = samples.to_vec();
    sorted.sort_unstable();

    ps.iter()
        .copied()
        .filter(|&p| is_valid_percentile(p))
        .map(|p| (p, rank(&sorted, p)))
        .collect()
}

fn is_valid_percentile(p: f64) -> bool {
    (0.0..=100.0).contains(&p)
}

fn rank(sorted: &[LatencySample], p: f64) -> LatencySample {
    let last = sorted.len() - 1;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let idx = ((p / 100.0) * last as f64).floor() as usize;
    sorted[idx.min(last)]
}

/// One histogram bin covering `[lower_ns, upper_ns)`.
///
/// The last bin also holds samples equal to its upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistogramBin {
    /// Inclusive lower bound.
    pub lower_ns: u64,
    /// Upper bound.
    pub upper_ns: u64,
    /// Number of samples in this bin.
    pub count: usize,
}

/// Latency distribution with bins in ascending order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Histogram {
    bins: Vec<HistogramBin>,
}

impl Histogram {
    /// Bins in ascending order of lower bound.
    #[must_use]
    pub fn bins(&self) -> &[HistogramBin] {
        &self.bins
    }

    /// Total number of samples across all bins.
    #[must_use]
    pub fn total(&self) -> usize {
        self.bins.iter().map(|b| b.count).sum()
    }

    /// Count of the fullest bin.
    #[must_use]
    pub fn max_count(&self) -> usize {
        self.bins.iter().map(|b| b.count).max().unwrap_or(0)
    }

    /// Returns true if the histogram has no bins.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
}

/// Bin samples into `bin_count` equal-width bins between min and max.
///
/// - Empty input gives an empty histogram.
/// - If all samples are equal, a single bin `[v, v]` holds every sample.
/// - Bin width is `(max - min) / bin_count` with a floor of 1 ns, so a range
///   narrower than the bin count still divides safely.
/// - Indices are clamped into `[0, bin_count - 1]`, which absorbs the
///   integer rounding at the maximum.
///
/// A `bin_count` of 0 is treated as 1.
#[must_use]
pub fn histogram(samples: &[LatencySample], bin_count: usize) -> Histogram {
    let Some(first) = samples.first() else {
        return Histogram::default();
    };

    let (min_ns, max_ns) = samples.iter().fold((first.as_nanos(), first.as_nanos()), |(lo, hi), s| {
        (lo.min(s.as_nanos()), hi.max(s.as_nanos()))
    });

    if min_ns == max_ns {
        return Histogram {
            bins: vec![HistogramBin {
                lower_ns: min_ns,
                upper_ns: max_ns,
                count: samples.len(),
            }],
        };
    }

    let bin_count = bin_count.max(1);
    let width = ((max_ns - min_ns) / bin_count as u64).max(1);

    let mut counts = vec![0usize; bin_count];
    for sample in samples {
        let idx = usize::try_from((sample.as_nanos() - min_ns) / width).unwrap_or(usize::MAX);
        counts[idx.min(bin_count - 1)] += 1;
    }

    let bins = counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| {
            let lower_ns = min_ns.saturating_add(width.saturating_mul(i as u64));
            let mut upper_ns = lower_ns.saturating_add(width);
            if i == bin_count - 1 {
                upper_ns = upper_ns.max(max_ns);
            }
            HistogramBin {
                lower_ns,
                upper_ns,
                count,
            }
        })
        .collect();

    Histogram { bins }
}

/// Classification of a run by its worst-case latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyVerdict {
    /// Worst case below the excellent threshold.
    Excellent,
    /// Worst case below the very-good threshold.
    VeryGood,
    /// Worst case below the acceptable threshold.
    Acceptable,
    /// Worst case too high; the host configuration should be checked.
    CheckConfiguration,
}

impl LatencyVerdict {
    /// Classify a worst-case latency.
    #[must_use]
    pub fn classify(max: Duration, thresholds: &VerdictThresholds) -> Self {
        if max < thresholds.excellent {
            Self::Excellent
        } else if max < thresholds.very_good {
            Self::VeryGood
        } else if max < thresholds.acceptable {
            Self::Acceptable
        } else {
            Self::CheckConfiguration
        }
    }

    /// Returns true if the host is fit for strict latency budgets.
    #[must_use]
    pub fn is_realtime_ready(self) -> bool {
        matches!(self, Self::Excellent | Self::VeryGood)
    }
}

impl fmt::Display for LatencyVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Excellent => write!(f, "excellent"),
            Self::VeryGood => write!(f, "very good"),
            Self::Acceptable => write!(f, "acceptable"),
            Self::CheckConfiguration => write!(f, "check configuration"),
        }
    }
}

/// Everything derived from one sample sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySummary {
    /// Aggregate statistics.
    pub stats: LatencyStats,
    /// Requested percentiles as (percentile, nanoseconds).
    pub percentiles: Vec<(f64, u64)>,
    /// Latency distribution.
    pub histogram: Histogram,
    /// Verdict, absent when there were no samples.
    pub verdict: Option<LatencyVerdict>,
}

impl LatencySummary {
    /// Summarize a sample sequence according to the report settings.
    #[must_use]
    pub fn from_samples(samples: &[LatencySample], config: &ReportConfig) -> Self {
        let stats = aggregate(samples);
        let verdict =
            (!stats.is_empty()).then(|| LatencyVerdict::classify(stats.max(), &config.thresholds));

        Self {
            stats,
            percentiles: percentiles(samples, &config.percentiles)
                .into_iter()
                .map(|(p, s)| (p, s.as_nanos()))
                .collect(),
            histogram: histogram(samples, config.histogram_bins),
            verdict,
        }
    }
}
