//! Configuration structures for a latency probe run.
//!
//! Supports TOML deserialization with defaults matching a typical
//! 1 kHz control loop on an isolated core.

use crate::error::{RtError, RtResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Lowest SCHED_FIFO priority accepted.
pub const RT_PRIORITY_MIN: u8 = 1;
/// Highest SCHED_FIFO priority accepted.
pub const RT_PRIORITY_MAX: u8 = 99;

/// Top-level probe configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Log a progress line every N cycles (0 disables).
    pub progress_interval: u64,

    /// Periodic schedule and elevation parameters.
    pub schedule: ScheduleConfig,

    /// Statistics and report settings.
    pub report: ReportConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            progress_interval: 100,
            schedule: ScheduleConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

/// Immutable description of one periodic run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Interval between consecutive deadlines.
    #[serde(with = "humantime_serde")]
    pub period: Duration,

    /// Number of cycles to run.
    pub iterations: u64,

    /// SCHED_FIFO priority (1-99).
    pub priority: u8,

    /// CPU core the thread is pinned to.
    pub cpu: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(1),
            iterations: 1000,
            priority: 80,
            cpu: 2,
        }
    }
}

impl ScheduleConfig {
    /// Check the schedule against the host before any OS call is made.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::InvalidConfiguration`] for a zero period, a priority
    /// outside 1-99, or a CPU index not below `available_cpus`.
    pub fn validate(&self, available_cpus: usize) -> RtResult<()> {
        if self.period.is_zero() {
            return Err(RtError::InvalidConfiguration(
                "period must be greater than zero".into(),
            ));
        }

        if !(RT_PRIORITY_MIN..=RT_PRIORITY_MAX).contains(&self.priority) {
            return Err(RtError::InvalidConfiguration(format!(
                "priority {} outside SCHED_FIFO range {RT_PRIORITY_MIN}-{RT_PRIORITY_MAX}",
                self.priority
            )));
        }

        if self.cpu >= available_cpus {
            return Err(RtError::InvalidConfiguration(format!(
                "CPU index {} not available (host has {available_cpus} CPUs)",
                self.cpu
            )));
        }

        Ok(())
    }

    /// Nominal wall time of the whole run.
    #[must_use]
    pub fn nominal_duration(&self) -> Duration {
        let iterations = u32::try_from(self.iterations).unwrap_or(u32::MAX);
        self.period.saturating_mul(iterations)
    }
}

/// Statistics and report configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Number of histogram bins.
    pub histogram_bins: usize,

    /// Percentiles to report (e.g., [50, 90, 99, 99.9]).
    pub percentiles: Vec<f64>,

    /// Maximum-latency thresholds for the verdict.
    pub thresholds: VerdictThresholds,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            histogram_bins: 15,
            percentiles: vec![50.0, 90.0, 99.0, 99.9],
            thresholds: VerdictThresholds::default(),
        }
    }
}

/// Upper bounds (exclusive) on the worst-case latency for each verdict grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerdictThresholds {
    /// Below this the host is excellent.
    #[serde(with = "humantime_serde")]
    pub excellent: Duration,

    /// Below this the host is very good.
    #[serde(with = "humantime_serde")]
    pub very_good: Duration,

    /// Below this the host is acceptable.
    #[serde(with = "humantime_serde")]
    pub acceptable: Duration,
}

impl Default for VerdictThresholds {
    fn default() -> Self {
        Self {
            excellent: Duration::from_micros(50),
            very_good: Duration::from_micros(100),
            acceptable: Duration::from_micros(200),
        }
    }
}

impl ProbeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
