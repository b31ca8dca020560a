//! rtprobe entry point.
//!
//! Elevates the calling thread to real-time, runs a drift-free periodic
//! loop, and reports the distribution of wake-up latencies.

mod report;
mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use rtprobe_common::config::{ConfigError, ProbeConfig};
use rtprobe_common::error::RtError;
use rtprobe_common::stats::LatencySummary;
use rtprobe_runtime::realtime::{check_rt_capabilities, elevate_current_thread};
use rtprobe_runtime::scheduler::PeriodicScheduler;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::report::{render_json, render_text, RunReport};
use crate::signals::SignalHandler;

/// Environment variable naming a configuration file.
const CONFIG_ENV: &str = "RTPROBE_CONFIG";
/// System-wide configuration file.
const SYSTEM_CONFIG_PATH: &str = "/etc/rtprobe/config.toml";

/// Exit status for a failed elevation.
const EXIT_ELEVATION_FAILED: u8 = 1;
/// Exit status for invalid arguments or configuration (clap also uses 2).
const EXIT_INVALID_CONFIG: u8 = 2;

/// rtprobe command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "rtprobe",
    about = "Measure wake-up latency of a real-time periodic thread",
    version,
    long_about = None
)]
struct Args {
    /// Path to a probe configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Period between deadlines (e.g. 1ms, 500us).
    #[arg(long, short = 'p', value_parser = humantime::parse_duration)]
    period: Option<Duration>,

    /// Number of cycles to measure.
    #[arg(long, short = 'n')]
    iterations: Option<u64>,

    /// SCHED_FIFO priority (1-99).
    #[arg(long, short = 'P')]
    priority: Option<u8>,

    /// CPU core to pin the measuring thread to.
    #[arg(long, short = 'a')]
    cpu: Option<usize>,

    /// Number of histogram bins.
    #[arg(long)]
    bins: Option<usize>,

    /// Percentiles to report, comma separated (e.g. 50,99,99.9).
    #[arg(long, value_delimiter = ',')]
    percentiles: Option<Vec<f64>>,

    /// Run an unelevated baseline first and print a comparison.
    #[arg(long)]
    compare: bool,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "warn")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(&args.log_level);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "rtprobe failed");
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Initialize logging with the specified log level.
///
/// Logs go to stderr so the report on stdout stays machine-readable.
fn init_logging(level: &str) {
    let filter = format!("rtprobe={level},rtprobe_runtime={level},rtprobe_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Map a failure to the process exit status.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<ConfigError>().is_some() {
        return EXIT_INVALID_CONFIG;
    }
    match err.downcast_ref::<RtError>() {
        Some(RtError::InvalidConfiguration(_)) => EXIT_INVALID_CONFIG,
        Some(e) if e.is_elevation_failure() => EXIT_ELEVATION_FAILED,
        _ => 1,
    }
}

fn run(args: &Args) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting rtprobe");

    let mut config = load_config(args)?;
    apply_overrides(&mut config, args);

    let capabilities = check_rt_capabilities();
    info!(
        is_root = capabilities.is_root,
        preempt_rt = capabilities.preempt_rt,
        online_cpus = capabilities.online_cpus,
        "Host capabilities"
    );
    if !capabilities.preempt_rt {
        warn!("Kernel is not PREEMPT_RT; expect higher worst-case latency");
    }
    if !capabilities.can_use_rt_scheduling() {
        warn!("RLIMIT_RTPRIO is 0 and not running as root; SCHED_FIFO will likely be refused");
    }
    if !capabilities.is_isolated(config.schedule.cpu) {
        warn!(cpu = config.schedule.cpu, "Target CPU is not isolated");
    }

    config.schedule.validate(capabilities.online_cpus)?;

    info!(
        period = %humantime::format_duration(config.schedule.period),
        iterations = config.schedule.iterations,
        nominal = %humantime::format_duration(config.schedule.nominal_duration()),
        "Configuration loaded"
    );

    let signal_handler = SignalHandler::install().context("Failed to set up signal handlers")?;

    let baseline = if args.compare {
        info!("Running unelevated baseline");
        let log = PeriodicScheduler::monotonic()
            .with_progress_interval(config.progress_interval)
            .run_until(&config.schedule, signal_handler.stop_flag());
        Some(LatencySummary::from_samples(&log, &config.report))
    } else {
        None
    };

    let mut handle = elevate_current_thread(&config.schedule)?;
    let affinity_warning = handle.affinity_warning().cloned();

    let log = PeriodicScheduler::monotonic()
        .with_progress_interval(config.progress_interval)
        .run_until(&config.schedule, signal_handler.stop_flag());

    handle.revert();

    let stopped_by = signal_handler.last_signal().map(|s| s.to_string());
    if let Some(signal) = &stopped_by {
        info!(%signal, completed = log.len(), "Run interrupted");
    }

    let report = RunReport {
        capabilities,
        schedule: config.schedule,
        thresholds: config.report.thresholds,
        affinity_warning,
        completed: log.len(),
        stopped_by,
        summary: LatencySummary::from_samples(&log, &config.report),
        baseline,
    };

    if args.json {
        println!("{}", render_json(&report).context("Failed to serialize report")?);
    } else {
        print!("{}", render_text(&report));
    }

    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `RTPROBE_CONFIG` environment variable
/// 3. `/etc/rtprobe/config.toml` (system path)
/// 4. Built-in defaults
fn load_config(args: &Args) -> Result<ProbeConfig> {
    // 1. Command-line argument (highest priority)
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return ProbeConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()));
    }

    // 2. Environment variable
    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from {CONFIG_ENV}");
            return ProbeConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {CONFIG_ENV}={env_path}"));
        }
        warn!(
            path = %env_path,
            "{CONFIG_ENV} set but file does not exist, checking other locations"
        );
    }

    // 3. System path
    let system_path = PathBuf::from(SYSTEM_CONFIG_PATH);
    if system_path.exists() {
        info!(?system_path, "Loading config from system path");
        return ProbeConfig::from_file(&system_path)
            .with_context(|| format!("Failed to load config from {SYSTEM_CONFIG_PATH}"));
    }

    // 4. Built-in defaults
    info!("No config file found, using built-in defaults");
    Ok(ProbeConfig::default())
}

/// Command-line flags win over the configuration file.
fn apply_overrides(config: &mut ProbeConfig, args: &Args) {
    if let Some(period) = args.period {
        config.schedule.period = period;
    }
    if let Some(iterations) = args.iterations {
        config.schedule.iterations = iterations;
    }
    if let Some(priority) = args.priority {
        config.schedule.priority = priority;
    }
    if let Some(cpu) = args.cpu {
        config.schedule.cpu = cpu;
    }
    if let Some(bins) = args.bins {
        config.report.histogram_bins = bins;
    }
    if let Some(percentiles) = &args.percentiles {
        config.report.percentiles.clone_from(percentiles);
    }
}
