//! Real-time elevation of the calling thread.
//!
//! [`elevate`] performs, in order:
//! 1. Memory locking (mlockall) so page faults cannot stall the loop
//! 2. SCHED_FIFO at the configured priority
//! 3. CPU affinity to a single, ideally isolated, core
//!
//! Steps 1 and 2 are fatal and roll back what was already applied. Step 3
//! is best-effort and only produces an [`AffinityWarning`]. The returned
//! [`ElevationHandle`] releases the elevation when reverted or dropped.

use crate::platform::{LinuxPlatform, RtPlatform, ThreadPolicy};
use rtprobe_common::config::ScheduleConfig;
use rtprobe_common::error::{RtError, RtResult};
use rtprobe_common::state::{ElevationState, RollbackStep};
use serde::Serialize;
use static_assertions::assert_not_impl_any;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Non-fatal failure to pin the thread to its CPU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AffinityWarning {
    /// CPU the thread should have been pinned to.
    pub cpu: usize,
    /// OS error description.
    pub reason: String,
}

impl fmt::Display for AffinityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "could not pin thread to CPU {}: {}; measurements may show extra jitter",
            self.cpu, self.reason
        )
    }
}

/// Scoped ownership of an elevated thread.
///
/// Reverting restores SCHED_OTHER at priority 0 and releases the memory
/// lock. It happens at most once: explicitly through [`revert`](Self::revert)
/// or implicitly on drop, so every exit path releases the elevation.
#[derive(Debug)]
pub struct ElevationHandle<P: RtPlatform> {
    platform: P,
    state: ElevationState,
    config: ScheduleConfig,
    affinity_warning: Option<AffinityWarning>,
}

assert_not_impl_any!(ElevationHandle<LinuxPlatform>: Clone, Copy);

/// Elevate the calling thread on the host platform.
///
/// # Errors
///
/// See [`elevate`].
pub fn elevate_current_thread(config: &ScheduleConfig) -> RtResult<ElevationHandle<LinuxPlatform>> {
    elevate(LinuxPlatform::new(), config)
}

/// Validate `config`, then lock memory, apply SCHED_FIFO and pin the thread.
///
/// # Errors
///
/// - [`RtError::InvalidConfiguration`] before any OS call if the schedule is
///   invalid for this host.
/// - [`RtError::MemoryLockFailed`] if `mlockall` fails; nothing is applied.
/// - [`RtError::SchedulingPolicyFailed`] if SCHED_FIFO cannot be applied; the
///   memory lock is released before returning.
pub fn elevate<P: RtPlatform>(platform: P, config: &ScheduleConfig) -> RtResult<ElevationHandle<P>> {
    let available_cpus = platform.available_cpus();
    config.validate(available_cpus)?;

    let mut handle = ElevationHandle {
        platform,
        state: ElevationState::Unconfigured,
        config: *config,
        affinity_warning: None,
    };

    match handle.platform.query_policy() {
        Ok(before) => debug!(policy = %before.policy, priority = before.priority, "Current scheduling policy"),
        Err(e) => debug!(error = %e, "Could not query current scheduling policy"),
    }

    info!(
        priority = config.priority,
        cpu = config.cpu,
        available_cpus,
        "Elevating thread to real-time"
    );

    // 1. Memory lock
    debug!("Locking memory pages with mlockall");
    if let Err(e) = handle.platform.lock_memory() {
        let err = RtError::MemoryLockFailed {
            reason: e.to_string(),
        };
        handle.abort(&err)?;
        return Err(err);
    }
    handle.state.transition_to(ElevationState::MemoryLocked)?;
    info!("Memory locked (MCL_CURRENT | MCL_FUTURE)");

    // 2. SCHED_FIFO
    if let Err(e) = handle.platform.set_fifo(config.priority) {
        let err = RtError::SchedulingPolicyFailed {
            priority: config.priority,
            reason: e.to_string(),
        };
        handle.abort(&err)?;
        return Err(err);
    }
    handle.state.transition_to(ElevationState::SchedulingApplied)?;
    info!(priority = config.priority, "SCHED_FIFO applied");

    // 3. CPU affinity (best-effort)
    match handle.platform.pin_to_cpu(config.cpu) {
        Ok(()) => {
            handle.state.transition_to(ElevationState::AffinityApplied)?;
            let isolated = handle.platform.isolated_cpus();
            if isolated.contains(&config.cpu) {
                info!(cpu = config.cpu, "Thread pinned to isolated CPU");
            } else {
                warn!(
                    cpu = config.cpu,
                    ?isolated,
                    "Thread pinned to a CPU that is not isolated; \
                     boot with isolcpus= to remove scheduler noise"
                );
            }
        }
        Err(e) => {
            let warning = AffinityWarning {
                cpu: config.cpu,
                reason: e.to_string(),
            };
            warn!(%warning, "CPU affinity not applied, continuing");
            handle.affinity_warning = Some(warning);
        }
    }

    Ok(handle)
}

impl<P: RtPlatform> ElevationHandle<P> {
    /// Current elevation state.
    pub fn state(&self) -> &ElevationState {
        &self.state
    }

    /// Schedule the thread was elevated for.
    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// Warning recorded if the thread could not be pinned.
    pub fn affinity_warning(&self) -> Option<&AffinityWarning> {
        self.affinity_warning.as_ref()
    }

    /// Returns true until the elevation has been released.
    pub fn is_elevated(&self) -> bool {
        self.state.is_elevated()
    }

    /// Policy the thread currently runs under, as reported by the OS.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the policy cannot be queried.
    pub fn current_policy(&self) -> std::io::Result<ThreadPolicy> {
        self.platform.query_policy()
    }

    /// Release the elevation: SCHED_OTHER at priority 0, then `munlockall`.
    ///
    /// Idempotent; calls after the first do nothing. Failures of individual
    /// rollback steps are logged and do not stop the remaining steps.
    pub fn revert(&mut self) {
        if !self.state.is_elevated() {
            return;
        }

        self.rollback();
        self.state = ElevationState::Reverted;
        info!("Real-time elevation reverted");
    }

    /// Undo every step the current state says was applied.
    fn rollback(&mut self) {
        for step in self.state.rollback_steps() {
            let result = match step {
                RollbackStep::RestoreDefaultPolicy => self.platform.set_default_policy(),
                RollbackStep::UnlockMemory => self.platform.unlock_memory(),
            };
            match result {
                Ok(()) => debug!(?step, "Rollback step applied"),
                Err(e) => error!(?step, error = %e, "Rollback step failed"),
            }
        }
    }

    /// Fatal step failed: roll back and record the failure.
    fn abort(&mut self, err: &RtError) -> RtResult<()> {
        error!(error = %err, state = %self.state, "Real-time elevation failed");
        self.rollback();
        self.state.transition_to(ElevationState::Failed(err.to_string()))
    }
}

impl<P: RtPlatform> Drop for ElevationHandle<P> {
    fn drop(&mut self) {
        self.revert();
    }
}

/// Information about real-time capabilities of the system.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RtCapabilities {
    /// Whether running as root.
    pub is_root: bool,
    /// RLIMIT_RTPRIO value (max RT priority allowed).
    pub rtprio_limit: Option<u64>,
    /// RLIMIT_MEMLOCK value (max lockable memory).
    pub memlock_limit: Option<u64>,
    /// Whether running on a PREEMPT_RT kernel.
    pub preempt_rt: bool,
    /// Kernel release string from `uname -r`.
    pub kernel_release: Option<String>,
    /// Online CPUs.
    pub online_cpus: usize,
    /// CPUs isolated from general scheduling.
    pub isolated_cpus: Vec<usize>,
}

impl RtCapabilities {
    /// Check if RT scheduling is likely to succeed.
    #[must_use]
    pub fn can_use_rt_scheduling(&self) -> bool {
        self.is_root || self.rtprio_limit.is_some_and(|l| l > 0)
    }

    /// Check if memory locking is likely to succeed.
    #[must_use]
    pub fn can_lock_memory(&self) -> bool {
        if self.is_root {
            return true;
        }

        #[cfg(target_family = "unix")]
        {
            self.memlock_limit.is_some_and(|l| l == libc::RLIM_INFINITY)
        }

        #[cfg(not(target_family = "unix"))]
        {
            false
        }
    }

    /// Check if `cpu` is excluded from general load balancing.
    #[must_use]
    pub fn is_isolated(&self, cpu: usize) -> bool {
        self.isolated_cpus.contains(&cpu)
    }
}

/// Probe the host's real-time capabilities.
#[cfg(target_os = "linux")]
#[must_use]
pub fn check_rt_capabilities() -> RtCapabilities {
    use std::fs;

    let platform = LinuxPlatform::new();
    let mut caps = RtCapabilities {
        // SAFETY: geteuid cannot fail
        is_root: unsafe { libc::geteuid() } == 0,
        online_cpus: platform.available_cpus(),
        isolated_cpus: platform.isolated_cpus(),
        ..Default::default()
    };

    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: rlim is a valid, writable rlimit
    if unsafe { libc::getrlimit(libc::RLIMIT_RTPRIO, &mut rlim) } == 0 {
        caps.rtprio_limit = Some(rlim.rlim_cur);
    }

    // SAFETY: rlim is a valid, writable rlimit
    if unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, &mut rlim) } == 0 {
        caps.memlock_limit = Some(rlim.rlim_cur);
    }

    if let Ok(version) = fs::read_to_string("/proc/version") {
        caps.preempt_rt = version.contains("PREEMPT_RT") || version.contains("PREEMPT RT");
    }

    caps.kernel_release = nix::sys::utsname::uname()
        .ok()
        .map(|u| u.release().to_string_lossy().into_owned());

    caps
}

#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn check_rt_capabilities() -> RtCapabilities {
    RtCapabilities {
        online_cpus: LinuxPlatform::new().available_cpus(),
        ..Default::default()
    }
}
