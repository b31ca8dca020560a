//! OS scheduling and memory facilities used by the elevation sequence.
//!
//! [`RtPlatform`] is the seam between the elevation state machine and the
//! kernel. [`LinuxPlatform`] talks to Linux through `nix` and `libc`.

use serde::Serialize;
use std::fmt;
use std::io;

/// Kernel scheduling policy of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedPolicy {
    /// SCHED_FIFO: First-in-first-out real-time.
    Fifo,
    /// SCHED_RR: Round-robin real-time.
    Rr,
    /// SCHED_OTHER and the other time-shared policies.
    Other,
}

impl fmt::Display for SchedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fifo => write!(f, "SCHED_FIFO"),
            Self::Rr => write!(f, "SCHED_RR"),
            Self::Other => write!(f, "SCHED_OTHER"),
        }
    }
}

/// Scheduling policy and priority of the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThreadPolicy {
    /// Active policy.
    pub policy: SchedPolicy,
    /// Static priority (0 for time-shared policies).
    pub priority: u8,
}

impl ThreadPolicy {
    /// The kernel default: SCHED_OTHER at priority 0.
    pub const DEFAULT: ThreadPolicy = ThreadPolicy {
        policy: SchedPolicy::Other,
        priority: 0,
    };
}

/// Process and thread level real-time facilities.
///
/// Every mutating call acts on the calling thread (or, for memory locking,
/// the calling process).
pub trait RtPlatform {
    /// Number of online CPUs.
    fn available_cpus(&self) -> usize;

    /// CPUs excluded from general load balancing (`isolcpus=`).
    fn isolated_cpus(&self) -> Vec<usize>;

    /// Current policy of the calling thread.
    fn query_policy(&self) -> io::Result<ThreadPolicy>;

    /// Lock all current and future pages (`mlockall(MCL_CURRENT | MCL_FUTURE)`).
    fn lock_memory(&mut self) -> io::Result<()>;

    /// Release every locked page (`munlockall`).
    fn unlock_memory(&mut self) -> io::Result<()>;

    /// Switch the calling thread to SCHED_FIFO at `priority`.
    fn set_fifo(&mut self, priority: u8) -> io::Result<()>;

    /// Return the calling thread to SCHED_OTHER at priority 0.
    fn set_default_policy(&mut self) -> io::Result<()>;

    /// Restrict the calling thread to a single CPU.
    fn pin_to_cpu(&mut self, cpu: usize) -> io::Result<()>;
}

/// Linux implementation backed by `nix` and `libc`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxPlatform;

impl LinuxPlatform {
    /// Create the platform handle.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "linux")]
impl RtPlatform for LinuxPlatform {
    fn available_cpus(&self) -> usize {
        // SAFETY: sysconf is safe to call
        let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        usize::try_from(n).unwrap_or(1).max(1)
    }

    fn isolated_cpus(&self) -> Vec<usize> {
        std::fs::read_to_string("/sys/devices/system/cpu/isolated")
            .ok()
            .and_then(|s| parse_cpu_list(&s).ok())
            .unwrap_or_default()
    }

    fn query_policy(&self) -> io::Result<ThreadPolicy> {
        // SAFETY: sched_getscheduler has no memory-safety preconditions
        let policy = unsafe { libc::sched_getscheduler(0) };
        if policy == -1 {
            return Err(io::Error::last_os_error());
        }

        let mut param = libc::sched_param { sched_priority: 0 };
        // SAFETY: param is a valid, writable sched_param
        if unsafe { libc::sched_getparam(0, &mut param) } == -1 {
            return Err(io::Error::last_os_error());
        }

        let policy = match policy & !libc::SCHED_RESET_ON_FORK {
            libc::SCHED_FIFO => SchedPolicy::Fifo,
            libc::SCHED_RR => SchedPolicy::Rr,
            _ => SchedPolicy::Other,
        };

        Ok(ThreadPolicy {
            policy,
            priority: u8::try_from(param.sched_priority).unwrap_or(0),
        })
    }

    fn lock_memory(&mut self) -> io::Result<()> {
        use nix::sys::mman::{mlockall, MlockAllFlags};

        mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE).map_err(io::Error::from)
    }

    fn unlock_memory(&mut self) -> io::Result<()> {
        nix::sys::mman::munlockall().map_err(io::Error::from)
    }

    fn set_fifo(&mut self, priority: u8) -> io::Result<()> {
        set_scheduler(libc::SCHED_FIFO, i32::from(priority))
    }

    fn set_default_policy(&mut self) -> io::Result<()> {
        set_scheduler(libc::SCHED_OTHER, 0)
    }

    fn pin_to_cpu(&mut self, cpu: usize) -> io::Result<()> {
        use nix::sched::{sched_setaffinity, CpuSet};
        use nix::unistd::Pid;

        let mut cpu_set = CpuSet::new();
        cpu_set.set(cpu).map_err(io::Error::from)?;
        sched_setaffinity(Pid::from_raw(0), &cpu_set).map_err(io::Error::from)
    }
}

#[cfg(target_os = "linux")]
fn set_scheduler(policy: libc::c_int, priority: libc::c_int) -> io::Result<()> {
    let param = libc::sched_param {
        sched_priority: priority,
    };

    // SAFETY: sched_setscheduler is safe when called with valid parameters
    let result = unsafe { libc::sched_setscheduler(0, policy, &param) };
    if result == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
impl RtPlatform for LinuxPlatform {
    fn available_cpus(&self) -> usize {
        std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    }

    fn isolated_cpus(&self) -> Vec<usize> {
        Vec::new()
    }

    fn query_policy(&self) -> io::Result<ThreadPolicy> {
        Ok(ThreadPolicy::DEFAULT)
    }

    fn lock_memory(&mut self) -> io::Result<()> {
        Err(unsupported("mlockall"))
    }

    fn unlock_memory(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn set_fifo(&mut self, _priority: u8) -> io::Result<()> {
        Err(unsupported("SCHED_FIFO"))
    }

    fn set_default_policy(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn pin_to_cpu(&mut self, _cpu: usize) -> io::Result<()> {
        Err(unsupported("CPU affinity"))
    }
}

#[cfg(not(target_os = "linux"))]
fn unsupported(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{what} not available on this platform"),
    )
}

/// Error parsing a kernel cpulist string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid CPU list entry {0:?}")]
pub struct CpuListError(pub String);

/// Parse a kernel cpulist such as `"2-3,5"` into sorted CPU indices.
///
/// Whitespace is trimmed and an empty string yields an empty list.
///
/// # Errors
///
/// Returns an error for a non-numeric entry or a reversed range.
pub fn parse_cpu_list(list: &str) -> Result<Vec<usize>, CpuListError> {
    let mut cpus = Vec::new();

    for entry in list.trim().split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let bad = || CpuListError(entry.to_string());
        match entry.split_once('-') {
            Some((start, end)) => {
                let start: usize = start.trim().parse().map_err(|_| bad())?;
                let end: usize = end.trim().parse().map_err(|_| bad())?;
                if start > end {
                    return Err(bad());
                }
                cpus.extend(start..=end);
            }
            None => cpus.push(entry.parse().map_err(|_| bad())?),
        }
    }

    cpus.sort_unstable();
    cpus.dedup();
    Ok(cpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(parse_cpu_list("2-3").unwrap(), vec![2, 3]);
        assert_eq!(parse_cpu_list("0,2-4,7\n").unwrap(), vec![0, 2, 3, 4, 7]);
        assert_eq!(parse_cpu_list("5,1,1").unwrap(), vec![1, 5]);
        assert!(parse_cpu_list("").unwrap().is_empty());
        assert!(parse_cpu_list("\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_cpu_list_rejects_garbage() {
        assert_eq!(parse_cpu_list("a").unwrap_err(), CpuListError("a".into()));
        assert!(parse_cpu_list("4-2").is_err());
        assert!(parse_cpu_list("1-").is_err());
    }

    #[test]
    fn test_available_cpus_nonzero() {
        assert!(LinuxPlatform::new().available_cpus() >= 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_query_policy_unprivileged() {
        // Test threads start under the default time-shared policy.
        let policy = LinuxPlatform::new().query_policy().unwrap();
        assert_eq!(policy.policy, SchedPolicy::Other);
        assert_eq!(policy.priority, 0);
    }
}
