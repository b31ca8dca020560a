use thiserror::Error;

/// Errors raised while validating a schedule or elevating the calling thread.
///
/// The periodic loop and the statistics engine have no error path; every
/// variant here is produced before the first cycle runs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RtError {
    /// Schedule parameters rejected before any OS call was attempted.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// `mlockall` failed; nothing was applied.
    #[error(
        "memory lock failed: {reason}. \
         Run with elevated privileges (sudo, or grant CAP_IPC_LOCK / raise RLIMIT_MEMLOCK)"
    )]
    MemoryLockFailed {
        /// OS error description.
        reason: String,
    },

    /// Switching to SCHED_FIFO failed; the memory lock has already been released.
    #[error(
        "SCHED_FIFO priority {priority} could not be applied: {reason}. \
         Run with elevated privileges (sudo, or grant CAP_SYS_NICE) and check that `ulimit -r` allows it"
    )]
    SchedulingPolicyFailed {
        /// Requested real-time priority.
        priority: u8,
        /// OS error description.
        reason: String,
    },

    /// Invalid elevation state transition attempted.
    #[error("invalid elevation transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl RtError {
    /// Returns true for failures raised by the elevation sequence itself.
    #[must_use]
    pub fn is_elevation_failure(&self) -> bool {
        matches!(
            self,
            Self::MemoryLockFailed { .. } | Self::SchedulingPolicyFailed { .. }
        )
    }
}

/// Convenience type alias for rtprobe operations.
pub type RtResult<T> = Result<T, RtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_lock_message_suggests_privileges() {
        let err = RtError::MemoryLockFailed {
            reason: "EPERM: Operation not permitted".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("EPERM"));
        assert!(msg.contains("sudo"));
        assert!(err.is_elevation_failure());
    }

    #[test]
    fn test_invalid_configuration_is_not_elevation_failure() {
        let err = RtError::InvalidConfiguration("period must be > 0".into());
        assert!(!err.is_elevation_failure());
        assert_eq!(err.to_string(), "invalid configuration: period must be > 0");
    }
}
