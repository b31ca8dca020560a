//! Elevation state machine.
//!
//! One elevation attempt moves strictly forward:
//! UNCONFIGURED → MEMORY_LOCKED → SCHEDULING_APPLIED → AFFINITY_APPLIED
//!
//! A fatal step moves to FAILED after rolling back what the current state
//! says was applied. A released handle ends in REVERTED.

use crate::error::{RtError, RtResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Progress of one elevation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElevationState {
    /// Nothing applied yet.
    #[default]
    Unconfigured,
    /// All current and future pages are locked.
    MemoryLocked,
    /// SCHED_FIFO is active on the calling thread.
    SchedulingApplied,
    /// Thread is pinned to its target CPU. Terminal success state.
    AffinityApplied,
    /// A fatal step failed; prior steps were rolled back.
    Failed(String),
    /// Elevation was released.
    Reverted,
}

/// An OS-level change that must be undone when leaving a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackStep {
    /// Return the thread to SCHED_OTHER at priority 0.
    RestoreDefaultPolicy,
    /// Release the `mlockall` lock.
    UnlockMemory,
}

impl fmt::Display for ElevationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconfigured => write!(f, "UNCONFIGURED"),
            Self::MemoryLocked => write!(f, "MEMORY_LOCKED"),
            Self::SchedulingApplied => write!(f, "SCHEDULING_APPLIED"),
            Self::AffinityApplied => write!(f, "AFFINITY_APPLIED"),
            Self::Failed(_) => write!(f, "FAILED"),
            Self::Reverted => write!(f, "REVERTED"),
        }
    }
}

impl ElevationState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: &ElevationState) -> bool {
        use ElevationState::{
            AffinityApplied, Failed, MemoryLocked, Reverted, SchedulingApplied, Unconfigured,
        };

        matches!(
            (self, target),
            (Unconfigured, MemoryLocked)
                | (MemoryLocked, SchedulingApplied)
                | (SchedulingApplied, AffinityApplied)
                // Fatal steps
                | (Unconfigured, Failed(_))
                | (MemoryLocked, Failed(_))
                // Release; affinity is best-effort so SCHEDULING_APPLIED may be final
                | (SchedulingApplied, Reverted)
                | (AffinityApplied, Reverted)
                | (MemoryLocked, Reverted)
        )
    }

    /// Attempt to transition to `target`, returning error if invalid.
    pub fn transition_to(&mut self, target: ElevationState) -> RtResult<()> {
        if self.can_transition_to(&target) {
            *self = target;
            Ok(())
        } else {
            Err(RtError::InvalidStateTransition {
                from: self.to_string(),
                to: target.to_string(),
            })
        }
    }

    /// OS changes applied so far, in the order they must be undone.
    #[must_use]
    pub fn rollback_steps(&self) -> &'static [RollbackStep] {
        match self {
            Self::MemoryLocked => &[RollbackStep::UnlockMemory],
            Self::SchedulingApplied | Self::AffinityApplied => &[
                RollbackStep::RestoreDefaultPolicy,
                RollbackStep::UnlockMemory,
            ],
            Self::Unconfigured | Self::Failed(_) | Self::Reverted => &[],
        }
    }

    /// Returns true while the thread holds real-time state that must be released.
    #[must_use]
    pub fn is_elevated(&self) -> bool {
        !self.rollback_steps().is_empty()
    }

    /// Failure reason, if this attempt failed.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}
