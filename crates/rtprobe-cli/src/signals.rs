//! Signal handling for a clean stop between cycles.
//!
//! SIGINT and SIGTERM set an atomic flag that the periodic loop checks
//! before each sleep. The loop then returns normally, so the elevation
//! handle is dropped and the thread leaves real-time scheduling.

use nix::libc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use tracing::debug;

/// Set by the signal handler; read by the periodic loop.
static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);
/// Last signal number received (0 if none).
static LAST_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// Signal types that stop a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM - Graceful termination request.
    Terminate,
    /// SIGINT - Interrupt (Ctrl+C).
    Interrupt,
}

impl SignalKind {
    fn from_raw(signum: i32) -> Option<Self> {
        match signum {
            libc::SIGTERM => Some(Self::Terminate),
            libc::SIGINT => Some(Self::Interrupt),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Handle to the process-wide stop flag.
#[derive(Debug, Clone, Copy)]
pub struct SignalHandler {
    _private: (),
}

impl SignalHandler {
    /// Register handlers for SIGINT and SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if `sigaction` fails.
    pub fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        register_unix_handlers()?;

        Ok(Self { _private: () })
    }

    /// Flag the periodic loop polls between cycles.
    #[must_use]
    pub fn stop_flag(&self) -> &'static AtomicBool {
        &STOP_REQUESTED
    }

    /// Signal that caused the stop, if any.
    #[must_use]
    pub fn last_signal(&self) -> Option<SignalKind> {
        SignalKind::from_raw(LAST_SIGNAL.load(Ordering::Relaxed))
    }
}

extern "C" fn stop_handler(signum: libc::c_int) {
    // Only async-signal-safe work here: two atomic stores.
    LAST_SIGNAL.store(signum, Ordering::Relaxed);
    STOP_REQUESTED.store(true, Ordering::Relaxed);
}

#[cfg(unix)]
fn register_unix_handlers() -> std::io::Result<()> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    // No SA_RESTART: an absolute sleep interrupted here is resumed by the
    // clock, and the flag is seen before the next cycle.
    let action = SigAction::new(
        SigHandler::Handler(stop_handler),
        SaFlags::empty(),
        SigSet::empty(),
    );

    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only performs atomic stores
        unsafe { sigaction(signal, &action) }.map_err(std::io::Error::from)?;
    }

    debug!("Unix signal handlers registered");
    Ok(())
}
