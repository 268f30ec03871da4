//! Signal handling for graceful daemon shutdown.
//!
//! SIGTERM and SIGINT set an atomic flag from the handler; the main loop
//! polls it. Handlers only touch atomics, which keeps them
//! async-signal-safe.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

static SIGNALLED: AtomicBool = AtomicBool::new(false);
static LAST_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// Signal types that stop the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM - Graceful termination request.
    Terminate,
    /// SIGINT - Interrupt (Ctrl+C).
    Interrupt,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
        }
    }
}

#[cfg(unix)]
fn kind_of(signal: i32) -> Option<SignalKind> {
    match signal {
        libc::SIGTERM => Some(SignalKind::Terminate),
        libc::SIGINT => Some(SignalKind::Interrupt),
        _ => None,
    }
}

#[cfg(not(unix))]
fn kind_of(_signal: i32) -> Option<SignalKind> {
    None
}

/// Shutdown request source shared by the main loop.
#[derive(Debug, Clone, Default)]
pub struct SignalHandler {
    manual: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register SIGTERM and SIGINT on Unix.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS rejects a handler.
    pub fn new() -> std::io::Result<Self> {
        let handler = Self::default();

        #[cfg(unix)]
        register_unix_handlers()?;

        Ok(handler)
    }

    /// Check if shutdown has been requested by a signal or manually.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        SIGNALLED.load(Ordering::Relaxed) || self.manual.load(Ordering::Relaxed)
    }

    /// The signal that requested shutdown, if any.
    pub fn received(&self) -> Option<SignalKind> {
        kind_of(LAST_SIGNAL.load(Ordering::Relaxed))
    }

    /// Manually request shutdown.
    pub fn request_shutdown(&self) {
        info!("Manual shutdown requested");
        self.manual.store(true, Ordering::Relaxed);
    }

    /// Block until shutdown is requested or `timeout` expires.
    ///
    /// Returns `true` if shutdown was requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(50);

        while start.elapsed() < timeout {
            if self.shutdown_requested() {
                return true;
            }
            std::thread::sleep(poll_interval.min(timeout.saturating_sub(start.elapsed())));
        }

        self.shutdown_requested()
    }
}

#[cfg(unix)]
fn register_unix_handlers() -> std::io::Result<()> {
    use std::os::raw::c_int;

    extern "C" fn on_signal(signal: c_int) {
        LAST_SIGNAL.store(signal, Ordering::Relaxed);
        SIGNALLED.store(true, Ordering::Relaxed);
    }

    for signal in [libc::SIGTERM, libc::SIGINT] {
        // SAFETY: on_signal only performs atomic stores
        let previous = unsafe { libc::signal(signal, on_signal as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
    }

    debug!("Unix signal handlers registered");
    Ok(())
}
