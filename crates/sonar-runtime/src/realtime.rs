//! Real-time scheduling and memory locking for activity threads.
//!
//! On Linux each activity thread can run under `SCHED_FIFO` or `SCHED_RR`
//! at the OS priority mapped from its [`Priority`], so the trigger and the
//! reporter preempt the blinker. Missing privileges degrade to a warning
//! and normal time-sharing.

use sonar_common::config::{Priority, RealtimeConfig, SchedPolicy};
#[cfg(target_os = "linux")]
use sonar_common::error::SonarError;
use sonar_common::error::SonarResult;
use tracing::{debug, info, warn};

/// Outcome of configuring one activity thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadSched {
    /// Applied scheduler policy, `None` if left at the default.
    pub policy: Option<SchedPolicy>,
    /// Applied OS priority.
    pub priority: Option<u8>,
}

impl ThreadSched {
    const UNCHANGED: ThreadSched = ThreadSched {
        policy: None,
        priority: None,
    };
}

/// Process-wide real-time setup, run once before activity threads start.
///
/// Returns whether memory was locked.
///
/// # Errors
///
/// Returns an error if `mlockall` fails for a reason other than missing
/// privileges.
pub fn init_process(config: &RealtimeConfig) -> SonarResult<bool> {
    if !config.enabled {
        info!("Real-time scheduling disabled in configuration");
        return Ok(false);
    }

    let caps = check_rt_capabilities();
    debug!(?caps, "Real-time capabilities");
    if !caps.can_use_rt_scheduling() {
        warn!("No RT scheduling privileges detected; activities will run time-shared");
    }

    if config.lock_memory {
        lock_memory()
    } else {
        Ok(false)
    }
}

/// Apply the real-time policy to the calling thread.
///
/// # Errors
///
/// Returns an error if the scheduler rejects the request for a reason other
/// than missing privileges.
pub fn apply_thread_priority(
    config: &RealtimeConfig,
    priority: Priority,
) -> SonarResult<ThreadSched> {
    if !config.enabled {
        return Ok(ThreadSched::UNCHANGED);
    }
    set_thread_scheduler(config.policy, config.os_priority(priority))
}

/// Lock all current and future memory pages.
#[cfg(target_os = "linux")]
fn lock_memory() -> SonarResult<bool> {
    use nix::sys::mman::{mlockall, MlockAllFlags};

    debug!("Locking memory pages with mlockall");

    match mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE) {
        Ok(()) => {
            info!("Memory locked successfully");
            Ok(true)
        }
        Err(nix::errno::Errno::EPERM) => {
            warn!(
                "mlockall failed with EPERM - running without CAP_IPC_LOCK capability. \
                 Page faults may occur during execution."
            );
            Ok(false)
        }
        Err(e) => Err(SonarError::Realtime(format!("mlockall failed: {e}"))),
    }
}

#[cfg(not(target_os = "linux"))]
fn lock_memory() -> SonarResult<bool> {
    warn!("mlockall not available on this platform");
    Ok(false)
}

/// Set the scheduler policy and priority of the calling thread.
#[cfg(target_os = "linux")]
fn set_thread_scheduler(policy: SchedPolicy, priority: u8) -> SonarResult<ThreadSched> {
    let linux_policy = match policy {
        SchedPolicy::Fifo => libc::SCHED_FIFO,
        SchedPolicy::Rr => libc::SCHED_RR,
        SchedPolicy::Other => {
            debug!("Using SCHED_OTHER (non-RT) scheduling");
            return Ok(ThreadSched {
                policy: Some(SchedPolicy::Other),
                priority: None,
            });
        }
    };

    let clamped = priority.clamp(1, 99);
    if clamped != priority {
        warn!(
            original = priority,
            clamped, "Scheduler priority clamped to valid range"
        );
    }

    let param = libc::sched_param {
        sched_priority: i32::from(clamped),
    };

    // SAFETY: pthread_self() is always a valid handle for the calling thread
    // and param outlives the call
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), linux_policy, &param) };

    match rc {
        0 => {
            debug!(?policy, priority = clamped, "Thread scheduler configured");
            Ok(ThreadSched {
                policy: Some(policy),
                priority: Some(clamped),
            })
        }
        libc::EPERM => {
            warn!(
                ?policy,
                priority = clamped,
                "pthread_setschedparam failed with EPERM - running without RT privileges. \
                 Consider running with CAP_SYS_NICE capability or as root."
            );
            Ok(ThreadSched::UNCHANGED)
        }
        err => Err(SonarError::Realtime(format!(
            "pthread_setschedparam failed: {}",
            std::io::Error::from_raw_os_error(err)
        ))),
    }
}

#[cfg(not(target_os = "linux"))]
fn set_thread_scheduler(policy: SchedPolicy, priority: u8) -> SonarResult<ThreadSched> {
    warn!(
        ?policy,
        priority, "Real-time scheduling not available on this platform"
    );
    Ok(ThreadSched::UNCHANGED)
}

/// Information about real-time capabilities of the system.
#[derive(Debug, Clone, Default)]
pub struct RtCapabilities {
    /// Whether running as root.
    pub is_root: bool,
    /// RLIMIT_RTPRIO value (max RT priority allowed).
    pub rtprio_limit: Option<u64>,
    /// Whether running on a PREEMPT_RT kernel.
    pub preempt_rt: bool,
}

impl RtCapabilities {
    /// Check if RT scheduling is likely to succeed.
    #[must_use]
    pub fn can_use_rt_scheduling(&self) -> bool {
        self.is_root || self.rtprio_limit.is_some_and(|l| l > 0)
    }
}

/// Check if the current process has real-time capabilities.
#[cfg(target_os = "linux")]
#[must_use]
pub fn check_rt_capabilities() -> RtCapabilities {
    // SAFETY: geteuid has no preconditions
    let is_root = unsafe { libc::geteuid() } == 0;

    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: rlim is a valid, writable rlimit
    let rtprio_limit =
        (unsafe { libc::getrlimit(libc::RLIMIT_RTPRIO, &mut rlim) } == 0).then_some(rlim.rlim_cur);

    let preempt_rt = std::fs::read_to_string("/proc/version")
        .is_ok_and(|v| v.contains("PREEMPT_RT") || v.contains("PREEMPT RT"));

    RtCapabilities {
        is_root,
        rtprio_limit,
        preempt_rt,
    }
}

#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn check_rt_capabilities() -> RtCapabilities {
    RtCapabilities::default()
}
