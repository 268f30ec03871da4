//! Host monotonic clock.
//!
//! Uses `CLOCK_MONOTONIC` directly so that absolute deadlines can be handed
//! to `clock_nanosleep` with `TIMER_ABSTIME`. A deadline computed as
//! `previous + period` is then slept to exactly, with no accumulated error
//! from relative sleeps.

use crate::Clock;
use sonar_common::Instant;
use std::time::Duration;
use tracing::trace;

/// Clock backed by the operating system's monotonic timebase.
///
/// Instants are microseconds since the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch_us: u64,
}

impl SystemClock {
    /// Create a clock whose epoch is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch_us: monotonic_micros(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::from_micros(monotonic_micros().saturating_sub(self.epoch_us))
    }

    fn sleep_until(&self, deadline: Instant) {
        let absolute_us = self.epoch_us.saturating_add(deadline.as_micros());
        if absolute_us <= monotonic_micros() {
            trace!(%deadline, "Deadline already passed");
            return;
        }
        sleep_until_monotonic(absolute_us);
    }

    fn delay(&self, duration: Duration) {
        self.sleep_until(self.now() + duration);
    }
}

/// Read `CLOCK_MONOTONIC` in microseconds.
#[cfg(unix)]
#[allow(clippy::cast_sign_loss)]
fn monotonic_micros() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid, writable timespec
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000 + (ts.tv_nsec as u64) / 1_000
}

#[cfg(not(unix))]
fn monotonic_micros() -> u64 {
    use std::sync::OnceLock;
    static ORIGIN: OnceLock<std::time::Instant> = OnceLock::new();
    let origin = ORIGIN.get_or_init(std::time::Instant::now);
    sonar_common::duration_to_micros(origin.elapsed())
}

/// Sleep until an absolute `CLOCK_MONOTONIC` time, resuming after signals.
#[cfg(target_os = "linux")]
#[allow(clippy::cast_possible_wrap)]
fn sleep_until_monotonic(absolute_us: u64) {
    let ts = libc::timespec {
        tv_sec: (absolute_us / 1_000_000) as libc::time_t,
        tv_nsec: ((absolute_us % 1_000_000) * 1_000) as libc::c_long,
    };

    loop {
        // SAFETY: ts is a valid timespec; remain may be null with TIMER_ABSTIME
        let rc = unsafe {
            libc::clock_nanosleep(
                libc::CLOCK_MONOTONIC,
                libc::TIMER_ABSTIME,
                &ts,
                std::ptr::null_mut(),
            )
        };
        if rc != libc::EINTR {
            break;
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn sleep_until_monotonic(absolute_us: u64) {
    let now = monotonic_micros();
    if absolute_us > now {
        std::thread::sleep(Duration::from_micros(absolute_us - now));
    }
}
