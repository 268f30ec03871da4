//! Peripheral abstractions for the rangefinder firmware.
//!
//! This crate provides:
//! - [`Clock`] trait for the monotonic timebase and absolute-deadline sleep
//! - [`OutputPin`] trait for the trigger and status outputs
//! - [`CaptureUnit`] trait for the timer input-capture unit measuring echo pulses
//! - [`SerialPort`] trait for the text output channel
//! - Host implementations in [`clock`], [`pin`], [`capture`] and [`serial`]
//! - A deterministic simulated board in [`sim`]

pub mod capture;
pub mod clock;
pub mod pin;
pub mod serial;
#[cfg(feature = "simulated")]
pub mod sim;

pub use capture::*;
pub use clock::*;
pub use pin::*;
pub use serial::*;

use sonar_common::{CapturePolarity, Instant, PulseWidth, SonarResult, TickRate};
use std::time::Duration;

/// Monotonic timebase.
///
/// Shared by every activity, so implementations must be usable from
/// several threads at once.
pub trait Clock: Send + Sync {
    /// Current time on the system timebase.
    fn now(&self) -> Instant;

    /// Suspend the caller until `deadline`.
    ///
    /// Returns immediately if the deadline has already passed.
    fn sleep_until(&self, deadline: Instant);

    /// Short relative delay, used for the trigger pulse.
    fn delay(&self, duration: Duration);
}

/// Push-pull digital output.
pub trait OutputPin: Send {
    /// Drive the output high.
    fn set_high(&mut self) -> SonarResult<()>;

    /// Drive the output low.
    fn set_low(&mut self) -> SonarResult<()>;

    /// Current driven level.
    fn is_set_high(&self) -> bool;

    /// Invert the driven level.
    fn toggle(&mut self) -> SonarResult<()> {
        if self.is_set_high() {
            self.set_low()
        } else {
            self.set_high()
        }
    }
}

/// Input level on a capture pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Logic low.
    Low,
    /// Logic high.
    High,
}

/// One completed pulse measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureEvent {
    /// Active-pulse width in capture timer ticks.
    pub width: PulseWidth,
    /// Time of the closing edge on the system timebase.
    pub completed_at: Instant,
}

/// Callback invoked by the capture unit once per completed pulse.
///
/// Runs in interrupt context: it must not block, allocate or do I/O.
pub type CaptureCallback = Box<dyn FnMut(CaptureEvent) + Send>;

/// Capture unit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Which level counts as the active pulse.
    pub polarity: CapturePolarity,
    /// Capture timer counting frequency.
    pub tick_rate: TickRate,
    /// Timer channel the input is routed to.
    pub channel: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            polarity: CapturePolarity::ActiveHigh,
            tick_rate: TickRate::MHZ_1,
            channel: 1,
        }
    }
}

/// Timer input-capture unit measuring active-pulse widths.
pub trait CaptureUnit: Send {
    /// Configure the unit and enable width notifications to `callback`.
    fn start(&mut self, config: &CaptureConfig, callback: CaptureCallback) -> SonarResult<()>;

    /// Disable notifications and drop the callback.
    fn stop(&mut self) -> SonarResult<()>;

    /// Whether notifications are enabled.
    fn is_capturing(&self) -> bool;
}

/// Byte-oriented text output channel.
pub trait SerialPort: Send {
    /// Write one line of text followed by the line terminator.
    fn write_line(&mut self, line: &str) -> SonarResult<()>;
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep_until(&self, deadline: Instant) {
        (**self).sleep_until(deadline);
    }

    fn delay(&self, duration: Duration) {
        (**self).delay(duration);
    }
}

impl<P: OutputPin + ?Sized> OutputPin for Box<P> {
    fn set_high(&mut self) -> SonarResult<()> {
        (**self).set_high()
    }

    fn set_low(&mut self) -> SonarResult<()> {
        (**self).set_low()
    }

    fn is_set_high(&self) -> bool {
        (**self).is_set_high()
    }

    fn toggle(&mut self) -> SonarResult<()> {
        (**self).toggle()
    }
}

impl<S: SerialPort + ?Sized> SerialPort for Box<S> {
    fn write_line(&mut self, line: &str) -> SonarResult<()> {
        (**self).write_line(line)
    }
}
