//! Monotonic timebase types.
//!
//! Two clocks are in play:
//! - The system timebase ([`Instant`]), microseconds since the clock epoch,
//!   used for deadlines and capture timestamps.
//! - The capture timer ([`Ticks`]), counting at a configured [`TickRate`]
//!   and wrapping at 32 bits, used for pulse widths.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::time::Duration;

/// Microseconds per second.
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Absolute point on the monotonic system timebase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Instant(u64);

impl Instant {
    /// The clock epoch.
    pub const ZERO: Instant = Instant(0);

    /// Create an instant from microseconds since the epoch.
    #[must_use]
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Create an instant from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * 1_000)
    }

    /// Microseconds since the epoch.
    #[must_use]
    pub const fn as_micros(self) -> u64 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    #[must_use]
    pub fn saturating_duration_since(self, earlier: Instant) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

/// Convert a duration to whole microseconds, saturating at `u64::MAX`.
#[must_use]
pub fn duration_to_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant(self.0.saturating_add(duration_to_micros(rhs)))
    }
}

impl AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        self.saturating_duration_since(rhs)
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Capture timer ticks.
///
/// Wraps at 32 bits. A single pulse is assumed to be far shorter than the
/// wrap period, so widths are computed with wrapping subtraction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Ticks(pub u32);

/// Width of one echo pulse in capture timer ticks.
pub type PulseWidth = Ticks;

impl Ticks {
    /// Ticks elapsed from `start` to `self`, modulo the counter width.
    #[must_use]
    pub const fn wrapping_since(self, start: Ticks) -> Ticks {
        Ticks(self.0.wrapping_sub(start.0))
    }

    /// Raw counter value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ticks", self.0)
    }
}

/// Counting frequency of the capture timer in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TickRate(u32);

impl Default for TickRate {
    fn default() -> Self {
        Self::MHZ_1
    }
}

impl TickRate {
    /// One tick per microsecond.
    pub const MHZ_1: TickRate = TickRate(1_000_000);

    /// Create a tick rate; `None` for a zero frequency.
    #[must_use]
    pub const fn new(hz: u32) -> Option<Self> {
        if hz == 0 {
            None
        } else {
            Some(Self(hz))
        }
    }

    /// Frequency in Hz.
    #[must_use]
    pub const fn hz(self) -> u32 {
        self.0
    }

    /// Number of whole ticks in `micros` microseconds, truncated to the counter width.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn ticks_in_micros(self, micros: u64) -> Ticks {
        let ticks = u128::from(micros) * u128::from(self.0) / u128::from(MICROS_PER_SEC);
        Ticks(ticks as u32)
    }

    /// Whole microseconds spanned by `ticks`.
    #[must_use]
    pub fn micros_in(self, ticks: Ticks) -> u64 {
        u64::from(ticks.0) * MICROS_PER_SEC / u64::from(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instant_arithmetic() {
        let t = Instant::from_millis(500);
        assert_eq!(t.as_micros(), 500_000);

        let later = t + Duration::from_micros(10);
        assert_eq!(later.as_micros(), 500_010);
        assert_eq!(later - t, Duration::from_micros(10));

        // Saturates instead of going negative
        assert_eq!(t - later, Duration::ZERO);
    }

    #[test]
    fn test_ticks_wrapping() {
        let start = Ticks(u32::MAX - 9);
        let end = Ticks(90);
        assert_eq!(end.wrapping_since(start), Ticks(100));
    }

    #[test]
    fn test_tick_rate_conversions() {
        let mhz = TickRate::MHZ_1;
        assert_eq!(mhz.ticks_in_micros(5800), Ticks(5800));
        assert_eq!(mhz.micros_in(Ticks(5800)), 5800);

        let fast = TickRate::new(2_000_000).unwrap();
        assert_eq!(fast.ticks_in_micros(5800), Ticks(11_600));
        assert_eq!(fast.micros_in(Ticks(11_600)), 5800);

        assert!(TickRate::new(0).is_none());
    }
}
