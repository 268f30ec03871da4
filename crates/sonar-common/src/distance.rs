//! Echo pulse width to distance conversion.
//!
//! Sound travels about 1 cm in 29 µs, and the echo covers the distance
//! twice, so one centimetre of range is 58 µs of pulse width.

use crate::time::{PulseWidth, TickRate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Microseconds of echo pulse width per centimetre of range.
pub const MICROS_PER_CM: u32 = 58;

/// Range to the reflecting object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Distance {
    cm: u32,
}

impl Distance {
    /// Create a distance from whole centimetres.
    #[must_use]
    pub const fn from_cm(cm: u32) -> Self {
        Self { cm }
    }

    /// Distance in whole centimetres.
    #[must_use]
    pub const fn cm(self) -> u32 {
        self.cm
    }

    /// Distance in millimetres.
    #[must_use]
    pub const fn mm(self) -> u32 {
        self.cm.saturating_mul(10)
    }

    /// Echo pulse width that a sensor reports for this distance, in microseconds.
    #[must_use]
    pub const fn echo_micros(self) -> u64 {
        self.cm as u64 * MICROS_PER_CM as u64
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cm", self.cm)
    }
}

/// Convert a pulse width counted at 1 MHz to centimetres.
///
/// Integer division; the remainder is truncated.
#[must_use]
pub const fn convert(width: PulseWidth) -> u32 {
    width.0 / MICROS_PER_CM
}

/// Convert a pulse width counted at `rate` to a distance.
///
/// The width is scaled to microseconds first, so at 1 MHz this is exactly
/// [`convert`].
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn distance_from_width(width: PulseWidth, rate: TickRate) -> Distance {
    let micros = rate.micros_in(width);
    Distance::from_cm((micros / u64::from(MICROS_PER_CM)) as u32)
}
