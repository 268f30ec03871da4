//! Distance reporter: one line per cycle describing the latest measurement.

use crate::measurement::{Measurement, MeasurementReader};
use crate::periodic::Activity;
use sonar_common::{distance_from_width, Distance, Instant, SonarResult, TickRate};
use sonar_hal::{Clock, SerialPort};
use std::fmt;
use std::time::Duration;

/// Activity name.
pub const REPORTER: &str = "reporter";

/// What one reporter cycle says about the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    /// A recent echo.
    Distance(Distance),
    /// No echo has ever been captured.
    NoEcho,
    /// The last echo is older than the staleness threshold.
    EchoLost {
        /// Distance from the last echo.
        last: Distance,
        /// Time since that echo ended.
        age: Duration,
    },
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Distance(d) => write!(f, "HC-SR04: Distance = {} cm", d.cm()),
            Self::NoEcho => write!(f, "HC-SR04: no echo received"),
            Self::EchoLost { last, age } => write!(
                f,
                "HC-SR04: echo lost, last Distance = {} cm ({} ms ago)",
                last.cm(),
                age.as_millis()
            ),
        }
    }
}

/// Reads the measurement slot and writes the report line.
#[derive(Debug)]
pub struct DistanceReporter<S: SerialPort> {
    serial: S,
    reader: MeasurementReader,
    tick_rate: TickRate,
    stale_after: Option<Duration>,
    last: Option<Report>,
}

impl<S: SerialPort> DistanceReporter<S> {
    /// Create a reporter.
    ///
    /// With `stale_after` of `None`, an old reading keeps being reported as
    /// a current distance.
    pub fn new(
        serial: S,
        reader: MeasurementReader,
        tick_rate: TickRate,
        stale_after: Option<Duration>,
    ) -> Self {
        Self {
            serial,
            reader,
            tick_rate,
            stale_after,
            last: None,
        }
    }

    /// Most recent report written.
    pub fn last_report(&self) -> Option<Report> {
        self.last
    }

    /// Classify a slot reading at time `now`.
    pub fn classify(&self, reading: Option<Measurement>, now: Instant) -> Report {
        let Some(m) = reading else {
            return Report::NoEcho;
        };

        let distance = distance_from_width(m.width, self.tick_rate);
        let age = now.saturating_duration_since(m.captured_at);
        match self.stale_after {
            Some(limit) if age > limit => Report::EchoLost {
                last: distance,
                age,
            },
            _ => Report::Distance(distance),
        }
    }
}

impl<S: SerialPort> Activity for DistanceReporter<S> {
    fn name(&self) -> &str {
        REPORTER
    }

    fn run(&mut self, clock: &dyn Clock) -> SonarResult<()> {
        let report = self.classify(self.reader.latest(), clock.now());
        self.last = Some(report);
        self.serial.write_line(&report.to_string())
    }
}
