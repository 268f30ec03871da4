//! Status blinker: toggles the indicator once per cycle.

use crate::periodic::Activity;
use sonar_common::SonarResult;
use sonar_hal::{Clock, OutputPin};

/// Activity name.
pub const BLINKER: &str = "blinker";

/// Heartbeat on the status indicator.
#[derive(Debug)]
pub struct StatusBlinker<P: OutputPin> {
    pin: P,
    toggles: u64,
}

impl<P: OutputPin> StatusBlinker<P> {
    /// Create a blinker on `pin`.
    pub fn new(pin: P) -> Self {
        Self { pin, toggles: 0 }
    }

    /// Toggles performed.
    pub fn toggles(&self) -> u64 {
        self.toggles
    }
}

impl<P: OutputPin> Activity for StatusBlinker<P> {
    fn name(&self) -> &str {
        BLINKER
    }

    fn run(&mut self, _clock: &dyn Clock) -> SonarResult<()> {
        self.pin.toggle()?;
        self.toggles += 1;
        Ok(())
    }
}
