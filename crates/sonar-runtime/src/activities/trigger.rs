//! Trigger generator: one fixed-width high pulse on the trigger output per
//! cycle.

use crate::periodic::Activity;
use sonar_common::SonarResult;
use sonar_hal::{Clock, OutputPin};
use std::time::Duration;
use tracing::trace;

/// Activity name.
pub const TRIGGER: &str = "trigger";

/// Drives the sensor's trigger input.
#[derive(Debug)]
pub struct TriggerGenerator<P: OutputPin> {
    pin: P,
    pulse_width: Duration,
    pulses: u64,
}

impl<P: OutputPin> TriggerGenerator<P> {
    /// Create a generator emitting `pulse_width` pulses on `pin`.
    pub fn new(pin: P, pulse_width: Duration) -> Self {
        Self {
            pin,
            pulse_width,
            pulses: 0,
        }
    }

    /// Complete pulses emitted.
    pub fn pulses(&self) -> u64 {
        self.pulses
    }
}

impl<P: OutputPin> Activity for TriggerGenerator<P> {
    fn name(&self) -> &str {
        TRIGGER
    }

    fn run(&mut self, clock: &dyn Clock) -> SonarResult<()> {
        let raised = self.pin.set_high();
        if raised.is_ok() {
            clock.delay(self.pulse_width);
        }
        // Always try to release the line, even if raising it failed
        let released = self.pin.set_low();
        raised.and(released)?;

        self.pulses += 1;
        trace!(pulse = self.pulses, "Trigger pulse sent");
        Ok(())
    }
}
