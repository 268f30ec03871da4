//! Echo capture handler, run by the capture unit once per completed pulse.

use crate::measurement::MeasurementPublisher;
use sonar_hal::{CaptureCallback, CaptureEvent};

/// Publishes each captured pulse width into the measurement slot.
///
/// Interrupt context: one wait-free publish, nothing else.
#[derive(Debug)]
pub struct EchoHandler {
    publisher: MeasurementPublisher,
}

impl EchoHandler {
    /// Create a handler owning the slot's only writer.
    #[must_use]
    pub fn new(publisher: MeasurementPublisher) -> Self {
        Self { publisher }
    }

    /// Record one completed pulse.
    #[inline]
    pub fn on_capture(&mut self, event: CaptureEvent) {
        self.publisher.publish(event.width, event.completed_at);
    }

    /// Box the handler as a capture unit callback.
    #[must_use]
    pub fn into_callback(mut self) -> CaptureCallback {
        Box::new(move |event| self.on_capture(event))
    }
}
