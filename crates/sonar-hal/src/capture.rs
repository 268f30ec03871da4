//! Software input-capture unit.
//!
//! Models a timer channel in pulse-width mode: the opening edge latches the
//! free-running counter, the closing edge latches it again and the width
//! notification fires with the difference. Edges arrive through an
//! [`EdgeInput`], which is what a GPIO interrupt or a simulated sensor
//! drives.

use crate::{CaptureCallback, CaptureConfig, CaptureEvent, CaptureUnit, Level};
use sonar_common::{CapturePolarity, Instant, SonarError, SonarResult, Ticks};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

#[derive(Default)]
struct CaptureState {
    config: Option<CaptureConfig>,
    callback: Option<CaptureCallback>,
    /// Counter value latched at the opening edge of the current pulse.
    window_start: Option<Ticks>,
    completed: u64,
}

impl CaptureState {
    fn on_edge(&mut self, level: Level, at: Instant) {
        let Some(config) = self.config else {
            return;
        };

        let opening = match config.polarity {
            CapturePolarity::ActiveHigh => level == Level::High,
            CapturePolarity::ActiveLow => level == Level::Low,
        };
        let counter = config.tick_rate.ticks_in_micros(at.as_micros());

        if opening {
            if self.window_start.is_some() {
                trace!(channel = config.channel, %at, "Opening edge restarts capture window");
            }
            self.window_start = Some(counter);
            return;
        }

        let Some(start) = self.window_start.take() else {
            trace!(channel = config.channel, %at, "Closing edge without open window ignored");
            return;
        };

        let event = CaptureEvent {
            width: counter.wrapping_since(start),
            completed_at: at,
        };
        self.completed += 1;
        if let Some(callback) = self.callback.as_mut() {
            callback(event);
        }
    }
}

fn lock(state: &Mutex<CaptureState>) -> MutexGuard<'_, CaptureState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Capture unit driven by explicit edge notifications.
pub struct EdgeCapture {
    label: String,
    state: Arc<Mutex<CaptureState>>,
}

impl EdgeCapture {
    /// Create a stopped capture unit for the named input pin.
    #[must_use]
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            state: Arc::new(Mutex::new(CaptureState::default())),
        }
    }

    /// Handle used to feed edges into this unit.
    #[must_use]
    pub fn input(&self) -> EdgeInput {
        EdgeInput {
            state: Arc::clone(&self.state),
        }
    }

    /// Number of pulses measured since creation.
    #[must_use]
    pub fn completed_pulses(&self) -> u64 {
        lock(&self.state).completed
    }
}

impl std::fmt::Debug for EdgeCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeCapture")
            .field("label", &self.label)
            .field("capturing", &self.is_capturing())
            .finish_non_exhaustive()
    }
}

impl CaptureUnit for EdgeCapture {
    fn start(&mut self, config: &CaptureConfig, callback: CaptureCallback) -> SonarResult<()> {
        let mut state = lock(&self.state);
        if state.config.is_some() {
            return Err(SonarError::Capture(format!(
                "capture on {} already started",
                self.label
            )));
        }

        debug!(
            pin = %self.label,
            channel = config.channel,
            tick_hz = config.tick_rate.hz(),
            polarity = ?config.polarity,
            "Starting input capture"
        );
        state.config = Some(*config);
        state.callback = Some(callback);
        state.window_start = None;
        Ok(())
    }

    fn stop(&mut self) -> SonarResult<()> {
        let mut state = lock(&self.state);
        state.config = None;
        state.callback = None;
        state.window_start = None;
        debug!(pin = %self.label, "Input capture stopped");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        lock(&self.state).config.is_some()
    }
}

/// Edge notification handle for an [`EdgeCapture`].
#[derive(Clone)]
pub struct EdgeInput {
    state: Arc<Mutex<CaptureState>>,
}

impl EdgeInput {
    /// Report that the input changed to `level` at time `at`.
    ///
    /// Runs the width callback synchronously when the edge closes a pulse.
    pub fn edge(&self, level: Level, at: Instant) {
        lock(&self.state).on_edge(level, at);
    }
}

impl std::fmt::Debug for EdgeInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeInput").finish_non_exhaustive()
    }
}
