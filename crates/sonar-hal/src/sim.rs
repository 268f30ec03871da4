//! Simulated board for tests and host runs.
//!
//! - [`SimClock`] is a virtual timebase that only moves when told to.
//! - [`RecordingPin`] keeps a timestamped history of every level change.
//! - [`BufferSerial`] collects output lines.
//! - [`SimulatedSensor`] sits on the trigger pin and answers each trigger
//!   pulse with an echo pulse on an [`EdgeInput`].

use crate::{Clock, EdgeInput, Level, OutputPin, SerialPort};
use sonar_common::{Distance, Instant, SimulationConfig, SonarError, SonarResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Shortest trigger pulse the sensor responds to.
pub const MIN_TRIGGER_PULSE: Duration = Duration::from_micros(10);

/// Deterministic virtual clock.
///
/// `sleep_until` jumps straight to the deadline instead of blocking, so a
/// single-context scheduler runs at full speed with exact timestamps.
#[derive(Debug, Default)]
pub struct SimClock {
    now_us: AtomicU64,
}

impl SimClock {
    /// Create a clock at the epoch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock starting at `start`.
    #[must_use]
    pub fn starting_at(start: Instant) -> Self {
        Self {
            now_us: AtomicU64::new(start.as_micros()),
        }
    }

    /// Move time forward, e.g. to model a body that takes a while.
    pub fn advance(&self, duration: Duration) {
        self.now_us
            .fetch_add(sonar_common::duration_to_micros(duration), Ordering::AcqRel);
    }
}

impl Clock for SimClock {
    fn now(&self) -> Instant {
        Instant::from_micros(self.now_us.load(Ordering::Acquire))
    }

    fn sleep_until(&self, deadline: Instant) {
        self.now_us.fetch_max(deadline.as_micros(), Ordering::AcqRel);
    }

    fn delay(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// One recorded level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinEdge {
    /// When the level changed.
    pub at: Instant,
    /// New level.
    pub high: bool,
}

/// Output pin that records its level history against a clock.
///
/// Clones share the history.
#[derive(Clone)]
pub struct RecordingPin {
    clock: Arc<dyn Clock>,
    level: Arc<AtomicBool>,
    history: Arc<Mutex<Vec<PinEdge>>>,
}

impl RecordingPin {
    /// Create a pin driven low.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            level: Arc::new(AtomicBool::new(false)),
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// All level changes so far, oldest first.
    #[must_use]
    pub fn edges(&self) -> Vec<PinEdge> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn drive(&self, high: bool) {
        if self.level.swap(high, Ordering::AcqRel) != high {
            let edge = PinEdge {
                at: self.clock.now(),
                high,
            };
            self.history
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(edge);
        }
    }
}

impl std::fmt::Debug for RecordingPin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingPin")
            .field("high", &self.is_set_high())
            .finish_non_exhaustive()
    }
}

impl OutputPin for RecordingPin {
    fn set_high(&mut self) -> SonarResult<()> {
        self.drive(true);
        Ok(())
    }

    fn set_low(&mut self) -> SonarResult<()> {
        self.drive(false);
        Ok(())
    }

    fn is_set_high(&self) -> bool {
        self.level.load(Ordering::Acquire)
    }
}

/// Serial port that keeps every line in memory.
///
/// Clones share the buffer. Writes can be made to fail to exercise error
/// paths.
#[derive(Debug, Clone, Default)]
pub struct BufferSerial {
    lines: Arc<Mutex<Vec<String>>>,
    failing: Arc<AtomicBool>,
}

impl BufferSerial {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines written so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }
}

impl SerialPort for BufferSerial {
    fn write_line(&mut self, line: &str) -> SonarResult<()> {
        if self.failing.load(Ordering::Acquire) {
            return Err(SonarError::Serial("transmitter disabled".into()));
        }
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
        Ok(())
    }
}

/// Encoding of "no object in range" in [`SensorControl`].
const DISCONNECTED: u64 = 0;

#[derive(Debug)]
struct SensorShared {
    /// 0 when disconnected, otherwise centimetres + 1.
    distance: AtomicU64,
    echo_delay_us: AtomicU64,
    echoes: AtomicU64,
}

/// Live controls of a [`SimulatedSensor`].
#[derive(Debug, Clone)]
pub struct SensorControl {
    shared: Arc<SensorShared>,
}

impl SensorControl {
    /// Create controls with the given target distance and echo delay.
    #[must_use]
    pub fn new(distance_cm: Option<u32>, echo_delay: Duration) -> Self {
        let control = Self {
            shared: Arc::new(SensorShared {
                distance: AtomicU64::new(DISCONNECTED),
                echo_delay_us: AtomicU64::new(sonar_common::duration_to_micros(echo_delay)),
                echoes: AtomicU64::new(0),
            }),
        };
        control.set_distance(distance_cm);
        control
    }

    /// Create controls from the `[simulation]` configuration section.
    #[must_use]
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(config.distance_cm, config.echo_delay)
    }

    /// Move the target; `None` removes it so no echo comes back.
    pub fn set_distance(&self, distance_cm: Option<u32>) {
        let encoded = distance_cm.map_or(DISCONNECTED, |cm| u64::from(cm) + 1);
        self.shared.distance.store(encoded, Ordering::Release);
    }

    /// Current target distance.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn distance(&self) -> Option<Distance> {
        match self.shared.distance.load(Ordering::Acquire) {
            DISCONNECTED => None,
            encoded => Some(Distance::from_cm((encoded - 1) as u32)),
        }
    }

    /// Delay between the end of the trigger pulse and the echo rising edge.
    #[must_use]
    pub fn echo_delay(&self) -> Duration {
        Duration::from_micros(self.shared.echo_delay_us.load(Ordering::Acquire))
    }

    /// Number of echo pulses scheduled so far.
    #[must_use]
    pub fn echoes_sent(&self) -> u64 {
        self.shared.echoes.load(Ordering::Acquire)
    }
}

/// One scheduled echo pulse.
#[derive(Debug, Clone, Copy)]
struct Echo {
    rise_at: Instant,
    fall_at: Instant,
}

enum EchoDelivery {
    /// Edges fed from the trigger caller's context, timestamped in advance.
    Immediate(EdgeInput),
    /// Edges fed by a dedicated thread at their scheduled times.
    Threaded {
        tx: Option<Sender<Echo>>,
        worker: Option<JoinHandle<()>>,
    },
}

/// HC-SR04 model wrapping the trigger output.
///
/// When a high pulse of at least [`MIN_TRIGGER_PULSE`] ends, the sensor
/// raises the echo line after the echo delay and holds it for
/// `distance * 58 µs`.
pub struct SimulatedSensor<P: OutputPin> {
    pin: P,
    clock: Arc<dyn Clock>,
    control: SensorControl,
    pulse_started: Option<Instant>,
    delivery: EchoDelivery,
}

impl<P: OutputPin> SimulatedSensor<P> {
    /// Sensor that delivers each echo immediately with future timestamps.
    ///
    /// Suited to a [`SimClock`] in a single context, where nothing else
    /// would run while an echo is in flight.
    pub fn new(pin: P, clock: Arc<dyn Clock>, input: EdgeInput, control: SensorControl) -> Self {
        Self {
            pin,
            clock,
            control,
            pulse_started: None,
            delivery: EchoDelivery::Immediate(input),
        }
    }

    /// Sensor that delivers echoes from an `echo` thread sleeping until
    /// each edge is due.
    ///
    /// # Errors
    ///
    /// Returns [`SonarError::Io`] if the thread cannot be spawned.
    pub fn spawn(
        pin: P,
        clock: Arc<dyn Clock>,
        input: EdgeInput,
        control: SensorControl,
    ) -> SonarResult<Self> {
        let (tx, rx) = mpsc::channel::<Echo>();
        let echo_clock = Arc::clone(&clock);

        let worker = thread::Builder::new()
            .name("echo".into())
            .spawn(move || {
                while let Ok(echo) = rx.recv() {
                    echo_clock.sleep_until(echo.rise_at);
                    input.edge(Level::High, echo.rise_at);
                    echo_clock.sleep_until(echo.fall_at);
                    input.edge(Level::Low, echo.fall_at);
                }
                debug!("Echo generator exiting");
            })
            .map_err(|e| SonarError::Io(format!("failed to spawn echo thread: {e}")))?;

        Ok(Self {
            pin,
            clock,
            control,
            pulse_started: None,
            delivery: EchoDelivery::Threaded {
                tx: Some(tx),
                worker: Some(worker),
            },
        })
    }

    /// Handle for changing the target while the sensor is owned elsewhere.
    #[must_use]
    pub fn control(&self) -> SensorControl {
        self.control.clone()
    }

    fn trigger_ended(&mut self, now: Instant) {
        let Some(started) = self.pulse_started.take() else {
            return;
        };

        let width = now - started;
        if width < MIN_TRIGGER_PULSE {
            trace!(width_us = width.as_micros(), "Trigger pulse too short, ignored");
            return;
        }

        let Some(distance) = self.control.distance() else {
            trace!("No target in range, no echo");
            return;
        };

        let rise_at = now + self.control.echo_delay();
        let echo = Echo {
            rise_at,
            fall_at: rise_at + Duration::from_micros(distance.echo_micros()),
        };
        self.control.shared.echoes.fetch_add(1, Ordering::AcqRel);

        match &mut self.delivery {
            EchoDelivery::Immediate(input) => {
                input.edge(Level::High, echo.rise_at);
                input.edge(Level::Low, echo.fall_at);
            }
            EchoDelivery::Threaded { tx: Some(tx), .. } => {
                if tx.send(echo).is_err() {
                    warn!("Echo generator gone, echo dropped");
                }
            }
            EchoDelivery::Threaded { tx: None, .. } => {}
        }
    }
}

impl<P: OutputPin> OutputPin for SimulatedSensor<P> {
    fn set_high(&mut self) -> SonarResult<()> {
        if !self.pin.is_set_high() {
            self.pulse_started = Some(self.clock.now());
        }
        self.pin.set_high()
    }

    fn set_low(&mut self) -> SonarResult<()> {
        let was_high = self.pin.is_set_high();
        self.pin.set_low()?;
        if was_high {
            let now = self.clock.now();
            self.trigger_ended(now);
        }
        Ok(())
    }

    fn is_set_high(&self) -> bool {
        self.pin.is_set_high()
    }
}

impl<P: OutputPin> Drop for SimulatedSensor<P> {
    fn drop(&mut self) {
        if let EchoDelivery::Threaded { tx, worker } = &mut self.delivery {
            drop(tx.take());
            if let Some(worker) = worker.take() {
                if worker.join().is_err() {
                    warn!("Echo generator panicked");
                }
            }
        }
    }
}
