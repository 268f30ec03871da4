//! Firmware assembly: bring-up, activity wiring and the two execution modes.
//!
//! Boot sequence (BOOT → INIT):
//! 1. Validate the configuration
//! 2. Drive the trigger output low
//! 3. Start echo capture with the [`EchoHandler`] callback
//! 4. Print the startup banner on the serial port
//! 5. Build the trigger, reporter and blinker tasks
//!
//! The firmware then enters RUN either cooperatively
//! ([`Firmware::run_until`]) or with one thread per activity
//! ([`Firmware::spawn`]).

use crate::activities::{DistanceReporter, EchoHandler, StatusBlinker, TriggerGenerator};
use crate::executor::CooperativeScheduler;
use crate::measurement::{measurement_slot, MeasurementReader};
use crate::periodic::PeriodicTask;
use crate::realtime;
use serde::Serialize;
use sonar_common::{
    FirmwareConfig, FirmwareState, Instant, MetricsSnapshot, Priority, SonarError, SonarResult,
    StateMachine,
};
use sonar_hal::{CaptureConfig, CaptureUnit, Clock, OutputPin, SerialPort};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Startup banner, first line on the serial port.
pub const BANNER: &str = concat!(" sonar-rt ", env!("CARGO_PKG_VERSION"), " HC-SR04 ranger");

/// Printed once bring-up has finished.
pub const BOOT_COMPLETE: &str = " test message to print after boot complete";

/// Sample formatted number printed after boot.
pub const BEST_NUMBER: i32 = 17;

/// Peripherals the firmware runs on.
pub struct Board {
    /// System timebase.
    pub clock: Arc<dyn Clock>,
    /// Sensor trigger output.
    pub trigger: Box<dyn OutputPin>,
    /// Status indicator output.
    pub status_led: Box<dyn OutputPin>,
    /// Timer capture unit on the echo input.
    pub capture: Box<dyn CaptureUnit>,
    /// Text output channel.
    pub serial: Box<dyn SerialPort>,
}

impl std::fmt::Debug for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Board").finish_non_exhaustive()
    }
}

/// Per-activity summary.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityReport {
    /// Activity name.
    pub name: String,
    /// Scheduling priority.
    pub priority: Priority,
    /// Release period in milliseconds.
    pub period_ms: u64,
    /// Cycles executed.
    pub cycles: u64,
    /// Timing metrics.
    pub metrics: MetricsSnapshot,
}

impl ActivityReport {
    fn from_task(task: &PeriodicTask) -> Self {
        Self {
            name: task.name().to_string(),
            priority: task.priority(),
            period_ms: u64::try_from(task.period().as_millis()).unwrap_or(u64::MAX),
            cycles: task.cycle_count(),
            metrics: task.snapshot(),
        }
    }
}

/// Booted firmware.
pub struct Firmware {
    config: FirmwareConfig,
    state: StateMachine,
    scheduler: CooperativeScheduler<Arc<dyn Clock>>,
    capture: Box<dyn CaptureUnit>,
    reader: MeasurementReader,
}

impl Firmware {
    /// Bring up the board and build the activities.
    ///
    /// # Errors
    ///
    /// Any peripheral or configuration failure is fatal to startup and
    /// returned as is.
    pub fn boot(config: FirmwareConfig, board: Board) -> SonarResult<Self> {
        let mut state = StateMachine::new();
        info!(version = env!("CARGO_PKG_VERSION"), "Booting firmware");

        match Self::bring_up(config, board, &mut state) {
            Ok(firmware) => Ok(firmware),
            Err(e) => {
                state.enter_fault();
                error!(error = %e, state = %state.state(), "Boot failed");
                Err(e)
            }
        }
    }

    fn bring_up(
        config: FirmwareConfig,
        board: Board,
        state: &mut StateMachine,
    ) -> SonarResult<Self> {
        state.transition(FirmwareState::Init)?;

        config
            .validate()
            .map_err(|e| SonarError::Config(e.to_string()))?;
        let tick_rate = config
            .tick_rate()
            .map_err(|e| SonarError::Config(e.to_string()))?;

        let Board {
            clock,
            mut trigger,
            status_led,
            mut capture,
            mut serial,
        } = board;

        debug!(pin = %config.pins.trigger, "Configuring trigger output low");
        trigger.set_low()?;

        let (publisher, reader) = measurement_slot();
        let capture_config = CaptureConfig {
            polarity: config.capture.polarity,
            tick_rate,
            channel: config.capture.channel,
        };
        debug!(pin = %config.pins.echo, "Starting echo capture");
        capture.start(&capture_config, EchoHandler::new(publisher).into_callback())?;

        serial.write_line(BANNER)?;
        serial.write_line(BOOT_COMPLETE)?;
        serial.write_line(&format!(" my best number is: {BEST_NUMBER}"))?;

        let histogram = config.metrics.histogram_size;
        let mut scheduler = CooperativeScheduler::new(clock);
        scheduler.add(PeriodicTask::new(
            Box::new(TriggerGenerator::new(trigger, config.trigger.pulse_width)),
            config.trigger.period,
            config.trigger.priority,
            histogram,
        ));
        scheduler.add(PeriodicTask::new(
            Box::new(DistanceReporter::new(
                serial,
                reader.clone(),
                tick_rate,
                config.reporter.stale_after,
            )),
            config.reporter.period,
            config.reporter.priority,
            histogram,
        ));
        scheduler.add(PeriodicTask::new(
            Box::new(StatusBlinker::new(status_led)),
            config.blinker.period,
            config.blinker.priority,
            histogram,
        ));

        info!(
            trigger_ms = config.trigger.period.as_millis(),
            reporter_ms = config.reporter.period.as_millis(),
            blinker_ms = config.blinker.period.as_millis(),
            "Boot complete"
        );

        Ok(Self {
            config,
            state: state.clone(),
            scheduler,
            capture,
            reader,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> FirmwareState {
        self.state.state()
    }

    /// Reader on the measurement slot.
    pub fn measurements(&self) -> MeasurementReader {
        self.reader.clone()
    }

    /// The periodic tasks.
    pub fn tasks(&self) -> &[PeriodicTask] {
        self.scheduler.tasks()
    }

    /// Current time on the firmware's clock.
    pub fn now(&self) -> Instant {
        self.scheduler.clock().now()
    }

    /// Per-activity summaries.
    pub fn reports(&self) -> Vec<ActivityReport> {
        self.tasks().iter().map(ActivityReport::from_task).collect()
    }

    fn enter_run(&mut self) -> SonarResult<()> {
        if self.state.state() != FirmwareState::Run {
            self.state.transition(FirmwareState::Run)?;
            info!("Entering RUN");
        }
        Ok(())
    }

    /// Dispatch every release at or before `limit` from the calling context.
    ///
    /// The first call activates all tasks at the current time.
    ///
    /// # Errors
    ///
    /// Fails if the firmware has been shut down.
    pub fn run_until(&mut self, limit: Instant) -> SonarResult<usize> {
        self.enter_run()?;
        Ok(self.scheduler.run_until(limit))
    }

    /// Dispatch every release within `duration` from now.
    ///
    /// # Errors
    ///
    /// Fails if the firmware has been shut down.
    pub fn run_for(&mut self, duration: Duration) -> SonarResult<usize> {
        let limit = self.now() + duration;
        self.run_until(limit)
    }

    /// Stop capturing and leave RUN.
    ///
    /// # Errors
    ///
    /// Returns an error if the capture unit fails to stop.
    pub fn shutdown(&mut self) -> SonarResult<Vec<ActivityReport>> {
        self.capture.stop()?;
        if self.state.state() == FirmwareState::Run {
            self.state.transition(FirmwareState::Stopped)?;
        }
        info!("Firmware stopped");
        Ok(self.reports())
    }

    /// Start one thread per activity and enter RUN.
    ///
    /// All tasks share one start time. On Linux with real-time enabled each
    /// thread takes the OS priority mapped from its activity priority.
    ///
    /// # Errors
    ///
    /// Returns an error if real-time setup fails hard, leaving the firmware
    /// in INIT, or if a thread cannot be spawned. In the latter case threads
    /// already started are stopped and the firmware enters FAULT.
    pub fn spawn(mut self) -> SonarResult<FirmwareHandle> {
        realtime::init_process(&self.config.realtime)?;
        self.enter_run()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let clock = Arc::clone(self.scheduler.clock());
        let start = clock.now();

        let mut handle = FirmwareHandle {
            threads: Vec::new(),
            shutdown: Arc::clone(&shutdown),
            capture: self.capture,
            state: self.state,
            reader: self.reader,
        };

        for mut task in self.scheduler.into_tasks() {
            let name = task.name().to_string();
            let priority = task.priority();
            let rt = self.config.realtime.clone();
            let clock = Arc::clone(&clock);
            let shutdown = Arc::clone(&shutdown);

            task.activate(start);
            let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
                if let Err(e) = realtime::apply_thread_priority(&rt, priority) {
                    warn!(activity = task.name(), error = %e, "Real-time setup failed");
                }
                task.run(clock.as_ref(), &shutdown);
                task
            });

            match spawned {
                Ok(join) => handle.threads.push((name, join)),
                Err(e) => {
                    let err = SonarError::Activity {
                        name,
                        reason: format!("failed to spawn thread: {e}"),
                    };
                    error!(error = %err, "Activity start failed");
                    return Err(handle.abort(err));
                }
            }
        }

        info!(threads = handle.threads.len(), "Activities running");
        Ok(handle)
    }
}

impl std::fmt::Debug for Firmware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Firmware")
            .field("state", &self.state.state())
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

/// Running threaded firmware.
pub struct FirmwareHandle {
    threads: Vec<(String, JoinHandle<PeriodicTask>)>,
    shutdown: Arc<AtomicBool>,
    capture: Box<dyn CaptureUnit>,
    state: StateMachine,
    reader: MeasurementReader,
}

impl FirmwareHandle {
    /// Reader on the measurement slot.
    pub fn measurements(&self) -> MeasurementReader {
        self.reader.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> FirmwareState {
        self.state.state()
    }

    /// Whether every activity thread is still alive.
    pub fn is_healthy(&self) -> bool {
        self.threads.iter().all(|(_, join)| !join.is_finished())
    }

    /// Request shutdown, join every activity and stop capturing.
    ///
    /// Each thread exits at its next release, so this waits up to the
    /// longest period.
    ///
    /// # Errors
    ///
    /// Returns an error if an activity thread panicked or the capture unit
    /// fails to stop.
    pub fn stop(mut self) -> SonarResult<Vec<ActivityReport>> {
        info!("Stopping activities");
        let (reports, failure) = self.join_all();

        self.capture.stop()?;

        if let Some(e) = failure {
            self.state.enter_fault();
            return Err(e);
        }
        if self.state.state() == FirmwareState::Run {
            self.state.transition(FirmwareState::Stopped)?;
        }
        info!("Firmware stopped");
        Ok(reports)
    }

    /// Signal shutdown and join every activity thread.
    fn join_all(&mut self) -> (Vec<ActivityReport>, Option<SonarError>) {
        self.shutdown.store(true, Ordering::Release);

        let mut reports = Vec::with_capacity(self.threads.len());
        let mut failure = None;
        for (name, join) in self.threads.drain(..) {
            match join.join() {
                Ok(task) => reports.push(ActivityReport::from_task(&task)),
                Err(_) => {
                    error!(activity = %name, "Activity thread panicked");
                    failure.get_or_insert(SonarError::Activity {
                        name,
                        reason: "thread panicked".into(),
                    });
                }
            }
        }
        (reports, failure)
    }

    /// Tear down a partially started firmware and enter FAULT.
    ///
    /// Returns `cause` so the caller can report it.
    fn abort(&mut self, cause: SonarError) -> SonarError {
        self.state.enter_fault();
        let (_, failure) = self.join_all();
        if let Some(e) = failure {
            warn!(error = %e, "Activity failed during aborted start");
        }
        if let Err(e) = self.capture.stop() {
            warn!(error = %e, "Capture did not stop during aborted start");
        }
        cause
    }
}

impl Drop for FirmwareHandle {
    fn drop(&mut self) {
        // Threads exit at their next release; they are not joined here
        self.shutdown.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for FirmwareHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirmwareHandle")
            .field(
                "threads",
                &self.threads.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            )
            .field("state", &self.state.state())
            .finish_non_exhaustive()
    }
}
