//! Periodic scheduling acceptance tests.
//!
//! Releases must follow `start + k * period` exactly, whatever the body
//! execution times, and one activity's trouble must not shift another
//! activity's schedule.
//!
//! # Acceptance Criteria
//!
//! - Zero accumulated drift over 1000 cycles with random load
//! - No skipped releases after an overrun
//! - Blinker cadence unaffected by a failing reporter
//! - Blinker and trigger keep cycling while the serial port hangs

use super::common::{boot_default, BANNER_LINES, ECHO_DELAY};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sonar_common::{FirmwareConfig, Instant, Priority, SonarResult};
use sonar_hal::sim::{SensorControl, SimClock, SimulatedSensor};
use sonar_hal::{Clock, EdgeCapture, SerialPort, SystemClock, VirtualPin};
use sonar_runtime::{
    Activity, Board, CooperativeScheduler, Firmware, PeriodicTask, BLINKER, REPORTER, TRIGGER,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Activity that burns a random amount of virtual time and records when it
/// started.
struct RandomLoad {
    name: &'static str,
    rng: StdRng,
    max_load: Duration,
    starts: Arc<Mutex<Vec<Instant>>>,
}

impl RandomLoad {
    fn new(name: &'static str, seed: u64, max_load: Duration) -> (Self, Arc<Mutex<Vec<Instant>>>) {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let load = Self {
            name,
            rng: StdRng::seed_from_u64(seed),
            max_load,
            starts: Arc::clone(&starts),
        };
        (load, starts)
    }
}

impl Activity for RandomLoad {
    fn name(&self) -> &str {
        self.name
    }

    fn run(&mut self, clock: &dyn Clock) -> SonarResult<()> {
        self.starts.lock().unwrap().push(clock.now());
        let max = u64::try_from(self.max_load.as_micros()).unwrap();
        clock.delay(Duration::from_micros(self.rng.random_range(0..=max)));
        Ok(())
    }
}

fn task(activity: RandomLoad, period: Duration, priority: Priority) -> PeriodicTask {
    PeriodicTask::new(Box::new(activity), period, priority, 256)
}

#[test]
fn test_no_drift_under_random_load() {
    const CYCLES: u64 = 1000;
    let period = Duration::from_millis(500);
    let start = Instant::from_millis(1234);

    let (load, starts) = RandomLoad::new("loaded", 7, Duration::from_millis(400));
    let mut scheduler = CooperativeScheduler::new(SimClock::starting_at(start));
    scheduler.add(task(load, period, Priority::High));

    for k in 0..CYCLES {
        let dispatch = scheduler.step().unwrap();
        let expected = start + period * u32::try_from(k).unwrap();
        assert_eq!(dispatch.result.release, expected, "cycle {k} drifted");
        assert_eq!(dispatch.result.lateness, Duration::ZERO);
        assert!(!dispatch.result.overrun);
    }

    let starts = starts.lock().unwrap();
    assert_eq!(starts.len(), usize::try_from(CYCLES).unwrap());
    // Every body started exactly on its release
    for (k, at) in starts.iter().enumerate() {
        assert_eq!(*at, start + period * u32::try_from(k).unwrap());
    }

    let next = scheduler.tasks()[0].next_release().unwrap();
    assert_eq!(next, start + period * u32::try_from(CYCLES).unwrap());

    let snapshot = scheduler.tasks()[0].snapshot();
    println!(
        "Random load: cycles={} max={:?}us mean={:?}us",
        snapshot.total_cycles, snapshot.max_us, snapshot.mean_us
    );
    assert_eq!(snapshot.total_cycles, CYCLES);
    assert_eq!(snapshot.overrun_count, 0);
}

#[test]
fn test_overrun_catches_up_without_skipping() {
    let period = Duration::from_millis(500);
    // Mean load stays under the period, individual bodies may exceed it
    let (load, starts) = RandomLoad::new("bursty", 42, Duration::from_millis(800));
    let mut scheduler = CooperativeScheduler::new(SimClock::new());
    scheduler.add(task(load, period, Priority::High));

    let mut overruns = 0;
    for k in 0..500u32 {
        let dispatch = scheduler.step().unwrap();
        assert_eq!(dispatch.result.release, Instant::ZERO + period * k);
        if dispatch.result.overrun {
            overruns += 1;
        }
    }
    assert!(overruns > 0, "load never exceeded the period");

    let starts = starts.lock().unwrap();
    for (k, at) in starts.iter().enumerate() {
        // Never early; late only by the backlog
        assert!(*at >= Instant::ZERO + period * u32::try_from(k).unwrap());
    }
    assert!(starts.windows(2).all(|w| w[0] <= w[1]));

    let snapshot = scheduler.tasks()[0].snapshot();
    assert_eq!(snapshot.overrun_count, overruns);
    assert!(snapshot.max_lateness_us > 0);
}

#[test]
fn test_tasks_keep_independent_cadence() {
    let mut scheduler = CooperativeScheduler::new(SimClock::new());
    let (trigger, trigger_starts) = RandomLoad::new("trigger", 1, Duration::from_millis(50));
    let (reporter, reporter_starts) = RandomLoad::new("reporter", 2, Duration::from_millis(50));
    let (blinker, blinker_starts) = RandomLoad::new("blinker", 3, Duration::from_millis(50));

    scheduler.add(task(trigger, Duration::from_millis(500), Priority::High));
    scheduler.add(task(reporter, Duration::from_millis(500), Priority::High));
    scheduler.add(task(blinker, Duration::from_millis(1000), Priority::Normal));

    let dispatched = scheduler.run_until(Instant::from_millis(60_000));
    // 121 + 121 + 61 releases in [0, 60 s]
    assert_eq!(dispatched, 303);

    for (starts, period_ms) in [
        (&trigger_starts, 500u64),
        (&reporter_starts, 500),
        (&blinker_starts, 1000),
    ] {
        let starts = starts.lock().unwrap();
        for (k, at) in (0u64..).zip(starts.iter()) {
            let release = Instant::from_millis(k * period_ms);
            // Other bodies can delay a start, never move the release
            let late = *at - release;
            assert!(late <= Duration::from_millis(100), "late by {late:?}");
        }
    }

    for t in scheduler.tasks() {
        let expected = match t.name() {
            "blinker" => Instant::from_millis(61_000),
            _ => Instant::from_millis(60_500),
        };
        assert_eq!(t.next_release(), Some(expected), "{}", t.name());
    }
}

#[test]
fn test_first_execution_at_activation() {
    let (mut firmware, sim) = boot_default(Some(100));
    let start = firmware.now();

    // A zero-length window runs exactly the first cycle of each activity
    firmware.run_until(start).unwrap();

    assert_eq!(sim.serial.lines().len(), BANNER_LINES + 1);
    assert_eq!(sim.led.transitions(), 1);
    let edges = sim.trigger.edges();
    assert_eq!(edges.len(), 2);
    assert_eq!(edges[0].at, start);
}

#[test]
fn test_blinker_unaffected_by_failing_reporter() {
    let (mut firmware, sim) = boot_default(Some(100));
    sim.serial.set_failing(true);

    firmware.run_until(Instant::from_millis(10_000)).unwrap();

    // Blinker at 0, 1000, ..., 10000
    assert_eq!(sim.led.transitions(), 11);

    let reports = firmware.reports();
    let by_name = |name: &str| reports.iter().find(|r| r.name == name).unwrap();
    assert_eq!(by_name(TRIGGER).cycles, 21);
    assert_eq!(by_name(REPORTER).cycles, 21);
    assert_eq!(by_name(REPORTER).metrics.error_count, 21);
    assert_eq!(by_name(BLINKER).cycles, 11);
    assert_eq!(by_name(BLINKER).metrics.error_count, 0);

    // Reporter recovers on its next release once the port works again
    sim.serial.set_failing(false);
    firmware.run_until(Instant::from_millis(10_500)).unwrap();
    assert_eq!(sim.reports(), vec!["HC-SR04: Distance = 100 cm"]);
}

/// Serial port whose writes block for as long as `hold` is set.
#[derive(Clone)]
struct StalledSerial {
    hold: Arc<AtomicBool>,
    lines: Arc<Mutex<Vec<String>>>,
}

impl StalledSerial {
    fn new() -> Self {
        Self {
            hold: Arc::new(AtomicBool::new(false)),
            lines: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl SerialPort for StalledSerial {
    fn write_line(&mut self, line: &str) -> SonarResult<()> {
        while self.hold.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(1));
        }
        self.lines.lock().unwrap().push(line.to_string());
        Ok(())
    }
}

#[test]
fn test_threaded_blinker_and_trigger_survive_stalled_serial() {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let serial = StalledSerial::new();
    let led = VirtualPin::new("PA5");
    let trigger = VirtualPin::new("PC2");
    let capture = EdgeCapture::new("PA8");
    let sensor = SimulatedSensor::spawn(
        trigger.clone(),
        Arc::clone(&clock),
        capture.input(),
        SensorControl::new(Some(100), ECHO_DELAY),
    )
    .unwrap();

    let board = Board {
        clock: Arc::clone(&clock),
        trigger: Box::new(sensor),
        status_led: Box::new(led.clone()),
        capture: Box::new(capture),
        serial: Box::new(serial.clone()),
    };

    let mut config = FirmwareConfig::default();
    config.trigger.period = Duration::from_millis(10);
    config.reporter.period = Duration::from_millis(10);
    config.blinker.period = Duration::from_millis(10);

    let firmware = Firmware::boot(config, board).unwrap();
    assert_eq!(serial.lines().len(), BANNER_LINES);

    // Every report write hangs from here on
    serial.hold.store(true, Ordering::Release);
    let handle = firmware.spawn().unwrap();
    clock.delay(Duration::from_millis(300));

    // About 30 releases each in 300 ms
    assert!(led.transitions() >= 10, "blinker stalled");
    assert!(trigger.transitions() >= 20, "trigger stalled");
    assert!(handle.measurements().latest().is_some());
    assert_eq!(serial.lines().len(), BANNER_LINES);
    assert!(handle.is_healthy());

    serial.hold.store(false, Ordering::Release);
    let reports = handle.stop().unwrap();
    assert_eq!(reports.len(), 3);
    assert!(serial.lines().len() > BANNER_LINES);
}
