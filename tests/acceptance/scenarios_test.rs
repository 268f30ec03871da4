//! End-to-end sensor scenarios.
//!
//! Each test boots the firmware on a simulated board and checks what
//! reaches the serial port and the trigger pin.

use super::common::{boot, boot_default, BANNER_LINES, ECHO_DELAY};
use sonar_common::{FirmwareConfig, FirmwareState, Instant, MICROS_PER_CM};
use sonar_hal::sim::{BufferSerial, SensorControl, SimulatedSensor, MIN_TRIGGER_PULSE};
use sonar_hal::{Clock, EdgeCapture, SystemClock, VirtualPin};
use sonar_runtime::{Board, Firmware, BANNER, BOOT_COMPLETE};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const NO_ECHO: &str = "HC-SR04: no echo received";

#[test]
fn test_boot_banner() {
    let (firmware, sim) = boot_default(Some(100));
    assert_eq!(firmware.state(), FirmwareState::Init);

    let lines = sim.serial.lines();
    assert_eq!(lines.len(), BANNER_LINES);
    assert_eq!(lines[0], BANNER);
    assert_eq!(lines[1], BOOT_COMPLETE);
    assert_eq!(lines[2], " my best number is: 17");
}

#[test]
fn test_sensor_disconnected() {
    let (mut firmware, sim) = boot_default(None);
    firmware.run_until(Instant::from_millis(5_000)).unwrap();

    let reports = sim.reports();
    assert_eq!(reports.len(), 11);
    assert!(reports.iter().all(|l| l == NO_ECHO));
    assert_eq!(firmware.measurements().latest(), None);

    // The trigger keeps firing even though nothing answers
    assert_eq!(sim.trigger.edges().len(), 22);
}

#[test]
fn test_object_at_one_metre() {
    let (mut firmware, sim) = boot_default(Some(100));
    firmware.run_until(Instant::from_millis(1_000)).unwrap();

    let m = firmware.measurements().latest().unwrap();
    assert_eq!(m.width.get(), 100 * MICROS_PER_CM);
    assert_eq!(sim.reports(), vec!["HC-SR04: Distance = 100 cm"; 3]);
}

#[test]
fn test_distance_changes_follow_the_sensor() {
    let (mut firmware, sim) = boot_default(Some(2));

    for (cm, until_ms) in [(2, 0), (400, 500), (37, 1_000), (250, 1_500)] {
        sim.control.set_distance(Some(cm));
        firmware.run_until(Instant::from_millis(until_ms)).unwrap();
        assert_eq!(sim.reports().last().unwrap(), &format!("HC-SR04: Distance = {cm} cm"));
    }
}

#[test]
fn test_trigger_pulse_shape() {
    let (mut firmware, sim) = boot_default(Some(100));
    let period = Duration::from_millis(500);
    firmware.run_until(Instant::from_millis(2_000)).unwrap();

    let edges = sim.trigger.edges();
    // One rising and one falling edge per cycle at 0, 500, ..., 2000 ms
    assert_eq!(edges.len(), 10);

    for (k, pair) in (0u32..).zip(edges.chunks(2)) {
        let (rise, fall) = (pair[0], pair[1]);
        assert!(rise.high && !fall.high);
        assert_eq!(rise.at, Instant::ZERO + period * k);
        assert!(fall.at - rise.at >= MIN_TRIGGER_PULSE);
        // Back low well before the next cycle
        assert!(fall.at < Instant::ZERO + period * (k + 1));
    }
}

#[test]
fn test_echo_lost_after_sensor_goes_quiet() {
    let (mut firmware, sim) = boot_default(Some(100));
    firmware.run_until(Instant::from_millis(1_000)).unwrap();
    sim.control.set_distance(None);
    firmware.run_until(Instant::from_millis(4_000)).unwrap();

    let reports = sim.reports();
    assert_eq!(reports.len(), 9);

    // Last echo ended just after 1000 ms; 1500, 2000 and 2500 are within
    // the 1.5 s threshold
    assert!(reports[..6].iter().all(|l| l == "HC-SR04: Distance = 100 cm"));
    for line in &reports[6..] {
        assert!(
            line.starts_with("HC-SR04: echo lost, last Distance = 100 cm ("),
            "{line}"
        );
    }

    // Last echo: trigger released at 1000 ms + 10 us pulse + echo delay + 100 cm
    let ended = Instant::from_millis(1_000)
        + MIN_TRIGGER_PULSE
        + ECHO_DELAY
        + Duration::from_micros(u64::from(100 * MICROS_PER_CM));
    assert_eq!(firmware.measurements().latest().unwrap().captured_at, ended);

    // An echo coming back clears it on the next cycle
    sim.control.set_distance(Some(80));
    firmware.run_until(Instant::from_millis(4_500)).unwrap();
    assert_eq!(sim.reports().last().unwrap(), "HC-SR04: Distance = 80 cm");
}

#[test]
fn test_shipped_config_matches_defaults() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
    let shipped = FirmwareConfig::from_file(&path).unwrap();
    shipped.validate().unwrap();

    let defaults = FirmwareConfig::default();
    assert_eq!(shipped.to_toml().unwrap(), defaults.to_toml().unwrap());
}

#[test]
fn test_config_file_drives_schedule() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[reporter]
period = "250ms"
stale_after = "never"

[blinker]
period = "2s"
"#
    )
    .unwrap();

    let config = FirmwareConfig::from_file(file.path()).unwrap();
    assert_eq!(config.trigger.period, Duration::from_millis(500));
    let (mut firmware, sim) = boot(config, Some(42));

    firmware.run_until(Instant::from_millis(4_000)).unwrap();

    // Reporter at 0, 250, ..., 4000
    assert_eq!(sim.reports().len(), 17);
    // Blinker at 0, 2000, 4000
    assert_eq!(sim.led.transitions(), 3);
    assert_eq!(sim.reports().last().unwrap(), "HC-SR04: Distance = 42 cm");
}

#[test]
fn test_threaded_firmware_disconnected() {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let serial = BufferSerial::new();
    let capture = EdgeCapture::new("PA8");
    let sensor = SimulatedSensor::spawn(
        VirtualPin::new("PC2"),
        Arc::clone(&clock),
        capture.input(),
        SensorControl::new(None, ECHO_DELAY),
    )
    .unwrap();

    let board = Board {
        clock: Arc::clone(&clock),
        trigger: Box::new(sensor),
        status_led: Box::new(VirtualPin::new("PA5")),
        capture: Box::new(capture),
        serial: Box::new(serial.clone()),
    };

    let mut config = FirmwareConfig::default();
    config.trigger.period = Duration::from_millis(25);
    config.reporter.period = Duration::from_millis(25);
    config.blinker.period = Duration::from_millis(50);

    let handle = Firmware::boot(config, board).unwrap().spawn().unwrap();
    clock.delay(Duration::from_millis(150));
    let reports = handle.stop().unwrap();

    assert!(reports.iter().all(|r| r.cycles > 0));
    let lines = serial.lines();
    assert!(lines.len() > BANNER_LINES);
    assert!(lines[BANNER_LINES..].iter().all(|l| l == NO_ECHO));
}
