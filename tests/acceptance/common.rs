//! Common utilities for acceptance tests.
//!
//! Provides a simulated board on a virtual clock plus helpers for reading
//! back what the firmware printed.

#![allow(dead_code)] // Not every test module uses every helper

use sonar_common::FirmwareConfig;
use sonar_hal::sim::{BufferSerial, RecordingPin, SensorControl, SimClock, SimulatedSensor};
use sonar_hal::{Clock, EdgeCapture, VirtualPin};
use sonar_runtime::{Board, Firmware};
use std::sync::Arc;
use std::time::Duration;

/// Number of lines printed at boot before the first report.
pub const BANNER_LINES: usize = 3;

/// Echo delay used by the simulated sensor.
pub const ECHO_DELAY: Duration = Duration::from_micros(450);

/// Handles on a simulated board after it has been handed to the firmware.
pub struct SimBoard {
    /// Virtual timebase shared with the firmware.
    pub clock: Arc<SimClock>,
    /// Everything written to the serial port.
    pub serial: BufferSerial,
    /// Status indicator.
    pub led: VirtualPin,
    /// Simulated sensor knobs.
    pub control: SensorControl,
    /// Trigger output history (sensor side of the trigger pin).
    pub trigger: RecordingPin,
}

impl SimBoard {
    /// Lines printed after the boot banner.
    pub fn reports(&self) -> Vec<String> {
        self.serial.lines().split_off(BANNER_LINES)
    }
}

/// Build a board with a simulated HC-SR04 and boot the firmware on it.
///
/// `distance_cm` of `None` simulates nothing in range.
pub fn boot(config: FirmwareConfig, distance_cm: Option<u32>) -> (Firmware, SimBoard) {
    let clock = Arc::new(SimClock::new());
    let shared: Arc<dyn Clock> = clock.clone();

    let capture = EdgeCapture::new(&config.pins.echo);
    let control = SensorControl::new(distance_cm, ECHO_DELAY);
    let trigger = RecordingPin::new(Arc::clone(&shared));
    let sensor = SimulatedSensor::new(
        trigger.clone(),
        Arc::clone(&shared),
        capture.input(),
        control.clone(),
    );

    let serial = BufferSerial::new();
    let led = VirtualPin::new(&config.pins.status_led);

    let board = Board {
        clock: shared,
        trigger: Box::new(sensor),
        status_led: Box::new(led.clone()),
        capture: Box::new(capture),
        serial: Box::new(serial.clone()),
    };

    let firmware = Firmware::boot(config, board).expect("boot failed");
    (
        firmware,
        SimBoard {
            clock,
            serial,
            led,
            control,
            trigger,
        },
    )
}

/// Boot with the default configuration.
pub fn boot_default(distance_cm: Option<u32>) -> (Firmware, SimBoard) {
    boot(FirmwareConfig::default(), distance_cm)
}
