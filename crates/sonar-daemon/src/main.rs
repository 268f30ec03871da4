//! Rangefinder daemon entry point.
//!
//! Boots the firmware on a simulated board (host monotonic clock, a
//! simulated HC-SR04 on the trigger pin, a software capture unit and
//! stdout as the serial port) and runs one thread per activity until a
//! signal arrives or the requested run time elapses.

mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use sonar_common::config::FirmwareConfig;
use sonar_hal::sim::{SensorControl, SimulatedSensor};
use sonar_hal::{stdout_serial, Clock, EdgeCapture, SystemClock, VirtualPin};
use sonar_runtime::{ActivityReport, Board, Firmware};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::signals::SignalHandler;

/// Environment variable naming a configuration file.
const CONFIG_ENV: &str = "SONAR_CONFIG_PATH";

/// System-wide configuration file.
const SYSTEM_CONFIG: &str = "/etc/sonar/config.toml";

/// Development configuration file, relative to the working directory.
const LOCAL_CONFIG: &str = "config/default.toml";

/// Rangefinder daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "sonar-daemon",
    about = "HC-SR04 rangefinder firmware on a simulated board",
    version,
    long_about = None
)]
struct Args {
    /// Path to a firmware configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Distance reported by the simulated sensor, in centimetres.
    #[arg(long, value_name = "CM", conflicts_with = "disconnected")]
    distance_cm: Option<u32>,

    /// Simulate a sensor with nothing in range (no echo).
    #[arg(long)]
    disconnected: bool,

    /// Stop after this long (e.g. "10s", "2min"); runs until signalled otherwise.
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    run_for: Option<Duration>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,

    /// Print per-activity metrics as JSON on exit.
    #[arg(long)]
    summary_json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting sonar daemon");

    let mut config = load_config(&args)?;
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    info!(
        trigger_period = ?config.trigger.period,
        reporter_period = ?config.reporter.period,
        blinker_period = ?config.blinker.period,
        simulated_distance_cm = ?config.simulation.distance_cm,
        "Configuration loaded"
    );

    let signal_handler = SignalHandler::new().context("Failed to set up signal handlers")?;

    let reports = run_daemon(config, &signal_handler, args.run_for)?;

    for report in &reports {
        info!(
            activity = %report.name,
            cycles = report.cycles,
            overruns = report.metrics.overrun_count,
            errors = report.metrics.error_count,
            max_lateness_us = report.metrics.max_lateness_us,
            mean_us = ?report.metrics.mean_us,
            p99_us = ?report.metrics.p99_us,
            "Activity summary"
        );
    }

    if args.summary_json {
        let json =
            serde_json::to_string_pretty(&reports).context("Failed to serialize summary")?;
        println!("{json}");
    }

    info!("Daemon shutdown complete");
    Ok(())
}

/// Initialize logging with the specified log level.
///
/// `RUST_LOG` takes precedence when set.
fn init_logging(level: &str) {
    let filter = format!(
        "sonar_daemon={level},sonar_runtime={level},sonar_hal={level},sonar_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .init();
}

/// Find the configuration file to load.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument (must exist)
/// 2. `SONAR_CONFIG_PATH` environment variable
/// 3. `/etc/sonar/config.toml` (system path)
/// 4. `config/default.toml` (local development)
///
/// `None` means built-in defaults.
fn resolve_config_path(
    cli: Option<&Path>,
    env: Option<&str>,
    candidates: &[&Path],
) -> Option<PathBuf> {
    if let Some(path) = cli {
        return Some(path.to_path_buf());
    }

    if let Some(env_path) = env {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Some(path);
        }
        warn!(
            path = %env_path,
            "{CONFIG_ENV} set but file does not exist, checking other locations"
        );
    }

    candidates
        .iter()
        .find(|p| p.exists())
        .map(|p| p.to_path_buf())
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<FirmwareConfig> {
    let env = std::env::var(CONFIG_ENV).ok();
    let path = resolve_config_path(
        args.config.as_deref(),
        env.as_deref(),
        &[Path::new(SYSTEM_CONFIG), Path::new(LOCAL_CONFIG)],
    );

    match path {
        Some(path) => {
            info!(?path, "Loading configuration");
            FirmwareConfig::from_file(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))
        }
        None => {
            info!("No config file found, using built-in defaults");
            Ok(FirmwareConfig::default())
        }
    }
}

/// Apply command-line overrides to the simulated sensor.
fn apply_overrides(config: &mut FirmwareConfig, args: &Args) {
    if args.disconnected {
        config.simulation.distance_cm = None;
    } else if let Some(cm) = args.distance_cm {
        config.simulation.distance_cm = Some(cm);
    }
}

/// Build the simulated board, run the firmware and stop it on request.
fn run_daemon(
    config: FirmwareConfig,
    signal_handler: &SignalHandler,
    run_for: Option<Duration>,
) -> Result<Vec<ActivityReport>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let capture = EdgeCapture::new(&config.pins.echo);
    let sensor = SimulatedSensor::spawn(
        VirtualPin::new(&config.pins.trigger),
        Arc::clone(&clock),
        capture.input(),
        SensorControl::from_config(&config.simulation),
    )
    .context("Failed to start simulated sensor")?;

    let board = Board {
        clock,
        trigger: Box::new(sensor),
        status_led: Box::new(VirtualPin::new(&config.pins.status_led)),
        capture: Box::new(capture),
        serial: Box::new(stdout_serial()),
    };

    let firmware = Firmware::boot(config, board).context("Firmware boot failed")?;
    let handle = firmware.spawn().context("Failed to start activities")?;

    let deadline = run_for.map(|d| std::time::Instant::now() + d);
    let poll = Duration::from_millis(100);
    loop {
        if signal_handler.wait(poll) {
            match signal_handler.received() {
                Some(signal) => info!(%signal, "Shutdown signal received"),
                None => info!("Shutdown requested"),
            }
            break;
        }
        if deadline.is_some_and(|d| std::time::Instant::now() >= d) {
            info!("Requested run time elapsed");
            break;
        }
        if !handle.is_healthy() {
            error!("An activity thread exited unexpectedly");
            break;
        }
    }

    handle.stop().context("Failed to stop firmware")
}
