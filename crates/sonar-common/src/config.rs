//! Configuration structures for the firmware.
//!
//! Supports TOML deserialization with defaults matching the reference
//! board wiring: trigger and reporter at 500 ms, blinker at 1 s, a 10 µs
//! trigger pulse and a 1 MHz capture timer.

use crate::time::TickRate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Top-level firmware configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareConfig {
    /// Capture timer settings.
    pub timebase: TimebaseConfig,

    /// Trigger generator activity.
    pub trigger: TriggerConfig,

    /// Distance reporter activity.
    pub reporter: ReporterConfig,

    /// Status blinker activity.
    pub blinker: BlinkerConfig,

    /// Capture unit settings.
    pub capture: CaptureSettings,

    /// Pin wiring labels.
    pub pins: PinConfig,

    /// Real-time scheduling configuration.
    pub realtime: RealtimeConfig,

    /// Activity metrics configuration.
    pub metrics: MetricsConfig,

    /// Simulated sensor used on the host board.
    pub simulation: SimulationConfig,
}

/// Capture timer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimebaseConfig {
    /// Capture timer frequency in Hz.
    pub tick_hz: u32,
}

impl Default for TimebaseConfig {
    fn default() -> Self {
        Self {
            tick_hz: TickRate::MHZ_1.hz(),
        }
    }
}

/// Trigger generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Time between trigger pulses.
    #[serde(with = "humantime_serde")]
    pub period: Duration,

    /// How long the trigger output is held high.
    #[serde(with = "humantime_serde")]
    pub pulse_width: Duration,

    /// Scheduling priority.
    pub priority: Priority,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(500),
            pulse_width: Duration::from_micros(10),
            priority: Priority::High,
        }
    }
}

/// Distance reporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    /// Time between report lines.
    #[serde(with = "humantime_serde")]
    pub period: Duration,

    /// Scheduling priority.
    pub priority: Priority,

    /// Age after which the last capture is reported as lost.
    /// `None` (written `"never"`) keeps reporting the last capture indefinitely.
    #[serde(with = "humantime_serde_opt")]
    pub stale_after: Option<Duration>,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(500),
            priority: Priority::High,
            stale_after: Some(Duration::from_millis(1500)),
        }
    }
}

/// Status blinker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkerConfig {
    /// Time between indicator toggles.
    #[serde(with = "humantime_serde")]
    pub period: Duration,

    /// Scheduling priority.
    pub priority: Priority,
}

impl Default for BlinkerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            priority: Priority::Normal,
        }
    }
}

/// Relative scheduling priority of a periodic activity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Cosmetic or background work.
    #[default]
    Normal,
    /// Timing-sensitive sensor I/O.
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Active level of the echo pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CapturePolarity {
    /// Pulse is high; measured from rising to falling edge.
    #[default]
    ActiveHigh,
    /// Pulse is low; measured from falling to rising edge.
    ActiveLow,
}

/// Capture unit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Active level of the echo pulse.
    pub polarity: CapturePolarity,

    /// Timer channel the echo pin is routed to.
    pub channel: u8,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            polarity: CapturePolarity::ActiveHigh,
            channel: 1,
        }
    }
}

/// Board wiring labels, used for logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    /// Sensor trigger output.
    pub trigger: String,
    /// Sensor echo input (capture channel).
    pub echo: String,
    /// Status indicator output.
    pub status_led: String,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            trigger: String::from("PC2"),
            echo: String::from("PA8"),
            status_led: String::from("PA5"),
        }
    }
}

/// Real-time scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Apply per-activity OS priorities so the sensor activities preempt
    /// the blinker. Without `CAP_SYS_NICE` this degrades to a warning and
    /// time-sharing.
    pub enabled: bool,

    /// Scheduler policy: "fifo" or "rr" (round-robin).
    pub policy: SchedPolicy,

    /// Lock all memory pages (mlockall).
    pub lock_memory: bool,

    /// OS priority for [`Priority::Normal`] activities (1-99).
    pub normal_priority: u8,

    /// OS priority for [`Priority::High`] activities (1-99).
    pub high_priority: u8,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: SchedPolicy::Fifo,
            lock_memory: false,
            normal_priority: 10,
            high_priority: 20,
        }
    }
}

impl RealtimeConfig {
    /// OS priority mapped to an activity priority.
    #[must_use]
    pub fn os_priority(&self, priority: Priority) -> u8 {
        match priority {
            Priority::Normal => self.normal_priority,
            Priority::High => self.high_priority,
        }
    }
}

/// Scheduler policy for real-time threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedPolicy {
    /// SCHED_FIFO: First-in-first-out real-time.
    #[default]
    Fifo,
    /// SCHED_RR: Round-robin real-time.
    Rr,
    /// SCHED_OTHER: Normal time-sharing (non-RT).
    Other,
}

/// Activity metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Number of execution-time samples kept per activity.
    pub histogram_size: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            histogram_size: 256,
        }
    }
}

/// Simulated sensor configuration for the host board.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Distance the simulated sensor reports; `None` (written `"none"`)
    /// means nothing in range, so no echo at all.
    #[serde(with = "distance_cm_opt")]
    pub distance_cm: Option<u32>,

    /// Delay between the end of the trigger pulse and the echo rising edge.
    #[serde(with = "humantime_serde")]
    pub echo_delay: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            distance_cm: Some(100),
            echo_delay: Duration::from_micros(450),
        }
    }
}

impl FirmwareConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        debug!(?path, "Reading configuration file");
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Capture timer frequency.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero frequency.
    pub fn tick_rate(&self) -> Result<TickRate, ConfigError> {
        TickRate::new(self.timebase.tick_hz)
            .ok_or_else(|| ConfigError::Invalid("timebase.tick_hz must be non-zero".into()))
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tick_rate()?;

        for (name, period) in [
            ("trigger", self.trigger.period),
            ("reporter", self.reporter.period),
            ("blinker", self.blinker.period),
        ] {
            if period.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "{name}.period must be non-zero"
                )));
            }
        }

        if self.trigger.pulse_width.is_zero() || self.trigger.pulse_width >= self.trigger.period {
            return Err(ConfigError::Invalid(format!(
                "trigger.pulse_width must be between 0 and the trigger period ({:?})",
                self.trigger.period
            )));
        }

        if self.reporter.stale_after.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::Invalid(
                "reporter.stale_after must be non-zero when set".into(),
            ));
        }

        let rt = &self.realtime;
        for prio in [rt.normal_priority, rt.high_priority] {
            if !(1..=99).contains(&prio) {
                return Err(ConfigError::Invalid(format!(
                    "realtime priority {prio} outside 1-99"
                )));
            }
        }
        if rt.high_priority <= rt.normal_priority {
            return Err(ConfigError::Invalid(format!(
                "realtime.high_priority ({}) must exceed realtime.normal_priority ({})",
                rt.high_priority, rt.normal_priority
            )));
        }

        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Values parse but violate a constraint.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Same as [`humantime_serde`] for optional durations; `"never"` is `None`.
mod humantime_serde_opt {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    const NEVER: &str = "never";

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_str(NEVER),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.trim().eq_ignore_ascii_case(NEVER) {
            return Ok(None);
        }
        humantime::parse_duration(&s)
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}

/// Optional distance in centimetres; `"none"` is `None`.
mod distance_cm_opt {
    use serde::{self, Deserialize, Deserializer, Serializer};

    const NONE: &str = "none";

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Cm(u32),
        Word(String),
    }

    pub fn serialize<S>(distance: &Option<u32>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match distance {
            Some(cm) => serializer.serialize_u32(*cm),
            None => serializer.serialize_str(NONE),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Cm(cm) => Ok(Some(cm)),
            Raw::Word(w) if w.trim().eq_ignore_ascii_case(NONE) => Ok(None),
            Raw::Word(w) => Err(serde::de::Error::custom(format!(
                "expected a distance in cm or \"{NONE}\", got \"{w}\""
            ))),
        }
    }
}
