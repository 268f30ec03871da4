//! Per-activity timing metrics.
//!
//! Tracks how long each periodic body runs and how late each release
//! starts relative to its deadline, using a fixed ring buffer so
//! recording never allocates after construction.

use serde::Serialize;
use std::time::Duration;

use crate::time::duration_to_micros;

/// Execution and release-lateness statistics for one periodic activity.
#[derive(Debug, Clone)]
pub struct ActivityMetrics {
    /// Ring buffer of execution times in microseconds.
    samples: Box<[u64]>,
    /// Current write position in the ring buffer.
    write_pos: usize,
    /// Number of samples collected (saturates at buffer size).
    sample_count: usize,
    /// Total cycles executed.
    total_cycles: u64,
    /// Minimum observed execution time in microseconds.
    min_us: u64,
    /// Maximum observed execution time in microseconds.
    max_us: u64,
    /// Sum of all execution times for mean calculation.
    sum_us: u64,
    /// Cycles whose body ran longer than the period.
    overrun_count: u64,
    /// Worst delay between a release deadline and the body starting.
    max_lateness_us: u64,
    /// Cycles whose body returned an error.
    error_count: u64,
    /// Activity period in microseconds.
    period_us: u64,
}

impl ActivityMetrics {
    /// Create a collector keeping `histogram_size` samples for an activity
    /// with the given period.
    #[must_use]
    pub fn new(histogram_size: usize, period: Duration) -> Self {
        let size = histogram_size.max(1);
        Self {
            samples: vec![0u64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            total_cycles: 0,
            min_us: u64::MAX,
            max_us: 0,
            sum_us: 0,
            overrun_count: 0,
            max_lateness_us: 0,
            error_count: 0,
            period_us: duration_to_micros(period),
        }
    }

    /// Record one cycle.
    ///
    /// Returns `true` if the body overran the period.
    pub fn record(&mut self, execution: Duration, lateness: Duration) -> bool {
        let us = duration_to_micros(execution);

        self.samples[self.write_pos] = us;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = self.sample_count.saturating_add(1).min(self.samples.len());

        self.total_cycles += 1;
        self.min_us = self.min_us.min(us);
        self.max_us = self.max_us.max(us);
        self.sum_us = self.sum_us.wrapping_add(us);
        self.max_lateness_us = self.max_lateness_us.max(duration_to_micros(lateness));

        let overrun = us > self.period_us;
        if overrun {
            self.overrun_count += 1;
        }
        overrun
    }

    /// Count a cycle whose body failed.
    pub fn record_error(&mut self) {
        self.error_count += 1;
    }

    /// Get total number of cycles executed.
    #[must_use]
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Get number of overruns.
    #[must_use]
    pub fn overrun_count(&self) -> u64 {
        self.overrun_count
    }

    /// Get number of failed cycles.
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Worst observed release lateness.
    #[must_use]
    pub fn max_lateness(&self) -> Duration {
        Duration::from_micros(self.max_lateness_us)
    }

    /// Get minimum observed execution time.
    #[must_use]
    pub fn min(&self) -> Option<Duration> {
        (self.total_cycles > 0).then(|| Duration::from_micros(self.min_us))
    }

    /// Get maximum observed execution time.
    #[must_use]
    pub fn max(&self) -> Option<Duration> {
        (self.total_cycles > 0).then(|| Duration::from_micros(self.max_us))
    }

    /// Get mean execution time.
    #[must_use]
    pub fn mean(&self) -> Option<Duration> {
        (self.total_cycles > 0).then(|| Duration::from_micros(self.sum_us / self.total_cycles))
    }

    /// Execution time percentile over the retained samples.
    ///
    /// Returns `None` with no samples or a percentile outside 0-100.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        if self.sample_count == 0 || !(0.0..=100.0).contains(&percentile) {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        let idx = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        Some(Duration::from_micros(sorted[idx.min(sorted.len() - 1)]))
    }

    /// Get a snapshot of current metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let any = self.total_cycles > 0;
        MetricsSnapshot {
            total_cycles: self.total_cycles,
            min_us: any.then_some(self.min_us),
            max_us: any.then_some(self.max_us),
            mean_us: any.then(|| self.sum_us / self.total_cycles),
            p99_us: self.percentile(99.0).map(duration_to_micros),
            overrun_count: self.overrun_count,
            error_count: self.error_count,
            max_lateness_us: self.max_lateness_us,
        }
    }
}

/// Immutable snapshot of metrics for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Total cycles executed.
    pub total_cycles: u64,
    /// Minimum execution time in microseconds.
    pub min_us: Option<u64>,
    /// Maximum execution time in microseconds.
    pub max_us: Option<u64>,
    /// Mean execution time in microseconds.
    pub mean_us: Option<u64>,
    /// 99th percentile execution time in microseconds.
    pub p99_us: Option<u64>,
    /// Number of overruns.
    pub overrun_count: u64,
    /// Number of failed cycles.
    pub error_count: u64,
    /// Worst release lateness in microseconds.
    pub max_lateness_us: u64,
}

impl MetricsSnapshot {
    /// Get jitter (max - min) of the execution time in microseconds.
    #[must_use]
    pub fn jitter_us(&self) -> Option<u64> {
        match (self.min_us, self.max_us) {
            (Some(min), Some(max)) => Some(max - min),
            _ => None,
        }
    }
}
