//! Drift-free periodic tasks.
//!
//! Each task keeps an absolute release time. After every cycle the release
//! advances by exactly one period, whatever the body took, and the task
//! sleeps until that absolute time:
//!
//! ```text
//! release:  t0        t0+P      t0+2P     t0+3P
//!           |body|....|body|....|body--|..|body|
//! ```
//!
//! A body running past its next release is followed immediately by the
//! next cycle; releases are never skipped, so the n-th cycle always starts
//! at or after `t0 + n*P` and the long-run rate stays exactly `1/P`.

use sonar_common::{ActivityMetrics, Instant, MetricsSnapshot, Priority, SonarResult};
use sonar_hal::Clock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Body of a periodic activity.
pub trait Activity: Send {
    /// Short name used for logs and thread names.
    fn name(&self) -> &str;

    /// Execute one cycle.
    ///
    /// # Errors
    ///
    /// A returned error is logged and counted; the task keeps its cadence.
    fn run(&mut self, clock: &dyn Clock) -> SonarResult<()>;
}

/// Result of a single cycle execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleResult {
    /// Release this cycle was scheduled for.
    pub release: Instant,
    /// Delay between the release and the body starting.
    pub lateness: Duration,
    /// Actual execution time of the body.
    pub execution_time: Duration,
    /// Whether the body ran longer than the period.
    pub overrun: bool,
    /// Whether the body returned an error.
    pub failed: bool,
    /// Cycles executed so far, including this one.
    pub cycle_count: u64,
}

/// An activity bound to a period, a priority and a release schedule.
pub struct PeriodicTask {
    activity: Box<dyn Activity>,
    period: Duration,
    priority: Priority,
    next_release: Option<Instant>,
    cycle_count: u64,
    metrics: ActivityMetrics,
}

impl PeriodicTask {
    /// Create an inactive task.
    pub fn new(
        activity: Box<dyn Activity>,
        period: Duration,
        priority: Priority,
        histogram_size: usize,
    ) -> Self {
        Self {
            activity,
            period,
            priority,
            next_release: None,
            cycle_count: 0,
            metrics: ActivityMetrics::new(histogram_size, period),
        }
    }

    /// Activity name.
    pub fn name(&self) -> &str {
        self.activity.name()
    }

    /// Release period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Scheduling priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Next absolute release, `None` before activation.
    pub fn next_release(&self) -> Option<Instant> {
        self.next_release
    }

    /// Cycles executed so far.
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Timing metrics.
    pub fn metrics(&self) -> &ActivityMetrics {
        &self.metrics
    }

    /// Snapshot of the timing metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Seed the schedule: the first release is `start`.
    pub fn activate(&mut self, start: Instant) {
        debug!(
            activity = self.activity.name(),
            period_ms = self.period.as_millis(),
            priority = %self.priority,
            %start,
            "Activating periodic task"
        );
        self.next_release = Some(start);
    }

    /// Execute one cycle and advance the release by one period.
    ///
    /// Activates the task at the current time if it was not activated.
    /// Does not wait for the release; callers sleep until
    /// [`next_release`](Self::next_release) between cycles.
    pub fn run_cycle(&mut self, clock: &dyn Clock) -> CycleResult {
        let release = match self.next_release {
            Some(release) => release,
            None => {
                let now = clock.now();
                self.activate(now);
                now
            }
        };

        let started = clock.now();
        let lateness = started - release;

        let failed = match self.activity.run(clock) {
            Ok(()) => false,
            Err(e) => {
                warn!(activity = self.activity.name(), error = %e, "Activity cycle failed");
                self.metrics.record_error();
                true
            }
        };

        let execution_time = clock.now() - started;
        self.cycle_count += 1;

        let overrun = self.metrics.record(execution_time, lateness);
        if overrun {
            warn!(
                activity = self.activity.name(),
                execution_us = execution_time.as_micros(),
                period_us = self.period.as_micros(),
                "Activity overran its period"
            );
        }

        self.next_release = Some(release + self.period);

        trace!(
            activity = self.activity.name(),
            cycle = self.cycle_count,
            lateness_us = lateness.as_micros(),
            execution_us = execution_time.as_micros(),
            "Cycle complete"
        );

        CycleResult {
            release,
            lateness,
            execution_time,
            overrun,
            failed,
            cycle_count: self.cycle_count,
        }
    }

    /// Run cycles until `shutdown` is set.
    ///
    /// Activates at the current time unless already activated. The flag is
    /// checked once per cycle, before the body.
    pub fn run(&mut self, clock: &dyn Clock, shutdown: &AtomicBool) {
        if self.next_release.is_none() {
            self.activate(clock.now());
        }

        info!(activity = self.activity.name(), "Entering periodic loop");

        while !shutdown.load(Ordering::Acquire) {
            self.run_cycle(clock);
            if let Some(release) = self.next_release {
                clock.sleep_until(release);
            }
        }

        info!(
            activity = self.activity.name(),
            cycles = self.cycle_count,
            "Periodic loop exited"
        );
    }
}

impl std::fmt::Debug for PeriodicTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicTask")
            .field("name", &self.activity.name())
            .field("period", &self.period)
            .field("priority", &self.priority)
            .field("next_release", &self.next_release)
            .field("cycle_count", &self.cycle_count)
            .finish_non_exhaustive()
    }
}
