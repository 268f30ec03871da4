//! Single-context dispatcher for a fixed set of periodic tasks.
//!
//! Runs every task from one thread in release order. On a virtual clock
//! this gives fully deterministic schedules; on a target without threads it
//! is the whole scheduler. Bodies are not preempted, so a long body delays
//! the others, but each task's own release schedule is unaffected.

use crate::periodic::{CycleResult, PeriodicTask};
use sonar_common::Instant;
use sonar_hal::Clock;
use std::cmp::Reverse;
use std::time::Duration;
use tracing::{debug, trace};

/// One dispatched cycle.
#[derive(Debug, Clone, Copy)]
pub struct Dispatch {
    /// Index of the task in registration order.
    pub task: usize,
    /// Outcome of the cycle.
    pub result: CycleResult,
}

/// Cooperative earliest-release-first scheduler.
///
/// Ties on the release time go to the higher priority, then to the task
/// registered first.
pub struct CooperativeScheduler<C: Clock> {
    clock: C,
    tasks: Vec<PeriodicTask>,
    activated: bool,
}

impl<C: Clock> CooperativeScheduler<C> {
    /// Create an empty scheduler.
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            tasks: Vec::new(),
            activated: false,
        }
    }

    /// Register a task. Tasks added after activation are activated on the spot.
    pub fn add(&mut self, mut task: PeriodicTask) -> usize {
        if self.activated && task.next_release().is_none() {
            task.activate(self.clock.now());
        }
        self.tasks.push(task);
        self.tasks.len() - 1
    }

    /// Activate every task with a common start time of now.
    pub fn activate(&mut self) {
        let start = self.clock.now();
        debug!(%start, tasks = self.tasks.len(), "Activating cooperative scheduler");
        for task in &mut self.tasks {
            task.activate(start);
        }
        self.activated = true;
    }

    /// Clock driving the schedule.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Registered tasks in registration order.
    pub fn tasks(&self) -> &[PeriodicTask] {
        &self.tasks
    }

    /// Look a task up by activity name.
    pub fn task(&self, name: &str) -> Option<&PeriodicTask> {
        self.tasks.iter().find(|t| t.name() == name)
    }

    /// Take the tasks back, e.g. to move them onto threads.
    pub fn into_tasks(self) -> Vec<PeriodicTask> {
        self.tasks
    }

    /// Index and release of the task that runs next.
    pub fn next_due(&self) -> Option<(usize, Instant)> {
        self.tasks
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.next_release().map(|r| (i, r, t.priority())))
            .min_by_key(|&(i, release, priority)| (release, Reverse(priority), i))
            .map(|(i, release, _)| (i, release))
    }

    /// Sleep until the next release and run that cycle.
    ///
    /// Returns `None` when no task is active.
    pub fn step(&mut self) -> Option<Dispatch> {
        if !self.activated {
            self.activate();
        }

        let (index, release) = self.next_due()?;
        self.clock.sleep_until(release);

        let result = self.tasks[index].run_cycle(&self.clock);
        trace!(
            activity = self.tasks[index].name(),
            %release,
            "Dispatched"
        );
        Some(Dispatch {
            task: index,
            result,
        })
    }

    /// Dispatch every release at or before `limit`.
    ///
    /// Returns the number of cycles run.
    pub fn run_until(&mut self, limit: Instant) -> usize {
        if !self.activated {
            self.activate();
        }

        let mut dispatched = 0;
        while let Some((_, release)) = self.next_due() {
            if release > limit {
                break;
            }
            if self.step().is_none() {
                break;
            }
            dispatched += 1;
        }
        dispatched
    }

    /// Dispatch every release within `duration` from now.
    pub fn run_for(&mut self, duration: Duration) -> usize {
        let limit = self.clock.now() + duration;
        self.run_until(limit)
    }
}

impl<C: Clock> std::fmt::Debug for CooperativeScheduler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CooperativeScheduler")
            .field("tasks", &self.tasks)
            .field("activated", &self.activated)
            .finish_non_exhaustive()
    }
}
