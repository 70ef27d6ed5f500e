//! Execution statistics for managed tasks.

use crate::task::TaskState;
use hdrhistogram::Histogram;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Longest run time tracked precisely (one day, in milliseconds).
const MAX_TRACKED_RUN_TIME_MS: u64 = 24 * 60 * 60 * 1000;

/// Outcome counters and a run time histogram
#[derive(Debug)]
pub struct ExecutionStats {
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,

    // run times of completed tasks, in milliseconds
    run_times: RwLock<Histogram<u64>>,

    since: RwLock<Instant>,
}

impl ExecutionStats {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_max(MAX_TRACKED_RUN_TIME_MS, 3)
            .expect("static histogram bounds are valid");

        Self {
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            run_times: RwLock::new(histogram),
            since: RwLock::new(Instant::now()),
        }
    }

    /// Record a task that reached a terminal state. `run_time` is `None` for
    /// tasks that never started; only completed tasks feed the histogram.
    pub fn record(&self, state: TaskState, run_time: Option<Duration>) {
        match state {
            TaskState::Completed => self.completed.fetch_add(1, Ordering::Relaxed),
            TaskState::Failed => self.failed.fetch_add(1, Ordering::Relaxed),
            TaskState::Cancelled => self.cancelled.fetch_add(1, Ordering::Relaxed),
            _ => return,
        };

        if let (TaskState::Completed, Some(run_time)) = (state, run_time) {
            self.run_times
                .write()
                .saturating_record(run_time.as_millis() as u64);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let histogram = self.run_times.read();
        let timed = histogram.len();

        let millis = |value: u64| Duration::from_millis(if timed > 0 { value } else { 0 });

        StatsSnapshot {
            window: self.since.read().elapsed(),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            timed,
            min_run_time: millis(histogram.min()),
            max_run_time: millis(histogram.max()),
            avg_run_time: millis(histogram.mean().round() as u64),
            p50_run_time: millis(histogram.value_at_quantile(0.50)),
            p99_run_time: millis(histogram.value_at_quantile(0.99)),
        }
    }

    pub fn reset(&self) {
        self.completed.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.cancelled.store(0, Ordering::Relaxed);
        self.run_times.write().reset();
        *self.since.write() = Instant::now();
    }
}

impl Default for ExecutionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics at a point in time
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    /// Time since creation or the last reset.
    pub window: Duration,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Number of completed tasks with a recorded run time.
    pub timed: u64,
    pub min_run_time: Duration,
    pub max_run_time: Duration,
    pub avg_run_time: Duration,
    pub p50_run_time: Duration,
    pub p99_run_time: Duration,
}

impl StatsSnapshot {
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }

    /// Fraction of finished tasks that failed (0.0 to 1.0)
    pub fn failure_rate(&self) -> f64 {
        match self.finished() {
            0 => 0.0,
            n => self.failed as f64 / n as f64,
        }
    }
}
