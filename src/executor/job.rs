//! Job representation for the worker queues.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Global job ID counter
static JOB_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

impl JobId {
    fn next() -> Self {
        JobId(JOB_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A unit of work sitting in a worker queue
pub struct Job {
    pub(crate) id: JobId,
    pub(crate) func: Box<dyn FnOnce() + Send + 'static>,
    pub(crate) enqueued_at: Instant,
}

impl Job {
    pub fn new(func: Box<dyn FnOnce() + Send + 'static>) -> Self {
        Job {
            id: JobId::next(),
            func,
            enqueued_at: Instant::now(),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Run the job
    pub fn run(self) {
        (self.func)();
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}
