// worker thread stuff
use super::job::Job;
use super::panic_handler::PanicHandler;
use crossbeam_deque::{Injector, Stealer, Worker as WorkerQueue};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub type WorkerId = usize;

// stats for each worker
#[derive(Debug)]
pub struct WorkerState {
    pub jobs_executed: AtomicU64,
    pub jobs_stolen: AtomicU64,
}

impl WorkerState {
    fn new() -> Self {
        Self {
            jobs_executed: AtomicU64::new(0),
            jobs_stolen: AtomicU64::new(0),
        }
    }
}

/// State shared between the pool handle and its workers.
#[derive(Debug)]
pub(crate) struct PoolShared {
    pub shutdown: AtomicBool,
    /// Jobs accepted but not yet finished (queued or running).
    pub pending: AtomicUsize,
    pub live_workers: Mutex<usize>,
    pub terminated: Condvar,
    pub panic_handler: PanicHandler,
}

impl PoolShared {
    pub fn new(num_threads: usize, panic_handler: PanicHandler) -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
            live_workers: Mutex::new(num_threads),
            terminated: Condvar::new(),
            panic_handler,
        }
    }
}

pub(crate) struct Worker {
    pub id: WorkerId,
    pub local_queue: WorkerQueue<Job>,
    pub state: Arc<WorkerState>,
}

impl Worker {
    pub fn new(id: WorkerId) -> Self {
        Self {
            id,
            local_queue: WorkerQueue::new_fifo(),
            state: Arc::new(WorkerState::new()),
        }
    }

    // main loop; after shutdown keeps draining until nothing is pending
    pub fn run(&self, stealers: Vec<Stealer<Job>>, injector: Arc<Injector<Job>>, shared: Arc<PoolShared>) {
        let mut backoff_cnt = 0;

        loop {
            if let Some(job) = self.find_job(&stealers, &injector) {
                backoff_cnt = 0;
                self.execute_job(job, &shared.panic_handler);
                shared.pending.fetch_sub(1, Ordering::SeqCst);
                continue;
            }

            if shared.shutdown.load(Ordering::SeqCst) && shared.pending.load(Ordering::SeqCst) == 0 {
                break;
            }

            self.backoff(&mut backoff_cnt);
        }

        let mut live = shared.live_workers.lock();
        *live -= 1;
        tracing::debug!(worker = self.id, remaining = *live, "worker exited");
        if *live == 0 {
            shared.terminated.notify_all();
        }
    }

    fn find_job(&self, stealers: &[Stealer<Job>], injector: &Injector<Job>) -> Option<Job> {
        // 1. Check local queue first (best cache locality)
        if let Some(job) = self.local_queue.pop() {
            return Some(job);
        }

        // 2. Check global injector queue
        loop {
            match injector.steal_batch_and_pop(&self.local_queue) {
                crossbeam_deque::Steal::Success(job) => return Some(job),
                crossbeam_deque::Steal::Empty => break,
                crossbeam_deque::Steal::Retry => continue,
            }
        }

        // 3. Steal from other workers
        self.try_steal_from_workers(stealers)
    }

    fn try_steal_from_workers(&self, stealers: &[Stealer<Job>]) -> Option<Job> {
        use rand::seq::SliceRandom;
        use rand::thread_rng;

        if stealers.is_empty() {
            return None;
        }

        let mut indices: Vec<usize> = (0..stealers.len()).collect();
        indices.shuffle(&mut thread_rng());

        for &idx in &indices {
            if idx == self.id {
                continue;
            }

            loop {
                match stealers[idx].steal_batch_and_pop(&self.local_queue) {
                    crossbeam_deque::Steal::Success(job) => {
                        self.state.jobs_stolen.fetch_add(1, Ordering::Relaxed);
                        return Some(job);
                    }
                    crossbeam_deque::Steal::Empty => break,
                    crossbeam_deque::Steal::Retry => continue,
                }
            }
        }

        None
    }

    fn execute_job(&self, job: Job, panic_handler: &PanicHandler) {
        let id = job.id();
        let waited = job.enqueued_at.elapsed();

        if panic_handler.execute(|| job.run()).is_err() {
            tracing::error!(worker = self.id, job = ?id, "job panicked");
        } else {
            tracing::trace!(worker = self.id, job = ?id, waited_us = waited.as_micros() as u64, "job finished");
        }

        self.state.jobs_executed.fetch_add(1, Ordering::Relaxed);
    }

    fn backoff(&self, count: &mut u32) {
        const MAX_SPINS: u32 = 10;
        const MAX_YIELDS: u32 = 20;

        *count += 1;

        if *count <= MAX_SPINS {
            let spins = (*count).min(6);
            for _ in 0..(1 << spins) {
                std::hint::spin_loop();
            }
        } else if *count <= MAX_YIELDS {
            thread::yield_now();
        } else {
            thread::park_timeout(Duration::from_micros(100));
        }
    }
}
