use super::job::Job;
use super::panic_handler::PanicHandler;
use super::worker::{PoolShared, Worker, WorkerId, WorkerState};
use super::Executor;
use crate::config::Config;
use crate::error::{Error, Result};
use crossbeam_deque::{Injector, Stealer};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Work-stealing pool of worker threads.
///
/// `shutdown` stops admission; jobs accepted before it still run, and the
/// workers exit once nothing is pending.
pub struct CpuPool {
    workers: Vec<WorkerHandle>,
    injector: Arc<Injector<Job>>,
    shared: Arc<PoolShared>,
    num_threads: usize,
    max_queue_size: usize,
    next_wake: AtomicUsize,
}

struct WorkerHandle {
    id: WorkerId,
    thread: Mutex<Option<JoinHandle<()>>>,
    unparker: thread::Thread,
    state: Arc<WorkerState>,
}

impl CpuPool {
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;

        let num_threads = config.worker_threads();
        if num_threads == 0 {
            return Err(Error::config("need at least 1 thread"));
        }

        let injector = Arc::new(Injector::new());
        let shared = Arc::new(PoolShared::new(
            num_threads,
            PanicHandler::new(config.panic_strategy),
        ));

        let mut workers = Vec::with_capacity(num_threads);
        let mut stealers: Vec<Stealer<Job>> = Vec::with_capacity(num_threads);

        for id in 0..num_threads {
            let worker = Worker::new(id);
            stealers.push(worker.local_queue.stealer());
            workers.push(worker);
        }

        let mut handles = Vec::with_capacity(num_threads);

        for worker in workers {
            let id = worker.id;
            let state = worker.state.clone();
            let stealers_clone = stealers.clone();
            let injector_clone = injector.clone();
            let shared_clone = shared.clone();
            let name = format!("{}-{}", config.thread_name_prefix, id);

            let mut builder = thread::Builder::new().name(name);

            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let spawned = builder.spawn(move || {
                worker.run(stealers_clone, injector_clone, shared_clone);
            });

            let thread = match spawned {
                Ok(thread) => thread,
                Err(e) => {
                    // workers already started must not outlive the failed pool
                    shared.shutdown.store(true, Ordering::SeqCst);
                    *shared.live_workers.lock() -= num_threads - id;
                    return Err(Error::executor(format!("spawn failed: {}", e)));
                }
            };

            let unparker = thread.thread().clone();

            handles.push(WorkerHandle {
                id,
                thread: Mutex::new(Some(thread)),
                unparker,
                state,
            });
        }

        tracing::debug!(threads = num_threads, prefix = %config.thread_name_prefix, "cpu pool started");

        Ok(Self {
            workers: handles,
            injector,
            shared,
            num_threads,
            max_queue_size: config.max_queue_size,
            next_wake: AtomicUsize::new(0),
        })
    }

    /// Queue a job for execution.
    pub fn submit(&self, job: Job) -> Result<()> {
        // counted before the shutdown check so a draining worker never misses it
        let pending = self.shared.pending.fetch_add(1, Ordering::SeqCst);

        if self.shared.shutdown.load(Ordering::SeqCst) {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::rejected("pool is shut down"));
        }

        if pending >= self.max_queue_size {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!(pending, max = self.max_queue_size, "job rejected, queue saturated");
            return Err(Error::rejected(format!(
                "queue saturated ({} pending)",
                pending
            )));
        }

        self.injector.push(job);

        // Wake up a worker
        let idx = self.next_wake.fetch_add(1, Ordering::Relaxed) % self.num_threads;
        if let Some(worker) = self.workers.get(idx) {
            worker.unparker.unpark();
        }

        Ok(())
    }

    /// Jobs accepted but not yet finished.
    pub fn pending_jobs(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Jobs run to completion (or panicked) across all workers.
    pub fn executed_jobs(&self) -> u64 {
        self.workers
            .iter()
            .map(|w| w.state.jobs_executed.load(Ordering::Relaxed))
            .sum()
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn panic_count(&self) -> usize {
        self.shared.panic_handler.panic_count()
    }

    /// Stop accepting jobs. Already accepted jobs keep running.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::debug!(pending = self.pending_jobs(), "cpu pool shutting down");

        // wake everyone up to check shutdown flag
        for worker in &self.workers {
            worker.unparker.unpark();
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst) && *self.shared.live_workers.lock() == 0
    }

    /// Block until every worker exited after shutdown, or the timeout elapses.
    /// Returns true if the pool terminated.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut live = self.shared.live_workers.lock();

        while *live > 0 {
            match deadline {
                Some(deadline) => {
                    if self
                        .shared
                        .terminated
                        .wait_until(&mut live, deadline)
                        .timed_out()
                    {
                        return *live == 0;
                    }
                }
                None => self.shared.terminated.wait(&mut live),
            }
        }

        true
    }

    fn join_workers(&self) {
        let current = thread::current().id();

        // dropped from inside a job: the workers drain and exit on their own
        if self.workers.iter().any(|w| w.unparker.id() == current) {
            return;
        }

        for worker in &self.workers {
            if let Some(thread) = worker.thread.lock().take() {
                if thread.join().is_err() {
                    tracing::error!(worker = worker.id, "worker thread panicked");
                }
            }
        }
    }
}

impl Executor for CpuPool {
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>) -> Result<()> {
        self.submit(Job::new(job))
    }

    fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for CpuPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuPool")
            .field("num_threads", &self.num_threads)
            .field("pending", &self.pending_jobs())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl Drop for CpuPool {
    fn drop(&mut self) {
        self.shutdown();
        self.join_workers();
    }
}
