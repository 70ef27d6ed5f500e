//! Managed tasks.
//!
//! A [`Task`] wraps a computation so it can be observed while a pool runs it.
//! When a worker picks the task up, the computation runs inside a bracket:
//!
//! 1. the execution context (if any) is installed;
//! 2. the start time is recorded;
//! 3. the computation runs; an error or a panic becomes the terminal failure;
//! 4. on every exit path the context is uninstalled and only then the
//!    completion time is recorded;
//! 5. the outcome is published through the task's [`Completion`].
//!
//! A context that panics in `install` or `uninstall` fails the task the same
//! way a returned error does.
//!
//! All timestamps are wall-clock milliseconds since the UNIX epoch, 0 meaning
//! "not reached". A task cancelled before a worker picked it up never runs,
//! and keeps both its start and completion time at 0.

mod interrupt;

pub use interrupt::is_interrupted;

use crate::completion::{Completion, Outcome};
use crate::config::DEFAULT_HUNG_THRESHOLD;
use crate::context::ExecutionContext;
use crate::error::{BoxError, Error, Result, TaskFailure};
use crate::executor::{Executor, PanicHandler, PanicStrategy};
use crate::util::{clock, ScopeGuard};
use interrupt::InterruptScope;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Global task ID counter
static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        TaskId(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Submitted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// Point-in-time view of a task, independent of its value type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub state: TaskState,
    pub submission_time: u64,
    pub start_time: u64,
    pub completion_time: u64,
    pub run_time: Duration,
    pub hung_threshold: Duration,
    pub hung: bool,
}

/// Type-erased status surface of a [`Task`].
pub trait ManagedTask: Send + Sync {
    fn id(&self) -> TaskId;
    fn state(&self) -> TaskState;
    fn is_done(&self) -> bool;
    fn is_cancelled(&self) -> bool;
    fn cancel(&self, may_interrupt: bool) -> bool;
    fn is_task_hang(&self) -> bool;
    fn task_run_time(&self) -> Duration;
    fn submission_time(&self) -> u64;
    fn start_time(&self) -> u64;
    fn completion_time(&self) -> u64;
    fn hung_threshold(&self) -> Duration;
    fn cause(&self) -> Option<TaskFailure>;

    fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id(),
            state: self.state(),
            submission_time: self.submission_time(),
            start_time: self.start_time(),
            completion_time: self.completion_time(),
            run_time: self.task_run_time(),
            hung_threshold: self.hung_threshold(),
            hung: self.is_task_hang(),
        }
    }
}

type Computation<V> = Box<dyn FnOnce() -> std::result::Result<V, BoxError> + Send + 'static>;

struct TaskInner<V> {
    id: TaskId,
    pool: Arc<dyn Executor>,
    context: Option<Arc<dyn ExecutionContext>>,
    computation: Mutex<Option<Computation<V>>>,
    completion: Completion<V>,
    submitted: AtomicBool,
    submission_time: AtomicU64,
    start_time: AtomicU64,
    completion_time: AtomicU64,
    hung_threshold: Duration,
    terminal_failure: Mutex<Option<TaskFailure>>,
}

/// Observable, context-aware unit of work.
///
/// Cloning yields another handle to the same task.
pub struct Task<V> {
    inner: Arc<TaskInner<V>>,
}

impl<V> Clone for Task<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Builder for a [`Task`].
pub struct TaskBuilder<V> {
    pool: Arc<dyn Executor>,
    computation: Computation<V>,
    context: Option<Arc<dyn ExecutionContext>>,
    hung_threshold: Duration,
}

impl<V: Send + Sync + 'static> TaskBuilder<V> {
    /// Task for a computation that cannot fail (panics are still captured).
    pub fn new<F>(pool: Arc<dyn Executor>, computation: F) -> Self
    where
        F: FnOnce() -> V + Send + 'static,
    {
        Self::with_computation(pool, Box::new(move || Ok(computation())))
    }

    /// Task for a computation returning `Result`; an `Err` becomes the
    /// task's terminal failure.
    pub fn fallible<F, E>(pool: Arc<dyn Executor>, computation: F) -> Self
    where
        F: FnOnce() -> std::result::Result<V, E> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::with_computation(pool, Box::new(move || computation().map_err(Into::into)))
    }

    fn with_computation(pool: Arc<dyn Executor>, computation: Computation<V>) -> Self {
        Self {
            pool,
            computation,
            context: None,
            hung_threshold: DEFAULT_HUNG_THRESHOLD,
        }
    }

    pub fn context(mut self, context: Arc<dyn ExecutionContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Zero disables hang detection.
    pub fn hung_threshold(mut self, threshold: Duration) -> Self {
        self.hung_threshold = threshold;
        self
    }

    pub fn build(self) -> Task<V> {
        Task {
            inner: Arc::new(TaskInner {
                id: TaskId::next(),
                pool: self.pool,
                context: self.context,
                computation: Mutex::new(Some(self.computation)),
                completion: Completion::new(),
                submitted: AtomicBool::new(false),
                submission_time: AtomicU64::new(0),
                start_time: AtomicU64::new(0),
                completion_time: AtomicU64::new(0),
                hung_threshold: self.hung_threshold,
                terminal_failure: Mutex::new(None),
            }),
        }
    }
}

impl<V: Send + Sync + 'static> Task<V> {
    pub fn builder<F>(pool: Arc<dyn Executor>, computation: F) -> TaskBuilder<V>
    where
        F: FnOnce() -> V + Send + 'static,
    {
        TaskBuilder::new(pool, computation)
    }

    pub fn try_builder<F, E>(pool: Arc<dyn Executor>, computation: F) -> TaskBuilder<V>
    where
        F: FnOnce() -> std::result::Result<V, E> + Send + 'static,
        E: Into<BoxError>,
    {
        TaskBuilder::fallible(pool, computation)
    }

    /// Hand the task to its pool.
    ///
    /// The submission time is recorded before the pool can see the task. If
    /// the pool rejects it, the task goes back to its unsubmitted state and
    /// the rejection is returned.
    pub fn execute(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.submitted.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadySubmitted);
        }

        inner.submission_time.store(clock::now_millis(), Ordering::Release);

        let job = {
            let inner = inner.clone();
            Box::new(move || inner.run())
        };

        match inner.pool.execute(job) {
            Ok(()) => {
                tracing::debug!(task = %inner.id, "task submitted");
                Ok(())
            }
            Err(err) => {
                inner.submission_time.store(0, Ordering::Release);
                inner.submitted.store(false, Ordering::Release);
                tracing::debug!(task = %inner.id, error = %err, "task rejected");
                Err(err)
            }
        }
    }

    /// Cancel the task. Returns false if it was never submitted or already
    /// reached a terminal state.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        if !self.is_submitted() {
            return false;
        }
        let cancelled = self.inner.completion.cancel(may_interrupt);
        if cancelled {
            tracing::debug!(task = %self.inner.id, may_interrupt, "task cancelled");
        }
        cancelled
    }

    /// Block until the task finished and return its value.
    pub fn get(&self) -> Result<V>
    where
        V: Clone,
    {
        self.ensure_submitted()?;
        self.inner.completion.get()
    }

    /// Like [`get`](Self::get), giving up with [`Error::Timeout`]. The task
    /// keeps running.
    pub fn get_timeout(&self, timeout: Duration) -> Result<V>
    where
        V: Clone,
    {
        self.ensure_submitted()?;
        self.inner.completion.get_timeout(timeout)
    }

    /// The outcome, if the task is done.
    pub fn outcome(&self) -> Option<Arc<Outcome<V>>> {
        self.inner.completion.outcome()
    }

    /// The task's completion handle, for raw listener registration and
    /// waiting. Outcomes are published by the task itself only:
    ///
    /// ```compile_fail
    /// use std::sync::Arc;
    /// use veda_managed::{DirectExecutor, Outcome, Task};
    ///
    /// let task = Task::builder(Arc::new(DirectExecutor), || 1).build();
    /// task.completion().complete(Outcome::Success(99));
    /// ```
    pub fn completion(&self) -> &Completion<V> {
        &self.inner.completion
    }

    pub fn is_done(&self) -> bool {
        self.is_submitted() && self.inner.completion.is_done()
    }

    pub fn is_cancelled(&self) -> bool {
        self.is_submitted() && self.inner.completion.is_cancelled()
    }

    pub fn is_submitted(&self) -> bool {
        self.inner.submitted.load(Ordering::Acquire)
    }

    /// Run `callback` on the task's pool when the computation succeeds.
    pub fn on_success<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&Task<V>, &V) + Send + 'static,
    {
        self.on_success_with(callback, self.inner.pool.clone())
    }

    pub fn on_success_with<F>(&self, callback: F, executor: Arc<dyn Executor>) -> &Self
    where
        F: FnOnce(&Task<V>, &V) + Send + 'static,
    {
        let task = self.clone();
        self.inner.completion.add_listener(
            move |outcome: &Outcome<V>| {
                if let Outcome::Success(value) = outcome {
                    callback(&task, value);
                }
            },
            executor,
        );
        self
    }

    /// Run `callback` on the task's pool when the computation fails.
    /// Cancellation does not count as failure.
    pub fn on_failure<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&Task<V>, &TaskFailure) + Send + 'static,
    {
        self.on_failure_with(callback, self.inner.pool.clone())
    }

    pub fn on_failure_with<F>(&self, callback: F, executor: Arc<dyn Executor>) -> &Self
    where
        F: FnOnce(&Task<V>, &TaskFailure) + Send + 'static,
    {
        let task = self.clone();
        self.inner.completion.add_listener(
            move |outcome: &Outcome<V>| {
                if let Outcome::Failure(failure) = outcome {
                    callback(&task, failure);
                }
            },
            executor,
        );
        self
    }

    /// True while the task has not completed and has been pending for at
    /// least the hang threshold since submission.
    pub fn is_task_hang(&self) -> bool {
        let threshold = self.inner.hung_threshold;
        if threshold.is_zero() {
            return false;
        }

        let submitted = self.inner.submission_time.load(Ordering::Acquire);
        if submitted == 0 {
            return false;
        }

        let threshold_ms = u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX);
        self.inner.completion_time.load(Ordering::Acquire) == 0
            && clock::elapsed_millis(submitted) >= threshold_ms
    }

    /// Zero before start, time elapsed so far while running, and the final
    /// start-to-completion interval afterwards.
    pub fn task_run_time(&self) -> Duration {
        let start = self.inner.start_time.load(Ordering::Acquire);
        if start == 0 {
            return Duration::ZERO;
        }

        match self.inner.completion_time.load(Ordering::Acquire) {
            0 => Duration::from_millis(clock::elapsed_millis(start)),
            completed => Duration::from_millis(completed.saturating_sub(start)),
        }
    }

    /// The failure captured from the computation or its context.
    pub fn cause(&self) -> Option<TaskFailure> {
        self.inner.terminal_failure.lock().clone()
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn state(&self) -> TaskState {
        if let Some(outcome) = self.outcome() {
            return match *outcome {
                Outcome::Success(_) => TaskState::Completed,
                Outcome::Failure(_) => TaskState::Failed,
                Outcome::Cancelled => TaskState::Cancelled,
            };
        }

        if self.inner.start_time.load(Ordering::Acquire) > 0 {
            TaskState::Running
        } else if self.is_submitted() {
            TaskState::Submitted
        } else {
            TaskState::Created
        }
    }

    pub fn submission_time(&self) -> u64 {
        self.inner.submission_time.load(Ordering::Acquire)
    }

    pub fn start_time(&self) -> u64 {
        self.inner.start_time.load(Ordering::Acquire)
    }

    pub fn completion_time(&self) -> u64 {
        self.inner.completion_time.load(Ordering::Acquire)
    }

    pub fn hung_threshold(&self) -> Duration {
        self.inner.hung_threshold
    }

    pub fn execution_context(&self) -> Option<&Arc<dyn ExecutionContext>> {
        self.inner.context.as_ref()
    }

    /// Whether the task's pool stopped accepting work.
    pub fn is_shutdown(&self) -> bool {
        self.inner.pool.is_shutdown()
    }

    fn ensure_submitted(&self) -> Result<()> {
        if self.is_submitted() {
            Ok(())
        } else {
            Err(Error::NotSubmitted)
        }
    }
}

impl<V: Send + Sync + 'static> TaskInner<V> {
    fn run(&self) {
        if !self.completion.start() {
            tracing::debug!(task = %self.id, "cancelled before start");
            return;
        }

        let computation = match self.computation.lock().take() {
            Some(computation) => computation,
            None => return,
        };

        let outcome = self.run_bracketed(computation);
        let failed = outcome.is_failure();

        if self.completion.complete(outcome) {
            tracing::debug!(task = %self.id, failed, "task completed");
        } else {
            tracing::debug!(task = %self.id, "task finished after cancellation");
        }
    }

    fn run_bracketed(&self, computation: Computation<V>) -> Outcome<V> {
        let _interrupt = InterruptScope::enter(self.completion.interrupt_flag());

        let result = {
            let _cleanup = ScopeGuard::new(|| self.release_context());

            self.acquire_context()
                .and_then(|()| {
                    let submitted = self.submission_time.load(Ordering::Acquire);
                    self.start_time
                        .store(clock::now_millis_after(submitted), Ordering::Release);

                    isolate(computation)
                })
                .map_err(|failure| {
                    self.record_failure(failure.clone());
                    failure
                })
        };

        match result {
            // uninstall may still have failed the task
            Ok(value) => match self.terminal_failure.lock().clone() {
                Some(failure) => Outcome::Failure(failure),
                None => Outcome::Success(value),
            },
            Err(failure) => Outcome::Failure(failure),
        }
    }

    fn acquire_context(&self) -> std::result::Result<(), TaskFailure> {
        match &self.context {
            Some(context) => isolate(|| context.install()),
            None => Ok(()),
        }
    }

    // runs from a drop guard, so it must not unwind
    fn release_context(&self) {
        if let Some(context) = &self.context {
            if let Err(failure) = isolate(|| context.uninstall()) {
                tracing::warn!(task = %self.id, error = %failure, "execution context uninstall failed");
                self.record_failure(failure);
            }
        }

        let earliest = self
            .start_time
            .load(Ordering::Acquire)
            .max(self.submission_time.load(Ordering::Acquire));
        self.completion_time
            .store(clock::now_millis_after(earliest), Ordering::Release);
    }

    // first failure wins
    fn record_failure(&self, failure: TaskFailure) {
        let mut slot = self.terminal_failure.lock();
        if slot.is_none() {
            *slot = Some(failure);
        }
    }
}

/// Run user code, turning both an `Err` and a panic into a task failure.
fn isolate<T, F>(f: F) -> std::result::Result<T, TaskFailure>
where
    F: FnOnce() -> std::result::Result<T, BoxError>,
{
    match PanicHandler::new(PanicStrategy::Isolate).execute(f) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskFailure::from_error(err)),
        Err(panic) => Err(TaskFailure::Panic(panic)),
    }
}

impl<V: Send + Sync + 'static> ManagedTask for Task<V> {
    fn id(&self) -> TaskId {
        Task::id(self)
    }

    fn state(&self) -> TaskState {
        Task::state(self)
    }

    fn is_done(&self) -> bool {
        Task::is_done(self)
    }

    fn is_cancelled(&self) -> bool {
        Task::is_cancelled(self)
    }

    fn cancel(&self, may_interrupt: bool) -> bool {
        Task::cancel(self, may_interrupt)
    }

    fn is_task_hang(&self) -> bool {
        Task::is_task_hang(self)
    }

    fn task_run_time(&self) -> Duration {
        Task::task_run_time(self)
    }

    fn submission_time(&self) -> u64 {
        Task::submission_time(self)
    }

    fn start_time(&self) -> u64 {
        Task::start_time(self)
    }

    fn completion_time(&self) -> u64 {
        Task::completion_time(self)
    }

    fn hung_threshold(&self) -> Duration {
        Task::hung_threshold(self)
    }

    fn cause(&self) -> Option<TaskFailure> {
        Task::cause(self)
    }
}

impl<V> fmt::Debug for TaskBuilder<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskBuilder")
            .field("has_context", &self.context.is_some())
            .field("hung_threshold", &self.hung_threshold)
            .finish()
    }
}

impl<V: Send + Sync + 'static> fmt::Debug for Task<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("hung_threshold", &self.inner.hung_threshold)
            .finish()
    }
}
