//! Managed executor facility.
//!
//! [`ManagedExecutor`] is the entry point most callers use: it owns a
//! [`CpuPool`], turns each submission into a [`Task`] carrying the configured
//! hang threshold and the contexts captured from its providers, and keeps
//! track of live tasks for hang reporting and run time statistics.

use crate::completion::Outcome;
use crate::config::Config;
use crate::context::{CompositeContext, ContextProvider, ExecutionContext};
use crate::error::{BoxError, Result};
use crate::executor::{CpuPool, DirectExecutor, Executor};
use crate::stats::{ExecutionStats, StatsSnapshot};
use crate::task::{ManagedTask, Task, TaskBuilder, TaskId, TaskInfo, TaskState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

type ActiveTasks = Arc<Mutex<HashMap<TaskId, Arc<dyn ManagedTask>>>>;

pub struct ManagedExecutor {
    name: String,
    pool: Arc<CpuPool>,
    hung_threshold: Duration,
    providers: Vec<Arc<dyn ContextProvider>>,
    active: ActiveTasks,
    stats: Arc<ExecutionStats>,
}

impl ManagedExecutor {
    pub fn new<S: Into<String>>(name: S, config: Config) -> Result<Self> {
        config.validate()?;

        let name = name.into();
        let pool = CpuPool::new(&config)?;

        tracing::info!(
            executor = %name,
            threads = pool.num_threads(),
            hung_threshold_ms = config.hung_threshold.as_millis() as u64,
            "managed executor started"
        );

        Ok(Self {
            name,
            pool: Arc::new(pool),
            hung_threshold: config.hung_threshold,
            providers: Vec::new(),
            active: Arc::new(Mutex::new(HashMap::new())),
            stats: Arc::new(ExecutionStats::new()),
        })
    }

    /// Capture a context from `provider` for every task submitted from now on.
    pub fn with_context_provider<P>(mut self, provider: P) -> Self
    where
        P: ContextProvider + 'static,
    {
        self.providers.push(Arc::new(provider));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool(&self) -> &Arc<CpuPool> {
        &self.pool
    }

    pub fn hung_threshold(&self) -> Duration {
        self.hung_threshold
    }

    /// Submit a computation that produces a value.
    pub fn submit<V, F>(&self, computation: F) -> Result<Task<V>>
    where
        V: Send + Sync + 'static,
        F: FnOnce() -> V + Send + 'static,
    {
        self.launch(TaskBuilder::new(self.executor(), computation))
    }

    /// Submit a computation whose `Err` becomes the task's failure.
    pub fn try_submit<V, F, E>(&self, computation: F) -> Result<Task<V>>
    where
        V: Send + Sync + 'static,
        F: FnOnce() -> std::result::Result<V, E> + Send + 'static,
        E: Into<BoxError>,
    {
        self.launch(TaskBuilder::fallible(self.executor(), computation))
    }

    /// Submit work that produces no value.
    pub fn execute<F>(&self, work: F) -> Result<Task<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(work)
    }

    fn executor(&self) -> Arc<dyn Executor> {
        self.pool.clone()
    }

    fn launch<V>(&self, builder: TaskBuilder<V>) -> Result<Task<V>>
    where
        V: Send + Sync + 'static,
    {
        let mut builder = builder.hung_threshold(self.hung_threshold);
        if let Some(context) = self.capture_context() {
            builder = builder.context(context);
        }
        let task = builder.build();
        let id = task.id();

        // tracked before execution so a fast task cannot finish untracked
        self.active.lock().insert(id, Arc::new(task.clone()));

        let active = self.active.clone();
        let stats = self.stats.clone();
        task.completion().add_listener(
            move |outcome: &Outcome<V>| {
                let finished = active.lock().remove(&id);
                let state = match outcome {
                    Outcome::Success(_) => TaskState::Completed,
                    Outcome::Failure(_) => TaskState::Failed,
                    Outcome::Cancelled => TaskState::Cancelled,
                };
                let run_time = finished
                    .filter(|task| task.start_time() > 0 && task.completion_time() > 0)
                    .map(|task| task.task_run_time());
                stats.record(state, run_time);
            },
            Arc::new(DirectExecutor),
        );

        if let Err(err) = task.execute() {
            self.active.lock().remove(&id);
            tracing::warn!(executor = %self.name, task = %id, error = %err, "submission rejected");
            return Err(err);
        }

        Ok(task)
    }

    fn capture_context(&self) -> Option<Arc<dyn ExecutionContext>> {
        match self.providers.as_slice() {
            [] => None,
            [single] => Some(single.prepare()),
            many => Some(Arc::new(CompositeContext::new(
                many.iter().map(|provider| provider.prepare()).collect(),
            ))),
        }
    }

    fn active_snapshot(&self) -> Vec<Arc<dyn ManagedTask>> {
        self.active.lock().values().cloned().collect()
    }

    /// Tasks submitted but not yet finished.
    pub fn active_tasks(&self) -> Vec<TaskInfo> {
        let mut infos: Vec<TaskInfo> = self
            .active_snapshot()
            .iter()
            .map(|task| task.info())
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Unfinished tasks pending longer than their hang threshold.
    pub fn hung_tasks(&self) -> Vec<TaskInfo> {
        let mut hung: Vec<TaskInfo> = self
            .active_snapshot()
            .iter()
            .filter(|task| !task.is_cancelled() && task.is_task_hang())
            .map(|task| task.info())
            .collect();
        hung.sort_by_key(|info| info.id);

        for info in &hung {
            tracing::warn!(
                executor = %self.name,
                task = %info.id,
                state = ?info.state,
                run_time_ms = info.run_time.as_millis() as u64,
                threshold_ms = info.hung_threshold.as_millis() as u64,
                "task appears hung"
            );
        }

        hung
    }

    pub fn execution_stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Stop accepting tasks. Tasks already submitted still run.
    pub fn shutdown(&self) {
        tracing::info!(executor = %self.name, active = self.active_count(), "managed executor shutting down");
        self.pool.shutdown();
    }

    /// Stop accepting tasks and cancel the unfinished ones, interrupting those
    /// already running. Returns the tasks that got cancelled.
    pub fn shutdown_now(&self) -> Vec<TaskInfo> {
        self.pool.shutdown();

        let mut cancelled: Vec<TaskInfo> = self
            .active_snapshot()
            .into_iter()
            .filter(|task| task.cancel(true))
            .map(|task| task.info())
            .collect();
        cancelled.sort_by_key(|info| info.id);

        tracing::info!(executor = %self.name, cancelled = cancelled.len(), "managed executor stopped");
        cancelled
    }

    pub fn is_shutdown(&self) -> bool {
        self.pool.is_shutdown()
    }

    pub fn is_terminated(&self) -> bool {
        self.pool.is_terminated()
    }

    /// Block until all workers exited after shutdown, or the timeout elapses.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.pool.await_termination(timeout)
    }
}

impl std::fmt::Debug for ManagedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedExecutor")
            .field("name", &self.name)
            .field("pool", &self.pool)
            .field("hung_threshold", &self.hung_threshold)
            .field("providers", &self.providers.len())
            .field("active", &self.active_count())
            .finish()
    }
}

impl Drop for ManagedExecutor {
    // tasks hold the pool too, so it may outlive us; let it drain and stop
    fn drop(&mut self) {
        self.pool.shutdown();
    }
}
