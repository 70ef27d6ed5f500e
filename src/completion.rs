//! Listenable completion handle.
//!
//! A [`Completion`] is the single handle a managed task exposes: callers can
//! block on it, poll it, or register listeners that are dispatched on an
//! executor of their choice once the outcome is known. Only the task's own
//! bracket publishes an outcome, and cancellation goes through the task.
//!
//! Listener rules:
//! - registered before completion: dispatched exactly once, when it completes;
//! - registered after completion: dispatched right away, still through the
//!   chosen executor;
//! - a panicking listener is isolated and never affects the others.

use crate::error::{Error, Result, TaskFailure};
use crate::executor::{Executor, PanicHandler, PanicStrategy};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Terminal outcome of a task.
#[derive(Debug)]
pub enum Outcome<V> {
    Success(V),
    Failure(TaskFailure),
    Cancelled,
}

impl<V> Outcome<V> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    pub fn value(&self) -> Option<&V> {
        match self {
            Outcome::Success(v) => Some(v),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        match self {
            Outcome::Failure(f) => Some(f),
            _ => None,
        }
    }

    /// Convert to the result `get` reports.
    pub fn to_result(&self) -> Result<V>
    where
        V: Clone,
    {
        match self {
            Outcome::Success(v) => Ok(v.clone()),
            Outcome::Failure(f) => Err(Error::Failed(f.clone())),
            Outcome::Cancelled => Err(Error::Cancelled),
        }
    }
}

type Callback<V> = Box<dyn FnOnce(&Outcome<V>) + Send + 'static>;

struct Listener<V> {
    callback: Callback<V>,
    executor: Arc<dyn Executor>,
}

enum State<V> {
    Pending {
        running: bool,
        listeners: Vec<Listener<V>>,
    },
    Done(Arc<Outcome<V>>),
}

pub struct Completion<V> {
    state: Mutex<State<V>>,
    done: Condvar,
    interrupt: Arc<AtomicBool>,
}

impl<V: Send + Sync + 'static> Completion<V> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::Pending {
                running: false,
                listeners: Vec::new(),
            }),
            done: Condvar::new(),
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mark the work as picked up by a worker. Returns false if the
    /// completion is already terminal, in which case the work must not run.
    pub(crate) fn start(&self) -> bool {
        match &mut *self.state.lock() {
            State::Pending { running, .. } => {
                *running = true;
                true
            }
            State::Done(_) => false,
        }
    }

    /// Publish the outcome. Returns false if the completion was already
    /// terminal (e.g. cancelled while running); the outcome is then dropped.
    pub(crate) fn complete(&self, outcome: Outcome<V>) -> bool {
        let state = self.state.lock();
        if matches!(&*state, State::Done(_)) {
            return false;
        }
        self.finish(state, outcome);
        true
    }

    /// Cancel unless already terminal. With `may_interrupt`, work that is
    /// already running gets its interrupt flag raised.
    pub(crate) fn cancel(&self, may_interrupt: bool) -> bool {
        let state = self.state.lock();
        let running = match &*state {
            State::Pending { running, .. } => *running,
            State::Done(_) => return false,
        };

        if may_interrupt && running {
            self.interrupt.store(true, Ordering::Release);
        }

        self.finish(state, Outcome::Cancelled);
        true
    }

    pub fn is_done(&self) -> bool {
        matches!(&*self.state.lock(), State::Done(_))
    }

    pub fn is_cancelled(&self) -> bool {
        match &*self.state.lock() {
            State::Done(outcome) => outcome.is_cancelled(),
            State::Pending { .. } => false,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Acquire)
    }

    pub(crate) fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    /// The outcome, if already known.
    pub fn outcome(&self) -> Option<Arc<Outcome<V>>> {
        match &*self.state.lock() {
            State::Done(outcome) => Some(outcome.clone()),
            State::Pending { .. } => None,
        }
    }

    /// Block until the outcome is known.
    pub fn wait(&self) -> Arc<Outcome<V>> {
        let mut state = self.state.lock();
        loop {
            if let State::Done(outcome) = &*state {
                return outcome.clone();
            }
            self.done.wait(&mut state);
        }
    }

    /// Block until the outcome is known or the timeout elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Arc<Outcome<V>>> {
        let deadline = match Instant::now().checked_add(timeout) {
            Some(deadline) => deadline,
            // too far out to ever elapse
            None => return Some(self.wait()),
        };
        let mut state = self.state.lock();
        loop {
            if let State::Done(outcome) = &*state {
                return Some(outcome.clone());
            }
            if self.done.wait_until(&mut state, deadline).timed_out() {
                return match &*state {
                    State::Done(outcome) => Some(outcome.clone()),
                    State::Pending { .. } => None,
                };
            }
        }
    }

    pub fn get(&self) -> Result<V>
    where
        V: Clone,
    {
        self.wait().to_result()
    }

    pub fn get_timeout(&self, timeout: Duration) -> Result<V>
    where
        V: Clone,
    {
        match self.wait_timeout(timeout) {
            Some(outcome) => outcome.to_result(),
            None => Err(Error::Timeout),
        }
    }

    /// Register a listener dispatched on `executor` once the outcome is known.
    pub fn add_listener<F>(&self, callback: F, executor: Arc<dyn Executor>)
    where
        F: FnOnce(&Outcome<V>) + Send + 'static,
    {
        let listener = Listener {
            callback: Box::new(callback),
            executor,
        };

        let outcome = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Pending { listeners, .. } => {
                    listeners.push(listener);
                    return;
                }
                State::Done(outcome) => outcome.clone(),
            }
        };

        dispatch(listener, outcome);
    }

    fn finish(&self, mut state: MutexGuard<'_, State<V>>, outcome: Outcome<V>) {
        let outcome = Arc::new(outcome);
        let previous = std::mem::replace(&mut *state, State::Done(outcome.clone()));
        drop(state);

        if let State::Pending { listeners, .. } = previous {
            for listener in listeners {
                dispatch(listener, outcome.clone());
            }
        }

        self.done.notify_all();
    }
}

impl<V> std::fmt::Debug for Completion<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match &*self.state.lock() {
            State::Pending { running: false, .. } => "pending",
            State::Pending { running: true, .. } => "running",
            State::Done(outcome) => match **outcome {
                Outcome::Success(_) => "succeeded",
                Outcome::Failure(_) => "failed",
                Outcome::Cancelled => "cancelled",
            },
        };
        f.debug_struct("Completion").field("status", &status).finish()
    }
}

fn dispatch<V: Send + Sync + 'static>(listener: Listener<V>, outcome: Arc<Outcome<V>>) {
    let Listener { callback, executor } = listener;

    let job = Box::new(move || {
        let isolated = PanicHandler::new(PanicStrategy::Isolate).execute(|| callback(&outcome));
        if let Err(panic) = isolated {
            tracing::error!(message = %panic.message, "completion listener panicked");
        }
    });

    if let Err(err) = executor.execute(job) {
        tracing::warn!(error = %err, "completion listener dispatch rejected");
    }
}
