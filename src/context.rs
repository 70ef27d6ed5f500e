//! Execution contexts.
//!
//! An [`ExecutionContext`] carries caller-side state onto the worker thread:
//! it is installed right before a task's computation runs and uninstalled
//! right after, on every exit path. A [`ContextProvider`] captures a fresh
//! context on the submitting thread each time a task is submitted.

use crate::error::BoxError;
use std::fmt;
use std::sync::Arc;

pub trait ExecutionContext: Send + Sync {
    /// Called on the worker thread before the computation.
    fn install(&self) -> Result<(), BoxError>;

    /// Called on the worker thread after the computation, also when it failed
    /// and when `install` itself failed.
    fn uninstall(&self) -> Result<(), BoxError>;
}

/// Produces the context for a task, on the thread that submits it.
pub trait ContextProvider: Send + Sync {
    fn prepare(&self) -> Arc<dyn ExecutionContext>;
}

impl<F> ContextProvider for F
where
    F: Fn() -> Arc<dyn ExecutionContext> + Send + Sync,
{
    fn prepare(&self) -> Arc<dyn ExecutionContext> {
        self()
    }
}

/// Context built from an install/uninstall pair of closures.
pub struct FnContext<I, U> {
    install: I,
    uninstall: U,
}

impl<I, U> FnContext<I, U>
where
    I: Fn() -> Result<(), BoxError> + Send + Sync,
    U: Fn() -> Result<(), BoxError> + Send + Sync,
{
    pub fn new(install: I, uninstall: U) -> Self {
        Self { install, uninstall }
    }
}

impl<I, U> ExecutionContext for FnContext<I, U>
where
    I: Fn() -> Result<(), BoxError> + Send + Sync,
    U: Fn() -> Result<(), BoxError> + Send + Sync,
{
    fn install(&self) -> Result<(), BoxError> {
        (self.install)()
    }

    fn uninstall(&self) -> Result<(), BoxError> {
        (self.uninstall)()
    }
}

impl<I, U> fmt::Debug for FnContext<I, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnContext").finish_non_exhaustive()
    }
}

/// Several contexts applied as one.
///
/// Installs in order and uninstalls in reverse. Installation stops at the
/// first failing member; the task bracket still calls `uninstall`, which
/// reaches every member.
#[derive(Default, Clone)]
pub struct CompositeContext {
    members: Vec<Arc<dyn ExecutionContext>>,
}

impl CompositeContext {
    pub fn new(members: Vec<Arc<dyn ExecutionContext>>) -> Self {
        Self { members }
    }

    pub fn push(&mut self, member: Arc<dyn ExecutionContext>) {
        self.members.push(member);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl ExecutionContext for CompositeContext {
    fn install(&self) -> Result<(), BoxError> {
        for member in &self.members {
            member.install()?;
        }
        Ok(())
    }

    fn uninstall(&self) -> Result<(), BoxError> {
        // every member gets uninstalled; the first error is reported
        let mut first_err = None;
        for member in self.members.iter().rev() {
            if let Err(err) = member.uninstall() {
                if first_err.is_none() {
                    first_err = Some(err);
                } else {
                    tracing::warn!(error = %err, "context uninstall failed");
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for CompositeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeContext")
            .field("members", &self.members.len())
            .finish()
    }
}
