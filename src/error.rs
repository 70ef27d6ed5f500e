use std::fmt;
use std::sync::Arc;

use crate::executor::PanicInfo;

pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by user computations and execution contexts.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("submission rejected: {0}")]
    Rejected(String),

    #[error("task has not been submitted")]
    NotSubmitted,

    #[error("task was already submitted")]
    AlreadySubmitted,

    #[error("task was cancelled")]
    Cancelled,

    #[error("timed out waiting for task result")]
    Timeout,

    #[error("task failed: {0}")]
    Failed(TaskFailure),

    #[error("executor error: {0}")]
    Executor(String),

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub fn rejected<S: Into<String>>(msg: S) -> Self {
        Error::Rejected(msg.into())
    }

    pub fn executor<S: Into<String>>(msg: S) -> Self {
        Error::Executor(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// The captured task failure, if this error carries one.
    pub fn failure(&self) -> Option<&TaskFailure> {
        match self {
            Error::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// The terminal failure of a task.
///
/// Cheap to clone: the same failure is cached on the task, handed to failure
/// callbacks and surfaced through `get`.
#[derive(Clone)]
pub enum TaskFailure {
    /// The computation (or its execution context) returned an error.
    Error(Arc<dyn std::error::Error + Send + Sync + 'static>),
    /// The computation panicked.
    Panic(PanicInfo),
}

impl TaskFailure {
    pub fn from_error<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        TaskFailure::Error(Arc::from(err.into()))
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, TaskFailure::Panic(_))
    }

    /// Downcast the underlying error. Always `None` for panics.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            TaskFailure::Error(err) => err.downcast_ref::<E>(),
            TaskFailure::Panic(_) => None,
        }
    }

    /// True if both values are the same captured failure.
    pub fn ptr_eq(&self, other: &TaskFailure) -> bool {
        match (self, other) {
            (TaskFailure::Error(a), TaskFailure::Error(b)) => Arc::ptr_eq(a, b),
            (TaskFailure::Panic(a), TaskFailure::Panic(b)) => a.message == b.message,
            _ => false,
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::Error(err) => write!(f, "{}", err),
            TaskFailure::Panic(info) => write!(f, "panicked: {}", info.message),
        }
    }
}

impl fmt::Debug for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::Error(err) => f.debug_tuple("Error").field(err).finish(),
            TaskFailure::Panic(info) => f.debug_tuple("Panic").field(&info.message).finish(),
        }
    }
}

impl std::error::Error for TaskFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TaskFailure::Error(err) => Some(err.as_ref()),
            TaskFailure::Panic(_) => None,
        }
    }
}
