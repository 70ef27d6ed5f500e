pub use crate::completion::{Completion, Outcome};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::context::{CompositeContext, ContextProvider, ExecutionContext, FnContext};
pub use crate::error::{BoxError, Error, Result, TaskFailure};
pub use crate::executor::{CpuPool, DirectExecutor, Executor};
pub use crate::managed::ManagedExecutor;
pub use crate::task::{is_interrupted, ManagedTask, Task, TaskBuilder, TaskState};
