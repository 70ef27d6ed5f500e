//! VEDA Managed - observable tasks on a work-stealing thread pool
//!
//! Wraps each unit of work submitted to a pool so it can be watched and
//! steered while it runs: an execution context installed around the work,
//! lifecycle timestamps for hang detection and run time reporting,
//! success/failure callbacks, cancellation and status inspection.
//!
//! # Quick Start
//!
//! ```no_run
//! use veda_managed::prelude::*;
//! use std::time::Duration;
//!
//! let config = Config::builder()
//!     .num_threads(4)
//!     .hung_threshold(Duration::from_secs(10))
//!     .build()
//!     .unwrap();
//! let executor = ManagedExecutor::new("reports", config).unwrap();
//!
//! let task = executor.submit(|| 6 * 7).unwrap();
//! task.on_success(|task, value| println!("{} produced {}", task.id(), value));
//!
//! assert_eq!(task.get().unwrap(), 42);
//! ```
//!
//! # Features
//!
//! - **Execution Contexts**: caller state installed on the worker and always
//!   uninstalled afterwards
//! - **Hang Detection**: per-task thresholds, reported by the executor
//! - **Listenable Completion**: one handle for blocking get, cancellation and
//!   callbacks dispatched on any executor
//! - **Statistics**: outcome counters and run time percentiles

// Lint configuration
#![warn(missing_debug_implementations)]

pub mod completion;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod managed;
pub mod prelude;
pub mod stats;
pub mod task;
pub mod util;

// Re-export key types at crate root
pub use completion::{Completion, Outcome};
pub use config::{Config, ConfigBuilder};
pub use context::{CompositeContext, ContextProvider, ExecutionContext, FnContext};
pub use error::{BoxError, Error, Result, TaskFailure};
pub use executor::{CpuPool, DirectExecutor, Executor};
pub use managed::ManagedExecutor;
pub use stats::StatsSnapshot;
pub use task::{is_interrupted, ManagedTask, Task, TaskBuilder, TaskId, TaskInfo, TaskState};
