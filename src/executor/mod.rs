//! Job execution infrastructure.
//!
//! The [`Executor`] trait is the seam between managed tasks and whatever runs
//! them: the work-stealing [`CpuPool`] or the inline [`DirectExecutor`].

pub mod cpu_pool;
pub mod direct;
pub mod job;
pub mod panic_handler;
pub mod worker;

pub use cpu_pool::CpuPool;
pub use direct::DirectExecutor;
pub use job::{Job, JobId};
pub use panic_handler::{PanicHandler, PanicInfo, PanicStrategy};

use crate::error::Result;
use std::sync::Arc;

/// Something that runs boxed jobs.
///
/// `execute` either accepts the job, in which case it runs exactly once, or
/// returns [`Error::Rejected`](crate::Error::Rejected) and drops it unrun.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>) -> Result<()>;

    fn is_shutdown(&self) -> bool {
        false
    }
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>) -> Result<()> {
        (**self).execute(job)
    }

    fn is_shutdown(&self) -> bool {
        (**self).is_shutdown()
    }
}
