use super::Executor;
use crate::error::Result;

/// Runs every job immediately on the calling thread.
///
/// Used for listeners that only touch bookkeeping and must not depend on a
/// pool that may already be shutting down.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectExecutor;

impl Executor for DirectExecutor {
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>) -> Result<()> {
        job();
        Ok(())
    }
}
