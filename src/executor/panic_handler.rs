use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanicStrategy {
    Abort,
    Isolate,
    #[default]
    LogAndContinue,
}

#[derive(Debug)]
pub struct PanicHandler {
    strategy: PanicStrategy,
    panic_count: AtomicUsize,
}

impl PanicHandler {
    pub fn new(strategy: PanicStrategy) -> Self {
        Self {
            strategy,
            panic_count: AtomicUsize::new(0),
        }
    }

    pub fn execute<F, R>(&self, f: F) -> Result<R, PanicInfo>
    where
        F: FnOnce() -> R,
    {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => Ok(result),
            Err(panic_payload) => {
                self.panic_count.fetch_add(1, Ordering::Relaxed);

                let panic_info = PanicInfo::from_payload(panic_payload);

                match self.strategy {
                    PanicStrategy::Abort => {
                        tracing::error!(message = %panic_info.message, "job panicked (abort strategy)");
                        std::process::abort();
                    }
                    PanicStrategy::Isolate => {}
                    PanicStrategy::LogAndContinue => {
                        tracing::error!(message = %panic_info.message, "job panicked");
                    }
                }

                Err(panic_info)
            }
        }
    }

    pub fn panic_count(&self) -> usize {
        self.panic_count.load(Ordering::Relaxed)
    }

    pub fn reset_count(&self) {
        self.panic_count.store(0, Ordering::Relaxed);
    }

    pub fn strategy(&self) -> PanicStrategy {
        self.strategy
    }
}

impl Default for PanicHandler {
    fn default() -> Self {
        Self::new(PanicStrategy::default())
    }
}

/// Message recovered from a panic payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicInfo {
    pub message: String,
}

impl PanicInfo {
    fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        Self { message }
    }
}
