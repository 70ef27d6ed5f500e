//! Cooperative interruption of running tasks.
//!
//! `Task::cancel(true)` cannot stop a thread; it raises a flag that the
//! computation polls through [`is_interrupted`].

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

thread_local! {
    static CURRENT: RefCell<Option<Arc<AtomicBool>>> = const { RefCell::new(None) };
}

/// True if the task running on this thread has been cancelled with
/// interruption. Always false outside a managed task.
pub fn is_interrupted() -> bool {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false)
    })
}

/// Binds an interrupt flag to the current thread until dropped.
pub(crate) struct InterruptScope {
    previous: Option<Arc<AtomicBool>>,
}

impl InterruptScope {
    pub(crate) fn enter(flag: Arc<AtomicBool>) -> Self {
        let previous = CURRENT.with(|current| current.borrow_mut().replace(flag));
        Self { previous }
    }
}

impl Drop for InterruptScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}
