use std::marker::PhantomData;

/// Runs a closure when dropped, on normal exit, early return or unwinding.
pub(crate) struct ScopeGuard<'a, F: FnOnce()> {
    // taken on drop so the closure runs at most once
    closure: Option<F>,

    _p: PhantomData<&'a ()>,
}

impl<'a, F: FnOnce()> ScopeGuard<'a, F> {
    pub(crate) fn new(closure: F) -> Self {
        ScopeGuard {
            closure: Some(closure),
            _p: PhantomData,
        }
    }
}

impl<'a, F: FnOnce()> Drop for ScopeGuard<'a, F> {
    fn drop(&mut self) {
        if let Some(closure) = self.closure.take() {
            closure();
        }
    }
}
