//! Wall-clock timestamps in milliseconds since the UNIX epoch.
//!
//! Zero is reserved for "not reached yet", so readings are clamped to at
//! least 1.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn now_millis() -> u64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    (since_epoch.as_millis() as u64).max(1)
}

/// A reading that never goes below `earlier`, even if the wall clock stepped
/// backwards in between.
pub fn now_millis_after(earlier: u64) -> u64 {
    now_millis().max(earlier)
}

/// Milliseconds from `since` to now; zero if `since` is in the future.
pub fn elapsed_millis(since: u64) -> u64 {
    now_millis().saturating_sub(since)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_never_zero() {
        assert!(now_millis() > 0);
    }

    #[test]
    fn test_now_after_is_monotone() {
        let future = now_millis() + 60_000;
        assert_eq!(now_millis_after(future), future);

        let past = 1;
        assert!(now_millis_after(past) >= past);
    }

    #[test]
    fn test_elapsed_saturates() {
        assert_eq!(elapsed_millis(now_millis() + 60_000), 0);
        assert!(elapsed_millis(1) > 0);
    }
}
