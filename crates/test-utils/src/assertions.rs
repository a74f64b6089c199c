//! Polling assertions for cross-thread tests.

use std::time::{Duration, Instant};

/// Poll `condition` every few milliseconds until it returns true or
/// `timeout` elapses. Returns whether the condition held in time.
pub fn assert_eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_success() {
        assert!(assert_eventually(Duration::from_millis(50), || true));
    }

    #[test]
    fn eventual_success() {
        let start = Instant::now();
        let ok = assert_eventually(Duration::from_secs(1), || {
            start.elapsed() > Duration::from_millis(20)
        });
        assert!(ok);
    }

    #[test]
    fn timeout_reports_failure() {
        assert!(!assert_eventually(Duration::from_millis(30), || false));
    }
}
