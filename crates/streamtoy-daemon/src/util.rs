//! Small helpers shared by worker threads.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::warn;

/// Joins `handle`, giving up after `timeout`.
///
/// Returns false if the thread was still running at the deadline; it is
/// then detached and left to exit on its own.
pub fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("{} thread did not stop within {:?}, abandoning it", name, timeout);
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    if handle.join().is_err() {
        warn!("{} thread panicked", name);
    }
    true
}

/// Logs repeated worker-loop errors at most once per minute.
pub struct ErrorThrottle {
    what: &'static str,
    failing: bool,
    suppressed: u32,
    last_log: Instant,
}

impl ErrorThrottle {
    pub fn new(what: &'static str) -> Self {
        Self {
            what,
            failing: false,
            suppressed: 0,
            last_log: Instant::now(),
        }
    }

    /// Records a failure. The first failure of a run is logged immediately,
    /// later ones are summarised at most once a minute.
    pub fn error(&mut self, e: &dyn std::fmt::Display) {
        let elapsed = self.last_log.elapsed();
        if !self.failing {
            warn!("{} error: {}", self.what, e);
        } else if elapsed >= Duration::from_secs(60) {
            warn!(
                "{} error (repeated {} times in {:?}): {}",
                self.what,
                self.suppressed + 1,
                elapsed,
                e
            );
        } else {
            self.suppressed += 1;
            return;
        }
        self.failing = true;
        self.suppressed = 0;
        self.last_log = Instant::now();
    }

    /// Records a success, ending the current run of failures.
    pub fn ok(&mut self) {
        self.failing = false;
        self.suppressed = 0;
    }

    /// Failures swallowed since the last log line.
    pub fn suppressed(&self) -> u32 {
        self.suppressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_finished_thread() {
        let handle = std::thread::spawn(|| {});
        assert!(join_with_timeout(handle, Duration::from_secs(1), "test"));
    }

    #[test]
    fn test_join_abandons_stuck_thread() {
        let handle = std::thread::spawn(|| std::thread::sleep(Duration::from_millis(500)));
        assert!(!join_with_timeout(handle, Duration::from_millis(20), "test"));
    }

    #[test]
    fn test_throttle_suppresses_repeats() {
        let mut throttle = ErrorThrottle::new("test");
        throttle.error(&"first");
        assert_eq!(throttle.suppressed(), 0);
        throttle.error(&"second");
        throttle.error(&"third");
        assert_eq!(throttle.suppressed(), 2);
        throttle.ok();
        assert_eq!(throttle.suppressed(), 0);
    }
}
