//! Bounded, adaptive polling.
//!
//! Waiting for tile completion is latency critical, so a wait starts by
//! spinning, then yields the thread, then parks it for a sleep that doubles up
//! to `PollOptions::max_sleep`. The first two phases come from
//! `crossbeam::utils::Backoff`.

use crate::error::Result;
use std::thread;
use std::time::{Duration, Instant};

const INITIAL_SLEEP: Duration = Duration::from_micros(10);

/// Parameters of a polling wait.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOptions {
    /// Upper bound of a single sleep once spinning and yielding are exhausted.
    pub max_sleep: Duration,
    /// Give up after this long. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            max_sleep: Duration::from_micros(500),
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl PollOptions {
    pub fn with_max_sleep(mut self, max_sleep: Duration) -> Self {
        self.max_sleep = max_sleep;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Result of [`poll_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    TimedOut(Duration),
}

/// Spin, then yield, then sleep with exponential growth.
pub struct Backoff {
    spin: crossbeam::utils::Backoff,
    sleep: Duration,
    max_sleep: Duration,
}

impl Backoff {
    pub fn new(max_sleep: Duration) -> Self {
        Self {
            spin: crossbeam::utils::Backoff::new(),
            sleep: INITIAL_SLEEP.min(max_sleep),
            max_sleep,
        }
    }

    /// Waits one step.
    pub fn wait(&mut self) {
        if !self.spin.is_completed() {
            self.spin.snooze();
        } else {
            thread::sleep(self.sleep);
            self.sleep = (self.sleep * 2).min(self.max_sleep);
        }
    }

    /// True once the spinning and yielding phases are over.
    pub fn is_sleeping(&self) -> bool {
        self.spin.is_completed()
    }

    pub fn reset(&mut self) {
        self.spin.reset();
        self.sleep = INITIAL_SLEEP.min(self.max_sleep);
    }
}

/// Polls `condition` until it returns `Ok(true)`, it fails, or the timeout passes.
///
/// The condition is always evaluated at least once, and once more after the
/// deadline, so a condition that became true while sleeping is not reported
/// as a timeout.
pub fn poll_until<F>(options: &PollOptions, mut condition: F) -> Result<PollOutcome>
where
    F: FnMut() -> Result<bool>,
{
    let start = Instant::now();
    let mut backoff = Backoff::new(options.max_sleep);
    loop {
        if condition()? {
            return Ok(PollOutcome::Ready);
        }
        if let Some(timeout) = options.timeout {
            let waited = start.elapsed();
            if waited >= timeout {
                return Ok(PollOutcome::TimedOut(waited));
            }
        }
        backoff.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OverlapError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_ready_immediately() {
        let outcome = poll_until(&PollOptions::default(), || Ok(true)).unwrap();
        assert_eq!(outcome, PollOutcome::Ready);
    }

    #[test]
    fn test_ready_after_other_thread() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = {
            let flag = flag.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(5));
                flag.store(true, Ordering::Release);
            })
        };
        let outcome =
            poll_until(&PollOptions::default(), || Ok(flag.load(Ordering::Acquire))).unwrap();
        setter.join().unwrap();
        assert_eq!(outcome, PollOutcome::Ready);
    }

    #[test]
    fn test_times_out() {
        let options = PollOptions::default().with_timeout(Some(Duration::from_millis(2)));
        let outcome = poll_until(&options, || Ok(false)).unwrap();
        assert!(matches!(outcome, PollOutcome::TimedOut(waited) if waited >= Duration::from_millis(2)));
    }

    #[test]
    fn test_condition_error_propagates() {
        let err = poll_until(&PollOptions::default(), || {
            Err(OverlapError::WorkerPanicked("stream-0".into()))
        })
        .unwrap_err();
        assert!(matches!(err, OverlapError::WorkerPanicked(_)));
    }

    #[test]
    fn test_backoff_reaches_sleep_phase() {
        let mut backoff = Backoff::new(Duration::from_micros(20));
        let mut steps = 0;
        while !backoff.is_sleeping() {
            backoff.wait();
            steps += 1;
        }
        assert!(steps > 0);
        backoff.wait();
        assert_eq!(backoff.sleep, Duration::from_micros(20));
        backoff.reset();
        assert!(!backoff.is_sleeping());
    }
}
