//! Bounded polling.
//!
//! Every "wait for the UI to settle" in the crate goes through [`poll_until`]:
//! evaluate, sleep, re-evaluate, until the condition yields a value or the deadline
//! passes. The loop blocks the calling thread on purpose; there is one UI and one
//! automation session driving it.

use crate::errors::{AutomationError, WaitError};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Source of time for waits, injectable so tests can run without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time with real `thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock: `sleep` advances time instantly and is counted.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
    sleeps: AtomicU32,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: AtomicU32::new(0),
        }
    }

    /// Total virtual time slept so far.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn sleep_count(&self) -> u32 {
        self.sleeps.load(Ordering::SeqCst)
    }

    pub fn advance(&self, duration: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        *elapsed += duration;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        self.advance(duration);
    }
}

/// Poll interval and upper bound for one kind of wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WaitSpec {
    interval: Duration,
    timeout: Duration,
}

impl WaitSpec {
    /// Requires `timeout >= interval`, and a non-zero interval unless the
    /// timeout is zero (a single check).
    pub fn new(interval: Duration, timeout: Duration) -> Result<Self, AutomationError> {
        if timeout < interval {
            return Err(AutomationError::InvalidArgument(format!(
                "wait timeout {timeout:?} is shorter than its poll interval {interval:?}"
            )));
        }
        if interval.is_zero() && !timeout.is_zero() {
            return Err(AutomationError::InvalidArgument(format!(
                "a zero poll interval would spin for {timeout:?}; use a positive interval"
            )));
        }
        Ok(Self { interval, timeout })
    }

    /// A single evaluation with no sleeping.
    pub fn once() -> Self {
        Self {
            interval: Duration::ZERO,
            timeout: Duration::ZERO,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Evaluates `condition` until it yields a value or `timeout` elapses.
///
/// The condition runs once immediately. After a miss the loop fails if the deadline
/// has passed, otherwise sleeps `interval` and fails without re-evaluating if the
/// deadline passed during the sleep. An always-missing condition therefore runs
/// ⌈timeout / interval⌉ times (once when `timeout < interval` or `timeout == 0`).
/// A condition error aborts the wait immediately.
pub fn poll_until<T, F>(
    clock: &dyn Clock,
    interval: Duration,
    timeout: Duration,
    mut condition: F,
) -> Result<T, WaitError>
where
    F: FnMut() -> Result<Option<T>, AutomationError>,
{
    let start = clock.now();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        if let Some(value) = condition()? {
            debug!(attempts, "wait satisfied");
            return Ok(value);
        }

        let elapsed = clock.now().saturating_duration_since(start);
        if elapsed >= timeout {
            return Err(WaitError::TimedOut { elapsed, attempts });
        }

        trace!(attempts, ?elapsed, ?interval, "condition not met, sleeping");
        clock.sleep(interval);

        let elapsed = clock.now().saturating_duration_since(start);
        if elapsed >= timeout {
            debug!(attempts, ?elapsed, "wait deadline passed");
            return Err(WaitError::TimedOut { elapsed, attempts });
        }
    }
}

/// [`poll_until`] with a validated [`WaitSpec`].
pub fn wait_for<T, F>(clock: &dyn Clock, spec: &WaitSpec, condition: F) -> Result<T, WaitError>
where
    F: FnMut() -> Result<Option<T>, AutomationError>,
{
    poll_until(clock, spec.interval, spec.timeout, condition)
}
