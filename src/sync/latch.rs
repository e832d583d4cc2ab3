//! Blocking single-shot completion primitives.
//!
//! [`Latch`] is the latched result holder: PENDING → DONE, never back. Waits
//! park on a condition variable, so a waiter wakes as soon as the producer
//! completes instead of at the next polling tick. Every wait is bounded.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::errors::{PchError, Result};
use crate::logger::jsonl::{EventType, HarnessLog, LogEntry, Severity};

const DEFAULT_LATCH_TIMEOUT: Duration = Duration::from_secs(20);

struct Slot<T> {
    value: Mutex<Option<T>>,
    done: Condvar,
}

/// Single-assignment slot a callback fills and the test thread waits on.
///
/// Only the first [`complete`](Latch::complete) takes effect; later calls are
/// accepted and ignored, so the value a waiter observed never changes.
pub struct Latch<T> {
    slot: Arc<Slot<T>>,
    timeout: Duration,
    description: Arc<str>,
    log: HarnessLog,
}

impl<T> Clone for Latch<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            timeout: self.timeout,
            description: Arc::clone(&self.description),
            log: self.log.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Latch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Latch")
            .field("description", &self.description)
            .field("done", &self.is_done())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<T> Default for Latch<T> {
    fn default() -> Self {
        Self::new("latch")
    }
}

impl<T> Latch<T> {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            slot: Arc::new(Slot {
                value: Mutex::new(None),
                done: Condvar::new(),
            }),
            timeout: DEFAULT_LATCH_TIMEOUT,
            description: Arc::from(description.into()),
            log: HarnessLog::disabled(),
        }
    }

    /// Default budget used by [`wait_default`](Latch::wait_default).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_log(mut self, log: HarnessLog) -> Self {
        self.log = log;
        self
    }

    /// Complete the latch. Returns `true` if this call set the value.
    pub fn complete(&self, value: T) -> bool {
        let mut guard = self.slot.value.lock();
        if guard.is_some() {
            return false;
        }
        *guard = Some(value);
        drop(guard);
        self.slot.done.notify_all();
        true
    }

    pub fn is_done(&self) -> bool {
        self.slot.value.lock().is_some()
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl<T: Clone> Latch<T> {
    /// The value, if already completed. Never blocks.
    pub fn try_get(&self) -> Option<T> {
        self.slot.value.lock().clone()
    }

    /// Block until completed or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Result<T> {
        let start = Instant::now();
        let deadline = start + timeout;
        let mut guard = self.slot.value.lock();
        loop {
            if let Some(value) = guard.as_ref() {
                return Ok(value.clone());
            }
            // Spurious wakeups loop back and re-check against the same deadline.
            if self.slot.done.wait_until(&mut guard, deadline).timed_out() {
                if let Some(value) = guard.as_ref() {
                    return Ok(value.clone());
                }
                drop(guard);
                let err = PchError::Timeout {
                    condition: self.description.to_string(),
                    waited_ms: millis(start.elapsed()),
                    budget_ms: millis(timeout),
                };
                self.log.record(
                    &LogEntry::new(EventType::LatchTimeout, Severity::Warning).with_error(&err),
                );
                return Err(err);
            }
        }
    }

    /// Block using the latch's configured budget.
    pub fn wait_default(&self) -> Result<T> {
        self.wait(self.timeout)
    }
}

/// Latch that opens after `count` calls to [`count_down`](CountDownLatch::count_down).
#[derive(Clone)]
pub struct CountDownLatch {
    inner: Arc<(Mutex<u64>, Condvar)>,
}

impl CountDownLatch {
    pub fn new(count: u64) -> Self {
        Self {
            inner: Arc::new((Mutex::new(count), Condvar::new())),
        }
    }

    /// Decrement, saturating at zero. Wakes waiters when zero is reached.
    pub fn count_down(&self) {
        let (count, cv) = &*self.inner;
        let mut guard = count.lock();
        if *guard > 0 {
            *guard -= 1;
            if *guard == 0 {
                cv.notify_all();
            }
        }
    }

    pub fn count(&self) -> u64 {
        *self.inner.0.lock()
    }

    /// Returns `true` if the count reached zero within `timeout`.
    pub fn await_zero(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (count, cv) = &*self.inner;
        let mut guard = count.lock();
        while *guard > 0 {
            if cv.wait_until(&mut guard, deadline).timed_out() {
                return *guard == 0;
            }
        }
        true
    }
}

impl std::fmt::Debug for CountDownLatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountDownLatch")
            .field("count", &self.count())
            .finish()
    }
}

/// Resettable notification: a pending update is consumed by one successful wait.
///
/// Notifications coalesce. Any number of `notify` calls between two waits
/// leave a single pending update.
///
/// Unlike [`Latch`] this returns `false` on timeout instead of failing, which
/// lets a test assert that something did *not* happen within a window.
#[derive(Clone, Default)]
pub struct UpdateMonitor {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl UpdateMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        let (updated, cv) = &*self.inner;
        *updated.lock() = true;
        cv.notify_all();
    }

    /// Wait for a pending update and consume it.
    pub fn wait_for_update(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (updated, cv) = &*self.inner;
        let mut guard = updated.lock();
        while !*guard {
            if cv.wait_until(&mut guard, deadline).timed_out() && !*guard {
                return false;
            }
        }
        *guard = false;
        true
    }

    pub fn is_pending(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Drop a pending update. Waiters stay blocked on this monitor.
    pub fn clear(&self) {
        *self.inner.0.lock() = false;
    }
}

impl std::fmt::Debug for UpdateMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateMonitor")
            .field("pending", &self.is_pending())
            .finish()
    }
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn complete_before_wait_returns_immediately() {
        let latch = Latch::new("result");
        assert!(latch.complete(42));
        let start = Instant::now();
        assert_eq!(latch.wait(Duration::from_secs(5)).unwrap(), 42);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn wait_before_complete_wakes_promptly() {
        let latch: Latch<String> = Latch::new("title");
        let producer = latch.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            producer.complete("Original title".to_string());
        });

        let start = Instant::now();
        let value = latch.wait(Duration::from_secs(5)).unwrap();
        let elapsed = start.elapsed();
        handle.join().unwrap();

        assert_eq!(value, "Original title");
        assert!(elapsed >= Duration::from_millis(90), "woke early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(1), "woke late: {elapsed:?}");
    }

    #[test]
    fn second_complete_does_not_change_value() {
        let latch = Latch::new("first wins");
        assert!(latch.complete(1));
        assert!(!latch.complete(2));
        assert_eq!(latch.try_get(), Some(1));
        assert_eq!(latch.wait(Duration::from_millis(1)).unwrap(), 1);
    }

    #[test]
    fn wait_times_out_without_completion() {
        let latch: Latch<()> = Latch::new("never completed");
        let start = Instant::now();
        let err = latch.wait(Duration::from_millis(150)).unwrap_err();
        let elapsed = start.elapsed();

        assert!(err.is_timeout());
        assert!(err.to_string().contains("never completed"));
        assert!(elapsed >= Duration::from_millis(150));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn wait_default_uses_configured_budget() {
        let latch: Latch<u8> = Latch::new("short").with_timeout(Duration::from_millis(30));
        match latch.wait_default() {
            Err(PchError::Timeout { budget_ms, .. }) => assert_eq!(budget_ms, 30),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn count_down_latch_opens_at_zero() {
        let latch = CountDownLatch::new(3);
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let l = latch.clone();
                thread::spawn(move || l.count_down())
            })
            .collect();
        assert!(latch.await_zero(Duration::from_secs(5)));
        for h in handles {
            h.join().unwrap();
        }
        latch.count_down();
        assert_eq!(latch.count(), 0);
    }

    #[test]
    fn count_down_latch_times_out() {
        let latch = CountDownLatch::new(2);
        latch.count_down();
        assert!(!latch.await_zero(Duration::from_millis(30)));
        assert_eq!(latch.count(), 1);
    }

    #[test]
    fn update_monitor_consumes_notifications() {
        let monitor = UpdateMonitor::new();
        assert!(!monitor.wait_for_update(Duration::from_millis(20)));

        monitor.notify();
        assert!(monitor.wait_for_update(Duration::from_millis(20)));
        // Consumed: the next wait sees nothing.
        assert!(!monitor.wait_for_update(Duration::from_millis(20)));

        let notifier = monitor.clone();
        let h = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            notifier.notify();
        });
        assert!(monitor.wait_for_update(Duration::from_secs(5)));
        h.join().unwrap();
    }

    #[test]
    fn update_monitor_coalesces_and_clears() {
        let monitor = UpdateMonitor::new();
        monitor.notify();
        monitor.notify();
        assert!(monitor.wait_for_update(Duration::from_millis(20)));
        assert!(!monitor.wait_for_update(Duration::from_millis(20)));

        monitor.notify();
        monitor.clear();
        assert!(!monitor.is_pending());
        assert!(!monitor.wait_for_update(Duration::from_millis(20)));
    }
}
