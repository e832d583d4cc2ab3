//! Condition poller: re-evaluate a predicate until it holds or the budget runs out.
//!
//! Use this only for state that exposes no completion signal (scroll offsets,
//! admin-active queries, rendered pixels). Anything with a callback should
//! complete a [`Latch`](crate::sync::latch::Latch) instead.
//!
//! Timing contract, with `T` = timeout and `I` = interval:
//! - a predicate that is already true returns without sleeping;
//! - a predicate that becomes true at `t < T` is seen no later than `t + I`;
//! - a predicate that never holds fails once, after waiting between `T` and
//!   `T + I`.

#![allow(missing_docs)]

use std::thread;
use std::time::{Duration, Instant};

use crate::core::config::TimeoutConfig;
use crate::core::errors::{PchError, Result};
use crate::logger::jsonl::{EventType, HarnessLog, LogEntry, Severity};
use crate::sync::latch::millis;

/// Bounded polling check.
#[derive(Debug, Clone)]
pub struct PollingCheck {
    timeout: Duration,
    interval: Duration,
    description: String,
    log: HarnessLog,
}

impl Default for PollingCheck {
    fn default() -> Self {
        Self::from_config(&TimeoutConfig::default())
    }
}

impl PollingCheck {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            // A zero interval would spin; one millisecond is the floor.
            interval: interval.max(Duration::from_millis(1)),
            description: "condition".to_string(),
            log: HarnessLog::disabled(),
        }
    }

    /// Suite defaults from the `[timeouts]` section.
    pub fn from_config(cfg: &TimeoutConfig) -> Self {
        Self::new(cfg.poll_timeout(), cfg.poll_interval())
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Name the condition for the timeout diagnostic.
    #[must_use]
    pub fn named(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_log(mut self, log: HarnessLog) -> Self {
        self.log = log;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll `predicate` until it returns `true`.
    pub fn wait_until<F>(&self, mut predicate: F) -> Result<()>
    where
        F: FnMut() -> bool,
    {
        let start = Instant::now();
        loop {
            if predicate() {
                return Ok(());
            }
            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                return Err(self.timed_out(elapsed));
            }
            // Never sleep past the deadline: the last evaluation lands on it.
            thread::sleep(self.interval.min(self.timeout - elapsed));
        }
    }

    /// Poll until `producer` yields a value equal to `expected`.
    ///
    /// `None` means "no result yet", e.g. an evaluation still in flight.
    pub fn wait_for_value<T, F>(&self, expected: &T, mut producer: F) -> Result<()>
    where
        T: PartialEq + std::fmt::Debug,
        F: FnMut() -> Option<T>,
    {
        let mut last: Option<T> = None;
        let outcome = self.wait_until(|| {
            last = producer();
            last.as_ref() == Some(expected)
        });
        outcome.map_err(|err| match err {
            PchError::Timeout {
                condition,
                waited_ms,
                budget_ms,
            } => PchError::Timeout {
                condition: format!("{condition} (expected {expected:?}, last saw {last:?})"),
                waited_ms,
                budget_ms,
            },
            other => other,
        })
    }

    /// Poll until `producer` returns something other than `initial`; return it.
    pub fn wait_for_change<T, F>(&self, initial: &T, mut producer: F) -> Result<T>
    where
        T: PartialEq,
        F: FnMut() -> T,
    {
        let mut changed: Option<T> = None;
        self.wait_until(|| {
            let current = producer();
            if &current == initial {
                false
            } else {
                changed = Some(current);
                true
            }
        })?;
        changed.ok_or_else(|| PchError::Runtime {
            details: format!("{}: change observed without a value", self.description),
        })
    }

    fn timed_out(&self, elapsed: Duration) -> PchError {
        let err = PchError::Timeout {
            condition: self.description.clone(),
            waited_ms: millis(elapsed),
            budget_ms: millis(self.timeout),
        };
        let mut entry = LogEntry::new(EventType::PollTimeout, Severity::Warning).with_error(&err);
        entry.condition = Some(self.description.clone());
        entry.elapsed_ms = Some(millis(elapsed));
        entry.budget_ms = Some(millis(self.timeout));
        self.log.record(&entry);
        err
    }
}

/// One-shot form of [`PollingCheck::wait_until`].
pub fn poll_until<F>(
    timeout: Duration,
    interval: Duration,
    description: &str,
    predicate: F,
) -> Result<()>
where
    F: FnMut() -> bool,
{
    PollingCheck::new(timeout, interval)
        .named(description)
        .wait_until(predicate)
}
