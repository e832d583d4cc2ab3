//! Per-test case context: assertions, environment skips, scoped teardown.
//!
//! Each case gets fresh state. [`run_case`] drives one body to a
//! [`CaseReport`]: skips become `Skipped`, errors and panics become `Failed`,
//! and teardown always runs afterwards in reverse registration order.

#![allow(missing_docs)]

pub mod capability;
pub mod fixture;

use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::case::capability::{Capabilities, DeclaredCapabilities};
use crate::case::fixture::TeardownStack;
use crate::core::config::HarnessConfig;
use crate::core::errors::{PchError, Result};
use crate::logger::jsonl::{EventType, HarnessLog, LogEntry, Severity};
use crate::runner::looper::panic_message;
use crate::sync::latch::{Latch, millis};
use crate::sync::poller::PollingCheck;
use crate::sync::shared::Counter;

/// Final state of one test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaseOutcome {
    Passed,
    Skipped { capability: String },
    Failed { code: String, message: String },
}

impl CaseOutcome {
    /// Passed and skipped cases both count as success.
    pub const fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// Summary of one executed case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseReport {
    pub name: String,
    pub outcome: CaseOutcome,
    pub assertions: u64,
    pub elapsed_ms: u64,
}

/// State handed to a case body.
pub struct CaseContext {
    name: String,
    config: HarnessConfig,
    capabilities: Arc<dyn Capabilities>,
    log: HarnessLog,
    assertions: Counter,
    teardown: TeardownStack,
}

impl CaseContext {
    pub fn new(name: impl Into<String>, config: &HarnessConfig, log: HarnessLog) -> Self {
        Self::with_capabilities(
            name,
            config,
            log,
            Arc::new(DeclaredCapabilities::from_config(&config.capabilities)),
        )
    }

    pub fn with_capabilities(
        name: impl Into<String>,
        config: &HarnessConfig,
        log: HarnessLog,
        capabilities: Arc<dyn Capabilities>,
    ) -> Self {
        Self {
            name: name.into(),
            config: config.clone(),
            capabilities,
            log,
            assertions: Counter::new(),
            teardown: TeardownStack::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn log(&self) -> &HarnessLog {
        &self.log
    }

    /// Number of assertions executed so far.
    pub fn assertions(&self) -> u64 {
        self.assertions.get()
    }

    // ──────────────────── environment ────────────────────

    /// Skip the case unless `feature` is available.
    pub fn require(&self, feature: &str) -> Result<()> {
        self.capabilities.require(feature)
    }

    pub fn has(&self, feature: &str) -> bool {
        self.capabilities.has(feature)
    }

    // ──────────────────── synchronization ────────────────────

    /// Poller with the suite's default budget, logging into this case.
    pub fn poller(&self, description: &str) -> PollingCheck {
        PollingCheck::from_config(&self.config.timeouts)
            .named(description)
            .with_log(self.log.clone())
    }

    /// Latch with the suite's default budget, logging into this case.
    pub fn latch<T>(&self, description: &str) -> Latch<T> {
        Latch::new(description)
            .with_timeout(self.config.timeouts.latch_timeout())
            .with_log(self.log.clone())
    }

    // ──────────────────── teardown ────────────────────

    /// Register a release action that runs when the case ends, whatever the outcome.
    pub fn defer(
        &mut self,
        name: impl Into<String>,
        task: impl FnOnce() -> Result<()> + Send + 'static,
    ) {
        self.teardown.push(name, task);
    }

    // ──────────────────── assertions ────────────────────

    pub fn check(&self, condition: bool, message: &str) -> Result<()> {
        self.assertions.increment();
        if condition {
            Ok(())
        } else {
            Err(PchError::assertion(message))
        }
    }

    pub fn check_eq<T: PartialEq + Debug>(&self, expected: &T, actual: &T) -> Result<()> {
        self.assertions.increment();
        if expected == actual {
            Ok(())
        } else {
            Err(PchError::assertion(format!(
                "expected {expected:?}, got {actual:?}"
            )))
        }
    }

    pub fn check_ne<T: PartialEq + Debug>(&self, unexpected: &T, actual: &T) -> Result<()> {
        self.assertions.increment();
        if unexpected == actual {
            Err(PchError::assertion(format!(
                "expected anything but {unexpected:?}"
            )))
        } else {
            Ok(())
        }
    }

    /// Approximate equality using the configured epsilon.
    pub fn check_close(&self, expected: f64, actual: f64) -> Result<()> {
        self.check_close_within(expected, actual, self.config.tolerance.float_epsilon)
    }

    pub fn check_close_within(&self, expected: f64, actual: f64, epsilon: f64) -> Result<()> {
        self.assertions.increment();
        if (expected - actual).abs() <= epsilon {
            Ok(())
        } else {
            Err(PchError::assertion(format!(
                "expected {expected} ± {epsilon}, got {actual}"
            )))
        }
    }

    /// Assert that a wall-clock measurement is within `expected` plus the configured slack.
    pub fn check_within_budget(&self, elapsed: Duration, expected: Duration) -> Result<()> {
        let slack = Duration::from_millis(self.config.tolerance.timing_slack_ms);
        self.check(
            elapsed <= expected + slack,
            &format!(
                "took {}ms, budget {}ms + {}ms slack",
                millis(elapsed),
                millis(expected),
                millis(slack)
            ),
        )
    }

    /// Assert that a platform call failed, returning its error for inspection.
    ///
    /// Used when triggering a platform failure is the point of the case.
    pub fn expect_err<T: Debug>(&self, result: Result<T>, message: &str) -> Result<PchError> {
        self.assertions.increment();
        match result {
            Err(err) => Ok(err),
            Ok(value) => Err(PchError::assertion(format!(
                "{message}: expected failure, got Ok({value:?})"
            ))),
        }
    }

    fn finish(mut self, body: std::thread::Result<Result<()>>, started: Instant) -> CaseReport {
        let mut outcome = match body {
            Ok(Ok(())) => CaseOutcome::Passed,
            Ok(Err(PchError::Skipped { capability })) => CaseOutcome::Skipped { capability },
            Ok(Err(err)) => CaseOutcome::Failed {
                code: err.code().to_string(),
                message: err.to_string(),
            },
            Err(payload) => CaseOutcome::Failed {
                code: "PCH-3900".to_string(),
                message: format!("case panicked: {}", panic_message(payload.as_ref())),
            },
        };

        for (task, err) in self.teardown.run_all() {
            let mut entry = LogEntry::new(EventType::TeardownFailed, Severity::Warning)
                .with_case(self.name.clone())
                .with_error(&err);
            entry.details = Some(format!("task={task}"));
            self.log.record(&entry);
            // A teardown failure fails a case that otherwise passed.
            if outcome == CaseOutcome::Passed {
                outcome = CaseOutcome::Failed {
                    code: err.code().to_string(),
                    message: format!("teardown {task}: {err}"),
                };
            }
        }

        let report = CaseReport {
            name: self.name.clone(),
            outcome,
            assertions: self.assertions.get(),
            elapsed_ms: millis(started.elapsed()),
        };
        self.log.record(&outcome_entry(&report));
        report
    }
}

impl std::fmt::Debug for CaseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseContext")
            .field("name", &self.name)
            .field("assertions", &self.assertions.get())
            .field("teardown", &self.teardown)
            .finish_non_exhaustive()
    }
}

fn outcome_entry(report: &CaseReport) -> LogEntry {
    let (event, severity) = match &report.outcome {
        CaseOutcome::Passed => (EventType::CasePass, Severity::Info),
        CaseOutcome::Skipped { .. } => (EventType::CaseSkip, Severity::Info),
        CaseOutcome::Failed { .. } => (EventType::CaseFail, Severity::Critical),
    };
    let mut entry = LogEntry::new(event, severity).with_case(report.name.clone());
    entry.elapsed_ms = Some(report.elapsed_ms);
    entry.assertions = Some(report.assertions);
    match &report.outcome {
        CaseOutcome::Skipped { capability } => {
            entry.details = Some(format!("missing capability {capability}"));
        }
        CaseOutcome::Failed { code, message } => {
            entry.error_code = Some(code.clone());
            entry.error_message = Some(message.clone());
        }
        CaseOutcome::Passed => {}
    }
    entry
}

/// Run one case body to completion.
pub fn run_case<F>(name: &str, config: &HarnessConfig, log: &HarnessLog, body: F) -> CaseReport
where
    F: FnOnce(&mut CaseContext) -> Result<()>,
{
    let ctx = CaseContext::new(name, config, log.clone());
    run_case_with(ctx, body)
}

/// Run a body against a prepared context (custom capabilities, pre-registered teardown).
pub fn run_case_with<F>(mut ctx: CaseContext, body: F) -> CaseReport
where
    F: FnOnce(&mut CaseContext) -> Result<()>,
{
    let started = Instant::now();
    ctx.log
        .record(&LogEntry::new(EventType::CaseStart, Severity::Info).with_case(ctx.name.clone()));
    let result = panic::catch_unwind(AssertUnwindSafe(|| body(&mut ctx)));
    ctx.finish(result, started)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::capability::features;
    use crate::sync::shared::Flag;

    fn cfg() -> HarnessConfig {
        let mut cfg = HarnessConfig::default();
        cfg.capabilities.features = vec![features::WEBVIEW.to_string()];
        cfg
    }

    #[test]
    fn passing_case_counts_assertions() {
        let report = run_case("sum", &cfg(), &HarnessLog::disabled(), |ctx| {
            ctx.check_eq(&4, &(2 + 2))?;
            ctx.check(true, "always")?;
            ctx.check_ne(&"a", &"b")
        });
        assert_eq!(report.outcome, CaseOutcome::Passed);
        assert_eq!(report.assertions, 3);
    }

    #[test]
    fn missing_capability_skips_with_zero_assertions() {
        let ran_teardown = Flag::new();
        let t = ran_teardown.clone();
        let report = run_case("tv_perf", &cfg(), &HarnessLog::disabled(), |ctx| {
            ctx.defer("cleanup", move || {
                t.set();
                Ok(())
            });
            ctx.require(features::LIVE_TV)?;
            ctx.check(false, "unreachable")
        });
        assert_eq!(
            report.outcome,
            CaseOutcome::Skipped {
                capability: "live_tv".to_string()
            }
        );
        assert!(report.outcome.is_success());
        assert_eq!(report.assertions, 0);
        assert!(ran_teardown.is_set());
    }

    #[test]
    fn assertion_failure_is_reported_with_code() {
        let report = run_case("mismatch", &cfg(), &HarnessLog::disabled(), |ctx| {
            ctx.check_eq(&"Original title", &"Changed")
        });
        match report.outcome {
            CaseOutcome::Failed { code, message } => {
                assert_eq!(code, "PCH-4001");
                assert!(message.contains("Original title"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn panic_in_body_fails_and_still_tears_down() {
        let released = Flag::new();
        let r = released.clone();
        let report = run_case("boom", &cfg(), &HarnessLog::disabled(), |ctx| {
            ctx.defer("server", move || {
                r.set();
                Ok(())
            });
            panic!("unexpected null");
        });
        assert!(!report.outcome.is_success());
        assert!(released.is_set());
        match report.outcome {
            CaseOutcome::Failed { message, .. } => assert!(message.contains("unexpected null")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn teardown_failure_fails_passing_case() {
        let report = run_case("leaky", &cfg(), &HarnessLog::disabled(), |ctx| {
            ctx.defer("codec release", || Err(PchError::platform("release", "busy")));
            Ok(())
        });
        match report.outcome {
            CaseOutcome::Failed { code, message } => {
                assert_eq!(code, "PCH-4003");
                assert!(message.contains("codec release"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn check_close_uses_configured_epsilon() {
        let mut config = cfg();
        config.tolerance.float_epsilon = 0.01;
        let ctx = CaseContext::new("eps", &config, HarnessLog::disabled());
        assert!(ctx.check_close(1.0, 1.005).is_ok());
        assert!(ctx.check_close(1.0, 1.02).unwrap_err().is_assertion());
        assert!(ctx.check_close_within(1.0, 1.02, 0.05).is_ok());
        assert_eq!(ctx.assertions(), 3);
    }

    #[test]
    fn expect_err_passes_on_platform_failure() {
        let ctx = CaseContext::new("expect", &cfg(), HarnessLog::disabled());
        let failing: Result<u32> = Err(PchError::platform("setAudioSource", "illegal state"));
        let err = ctx.expect_err(failing, "start before prepare").unwrap();
        assert_eq!(err.code(), "PCH-4003");

        let ok: Result<u32> = Ok(3);
        assert!(ctx.expect_err(ok, "should fail").unwrap_err().is_assertion());
    }

    #[test]
    fn poller_and_latch_use_configured_budgets() {
        let mut config = cfg();
        config.timeouts.poll_timeout_ms = 40;
        config.timeouts.poll_interval_ms = 10;
        config.timeouts.latch_timeout_ms = 30;
        let ctx = CaseContext::new("budgets", &config, HarnessLog::disabled());

        let poll = ctx.poller("never");
        assert_eq!(poll.timeout(), Duration::from_millis(40));
        assert!(poll.wait_until(|| false).unwrap_err().is_timeout());

        let latch: Latch<u8> = ctx.latch("never");
        match latch.wait_default() {
            Err(PchError::Timeout { budget_ms, .. }) => assert_eq!(budget_ms, 30),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn timing_budget_includes_slack() {
        let ctx = CaseContext::new("timing", &cfg(), HarnessLog::disabled());
        assert!(
            ctx.check_within_budget(Duration::from_millis(140), Duration::from_millis(100))
                .is_ok()
        );
        assert!(
            ctx.check_within_budget(Duration::from_millis(400), Duration::from_millis(100))
                .is_err()
        );
    }

    #[test]
    fn outcome_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.jsonl");
        let log = HarnessLog::open(crate::logger::jsonl::JsonlConfig {
            path: path.clone(),
            fallback_path: None,
            max_size_bytes: 1024 * 1024,
            max_rotated_files: 1,
        });
        run_case("logged", &cfg(), &log, |ctx| ctx.require(features::CAMERA));

        let contents = std::fs::read_to_string(&path).unwrap();
        let events: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event"], "case_start");
        assert_eq!(events[1]["event"], "case_skip");
        assert_eq!(events[1]["assertions"], 0);
    }
}
