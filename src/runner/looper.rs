//! Affinity thread: a single named execution context that platform APIs with
//! thread-affinity requirements must be called from.
//!
//! Work arrives over an unbounded crossbeam channel and runs in FIFO order.
//! The context counts outstanding jobs; "idle" means the count is zero, which
//! covers jobs that a running job posts back onto the same context.
//!
//! A panic inside a job never kills the context. For [`AffinityThread::run_sync`]
//! the payload is carried back and re-raised on the caller once the context is
//! idle. For fire-and-forget [`LooperHandle::post`] jobs the panic message is
//! recorded and surfaced by the next `run_sync` or `wait_for_idle`.

#![allow(missing_docs)]

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use parking_lot::{Condvar, Mutex};

use crate::core::config::TimeoutConfig;
use crate::core::errors::{PchError, Result};
use crate::logger::jsonl::{EventType, HarnessLog, LogEntry, Severity};
use crate::sync::latch::millis;
use crate::sync::shared::Flag;

type Job = Box<dyn FnOnce() + Send + 'static>;

const DRAIN_SLICE: Duration = Duration::from_millis(10);

enum Message {
    Run(Job),
    Shutdown,
}

struct LooperState {
    pending: Mutex<u64>,
    idle: Condvar,
    failures: Mutex<Vec<String>>,
    /// Set by `shutdown`; only the context itself may post afterwards.
    closing: Flag,
}

/// Clonable handle used to post work onto the context, including from
/// platform callbacks running elsewhere.
#[derive(Clone)]
pub struct LooperHandle {
    tx: Sender<Message>,
    state: Arc<LooperState>,
    thread_id: ThreadId,
    name: Arc<str>,
}

impl LooperHandle {
    /// Enqueue a job. Never blocks.
    ///
    /// Once shutdown has started, only jobs posted from the context itself
    /// are accepted; they run before the thread exits.
    pub fn post<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        // Counted before the closing check so the drain loop sees it.
        *self.state.pending.lock() += 1;
        let refused = self.state.closing.is_set() && !self.is_current();
        if refused || self.tx.send(Message::Run(Box::new(job))).is_err() {
            self.finish_one();
            return Err(PchError::ChannelClosed {
                component: "affinity-thread",
            });
        }
        Ok(())
    }

    /// Whether the calling thread is this context.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Jobs posted but not yet finished.
    pub fn pending(&self) -> u64 {
        *self.state.pending.lock()
    }

    /// Block until no posted job remains, then surface recorded panics.
    pub fn wait_for_idle(&self, timeout: Duration) -> Result<()> {
        self.wait_idle(timeout)?;
        self.take_failures()
    }

    fn wait_idle(&self, timeout: Duration) -> Result<()> {
        if self.is_current() {
            return Err(PchError::Runtime {
                details: format!(
                    "wait_for_idle called from affinity thread '{}' would deadlock",
                    self.name
                ),
            });
        }
        let start = Instant::now();
        let deadline = start + timeout;
        let mut pending = self.state.pending.lock();
        while *pending > 0 {
            if self.state.idle.wait_until(&mut pending, deadline).timed_out() && *pending > 0 {
                return Err(PchError::Timeout {
                    condition: format!(
                        "affinity thread '{}' to become idle ({} jobs pending)",
                        self.name, *pending
                    ),
                    waited_ms: millis(start.elapsed()),
                    budget_ms: millis(timeout),
                });
            }
        }
        Ok(())
    }

    fn take_failures(&self) -> Result<()> {
        let failures = std::mem::take(&mut *self.state.failures.lock());
        if failures.is_empty() {
            return Ok(());
        }
        Err(PchError::Runtime {
            details: format!(
                "{} posted job(s) panicked on '{}': {}",
                failures.len(),
                self.name,
                failures.join("; ")
            ),
        })
    }

    fn finish_one(&self) {
        let mut pending = self.state.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.state.idle.notify_all();
        }
    }
}

impl std::fmt::Debug for LooperHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LooperHandle")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .finish()
    }
}

/// Owned affinity thread. Dropping it drains queued work and joins the thread.
pub struct AffinityThread {
    handle: LooperHandle,
    join: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl AffinityThread {
    /// Spawn a context with the default action budget.
    pub fn spawn(name: &str) -> Result<Self> {
        Self::spawn_with(name, &TimeoutConfig::default(), HarnessLog::disabled())
    }

    /// Spawn a context whose `run_sync` budget comes from `[timeouts]`.
    pub fn spawn_with(name: &str, timeouts: &TimeoutConfig, log: HarnessLog) -> Result<Self> {
        let (tx, rx) = unbounded::<Message>();
        let state = Arc::new(LooperState {
            pending: Mutex::new(0),
            idle: Condvar::new(),
            failures: Mutex::new(Vec::new()),
            closing: Flag::new(),
        });
        let name: Arc<str> = Arc::from(name);

        let worker_state = Arc::clone(&state);
        let worker_name = Arc::clone(&name);
        let drain_budget = timeouts.action_timeout();
        let join = thread::Builder::new()
            .name(format!("pch-looper-{name}"))
            .spawn(move || looper_main(&rx, &worker_state, &worker_name, drain_budget, &log))
            .map_err(|e| PchError::Runtime {
                details: format!("failed to spawn affinity thread '{name}': {e}"),
            })?;

        let handle = LooperHandle {
            tx,
            state,
            thread_id: join.thread().id(),
            name,
        };
        Ok(Self {
            handle,
            join: Some(join),
            timeout: timeouts.action_timeout(),
        })
    }

    pub fn handle(&self) -> LooperHandle {
        self.handle.clone()
    }

    pub fn is_current(&self) -> bool {
        self.handle.is_current()
    }

    pub fn post<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.post(job)
    }

    pub fn wait_for_idle(&self) -> Result<()> {
        self.handle.wait_for_idle(self.timeout)
    }

    /// Run `job` on the context with the configured budget.
    pub fn run_sync<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.run_sync_within(self.timeout, job)
    }

    /// Run `job` on the context and block until it, and anything it posted,
    /// has finished.
    ///
    /// A job returning `Result` hands its error back unchanged inside `T`. A
    /// panicking job is re-raised here with its original payload. Called from
    /// the context itself, the job runs inline.
    pub fn run_sync_within<T, F>(&self, timeout: Duration, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.handle.is_current() {
            return Ok(job());
        }

        let (done_tx, done_rx) = bounded::<thread::Result<T>>(1);
        self.handle.post(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(job));
            let _ = done_tx.send(outcome);
        })?;

        self.handle.wait_idle(timeout)?;

        let outcome = done_rx.try_recv().map_err(|_| PchError::ChannelClosed {
            component: "affinity-thread",
        })?;
        match outcome {
            Ok(value) => {
                self.handle.take_failures()?;
                Ok(value)
            }
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Stop accepting work, drain the queue and join the thread.
    ///
    /// Jobs already queued, and follow-ups they post, still run. Posts from
    /// other threads fail with `ChannelClosed` from here on.
    pub fn shutdown(&mut self) {
        self.handle.state.closing.set();
        let _ = self.handle.tx.send(Message::Shutdown);
        if self.handle.is_current() {
            // Cannot join ourselves; the loop exits after this job.
            return;
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for AffinityThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AffinityThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AffinityThread")
            .field("handle", &self.handle)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn looper_main(
    rx: &Receiver<Message>,
    state: &LooperState,
    name: &str,
    drain_budget: Duration,
    log: &HarnessLog,
) {
    while let Ok(message) = rx.recv() {
        match message {
            Message::Run(job) => run_job(job, state, name, log),
            Message::Shutdown => break,
        }
    }

    // Follow-ups posted by draining jobs land behind the sentinel.
    let deadline = Instant::now() + drain_budget;
    while *state.pending.lock() > 0 {
        // A refused post counts itself briefly; re-check instead of blocking.
        match rx.recv_timeout(DRAIN_SLICE) {
            Ok(Message::Run(job)) => run_job(job, state, name, log),
            Ok(Message::Shutdown) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if Instant::now() >= deadline {
            discard_pending(state, name, log);
            break;
        }
    }
}

fn run_job(job: Job, state: &LooperState, name: &str, log: &HarnessLog) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        let message = panic_message(payload.as_ref());
        let mut entry = LogEntry::new(EventType::ActionFailed, Severity::Warning);
        entry.details = Some(format!("looper={name} panic={message}"));
        log.record(&entry);
        state.failures.lock().push(message);
    }
    let mut pending = state.pending.lock();
    *pending = pending.saturating_sub(1);
    if *pending == 0 {
        state.idle.notify_all();
    }
}

/// Drain budget exhausted: record the dropped jobs so the next wait reports them.
fn discard_pending(state: &LooperState, name: &str, log: &HarnessLog) {
    let mut pending = state.pending.lock();
    let dropped = *pending;
    if dropped == 0 {
        return;
    }
    *pending = 0;
    state.idle.notify_all();
    drop(pending);

    let message = format!("{dropped} job(s) discarded when '{name}' shut down");
    let mut entry = LogEntry::new(EventType::ActionFailed, Severity::Warning);
    entry.details = Some(format!("looper={name} {message}"));
    log.record(&entry);
    state.failures.lock().push(message);
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::poller::PollingCheck;
    use crate::sync::shared::{Counter, SharedCell};

    #[test]
    fn run_sync_executes_on_affinity_thread() {
        let looper = AffinityThread::spawn("ui").unwrap();
        let handle = looper.handle();
        let on_context = looper.run_sync(move || handle.is_current()).unwrap();
        assert!(on_context);
        assert!(!looper.is_current());
    }

    #[test]
    fn run_sync_returns_value() {
        let looper = AffinityThread::spawn("ui").unwrap();
        let name = looper
            .run_sync(|| thread::current().name().map(ToString::to_string))
            .unwrap();
        assert_eq!(name.as_deref(), Some("pch-looper-ui"));
    }

    #[test]
    fn run_sync_waits_for_nested_posts() {
        let looper = AffinityThread::spawn("ui").unwrap();
        let handle = looper.handle();
        let counter = Counter::new();
        let c = counter.clone();
        looper
            .run_sync(move || {
                for _ in 0..5 {
                    let c = c.clone();
                    let inner = handle.clone();
                    handle
                        .post(move || {
                            thread::sleep(Duration::from_millis(5));
                            c.increment();
                            let c2 = c.clone();
                            inner.post(move || {
                                c2.increment();
                            })
                            .unwrap();
                        })
                        .unwrap();
                }
            })
            .unwrap();
        // All ten increments (five posted, five posted by those) are done.
        assert_eq!(counter.get(), 10);
        assert_eq!(looper.handle().pending(), 0);
    }

    #[test]
    fn panic_in_run_sync_is_reraised_with_payload() {
        let looper = AffinityThread::spawn("ui").unwrap();
        let caught = panic::catch_unwind(AssertUnwindSafe(|| {
            looper.run_sync(|| -> u32 { panic!("arithmetic overflow in layout") })
        }))
        .unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "arithmetic overflow in layout");

        // The context survives and keeps serving work.
        assert_eq!(looper.run_sync(|| 7).unwrap(), 7);
    }

    #[test]
    fn job_error_is_returned_unchanged() {
        let looper = AffinityThread::spawn("ui").unwrap();
        let result: Result<Result<u32>> =
            looper.run_sync(|| Err(PchError::platform("loadUrl", "renderer crashed")));
        let inner = result.unwrap().unwrap_err();
        assert_eq!(inner.code(), "PCH-4003");
        assert!(inner.to_string().contains("renderer crashed"));
    }

    #[test]
    fn posted_panic_surfaces_on_next_wait() {
        let looper = AffinityThread::spawn("ui").unwrap();
        looper.post(|| panic!("callback exploded")).unwrap();
        let err = looper.wait_for_idle().unwrap_err();
        assert_eq!(err.code(), "PCH-3900");
        assert!(err.to_string().contains("callback exploded"));
        // Reported once.
        assert!(looper.wait_for_idle().is_ok());
    }

    #[test]
    fn run_sync_from_context_runs_inline() {
        let looper = Arc::new(AffinityThread::spawn("ui").unwrap());
        let inner = Arc::clone(&looper);
        let seen = SharedCell::new(None::<u32>);
        let s = seen.clone();
        let (tx, rx) = bounded(1);
        looper
            .post(move || {
                // Queuing instead of running inline would deadlock here.
                let value = inner.run_sync(|| 5).ok();
                drop(inner);
                s.set(value);
                let _ = tx.send(());
            })
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(seen.get(), Some(5));
    }

    #[test]
    fn wait_for_idle_times_out_on_stuck_job() {
        let looper = AffinityThread::spawn("ui").unwrap();
        let (release_tx, release_rx) = bounded::<()>(1);
        looper
            .post(move || {
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
            })
            .unwrap();
        let err = looper
            .handle()
            .wait_for_idle(Duration::from_millis(50))
            .unwrap_err();
        assert!(err.is_timeout());
        release_tx.send(()).unwrap();
        assert!(looper.wait_for_idle().is_ok());
    }

    #[test]
    fn post_after_shutdown_reports_channel_closed() {
        let mut looper = AffinityThread::spawn("ui").unwrap();
        let handle = looper.handle();
        looper.shutdown();
        let err = handle.post(|| {}).unwrap_err();
        assert_eq!(err.code(), "PCH-3003");
        assert_eq!(handle.pending(), 0);
    }

    #[test]
    fn shutdown_runs_follow_ups_posted_while_draining() {
        let mut looper = AffinityThread::spawn("ui").unwrap();
        let handle = looper.handle();
        let follow_up_ran = Flag::new();
        let (inner, flag) = (handle.clone(), follow_up_ran.clone());
        handle
            .post(move || {
                thread::sleep(Duration::from_millis(50));
                inner.post(move || flag.set()).unwrap();
            })
            .unwrap();
        looper.shutdown();
        assert!(follow_up_ran.is_set());
        assert_eq!(handle.pending(), 0);
    }

    #[test]
    fn foreign_post_during_shutdown_is_refused() {
        let mut looper = AffinityThread::spawn("ui").unwrap();
        let handle = looper.handle();
        let (started_tx, started_rx) = bounded::<()>(1);
        let (release_tx, release_rx) = bounded::<()>(1);
        handle
            .post(move || {
                let _ = started_tx.send(());
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
            })
            .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let outsider = handle.clone();
        let refused = thread::spawn(move || {
            PollingCheck::new(Duration::from_secs(5), Duration::from_millis(5))
                .wait_until(|| outsider.state.closing.is_set())
                .unwrap();
            let err = outsider.post(|| {}).unwrap_err();
            let _ = release_tx.send(());
            err
        });
        looper.shutdown();
        assert_eq!(refused.join().unwrap().code(), "PCH-3003");
        assert_eq!(handle.pending(), 0);
    }
}
