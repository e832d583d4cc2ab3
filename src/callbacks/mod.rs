//! Platform callback composition.
//!
//! A scenario overrides one or two callbacks and inherits the rest. Instead of
//! a subclass per test, a [`Client`] pairs a [`Handlers`] struct of optional
//! closures with a shared [`CallbackRecorder`] that implements the default
//! policy: record the event, count it, wake anyone waiting for its kind.
//!
//! `dispatch` may be called from any platform thread.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::sync::latch::UpdateMonitor;

/// Events a platform delivers asynchronously to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlatformEvent {
    PageStarted { url: String },
    PageFinished { url: String },
    ReceivedError { code: i32, description: String },
    ScaleChanged { old: f32, new: f32 },
    SslChallenge { host: String },
    ProgressChanged { percent: u8 },
    CodecReclaimed { codec: String },
    BufferAvailable { index: u32 },
    ResultValue { value: String },
}

/// Discriminant of [`PlatformEvent`], used for counting and waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PageStarted,
    PageFinished,
    ReceivedError,
    ScaleChanged,
    SslChallenge,
    ProgressChanged,
    CodecReclaimed,
    BufferAvailable,
    ResultValue,
}

impl PlatformEvent {
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::PageStarted { .. } => EventKind::PageStarted,
            Self::PageFinished { .. } => EventKind::PageFinished,
            Self::ReceivedError { .. } => EventKind::ReceivedError,
            Self::ScaleChanged { .. } => EventKind::ScaleChanged,
            Self::SslChallenge { .. } => EventKind::SslChallenge,
            Self::ProgressChanged { .. } => EventKind::ProgressChanged,
            Self::CodecReclaimed { .. } => EventKind::CodecReclaimed,
            Self::BufferAvailable { .. } => EventKind::BufferAvailable,
            Self::ResultValue { .. } => EventKind::ResultValue,
        }
    }
}

/// Answer to a TLS certificate challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SslDecision {
    Proceed,
    #[default]
    Cancel,
}

type UrlHandler = Box<dyn Fn(&str) + Send + Sync>;
type ErrorHandler = Box<dyn Fn(i32, &str) + Send + Sync>;
type ScaleHandler = Box<dyn Fn(f32, f32) + Send + Sync>;
type SslHandler = Box<dyn Fn(&str) -> SslDecision + Send + Sync>;
type ProgressHandler = Box<dyn Fn(u8) + Send + Sync>;
type CodecHandler = Box<dyn Fn(&str) + Send + Sync>;
type EventHandler = Box<dyn Fn(&PlatformEvent) + Send + Sync>;

/// Per-scenario overrides. Unset handlers fall back to the default policy.
#[derive(Default)]
pub struct Handlers {
    on_page_started: Option<UrlHandler>,
    on_page_finished: Option<UrlHandler>,
    on_error: Option<ErrorHandler>,
    on_scale_changed: Option<ScaleHandler>,
    on_ssl_challenge: Option<SslHandler>,
    on_progress: Option<ProgressHandler>,
    on_codec_reclaimed: Option<CodecHandler>,
    on_any: Option<EventHandler>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_page_started(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_page_started = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_page_finished(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_page_finished = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_error(mut self, f: impl Fn(i32, &str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_scale_changed(mut self, f: impl Fn(f32, f32) + Send + Sync + 'static) -> Self {
        self.on_scale_changed = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_ssl_challenge(
        mut self,
        f: impl Fn(&str) -> SslDecision + Send + Sync + 'static,
    ) -> Self {
        self.on_ssl_challenge = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_progress(mut self, f: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_codec_reclaimed(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_codec_reclaimed = Some(Box::new(f));
        self
    }

    /// Called for every event, after the specific handler.
    #[must_use]
    pub fn on_any(mut self, f: impl Fn(&PlatformEvent) + Send + Sync + 'static) -> Self {
        self.on_any = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("on_page_started", &self.on_page_started.is_some())
            .field("on_page_finished", &self.on_page_finished.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_scale_changed", &self.on_scale_changed.is_some())
            .field("on_ssl_challenge", &self.on_ssl_challenge.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .field("on_codec_reclaimed", &self.on_codec_reclaimed.is_some())
            .field("on_any", &self.on_any.is_some())
            .finish()
    }
}

#[derive(Default)]
struct RecorderState {
    events: Vec<PlatformEvent>,
    counts: HashMap<EventKind, u64>,
    monitors: HashMap<EventKind, UpdateMonitor>,
}

/// Default callback policy shared by every client.
#[derive(Clone, Default)]
pub struct CallbackRecorder {
    state: Arc<Mutex<RecorderState>>,
}

impl CallbackRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event and wake waiters for its kind.
    pub fn record(&self, event: &PlatformEvent) {
        let monitor = {
            let mut state = self.state.lock();
            let kind = event.kind();
            state.events.push(event.clone());
            *state.counts.entry(kind).or_insert(0) += 1;
            state.monitors.entry(kind).or_default().clone()
        };
        monitor.notify();
    }

    pub fn count(&self, kind: EventKind) -> u64 {
        self.state.lock().counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn events(&self) -> Vec<PlatformEvent> {
        self.state.lock().events.clone()
    }

    pub fn last(&self, kind: EventKind) -> Option<PlatformEvent> {
        self.state
            .lock()
            .events
            .iter()
            .rev()
            .find(|e| e.kind() == kind)
            .cloned()
    }

    /// Wait until an event of `kind` has been recorded since the last
    /// successful wait for that kind.
    ///
    /// Returns `false` if none arrived within `timeout`. Events recorded
    /// before the wait started count as pending. Several events between two
    /// waits satisfy one wait only; use [`count`](Self::count) to tell them apart.
    pub fn wait_for(&self, kind: EventKind, timeout: Duration) -> bool {
        let monitor = self.state.lock().monitors.entry(kind).or_default().clone();
        monitor.wait_for_update(timeout)
    }

    pub fn page_loaded(&self) -> bool {
        self.count(EventKind::PageFinished) > 0
    }

    /// `(old, new)` of the most recent scale change.
    pub fn last_scale(&self) -> Option<(f32, f32)> {
        match self.last(EventKind::ScaleChanged) {
            Some(PlatformEvent::ScaleChanged { old, new }) => Some((old, new)),
            _ => None,
        }
    }

    /// Forget everything recorded so far, including pending notifications.
    ///
    /// Monitors are cleared in place, so a thread already blocked in
    /// [`wait_for`](Self::wait_for) still wakes on the next event.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.events.clear();
        state.counts.clear();
        for monitor in state.monitors.values() {
            monitor.clear();
        }
    }
}

impl std::fmt::Debug for CallbackRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CallbackRecorder")
            .field("events", &state.events.len())
            .finish()
    }
}

/// Handlers plus the default policy; the object handed to the platform.
#[derive(Debug, Clone)]
pub struct Client {
    handlers: Arc<Handlers>,
    recorder: CallbackRecorder,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(Handlers::default())
    }
}

impl Client {
    pub fn new(handlers: Handlers) -> Self {
        Self {
            handlers: Arc::new(handlers),
            recorder: CallbackRecorder::new(),
        }
    }

    pub fn recorder(&self) -> &CallbackRecorder {
        &self.recorder
    }

    /// Deliver an event. Returns the SSL decision for challenges, `None` otherwise.
    pub fn dispatch(&self, event: &PlatformEvent) -> Option<SslDecision> {
        let h = &self.handlers;
        let mut decision = None;
        match event {
            PlatformEvent::PageStarted { url } => {
                if let Some(f) = &h.on_page_started {
                    f(url);
                }
            }
            PlatformEvent::PageFinished { url } => {
                if let Some(f) = &h.on_page_finished {
                    f(url);
                }
            }
            PlatformEvent::ReceivedError { code, description } => {
                if let Some(f) = &h.on_error {
                    f(*code, description);
                }
            }
            PlatformEvent::ScaleChanged { old, new } => {
                if let Some(f) = &h.on_scale_changed {
                    f(*old, *new);
                }
            }
            PlatformEvent::SslChallenge { host } => {
                decision = Some(h.on_ssl_challenge.as_ref().map_or(SslDecision::Cancel, |f| f(host)));
            }
            PlatformEvent::ProgressChanged { percent } => {
                if let Some(f) = &h.on_progress {
                    f(*percent);
                }
            }
            PlatformEvent::CodecReclaimed { codec } => {
                if let Some(f) = &h.on_codec_reclaimed {
                    f(codec);
                }
            }
            PlatformEvent::BufferAvailable { .. } | PlatformEvent::ResultValue { .. } => {}
        }
        if let Some(f) = &h.on_any {
            f(event);
        }
        self.recorder.record(event);
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::shared::{Counter, Flag, SharedCell};
    use std::thread;

    #[test]
    fn default_policy_records_and_counts() {
        let client = Client::default();
        client.dispatch(&PlatformEvent::PageStarted { url: "a".into() });
        client.dispatch(&PlatformEvent::PageFinished { url: "a".into() });
        client.dispatch(&PlatformEvent::PageFinished { url: "b".into() });

        let rec = client.recorder();
        assert!(rec.page_loaded());
        assert_eq!(rec.count(EventKind::PageFinished), 2);
        assert_eq!(rec.count(EventKind::ReceivedError), 0);
        assert_eq!(
            rec.last(EventKind::PageFinished),
            Some(PlatformEvent::PageFinished { url: "b".into() })
        );
        assert_eq!(rec.events().len(), 3);
    }

    #[test]
    fn override_runs_alongside_default_policy() {
        let errors = SharedCell::new(Vec::<i32>::new());
        let sink = errors.clone();
        let client = Client::new(Handlers::new().on_error(move |code, _| {
            sink.update(|v| v.push(code));
        }));

        client.dispatch(&PlatformEvent::ReceivedError {
            code: -2,
            description: "host lookup".into(),
        });
        assert_eq!(errors.get(), vec![-2]);
        assert_eq!(client.recorder().count(EventKind::ReceivedError), 1);
    }

    #[test]
    fn ssl_challenge_defaults_to_cancel() {
        let client = Client::default();
        let decision = client.dispatch(&PlatformEvent::SslChallenge {
            host: "localhost".into(),
        });
        assert_eq!(decision, Some(SslDecision::Cancel));

        let trusting = Client::new(Handlers::new().on_ssl_challenge(|_| SslDecision::Proceed));
        let decision = trusting.dispatch(&PlatformEvent::SslChallenge {
            host: "localhost".into(),
        });
        assert_eq!(decision, Some(SslDecision::Proceed));
        assert_eq!(
            trusting.dispatch(&PlatformEvent::ProgressChanged { percent: 100 }),
            None
        );
    }

    #[test]
    fn wait_for_scale_change_from_another_thread() {
        let client = Client::default();
        let platform = client.clone();
        let h = thread::spawn(move || {
            thread::sleep(Duration::from_millis(40));
            platform.dispatch(&PlatformEvent::ScaleChanged { old: 1.0, new: 1.25 });
        });

        assert!(client.recorder().wait_for(EventKind::ScaleChanged, Duration::from_secs(5)));
        h.join().unwrap();
        assert_eq!(client.recorder().last_scale(), Some((1.0, 1.25)));
        // Consumed; no second change pending.
        assert!(!client.recorder().wait_for(EventKind::ScaleChanged, Duration::from_millis(20)));
    }

    #[test]
    fn on_any_sees_every_event() {
        let seen = Counter::new();
        let s = seen.clone();
        let client = Client::new(Handlers::new().on_any(move |_| {
            s.increment();
        }));
        client.dispatch(&PlatformEvent::BufferAvailable { index: 0 });
        client.dispatch(&PlatformEvent::CodecReclaimed { codec: "avc".into() });
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn reset_forgets_history() {
        let client = Client::default();
        client.dispatch(&PlatformEvent::PageFinished { url: "a".into() });
        client.recorder().reset();
        assert!(!client.recorder().page_loaded());
        assert!(!client.recorder().wait_for(EventKind::PageFinished, Duration::from_millis(10)));
    }

    #[test]
    fn waiter_blocked_across_reset_still_wakes() {
        let client = Client::default();
        let recorder = client.recorder().clone();
        let waiting = Flag::new();
        let w = waiting.clone();
        let waiter = thread::spawn(move || {
            w.set();
            recorder.wait_for(EventKind::PageFinished, Duration::from_secs(5))
        });
        while !waiting.is_set() {
            thread::sleep(Duration::from_millis(1));
        }
        thread::sleep(Duration::from_millis(20));

        client.recorder().reset();
        client.dispatch(&PlatformEvent::PageFinished { url: "b".into() });
        assert!(waiter.join().unwrap());
        assert_eq!(client.recorder().count(EventKind::PageFinished), 1);
    }

    #[test]
    fn events_serialize_with_kind_tag() {
        let json = serde_json::to_string(&PlatformEvent::ProgressChanged { percent: 42 }).unwrap();
        assert_eq!(json, r#"{"kind":"progress_changed","percent":42}"#);
    }
}
