//! Results collectors: where finished reports go.
//!
//! Reports can be collected inline ([`MemoryCollector`], [`JsonlCollector`],
//! `SqliteCollector`) or handed to a background thread through
//! [`spawn_collector`]. The thread owns every sink; test threads only hold a
//! cheap [`CollectorHandle`] and block only when the bounded queue is full.

#![allow(missing_docs)]

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

use crate::core::config::ReportConfig;
use crate::core::errors::{PchError, Result};
use crate::logger::jsonl::{EventType, HarnessLog, LogEntry, Severity, open_append};
use crate::report::log::ReportLog;
use crate::runner::looper::panic_message;
use crate::sync::shared::Flag;

/// Consecutive failures after which a sink is disabled.
const MAX_SINK_FAILURES: u32 = 3;

/// Destination for submitted reports.
pub trait ResultsCollector: Send + Sync {
    fn collect(&self, report: &ReportLog) -> Result<()>;
}

// ──────────────────── memory ────────────────────

/// Keeps reports in memory. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryCollector {
    reports: Arc<Mutex<Vec<ReportLog>>>,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ReportLog> {
        self.reports.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }
}

impl ResultsCollector for MemoryCollector {
    fn collect(&self, report: &ReportLog) -> Result<()> {
        self.reports.lock().push(report.clone());
        Ok(())
    }
}

// ──────────────────── jsonl ────────────────────

/// Appends one JSON object per report.
pub struct JsonlCollector {
    path: PathBuf,
    out: Mutex<BufWriter<File>>,
}

impl JsonlCollector {
    pub fn open(path: &Path) -> Result<Self> {
        let (file, _) = open_append(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            out: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultsCollector for JsonlCollector {
    fn collect(&self, report: &ReportLog) -> Result<()> {
        let mut line = serde_json::to_string(report)?;
        line.push('\n');
        let mut out = self.out.lock();
        out.write_all(line.as_bytes())
            .and_then(|()| out.flush())
            .map_err(|source| PchError::io(&self.path, source))
    }
}

impl std::fmt::Debug for JsonlCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlCollector")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

// ──────────────────── background thread ────────────────────

enum CollectorMsg {
    Report(Box<ReportLog>),
    /// Sentinel to request graceful shutdown of the collector thread.
    Shutdown,
}

/// Delivery outcome shared between the collector thread and its handles.
#[derive(Default)]
struct DeliveryState {
    /// Failures not yet returned to a caller.
    failures: Mutex<Vec<String>>,
    /// Every configured sink has been disabled.
    closed: Flag,
}

/// Cloneable sender side of the collector thread.
///
/// Delivery happens asynchronously, so a sink failure is returned by the next
/// [`collect`](ResultsCollector::collect) or by [`finish`](CollectorHandle::finish),
/// whichever comes first. Each failure is returned exactly once.
#[derive(Clone)]
pub struct CollectorHandle {
    tx: Sender<CollectorMsg>,
    state: Arc<DeliveryState>,
}

impl CollectorHandle {
    /// Ask the collector thread to drain and exit. Reports already queued are
    /// still delivered.
    pub fn shutdown(&self) {
        let _ = self.tx.send(CollectorMsg::Shutdown);
    }

    /// Whether every configured sink has been disabled after repeated failures.
    pub fn is_closed(&self) -> bool {
        self.state.closed.is_set()
    }

    /// Shut down, wait for queued reports to be delivered, then return any
    /// delivery failure not yet reported.
    pub fn finish(&self, join: thread::JoinHandle<()>) -> Result<()> {
        self.shutdown();
        join.join().map_err(|payload| PchError::Runtime {
            details: format!(
                "collector thread panicked: {}",
                panic_message(payload.as_ref())
            ),
        })?;
        self.take_failures(None)
    }

    fn take_failures(&self, extra: Option<String>) -> Result<()> {
        let mut failures = std::mem::take(&mut *self.state.failures.lock());
        failures.extend(extra);
        if failures.is_empty() {
            return Ok(());
        }
        Err(PchError::Runtime {
            details: format!(
                "{} report delivery failure(s): {}",
                failures.len(),
                failures.join("; ")
            ),
        })
    }
}

impl ResultsCollector for CollectorHandle {
    fn collect(&self, report: &ReportLog) -> Result<()> {
        if self.state.closed.is_set() {
            return self.take_failures(Some(format!(
                "{}/{} not delivered: every report sink is disabled",
                report.source, report.stream
            )));
        }
        self.tx
            .send(CollectorMsg::Report(Box::new(report.clone())))
            .map_err(|_| PchError::ChannelClosed {
                component: "report collector",
            })?;
        self.take_failures(None)
    }
}

impl std::fmt::Debug for CollectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorHandle")
            .field("queued", &self.tx.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Build the configured sinks and run them on a background thread.
///
/// A sink that cannot be opened is reported on stderr and returned as a
/// delivery failure by the first `collect` or `finish`. With reporting
/// disabled the thread still runs and discards every report.
pub fn spawn_collector(
    config: &ReportConfig,
    log: HarnessLog,
) -> Result<(CollectorHandle, thread::JoinHandle<()>)> {
    let mut sinks: Vec<(String, Box<dyn ResultsCollector>)> = Vec::new();
    let mut open_failures = Vec::new();
    if config.enabled {
        match JsonlCollector::open(&config.jsonl_path) {
            Ok(sink) => sinks.push(("jsonl".to_string(), Box::new(sink))),
            Err(e) => {
                eprintln!("[PCH-REPORT] jsonl sink unavailable: {e}");
                open_failures.push(format!("jsonl sink unavailable: {e}"));
            }
        }
        #[cfg(feature = "sqlite")]
        if let Some(path) = &config.sqlite_path {
            match crate::report::sqlite::SqliteCollector::open(path) {
                Ok(sink) => sinks.push(("sqlite".to_string(), Box::new(sink))),
                Err(e) => {
                    eprintln!(
                        "[PCH-REPORT] failed to open SQLite at {}: {e}",
                        path.display()
                    );
                    open_failures.push(format!("sqlite sink unavailable: {e}"));
                }
            }
        }
    }
    let state = DeliveryState {
        failures: Mutex::new(open_failures),
        closed: Flag::new(),
    };
    spawn_with_state(sinks, config.channel_capacity, log, state)
}

/// Run explicit sinks on a background thread.
pub fn spawn_collector_with(
    sinks: Vec<(String, Box<dyn ResultsCollector>)>,
    capacity: usize,
    log: HarnessLog,
) -> Result<(CollectorHandle, thread::JoinHandle<()>)> {
    spawn_with_state(sinks, capacity, log, DeliveryState::default())
}

fn spawn_with_state(
    sinks: Vec<(String, Box<dyn ResultsCollector>)>,
    capacity: usize,
    log: HarnessLog,
    state: DeliveryState,
) -> Result<(CollectorHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<CollectorMsg>(capacity.max(1));
    let state = Arc::new(state);
    let worker_state = Arc::clone(&state);
    let join = thread::Builder::new()
        .name("pch-collector".to_string())
        .spawn(move || collector_thread_main(&rx, sinks, &worker_state, &log))
        .map_err(|e| PchError::Runtime {
            details: format!("failed to spawn collector thread: {e}"),
        })?;
    Ok((CollectorHandle { tx, state }, join))
}

struct Sink {
    name: String,
    inner: Box<dyn ResultsCollector>,
    failures: u32,
}

fn collector_thread_main(
    rx: &Receiver<CollectorMsg>,
    sinks: Vec<(String, Box<dyn ResultsCollector>)>,
    state: &DeliveryState,
    log: &HarnessLog,
) {
    let configured = !sinks.is_empty();
    let mut sinks: Vec<Sink> = sinks
        .into_iter()
        .map(|(name, inner)| Sink {
            name,
            inner,
            failures: 0,
        })
        .collect();

    while let Ok(msg) = rx.recv() {
        let report = match msg {
            CollectorMsg::Report(report) => report,
            CollectorMsg::Shutdown => break,
        };
        let target = format!("{}/{}", report.source, report.stream);

        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        if configured && sinks.is_empty() {
            failed.push(format!("{target} not delivered: every report sink is disabled"));
        }
        for sink in &mut sinks {
            match sink.inner.collect(&report) {
                Ok(()) => {
                    sink.failures = 0;
                    delivered.push(sink.name.clone());
                }
                Err(e) => {
                    sink.failures += 1;
                    eprintln!("[PCH-REPORT] {} sink failed: {e}", sink.name);
                    failed.push(format!("{} sink failed for {target}: {e}", sink.name));
                }
            }
        }
        sinks.retain(|sink| {
            let keep = sink.failures < MAX_SINK_FAILURES;
            if !keep {
                eprintln!(
                    "[PCH-REPORT] {} sink failed {} times, disabling",
                    sink.name, sink.failures
                );
            }
            keep
        });
        if configured && sinks.is_empty() {
            state.closed.set();
        }
        if !failed.is_empty() {
            state.failures.lock().extend(failed.iter().cloned());
        }

        let lost = configured && delivered.is_empty();
        let mut entry = if lost {
            LogEntry::new(EventType::ReportFailed, Severity::Critical)
        } else if failed.is_empty() {
            LogEntry::new(EventType::ReportSubmitted, Severity::Info)
        } else {
            LogEntry::new(EventType::ReportSubmitted, Severity::Warning)
        };
        entry.metric = Some(
            report
                .metrics
                .iter()
                .map(|m| m.label.as_str())
                .collect::<Vec<_>>()
                .join(","),
        );
        entry.details = Some(format!(
            "source={} stream={} sinks={}",
            report.source,
            report.stream,
            delivered.join(",")
        ));
        if !failed.is_empty() {
            entry.error_message = Some(failed.join("; "));
        }
        log.record(&entry);
    }
}
