//! Convenience re-exports for suite authors.
//!
//! ```rust,no_run
//! use platform_conformance::prelude::*;
//! ```

// Core
pub use crate::core::config::HarnessConfig;
pub use crate::core::errors::{PchError, Result};

// Logging
pub use crate::logger::jsonl::HarnessLog;

// Synchronization
pub use crate::sync::latch::{CountDownLatch, Latch, UpdateMonitor};
pub use crate::sync::poller::{PollingCheck, poll_until};
pub use crate::sync::shared::{Counter, Flag, SharedCell};

// Action runner
pub use crate::runner::looper::{AffinityThread, LooperHandle};

// Callbacks
pub use crate::callbacks::{CallbackRecorder, Client, EventKind, Handlers, PlatformEvent, SslDecision};

// Test cases
pub use crate::case::capability::{Capabilities, DeclaredCapabilities, features};
pub use crate::case::fixture::Scoped;
pub use crate::case::{CaseContext, CaseOutcome, CaseReport, run_case};

// Reporting
pub use crate::report::collector::{
    CollectorHandle, JsonlCollector, MemoryCollector, ResultsCollector, spawn_collector,
};
pub use crate::report::log::{ReportLog, ResultType, ResultUnit};
pub use crate::report::measure::{SampleSet, Samples, Stopwatch, measure};
pub use crate::report::stat::{Summary, average};
