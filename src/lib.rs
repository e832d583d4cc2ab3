#![forbid(unsafe_code)]

//! Platform Conformance Harness (pch): synchronization and measurement
//! utilities for conformance suites that drive an asynchronous,
//! callback-driven platform from synchronous test code.
//!
//! Four building blocks:
//! 1. **Condition poller**: re-evaluate a predicate until it holds or a budget runs out
//! 2. **Latched result holder**: a single-assignment slot a callback fills
//! 3. **Action runner**: run work on a dedicated affinity thread and wait for it
//! 4. **Report aggregator**: time repeated trials and emit labelled metrics
//!
//! # Library usage
//!
//! ```rust,no_run
//! use platform_conformance::prelude::*;
//!
//! let config = HarnessConfig::load(None)?;
//! let log = HarnessLog::from_config(&config.logging);
//! let report = run_case("page_title", &config, &log, |ctx| {
//!     ctx.require(features::WEBVIEW)?;
//!     let title = SharedCell::new(String::new());
//!     ctx.poller("title set").wait_until(|| !title.get().is_empty())?;
//!     ctx.check_eq(&"Hello".to_string(), &title.get())
//! });
//! println!("{report:?}");
//! # Ok::<(), PchError>(())
//! ```

pub mod prelude;

pub mod callbacks;
pub mod case;
pub mod core;
pub mod logger;
pub mod report;
pub mod runner;
pub mod sync;
