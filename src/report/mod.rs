//! Performance reporting: time repeated trials, summarize them, and emit a
//! labelled report to one or more results collectors.

pub mod collector;
pub mod log;
pub mod measure;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod stat;
