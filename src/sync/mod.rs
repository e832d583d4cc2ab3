//! Synchronization between platform callback threads and the test thread.
//!
//! Shared cells carry state written by callbacks, latches give blocking
//! single-shot completion, and the poller covers state that has no
//! notification hook at all.

pub mod latch;
pub mod poller;
pub mod shared;
