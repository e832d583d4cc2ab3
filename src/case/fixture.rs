//! Scoped resource acquisition with guaranteed release.
//!
//! Test servers, platform handles and temporary files are acquired per case
//! and released on every exit path, failures and panics included.

#![allow(missing_docs)]

use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};

use crate::core::errors::{PchError, Result};
use crate::runner::looper::panic_message;

type ReleaseFn<T> = Box<dyn FnOnce(T) + Send>;

/// Owns a resource and runs its release closure on drop.
pub struct Scoped<T> {
    resource: Option<T>,
    release: Option<ReleaseFn<T>>,
}

impl<T> Scoped<T> {
    pub fn new(resource: T, release: impl FnOnce(T) + Send + 'static) -> Self {
        Self {
            resource: Some(resource),
            release: Some(Box::new(release)),
        }
    }

    /// Release now instead of at end of scope.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let (Some(resource), Some(release)) = (self.resource.take(), self.release.take()) {
            release(resource);
        }
    }
}

impl<T> Deref for Scoped<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.resource
            .as_ref()
            .expect("scoped resource accessed after release")
    }
}

impl<T> DerefMut for Scoped<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.resource
            .as_mut()
            .expect("scoped resource accessed after release")
    }
}

impl<T> Drop for Scoped<T> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Scoped<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scoped")
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

type TeardownFn = Box<dyn FnOnce() -> Result<()> + Send>;

/// Named teardown actions, run last-registered-first.
#[derive(Default)]
pub struct TeardownStack {
    tasks: Vec<(String, TeardownFn)>,
}

impl TeardownStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, task: impl FnOnce() -> Result<()> + Send + 'static) {
        self.tasks.push((name.into(), Box::new(task)));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run every task even if earlier ones fail or panic.
    ///
    /// Returns the failures as `(task name, error)` in execution order.
    pub fn run_all(&mut self) -> Vec<(String, PchError)> {
        let mut failures = Vec::new();
        while let Some((name, task)) = self.tasks.pop() {
            match panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => failures.push((name, err)),
                Err(payload) => failures.push((
                    name,
                    PchError::Runtime {
                        details: format!("teardown panicked: {}", panic_message(payload.as_ref())),
                    },
                )),
            }
        }
        failures
    }
}

impl Drop for TeardownStack {
    fn drop(&mut self) {
        for (name, err) in self.run_all() {
            eprintln!("[PCH-TEARDOWN] {name} failed during drop: {err}");
        }
    }
}

impl std::fmt::Debug for TeardownStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.tasks.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("TeardownStack").field("tasks", &names).finish()
    }
}
