//! Trial timing.
//!
//! Trials run sequentially on the calling thread. A failing trial aborts the
//! whole measurement with its error; nothing is retried or dropped.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::errors::Result;
use crate::report::stat::{self, Summary};

fn to_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Run `trial(i)` for `i in 0..count`, returning each duration in milliseconds.
pub fn measure<F>(count: usize, mut trial: F) -> Result<Vec<f64>>
where
    F: FnMut(usize) -> Result<()>,
{
    let mut samples = Vec::with_capacity(count);
    for i in 0..count {
        let start = Instant::now();
        trial(i)?;
        samples.push(to_ms(start.elapsed()));
    }
    Ok(samples)
}

/// Time a single trial, in milliseconds.
pub fn measure_once<F>(trial: F) -> Result<f64>
where
    F: FnOnce() -> Result<()>,
{
    let start = Instant::now();
    trial()?;
    Ok(to_ms(start.elapsed()))
}

/// Manual timer for trials whose start and end happen in different places,
/// e.g. started before a platform call and stopped inside its callback.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        to_ms(self.started.elapsed())
    }

    /// Stop and append the elapsed time to `samples`.
    pub fn stop_into(self, samples: &mut SampleSet) -> f64 {
        let ms = self.elapsed_ms();
        samples.push(ms);
        ms
    }
}

/// Append-only sample collection for one metric.
#[derive(Debug, Clone, Default)]
pub struct SampleSet {
    values: Vec<f64>,
}

impl SampleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, ms: f64) {
        self.values.push(ms);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// End collection. The returned samples can no longer change.
    pub fn freeze(self) -> Samples {
        Samples(self.values.into())
    }
}

impl Extend<f64> for SampleSet {
    fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
        self.values.extend(iter);
    }
}

/// Immutable samples ready for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct Samples(Arc<[f64]>);

impl Samples {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn average(&self) -> Option<f64> {
        stat::average(&self.0)
    }

    pub fn summary(&self) -> Option<Summary> {
        Summary::of(&self.0)
    }
}

impl From<Vec<f64>> for Samples {
    fn from(values: Vec<f64>) -> Self {
        Self(values.into())
    }
}
