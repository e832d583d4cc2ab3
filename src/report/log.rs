//! Performance report: labelled metrics with direction and unit.
//!
//! A [`ReportLog`] owns copies of the samples it was given. Submitting borrows
//! it immutably, so a report reads the same before and after emission.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::logger::jsonl::format_utc_now;
use crate::report::collector::ResultsCollector;
use crate::report::stat;

/// Which direction of change is an improvement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    LowerBetter,
    HigherBetter,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultUnit {
    Ms,
    Count,
    Score,
    Bytes,
}

impl ResultType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LowerBetter => "lower_better",
            Self::HigherBetter => "higher_better",
            Self::Neutral => "neutral",
        }
    }
}

impl ResultUnit {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ms => "ms",
            Self::Count => "count",
            Self::Score => "score",
            Self::Bytes => "bytes",
        }
    }
}

/// Raw samples for one label plus their mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub label: String,
    pub values: Vec<f64>,
    /// `None` when no samples were recorded.
    pub mean: Option<f64>,
    pub direction: ResultType,
    pub unit: ResultUnit,
}

/// Headline number for a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub label: String,
    pub value: f64,
    pub direction: ResultType,
    pub unit: ResultUnit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportLog {
    /// Suite or test class the numbers come from.
    pub source: String,
    /// Report stream name, e.g. the test method.
    pub stream: String,
    pub created_at: String,
    pub metrics: Vec<Metric>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub summary: Option<ReportSummary>,
}

impl ReportLog {
    pub fn new(source: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            stream: stream.into(),
            created_at: format_utc_now(),
            metrics: Vec::new(),
            summary: None,
        }
    }

    /// Record a sample sequence under `label`.
    pub fn add_values(
        &mut self,
        label: impl Into<String>,
        values: &[f64],
        direction: ResultType,
        unit: ResultUnit,
    ) {
        self.metrics.push(Metric {
            label: label.into(),
            values: values.to_vec(),
            mean: stat::average(values),
            direction,
            unit,
        });
    }

    pub fn add_value(
        &mut self,
        label: impl Into<String>,
        value: f64,
        direction: ResultType,
        unit: ResultUnit,
    ) {
        self.add_values(label, &[value], direction, unit);
    }

    pub fn set_summary(
        &mut self,
        label: impl Into<String>,
        value: f64,
        direction: ResultType,
        unit: ResultUnit,
    ) {
        self.summary = Some(ReportSummary {
            label: label.into(),
            value,
            direction,
            unit,
        });
    }

    pub fn metric(&self, label: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.label == label)
    }

    /// Hand the report to a collector.
    pub fn submit(&self, collector: &dyn ResultsCollector) -> Result<()> {
        collector.collect(self)
    }
}
