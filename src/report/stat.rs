//! Descriptive statistics over trial samples.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

/// Arithmetic mean. `None` for an empty sample set.
#[allow(clippy::cast_precision_loss)]
pub fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn min(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

/// Population standard deviation.
#[allow(clippy::cast_precision_loss)]
pub fn stddev(values: &[f64]) -> Option<f64> {
    let mean = average(values)?;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Summary line attached to a report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
}

impl Summary {
    /// `None` for an empty sample set.
    pub fn of(values: &[f64]) -> Option<Self> {
        Some(Self {
            count: values.len(),
            mean: average(values)?,
            min: min(values)?,
            max: max(values)?,
            stddev: stddev(values)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn average_of_three_trials() {
        assert_eq!(average(&[10.0, 20.0, 30.0]), Some(20.0));
    }

    #[test]
    fn empty_set_has_no_statistics() {
        assert_eq!(average(&[]), None);
        assert_eq!(min(&[]), None);
        assert_eq!(max(&[]), None);
        assert!(Summary::of(&[]).is_none());
    }

    #[test]
    fn summary_of_constant_samples() {
        let s = Summary::of(&[5.0, 5.0, 5.0, 5.0]).unwrap();
        assert_eq!(s.count, 4);
        assert!((s.mean - 5.0).abs() < f64::EPSILON);
        assert!(s.stddev.abs() < f64::EPSILON);
    }

    #[test]
    fn population_stddev() {
        // Mean 5, squared deviations sum to 32 over 8 samples.
        let s = stddev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((s - 2.0).abs() < 1e-12);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// The mean lies between the extremes of a non-empty sample.
        #[test]
        fn mean_is_bounded(values in prop::collection::vec(0.0f64..10_000.0, 1..64)) {
            let s = Summary::of(&values).unwrap();
            prop_assert!(s.min <= s.mean + 1e-9);
            prop_assert!(s.mean <= s.max + 1e-9);
            prop_assert!(s.stddev >= 0.0);
            prop_assert_eq!(s.count, values.len());
        }

        /// Shuffling the samples does not change the mean.
        #[test]
        fn mean_ignores_order(mut values in prop::collection::vec(0.0f64..1_000.0, 1..32)) {
            let before = average(&values).unwrap();
            values.reverse();
            let after = average(&values).unwrap();
            prop_assert!((before - after).abs() < 1e-6);
        }
    }
}
