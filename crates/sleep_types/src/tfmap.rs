//! Time-frequency map payload.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{SleepError, SleepResult};

/// Normalization applied to a [`TfMap`] relative to a baseline window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    #[default]
    None,
    ZScore,
    Divisive,
    Decibel,
    PercentChange,
}

/// `values[freq, time]` with the matching axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TfMap {
    pub freqs: Vec<f64>,
    pub time: Vec<f64>,
    pub values: Array2<f64>,
    pub normalization: Normalization,
    /// Baseline `(t0, t1)` in seconds, set once a normalization has been applied.
    #[serde(default)]
    pub baseline: Option<(f64, f64)>,
}

impl TfMap {
    pub fn new(freqs: Vec<f64>, time: Vec<f64>, values: Array2<f64>) -> SleepResult<Self> {
        if values.dim() != (freqs.len(), time.len()) {
            return Err(SleepError::Internal(format!(
                "tf map values {:?} do not match {} freqs x {} times",
                values.dim(),
                freqs.len(),
                time.len()
            )));
        }
        if freqs.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(SleepError::Internal("tf map frequencies must be ascending".to_string()));
        }
        Ok(Self { freqs, time, values, normalization: Normalization::None, baseline: None })
    }

    pub fn n_freqs(&self) -> usize {
        self.freqs.len()
    }

    pub fn n_times(&self) -> usize {
        self.time.len()
    }

    /// Column indices whose time falls in `[t0, t1)`.
    pub fn time_columns(&self, t0: f64, t1: f64) -> std::ops::Range<usize> {
        let start = self.time.partition_point(|&t| t < t0);
        let end = self.time.partition_point(|&t| t < t1);
        start..end.max(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_checked() {
        let ok = TfMap::new(vec![1.0, 2.0], vec![0.0, 0.5, 1.0], Array2::zeros((2, 3)));
        assert!(ok.is_ok());
        let bad = TfMap::new(vec![1.0, 2.0], vec![0.0], Array2::zeros((2, 3)));
        assert!(bad.is_err());
        let unsorted = TfMap::new(vec![2.0, 1.0], vec![0.0], Array2::zeros((2, 1)));
        assert!(unsorted.is_err());
    }

    #[test]
    fn test_time_columns() {
        let map = TfMap::new(vec![1.0], vec![0.0, 1.0, 2.0, 3.0], Array2::zeros((1, 4))).unwrap();
        assert_eq!(map.time_columns(0.5, 2.5), 1..3);
        assert_eq!(map.time_columns(5.0, 6.0), 4..4);
        assert!(map.time_columns(2.0, 1.0).is_empty());
    }

    #[test]
    fn test_normalization_serde() {
        let n: Normalization = serde_json::from_str("\"z_score\"").unwrap();
        assert_eq!(n, Normalization::ZScore);
        assert_eq!(serde_json::to_string(&Normalization::PercentChange).unwrap(), "\"percent_change\"");
    }
}
