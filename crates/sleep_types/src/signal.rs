//! Immutable multichannel sample buffer.

use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{SleepError, SleepResult};

/// A `(n_channels, n_samples)` matrix with its sampling frequency, channel labels and
/// time vector.
///
/// The buffer is created once from a loader and shared read-only for the rest of a
/// session. The only way to obtain different channel data is to build a new buffer
/// (see [`SignalBuffer::with_channels`]), which re-referencing does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SignalRepr")]
pub struct SignalBuffer {
    sf: f64,
    data: Array2<f64>,
    labels: Vec<String>,
    time: Vec<f64>,
    /// Acquisition start-of-day offset in seconds. Informational only.
    #[serde(default)]
    start_offset_s: Option<f64>,
}

/// Wire form of [`SignalBuffer`]; deserialized buffers go through the same checks
/// as [`SignalBuffer::with_time`].
#[derive(Deserialize)]
struct SignalRepr {
    sf: f64,
    data: Array2<f64>,
    labels: Vec<String>,
    time: Vec<f64>,
    #[serde(default)]
    start_offset_s: Option<f64>,
}

impl TryFrom<SignalRepr> for SignalBuffer {
    type Error = SleepError;

    fn try_from(repr: SignalRepr) -> SleepResult<Self> {
        let mut buffer = Self::with_time(repr.data, repr.sf, repr.labels, repr.time)?;
        buffer.start_offset_s = repr.start_offset_s;
        Ok(buffer)
    }
}

impl SignalBuffer {
    /// Creates a buffer whose time vector is `i / sf`.
    pub fn new(data: Array2<f64>, sf: f64, labels: Vec<String>) -> SleepResult<Self> {
        let time = (0..data.ncols()).map(|i| i as f64 / sf).collect();
        Self::with_time(data, sf, labels, time)
    }

    /// Creates a buffer with an explicit time vector.
    pub fn with_time(data: Array2<f64>, sf: f64, labels: Vec<String>, time: Vec<f64>) -> SleepResult<Self> {
        if !(sf.is_finite() && sf > 0.0) {
            return Err(SleepError::InvalidInput(format!("sampling frequency must be > 0, got {}", sf)));
        }
        if data.nrows() != labels.len() {
            return Err(SleepError::InvalidInput(format!(
                "data has {} channels but {} labels were given",
                data.nrows(),
                labels.len()
            )));
        }
        if data.ncols() != time.len() {
            return Err(SleepError::InvalidInput(format!(
                "data has {} samples but the time vector has {}",
                data.ncols(),
                time.len()
            )));
        }
        let mut seen = HashSet::with_capacity(labels.len());
        for label in &labels {
            if !seen.insert(label.as_str()) {
                return Err(SleepError::InvalidInput(format!("duplicate channel label '{}'", label)));
            }
        }
        if time.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(SleepError::InvalidInput("time vector must be strictly increasing".to_string()));
        }
        Ok(Self { sf, data, labels, time, start_offset_s: None })
    }

    /// Convenience constructor from per-channel rows.
    pub fn from_rows(rows: Vec<Vec<f64>>, sf: f64, labels: Vec<String>) -> SleepResult<Self> {
        let n_samples = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|r| r.len() != n_samples) {
            return Err(SleepError::InvalidInput("all channels must have the same length".to_string()));
        }
        let n_channels = rows.len();
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        let data = Array2::from_shape_vec((n_channels, n_samples), flat)
            .map_err(|e| SleepError::InvalidInput(e.to_string()))?;
        Self::new(data, sf, labels)
    }

    /// Sets the informational acquisition start-of-day offset.
    pub fn with_start_offset(mut self, seconds: f64) -> Self {
        self.start_offset_s = Some(seconds);
        self
    }

    /// Builds a new buffer sharing this one's `sf`, time vector and offset but
    /// holding different channels.
    pub fn with_channels(&self, data: Array2<f64>, labels: Vec<String>) -> SleepResult<Self> {
        let mut buffer = Self::with_time(data, self.sf, labels, self.time.clone())?;
        buffer.start_offset_s = self.start_offset_s;
        Ok(buffer)
    }

    pub fn sf(&self) -> f64 {
        self.sf
    }

    pub fn n_channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    /// Recording duration in seconds.
    pub fn duration_s(&self) -> f64 {
        self.n_samples() as f64 / self.sf
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn start_offset_s(&self) -> Option<f64> {
        self.start_offset_s
    }

    pub fn data(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn channel_index(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// Row view of a channel by label.
    pub fn channel(&self, label: &str) -> Option<ArrayView1<'_, f64>> {
        self.channel_index(label).map(|idx| self.data.row(idx))
    }

    /// Copies a channel into a contiguous vector.
    pub fn channel_vec(&self, label: &str) -> SleepResult<Vec<f64>> {
        self.channel(label)
            .map(|row| row.to_vec())
            .ok_or_else(|| SleepError::InvalidInput(format!("unknown channel '{}'", label)))
    }
}
