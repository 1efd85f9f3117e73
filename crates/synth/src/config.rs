//! Configuration of the synthetic recording.

use serde::{Deserialize, Serialize};
use sleep_types::{SleepError, SleepResult, SleepStage};

/// A block of the stage schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Epoch {
    pub stage: SleepStage,
    pub seconds: f64,
}

impl Epoch {
    pub fn new(stage: SleepStage, seconds: f64) -> Self {
        Self { stage, seconds }
    }
}

/// Synthetic polysomnography settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    /// Sampling frequency in Hz
    pub sf: f64,
    /// RNG seed; equal seeds give identical recordings
    pub seed: u64,
    /// Stage schedule, played back in order
    pub schedule: Vec<Epoch>,
    /// EEG channel labels
    pub eeg_channels: Vec<String>,
    pub eog_channel: String,
    pub emg_channel: String,
    /// Powerline frequency added to EEG channels, `None` for none
    pub line_noise_hz: Option<f64>,
    /// Standard deviation of white noise in µV
    pub noise_uv: f64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            sf: 256.0,
            seed: 42,
            schedule: vec![
                Epoch::new(SleepStage::Wake, 30.0),
                Epoch::new(SleepStage::N1, 30.0),
                Epoch::new(SleepStage::N2, 90.0),
                Epoch::new(SleepStage::N3, 60.0),
                Epoch::new(SleepStage::N2, 30.0),
                Epoch::new(SleepStage::Rem, 60.0),
            ],
            eeg_channels: vec!["C3".to_string(), "C4".to_string()],
            eog_channel: "EOG".to_string(),
            emg_channel: "EMG".to_string(),
            line_noise_hz: Some(50.0),
            noise_uv: 2.0,
        }
    }
}

impl SynthConfig {
    pub fn duration_s(&self) -> f64 {
        self.schedule.iter().map(|e| e.seconds).sum()
    }

    pub fn n_samples(&self) -> usize {
        self.schedule.iter().map(|e| (e.seconds * self.sf).round() as usize).sum()
    }

    /// Rescales every epoch so the schedule lasts `seconds`.
    pub fn scaled_to(mut self, seconds: f64) -> SleepResult<Self> {
        if !(seconds.is_finite() && seconds > 0.0) {
            return Err(SleepError::BadParam(format!("duration must be positive, got {}", seconds)));
        }
        let total = self.duration_s();
        if total <= 0.0 {
            return Err(SleepError::BadParam("stage schedule is empty".into()));
        }
        let ratio = seconds / total;
        self.schedule.iter_mut().for_each(|e| e.seconds *= ratio);
        Ok(self)
    }

    pub fn validate(&self) -> SleepResult<()> {
        if !(self.sf.is_finite() && self.sf > 0.0) {
            return Err(SleepError::BadParam(format!("sampling frequency must be > 0, got {}", self.sf)));
        }
        if self.schedule.is_empty() {
            return Err(SleepError::BadParam("stage schedule is empty".into()));
        }
        if let Some(e) = self.schedule.iter().find(|e| !(e.seconds.is_finite() && e.seconds > 0.0)) {
            return Err(SleepError::BadParam(format!("epoch of {} lasts {} s", e.stage, e.seconds)));
        }
        if self.eeg_channels.is_empty() {
            return Err(SleepError::BadParam("at least one EEG channel is required".into()));
        }
        if let Some(f) = self.line_noise_hz {
            if !(f > 0.0 && f < self.sf / 2.0) {
                return Err(SleepError::BadParam(format!(
                    "line noise at {} Hz is outside (0, {}) Hz",
                    f,
                    self.sf / 2.0
                )));
            }
        }
        if !(self.noise_uv.is_finite() && self.noise_uv >= 0.0) {
            return Err(SleepError::BadParam(format!("noise_uv must be >= 0, got {}", self.noise_uv)));
        }
        Ok(())
    }
}
