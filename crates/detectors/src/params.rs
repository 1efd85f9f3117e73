//! Per-detector parameter records.
//!
//! Each detector kind has its own record with documented defaults; partial JSON/YAML
//! documents fill the missing fields from [`Default`]. [`DetectorParams`] is the
//! tagged union handed to a [`crate::Detector`].

use serde::{Deserialize, Serialize};
use sleep_types::{DetectorKind, SleepError, SleepResult, StageSet};

fn check_band(f_min: f64, f_max: f64, sf: f64) -> SleepResult<()> {
    let nyquist = sf / 2.0;
    if !(f_min.is_finite() && f_max.is_finite()) || f_min <= 0.0 || f_max >= nyquist || f_min >= f_max {
        return Err(SleepError::BadParam(format!(
            "band [{}, {}] Hz must satisfy 0 < low < high < {} Hz",
            f_min, f_max, nyquist
        )));
    }
    Ok(())
}

fn check_finite(name: &str, value: f64) -> SleepResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SleepError::BadParam(format!("{} must be finite, got {}", name, value)))
    }
}

fn check_positive(name: &str, value: f64) -> SleepResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SleepError::BadParam(format!("{} must be positive, got {}", name, value)))
    }
}

fn check_durations(min_s: f64, max_s: f64) -> SleepResult<()> {
    if !(min_s.is_finite() && max_s.is_finite()) || min_s < 0.0 || min_s > max_s {
        return Err(SleepError::BadParam(format!(
            "duration bounds [{}, {}] s must satisfy 0 <= min <= max",
            min_s, max_s
        )));
    }
    Ok(())
}

fn check_order(order: usize) -> SleepResult<()> {
    if order == 0 {
        return Err(SleepError::BadParam("filter order must be at least 1".into()));
    }
    Ok(())
}

/// Envelope-threshold spindle detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpindleParams {
    /// Sigma band lower edge (Hz)
    pub f_min: f64,
    /// Sigma band upper edge (Hz)
    pub f_max: f64,
    pub filter_order: usize,
    /// Threshold multiplier `k` in `mean + k * std`
    pub threshold: f64,
    /// Trailing mean applied to the squared signal (ms)
    pub smooth_ms: f64,
    /// Candidates closer than this are merged (ms)
    pub merge_gap_ms: f64,
    pub min_duration_s: f64,
    pub max_duration_s: f64,
    /// Allowed stages; `None` runs on every sample
    pub stages: Option<StageSet>,
    /// Attach the mean band power of each interval
    pub band_power: bool,
}

impl Default for SpindleParams {
    fn default() -> Self {
        Self {
            f_min: 12.0,
            f_max: 14.0,
            filter_order: 2,
            threshold: 2.0,
            smooth_ms: 100.0,
            merge_gap_ms: 300.0,
            min_duration_s: 0.5,
            max_duration_s: 2.0,
            stages: Some(StageSet::nrem()),
            band_power: true,
        }
    }
}

/// Zero-crossing slow-wave detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlowWaveParams {
    pub f_min: f64,
    pub f_max: f64,
    pub filter_order: usize,
    /// Minimum peak-to-peak amplitude (µV)
    pub amplitude_uv: f64,
    pub min_duration_s: f64,
    pub max_duration_s: f64,
    pub stages: Option<StageSet>,
}

impl Default for SlowWaveParams {
    fn default() -> Self {
        Self {
            f_min: 0.5,
            f_max: 4.0,
            filter_order: 2,
            amplitude_uv: 75.0,
            min_duration_s: 0.25,
            max_duration_s: 2.5,
            stages: Some(StageSet::nrem()),
        }
    }
}

/// K-complex detection: delta-band envelope score and amplitude criterion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KComplexParams {
    pub f_min: f64,
    pub f_max: f64,
    pub filter_order: usize,
    /// Envelope smoothing (ms)
    pub smooth_ms: f64,
    /// Score threshold in (0, 1)
    pub proba_threshold: f64,
    /// Minimum peak-to-peak amplitude of the filtered wave (µV)
    pub amplitude_uv: f64,
    pub min_duration_s: f64,
    pub max_duration_s: f64,
    pub stages: Option<StageSet>,
}

impl Default for KComplexParams {
    fn default() -> Self {
        Self {
            f_min: 0.5,
            f_max: 2.0,
            filter_order: 2,
            smooth_ms: 200.0,
            proba_threshold: 0.95,
            amplitude_uv: 75.0,
            min_duration_s: 0.3,
            max_duration_s: 1.5,
            stages: Some(StageSet::nrem()),
        }
    }
}

/// Rapid eye movement detection on EOG.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemParams {
    pub f_min: f64,
    pub f_max: f64,
    pub filter_order: usize,
    pub threshold: f64,
    pub smooth_ms: f64,
    /// Lag of the first difference (ms)
    pub derivative_ms: f64,
    pub merge_gap_ms: f64,
    pub min_duration_s: f64,
    pub max_duration_s: f64,
    pub stages: Option<StageSet>,
}

impl Default for RemParams {
    fn default() -> Self {
        Self {
            f_min: 0.5,
            f_max: 5.0,
            filter_order: 2,
            threshold: 2.0,
            smooth_ms: 100.0,
            derivative_ms: 40.0,
            merge_gap_ms: 0.0,
            min_duration_s: 0.05,
            max_duration_s: 2.0,
            stages: Some(StageSet::rem()),
        }
    }
}

/// Muscle twitch detection on EMG.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuscleParams {
    /// High-pass cutoff (Hz)
    pub cutoff: f64,
    pub filter_order: usize,
    pub threshold: f64,
    pub smooth_ms: f64,
    pub merge_gap_ms: f64,
    pub min_duration_s: f64,
    pub max_duration_s: f64,
    pub stages: Option<StageSet>,
}

impl Default for MuscleParams {
    fn default() -> Self {
        Self {
            cutoff: 10.0,
            filter_order: 2,
            threshold: 3.0,
            smooth_ms: 50.0,
            merge_gap_ms: 100.0,
            min_duration_s: 0.05,
            max_duration_s: 1.0,
            stages: Some(StageSet::rem()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakMode {
    #[default]
    Max,
    Min,
    Both,
}

/// Look-ahead peak detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakParams {
    /// Samples to look ahead to confirm a peak, capped at one second of signal
    pub lookahead: usize,
    /// Minimum drop (or rise) after a peak before it is accepted
    pub delta: f64,
    pub mode: PeakMode,
    pub stages: Option<StageSet>,
}

impl Default for PeakParams {
    fn default() -> Self {
        Self { lookahead: 200, delta: 0.0, mode: PeakMode::Max, stages: None }
    }
}

/// Parameters of one detector run, tagged by detector kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectorParams {
    #[serde(rename = "kcomplexes")]
    KComplexes(KComplexParams),
    MuscleTwitches(MuscleParams),
    Peaks(PeakParams),
    Rem(RemParams),
    SlowWaves(SlowWaveParams),
    Spindles(SpindleParams),
}

impl DetectorParams {
    pub fn default_for(kind: DetectorKind) -> Self {
        match kind {
            DetectorKind::KComplexes => DetectorParams::KComplexes(KComplexParams::default()),
            DetectorKind::MuscleTwitches => DetectorParams::MuscleTwitches(MuscleParams::default()),
            DetectorKind::Peaks => DetectorParams::Peaks(PeakParams::default()),
            DetectorKind::Rem => DetectorParams::Rem(RemParams::default()),
            DetectorKind::SlowWaves => DetectorParams::SlowWaves(SlowWaveParams::default()),
            DetectorKind::Spindles => DetectorParams::Spindles(SpindleParams::default()),
        }
    }

    pub fn kind(&self) -> DetectorKind {
        match self {
            DetectorParams::KComplexes(_) => DetectorKind::KComplexes,
            DetectorParams::MuscleTwitches(_) => DetectorKind::MuscleTwitches,
            DetectorParams::Peaks(_) => DetectorKind::Peaks,
            DetectorParams::Rem(_) => DetectorKind::Rem,
            DetectorParams::SlowWaves(_) => DetectorKind::SlowWaves,
            DetectorParams::Spindles(_) => DetectorKind::Spindles,
        }
    }

    /// Stage restriction of this run, `None` when unrestricted.
    pub fn stages(&self) -> Option<StageSet> {
        match self {
            DetectorParams::KComplexes(p) => p.stages,
            DetectorParams::MuscleTwitches(p) => p.stages,
            DetectorParams::Peaks(p) => p.stages,
            DetectorParams::Rem(p) => p.stages,
            DetectorParams::SlowWaves(p) => p.stages,
            DetectorParams::Spindles(p) => p.stages,
        }
    }

    /// Checks every field against the sampling frequency `sf`.
    pub fn validate(&self, sf: f64) -> SleepResult<()> {
        check_positive("sampling frequency", sf)?;
        match self {
            DetectorParams::Spindles(p) => {
                check_band(p.f_min, p.f_max, sf)?;
                check_order(p.filter_order)?;
                check_finite("threshold", p.threshold)?;
                check_positive("smooth_ms", p.smooth_ms)?;
                check_finite("merge_gap_ms", p.merge_gap_ms)?;
                check_durations(p.min_duration_s, p.max_duration_s)
            }
            DetectorParams::SlowWaves(p) => {
                check_band(p.f_min, p.f_max, sf)?;
                check_order(p.filter_order)?;
                check_finite("amplitude_uv", p.amplitude_uv)?;
                check_durations(p.min_duration_s, p.max_duration_s)
            }
            DetectorParams::KComplexes(p) => {
                check_band(p.f_min, p.f_max, sf)?;
                check_order(p.filter_order)?;
                check_positive("smooth_ms", p.smooth_ms)?;
                if !(p.proba_threshold > 0.0 && p.proba_threshold < 1.0) {
                    return Err(SleepError::BadParam(format!(
                        "proba_threshold must lie in (0, 1), got {}",
                        p.proba_threshold
                    )));
                }
                check_finite("amplitude_uv", p.amplitude_uv)?;
                check_durations(p.min_duration_s, p.max_duration_s)
            }
            DetectorParams::Rem(p) => {
                check_band(p.f_min, p.f_max, sf)?;
                check_order(p.filter_order)?;
                check_finite("threshold", p.threshold)?;
                check_positive("smooth_ms", p.smooth_ms)?;
                check_positive("derivative_ms", p.derivative_ms)?;
                check_finite("merge_gap_ms", p.merge_gap_ms)?;
                check_durations(p.min_duration_s, p.max_duration_s)
            }
            DetectorParams::MuscleTwitches(p) => {
                if !(p.cutoff > 0.0 && p.cutoff < sf / 2.0) {
                    return Err(SleepError::BadParam(format!(
                        "high-pass cutoff {} Hz must lie in (0, {}) Hz",
                        p.cutoff,
                        sf / 2.0
                    )));
                }
                check_order(p.filter_order)?;
                check_finite("threshold", p.threshold)?;
                check_positive("smooth_ms", p.smooth_ms)?;
                check_finite("merge_gap_ms", p.merge_gap_ms)?;
                check_durations(p.min_duration_s, p.max_duration_s)
            }
            DetectorParams::Peaks(p) => {
                if p.lookahead == 0 {
                    return Err(SleepError::BadParam("lookahead must be at least one sample".into()));
                }
                if !(p.delta.is_finite() && p.delta >= 0.0) {
                    return Err(SleepError::BadParam(format!("delta must be finite and >= 0, got {}", p.delta)));
                }
                Ok(())
            }
        }
    }
}
