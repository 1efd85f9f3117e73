//! The detector trait, built-in implementations and custom registrations.

use sleep_types::{intervals_from_mask, DetectorKind, Event, Hypnogram, SleepError, SleepResult};
use std::fmt;
use std::sync::Arc;

use crate::common::canonical_events;
use crate::params::DetectorParams;
use crate::{kcomplexes, muscle, peaks, rem, slow_waves, spindles};

/// What a detector hands back: intervals, or one flag per sample.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorOutput {
    Intervals(Vec<Event>),
    Mask(Vec<bool>),
}

impl DetectorOutput {
    /// Canonical sorted, non-overlapping, non-empty events for a signal of `n_samples`.
    pub fn into_events(self, n_samples: usize) -> SleepResult<Vec<Event>> {
        match self {
            DetectorOutput::Intervals(events) => canonical_events(events, n_samples),
            DetectorOutput::Mask(mask) => {
                if mask.len() != n_samples {
                    return Err(SleepError::InvalidInput(format!(
                        "detector mask has {} samples, signal has {}",
                        mask.len(),
                        n_samples
                    )));
                }
                Ok(intervals_from_mask(&mask).into_iter().map(Event::from).collect())
            }
        }
    }
}

/// A pure event detector over one channel.
///
/// Implementations must not retain state between calls; the same detector may run on
/// several channels from different threads.
pub trait Detector: fmt::Debug + Send + Sync {
    /// Event family this detector fills
    fn kind(&self) -> DetectorKind;

    /// Run detection on `signal` sampled at `sf`, aligned with `hypno`
    fn detect(&self, signal: &[f64], sf: f64, hypno: &Hypnogram, params: &DetectorParams)
        -> SleepResult<DetectorOutput>;

    /// Human-readable name
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Whether this is a caller-registered replacement of a built-in
    fn is_custom(&self) -> bool {
        false
    }
}

/// The default implementation of each [`DetectorKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinDetector {
    kind: DetectorKind,
}

impl BuiltinDetector {
    pub fn new(kind: DetectorKind) -> Self {
        Self { kind }
    }
}

impl Detector for BuiltinDetector {
    fn kind(&self) -> DetectorKind {
        self.kind
    }

    fn detect(&self, signal: &[f64], sf: f64, hypno: &Hypnogram, params: &DetectorParams) -> SleepResult<DetectorOutput> {
        params.validate(sf)?;
        let events = match (self.kind, params) {
            (DetectorKind::Spindles, DetectorParams::Spindles(p)) => spindles::detect_spindles(signal, sf, hypno, p)?,
            (DetectorKind::SlowWaves, DetectorParams::SlowWaves(p)) => {
                slow_waves::detect_slow_waves(signal, sf, hypno, p)?
            }
            (DetectorKind::KComplexes, DetectorParams::KComplexes(p)) => {
                kcomplexes::detect_kcomplexes(signal, sf, hypno, p)?
            }
            (DetectorKind::Rem, DetectorParams::Rem(p)) => rem::detect_rem(signal, sf, hypno, p)?,
            (DetectorKind::MuscleTwitches, DetectorParams::MuscleTwitches(p)) => {
                muscle::detect_muscle_twitches(signal, sf, hypno, p)?
            }
            (DetectorKind::Peaks, DetectorParams::Peaks(p)) => peaks::detect_peaks(signal, sf, hypno, p)?,
            (kind, other) => {
                return Err(SleepError::BadParam(format!(
                    "{} detector cannot take {} parameters",
                    kind,
                    other.kind()
                )))
            }
        };
        Ok(DetectorOutput::Intervals(events))
    }
}

/// Signature of a caller-supplied detector function.
pub type DetectFn = dyn Fn(&[f64], f64, &Hypnogram, &DetectorParams) -> SleepResult<DetectorOutput> + Send + Sync;

/// A caller-registered detector that fully owns its kind.
#[derive(Clone)]
pub struct CustomDetector {
    kind: DetectorKind,
    name: String,
    func: Arc<DetectFn>,
}

impl CustomDetector {
    pub fn new<F>(kind: DetectorKind, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[f64], f64, &Hypnogram, &DetectorParams) -> SleepResult<DetectorOutput> + Send + Sync + 'static,
    {
        Self { kind, name: name.into(), func: Arc::new(func) }
    }
}

impl fmt::Debug for CustomDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomDetector").field("kind", &self.kind).field("name", &self.name).finish()
    }
}

impl Detector for CustomDetector {
    fn kind(&self) -> DetectorKind {
        self.kind
    }

    fn detect(&self, signal: &[f64], sf: f64, hypno: &Hypnogram, params: &DetectorParams) -> SleepResult<DetectorOutput> {
        (self.func)(signal, sf, hypno, params)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_custom(&self) -> bool {
        true
    }
}

/// Runs `detector` and returns canonical events stamped with the stage at their start.
///
/// Events starting outside the stage restriction of `params` are dropped, which keeps
/// custom detectors to the same contract as the built-ins.
pub fn run_detector(
    detector: &dyn Detector,
    signal: &[f64],
    sf: f64,
    hypno: &Hypnogram,
    params: &DetectorParams,
) -> SleepResult<Vec<Event>> {
    if hypno.len() != signal.len() {
        return Err(SleepError::InvalidInput(format!(
            "hypnogram has {} samples, signal has {}",
            hypno.len(),
            signal.len()
        )));
    }
    let events = detector.detect(signal, sf, hypno, params)?.into_events(signal.len())?;
    let stages = params.stages();
    Ok(events
        .into_iter()
        .filter_map(|mut ev| {
            let stage = hypno.stage_at(ev.start)?;
            if stages.map_or(true, |set| set.contains(stage)) {
                ev.stage_at_start = Some(stage);
                Some(ev)
            } else {
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::PeakParams;
    use sleep_types::{ErrorKind, SleepStage, StageSet};

    #[test]
    fn test_mask_output_converted() {
        let out = DetectorOutput::Mask(vec![false, true, true, false, true]);
        let events = out.into_events(5).unwrap();
        assert_eq!(events.iter().map(Event::bounds).collect::<Vec<_>>(), vec![(1, 3), (4, 5)]);
        assert!(DetectorOutput::Mask(vec![true]).into_events(5).is_err());
    }

    #[test]
    fn test_params_kind_mismatch() {
        let hypno = Hypnogram::uniform(SleepStage::N2, 100, 100.0).unwrap();
        let det = BuiltinDetector::new(DetectorKind::Spindles);
        let params = DetectorParams::Peaks(PeakParams::default());
        let err = det.detect(&[0.0; 100], 100.0, &hypno, &params).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadParam);
    }

    #[test]
    fn test_custom_detector_is_held_to_stage_contract() {
        let custom = CustomDetector::new(DetectorKind::Spindles, "every-other", |x: &[f64], _sf, _h: &Hypnogram, _p: &DetectorParams| {
            Ok(DetectorOutput::Mask(x.iter().map(|v| *v > 0.0).collect()))
        });
        assert!(custom.is_custom());
        assert_eq!(custom.name(), "every-other");

        let x = [1.0, 1.0, 0.0, 1.0, 1.0, 0.0];
        let stages = vec![SleepStage::N2, SleepStage::N2, SleepStage::N2, SleepStage::Wake, SleepStage::Wake, SleepStage::N2];
        let hypno = Hypnogram::from_stages(stages, 1.0).unwrap();
        let mut params = DetectorParams::default_for(DetectorKind::Spindles);
        if let DetectorParams::Spindles(p) = &mut params {
            p.stages = Some(StageSet::nrem());
        }
        let events = run_detector(&custom, &x, 1.0, &hypno, &params).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].bounds(), (0, 2));
        assert_eq!(events[0].stage_at_start, Some(SleepStage::N2));
    }

    #[test]
    fn test_peaks_widened_to_one_sample() {
        let x: Vec<f64> = (0..300).map(|i| (2.0 * std::f64::consts::PI * i as f64 / 100.0).sin()).collect();
        let hypno = Hypnogram::uniform(SleepStage::Wake, x.len(), 100.0).unwrap();
        let params = DetectorParams::Peaks(PeakParams { lookahead: 20, delta: 0.5, ..Default::default() });
        let events = run_detector(&BuiltinDetector::new(DetectorKind::Peaks), &x, 100.0, &hypno, &params).unwrap();
        assert_eq!(events.iter().map(Event::bounds).collect::<Vec<_>>(), vec![(25, 26), (125, 126), (225, 226)]);
    }
}
