//! Detection events and the detector kinds that produce them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SleepError;
use crate::hypnogram::SleepStage;

/// Physiological event families.
///
/// Declaration order is alphabetical by [`DetectorKind::as_str`], so the derived `Ord`
/// sorts kinds by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    #[serde(rename = "kcomplexes")]
    KComplexes,
    MuscleTwitches,
    Peaks,
    Rem,
    SlowWaves,
    Spindles,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 6] = [
        DetectorKind::KComplexes,
        DetectorKind::MuscleTwitches,
        DetectorKind::Peaks,
        DetectorKind::Rem,
        DetectorKind::SlowWaves,
        DetectorKind::Spindles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::KComplexes => "kcomplexes",
            DetectorKind::MuscleTwitches => "muscle_twitches",
            DetectorKind::Peaks => "peaks",
            DetectorKind::Rem => "rem",
            DetectorKind::SlowWaves => "slow_waves",
            DetectorKind::Spindles => "spindles",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectorKind {
    type Err = SleepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DetectorKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| SleepError::InvalidInput(format!("unknown detector kind '{}'", s)))
    }
}

/// A detected event: half-open sample interval `[start, end)` plus optional measures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub start: usize,
    pub end: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amplitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band_power: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_at_start: Option<SleepStage>,
}

impl Event {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end, amplitude: None, band_power: None, stage_at_start: None }
    }

    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = Some(amplitude);
        self
    }

    pub fn with_band_power(mut self, power: f64) -> Self {
        self.band_power = Some(power);
        self
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn duration_s(&self, sf: f64) -> f64 {
        self.len() as f64 / sf
    }

    /// True when the two half-open intervals share at least one sample.
    pub fn overlaps(&self, other: &Event) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn bounds(&self) -> (usize, usize) {
        (self.start, self.end)
    }
}

impl From<(usize, usize)> for Event {
    fn from((start, end): (usize, usize)) -> Self {
        Event::new(start, end)
    }
}

/// Typed detection record handed to external renderers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub channel: String,
    pub kind: DetectorKind,
    pub start: usize,
    pub end: usize,
    pub duration_ms: f64,
    /// Stage code at `start`.
    pub stage: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amplitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band_power: Option<f64>,
}

impl DetectionRecord {
    pub fn from_event(channel: &str, kind: DetectorKind, event: &Event, sf: f64) -> Self {
        Self {
            channel: channel.to_string(),
            kind,
            start: event.start,
            end: event.end,
            duration_ms: event.duration_s(sf) * 1000.0,
            stage: event.stage_at_start.map(SleepStage::code),
            amplitude: event.amplitude,
            band_power: event.band_power,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_order_is_alphabetical() {
        let mut names: Vec<&str> = DetectorKind::ALL.iter().map(|k| k.as_str()).collect();
        let declared = names.clone();
        names.sort();
        assert_eq!(names, declared);
        let mut kinds = DetectorKind::ALL.to_vec();
        kinds.reverse();
        kinds.sort();
        assert_eq!(kinds, DetectorKind::ALL.to_vec());
    }

    #[test]
    fn test_kind_serde_and_parse() {
        assert_eq!(serde_json::to_string(&DetectorKind::KComplexes).unwrap(), "\"kcomplexes\"");
        assert_eq!(serde_json::to_string(&DetectorKind::SlowWaves).unwrap(), "\"slow_waves\"");
        for kind in DetectorKind::ALL {
            let parsed: DetectorKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert!("nope".parse::<DetectorKind>().is_err());
    }

    #[test]
    fn test_event_geometry() {
        let a = Event::new(10, 20);
        let b = Event::new(20, 30);
        let c = Event::new(15, 25);
        assert_eq!(a.len(), 10);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!((a.duration_s(100.0) - 0.1).abs() < 1e-12);
        assert!(Event::new(5, 5).is_empty());
    }

    #[test]
    fn test_record_from_event() {
        let mut ev = Event::new(200, 360).with_amplitude(42.0);
        ev.stage_at_start = Some(SleepStage::N2);
        let rec = DetectionRecord::from_event("C3", DetectorKind::Spindles, &ev, 200.0);
        assert!((rec.duration_ms - 800.0).abs() < 1e-9);
        assert_eq!(rec.stage, Some(2));
        assert_eq!(rec.amplitude, Some(42.0));
    }
}
