//! Physiological event detectors
//!
//! Six built-in detectors (spindles, slow waves, K-complexes, rapid eye movements,
//! muscle twitches and peaks) share one contract: a pure function of one channel,
//! its sampling frequency, the hypnogram and a typed parameter record, returning
//! sorted half-open sample intervals that respect the stage restriction.

pub mod common;
pub mod detector;
pub mod kcomplexes;
pub mod muscle;
pub mod params;
pub mod peaks;
pub mod rem;
pub mod slow_waves;
pub mod spindles;

pub use detector::{run_detector, BuiltinDetector, CustomDetector, DetectFn, Detector, DetectorOutput};
pub use params::{
    DetectorParams, KComplexParams, MuscleParams, PeakMode, PeakParams, RemParams, SlowWaveParams, SpindleParams,
};
