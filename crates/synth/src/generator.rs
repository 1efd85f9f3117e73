//! Seeded generator of a synthetic polysomnography recording.
//!
//! EEG channels mix delta, theta, alpha and beta rhythms whose weights follow the
//! stage schedule, plus powerline and white noise. Stage-typical transients are
//! injected on top: spindles and K-complexes in N2, slow waves in N3, eye movements
//! on the EOG and muscle twitches on the EMG during REM. Every injected transient is
//! listed in [`Recording::truth`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use sleep_types::{DetectorKind, Hypnogram, SignalBuffer, SleepError, SleepResult, SleepStage};
use std::f64::consts::PI;
use std::ops::Range;
use tracing::{debug, info};

use crate::config::SynthConfig;

/// Centre frequencies of the background rhythms (delta, theta, alpha, beta).
const BAND_FREQS: [f64; 4] = [2.0, 6.0, 10.0, 20.0];

/// Background rhythm amplitudes in µV for each stage.
fn band_weights(stage: SleepStage) -> [f64; 4] {
    match stage {
        SleepStage::Art | SleepStage::Wake => [5.0, 4.0, 15.0, 6.0],
        SleepStage::N1 => [10.0, 12.0, 4.0, 3.0],
        SleepStage::N2 => [15.0, 8.0, 2.0, 2.0],
        SleepStage::N3 => [30.0, 6.0, 1.0, 1.0],
        SleepStage::Rem => [6.0, 12.0, 3.0, 4.0],
    }
}

/// Chin muscle tone in µV.
fn emg_tone(stage: SleepStage) -> f64 {
    match stage {
        SleepStage::Art | SleepStage::Wake => 10.0,
        SleepStage::N1 => 6.0,
        SleepStage::N2 => 4.0,
        SleepStage::N3 => 3.0,
        SleepStage::Rem => 1.5,
    }
}

/// An injected transient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticEvent {
    pub kind: DetectorKind,
    pub channel: String,
    pub start: usize,
    pub end: usize,
}

/// A generated recording with its ground truth.
#[derive(Debug, Clone)]
pub struct Recording {
    pub signal: SignalBuffer,
    pub hypnogram: Hypnogram,
    pub truth: Vec<SyntheticEvent>,
}

impl Recording {
    pub fn truth_for<'a>(&'a self, channel: &'a str, kind: DetectorKind) -> impl Iterator<Item = &'a SyntheticEvent> {
        self.truth.iter().filter(move |e| e.kind == kind && e.channel == channel)
    }
}

/// Generates the recording described by `config`.
pub fn generate(config: &SynthConfig) -> SleepResult<Recording> {
    config.validate()?;
    let sf = config.sf;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let noise = Normal::new(0.0, config.noise_uv)
        .map_err(|e| SleepError::BadParam(format!("noise distribution: {}", e)))?;

    let mut stages = Vec::with_capacity(config.n_samples());
    let mut epochs = Vec::with_capacity(config.schedule.len());
    for epoch in &config.schedule {
        let start = stages.len();
        stages.extend(std::iter::repeat(epoch.stage).take((epoch.seconds * sf).round() as usize));
        epochs.push((epoch.stage, start, stages.len()));
    }
    let n = stages.len();

    let mut rows = Vec::with_capacity(config.eeg_channels.len() + 2);
    for _ in &config.eeg_channels {
        let phases: [f64; 4] = [(); 4].map(|_| rng.gen::<f64>() * 2.0 * PI);
        let line_phase = rng.gen::<f64>() * 2.0 * PI;
        // different channels pick up different amounts of line noise
        let line_amp = rng.gen_range(0.2..0.7);
        let row: Vec<f64> = (0..n)
            .map(|i| {
                let t = i as f64 / sf;
                let weights = band_weights(stages[i]);
                let rhythms: f64 = (0..4)
                    .map(|b| weights[b] * (2.0 * PI * BAND_FREQS[b] * t + phases[b]).sin())
                    .sum();
                let line = config
                    .line_noise_hz
                    .map_or(0.0, |f| line_amp * (2.0 * PI * f * t + line_phase).sin());
                rhythms + line + noise.sample(&mut rng)
            })
            .collect();
        rows.push(row);
    }
    let mut eog: Vec<f64> = (0..n).map(|_| noise.sample(&mut rng)).collect();
    let mut emg: Vec<f64> = (0..n).map(|i| emg_tone(stages[i]) * noise_unit(&mut rng)).collect();

    let mut truth = Vec::new();
    let mut injector = Injector { sf, n, rng: &mut rng, truth: &mut truth };
    for &(stage, start, end) in &epochs {
        match stage {
            SleepStage::N2 => {
                injector.spindles(&mut rows, &config.eeg_channels, start, end);
                injector.kcomplexes(&mut rows, &config.eeg_channels, start, end);
            }
            SleepStage::N3 => injector.slow_waves(&mut rows, &config.eeg_channels, start, end),
            SleepStage::Rem => {
                injector.saccades(&mut eog, &config.eog_channel, start, end);
                injector.twitches(&mut emg, &config.emg_channel, start, end);
            }
            _ => {}
        }
    }

    rows.push(eog);
    rows.push(emg);
    let mut labels = config.eeg_channels.clone();
    labels.push(config.eog_channel.clone());
    labels.push(config.emg_channel.clone());

    truth.sort_by(|a, b| (&a.channel, a.kind, a.start).cmp(&(&b.channel, b.kind, b.start)));
    info!(
        "Generated {:.0} s synthetic recording at {} Hz: {} channels, {} transients",
        n as f64 / sf,
        sf,
        labels.len(),
        truth.len()
    );
    Ok(Recording {
        signal: SignalBuffer::from_rows(rows, sf, labels)?,
        hypnogram: Hypnogram::from_stages(stages, sf)?,
        truth,
    })
}

fn noise_unit(rng: &mut StdRng) -> f64 {
    rng.sample::<f64, _>(rand_distr::StandardNormal)
}

/// Places transients inside one epoch and records them.
struct Injector<'a> {
    sf: f64,
    n: usize,
    rng: &'a mut StdRng,
    truth: &'a mut Vec<SyntheticEvent>,
}

impl Injector<'_> {
    /// `(start, len)` in samples of transients spaced by `gap_s` seconds, each
    /// `dur_s` long, fitting in `[start, end)`.
    fn schedule(&mut self, start: usize, end: usize, gap_s: Range<f64>, dur_s: Range<f64>) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        let mut t = start as f64 / self.sf + self.rng.gen_range(gap_s.clone()) / 2.0;
        loop {
            let dur = self.rng.gen_range(dur_s.clone());
            let s = (t * self.sf).round() as usize;
            let len = ((dur * self.sf).round() as usize).max(1);
            if s + len > end.min(self.n) {
                break;
            }
            out.push((s, len));
            t += dur + self.rng.gen_range(gap_s.clone());
        }
        out
    }

    fn record(&mut self, kind: DetectorKind, channel: &str, start: usize, len: usize) {
        self.truth.push(SyntheticEvent { kind, channel: channel.to_string(), start, end: start + len });
    }

    /// 12-14 Hz bursts with cosine ramps, on every EEG channel.
    fn spindles(&mut self, rows: &mut [Vec<f64>], labels: &[String], start: usize, end: usize) {
        let placed = self.schedule(start, end, 4.0..10.0, 0.8..1.6);
        debug!("Injecting {} spindles in [{}, {})", placed.len(), start, end);
        for (s, len) in placed {
            let freq = self.rng.gen_range(12.0..14.0);
            let amp = self.rng.gen_range(20.0..30.0);
            let ramp = (0.15 * self.sf) as usize;
            for (row, label) in rows.iter_mut().zip(labels) {
                let gain = self.rng.gen_range(0.8..1.2);
                for j in 0..len {
                    let edge = j.min(len - 1 - j);
                    let w = if edge < ramp { 0.5 * (1.0 - (PI * edge as f64 / ramp as f64).cos()) } else { 1.0 };
                    row[s + j] += gain * amp * w * (2.0 * PI * freq * j as f64 / self.sf).sin();
                }
                self.record(DetectorKind::Spindles, label, s, len);
            }
        }
    }

    /// One-second biphasic waves, negative first.
    fn kcomplexes(&mut self, rows: &mut [Vec<f64>], labels: &[String], start: usize, end: usize) {
        let placed = self.schedule(start, end, 15.0..25.0, 1.0..1.0001);
        for (s, len) in placed {
            let amp = self.rng.gen_range(80.0..120.0);
            for (row, label) in rows.iter_mut().zip(labels) {
                for j in 0..len {
                    row[s + j] -= amp * (2.0 * PI * j as f64 / len as f64).sin();
                }
                self.record(DetectorKind::KComplexes, label, s, len);
            }
        }
    }

    /// Single large delta cycles.
    fn slow_waves(&mut self, rows: &mut [Vec<f64>], labels: &[String], start: usize, end: usize) {
        let placed = self.schedule(start, end, 0.3..1.5, 0.8..1.25);
        for (s, len) in placed {
            let amp = self.rng.gen_range(50.0..80.0);
            for (row, label) in rows.iter_mut().zip(labels) {
                for j in 0..len {
                    row[s + j] -= amp * (2.0 * PI * j as f64 / len as f64).sin();
                }
                self.record(DetectorKind::SlowWaves, label, s, len);
            }
        }
    }

    /// 200 ms triangular deflections of random sign.
    fn saccades(&mut self, eog: &mut [f64], label: &str, start: usize, end: usize) {
        let placed = self.schedule(start, end, 2.0..6.0, 0.2..0.2001);
        for (s, len) in placed {
            let sign = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            let amp = self.rng.gen_range(60.0..100.0);
            let half = len as f64 / 2.0;
            for j in 0..len {
                eog[s + j] += sign * amp * (1.0 - (j as f64 - half).abs() / half);
            }
            self.record(DetectorKind::Rem, label, s, len);
        }
    }

    /// Short broadband bursts on the EMG.
    fn twitches(&mut self, emg: &mut [f64], label: &str, start: usize, end: usize) {
        let placed = self.schedule(start, end, 3.0..8.0, 0.1..0.3);
        for (s, len) in placed {
            let amp = self.rng.gen_range(15.0..25.0);
            for sample in &mut emg[s..s + len] {
                *sample += amp * noise_unit(self.rng);
            }
            self.record(DetectorKind::MuscleTwitches, label, s, len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Epoch;
    use detectors::spindles::detect_spindles;
    use detectors::SpindleParams;

    fn short_config(seed: u64) -> SynthConfig {
        SynthConfig {
            seed,
            schedule: vec![
                Epoch::new(SleepStage::N2, 60.0),
                Epoch::new(SleepStage::N3, 20.0),
                Epoch::new(SleepStage::Rem, 20.0),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_shape_and_labels() {
        let rec = generate(&short_config(1)).unwrap();
        assert_eq!(rec.signal.labels(), &["C3", "C4", "EOG", "EMG"]);
        assert_eq!(rec.signal.n_samples(), 100 * 256);
        assert_eq!(rec.hypnogram.len(), rec.signal.n_samples());
        assert_eq!(rec.hypnogram.stage_at(0), Some(SleepStage::N2));
        assert_eq!(rec.hypnogram.stage_at(90 * 256), Some(SleepStage::Rem));
    }

    #[test]
    fn test_seed_is_deterministic() {
        let a = generate(&short_config(7)).unwrap();
        let b = generate(&short_config(7)).unwrap();
        let c = generate(&short_config(8)).unwrap();
        assert_eq!(a.signal, b.signal);
        assert_eq!(a.truth, b.truth);
        assert_ne!(a.signal, c.signal);
    }

    #[test]
    fn test_truth_follows_schedule() {
        let rec = generate(&short_config(3)).unwrap();
        assert!(rec.truth_for("C3", DetectorKind::Spindles).count() >= 3);
        for ev in &rec.truth {
            let stage = rec.hypnogram.stage_at(ev.start).unwrap();
            let expected = match ev.kind {
                DetectorKind::Spindles | DetectorKind::KComplexes => SleepStage::N2,
                DetectorKind::SlowWaves => SleepStage::N3,
                _ => SleepStage::Rem,
            };
            assert_eq!(stage, expected, "{:?}", ev);
            assert!(ev.end <= rec.signal.n_samples());
        }
        assert!(rec.truth_for("EOG", DetectorKind::Rem).count() >= 2);
        assert!(rec.truth_for("EMG", DetectorKind::MuscleTwitches).count() >= 2);
    }

    #[test]
    fn test_spindle_detector_finds_injected_spindles() {
        let rec = generate(&short_config(11)).unwrap();
        let x = rec.signal.channel_vec("C3").unwrap();
        let events = detect_spindles(&x, rec.signal.sf(), &rec.hypnogram, &SpindleParams::default()).unwrap();
        let truth: Vec<_> = rec.truth_for("C3", DetectorKind::Spindles).collect();
        let found = truth
            .iter()
            .filter(|t| events.iter().any(|e| e.start < t.end && t.start < e.end))
            .count();
        assert!(found * 2 >= truth.len(), "found {} of {}", found, truth.len());
    }
}
