//! K-complexes: large isolated delta-band waves.
//!
//! A sample is a candidate when the smoothed delta-band envelope is improbable under
//! a normal fit of the envelope over the allowed stages. Candidate runs are then kept
//! only if the filtered wave reaches the peak-to-peak amplitude criterion.

use sleep_dsp::filter::{filtfilt, FilterSpec};
use sleep_dsp::hilbert_envelope;
use sleep_dsp::smooth::{centered_moving_average, samples_from_ms};
use sleep_types::{Event, Hypnogram, SleepResult};
use std::f64::consts::SQRT_2;
use tracing::debug;

use crate::common::{allowed_mask, calibrate, filter_duration, peak_to_peak, runs_within};
use crate::params::KComplexParams;

/// Abramowitz & Stegun 7.1.26, absolute error below 1.5e-7.
fn erf(x: f64) -> f64 {
    let sign = if x >= 0.0 { 1.0 } else { -1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let poly = t * (0.254829592 + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    sign * (1.0 - poly * (-x * x).exp())
}

/// Normal cumulative probability of each value given `(mean, std)`.
pub fn envelope_score(envelope: &[f64], mean: f64, std: f64) -> Vec<f64> {
    if std <= 0.0 {
        return vec![0.5; envelope.len()];
    }
    envelope.iter().map(|&e| 0.5 * (1.0 + erf((e - mean) / (std * SQRT_2)))).collect()
}

pub fn detect_kcomplexes(x: &[f64], sf: f64, hypno: &Hypnogram, p: &KComplexParams) -> SleepResult<Vec<Event>> {
    let allowed = allowed_mask(hypno, p.stages, x.len())?;
    let delta = filtfilt(x, sf, &FilterSpec::bandpass(p.f_min, p.f_max, p.filter_order))?;
    let envelope = centered_moving_average(&hilbert_envelope(&delta), samples_from_ms(p.smooth_ms, sf));

    let (mean, std) = calibrate(&envelope, &allowed)?;
    let score = envelope_score(&envelope, mean, std);
    let above: Vec<bool> = score.iter().map(|&s| s > p.proba_threshold).collect();
    let candidates = runs_within(&above, &allowed);
    debug!(mean, std, candidates = candidates.len(), "k-complex score computed");

    let strong: Vec<(usize, usize)> = candidates
        .into_iter()
        .filter(|&(a, b)| peak_to_peak(&delta, a, b) >= p.amplitude_uv)
        .collect();
    Ok(filter_duration(strong, sf, p.min_duration_s, p.max_duration_s)
        .into_iter()
        .map(|(a, b)| Event::new(a, b).with_amplitude(peak_to_peak(&delta, a, b)))
        .collect())
}
