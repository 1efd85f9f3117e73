//! Slow waves: full cycles between negative-to-positive zero crossings of the delta band.

use sleep_dsp::filter::{filtfilt, FilterSpec};
use sleep_types::{Event, Hypnogram, SleepResult};
use tracing::debug;

use crate::common::{allowed_mask, filter_duration, peak_to_peak};
use crate::params::SlowWaveParams;

/// Each segment between consecutive upward zero crossings (record edges included)
/// that contains a downward crossing and reaches the peak-to-peak amplitude becomes
/// one wave. Waves must lie entirely within the allowed stages.
pub fn detect_slow_waves(x: &[f64], sf: f64, hypno: &Hypnogram, p: &SlowWaveParams) -> SleepResult<Vec<Event>> {
    let allowed = allowed_mask(hypno, p.stages, x.len())?;
    let delta = filtfilt(x, sf, &FilterSpec::bandpass(p.f_min, p.f_max, p.filter_order))?;
    let n = delta.len();

    let mut bounds = vec![0];
    bounds.extend((1..n).filter(|&i| delta[i - 1] < 0.0 && delta[i] >= 0.0));
    bounds.push(n);
    debug!(crossings = bounds.len() - 2, "delta upward zero crossings");

    // disallowed[i] counts disallowed samples in 0..i
    let mut disallowed = Vec::with_capacity(n + 1);
    disallowed.push(0usize);
    for &a in &allowed {
        let last = disallowed[disallowed.len() - 1];
        disallowed.push(last + usize::from(!a));
    }

    let candidates: Vec<(usize, usize)> = bounds
        .windows(2)
        .map(|w| (w[0], w[1]))
        .filter(|&(a, b)| b - a >= 2)
        .filter(|&(a, b)| disallowed[b] == disallowed[a])
        .filter(|&(a, b)| delta[a..b].windows(2).any(|w| w[0] >= 0.0 && w[1] < 0.0))
        .filter(|&(a, b)| peak_to_peak(&delta, a, b) >= p.amplitude_uv)
        .collect();

    Ok(filter_duration(candidates, sf, p.min_duration_s, p.max_duration_s)
        .into_iter()
        .map(|(a, b)| Event::new(a, b).with_amplitude(peak_to_peak(&delta, a, b)))
        .collect())
}
