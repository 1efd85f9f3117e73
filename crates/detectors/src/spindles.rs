//! Sleep spindles: sigma-band power envelope above an adaptive threshold.

use sleep_dsp::filter::{filtfilt, FilterSpec};
use sleep_dsp::smooth::{centered_moving_average, samples_from_ms};
use sleep_types::{Event, Hypnogram, SleepResult};
use tracing::debug;

use crate::common::{allowed_mask, calibrate, filter_duration, merge_close, peak_to_peak, runs_within};
use crate::params::SpindleParams;

/// Band-pass, square, smooth, then keep runs above `mean + k * std` of the envelope
/// computed over the allowed stages.
pub fn detect_spindles(x: &[f64], sf: f64, hypno: &Hypnogram, p: &SpindleParams) -> SleepResult<Vec<Event>> {
    let allowed = allowed_mask(hypno, p.stages, x.len())?;
    let sigma = filtfilt(x, sf, &FilterSpec::bandpass(p.f_min, p.f_max, p.filter_order))?;
    let power: Vec<f64> = sigma.iter().map(|v| v * v).collect();
    let envelope = centered_moving_average(&power, samples_from_ms(p.smooth_ms, sf));

    let (mean, std) = calibrate(&envelope, &allowed)?;
    let threshold = mean + p.threshold * std;
    debug!(mean, std, threshold, "spindle envelope calibrated");

    let above: Vec<bool> = envelope.iter().map(|&e| e > threshold).collect();
    let gap = (p.merge_gap_ms / 1000.0 * sf).round() as usize;
    let merged = merge_close(runs_within(&above, &allowed), gap, &allowed);
    let kept = filter_duration(merged, sf, p.min_duration_s, p.max_duration_s);

    Ok(kept
        .into_iter()
        .map(|(start, end)| {
            let event = Event::new(start, end).with_amplitude(peak_to_peak(&sigma, start, end));
            if p.band_power {
                event.with_band_power(power[start..end].iter().sum::<f64>() / (end - start) as f64)
            } else {
                event
            }
        })
        .collect())
}
