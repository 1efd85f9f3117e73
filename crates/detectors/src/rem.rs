//! Rapid eye movements: steep deflections of the smoothed EOG.

use sleep_dsp::filter::{filtfilt, FilterSpec};
use sleep_dsp::smooth::{centered_moving_average, lagged_abs_diff, samples_from_ms, shift_left};
use sleep_types::{Event, Hypnogram, SleepResult};
use tracing::debug;

use crate::common::{allowed_mask, calibrate, filter_duration, merge_close, peak_to_peak, runs_within};
use crate::params::RemParams;

pub fn detect_rem(x: &[f64], sf: f64, hypno: &Hypnogram, p: &RemParams) -> SleepResult<Vec<Event>> {
    let allowed = allowed_mask(hypno, p.stages, x.len())?;
    let eog = filtfilt(x, sf, &FilterSpec::bandpass(p.f_min, p.f_max, p.filter_order))?;
    let window = samples_from_ms(p.smooth_ms, sf);
    let smoothed = centered_moving_average(&eog, window);

    // first difference over the lag, re-centred on the middle of the lag
    let lag = samples_from_ms(p.derivative_ms, sf);
    let slope = centered_moving_average(&lagged_abs_diff(&smoothed, lag), window);
    let slope = shift_left(&slope, lag / 2);

    let (mean, std) = calibrate(&slope, &allowed)?;
    let threshold = mean + p.threshold * std;
    debug!(mean, std, threshold, lag, "rem slope calibrated");

    let above: Vec<bool> = slope.iter().map(|&v| v > threshold).collect();
    let gap = (p.merge_gap_ms / 1000.0 * sf).round() as usize;
    let merged = merge_close(runs_within(&above, &allowed), gap, &allowed);
    Ok(filter_duration(merged, sf, p.min_duration_s, p.max_duration_s)
        .into_iter()
        .map(|(a, b)| Event::new(a, b).with_amplitude(peak_to_peak(&eog, a, b)))
        .collect())
}
