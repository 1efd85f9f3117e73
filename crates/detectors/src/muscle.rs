//! Muscle twitches: bursts of high-frequency EMG activity.

use sleep_dsp::filter::{filtfilt, FilterSpec};
use sleep_dsp::smooth::{centered_moving_average, samples_from_ms};
use sleep_types::{Event, Hypnogram, SleepResult};
use tracing::debug;

use crate::common::{allowed_mask, calibrate, filter_duration, merge_close, runs_within};
use crate::params::MuscleParams;

pub fn detect_muscle_twitches(x: &[f64], sf: f64, hypno: &Hypnogram, p: &MuscleParams) -> SleepResult<Vec<Event>> {
    let allowed = allowed_mask(hypno, p.stages, x.len())?;
    let emg = filtfilt(x, sf, &FilterSpec::highpass(p.cutoff, p.filter_order))?;
    let rectified: Vec<f64> = emg.iter().map(|v| v.abs()).collect();
    let envelope = centered_moving_average(&rectified, samples_from_ms(p.smooth_ms, sf));

    let (mean, std) = calibrate(&envelope, &allowed)?;
    let threshold = mean + p.threshold * std;
    debug!(mean, std, threshold, "emg envelope calibrated");

    let above: Vec<bool> = envelope.iter().map(|&v| v > threshold).collect();
    let gap = (p.merge_gap_ms / 1000.0 * sf).round() as usize;
    let merged = merge_close(runs_within(&above, &allowed), gap, &allowed);
    Ok(filter_duration(merged, sf, p.min_duration_s, p.max_duration_s)
        .into_iter()
        .map(|(a, b)| {
            let peak = envelope[a..b].iter().cloned().fold(0.0, f64::max);
            Event::new(a, b).with_amplitude(peak)
        })
        .collect())
}
