//! Look-ahead peak detection.

use sleep_types::{ensure_finite, Event, Hypnogram, SleepResult};

use crate::common::allowed_mask;
use crate::params::{PeakMode, PeakParams};

/// Lookahead actually used: at least one sample and at most one second of signal.
pub fn effective_lookahead(lookahead: usize, sf: f64) -> usize {
    lookahead.min(sf.floor() as usize).max(1)
}

/// Local maxima and minima confirmed by the next `lookahead` samples, with a minimum
/// excursion `delta` between a peak and the following trough (and vice versa).
///
/// The very first extremum found is discarded: the search starts mid-slope, so it
/// marks the record edge rather than a turning point.
///
/// Returns `(maxima, minima)` as sample indices.
pub fn peakdetect(y: &[f64], lookahead: usize, delta: f64) -> (Vec<usize>, Vec<usize>) {
    let n = y.len();
    let mut maxima = Vec::new();
    let mut minima = Vec::new();
    if n <= lookahead {
        return (maxima, minima);
    }
    let (mut mx, mut mn) = (f64::NEG_INFINITY, f64::INFINITY);
    let (mut mx_pos, mut mn_pos) = (0usize, 0usize);
    let mut first_is_max = None;

    for index in 0..n - lookahead {
        let v = y[index];
        if v > mx {
            mx = v;
            mx_pos = index;
        }
        if v < mn {
            mn = v;
            mn_pos = index;
        }
        let ahead = &y[index..index + lookahead];

        if mx.is_finite() && v < mx - delta && ahead.iter().all(|&a| a < mx) {
            maxima.push(mx_pos);
            first_is_max.get_or_insert(true);
            mx = f64::INFINITY;
            mn = f64::INFINITY;
            continue;
        }
        if mn.is_finite() && v > mn + delta && ahead.iter().all(|&a| a > mn) {
            minima.push(mn_pos);
            first_is_max.get_or_insert(false);
            mn = f64::NEG_INFINITY;
            mx = f64::NEG_INFINITY;
        }
    }
    match first_is_max {
        Some(true) => {
            maxima.remove(0);
        }
        Some(false) => {
            minima.remove(0);
        }
        None => {}
    }
    (maxima, minima)
}

/// Peaks as degenerate `(i, i)` events carrying the sample value.
pub fn detect_peaks(x: &[f64], sf: f64, hypno: &Hypnogram, p: &PeakParams) -> SleepResult<Vec<Event>> {
    ensure_finite(x, "signal")?;
    let allowed = allowed_mask(hypno, p.stages, x.len())?;
    let (maxima, minima) = peakdetect(x, effective_lookahead(p.lookahead, sf), p.delta);
    let mut indices = match p.mode {
        PeakMode::Max => maxima,
        PeakMode::Min => minima,
        PeakMode::Both => maxima.into_iter().chain(minima).collect(),
    };
    indices.sort_unstable();
    Ok(indices
        .into_iter()
        .filter(|&i| allowed[i])
        .map(|i| Event::new(i, i).with_amplitude(x[i]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sleep_types::{ErrorKind, SleepStage};
    use std::f64::consts::PI;

    fn sine() -> Vec<f64> {
        (0..500).map(|i| (2.0 * PI * i as f64 / 100.0).sin()).collect()
    }

    #[test]
    fn test_lookahead_capped_at_one_second() {
        assert_eq!(effective_lookahead(500, 100.0), 100);
        assert_eq!(effective_lookahead(20, 100.0), 20);
        assert_eq!(effective_lookahead(5, 0.5), 1);
    }

    #[test]
    fn test_sine_extrema() {
        let (maxima, minima) = peakdetect(&sine(), 20, 0.5);
        assert_eq!(maxima, vec![25, 125, 225, 325, 425]);
        assert_eq!(minima, vec![75, 175, 275, 375]);
    }

    #[test]
    fn test_modes() {
        let x = sine();
        let hypno = Hypnogram::uniform(SleepStage::Wake, x.len(), 100.0).unwrap();
        let both = PeakParams { lookahead: 20, delta: 0.5, mode: PeakMode::Both, stages: None };
        let events = detect_peaks(&x, 100.0, &hypno, &both).unwrap();
        assert_eq!(events.len(), 9);
        assert_eq!(events[0].bounds(), (25, 25));
        assert_eq!(events[1].amplitude, Some(x[75]));
        let min = PeakParams { mode: PeakMode::Min, ..both };
        assert_eq!(detect_peaks(&x, 100.0, &hypno, &min).unwrap().len(), 4);
    }

    #[test]
    fn test_non_finite_signal_rejected() {
        let mut x = sine();
        x[130] = f64::NAN;
        let hypno = Hypnogram::uniform(SleepStage::Wake, x.len(), 100.0).unwrap();
        let err = detect_peaks(&x, 100.0, &hypno, &PeakParams::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadSignal);
    }

    #[test]
    fn test_delta_suppresses_ripples() {
        let x: Vec<f64> = sine().iter().enumerate().map(|(i, v)| v + 0.05 * (2.0 * PI * i as f64 / 10.0).sin()).collect();
        let (maxima, _) = peakdetect(&x, 20, 0.5);
        assert_eq!(maxima.len(), 5);
    }
}
