//! Calibration and interval post-processing shared by the threshold detectors.

use sleep_dsp::smooth::masked_mean_std;
use sleep_types::{intervals_from_mask, Event, Hypnogram, SleepError, SleepResult, StageSet};

/// Per-sample allowed flags for `stages`, or all `true` when unrestricted.
///
/// Fails with `EmptyStageMask` when the restriction leaves no sample.
pub fn allowed_mask(hypno: &Hypnogram, stages: Option<StageSet>, n_samples: usize) -> SleepResult<Vec<bool>> {
    if hypno.len() != n_samples {
        return Err(SleepError::InvalidInput(format!(
            "hypnogram has {} samples, signal has {}",
            hypno.len(),
            n_samples
        )));
    }
    match stages {
        None => Ok(vec![true; n_samples]),
        Some(set) => {
            let mask = hypno.mask(set);
            if mask.iter().any(|&m| m) {
                Ok(mask)
            } else {
                Err(SleepError::EmptyStageMask(format!("no sample in stages {}", set)))
            }
        }
    }
}

/// `(mean, std)` of `values` over the allowed samples.
pub fn calibrate(values: &[f64], allowed: &[bool]) -> SleepResult<(f64, f64)> {
    masked_mean_std(values, allowed)
        .ok_or_else(|| SleepError::EmptyStageMask("no allowed sample to calibrate the threshold".into()))
}

/// Runs of samples both above threshold and allowed.
pub fn runs_within(above: &[bool], allowed: &[bool]) -> Vec<(usize, usize)> {
    let both: Vec<bool> = above.iter().zip(allowed).map(|(a, b)| *a && *b).collect();
    intervals_from_mask(&both)
}

/// Merges neighbours separated by fewer than `gap` samples, provided every sample of
/// the gap is allowed so a merged interval never leaves the stage class.
pub fn merge_close(intervals: Vec<(usize, usize)>, gap: usize, allowed: &[bool]) -> Vec<(usize, usize)> {
    let mut out: Vec<(usize, usize)> = Vec::with_capacity(intervals.len());
    for (start, end) in intervals {
        match out.last_mut() {
            Some(last) if start - last.1 < gap && allowed[last.1..start].iter().all(|&a| a) => last.1 = end,
            _ => out.push((start, end)),
        }
    }
    out
}

/// Keeps intervals whose duration in seconds lies in `[min_s, max_s]`.
pub fn filter_duration(intervals: Vec<(usize, usize)>, sf: f64, min_s: f64, max_s: f64) -> Vec<(usize, usize)> {
    intervals
        .into_iter()
        .filter(|(s, e)| {
            let d = (e - s) as f64 / sf;
            d >= min_s && d <= max_s
        })
        .collect()
}

/// Peak-to-peak amplitude of `x[start..end]`.
pub fn peak_to_peak(x: &[f64], start: usize, end: usize) -> f64 {
    let seg = &x[start..end];
    let max = seg.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min = seg.iter().cloned().fold(f64::INFINITY, f64::min);
    max - min
}

/// Canonical event list: degenerate `(i, i)` widened to `(i, i + 1)`, sorted by start,
/// overlapping neighbours merged. Bounds past `n_samples` are rejected.
pub fn canonical_events(mut events: Vec<Event>, n_samples: usize) -> SleepResult<Vec<Event>> {
    for ev in events.iter_mut() {
        if ev.end == ev.start {
            ev.end = ev.start + 1;
        }
        if ev.end < ev.start || ev.end > n_samples {
            return Err(SleepError::InvalidInput(format!(
                "interval ({}, {}) is outside a signal of {} samples",
                ev.start, ev.end, n_samples
            )));
        }
    }
    events.sort_by_key(|e| (e.start, e.end));
    let mut out: Vec<Event> = Vec::with_capacity(events.len());
    for ev in events {
        match out.last_mut() {
            Some(last) if ev.start < last.end => last.end = last.end.max(ev.end),
            _ => out.push(ev),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sleep_types::{ErrorKind, SleepStage};

    #[test]
    fn test_allowed_mask_empty() {
        let hypno = Hypnogram::uniform(SleepStage::Wake, 10, 1.0).unwrap();
        let err = allowed_mask(&hypno, Some(StageSet::nrem()), 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyStageMask);
        assert_eq!(allowed_mask(&hypno, None, 10).unwrap(), vec![true; 10]);
        assert_eq!(allowed_mask(&hypno, None, 11).unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_merge_respects_stage_gaps() {
        let allowed = vec![true, true, true, true, false, true, true, true, true, true];
        let merged = merge_close(vec![(0, 2), (3, 4), (6, 8)], 3, &allowed);
        // (3, 4) -> (6, 8) would cross the disallowed sample 4
        assert_eq!(merged, vec![(0, 4), (6, 8)]);
    }

    #[test]
    fn test_filter_duration_inclusive() {
        let kept = filter_duration(vec![(0, 50), (100, 200), (300, 701)], 100.0, 0.5, 4.0);
        assert_eq!(kept, vec![(0, 50), (100, 200)]);
    }

    #[test]
    fn test_canonical_events() {
        let events = vec![Event::new(30, 30), Event::new(10, 20), Event::new(15, 25)];
        let out = canonical_events(events, 100).unwrap();
        assert_eq!(out.iter().map(Event::bounds).collect::<Vec<_>>(), vec![(10, 25), (30, 31)]);
        assert!(canonical_events(vec![Event::new(90, 120)], 100).is_err());
    }

    proptest! {
        #[test]
        fn prop_canonical_events_sorted_and_disjoint(raw in proptest::collection::vec((0usize..500, 0usize..40), 0..60)) {
            let events: Vec<Event> = raw.into_iter().map(|(s, len)| Event::new(s, s + len)).collect();
            let out = canonical_events(events, 540).unwrap();
            for w in out.windows(2) {
                prop_assert!(w[0].end <= w[1].start);
            }
            for e in &out {
                prop_assert!(e.start < e.end);
            }
        }
    }
}
