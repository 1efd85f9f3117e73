//! Baseline normalization of time-frequency maps.

use sleep_types::{Normalization, SleepError, SleepResult, TfMap};

/// Normalizes every frequency row of `map` against its statistics in the baseline
/// window `[t0, t1)` seconds.
///
/// `Normalization::None` returns the map unchanged and ignores the window.
pub fn normalize(map: &TfMap, method: Normalization, baseline: (f64, f64)) -> SleepResult<TfMap> {
    if method == Normalization::None {
        let mut out = map.clone();
        out.normalization = Normalization::None;
        out.baseline = None;
        return Ok(out);
    }
    let (t0, t1) = baseline;
    let cols = map.time_columns(t0, t1);
    if cols.is_empty() {
        return Err(SleepError::EmptyBaseline { start: t0, end: t1 });
    }

    let mut out = map.clone();
    for (row_idx, mut row) in out.values.outer_iter_mut().enumerate() {
        let base: Vec<f64> = row.iter().skip(cols.start).take(cols.len()).copied().collect();
        let mean = base.iter().sum::<f64>() / base.len() as f64;
        let std = (base.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / base.len() as f64).sqrt();
        let degenerate = match method {
            Normalization::ZScore => std == 0.0,
            _ => mean == 0.0,
        };
        if degenerate {
            return Err(SleepError::BadParam(format!(
                "baseline is degenerate at {} Hz for {:?} normalization",
                map.freqs[row_idx], method
            )));
        }
        row.mapv_inplace(|v| match method {
            Normalization::ZScore => (v - mean) / std,
            Normalization::Divisive => v / mean,
            Normalization::Decibel => 10.0 * (v / mean).log10(),
            Normalization::PercentChange => (v - mean) / mean * 100.0,
            Normalization::None => v,
        });
    }
    out.normalization = method;
    out.baseline = Some(baseline);
    Ok(out)
}
