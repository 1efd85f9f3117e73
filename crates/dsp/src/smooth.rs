//! Envelope smoothing and masked statistics shared by the threshold detectors.

/// Window length in samples for a duration in milliseconds, at least one sample.
pub fn samples_from_ms(ms: f64, sf: f64) -> usize {
    ((ms / 1000.0 * sf).round() as usize).max(1)
}

/// Trailing mean: `out[i]` averages `x[i + 1 - w ..= i]`, shorter at the start.
pub fn moving_average(x: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(x.len());
    let mut acc = 0.0;
    for (i, &v) in x.iter().enumerate() {
        acc += v;
        if i >= window {
            acc -= x[i - window];
        }
        out.push(acc / (i + 1).min(window) as f64);
    }
    out
}

/// Moves samples `k` positions earlier, repeating the last value at the tail.
pub fn shift_left(x: &[f64], k: usize) -> Vec<f64> {
    if k == 0 || x.is_empty() {
        return x.to_vec();
    }
    let last = x[x.len() - 1];
    x.iter().skip(k).copied().chain(std::iter::repeat(last)).take(x.len()).collect()
}

/// Trailing mean with its `(w - 1) / 2` sample group delay removed.
pub fn centered_moving_average(x: &[f64], window: usize) -> Vec<f64> {
    shift_left(&moving_average(x, window), window.saturating_sub(1) / 2)
}

/// `|x[i] - x[i - lag]|`, zero for the first `lag` samples.
pub fn lagged_abs_diff(x: &[f64], lag: usize) -> Vec<f64> {
    (0..x.len()).map(|i| if i >= lag { (x[i] - x[i - lag]).abs() } else { 0.0 }).collect()
}

/// Mean and population standard deviation over the samples where `mask` is set.
pub fn masked_mean_std(x: &[f64], mask: &[bool]) -> Option<(f64, f64)> {
    let (mut n, mut sum) = (0usize, 0.0);
    for (v, _) in x.iter().zip(mask).filter(|(_, m)| **m) {
        n += 1;
        sum += v;
    }
    if n == 0 {
        return None;
    }
    let mean = sum / n as f64;
    let var = x.iter().zip(mask).filter(|(_, m)| **m).map(|(v, _)| (v - mean).powi(2)).sum::<f64>() / n as f64;
    Some((mean, var.sqrt()))
}

pub fn mean_std(x: &[f64]) -> Option<(f64, f64)> {
    masked_mean_std(x, &vec![true; x.len()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moving_average_trailing() {
        let y = moving_average(&[3.0, 3.0, 6.0, 6.0], 2);
        assert_eq!(y, vec![3.0, 3.0, 4.5, 6.0]);
    }

    #[test]
    fn test_centered_average_removes_delay() {
        let mut x = vec![0.0; 21];
        x[10] = 1.0;
        let y = centered_moving_average(&x, 5);
        let peak = y.iter().cloned().fold(f64::MIN, f64::max);
        let first = y.iter().position(|&v| v == peak).unwrap();
        let last = y.iter().rposition(|&v| v == peak).unwrap();
        assert_eq!((first, last), (8, 12));
    }

    #[test]
    fn test_lagged_diff() {
        assert_eq!(lagged_abs_diff(&[0.0, 1.0, 4.0, 2.0], 2), vec![0.0, 0.0, 4.0, 1.0]);
    }

    #[test]
    fn test_masked_stats() {
        let x = [1.0, 100.0, 3.0, 100.0];
        let mask = [true, false, true, false];
        assert_eq!(masked_mean_std(&x, &mask), Some((2.0, 1.0)));
        assert_eq!(masked_mean_std(&x, &[false; 4]), None);
        assert_eq!(samples_from_ms(100.0, 256.0), 26);
        assert_eq!(samples_from_ms(0.1, 100.0), 1);
    }
}
