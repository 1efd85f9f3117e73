//! Continuous Morlet wavelet power.

use ndarray::Array2;
use rustfft::{num_complex::Complex, FftPlanner};
use sleep_types::{ensure_finite, SleepError, SleepResult, TfMap};
use std::f64::consts::PI;

pub const DEFAULT_CYCLES: f64 = 7.0;

/// Complex Morlet wavelet at `freq` Hz, sampled over +/- 3.5 temporal standard deviations.
pub fn morlet_kernel(sf: f64, freq: f64, n_cycles: f64) -> Vec<Complex<f64>> {
    let st = n_cycles / (2.0 * PI * freq);
    let amp = 1.0 / (st * PI.sqrt()).sqrt();
    let half = (3.5 * st * sf).floor() as i64;
    (-half..=half)
        .map(|i| {
            let t = i as f64 / sf;
            Complex::from_polar(amp * (-t * t / (2.0 * st * st)).exp(), 2.0 * PI * freq * t)
        })
        .collect()
}

/// `|x * psi_f|^2`, aligned with the input samples.
pub fn morlet_power(x: &[f64], sf: f64, freq: f64, n_cycles: f64) -> SleepResult<Vec<f64>> {
    ensure_finite(x, "signal")?;
    if !(freq > 0.0 && freq < sf / 2.0) {
        return Err(SleepError::BadParam(format!("wavelet frequency {} Hz outside (0, {}) Hz", freq, sf / 2.0)));
    }
    if !(n_cycles.is_finite() && n_cycles > 0.0) {
        return Err(SleepError::BadParam(format!("number of cycles must be positive, got {}", n_cycles)));
    }
    if x.is_empty() {
        return Err(SleepError::ShortSignal { n_samples: 0, required: 1 });
    }
    let kernel = morlet_kernel(sf, freq, n_cycles);
    let (n, m) = (x.len(), kernel.len());
    let len = n + m - 1;

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(len);
    let mut signal: Vec<Complex<f64>> = x.iter().map(|&v| Complex::new(v, 0.0)).collect();
    signal.resize(len, Complex::new(0.0, 0.0));
    let mut wavelet = kernel;
    wavelet.resize(len, Complex::new(0.0, 0.0));
    forward.process(&mut signal);
    forward.process(&mut wavelet);
    for (s, w) in signal.iter_mut().zip(&wavelet) {
        *s *= w;
    }
    planner.plan_fft_inverse(len).process(&mut signal);

    let offset = (m - 1) / 2;
    let scale = len as f64;
    Ok(signal[offset..offset + n].iter().map(|c| (c / scale).norm_sqr()).collect())
}

/// Morlet power for each frequency in `freqs`, on the sample time axis `i / sf`.
pub fn morlet_map(x: &[f64], sf: f64, freqs: &[f64], n_cycles: f64) -> SleepResult<TfMap> {
    if freqs.is_empty() {
        return Err(SleepError::BadParam("wavelet map needs at least one frequency".into()));
    }
    let mut values = Array2::<f64>::zeros((freqs.len(), x.len()));
    for (row, &f) in freqs.iter().enumerate() {
        let power = morlet_power(x, sf, f, n_cycles)?;
        values.row_mut(row).iter_mut().zip(power).for_each(|(v, p)| *v = p);
    }
    let time = (0..x.len()).map(|i| i as f64 / sf).collect();
    TfMap::new(freqs.to_vec(), time, values).map_err(|_| {
        SleepError::BadParam(format!("wavelet frequencies must be strictly ascending, got {:?}", freqs))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_is_symmetric() {
        let k = morlet_kernel(100.0, 5.0, 7.0);
        assert_eq!(k.len() % 2, 1);
        let mid = k.len() / 2;
        assert!((k[mid].re - k[mid].norm()).abs() < 1e-12);
        assert!((k[0].norm() - k[k.len() - 1].norm()).abs() < 1e-12);
    }

    #[test]
    fn test_map_selects_signal_frequency() {
        let sf = 200.0;
        let x: Vec<f64> = (0..2000).map(|i| (2.0 * PI * 10.0 * i as f64 / sf).sin()).collect();
        let map = morlet_map(&x, sf, &[10.0, 25.0], DEFAULT_CYCLES).unwrap();
        assert_eq!(map.values.dim(), (2, 2000));
        assert!((map.time[1] - 0.005).abs() < 1e-12);
        let mean = |row: usize| map.values.row(row).iter().skip(500).take(1000).sum::<f64>() / 1000.0;
        assert!(mean(0) > 100.0 * mean(1));
        // steady state is flat away from the edges
        let row = map.values.row(0);
        assert!((row[800] - row[1200]).abs() / row[1000] < 0.01);
    }

    #[test]
    fn test_rejects_bad_frequencies() {
        let x = vec![0.0; 100];
        assert!(morlet_map(&x, 100.0, &[], 7.0).is_err());
        assert!(morlet_map(&x, 100.0, &[60.0], 7.0).is_err());
        assert!(morlet_map(&x, 100.0, &[10.0, 5.0], 7.0).is_err());
    }
}
