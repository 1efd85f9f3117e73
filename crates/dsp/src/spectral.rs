//! Spectral estimates: STFT spectrogram, Welch and multitaper PSD, Hilbert envelope.

use apodize::{blackman_iter, hamming_iter, hanning_iter};
use ndarray::Array2;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use sleep_types::{ensure_finite, SleepError, SleepResult, TfMap};
use std::f64::consts::PI;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    #[default]
    Hann,
    Hamming,
    Blackman,
    Rectangular,
}

impl Window {
    /// Periodic (DFT-even) window of length `n`: the symmetric window of length
    /// `n + 1` without its last sample.
    pub fn coefficients(&self, n: usize) -> Vec<f64> {
        match self {
            Window::Hann => hanning_iter(n + 1).take(n).collect(),
            Window::Hamming => hamming_iter(n + 1).take(n).collect(),
            Window::Blackman => blackman_iter(n + 1).take(n).collect(),
            Window::Rectangular => vec![1.0; n],
        }
    }
}

/// STFT parameters. `nfft` and `overlap` are in samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrogramParams {
    pub nfft: usize,
    pub overlap: usize,
    pub f_start: f64,
    pub f_end: f64,
    pub window: Window,
}

impl Default for SpectrogramParams {
    fn default() -> Self {
        Self { nfft: 256, overlap: 128, f_start: 0.5, f_end: 20.0, window: Window::Hann }
    }
}

impl SpectrogramParams {
    pub fn validate(&self) -> SleepResult<()> {
        if self.nfft < 2 {
            return Err(SleepError::BadParam(format!("nfft must be at least 2, got {}", self.nfft)));
        }
        if self.overlap >= self.nfft {
            return Err(SleepError::BadParam(format!(
                "overlap {} must be smaller than nfft {}",
                self.overlap, self.nfft
            )));
        }
        if !(self.f_start.is_finite() && self.f_end.is_finite()) || self.f_start < 0.0 || self.f_start >= self.f_end {
            return Err(SleepError::BadParam(format!(
                "frequency range [{}, {}] is invalid",
                self.f_start, self.f_end
            )));
        }
        Ok(())
    }
}

/// One-sided power spectral density.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Psd {
    pub freqs: Vec<f64>,
    pub power: Vec<f64>,
}

impl Psd {
    /// Absolute power in `[low, high]` Hz (rectangle rule over the bins).
    pub fn band_power(&self, low: f64, high: f64) -> f64 {
        let df = if self.freqs.len() > 1 { self.freqs[1] - self.freqs[0] } else { 0.0 };
        self.freqs
            .iter()
            .zip(&self.power)
            .filter(|(f, _)| **f >= low && **f <= high)
            .map(|(_, p)| p * df)
            .sum()
    }

    /// Frequency of the largest bin.
    pub fn peak_frequency(&self) -> Option<f64> {
        self.power
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| self.freqs[i])
    }
}

/// Density-scaled one-sided periodogram for fixed-length segments.
struct Periodogram {
    nfft: usize,
    window: Vec<f64>,
    scale: f64,
    fft: Arc<dyn Fft<f64>>,
}

impl Periodogram {
    fn new(nfft: usize, window: Vec<f64>, sf: f64) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        let s2: f64 = window.iter().map(|w| w * w).sum();
        Self { nfft, window, scale: 1.0 / (sf * s2), fft: planner.plan_fft_forward(nfft) }
    }

    fn n_bins(&self) -> usize {
        self.nfft / 2 + 1
    }

    /// Density for bins `0..=nfft/2`; `detrend` removes the segment mean first.
    fn segment(&self, segment: &[f64], detrend: bool) -> Vec<f64> {
        let mean = if detrend { segment.iter().sum::<f64>() / segment.len() as f64 } else { 0.0 };
        let mut buffer: Vec<Complex<f64>> = segment
            .iter()
            .zip(&self.window)
            .map(|(v, w)| Complex::new((v - mean) * w, 0.0))
            .collect();
        self.fft.process(&mut buffer);
        (0..self.n_bins())
            .map(|k| {
                let one_sided = if k == 0 || (self.nfft % 2 == 0 && k == self.nfft / 2) { 1.0 } else { 2.0 };
                buffer[k].norm_sqr() * self.scale * one_sided
            })
            .collect()
    }
}

fn segment_starts(n: usize, nperseg: usize, step: usize) -> impl Iterator<Item = usize> {
    (0..).map(move |k| k * step).take_while(move |s| s + nperseg <= n)
}

/// Short-time Fourier power map, trimmed to `[f_start, f_end]`.
///
/// Time stamps are segment centres in seconds from the first sample.
pub fn spectrogram(x: &[f64], sf: f64, params: &SpectrogramParams) -> SleepResult<TfMap> {
    params.validate()?;
    ensure_finite(x, "signal")?;
    if x.len() < params.nfft {
        return Err(SleepError::ShortSignal { n_samples: x.len(), required: params.nfft });
    }
    let step = params.nfft - params.overlap;
    let periodogram = Periodogram::new(params.nfft, params.window.coefficients(params.nfft), sf);
    let bins: Vec<usize> = (0..periodogram.n_bins())
        .filter(|&k| {
            let f = k as f64 * sf / params.nfft as f64;
            f >= params.f_start && f <= params.f_end
        })
        .collect();
    if bins.is_empty() {
        return Err(SleepError::BadParam(format!(
            "no frequency bin in [{}, {}] Hz at resolution {} Hz",
            params.f_start,
            params.f_end,
            sf / params.nfft as f64
        )));
    }
    let starts: Vec<usize> = segment_starts(x.len(), params.nfft, step).collect();
    let mut values = Array2::<f64>::zeros((bins.len(), starts.len()));
    for (col, &start) in starts.iter().enumerate() {
        let power = periodogram.segment(&x[start..start + params.nfft], false);
        for (row, &k) in bins.iter().enumerate() {
            values[[row, col]] = power[k];
        }
    }
    let freqs = bins.iter().map(|&k| k as f64 * sf / params.nfft as f64).collect();
    let time = starts.iter().map(|&s| (s as f64 + params.nfft as f64 / 2.0) / sf).collect();
    debug!(freqs = bins.len(), segments = starts.len(), "computed spectrogram");
    TfMap::new(freqs, time, values)
}

/// Welch PSD: mean of mean-removed windowed periodograms.
pub fn welch(x: &[f64], sf: f64, nperseg: usize, noverlap: usize, window: Window) -> SleepResult<Psd> {
    ensure_finite(x, "signal")?;
    if nperseg < 2 || noverlap >= nperseg {
        return Err(SleepError::BadParam(format!("invalid welch segmentation {} / {}", nperseg, noverlap)));
    }
    if x.len() < nperseg {
        return Err(SleepError::ShortSignal { n_samples: x.len(), required: nperseg });
    }
    let periodogram = Periodogram::new(nperseg, window.coefficients(nperseg), sf);
    let mut power = vec![0.0; periodogram.n_bins()];
    let mut count = 0usize;
    for start in segment_starts(x.len(), nperseg, nperseg - noverlap) {
        for (acc, p) in power.iter_mut().zip(periodogram.segment(&x[start..start + nperseg], true)) {
            *acc += p;
        }
        count += 1;
    }
    power.iter_mut().for_each(|p| *p /= count as f64);
    let freqs = (0..power.len()).map(|k| k as f64 * sf / nperseg as f64).collect();
    Ok(Psd { freqs, power })
}

/// Sine tapers `sqrt(2/(N+1)) sin(pi k (n+1)/(N+1))`, `k = 1..=n_tapers`.
pub fn sine_tapers(n: usize, n_tapers: usize) -> Vec<Vec<f64>> {
    let norm = (2.0 / (n as f64 + 1.0)).sqrt();
    (1..=n_tapers)
        .map(|k| {
            (0..n)
                .map(|i| norm * (PI * k as f64 * (i as f64 + 1.0) / (n as f64 + 1.0)).sin())
                .collect()
        })
        .collect()
}

/// Multitaper PSD over the whole signal with `n_tapers` sine tapers.
pub fn multitaper_psd(x: &[f64], sf: f64, n_tapers: usize) -> SleepResult<Psd> {
    ensure_finite(x, "signal")?;
    if n_tapers == 0 {
        return Err(SleepError::BadParam("at least one taper is required".into()));
    }
    if x.len() < 2 {
        return Err(SleepError::ShortSignal { n_samples: x.len(), required: 2 });
    }
    let n = x.len();
    let mean = x.iter().sum::<f64>() / n as f64;
    let centred: Vec<f64> = x.iter().map(|v| v - mean).collect();
    let mut power = vec![0.0; n / 2 + 1];
    for taper in sine_tapers(n, n_tapers) {
        let periodogram = Periodogram::new(n, taper, sf);
        for (acc, p) in power.iter_mut().zip(periodogram.segment(&centred, false)) {
            *acc += p / n_tapers as f64;
        }
    }
    let freqs = (0..power.len()).map(|k| k as f64 * sf / n as f64).collect();
    Ok(Psd { freqs, power })
}

/// Magnitude of the analytic signal.
pub fn hilbert_envelope(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    if n == 0 {
        return Vec::new();
    }
    let mut planner = FftPlanner::<f64>::new();
    let mut buffer: Vec<Complex<f64>> = x.iter().map(|&v| Complex::new(v, 0.0)).collect();
    planner.plan_fft_forward(n).process(&mut buffer);
    for (k, c) in buffer.iter_mut().enumerate() {
        let h = if k == 0 || (n % 2 == 0 && k == n / 2) {
            1.0
        } else if k < (n + 1) / 2 {
            2.0
        } else {
            0.0
        };
        *c *= h;
    }
    planner.plan_fft_inverse(n).process(&mut buffer);
    buffer.iter().map(|c| c.norm() / n as f64).collect()
}
