//! Zero-phase IIR filtering with cascaded second-order sections.

use biquad::{Coefficients, ToHertz, Type};
use serde::{Deserialize, Serialize};
use sleep_types::{ensure_finite, SleepError, SleepResult};
use std::f64::consts::PI;
use std::sync::Arc;
use tracing::debug;

use crate::design::{self, Zpk};

/// Highest order accepted by [`FilterSpec::validate`].
pub const MAX_ORDER: usize = 16;

fn default_notch_q() -> f64 {
    30.0
}

fn default_ripple_db() -> f64 {
    1.0
}

fn default_attenuation_db() -> f64 {
    40.0
}

fn default_order() -> usize {
    4
}

/// Which part of the spectrum is kept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Band {
    Lowpass { cutoff: f64 },
    Highpass { cutoff: f64 },
    Bandpass { low: f64, high: f64 },
    Bandstop { low: f64, high: f64 },
    /// Single biquad notch; `order` and `method` are ignored.
    Notch {
        freq: f64,
        #[serde(default = "default_notch_q")]
        q: f64,
    },
}

/// Analog prototype family.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterMethod {
    #[default]
    Butterworth,
    Bessel,
    Chebyshev1 {
        #[serde(default = "default_ripple_db")]
        ripple_db: f64,
    },
    Chebyshev2 {
        #[serde(default = "default_attenuation_db")]
        attenuation_db: f64,
    },
}

impl FilterMethod {
    fn prototype(&self, order: usize) -> Zpk {
        match *self {
            FilterMethod::Butterworth => design::butterworth(order),
            FilterMethod::Bessel => design::bessel(order),
            FilterMethod::Chebyshev1 { ripple_db } => design::chebyshev1(order, ripple_db),
            FilterMethod::Chebyshev2 { attenuation_db } => design::chebyshev2(order, attenuation_db),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub band: Band,
    #[serde(default = "default_order")]
    pub order: usize,
    #[serde(default)]
    pub method: FilterMethod,
}

impl FilterSpec {
    pub fn lowpass(cutoff: f64, order: usize) -> Self {
        Self { band: Band::Lowpass { cutoff }, order, method: FilterMethod::Butterworth }
    }

    pub fn highpass(cutoff: f64, order: usize) -> Self {
        Self { band: Band::Highpass { cutoff }, order, method: FilterMethod::Butterworth }
    }

    pub fn bandpass(low: f64, high: f64, order: usize) -> Self {
        Self { band: Band::Bandpass { low, high }, order, method: FilterMethod::Butterworth }
    }

    pub fn bandstop(low: f64, high: f64, order: usize) -> Self {
        Self { band: Band::Bandstop { low, high }, order, method: FilterMethod::Butterworth }
    }

    pub fn notch(freq: f64, q: f64) -> Self {
        Self { band: Band::Notch { freq, q }, order: 2, method: FilterMethod::Butterworth }
    }

    pub fn with_method(mut self, method: FilterMethod) -> Self {
        self.method = method;
        self
    }

    /// Checks cutoffs against the Nyquist frequency and the design parameters.
    pub fn validate(&self, sf: f64) -> SleepResult<()> {
        if !(sf.is_finite() && sf > 0.0) {
            return Err(SleepError::BadParam(format!("sampling frequency must be positive, got {}", sf)));
        }
        let nyquist = sf / 2.0;
        let check_freq = |name: &str, f: f64| -> SleepResult<()> {
            if f.is_finite() && f > 0.0 && f < nyquist {
                Ok(())
            } else {
                Err(SleepError::BadParam(format!("{} {} Hz must lie in (0, {}) Hz", name, f, nyquist)))
            }
        };
        match self.band {
            Band::Lowpass { cutoff } | Band::Highpass { cutoff } => check_freq("cutoff", cutoff)?,
            Band::Bandpass { low, high } | Band::Bandstop { low, high } => {
                check_freq("low cutoff", low)?;
                check_freq("high cutoff", high)?;
                if low >= high {
                    return Err(SleepError::BadParam(format!(
                        "low cutoff {} Hz must be below high cutoff {} Hz",
                        low, high
                    )));
                }
            }
            Band::Notch { freq, q } => {
                check_freq("notch frequency", freq)?;
                if !(q.is_finite() && q > 0.0) {
                    return Err(SleepError::BadParam(format!("notch q must be positive, got {}", q)));
                }
                return Ok(());
            }
        }
        if self.order == 0 || self.order > MAX_ORDER {
            return Err(SleepError::BadParam(format!("filter order must be in 1..={}, got {}", MAX_ORDER, self.order)));
        }
        match self.method {
            FilterMethod::Chebyshev1 { ripple_db } if !(ripple_db.is_finite() && ripple_db > 0.0) => {
                Err(SleepError::BadParam(format!("passband ripple must be positive, got {} dB", ripple_db)))
            }
            FilterMethod::Chebyshev2 { attenuation_db } if !(attenuation_db.is_finite() && attenuation_db > 0.0) => {
                Err(SleepError::BadParam(format!(
                    "stopband attenuation must be positive, got {} dB",
                    attenuation_db
                )))
            }
            _ => Ok(()),
        }
    }

    /// Designs the digital filter for sampling frequency `sf`.
    pub fn design(&self, sf: f64) -> SleepResult<SosFilter> {
        self.validate(sf)?;
        let warp = |f: f64| 2.0 * sf * (PI * f / sf).tan();
        let prototype = self.method.prototype(self.order);
        let analog = match self.band {
            Band::Lowpass { cutoff } => prototype.to_lowpass(warp(cutoff)),
            Band::Highpass { cutoff } => prototype.to_highpass(warp(cutoff)),
            Band::Bandpass { low, high } => {
                let (lo, hi) = (warp(low), warp(high));
                prototype.to_bandpass((lo * hi).sqrt(), hi - lo)
            }
            Band::Bandstop { low, high } => {
                let (lo, hi) = (warp(low), warp(high));
                prototype.to_bandstop((lo * hi).sqrt(), hi - lo)
            }
            Band::Notch { freq, q } => {
                let coeffs = Coefficients::<f64>::from_params(Type::Notch, sf.hz(), freq.hz(), q)
                    .map_err(|e| SleepError::BadParam(format!("notch design failed: {:?}", e)))?;
                return Ok(SosFilter::new(vec![coeffs]));
            }
        };
        let sections = analog.bilinear(sf).to_sos();
        debug!(order = self.order, sections = sections.len(), "designed filter {:?}", self.band);
        Ok(SosFilter::new(sections))
    }
}

/// Direct Form II transposed biquad state.
#[derive(Clone, Debug, Default)]
struct SectionState {
    z1: f64,
    z2: f64,
}

impl SectionState {
    fn process(&mut self, c: &Coefficients<f64>, x: f64) -> f64 {
        let y = c.b0 * x + self.z1;
        self.z1 = c.b1 * x - c.a1 * y + self.z2;
        self.z2 = c.b2 * x - c.a2 * y;
        y
    }
}

/// A cascade of second-order sections (`a0` normalized to 1).
#[derive(Clone, Debug)]
pub struct SosFilter {
    sections: Vec<Coefficients<f64>>,
}

impl SosFilter {
    pub fn new(sections: Vec<Coefficients<f64>>) -> Self {
        Self { sections }
    }

    pub fn sections(&self) -> &[Coefficients<f64>] {
        &self.sections
    }

    /// Edge padding used by [`SosFilter::filtfilt`].
    pub fn padlen(&self) -> usize {
        3 * (2 * self.sections.len() + 1)
    }

    /// Per-section state for a unit step in steady state.
    pub fn zi(&self) -> Vec<(f64, f64)> {
        let mut scale = 1.0;
        self.sections
            .iter()
            .map(|c| {
                let gain = (c.b0 + c.b1 + c.b2) / (1.0 + c.a1 + c.a2);
                let z2 = c.b2 - c.a2 * gain;
                let z1 = c.b1 - c.a1 * gain + z2;
                let state = (z1 * scale, z2 * scale);
                scale *= gain;
                state
            })
            .collect()
    }

    fn run(&self, x: &[f64], initial: Option<(&[(f64, f64)], f64)>) -> Vec<f64> {
        let mut states: Vec<SectionState> = match initial {
            Some((zi, x0)) => zi.iter().map(|&(z1, z2)| SectionState { z1: z1 * x0, z2: z2 * x0 }).collect(),
            None => vec![SectionState::default(); self.sections.len()],
        };
        x.iter()
            .map(|&v| {
                self.sections
                    .iter()
                    .zip(states.iter_mut())
                    .fold(v, |acc, (c, state)| state.process(c, acc))
            })
            .collect()
    }

    /// Causal filtering from rest.
    pub fn filter(&self, x: &[f64]) -> Vec<f64> {
        self.run(x, None)
    }

    /// Forward-backward filtering with odd extension at both edges.
    pub fn filtfilt(&self, x: &[f64]) -> SleepResult<Vec<f64>> {
        ensure_finite(x, "signal")?;
        let n = x.len();
        let padlen = self.padlen();
        if n <= padlen {
            return Err(SleepError::ShortSignal { n_samples: n, required: padlen + 1 });
        }

        let mut ext = Vec::with_capacity(n + 2 * padlen);
        ext.extend((1..=padlen).rev().map(|i| 2.0 * x[0] - x[i]));
        ext.extend_from_slice(x);
        ext.extend((1..=padlen).map(|i| 2.0 * x[n - 1] - x[n - 1 - i]));

        let zi = self.zi();
        let mut y = self.run(&ext, Some((&zi, ext[0])));
        y.reverse();
        let y0 = y[0];
        let mut y = self.run(&y, Some((&zi, y0)));
        y.reverse();
        Ok(y[padlen..padlen + n].to_vec())
    }

    /// Magnitude response at each frequency in `freqs` (Hz).
    pub fn magnitude_response(&self, freqs: &[f64], sf: f64) -> Vec<f64> {
        freqs
            .iter()
            .map(|&f| {
                let w = 2.0 * PI * f / sf;
                let (c1, s1, c2, s2) = (w.cos(), w.sin(), (2.0 * w).cos(), (2.0 * w).sin());
                self.sections.iter().fold(1.0, |acc, c| {
                    let num = ((c.b0 + c.b1 * c1 + c.b2 * c2).powi(2) + (c.b1 * s1 + c.b2 * s2).powi(2)).sqrt();
                    let den = ((1.0 + c.a1 * c1 + c.a2 * c2).powi(2) + (c.a1 * s1 + c.a2 * s2).powi(2)).sqrt();
                    acc * num / den
                })
            })
            .collect()
    }
}

/// Zero-phase filtering of `signal` sampled at `sf`.
///
/// Fails with `InvalidFilterOrder` when `order >= N / 3`, `BadSignal` on non-finite samples
/// and `BadParam` on an unrealizable design.
pub fn filtfilt(signal: &[f64], sf: f64, spec: &FilterSpec) -> SleepResult<Vec<f64>> {
    if !matches!(spec.band, Band::Notch { .. }) && spec.order * 3 >= signal.len() {
        return Err(SleepError::InvalidFilterOrder { order: spec.order, n_samples: signal.len() });
    }
    ensure_finite(signal, "signal")?;
    spec.design(sf)?.filtfilt(signal)
}

/// Causal (single pass) filtering of `signal`.
pub fn lfilter(signal: &[f64], sf: f64, spec: &FilterSpec) -> SleepResult<Vec<f64>> {
    ensure_finite(signal, "signal")?;
    Ok(spec.design(sf)?.filter(signal))
}

/// Removes the mean.
pub fn demean(signal: &[f64]) -> Vec<f64> {
    if signal.is_empty() {
        return Vec::new();
    }
    let mean = signal.iter().sum::<f64>() / signal.len() as f64;
    signal.iter().map(|v| v - mean).collect()
}

/// Removes the least-squares line.
pub fn detrend(signal: &[f64]) -> Vec<f64> {
    let n = signal.len();
    if n < 2 {
        return demean(signal);
    }
    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = signal.iter().sum::<f64>() / nf;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, y) in signal.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }
    let slope = sxy / sxx;
    signal
        .iter()
        .enumerate()
        .map(|(i, y)| y - (mean_y + slope * (i as f64 - mean_x)))
        .collect()
}

/// Designed filters keyed by spec and sampling frequency, shared across channels.
#[derive(Debug, Default)]
pub struct FilterBank {
    cache: Vec<(FilterSpec, u64, Arc<SosFilter>)>,
}

impl FilterBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, spec: &FilterSpec, sf: f64) -> SleepResult<Arc<SosFilter>> {
        let key = sf.to_bits();
        if let Some((_, _, sos)) = self.cache.iter().find(|(s, k, _)| s == spec && *k == key) {
            return Ok(Arc::clone(sos));
        }
        let sos = Arc::new(spec.design(sf)?);
        self.cache.push((*spec, key, Arc::clone(&sos)));
        Ok(sos)
    }

    /// Same contract as [`filtfilt`], reusing cached designs.
    pub fn filtfilt(&mut self, signal: &[f64], sf: f64, spec: &FilterSpec) -> SleepResult<Vec<f64>> {
        if !matches!(spec.band, Band::Notch { .. }) && spec.order * 3 >= signal.len() {
            return Err(SleepError::InvalidFilterOrder { order: spec.order, n_samples: signal.len() });
        }
        ensure_finite(signal, "signal")?;
        self.get(spec, sf)?.filtfilt(signal)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sleep_types::ErrorKind;

    fn sine(freq: f64, sf: f64, n: usize, amp: f64) -> Vec<f64> {
        (0..n).map(|i| amp * (2.0 * PI * freq * i as f64 / sf).sin()).collect()
    }

    fn rms(x: &[f64]) -> f64 {
        (x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64).sqrt()
    }

    #[test]
    fn test_passband_preserved_stopband_removed() {
        let sf = 200.0;
        let n = 4000;
        let spec = FilterSpec::bandpass(12.0, 14.0, 2);
        let pass = filtfilt(&sine(13.0, sf, n, 10.0), sf, &spec).unwrap();
        let stop = filtfilt(&sine(40.0, sf, n, 10.0), sf, &spec).unwrap();
        let mid = 1000..3000;
        assert!((rms(&pass[mid.clone()]) - 10.0 / 2f64.sqrt()).abs() < 0.2);
        assert!(rms(&stop[mid]) < 0.05);
    }

    #[test]
    fn test_zero_phase() {
        let sf = 100.0;
        let x = sine(2.0, sf, 2000, 1.0);
        let y = filtfilt(&x, sf, &FilterSpec::lowpass(10.0, 4)).unwrap();
        for i in 500..1500 {
            assert!((x[i] - y[i]).abs() < 1e-3, "sample {} differs", i);
        }
    }

    #[test]
    fn test_constant_signal_passes_lowpass_unchanged() {
        let x = vec![3.5; 300];
        let y = filtfilt(&x, 100.0, &FilterSpec::lowpass(5.0, 3)).unwrap();
        assert!(y.iter().all(|v| (v - 3.5).abs() < 1e-9));
    }

    #[test]
    fn test_order_too_high_for_length() {
        let x = vec![0.0; 30];
        let err = filtfilt(&x, 100.0, &FilterSpec::lowpass(10.0, 10)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFilterOrder);
    }

    #[test]
    fn test_nan_rejected() {
        let mut x = vec![0.0; 500];
        x[17] = f64::NAN;
        let err = filtfilt(&x, 100.0, &FilterSpec::lowpass(10.0, 2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadSignal);
    }

    #[test]
    fn test_cutoff_above_nyquist() {
        let err = filtfilt(&vec![0.0; 500], 100.0, &FilterSpec::lowpass(60.0, 2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadParam);
        let err = filtfilt(&vec![0.0; 500], 100.0, &FilterSpec::bandpass(10.0, 5.0, 2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadParam);
    }

    #[test]
    fn test_methods_reach_stopband() {
        let sf = 250.0;
        let methods = [
            FilterMethod::Butterworth,
            FilterMethod::Bessel,
            FilterMethod::Chebyshev1 { ripple_db: 0.5 },
            FilterMethod::Chebyshev2 { attenuation_db: 40.0 },
        ];
        for method in methods {
            let sos = FilterSpec::lowpass(20.0, 4).with_method(method).design(sf).unwrap();
            let h = sos.magnitude_response(&[1.0, 80.0], sf);
            assert!(h[0] > 0.85 && h[0] < 1.05, "{:?} passband {}", method, h[0]);
            assert!(h[1] < 0.05, "{:?} stopband {}", method, h[1]);
        }
    }

    #[test]
    fn test_highpass_and_bandstop_responses() {
        let sf = 256.0;
        let hp = FilterSpec::highpass(10.0, 4).design(sf).unwrap();
        let h = hp.magnitude_response(&[0.5, 60.0], sf);
        assert!(h[0] < 1e-3);
        assert!((h[1] - 1.0).abs() < 1e-3);

        let bs = FilterSpec::bandstop(45.0, 55.0, 2).design(sf).unwrap();
        let h = bs.magnitude_response(&[50.0, 5.0, 100.0], sf);
        assert!(h[0] < 0.2);
        assert!((h[1] - 1.0).abs() < 1e-2);
        assert!((h[2] - 1.0).abs() < 1e-2);
    }

    #[test]
    fn test_notch_removes_line_noise() {
        let sf = 250.0;
        let n = 5000;
        let x: Vec<f64> = sine(50.0, sf, n, 20.0).iter().zip(sine(10.0, sf, n, 5.0)).map(|(a, b)| a + b).collect();
        let y = filtfilt(&x, sf, &FilterSpec::notch(50.0, 30.0)).unwrap();
        let clean = sine(10.0, sf, n, 5.0);
        let err: Vec<f64> = y.iter().zip(&clean).map(|(a, b)| a - b).collect();
        assert!(rms(&err[1000..4000]) < 0.3);
    }

    #[test]
    fn test_filter_bank_caches_designs() {
        let mut bank = FilterBank::new();
        let spec = FilterSpec::bandpass(0.5, 4.0, 2);
        let x = sine(1.0, 100.0, 1000, 1.0);
        let a = bank.filtfilt(&x, 100.0, &spec).unwrap();
        let b = bank.filtfilt(&x, 100.0, &spec).unwrap();
        assert_eq!(a, b);
        assert_eq!(bank.len(), 1);
        bank.get(&spec, 200.0).unwrap();
        assert_eq!(bank.len(), 2);
    }

    #[test]
    fn test_detrend_removes_line() {
        let x: Vec<f64> = (0..100).map(|i| 2.0 * i as f64 + 5.0).collect();
        assert!(detrend(&x).iter().all(|v| v.abs() < 1e-9));
        let d = demean(&[1.0, 2.0, 3.0]);
        assert_eq!(d, vec![-1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_spec_serde() {
        let spec: FilterSpec = serde_json::from_str(
            r#"{"band": {"type": "bandpass", "low": 12.0, "high": 14.0}, "order": 2,
                "method": {"type": "chebyshev1", "ripple_db": 0.5}}"#,
        )
        .unwrap();
        assert_eq!(spec, FilterSpec::bandpass(12.0, 14.0, 2).with_method(FilterMethod::Chebyshev1 { ripple_db: 0.5 }));
        let notch: FilterSpec = serde_json::from_str(r#"{"band": {"type": "notch", "freq": 50.0}}"#).unwrap();
        assert_eq!(notch.band, Band::Notch { freq: 50.0, q: 30.0 });
    }
}
