//! IIR filter design.
//!
//! Analog lowpass prototypes (Butterworth, Chebyshev I/II, Bessel) are expressed as
//! zeros/poles/gain, moved to the requested band with the usual frequency
//! transformations, mapped to the z-plane with the bilinear transform and finally
//! split into second-order sections.

use biquad::Coefficients;
use num_complex::Complex64;
use std::f64::consts::PI;

/// Below this imaginary magnitude a root is treated as real.
const REAL_TOL: f64 = 1e-9;

/// Zeros, poles and gain of a transfer function.
#[derive(Debug, Clone)]
pub struct Zpk {
    pub zeros: Vec<Complex64>,
    pub poles: Vec<Complex64>,
    pub gain: f64,
}

/// Butterworth analog prototype: poles evenly spaced on the left unit half-circle.
pub fn butterworth(order: usize) -> Zpk {
    let n = order as f64;
    let poles = (0..order)
        .map(|k| Complex64::from_polar(1.0, PI * (2.0 * k as f64 + n + 1.0) / (2.0 * n)))
        .collect();
    Zpk { zeros: Vec::new(), poles, gain: 1.0 }
}

/// Chebyshev type I analog prototype with `ripple_db` of passband ripple.
pub fn chebyshev1(order: usize, ripple_db: f64) -> Zpk {
    let n = order as f64;
    let eps = (10f64.powf(0.1 * ripple_db) - 1.0).sqrt();
    let mu = (1.0 / eps).asinh() / n;
    let poles: Vec<Complex64> = (0..order)
        .map(|k| {
            let theta = PI * (2.0 * k as f64 + 1.0) / (2.0 * n);
            Complex64::new(-mu.sinh() * theta.sin(), mu.cosh() * theta.cos())
        })
        .collect();
    let mut gain = poles.iter().fold(Complex64::new(1.0, 0.0), |acc, p| acc * -p).re;
    if order % 2 == 0 {
        gain /= (1.0 + eps * eps).sqrt();
    }
    Zpk { zeros: Vec::new(), poles, gain }
}

/// Chebyshev type II analog prototype with `attenuation_db` of stopband attenuation.
pub fn chebyshev2(order: usize, attenuation_db: f64) -> Zpk {
    let n = order as f64;
    let de = 1.0 / (10f64.powf(0.1 * attenuation_db) - 1.0).sqrt();
    let mu = (1.0 / de).asinh() / n;
    let mut zeros = Vec::with_capacity(order);
    let mut poles = Vec::with_capacity(order);
    for m in (0..order).map(|i| 2 * i as i64 - order as i64 + 1) {
        let angle = m as f64 * PI / (2.0 * n);
        if m != 0 {
            zeros.push(Complex64::new(0.0, 1.0 / angle.sin()));
        }
        let q = -Complex64::from_polar(1.0, angle);
        let q = Complex64::new(mu.sinh() * q.re, mu.cosh() * q.im);
        poles.push(q.inv());
    }
    let num = poles.iter().fold(Complex64::new(1.0, 0.0), |acc, p| acc * -p);
    let den = zeros.iter().fold(Complex64::new(1.0, 0.0), |acc, z| acc * -z);
    Zpk { zeros, poles, gain: (num / den).re }
}

/// Bessel analog prototype, phase-normalized (the phase asymptote midpoint sits at 1 rad/s).
pub fn bessel(order: usize) -> Zpk {
    // Reverse Bessel polynomial, coeffs[k] multiplies s^k; monic.
    let coeffs: Vec<f64> = (0..=order)
        .map(|k| {
            let num = ln_factorial(2 * order - k);
            let den = (order - k) as f64 * 2f64.ln() + ln_factorial(k) + ln_factorial(order - k);
            (num - den).exp()
        })
        .collect();
    let roots = polynomial_roots(&coeffs);
    let scale = coeffs[0].powf(-1.0 / order as f64);
    Zpk { zeros: Vec::new(), poles: roots.into_iter().map(|r| r * scale).collect(), gain: 1.0 }
}

fn ln_factorial(n: usize) -> f64 {
    (2..=n).map(|i| (i as f64).ln()).sum()
}

/// Durand-Kerner iteration for the roots of a monic polynomial.
fn polynomial_roots(coeffs: &[f64]) -> Vec<Complex64> {
    let degree = coeffs.len() - 1;
    let eval = |s: Complex64| coeffs.iter().rev().fold(Complex64::new(0.0, 0.0), |acc, c| acc * s + c);
    let seed = Complex64::new(0.4, 0.9);
    let mut roots: Vec<Complex64> = (0..degree).map(|k| seed.powu(k as u32)).collect();
    for _ in 0..500 {
        let mut delta = 0.0f64;
        for i in 0..degree {
            let denom = (0..degree)
                .filter(|&j| j != i)
                .fold(Complex64::new(1.0, 0.0), |acc, j| acc * (roots[i] - roots[j]));
            let step = eval(roots[i]) / denom;
            roots[i] -= step;
            delta = delta.max(step.norm());
        }
        if delta < 1e-14 {
            break;
        }
    }
    roots
}

fn relative_degree(zpk: &Zpk) -> usize {
    zpk.poles.len().saturating_sub(zpk.zeros.len())
}

fn prod_neg(roots: &[Complex64]) -> Complex64 {
    roots.iter().fold(Complex64::new(1.0, 0.0), |acc, r| acc * -r)
}

impl Zpk {
    /// Lowpass prototype to lowpass with cutoff `wo` (rad/s).
    pub fn to_lowpass(self, wo: f64) -> Zpk {
        let degree = relative_degree(&self) as i32;
        Zpk {
            zeros: self.zeros.iter().map(|z| z * wo).collect(),
            poles: self.poles.iter().map(|p| p * wo).collect(),
            gain: self.gain * wo.powi(degree),
        }
    }

    /// Lowpass prototype to highpass with cutoff `wo` (rad/s).
    pub fn to_highpass(self, wo: f64) -> Zpk {
        let degree = relative_degree(&self);
        let gain = self.gain * (prod_neg(&self.zeros) / prod_neg(&self.poles)).re;
        let mut zeros: Vec<Complex64> = self.zeros.iter().map(|z| wo / z).collect();
        zeros.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(degree));
        Zpk { zeros, poles: self.poles.iter().map(|p| wo / p).collect(), gain }
    }

    /// Lowpass prototype to bandpass centred on `wo` with bandwidth `bw` (rad/s).
    pub fn to_bandpass(self, wo: f64, bw: f64) -> Zpk {
        let degree = relative_degree(&self);
        let split = |roots: &[Complex64]| -> Vec<Complex64> {
            let scaled: Vec<Complex64> = roots.iter().map(|r| r * (bw / 2.0)).collect();
            let plus = scaled.iter().map(|r| r + (r * r - wo * wo).sqrt());
            let minus = scaled.iter().map(|r| r - (r * r - wo * wo).sqrt());
            plus.chain(minus).collect()
        };
        let mut zeros = split(&self.zeros);
        zeros.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(degree));
        Zpk { zeros, poles: split(&self.poles), gain: self.gain * bw.powi(degree as i32) }
    }

    /// Lowpass prototype to bandstop centred on `wo` with bandwidth `bw` (rad/s).
    pub fn to_bandstop(self, wo: f64, bw: f64) -> Zpk {
        let degree = relative_degree(&self);
        let gain = self.gain * (prod_neg(&self.zeros) / prod_neg(&self.poles)).re;
        let split = |roots: &[Complex64]| -> Vec<Complex64> {
            let inverted: Vec<Complex64> = roots.iter().map(|r| (bw / 2.0) / r).collect();
            let plus = inverted.iter().map(|r| r + (r * r - wo * wo).sqrt());
            let minus = inverted.iter().map(|r| r - (r * r - wo * wo).sqrt());
            plus.chain(minus).collect()
        };
        let mut zeros = split(&self.zeros);
        zeros.extend(std::iter::repeat(Complex64::new(0.0, wo)).take(degree));
        zeros.extend(std::iter::repeat(Complex64::new(0.0, -wo)).take(degree));
        Zpk { zeros, poles: split(&self.poles), gain }
    }

    /// Bilinear transform at sampling frequency `fs`. Zeros at infinity land on z = -1.
    pub fn bilinear(self, fs: f64) -> Zpk {
        let fs2 = Complex64::new(2.0 * fs, 0.0);
        let degree = relative_degree(&self);
        let num = self.zeros.iter().fold(Complex64::new(1.0, 0.0), |acc, z| acc * (fs2 - z));
        let den = self.poles.iter().fold(Complex64::new(1.0, 0.0), |acc, p| acc * (fs2 - p));
        let mut zeros: Vec<Complex64> = self.zeros.iter().map(|z| (fs2 + z) / (fs2 - z)).collect();
        zeros.extend(std::iter::repeat(Complex64::new(-1.0, 0.0)).take(degree));
        Zpk {
            zeros,
            poles: self.poles.iter().map(|p| (fs2 + p) / (fs2 - p)).collect(),
            gain: self.gain * (num / den).re,
        }
    }

    /// Groups digital poles and zeros into second-order sections.
    ///
    /// Poles closest to the unit circle end up in the last section; each pole group is
    /// paired with the nearest zero group of the same size. The overall gain is folded
    /// into the first section.
    pub fn to_sos(&self) -> Vec<Coefficients<f64>> {
        let mut pole_groups = group_roots(&self.poles);
        let mut zero_groups = group_roots(&self.zeros);
        pole_groups.sort_by(|a, b| {
            b.distance_to_unit_circle()
                .partial_cmp(&a.distance_to_unit_circle())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // Pair starting from the poles nearest the unit circle.
        let mut paired = Vec::with_capacity(pole_groups.len());
        for poles in pole_groups.into_iter().rev() {
            let anchor = poles.anchor();
            let candidates = |same_size: bool| {
                zero_groups
                    .iter()
                    .enumerate()
                    .filter(move |(_, z)| !same_size || z.size() == poles.size())
                    .min_by(|(_, a), (_, b)| {
                        (a.anchor() - anchor)
                            .norm()
                            .partial_cmp(&(b.anchor() - anchor).norm())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|(i, _)| i)
            };
            let zeros = candidates(true).or_else(|| candidates(false)).map(|i| zero_groups.remove(i));
            paired.push((poles, zeros));
        }
        paired.reverse();

        let mut sections: Vec<Coefficients<f64>> = paired
            .into_iter()
            .map(|(poles, zeros)| {
                let a = poles.polynomial();
                let b = zeros.map(|z| z.polynomial()).unwrap_or([1.0, 0.0, 0.0]);
                Coefficients { a1: a[1], a2: a[2], b0: b[0], b1: b[1], b2: b[2] }
            })
            .collect();
        if let Some(first) = sections.first_mut() {
            first.b0 *= self.gain;
            first.b1 *= self.gain;
            first.b2 *= self.gain;
        }
        sections
    }
}

/// One or two roots forming (at most) a quadratic factor.
#[derive(Debug, Clone, Copy)]
enum RootGroup {
    /// A complex root standing for itself and its conjugate.
    Conjugate(Complex64),
    Reals(f64, Option<f64>),
}

impl RootGroup {
    fn size(&self) -> usize {
        match self {
            RootGroup::Conjugate(_) | RootGroup::Reals(_, Some(_)) => 2,
            RootGroup::Reals(_, None) => 1,
        }
    }

    fn anchor(&self) -> Complex64 {
        match self {
            RootGroup::Conjugate(c) => *c,
            RootGroup::Reals(r, _) => Complex64::new(*r, 0.0),
        }
    }

    fn distance_to_unit_circle(&self) -> f64 {
        match self {
            RootGroup::Conjugate(c) => (1.0 - c.norm()).abs(),
            RootGroup::Reals(a, b) => {
                let da = (1.0 - a.abs()).abs();
                b.map(|b| da.min((1.0 - b.abs()).abs())).unwrap_or(da)
            }
        }
    }

    /// `[1, c1, c2]` for `1 + c1 z^-1 + c2 z^-2`.
    fn polynomial(&self) -> [f64; 3] {
        match self {
            RootGroup::Conjugate(c) => [1.0, -2.0 * c.re, c.norm_sqr()],
            RootGroup::Reals(a, Some(b)) => [1.0, -(a + b), a * b],
            RootGroup::Reals(a, None) => [1.0, -a, 0.0],
        }
    }
}

fn group_roots(roots: &[Complex64]) -> Vec<RootGroup> {
    let mut groups: Vec<RootGroup> = roots
        .iter()
        .filter(|r| r.im > REAL_TOL)
        .map(|r| RootGroup::Conjugate(*r))
        .collect();
    let mut reals: Vec<f64> = roots.iter().filter(|r| r.im.abs() <= REAL_TOL).map(|r| r.re).collect();
    reals.sort_by(|a, b| b.abs().partial_cmp(&a.abs()).unwrap_or(std::cmp::Ordering::Equal));
    let mut iter = reals.into_iter();
    while let Some(a) = iter.next() {
        groups.push(RootGroup::Reals(a, iter.next()));
    }
    groups
}
