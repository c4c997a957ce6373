// src/processing/butterworth.rs
//! IIR filter design as cascaded second-order sections
//!
//! Butterworth designs follow the classic analog-prototype route: poles of the
//! normalized low-pass prototype, frequency transformation in the analog
//! domain, bilinear transform with pre-warped edges, then grouping of
//! conjugate poles into biquads. Sections are applied forward and backward
//! for zero-phase filtering of historical windows.

use rustfft::num_complex::Complex64;
use std::f64::consts::PI;

use super::FilterError;

/// Sampling rate of the normalized design domain (edges given as fraction of Nyquist)
const DESIGN_FS: f64 = 2.0;
const IMAG_EPSILON: f64 = 1e-10;

/// Pass-band geometry of a Butterworth design, edges normalized to Nyquist
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BandSpec {
    Lowpass(f64),
    Highpass(f64),
    Bandpass(f64, f64),
}

/// Second-order section with `a[0] == 1`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b: [f64; 3],
    pub a: [f64; 3],
}

impl Biquad {
    /// Steady-state initial conditions for a unit step (transposed direct form II)
    fn step_state(&self) -> [f64; 2] {
        let [b0, b1, b2] = self.b;
        let [_, a1, a2] = self.a;
        let rhs0 = b1 - a1 * b0;
        let rhs1 = b2 - a2 * b0;
        let z0 = (rhs0 + rhs1) / (1.0 + a1 + a2);
        [z0, rhs1 - a2 * z0]
    }

    fn dc_gain(&self) -> f64 {
        self.b.iter().sum::<f64>() / self.a.iter().sum::<f64>()
    }

    fn is_first_order(&self) -> bool {
        self.b[2] == 0.0 && self.a[2] == 0.0
    }
}

/// Cascade of biquads
#[derive(Debug, Clone, PartialEq)]
pub struct SosFilter {
    sections: Vec<Biquad>,
}

impl SosFilter {
    pub fn new(sections: Vec<Biquad>) -> Result<Self, FilterError> {
        if sections.is_empty() {
            return Err(FilterError::InvalidParameters("filter has no sections".into()));
        }
        let finite = sections
            .iter()
            .all(|s| s.b.iter().chain(s.a.iter()).all(|c| c.is_finite()));
        if !finite {
            return Err(FilterError::InvalidCoefficients("non-finite coefficient".into()));
        }
        Ok(Self { sections })
    }

    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    /// Edge padding used by [`SosFilter::filtfilt`]; signals must be longer than this.
    pub fn pad_len(&self) -> usize {
        let first_order = self.sections.iter().filter(|s| s.is_first_order()).count();
        3 * (2 * self.sections.len() + 1 - first_order)
    }

    /// Magnitude response at `freq_hz` for sampling rate `fs`
    pub fn magnitude_at(&self, freq_hz: f64, fs: f64) -> f64 {
        let w = 2.0 * PI * freq_hz / fs;
        let z1 = Complex64::from_polar(1.0, -w);
        let z2 = z1 * z1;
        self.sections
            .iter()
            .map(|s| {
                let num = s.b[0] + z1 * s.b[1] + z2 * s.b[2];
                let den = s.a[0] + z1 * s.a[1] + z2 * s.a[2];
                (num / den).norm()
            })
            .product()
    }

    /// Causal filtering with explicit per-section state
    fn filter_with_state(&self, input: &[f64], state: &mut [[f64; 2]]) -> Vec<f64> {
        let mut output = input.to_vec();
        for (section, z) in self.sections.iter().zip(state.iter_mut()) {
            let [b0, b1, b2] = section.b;
            let [_, a1, a2] = section.a;
            for x in output.iter_mut() {
                let xin = *x;
                let y = b0 * xin + z[0];
                z[0] = b1 * xin - a1 * y + z[1];
                z[1] = b2 * xin - a2 * y;
                *x = y;
            }
        }
        output
    }

    /// Initial state of every section for a unit step, scaled by upstream DC gain
    fn initial_state(&self) -> Vec<[f64; 2]> {
        let mut scale = 1.0;
        self.sections
            .iter()
            .map(|section| {
                let zi = section.step_state();
                let scaled = [zi[0] * scale, zi[1] * scale];
                scale *= section.dc_gain();
                scaled
            })
            .collect()
    }

    /// Zero-phase forward-backward filtering with odd extension at both edges.
    pub fn filtfilt(&self, signal: &[f64]) -> Result<Vec<f64>, FilterError> {
        let pad = self.pad_len();
        let n = signal.len();
        if n <= pad {
            return Err(FilterError::SignalTooShort {
                required: pad + 1,
                actual: n,
            });
        }

        let first = signal[0];
        let last = signal[n - 1];
        let mut extended = Vec::with_capacity(n + 2 * pad);
        extended.extend((1..=pad).rev().map(|i| 2.0 * first - signal[i]));
        extended.extend_from_slice(signal);
        extended.extend((1..=pad).map(|i| 2.0 * last - signal[n - 1 - i]));

        let zi = self.initial_state();

        let mut state: Vec<[f64; 2]> = zi
            .iter()
            .map(|z| [z[0] * extended[0], z[1] * extended[0]])
            .collect();
        let mut forward = self.filter_with_state(&extended, &mut state);

        forward.reverse();
        let mut state: Vec<[f64; 2]> = zi
            .iter()
            .map(|z| [z[0] * forward[0], z[1] * forward[0]])
            .collect();
        let mut backward = self.filter_with_state(&forward, &mut state);
        backward.reverse();

        let result: Vec<f64> = backward[pad..pad + n].to_vec();
        if result.iter().any(|v| !v.is_finite()) {
            return Err(FilterError::ProcessingError("filter output is not finite".into()));
        }
        Ok(result)
    }
}

/// Design a digital Butterworth filter of the given order
pub fn butterworth(order: usize, band: BandSpec) -> Result<SosFilter, FilterError> {
    if order == 0 {
        return Err(FilterError::InvalidParameters("order must be at least 1".into()));
    }
    let edge_ok = |w: f64| w.is_finite() && w > 0.0 && w < 1.0;
    match band {
        BandSpec::Lowpass(w) | BandSpec::Highpass(w) if !edge_ok(w) => {
            return Err(FilterError::InvalidParameters(format!(
                "normalized cutoff {w} outside (0, 1)"
            )));
        }
        BandSpec::Bandpass(lo, hi) if !(edge_ok(lo) && edge_ok(hi) && lo < hi) => {
            return Err(FilterError::InvalidParameters(format!(
                "normalized band [{lo}, {hi}] invalid"
            )));
        }
        _ => {}
    }

    // Analog prototype: poles on the left half of the unit circle
    let prototype: Vec<Complex64> = (0..order)
        .map(|k| {
            let m = -(order as f64) + 1.0 + 2.0 * k as f64;
            -Complex64::from_polar(1.0, PI * m / (2.0 * order as f64))
        })
        .collect();

    let warp = |w: f64| 2.0 * DESIGN_FS * (PI * w / DESIGN_FS).tan();

    let (zeros, poles, gain) = match band {
        BandSpec::Lowpass(w) => {
            let wo = warp(w);
            let poles: Vec<Complex64> = prototype.iter().map(|p| *p * wo).collect();
            (Vec::new(), poles, wo.powi(order as i32))
        }
        BandSpec::Highpass(w) => {
            let wo = warp(w);
            let poles: Vec<Complex64> = prototype.iter().map(|p| wo / *p).collect();
            let denom: Complex64 = prototype.iter().map(|p| -*p).product();
            let zeros = vec![Complex64::new(0.0, 0.0); order];
            (zeros, poles, (Complex64::new(1.0, 0.0) / denom).re)
        }
        BandSpec::Bandpass(lo, hi) => {
            let (wl, wh) = (warp(lo), warp(hi));
            let bw = wh - wl;
            let wo = (wl * wh).sqrt();
            let mut poles = Vec::with_capacity(2 * order);
            for p in &prototype {
                let scaled = *p * (bw / 2.0);
                let root = (scaled * scaled - wo * wo).sqrt();
                poles.push(scaled + root);
                poles.push(scaled - root);
            }
            let zeros = vec![Complex64::new(0.0, 0.0); order];
            (zeros, poles, bw.powi(order as i32))
        }
    };

    // Bilinear transform
    let fs2 = 2.0 * DESIGN_FS;
    let to_z = |s: &Complex64| (fs2 + *s) / (fs2 - *s);
    let mut digital_zeros: Vec<Complex64> = zeros.iter().map(to_z).collect();
    let digital_poles: Vec<Complex64> = poles.iter().map(to_z).collect();
    digital_zeros.resize(digital_poles.len(), Complex64::new(-1.0, 0.0));

    let num: Complex64 = zeros.iter().map(|z| fs2 - *z).product();
    let den: Complex64 = poles.iter().map(|p| fs2 - *p).product();
    let digital_gain = gain * (num / den).re;

    zpk_to_sos(&digital_zeros, &digital_poles, digital_gain)
}

/// Group real zeros and conjugate poles into second-order sections
fn zpk_to_sos(zeros: &[Complex64], poles: &[Complex64], gain: f64) -> Result<SosFilter, FilterError> {
    let mut complex_poles: Vec<Complex64> = poles.iter().filter(|p| p.im > IMAG_EPSILON).copied().collect();
    let mut real_poles: Vec<f64> = poles
        .iter()
        .filter(|p| p.im.abs() <= IMAG_EPSILON)
        .map(|p| p.re)
        .collect();
    complex_poles.sort_by(|a, b| a.norm().total_cmp(&b.norm()));
    real_poles.sort_by(|a, b| a.total_cmp(b));

    let mut denominators: Vec<[f64; 3]> = complex_poles
        .iter()
        .map(|p| [1.0, -2.0 * p.re, p.norm_sqr()])
        .collect();
    for pair in real_poles.chunks(2) {
        match pair {
            [p1, p2] => denominators.push([1.0, -(p1 + p2), p1 * p2]),
            [p] => denominators.push([1.0, -p, 0.0]),
            _ => unreachable!("chunks(2) yields one or two elements"),
        }
    }

    let mut real_zeros: Vec<f64> = zeros.iter().map(|z| z.re).collect();
    real_zeros.sort_by(|a, b| a.total_cmp(b));
    let half = (real_zeros.len() + 1) / 2;
    let mut numerators: Vec<[f64; 3]> = (0..half)
        .map(|i| match real_zeros.get(i + half) {
            Some(z2) => {
                let z1 = real_zeros[i];
                [1.0, -(z1 + z2), z1 * z2]
            }
            None => [1.0, -real_zeros[i], 0.0],
        })
        .collect();
    // Second-order numerators go with second-order denominators
    numerators.sort_by_key(|b| b[2] == 0.0);
    denominators.sort_by_key(|a| a[2] == 0.0);

    if numerators.len() != denominators.len() {
        return Err(FilterError::InvalidCoefficients(format!(
            "{} zero pairs for {} pole pairs",
            numerators.len(),
            denominators.len()
        )));
    }

    let mut sections: Vec<Biquad> = numerators
        .into_iter()
        .zip(denominators)
        .map(|(b, a)| Biquad { b, a })
        .collect();
    for c in sections[0].b.iter_mut() {
        *c *= gain;
    }
    SosFilter::new(sections)
}

/// Second-order IIR notch at `w0` (fraction of Nyquist) with quality factor `q`
pub fn iir_notch(w0: f64, q: f64) -> Result<SosFilter, FilterError> {
    if !(w0 > 0.0 && w0 < 1.0) {
        return Err(FilterError::InvalidParameters(format!(
            "normalized notch frequency {w0} outside (0, 1)"
        )));
    }
    if !(q > 0.0 && q.is_finite()) {
        return Err(FilterError::InvalidParameters(format!("quality factor {q} must be positive")));
    }
    let bw = (w0 / q) * PI;
    let w0 = w0 * PI;
    let beta = (bw / 2.0).tan();
    let gain = 1.0 / (1.0 + beta);
    let cos_w0 = w0.cos();
    SosFilter::new(vec![Biquad {
        b: [gain, -2.0 * gain * cos_w0, gain],
        a: [1.0, -2.0 * gain * cos_w0, 2.0 * gain - 1.0],
    }])
}
