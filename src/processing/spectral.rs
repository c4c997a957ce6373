// src/processing/spectral.rs
//! Welch power spectral density estimation

use ndarray::{Array2, ArrayView2, Axis};
use rustfft::{num_complex::Complex, FftPlanner};
use std::f64::consts::PI;

/// One-sided PSD estimate, `density` shaped `(n_frequencies, n_channels)`
#[derive(Debug, Clone, PartialEq)]
pub struct PowerSpectrum {
    pub frequencies: Vec<f64>,
    pub density: Array2<f64>,
}

impl PowerSpectrum {
    pub fn empty() -> Self {
        Self {
            frequencies: Vec::new(),
            density: Array2::zeros((0, 0)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    /// Integrated power of one channel between `low` and `high` Hz
    pub fn band_power(&self, channel: usize, low: f64, high: f64) -> f64 {
        if channel >= self.density.ncols() {
            return 0.0;
        }
        let column: Vec<f64> = self.density.column(channel).to_vec();
        band_power(&self.frequencies, &column, low, high)
    }
}

/// Periodic Hann window (the DFT-even form used for spectral estimation)
fn hann_periodic(len: usize) -> Vec<f64> {
    if len <= 1 {
        return vec![1.0; len];
    }
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / len as f64).cos())
        .collect()
}

/// Welch PSD along the time axis of `data` shaped `(n_samples, n_channels)`.
///
/// Hann segments of `segment_len` samples with 50% overlap, each segment
/// mean-removed, density scaling. A segment length larger than the signal is
/// clamped to the signal length; empty input gives an empty spectrum.
pub fn compute_psd(data: ArrayView2<f64>, fs: f64, segment_len: usize) -> PowerSpectrum {
    let (n_samples, n_channels) = data.dim();
    if n_samples == 0 || n_channels == 0 || !(fs > 0.0) {
        return PowerSpectrum::empty();
    }

    let nperseg = segment_len.clamp(1, n_samples);
    let step = nperseg - nperseg / 2;
    let n_segments = (n_samples - nperseg) / step + 1;
    let n_freqs = nperseg / 2 + 1;

    let window = hann_periodic(nperseg);
    let scale = 1.0 / (fs * window.iter().map(|w| w * w).sum::<f64>());

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(nperseg);
    let mut buffer = vec![Complex::new(0.0, 0.0); nperseg];
    let mut density = Array2::<f64>::zeros((n_freqs, n_channels));

    for (ch, column) in data.axis_iter(Axis(1)).enumerate() {
        for seg in 0..n_segments {
            let start = seg * step;
            let segment = column.slice(ndarray::s![start..start + nperseg]);
            let mean = segment.sum() / nperseg as f64;
            for ((slot, &x), &w) in buffer.iter_mut().zip(segment.iter()).zip(window.iter()) {
                *slot = Complex::new((x - mean) * w, 0.0);
            }
            fft.process(&mut buffer);
            for (k, c) in buffer.iter().take(n_freqs).enumerate() {
                density[[k, ch]] += c.norm_sqr() * scale;
            }
        }
    }

    density /= n_segments as f64;

    // Fold negative frequencies in; DC and (for even lengths) Nyquist appear once
    let last_doubled = if nperseg % 2 == 0 { n_freqs - 1 } else { n_freqs };
    for k in 1..last_doubled {
        density.row_mut(k).mapv_inplace(|v| v * 2.0);
    }

    let frequencies = (0..n_freqs).map(|k| k as f64 * fs / nperseg as f64).collect();
    PowerSpectrum { frequencies, density }
}

/// Trapezoidal integral of `density` over the bins within `[low, high]` Hz
pub fn band_power(frequencies: &[f64], density: &[f64], low: f64, high: f64) -> f64 {
    let points: Vec<(f64, f64)> = frequencies
        .iter()
        .zip(density.iter())
        .filter(|(f, _)| **f >= low && **f <= high)
        .map(|(f, p)| (*f, *p))
        .collect();
    points
        .windows(2)
        .map(|pair| (pair[1].0 - pair[0].0) * (pair[0].1 + pair[1].1) / 2.0)
        .sum()
}
