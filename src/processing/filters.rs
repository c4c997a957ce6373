// src/processing/filters.rs
//! Zero-phase filtering of sample windows shaped `(n_samples, n_channels)`
//!
//! The plain functions never fail: on invalid parameters or a numerical
//! failure they log a diagnostic and hand back the input unchanged, so a
//! misconfigured filter degrades the online pipeline instead of stopping it.
//! The `try_*` variants surface the underlying [`FilterError`].

use ndarray::{Array2, ArrayView2, Axis};
use tracing::{debug, warn};

use super::butterworth::{butterworth, iir_notch, BandSpec, SosFilter};
use super::FilterError;

/// Treat missing, zero, negative and non-finite edges alike as "not given"
fn edge(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

fn check_rate(fs: f64) -> Result<f64, FilterError> {
    if fs.is_finite() && fs > 0.0 {
        Ok(fs / 2.0)
    } else {
        Err(FilterError::InvalidParameters(format!("sample rate {fs} must be positive")))
    }
}

/// Resolve the design from the given edges; `Ok(None)` means nothing to filter.
fn band_for(fs: f64, low: Option<f64>, high: Option<f64>) -> Result<Option<BandSpec>, FilterError> {
    let nyquist = check_rate(fs)?;
    let band = match (edge(low), edge(high)) {
        (Some(lo), Some(hi)) => {
            if lo >= hi || hi >= nyquist {
                return Err(FilterError::InvalidParameters(format!(
                    "band [{lo}, {hi}] Hz requires low < high < Nyquist ({nyquist} Hz)"
                )));
            }
            BandSpec::Bandpass(lo / nyquist, hi / nyquist)
        }
        (None, Some(hi)) => {
            if hi >= nyquist {
                return Err(FilterError::InvalidParameters(format!(
                    "low-pass cutoff {hi} Hz at or above Nyquist ({nyquist} Hz)"
                )));
            }
            BandSpec::Lowpass(hi / nyquist)
        }
        (Some(lo), None) => {
            if lo >= nyquist {
                return Err(FilterError::InvalidParameters(format!(
                    "high-pass cutoff {lo} Hz at or above Nyquist ({nyquist} Hz)"
                )));
            }
            BandSpec::Highpass(lo / nyquist)
        }
        (None, None) => return Ok(None),
    };
    Ok(Some(band))
}

/// Apply `filter` forward-backward along the time axis of every channel
fn apply_columns(filter: &SosFilter, data: ArrayView2<f64>) -> Result<Array2<f64>, FilterError> {
    let mut output = data.to_owned();
    for mut column in output.axis_iter_mut(Axis(1)) {
        let signal: Vec<f64> = column.iter().copied().collect();
        let filtered = filter.filtfilt(&signal)?;
        for (dst, src) in column.iter_mut().zip(filtered) {
            *dst = src;
        }
    }
    Ok(output)
}

/// Butterworth filter with the mode chosen by which edges are present:
/// both gives band-pass, only `high` gives low-pass, only `low` gives high-pass.
pub fn try_butter_filter(
    data: ArrayView2<f64>,
    fs: f64,
    low: Option<f64>,
    high: Option<f64>,
    order: usize,
) -> Result<Array2<f64>, FilterError> {
    if data.is_empty() {
        return Ok(data.to_owned());
    }
    match band_for(fs, low, high)? {
        Some(band) => {
            let filter = butterworth(order, band)?;
            apply_columns(&filter, data)
        }
        None => Ok(data.to_owned()),
    }
}

/// Butterworth filter that falls back to the unfiltered input on any failure
pub fn butter_filter(
    data: ArrayView2<f64>,
    fs: f64,
    low: Option<f64>,
    high: Option<f64>,
    order: usize,
) -> Array2<f64> {
    try_butter_filter(data, fs, low, high, order).unwrap_or_else(|err| {
        report_fallback("butterworth", &err);
        data.to_owned()
    })
}

/// Zero-phase IIR notch at `freq` Hz with quality factor `q`
pub fn try_notch_filter(data: ArrayView2<f64>, fs: f64, freq: f64, q: f64) -> Result<Array2<f64>, FilterError> {
    if data.is_empty() {
        return Ok(data.to_owned());
    }
    let nyquist = check_rate(fs)?;
    let filter = iir_notch(freq / nyquist, q)?;
    apply_columns(&filter, data)
}

/// Notch filter that falls back to the unfiltered input on any failure
pub fn notch_filter(data: ArrayView2<f64>, fs: f64, freq: f64, q: f64) -> Array2<f64> {
    try_notch_filter(data, fs, freq, q).unwrap_or_else(|err| {
        report_fallback("notch", &err);
        data.to_owned()
    })
}

fn report_fallback(kind: &str, err: &FilterError) {
    match err {
        FilterError::SignalTooShort { .. } => {
            debug!(filter = kind, error = %err, "window left unfiltered");
        }
        _ => warn!(filter = kind, error = %err, "filter failed, passing data through unfiltered"),
    }
}
