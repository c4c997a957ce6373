// src/processing/mod.rs
//! Stateless signal processing for EEG windows

pub mod butterworth;
pub mod filters;
pub mod spectral;

pub use butterworth::{butterworth, iir_notch, BandSpec, Biquad, SosFilter};
pub use filters::{butter_filter, notch_filter, try_butter_filter, try_notch_filter};
pub use spectral::{band_power, compute_psd, PowerSpectrum};

use thiserror::Error;

/// Filter design and application errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("invalid filter parameters: {0}")]
    InvalidParameters(String),

    #[error("invalid filter coefficients: {0}")]
    InvalidCoefficients(String),

    #[error("signal too short for zero-phase filtering: need at least {required} samples, got {actual}")]
    SignalTooShort { required: usize, actual: usize },

    #[error("filter processing error: {0}")]
    ProcessingError(String),
}
