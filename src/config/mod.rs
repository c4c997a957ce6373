// src/config/mod.rs
//! Layered configuration for acquisition, processing and classification

pub mod constants;
pub mod loader;

pub use constants::*;
pub use loader::{ConfigError, ConfigLoader};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::hal::{SessionConfig, TransportConfig};

/// Complete system configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub acquisition: AcquisitionSettings,
    #[serde(default)]
    pub processing: ProcessingSettings,
    #[serde(default)]
    pub classification: ClassificationSettings,
    #[serde(default)]
    pub calibration: CalibrationSettings,
    #[serde(default)]
    pub recording: RecordingSettings,
}

/// Transport selection and acquisition-loop timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    #[serde(default = "defaults::sample_rate_hz")]
    pub sample_rate_hz: f64,

    #[serde(default = "defaults::channel_count")]
    pub channel_count: usize,

    #[serde(default = "defaults::buffer_seconds")]
    pub buffer_seconds: f64,

    #[serde(default = "defaults::demo_chunk_ms")]
    pub demo_chunk_ms: u64,

    #[serde(default = "defaults::serial_timeout_ms")]
    pub serial_timeout_ms: u64,

    #[serde(default = "defaults::connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "defaults::handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "defaults::read_wait_ms")]
    pub read_wait_ms: u64,

    #[serde(default = "defaults::stop_join_timeout_ms")]
    pub stop_join_timeout_ms: u64,

    #[serde(default)]
    pub transport: TransportConfig,
}

/// Preprocessing applied before spatial filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSettings {
    #[serde(default = "defaults::band_low_hz")]
    pub band_low_hz: f64,

    #[serde(default = "defaults::band_high_hz")]
    pub band_high_hz: f64,

    #[serde(default = "defaults::notch_hz")]
    pub notch_hz: f64,

    #[serde(default = "defaults::notch_q")]
    pub notch_q: f64,

    #[serde(default = "defaults::filter_order")]
    pub filter_order: usize,

    #[serde(default = "defaults::psd_segment_len")]
    pub psd_segment_len: usize,
}

/// Classifier families available for the online model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    Logistic,
    Knn,
}

/// Online classification parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationSettings {
    #[serde(default = "defaults::window_seconds")]
    pub window_seconds: f64,

    #[serde(default = "defaults::period_ms")]
    pub period_ms: u64,

    #[serde(default = "defaults::n_components")]
    pub n_components: usize,

    #[serde(default = "defaults::classifier")]
    pub classifier: ClassifierKind,

    #[serde(default = "defaults::knn_neighbors")]
    pub knn_neighbors: usize,

    #[serde(default = "defaults::feature_channels")]
    pub feature_channels: usize,
}

/// Calibration capture parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSettings {
    #[serde(default = "defaults::window_seconds")]
    pub window_seconds: f64,

    #[serde(default = "defaults::trials_per_class")]
    pub trials_per_class: usize,
}

/// Raw-sample recording parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSettings {
    #[serde(default = "defaults::recording_enabled")]
    pub enabled: bool,

    #[serde(default = "defaults::recording_directory")]
    pub directory: PathBuf,

    #[serde(default = "defaults::subject")]
    pub subject: String,
}

/// Default value providers using constants
mod defaults {
    use super::ClassifierKind;
    use crate::config::constants::*;
    use std::path::PathBuf;

    pub fn sample_rate_hz() -> f64 { signal::DEFAULT_SAMPLING_RATE_HZ }
    pub fn channel_count() -> usize { signal::DEFAULT_CHANNEL_COUNT }
    pub fn buffer_seconds() -> f64 { signal::DEFAULT_BUFFER_SECONDS }
    pub fn demo_chunk_ms() -> u64 { hal::DEFAULT_DEMO_CHUNK_MS }
    pub fn serial_timeout_ms() -> u64 { hal::DEFAULT_SERIAL_TIMEOUT_MS }
    pub fn connect_timeout_ms() -> u64 { hal::DEFAULT_CONNECT_TIMEOUT_MS }
    pub fn handshake_timeout_ms() -> u64 { hal::DEFAULT_HANDSHAKE_TIMEOUT_MS }
    pub fn read_wait_ms() -> u64 { hal::DEFAULT_READ_WAIT_MS }
    pub fn stop_join_timeout_ms() -> u64 { hal::DEFAULT_STOP_JOIN_TIMEOUT_MS }

    pub fn band_low_hz() -> f64 { filters::DEFAULT_BAND_LOW_HZ }
    pub fn band_high_hz() -> f64 { filters::DEFAULT_BAND_HIGH_HZ }
    pub fn notch_hz() -> f64 { filters::DEFAULT_NOTCH_HZ }
    pub fn notch_q() -> f64 { filters::DEFAULT_NOTCH_Q }
    pub fn filter_order() -> usize { filters::DEFAULT_FILTER_ORDER }
    pub fn psd_segment_len() -> usize { filters::DEFAULT_PSD_SEGMENT_LEN }

    pub fn window_seconds() -> f64 { classification::DEFAULT_WINDOW_SECONDS }
    pub fn period_ms() -> u64 { classification::DEFAULT_PERIOD_MS }
    pub fn n_components() -> usize { classification::DEFAULT_CSP_COMPONENTS }
    pub fn classifier() -> ClassifierKind { ClassifierKind::Logistic }
    pub fn knn_neighbors() -> usize { classification::DEFAULT_KNN_NEIGHBORS }
    pub fn feature_channels() -> usize { signal::DEFAULT_FEATURE_CHANNELS }
    pub fn trials_per_class() -> usize { classification::DEFAULT_TRIALS_PER_CLASS }

    pub fn recording_enabled() -> bool { true }
    pub fn recording_directory() -> PathBuf { PathBuf::from(recording::DEFAULT_DIRECTORY) }
    pub fn subject() -> String { recording::DEFAULT_SUBJECT.to_string() }
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            sample_rate_hz: defaults::sample_rate_hz(),
            channel_count: defaults::channel_count(),
            buffer_seconds: defaults::buffer_seconds(),
            demo_chunk_ms: defaults::demo_chunk_ms(),
            serial_timeout_ms: defaults::serial_timeout_ms(),
            connect_timeout_ms: defaults::connect_timeout_ms(),
            handshake_timeout_ms: defaults::handshake_timeout_ms(),
            read_wait_ms: defaults::read_wait_ms(),
            stop_join_timeout_ms: defaults::stop_join_timeout_ms(),
            transport: TransportConfig::Demo,
        }
    }
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            band_low_hz: defaults::band_low_hz(),
            band_high_hz: defaults::band_high_hz(),
            notch_hz: defaults::notch_hz(),
            notch_q: defaults::notch_q(),
            filter_order: defaults::filter_order(),
            psd_segment_len: defaults::psd_segment_len(),
        }
    }
}

impl Default for ClassificationSettings {
    fn default() -> Self {
        Self {
            window_seconds: defaults::window_seconds(),
            period_ms: defaults::period_ms(),
            n_components: defaults::n_components(),
            classifier: defaults::classifier(),
            knn_neighbors: defaults::knn_neighbors(),
            feature_channels: defaults::feature_channels(),
        }
    }
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            window_seconds: defaults::window_seconds(),
            trials_per_class: defaults::trials_per_class(),
        }
    }
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            enabled: defaults::recording_enabled(),
            directory: defaults::recording_directory(),
            subject: defaults::subject(),
        }
    }
}

impl AcquisitionSettings {
    /// Session parameters requested by this configuration (before TCP overrides)
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            transport: self.transport.clone(),
            sample_rate_hz: self.sample_rate_hz,
            channel_count: self.channel_count,
        }
    }

    pub fn stop_join_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_join_timeout_ms)
    }
}

impl SystemConfig {
    /// Validate configuration consistency, collecting every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let session = self.acquisition.session().effective();
        let nyquist = session.sample_rate_hz / 2.0;

        if session.sample_rate_hz <= 0.0 {
            errors.push(format!("Sample rate must be positive, got {}", session.sample_rate_hz));
        }
        if session.channel_count == 0 || session.channel_count > signal::MAX_CHANNEL_COUNT {
            errors.push(format!(
                "Channel count must be within 1..={}, got {}",
                signal::MAX_CHANNEL_COUNT,
                session.channel_count
            ));
        }
        if self.acquisition.buffer_seconds < self.classification.window_seconds {
            errors.push(format!(
                "Ring buffer ({} s) shorter than classification window ({} s)",
                self.acquisition.buffer_seconds, self.classification.window_seconds
            ));
        }

        let p = &self.processing;
        if p.band_low_hz >= p.band_high_hz {
            errors.push(format!(
                "Band-pass low cutoff ({} Hz) must be below high cutoff ({} Hz)",
                p.band_low_hz, p.band_high_hz
            ));
        }
        if p.band_high_hz >= nyquist {
            errors.push(format!(
                "Band-pass high cutoff ({} Hz) must be less than Nyquist frequency ({} Hz)",
                p.band_high_hz, nyquist
            ));
        }
        if p.notch_hz >= nyquist {
            errors.push(format!(
                "Notch frequency ({} Hz) must be less than Nyquist frequency ({} Hz)",
                p.notch_hz, nyquist
            ));
        }
        if p.filter_order == 0 || p.filter_order > filters::MAX_FILTER_ORDER {
            errors.push(format!(
                "Filter order must be within 1..={}, got {}",
                filters::MAX_FILTER_ORDER,
                p.filter_order
            ));
        }

        let c = &self.classification;
        if c.n_components == 0 || c.n_components % 2 != 0 {
            errors.push(format!("CSP component count must be even and non-zero, got {}", c.n_components));
        }
        if c.n_components > c.feature_channels.min(session.channel_count) {
            errors.push(format!(
                "CSP component count ({}) exceeds classified channels ({})",
                c.n_components,
                c.feature_channels.min(session.channel_count)
            ));
        }
        if c.window_seconds <= 0.0 || self.calibration.window_seconds <= 0.0 {
            errors.push("Window lengths must be positive".to_string());
        }
        if c.period_ms == 0 {
            errors.push("Classification period must be non-zero".to_string());
        }
        if c.classifier == ClassifierKind::Knn && c.knn_neighbors == 0 {
            errors.push("k-NN neighbour count must be non-zero".to_string());
        }
        if self.calibration.trials_per_class < classification::MIN_TRIALS_PER_CLASS {
            errors.push(format!(
                "At least {} calibration trials per class are required, got {}",
                classification::MIN_TRIALS_PER_CLASS,
                self.calibration.trials_per_class
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Ring buffer capacity in samples for a session at `sample_rate_hz`
    pub fn buffer_capacity(&self, sample_rate_hz: f64) -> usize {
        ((self.acquisition.buffer_seconds * sample_rate_hz) as usize).max(1)
    }
}
