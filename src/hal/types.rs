// src/hal/types.rs
//! Core types for transport abstraction

use std::fmt;
use std::sync::Arc;

use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::config::constants::hal::{
    DEFAULT_BAUD_RATE, DEFAULT_RFCOMM_CHANNEL, DEFAULT_TCP_PORT, TCP_CHANNEL_COUNT, TCP_SAMPLING_RATE_HZ,
};

/// Block of consecutive multichannel samples, shaped `(n_samples, n_channels)`.
///
/// Chunks carry no per-sample timestamps; the sample rate of the session and
/// the moment the chunk was produced are enough to reconstruct them. The data
/// is reference counted so a chunk can be fanned out to several consumers
/// without copying.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleChunk {
    samples: Arc<Array2<f32>>,
}

impl SampleChunk {
    pub fn new(samples: Array2<f32>) -> Self {
        Self {
            samples: Arc::new(samples),
        }
    }

    /// Build a chunk from row vectors; every row must have `channel_count` values.
    pub fn from_rows(rows: &[Vec<f32>], channel_count: usize) -> Option<Self> {
        if rows.iter().any(|row| row.len() != channel_count) {
            return None;
        }
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Array2::from_shape_vec((rows.len(), channel_count), flat)
            .ok()
            .map(Self::new)
    }

    pub fn n_samples(&self) -> usize {
        self.samples.nrows()
    }

    pub fn n_channels(&self) -> usize {
        self.samples.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.samples.view()
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f32> {
        self.samples.row(index)
    }
}

/// Transport families supported by the acquisition loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Demo,
    Serial,
    Bluetooth,
    Tcp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Demo => "demo",
            TransportKind::Serial => "serial",
            TransportKind::Bluetooth => "bluetooth",
            TransportKind::Tcp => "tcp",
        };
        f.write_str(name)
    }
}

/// Closed choice of ingestion mode, each variant carrying only what it needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum TransportConfig {
    Demo,
    Serial {
        port: String,
        #[serde(default = "default_baud_rate")]
        baud: u32,
    },
    Bluetooth {
        address: String,
        #[serde(default = "default_rfcomm_channel")]
        channel: u8,
    },
    Tcp {
        host: String,
        #[serde(default = "default_tcp_port")]
        port: u16,
    },
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_rfcomm_channel() -> u8 {
    DEFAULT_RFCOMM_CHANNEL
}

fn default_tcp_port() -> u16 {
    DEFAULT_TCP_PORT
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Demo => TransportKind::Demo,
            TransportConfig::Serial { .. } => TransportKind::Serial,
            TransportConfig::Bluetooth { .. } => TransportKind::Bluetooth,
            TransportConfig::Tcp { .. } => TransportKind::Tcp,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Demo
    }
}

/// Parameters of one acquisition session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub transport: TransportConfig,
    pub sample_rate_hz: f64,
    pub channel_count: usize,
}

impl SessionConfig {
    /// Resolve the values actually used for the session.
    ///
    /// The TCP amplifier has a fixed format, so caller-supplied rate and
    /// channel count are overridden in that mode.
    pub fn effective(&self) -> SessionConfig {
        match self.transport {
            TransportConfig::Tcp { .. } => SessionConfig {
                transport: self.transport.clone(),
                sample_rate_hz: TCP_SAMPLING_RATE_HZ,
                channel_count: TCP_CHANNEL_COUNT,
            },
            _ => self.clone(),
        }
    }
}

/// Result of the connect + handshake phase, reported exactly once per session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionOutcome {
    pub transport: TransportKind,
    pub success: bool,
    pub message: String,
}

/// Counters kept by a transport while streaming
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub bytes_received: u64,
    pub chunks_emitted: u64,
    pub frames_dropped: u64,
    pub lines_dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_overrides_rate_and_channels() {
        let session = SessionConfig {
            transport: TransportConfig::Tcp {
                host: "127.0.0.1".into(),
                port: 8712,
            },
            sample_rate_hz: 250.0,
            channel_count: 8,
        };
        let effective = session.effective();
        assert_eq!(effective.sample_rate_hz, 1000.0);
        assert_eq!(effective.channel_count, 9);
    }

    #[test]
    fn test_non_tcp_keeps_caller_values() {
        let session = SessionConfig {
            transport: TransportConfig::Serial {
                port: "/dev/ttyUSB0".into(),
                baud: 115_200,
            },
            sample_rate_hz: 500.0,
            channel_count: 16,
        };
        assert_eq!(session.effective(), session);
    }

    #[test]
    fn test_chunk_from_rows() {
        let chunk = SampleChunk::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]], 2).unwrap();
        assert_eq!(chunk.n_samples(), 2);
        assert_eq!(chunk.n_channels(), 2);
        assert_eq!(chunk.row(1)[0], 3.0);

        assert!(SampleChunk::from_rows(&[vec![1.0]], 2).is_none());
    }

    #[test]
    fn test_transport_config_toml_tagging() {
        let cfg = TransportConfig::Tcp {
            host: "10.0.0.2".into(),
            port: 9000,
        };
        let text = toml::to_string(&cfg).unwrap();
        assert!(text.contains("mode = \"tcp\""));
        let back: TransportConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn test_omitted_port_and_baud_use_defaults() {
        let tcp: TransportConfig = toml::from_str("mode = \"tcp\"\nhost = \"10.0.0.2\"").unwrap();
        assert_eq!(
            tcp,
            TransportConfig::Tcp {
                host: "10.0.0.2".into(),
                port: 8712,
            }
        );

        let serial: TransportConfig = toml::from_str("mode = \"serial\"\nport = \"COM3\"").unwrap();
        assert_eq!(
            serial,
            TransportConfig::Serial {
                port: "COM3".into(),
                baud: 115_200,
            }
        );
    }
}
