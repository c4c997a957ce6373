// src/hal/framing.rs
//! Wire formats: fixed-size binary packets and newline-terminated CSV lines

use ndarray::Array2;
use thiserror::Error;

use crate::config::constants::hal::{BYTES_PER_VALUE, MAX_SERIAL_LINE_BYTES};

/// Errors decoding a single packet or line. Always recoverable: the unit is dropped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    #[error("packet length mismatch: expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("line has {actual} values, expected at least {expected}")]
    TooFewValues { expected: usize, actual: usize },

    #[error("invalid numeric token '{0}'")]
    InvalidNumber(String),
}

/// Layout of one binary packet: `points_per_packet` rows of `channels`
/// little-endian `f32` values, row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketLayout {
    pub channels: usize,
    pub points_per_packet: usize,
}

impl PacketLayout {
    pub fn new(channels: usize, points_per_packet: usize) -> Self {
        Self {
            channels,
            points_per_packet,
        }
    }

    /// Exact byte length of one packet
    pub fn byte_len(&self) -> usize {
        self.channels * self.points_per_packet * BYTES_PER_VALUE
    }

    /// Decode exactly one packet into a `(points_per_packet, channels)` block
    pub fn decode(&self, bytes: &[u8]) -> Result<Array2<f32>, FrameError> {
        let expected = self.byte_len();
        if bytes.len() != expected {
            return Err(FrameError::Length {
                expected,
                actual: bytes.len(),
            });
        }
        let values: Vec<f32> = bytes
            .chunks_exact(BYTES_PER_VALUE)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Array2::from_shape_vec((self.points_per_packet, self.channels), values).map_err(|_| {
            FrameError::Length {
                expected,
                actual: bytes.len(),
            }
        })
    }

    /// Encode a block with this layout (used by device simulators and tests)
    pub fn encode(&self, block: &Array2<f32>) -> Result<Vec<u8>, FrameError> {
        let expected = self.byte_len();
        let actual = block.len() * BYTES_PER_VALUE;
        if block.dim() != (self.points_per_packet, self.channels) {
            return Err(FrameError::Length { expected, actual });
        }
        Ok(block.iter().flat_map(|v| v.to_le_bytes()).collect())
    }
}

/// Parse one CSV record, keeping the first `channel_count` values
pub fn parse_serial_line(line: &str, channel_count: usize) -> Result<Vec<f32>, FrameError> {
    let tokens: Vec<&str> = line
        .trim()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.len() < channel_count {
        return Err(FrameError::TooFewValues {
            expected: channel_count,
            actual: tokens.len(),
        });
    }
    tokens
        .iter()
        .take(channel_count)
        .map(|t| t.parse::<f32>().map_err(|_| FrameError::InvalidNumber((*t).to_string())))
        .collect()
}

/// Splits a byte stream into complete lines, carrying the unterminated tail
/// over to the next read.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
    overflowed: u64,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every line completed by this read.
    /// Byte sequences that are not valid UTF-8 are skipped, leaving the rest
    /// of the line for [`parse_serial_line`] to accept or reject.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line: String = String::from_utf8_lossy(&raw)
                .chars()
                .filter(|&c| c != char::REPLACEMENT_CHARACTER)
                .collect();
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());
        }
        if self.pending.len() > MAX_SERIAL_LINE_BYTES {
            self.pending.clear();
            self.overflowed += 1;
        }
        lines
    }

    /// Partial lines discarded for exceeding the length bound
    pub fn overflowed(&self) -> u64 {
        self.overflowed
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
