// src/error.rs
//! Unified error handling system for the motor-imagery core
//!
//! Every component reports failures through [`BciError`]. Module-local error
//! types (`FilterError`, `CspError`, `FrameError`, ...) convert into it so that
//! errors keep their taxonomy class while crossing component boundaries.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::acquisition::ring_buffer::RingBufferError;
use crate::classification::csp::CspError;
use crate::config::ConfigError;
use crate::hal::framing::FrameError;
use crate::processing::FilterError;

/// Unified error type for the entire acquisition/classification core
#[derive(Debug, Error)]
pub enum BciError {
    /// Transport could not be opened, refused, or failed its handshake
    #[error("connection failed ({transport}): {reason}")]
    Connection {
        transport: String,
        reason: String,
    },

    /// Peer closed or a read failed after streaming had started
    #[error("connection lost ({transport}): {reason}")]
    ConnectionLost {
        transport: String,
        reason: String,
    },

    /// A single frame or line could not be decoded
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("ring buffer error: {0}")]
    Buffer(#[from] RingBufferError),

    #[error("filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("spatial filter error: {0}")]
    Csp(#[from] CspError),

    /// Feature/shape mismatch or unfit model in the online pipeline
    #[error("classification error: {0}")]
    Classification(String),

    /// Model training failed for a reason other than an unmet precondition
    #[error("training error: {0}")]
    Training(String),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// A start request arrived while another session is still active
    #[error("an acquisition session is already active ({state})")]
    SessionActive { state: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate
pub type BciResult<T> = Result<T, BciError>;

/// Error classes used to decide how a failure is surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    Connection,
    ConnectionLost,
    Frame,
    Filter,
    Classification,
    Precondition,
    Configuration,
    Io,
}

impl BciError {
    /// Connection error for the given transport
    pub fn connection(transport: impl Into<String>, reason: impl Into<String>) -> Self {
        BciError::Connection {
            transport: transport.into(),
            reason: reason.into(),
        }
    }

    /// Mid-stream connection loss for the given transport
    pub fn connection_lost(transport: impl Into<String>, reason: impl Into<String>) -> Self {
        BciError::ConnectionLost {
            transport: transport.into(),
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            BciError::Connection { .. } => ErrorCategory::Connection,
            BciError::ConnectionLost { .. } => ErrorCategory::ConnectionLost,
            BciError::Frame(_) => ErrorCategory::Frame,
            BciError::Filter(_) => ErrorCategory::Filter,
            BciError::Buffer(_) | BciError::Csp(_) | BciError::Classification(_) => {
                ErrorCategory::Classification
            }
            BciError::Training(_) | BciError::SessionActive { .. } => ErrorCategory::Precondition,
            BciError::Configuration(_) => ErrorCategory::Configuration,
            BciError::Io(_) => ErrorCategory::Io,
        }
    }

    /// Recoverable errors drop one unit of work; the session keeps running.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Frame
                | ErrorCategory::Filter
                | ErrorCategory::Classification
                | ErrorCategory::Precondition
        )
    }

    /// Fatal errors end the acquisition session.
    pub fn is_fatal_for_session(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Connection | ErrorCategory::ConnectionLost | ErrorCategory::Io
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_errors_are_fatal() {
        let err = BciError::connection("tcp", "refused");
        assert_eq!(err.category(), ErrorCategory::Connection);
        assert!(err.is_fatal_for_session());
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("refused"));

        let lost = BciError::connection_lost("tcp", "peer closed");
        assert_eq!(lost.category(), ErrorCategory::ConnectionLost);
        assert!(lost.is_fatal_for_session());
    }

    #[test]
    fn test_frame_errors_are_recoverable() {
        let err: BciError = FrameError::Length {
            expected: 1440,
            actual: 1439,
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::Frame);
        assert!(err.is_recoverable());
        assert!(!err.is_fatal_for_session());
    }

    #[test]
    fn test_csp_errors_map_to_classification() {
        let err: BciError = CspError::NotFitted.into();
        assert_eq!(err.category(), ErrorCategory::Classification);
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: BciError = io.into();
        assert_eq!(err.category(), ErrorCategory::Io);
    }
}
