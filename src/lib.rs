//! MI-Core: real-time EEG acquisition and motor-imagery classification
//!
//! This library acquires multichannel EEG from one of several transports,
//! keeps a bounded history of it, and classifies short windows as imagined
//! left- or right-hand movement for a rehabilitation control loop. It features:
//!
//! - Transport layer for demo, serial, Bluetooth and TCP amplifiers
//! - Lock-protected ring buffer shared by the acquisition and classifier threads
//! - Zero-phase Butterworth and notch filtering, Welch PSD
//! - Common Spatial Pattern training with a logistic or k-NN classifier
//! - Calibration capture, periodic online prediction and trial voting
//! - Layered configuration and raw-sample CSV recording
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mi_core::classification::MotorClass;
//! use mi_core::config::SystemConfig;
//! use mi_core::recorder::NullSink;
//! use mi_core::Orchestrator;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut orchestrator = Orchestrator::new(SystemConfig::default(), Arc::new(NullSink));
//!     let events = orchestrator.subscribe();
//!     orchestrator.start_session()?;
//!
//!     // ... wait for a successful connection event, then capture trials
//!     orchestrator.begin_calibration(MotorClass::Left);
//!     for event in events.iter().take(100) {
//!         println!("{event:?}");
//!     }
//!
//!     orchestrator.stop_session();
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod acquisition;
pub mod classification;
pub mod config;
pub mod error;
pub mod events;
pub mod hal;
pub mod orchestrator;
pub mod processing;
pub mod recorder;
pub mod utils;

// Re-export commonly used types for convenience
pub use acquisition::{AcquisitionLoop, AcquisitionState, SampleRingBuffer};
pub use classification::{CspModel, MotorClass, PredictionResult, TrainedModel, TrainingOutcome};
pub use config::{ConfigLoader, SystemConfig};
pub use error::{BciError, BciResult, ErrorCategory};
pub use events::{BciEvent, EventBus};
pub use hal::{SampleChunk, SessionConfig, TransportConfig, TransportKind};
pub use orchestrator::Orchestrator;
pub use processing::{butter_filter, compute_psd, notch_filter};
pub use recorder::{CsvRecorder, NullSink, SampleSink};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
