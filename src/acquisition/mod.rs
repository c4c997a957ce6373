// src/acquisition/mod.rs
//! Signal acquisition and buffering components

pub mod acquisition_loop;
pub mod ring_buffer;

pub use acquisition_loop::{AcquisitionHandler, AcquisitionLoop, AcquisitionState};
pub use ring_buffer::{RingBufferError, SampleRingBuffer};
