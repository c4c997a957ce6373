// src/utils/mod.rs
//! Small shared helpers

pub mod time;

pub use time::{Clock, ManualClock, SystemClock};
