// src/config/constants.rs
//! System-wide configuration constants

/// Signal and acquisition constants
pub mod signal {
    pub const DEFAULT_SAMPLING_RATE_HZ: f64 = 250.0;
    pub const DEFAULT_CHANNEL_COUNT: usize = 8;
    pub const MAX_CHANNEL_COUNT: usize = 64;

    /// Seconds of history kept in the ring buffer
    pub const DEFAULT_BUFFER_SECONDS: f64 = 10.0;

    /// Number of leading channels fed to the classifier
    pub const DEFAULT_FEATURE_CHANNELS: usize = 8;
}

/// Transport constants
pub mod hal {
    /// TCP amplifier streams always run at this rate
    pub const TCP_SAMPLING_RATE_HZ: f64 = 1000.0;
    pub const TCP_CHANNEL_COUNT: usize = 9;
    pub const POINTS_PER_PACKET: usize = 40;
    pub const BYTES_PER_VALUE: usize = 4;

    pub const DEFAULT_TCP_PORT: u16 = 8712;
    pub const DEFAULT_BAUD_RATE: u32 = 115_200;
    pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

    pub const DEFAULT_SERIAL_TIMEOUT_MS: u64 = 100;
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;
    pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 2000;
    pub const DEFAULT_READ_WAIT_MS: u64 = 1000;
    pub const DEFAULT_DEMO_CHUNK_MS: u64 = 40;
    pub const DEFAULT_STOP_JOIN_TIMEOUT_MS: u64 = 3000;

    /// Idle step while paused or while a serial port has nothing to read
    pub const IDLE_SLEEP_MS: u64 = 10;

    /// Upper bound on an unterminated serial line before it is discarded
    pub const MAX_SERIAL_LINE_BYTES: usize = 4096;
}

/// Demo signal synthesis constants
pub mod simulation {
    pub const NOISE_STD: f64 = 2.0;
    pub const RHYTHM_FREQUENCY_HZ: f64 = 10.0;
    pub const RHYTHM_AMPLITUDE: f64 = 10.0;
    /// Channels carrying the synthetic rhythm
    pub const RHYTHM_CHANNELS: usize = 4;
}

/// Signal processing filter constants
pub mod filters {
    pub const DEFAULT_BAND_LOW_HZ: f64 = 8.0;
    pub const DEFAULT_BAND_HIGH_HZ: f64 = 30.0;
    pub const DEFAULT_NOTCH_HZ: f64 = 50.0;
    pub const DEFAULT_NOTCH_Q: f64 = 30.0;
    pub const DEFAULT_FILTER_ORDER: usize = 4;
    pub const MAX_FILTER_ORDER: usize = 12;
    pub const DEFAULT_PSD_SEGMENT_LEN: usize = 512;
}

/// Classification and calibration constants
pub mod classification {
    pub const DEFAULT_WINDOW_SECONDS: f64 = 1.0;
    pub const DEFAULT_PERIOD_MS: u64 = 500;
    pub const DEFAULT_CSP_COMPONENTS: usize = 4;
    pub const DEFAULT_KNN_NEIGHBORS: usize = 3;
    pub const DEFAULT_TRIALS_PER_CLASS: usize = 10;

    /// Minimum trials per class before training is attempted
    pub const MIN_TRIALS_PER_CLASS: usize = 2;

    /// Inverse L2 regularization strength of the logistic classifier
    pub const LOGISTIC_C: f64 = 1.0;
    pub const LOGISTIC_MAX_ITERATIONS: u64 = 200;
    /// Gradient norm at which the optimizer stops
    pub const LOGISTIC_TOLERANCE: f64 = 1e-6;
}

/// Recording constants
pub mod recording {
    pub const DEFAULT_DIRECTORY: &str = "data/raw_eeg";
    pub const DEFAULT_SUBJECT: &str = "Guest";

    /// Chunks queued for the writer thread before new chunks are dropped
    pub const WRITER_QUEUE_CHUNKS: usize = 1024;
}

/// Event fan-out
pub mod events {
    /// Per-subscriber queue; a subscriber that falls this far behind loses events
    pub const SUBSCRIBER_QUEUE_EVENTS: usize = 4096;
}

/// Environment and file discovery
pub mod paths {
    pub const ENV_PREFIX: &str = "MI";
    pub const ENV_SEPARATOR: &str = "__";
    pub const DEFAULT_CONFIG_FILE: &str = "mi-core.toml";
}
