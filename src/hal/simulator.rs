// src/hal/simulator.rs
//! Synthetic EEG source for demos and tests
//!
//! Each chunk is Gaussian noise on every channel plus a 10 Hz rhythm on the
//! first few channels. The phase clock advances by exactly the chunk
//! duration, so consecutive chunks join without discontinuity.

use std::f64::consts::PI;
use std::time::Duration;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::debug;

use crate::config::constants::simulation::{
    NOISE_STD, RHYTHM_AMPLITUDE, RHYTHM_CHANNELS, RHYTHM_FREQUENCY_HZ,
};
use crate::error::{BciError, BciResult};
use crate::hal::traits::TransportSource;
use crate::hal::types::{SampleChunk, TransportKind, TransportStats};

/// Demo transport: no handshake, streams immediately
pub struct DemoSource {
    sample_rate_hz: f64,
    channel_count: usize,
    chunk_len: usize,
    chunk_duration: Duration,
    paced: bool,
    time_s: f64,
    rng: StdRng,
    stats: TransportStats,
}

impl DemoSource {
    pub fn new(sample_rate_hz: f64, channel_count: usize, chunk_ms: u64) -> Self {
        let chunk_len = ((sample_rate_hz * chunk_ms as f64 / 1000.0) as usize).max(1);
        Self {
            sample_rate_hz,
            channel_count,
            chunk_len,
            chunk_duration: Duration::from_millis(chunk_ms),
            paced: true,
            time_s: 0.0,
            rng: StdRng::from_entropy(),
            stats: TransportStats::default(),
        }
    }

    /// Reproducible noise
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// When unpaced, chunks are produced as fast as they are requested.
    pub fn with_pacing(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    /// Synthesize the next chunk and advance the phase clock
    pub fn generate(&mut self) -> Array2<f32> {
        let dt = 1.0 / self.sample_rate_hz;
        let start = self.time_s;
        let rhythm_channels = self.channel_count.min(RHYTHM_CHANNELS);
        let rng = &mut self.rng;

        let block = Array2::from_shape_fn((self.chunk_len, self.channel_count), |(i, ch)| {
            let noise: f64 = rng.sample(StandardNormal);
            let mut value = noise * NOISE_STD;
            if ch < rhythm_channels {
                let t = start + i as f64 * dt;
                value += RHYTHM_AMPLITUDE * (2.0 * PI * RHYTHM_FREQUENCY_HZ * t).sin();
            }
            value as f32
        });

        self.time_s = start + self.chunk_len as f64 * dt;
        block
    }
}

impl TransportSource for DemoSource {
    fn kind(&self) -> TransportKind {
        TransportKind::Demo
    }

    fn connect(&mut self) -> BciResult<String> {
        if !(self.sample_rate_hz > 0.0) || self.channel_count == 0 {
            return Err(BciError::connection(
                "demo",
                format!(
                    "invalid demo stream: {} Hz, {} channels",
                    self.sample_rate_hz, self.channel_count
                ),
            ));
        }
        debug!(
            sample_rate_hz = self.sample_rate_hz,
            channels = self.channel_count,
            chunk_len = self.chunk_len,
            "demo stream ready"
        );
        Ok("connected (demo): synthetic stream running".to_string())
    }

    fn read_chunk(&mut self) -> BciResult<Option<SampleChunk>> {
        let block = self.generate();
        if self.paced {
            std::thread::sleep(self.chunk_duration);
        }
        self.stats.chunks_emitted += 1;
        Ok(Some(SampleChunk::new(block)))
    }

    fn close(&mut self) {}

    fn stats(&self) -> TransportStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_size_follows_rate() {
        assert_eq!(DemoSource::new(250.0, 8, 40).chunk_len(), 10);
        assert_eq!(DemoSource::new(1000.0, 9, 40).chunk_len(), 40);
        assert_eq!(DemoSource::new(10.0, 2, 40).chunk_len(), 1);
    }

    #[test]
    fn test_chunk_shape_and_counter() {
        let mut source = DemoSource::new(250.0, 8, 40).with_seed(7).with_pacing(false);
        source.connect().unwrap();
        let chunk = source.read_chunk().unwrap().unwrap();
        assert_eq!(chunk.n_samples(), 10);
        assert_eq!(chunk.n_channels(), 8);
        assert_eq!(source.stats().chunks_emitted, 1);
    }

    #[test]
    fn test_rhythm_only_on_leading_channels() {
        let mut source = DemoSource::new(250.0, 8, 400).with_seed(1).with_pacing(false);
        let block = source.generate();
        let power = |ch: usize| block.column(ch).iter().map(|v| (*v as f64).powi(2)).sum::<f64>() / block.nrows() as f64;
        // rhythm adds A^2/2 = 50 on top of noise variance 4
        assert!(power(0) > 30.0);
        assert!(power(3) > 30.0);
        assert!(power(4) < 10.0);
        assert!(power(7) < 10.0);
    }

    #[test]
    fn test_phase_is_continuous_across_chunks() {
        let mut source = DemoSource::new(250.0, 1, 40).with_seed(3);
        source.generate();
        assert!((source.time_s - 0.04).abs() < 1e-12);
        source.generate();
        assert!((source.time_s - 0.08).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_stream_fails_to_connect() {
        let mut source = DemoSource::new(250.0, 0, 40);
        assert!(source.connect().is_err());
    }
}
