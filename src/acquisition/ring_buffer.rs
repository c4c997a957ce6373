// src/acquisition/ring_buffer.rs
//! Fixed-capacity circular history of multichannel samples
//!
//! One writer (the acquisition thread) appends chunks; readers take a copy of
//! the most recent rows. Both sides go through one mutex, so a reader never
//! sees a chunk half written across the wrap boundary.

use ndarray::{s, Array2, ArrayView2};
use parking_lot::Mutex;
use thiserror::Error;

/// Ring buffer error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RingBufferError {
    #[error("invalid buffer capacity: {0}")]
    InvalidCapacity(usize),

    #[error("channel count mismatch: buffer has {expected}, chunk has {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
}

struct RingState {
    data: Array2<f32>,
    cursor: usize,
    wrapped: bool,
    total_written: u64,
}

/// Circular `(capacity, channels)` store with O(chunk) append and last-N read
pub struct SampleRingBuffer {
    capacity: usize,
    channels: usize,
    state: Mutex<RingState>,
}

impl SampleRingBuffer {
    pub fn new(capacity: usize, channels: usize) -> Result<Self, RingBufferError> {
        if capacity == 0 || channels == 0 {
            return Err(RingBufferError::InvalidCapacity(capacity));
        }
        Ok(Self {
            capacity,
            channels,
            state: Mutex::new(RingState {
                data: Array2::zeros((capacity, channels)),
                cursor: 0,
                wrapped: false,
                total_written: 0,
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Append rows, overwriting the oldest once full. A chunk larger than the
    /// capacity keeps only its last `capacity` rows and restarts the cursor.
    pub fn append(&self, chunk: ArrayView2<f32>) -> Result<(), RingBufferError> {
        let (rows, cols) = chunk.dim();
        if cols != self.channels {
            return Err(RingBufferError::ChannelMismatch {
                expected: self.channels,
                actual: cols,
            });
        }
        if rows == 0 {
            return Ok(());
        }

        let mut state = self.state.lock();
        state.total_written += rows as u64;

        if rows >= self.capacity {
            state.data.assign(&chunk.slice(s![rows - self.capacity.., ..]));
            state.cursor = 0;
            state.wrapped = true;
            return Ok(());
        }

        let cursor = state.cursor;
        let room = self.capacity - cursor;
        if rows <= room {
            state.data.slice_mut(s![cursor..cursor + rows, ..]).assign(&chunk);
            state.cursor = cursor + rows;
        } else {
            let overflow = rows - room;
            state.data.slice_mut(s![cursor.., ..]).assign(&chunk.slice(s![..room, ..]));
            state.data.slice_mut(s![..overflow, ..]).assign(&chunk.slice(s![room.., ..]));
            state.cursor = overflow;
            state.wrapped = true;
        }

        if state.cursor == self.capacity {
            state.cursor = 0;
            state.wrapped = true;
        }
        Ok(())
    }

    /// The `n` most recent rows in chronological order, or `None` if fewer
    /// than `n` rows are held.
    pub fn get_last(&self, n: usize) -> Option<Array2<f32>> {
        if n > self.capacity {
            return None;
        }
        let state = self.state.lock();
        let cursor = state.cursor;
        if !state.wrapped && cursor < n {
            return None;
        }

        if cursor >= n {
            return Some(state.data.slice(s![cursor - n..cursor, ..]).to_owned());
        }
        let head = n - cursor;
        let mut out = Array2::zeros((n, self.channels));
        out.slice_mut(s![..head, ..])
            .assign(&state.data.slice(s![self.capacity - head.., ..]));
        out.slice_mut(s![head.., ..])
            .assign(&state.data.slice(s![..cursor, ..]));
        Some(out)
    }

    /// Rows ever appended, including overwritten ones
    pub fn total_written(&self) -> u64 {
        self.state.lock().total_written
    }

    /// Rows currently available to [`SampleRingBuffer::get_last`]
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        if state.wrapped {
            self.capacity
        } else {
            state.cursor
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Rows numbered from `start`, every channel holding the row number
    fn rows(start: usize, count: usize, channels: usize) -> Array2<f32> {
        Array2::from_shape_fn((count, channels), |(r, c)| ((start + r) * 10 + c) as f32)
    }

    #[test]
    fn test_rejects_invalid_shape() {
        assert!(SampleRingBuffer::new(0, 4).is_err());
        assert!(SampleRingBuffer::new(4, 0).is_err());
        let buffer = SampleRingBuffer::new(4, 2).unwrap();
        assert_eq!(
            buffer.append(rows(0, 1, 3).view()),
            Err(RingBufferError::ChannelMismatch { expected: 2, actual: 3 })
        );
    }

    #[test]
    fn test_unavailable_until_enough_rows() {
        let buffer = SampleRingBuffer::new(10, 2).unwrap();
        buffer.append(rows(0, 3, 2).view()).unwrap();
        assert!(buffer.get_last(4).is_none());
        assert_eq!(buffer.get_last(3).unwrap(), rows(0, 3, 2));
        assert!(buffer.get_last(11).is_none());
    }

    #[test]
    fn test_read_across_wrap_boundary() {
        let buffer = SampleRingBuffer::new(5, 1).unwrap();
        buffer.append(rows(0, 4, 1).view()).unwrap();
        buffer.append(rows(4, 3, 1).view()).unwrap();
        assert_eq!(buffer.get_last(5).unwrap(), rows(2, 5, 1));
        assert_eq!(buffer.get_last(2).unwrap(), rows(5, 2, 1));
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn test_exact_fill_wraps_cursor() {
        let buffer = SampleRingBuffer::new(4, 1).unwrap();
        buffer.append(rows(0, 4, 1).view()).unwrap();
        assert_eq!(buffer.get_last(4).unwrap(), rows(0, 4, 1));
        buffer.append(rows(4, 1, 1).view()).unwrap();
        assert_eq!(buffer.get_last(4).unwrap(), rows(1, 4, 1));
    }

    #[test]
    fn test_oversized_chunk_keeps_most_recent_rows() {
        let buffer = SampleRingBuffer::new(4, 2).unwrap();
        buffer.append(rows(0, 1, 2).view()).unwrap();
        buffer.append(rows(1, 10, 2).view()).unwrap();
        assert_eq!(buffer.get_last(4).unwrap(), rows(7, 4, 2));
        assert_eq!(buffer.total_written(), 11);
    }

    #[test]
    fn test_concurrent_reader_sees_consistent_windows() {
        use std::sync::Arc;
        let buffer = Arc::new(SampleRingBuffer::new(64, 1).unwrap());
        let writer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                for start in (0..5000).step_by(7) {
                    buffer.append(rows(start, 7, 1).view()).unwrap();
                }
            })
        };
        for _ in 0..2000 {
            if let Some(window) = buffer.get_last(32) {
                // consecutive rows differ by exactly one row number
                for pair in window.column(0).to_vec().windows(2) {
                    assert_eq!(pair[1] - pair[0], 10.0);
                }
            }
        }
        writer.join().unwrap();
    }

    proptest! {
        #[test]
        fn prop_last_capacity_rows_after_overflow(
            capacity in 1usize..40,
            chunk_sizes in prop::collection::vec(1usize..60, 1..20),
        ) {
            let buffer = SampleRingBuffer::new(capacity, 2).unwrap();
            let mut written = 0;
            for size in chunk_sizes {
                buffer.append(rows(written, size, 2).view()).unwrap();
                written += size;
            }
            if written >= capacity {
                prop_assert_eq!(buffer.get_last(capacity).unwrap(), rows(written - capacity, capacity, 2));
            } else {
                prop_assert!(buffer.get_last(capacity).is_none());
                prop_assert_eq!(buffer.get_last(written).unwrap(), rows(0, written, 2));
            }
        }

        #[test]
        fn prop_never_available_before_n_rows(n in 2usize..30, appended in 0usize..30) {
            prop_assume!(appended < n);
            let buffer = SampleRingBuffer::new(32, 1).unwrap();
            if appended > 0 {
                buffer.append(rows(0, appended, 1).view()).unwrap();
            }
            prop_assert!(buffer.get_last(n).is_none());
        }
    }
}
