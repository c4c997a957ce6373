// src/recorder.rs
//! Raw-sample persistence
//!
//! The acquisition callback hands chunks to a [`SampleSink`]. [`CsvRecorder`]
//! stamps them and queues them for a writer thread, so file I/O never runs on
//! the acquisition thread. A full queue drops the chunk instead of blocking.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Local};
use crossbeam::channel::{self, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::constants::recording::{DEFAULT_SUBJECT, WRITER_QUEUE_CHUNKS};
use crate::config::RecordingSettings;
use crate::error::{BciError, BciResult};
use crate::hal::SampleChunk;
use crate::utils::{Clock, SystemClock};

/// Destination for raw samples of one acquisition session
pub trait SampleSink: Send + Sync {
    /// Called once the transport is connected.
    fn begin(&self, sample_rate_hz: f64, channel_count: usize) -> BciResult<()>;

    /// Must not block on I/O.
    fn write(&self, chunk: &SampleChunk);

    /// Flush and close; a later `begin` starts a new recording.
    fn finish(&self);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl SampleSink for NullSink {
    fn begin(&self, _sample_rate_hz: f64, _channel_count: usize) -> BciResult<()> {
        Ok(())
    }

    fn write(&self, _chunk: &SampleChunk) {}

    fn finish(&self) {}
}

struct StampedChunk {
    /// Unix time of the last sample, in seconds
    received_at: f64,
    chunk: SampleChunk,
}

struct ActiveRecording {
    path: PathBuf,
    sample_rate_hz: f64,
    tx: Sender<StampedChunk>,
    writer: JoinHandle<BciResult<u64>>,
}

/// CSV log with header `time,CH1..CHn`, one row per sample
pub struct CsvRecorder {
    directory: PathBuf,
    subject: String,
    queue_chunks: usize,
    clock: Arc<dyn Clock>,
    active: Mutex<Option<ActiveRecording>>,
    dropped_chunks: AtomicU64,
}

impl CsvRecorder {
    pub fn new(directory: impl Into<PathBuf>, subject: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            subject: subject.into(),
            queue_chunks: WRITER_QUEUE_CHUNKS,
            clock: Arc::new(SystemClock),
            active: Mutex::new(None),
            dropped_chunks: AtomicU64::new(0),
        }
    }

    pub fn from_settings(settings: &RecordingSettings) -> Self {
        Self::new(settings.directory.clone(), settings.subject.clone())
    }

    pub fn with_queue_capacity(mut self, chunks: usize) -> Self {
        self.queue_chunks = chunks.max(1);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// File of the recording in progress
    pub fn current_path(&self) -> Option<PathBuf> {
        self.active.lock().as_ref().map(|a| a.path.clone())
    }

    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks.load(Ordering::Relaxed)
    }

    fn file_path(&self, now: DateTime<Local>) -> PathBuf {
        let name = format!(
            "{}_{}_{}.csv",
            safe_subject(&self.subject),
            now.format("%Y%m%d"),
            now.format("%H%M%S")
        );
        self.directory.join(name)
    }
}

/// Keep alphanumerics, spaces and underscores; spaces become underscores.
pub fn safe_subject(subject: &str) -> String {
    let kept: String = subject
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '_')
        .collect();
    let safe = kept.trim().replace(' ', "_");
    if safe.is_empty() {
        DEFAULT_SUBJECT.to_string()
    } else {
        safe
    }
}

impl SampleSink for CsvRecorder {
    fn begin(&self, sample_rate_hz: f64, channel_count: usize) -> BciResult<()> {
        self.finish();

        fs::create_dir_all(&self.directory)?;
        let path = self.file_path(self.clock.now().with_timezone(&Local));
        let file = File::create(&path)?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));

        let header = std::iter::once("time".to_string())
            .chain((1..=channel_count).map(|i| format!("CH{i}")));
        writer
            .write_record(header)
            .map_err(|e| BciError::Io(e.into()))?;

        let (tx, rx) = channel::bounded::<StampedChunk>(self.queue_chunks);
        let dt = 1.0 / sample_rate_hz;
        let thread_path = path.clone();
        let handle = thread::Builder::new()
            .name("mi-recorder".into())
            .spawn(move || -> BciResult<u64> {
                let mut rows = 0u64;
                for stamped in rx {
                    let view = stamped.chunk.view();
                    let n = view.nrows();
                    for (i, sample) in view.outer_iter().enumerate() {
                        let t = stamped.received_at - (n - 1 - i) as f64 * dt;
                        let record = std::iter::once(format!("{t:.3}"))
                            .chain(sample.iter().map(|v| v.to_string()));
                        writer
                            .write_record(record)
                            .map_err(|e| BciError::Io(e.into()))?;
                        rows += 1;
                    }
                }
                writer.flush()?;
                debug!(path = %thread_path.display(), rows, "recording closed");
                Ok(rows)
            })?;

        info!(path = %path.display(), channels = channel_count, "recording raw samples");
        *self.active.lock() = Some(ActiveRecording {
            path,
            sample_rate_hz,
            tx,
            writer: handle,
        });
        Ok(())
    }

    fn write(&self, chunk: &SampleChunk) {
        if chunk.is_empty() {
            return;
        }
        let active = self.active.lock();
        let Some(recording) = active.as_ref() else {
            return;
        };
        let stamped = StampedChunk {
            received_at: self.clock.unix_seconds(),
            chunk: chunk.clone(),
        };
        match recording.tx.try_send(stamped) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped_chunks.fetch_add(1, Ordering::Relaxed);
                warn!(
                    samples = chunk.n_samples(),
                    rate = recording.sample_rate_hz,
                    "recorder queue full; chunk not recorded"
                );
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("recorder thread is gone; chunk not recorded");
            }
        }
    }

    fn finish(&self) {
        let Some(recording) = self.active.lock().take() else {
            return;
        };
        drop(recording.tx);
        match recording.writer.join() {
            Ok(Ok(rows)) => info!(path = %recording.path.display(), rows, "recording finished"),
            Ok(Err(e)) => error!(path = %recording.path.display(), error = %e, "recording failed"),
            Err(_) => error!(path = %recording.path.display(), "recorder thread panicked"),
        }
    }
}

impl Drop for CsvRecorder {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_safe_subject() {
        assert_eq!(safe_subject("Jane Doe"), "Jane_Doe");
        assert_eq!(safe_subject(" a/b\\c:d "), "abcd");
        assert_eq!(safe_subject("***"), DEFAULT_SUBJECT);
    }

    #[test]
    fn test_file_name_layout() {
        let recorder = CsvRecorder::new("/tmp/raw", "Pat 01");
        let now = chrono::TimeZone::with_ymd_and_hms(&Local, 2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            recorder.file_path(now),
            PathBuf::from("/tmp/raw/Pat_01_20240309_140507.csv")
        );
    }

    #[test]
    fn test_writes_header_and_backdated_rows() {
        use crate::utils::ManualClock;
        use chrono::{TimeZone, Utc};

        let dir = tempfile::tempdir().unwrap();
        let start = Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        clock.advance_micros(250_000);
        let recorder = CsvRecorder::new(dir.path(), "test").with_clock(clock);
        recorder.begin(100.0, 2).unwrap();
        let path = recorder.current_path().unwrap();

        let chunk = SampleChunk::new(Array2::from_shape_fn((5, 2), |(r, c)| (r * 2 + c) as f32));
        recorder.write(&chunk);
        recorder.finish();
        assert!(recorder.current_path().is_none());

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(header, vec!["time", "CH1", "CH2"]);
        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 5);

        // last sample carries the receive time, earlier ones step back by 1/fs
        assert_eq!(&records[0][0], "1700000000.210");
        assert_eq!(&records[4][0], "1700000000.250");
        assert_eq!(&records[4][1], "8");
        assert_eq!(&records[4][2], "9");
    }

    #[test]
    fn test_write_without_begin_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = CsvRecorder::new(dir.path(), "test");
        recorder.write(&SampleChunk::new(Array2::zeros((3, 2))));
        recorder.finish();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
