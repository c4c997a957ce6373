// src/hal/serial_driver.rs
//! Serial-line transport: newline-terminated CSV records
//!
//! Reads whatever the port has buffered, reassembles lines across reads and
//! turns every well-formed record into one sample. Malformed or short lines
//! are dropped without interrupting the stream.

use std::io::{self, Read};
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::config::constants::hal::IDLE_SLEEP_MS;
use crate::error::{BciError, BciResult};
use crate::hal::framing::{parse_serial_line, LineAssembler};
use crate::hal::traits::TransportSource;
use crate::hal::types::{SampleChunk, TransportKind, TransportStats};

const READ_BUFFER_BYTES: usize = 4096;

/// Minimal view of a serial port used by [`SerialSource`]
pub trait SerialLink: Send {
    /// Bytes waiting in the input buffer
    fn bytes_available(&mut self) -> io::Result<usize>;

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl SerialLink for Box<dyn serialport::SerialPort> {
    fn bytes_available(&mut self) -> io::Result<usize> {
        self.bytes_to_read()
            .map(|n| n as usize)
            .map_err(io::Error::from)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }
}

/// Serial transport configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SerialSettings {
    pub port: String,
    pub baud: u32,
    pub channel_count: usize,
    pub timeout: Duration,
}

pub struct SerialSource {
    settings: SerialSettings,
    link: Option<Box<dyn SerialLink>>,
    assembler: LineAssembler,
    buffer: Vec<u8>,
    stats: TransportStats,
}

impl SerialSource {
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            link: None,
            assembler: LineAssembler::new(),
            buffer: vec![0; READ_BUFFER_BYTES],
            stats: TransportStats::default(),
        }
    }

    /// Source over an already-open link; `connect` keeps it.
    pub fn with_link(settings: SerialSettings, link: Box<dyn SerialLink>) -> Self {
        let mut source = Self::new(settings);
        source.link = Some(link);
        source
    }

    fn parse_lines(&mut self, bytes_read: usize) -> Option<SampleChunk> {
        let channels = self.settings.channel_count;
        let mut rows = Vec::new();
        for line in self.assembler.push(&self.buffer[..bytes_read]) {
            match parse_serial_line(&line, channels) {
                Ok(values) => rows.push(values),
                Err(err) => {
                    self.stats.lines_dropped += 1;
                    debug!(error = %err, "dropped serial line");
                }
            }
        }
        if rows.is_empty() {
            return None;
        }
        SampleChunk::from_rows(&rows, channels)
    }
}

impl TransportSource for SerialSource {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn connect(&mut self) -> BciResult<String> {
        if self.link.is_none() {
            let port = serialport::new(&self.settings.port, self.settings.baud)
                .timeout(self.settings.timeout)
                .open()
                .map_err(|e| {
                    BciError::connection(
                        "serial",
                        format!("cannot open {}: {}", self.settings.port, e),
                    )
                })?;
            self.link = Some(Box::new(port));
        }
        info!(port = %self.settings.port, baud = self.settings.baud, "serial port open");
        Ok(format!(
            "connected (serial): {} @ {} baud",
            self.settings.port, self.settings.baud
        ))
    }

    fn read_chunk(&mut self) -> BciResult<Option<SampleChunk>> {
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| BciError::connection_lost("serial", "port is closed"))?;

        let available = link
            .bytes_available()
            .map_err(|e| BciError::connection_lost("serial", e.to_string()))?;
        if available == 0 {
            std::thread::sleep(Duration::from_millis(IDLE_SLEEP_MS));
            return Ok(None);
        }

        let wanted = available.min(self.buffer.len());
        let read = match link.read_bytes(&mut self.buffer[..wanted]) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::Interrupted => {
                return Ok(None)
            }
            Err(e) => return Err(BciError::connection_lost("serial", e.to_string())),
        };
        self.stats.bytes_received += read as u64;
        trace!(target: "mi_core::traffic", bytes = read, "serial rx");

        let chunk = self.parse_lines(read);
        if chunk.is_some() {
            self.stats.chunks_emitted += 1;
        }
        Ok(chunk)
    }

    fn close(&mut self) {
        if self.link.take().is_some() {
            debug!(port = %self.settings.port, "serial port closed");
        }
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            lines_dropped: self.stats.lines_dropped + self.assembler.overflowed(),
            ..self.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Link that replays scripted reads
    struct ScriptedLink {
        reads: VecDeque<io::Result<Vec<u8>>>,
    }

    impl SerialLink for ScriptedLink {
        fn bytes_available(&mut self) -> io::Result<usize> {
            Ok(match self.reads.front() {
                Some(Ok(bytes)) => bytes.len(),
                Some(Err(_)) => 1,
                None => 0,
            })
        }

        fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    fn source(reads: Vec<io::Result<Vec<u8>>>, channels: usize) -> SerialSource {
        let settings = SerialSettings {
            port: "scripted".into(),
            baud: 115_200,
            channel_count: channels,
            timeout: Duration::from_millis(100),
        };
        SerialSource::with_link(settings, Box::new(ScriptedLink { reads: reads.into() }))
    }

    #[test]
    fn test_parses_complete_lines() {
        let mut src = source(vec![Ok(b"1,2,3\n4,5,6\n".to_vec())], 3);
        src.connect().unwrap();
        let chunk = src.read_chunk().unwrap().unwrap();
        assert_eq!(chunk.n_samples(), 2);
        assert_eq!(chunk.row(1).to_vec(), vec![4.0, 5.0, 6.0]);
        assert_eq!(src.stats().bytes_received, 12);
    }

    #[test]
    fn test_short_lines_are_dropped_silently() {
        let mut src = source(vec![Ok(b"1,2\n1,2,3,4\nfoo,bar,baz\n".to_vec())], 3);
        let chunk = src.read_chunk().unwrap().unwrap();
        assert_eq!(chunk.n_samples(), 1);
        assert_eq!(chunk.row(0).to_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(src.stats().lines_dropped, 2);
    }

    #[test]
    fn test_stray_bytes_do_not_drop_line() {
        let mut src = source(vec![Ok(b"1,\x802,3\n4,5\xc0\n".to_vec())], 3);
        let chunk = src.read_chunk().unwrap().unwrap();
        assert_eq!(chunk.n_samples(), 1);
        assert_eq!(chunk.row(0).to_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(src.stats().lines_dropped, 1);
    }

    #[test]
    fn test_line_split_across_reads() {
        let mut src = source(vec![Ok(b"1,2,".to_vec()), Ok(b"3\n".to_vec())], 3);
        assert!(src.read_chunk().unwrap().is_none());
        let chunk = src.read_chunk().unwrap().unwrap();
        assert_eq!(chunk.row(0).to_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_idle_port_yields_nothing() {
        let mut src = source(vec![], 3);
        assert!(src.read_chunk().unwrap().is_none());
    }

    #[test]
    fn test_read_failure_is_connection_loss() {
        let mut src = source(vec![Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))], 3);
        let err = src.read_chunk().unwrap_err();
        assert!(err.is_fatal_for_session());
    }

    #[test]
    fn test_timeout_is_not_fatal() {
        let mut src = source(vec![Err(io::Error::new(io::ErrorKind::TimedOut, "slow"))], 3);
        assert!(src.read_chunk().unwrap().is_none());
    }

    #[test]
    fn test_closed_port_reports_loss() {
        let mut src = source(vec![], 3);
        src.close();
        assert!(src.read_chunk().is_err());
    }
}
