// src/hal/stream.rs
//! Byte streams carrying fixed-size binary packets (TCP, Bluetooth RFCOMM)

use std::io::{self, Read};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use ndarray::Array2;
use tracing::{debug, trace};

use crate::error::{BciError, BciResult};
use crate::hal::framing::{FrameError, PacketLayout};
use crate::hal::traits::Interrupter;

/// Outcome of waiting for a stream to become readable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Timeout,
    /// Peer performed an orderly shutdown
    Closed,
}

/// Connected byte stream with a bounded wait primitive
pub trait PacketStream: Send {
    /// Block until data is available, the peer closes, or `timeout` elapses.
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<Readiness>;

    /// Read up to `buf.len()` bytes; `Ok(0)` means end of stream.
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Handle that closes this stream from another thread
    fn interrupter(&self) -> Option<Interrupter>;
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

impl PacketStream for TcpStream {
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<Readiness> {
        self.set_read_timeout(Some(timeout))?;
        let mut peek_buf = [0u8; 1];
        match self.peek(&mut peek_buf) {
            Ok(0) => Ok(Readiness::Closed),
            Ok(_) => Ok(Readiness::Ready),
            Err(e) if is_timeout(&e) => Ok(Readiness::Timeout),
            Err(e) => Err(e),
        }
    }

    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let handle = self.try_clone().ok()?;
        Some(Interrupter::new(move || {
            let _ = handle.shutdown(Shutdown::Both);
        }))
    }
}

/// Reads whole packets of one layout from a [`PacketStream`]
#[derive(Debug)]
pub struct PacketReader {
    transport: &'static str,
    layout: PacketLayout,
    buffer: Vec<u8>,
    read_wait: Duration,
    pub bytes_received: u64,
    pub frames_dropped: u64,
}

impl PacketReader {
    pub fn new(transport: &'static str, layout: PacketLayout, read_wait: Duration) -> Self {
        Self {
            transport,
            layout,
            buffer: vec![0; layout.byte_len()],
            read_wait,
            bytes_received: 0,
            frames_dropped: 0,
        }
    }

    pub fn layout(&self) -> PacketLayout {
        self.layout
    }

    /// Wait up to the heartbeat interval, then read exactly one packet.
    ///
    /// `Ok(None)` on heartbeat timeout or on a wrong-length frame; an
    /// orderly close or read failure is a connection loss.
    pub fn next_packet(&mut self, stream: &mut dyn PacketStream) -> BciResult<Option<Array2<f32>>> {
        match stream.wait_readable(self.read_wait) {
            Ok(Readiness::Ready) => {}
            Ok(Readiness::Timeout) => return Ok(None),
            Ok(Readiness::Closed) => {
                return Err(BciError::connection_lost(self.transport, "remote host closed the connection"))
            }
            Err(e) => return Err(BciError::connection_lost(self.transport, e.to_string())),
        }

        let filled = self.fill(stream)?;
        if filled == 0 {
            return Err(BciError::connection_lost(self.transport, "remote host closed the connection"));
        }
        self.bytes_received += filled as u64;

        match self.layout.decode(&self.buffer[..filled]) {
            Ok(block) => {
                trace!(target: "mi_core::traffic", transport = self.transport, bytes = filled, "packet rx");
                Ok(Some(block))
            }
            Err(err @ FrameError::Length { .. }) => {
                self.frames_dropped += 1;
                debug!(transport = self.transport, error = %err, "dropped frame");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Read until the packet buffer is full, the stream ends, or a read stalls
    /// past the heartbeat interval.
    fn fill(&mut self, stream: &mut dyn PacketStream) -> BciResult<usize> {
        let mut filled = 0;
        while filled < self.buffer.len() {
            match stream.read_some(&mut self.buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_timeout(&e) => break,
                Err(e) => {
                    if filled == 0 {
                        return Err(BciError::connection_lost(self.transport, e.to_string()));
                    }
                    break;
                }
            }
        }
        Ok(filled)
    }
}
