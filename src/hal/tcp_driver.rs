// src/hal/tcp_driver.rs
//! TCP amplifier transport
//!
//! The amplifier streams 9 channels at 1000 Hz as 1440-byte packets. A socket
//! that connects but never delivers data is not a usable device, so connecting
//! includes a handshake: the first bytes must arrive within a bounded wait.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::constants::hal::{POINTS_PER_PACKET, TCP_CHANNEL_COUNT};
use crate::error::{BciError, BciResult};
use crate::hal::framing::PacketLayout;
use crate::hal::stream::{PacketReader, PacketStream, Readiness};
use crate::hal::traits::{InterruptSlot, Interrupter, TransportSource};
use crate::hal::types::{SampleChunk, TransportKind, TransportStats};

/// Timing of the connect, handshake and streaming phases
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TcpTimeouts {
    pub connect: Duration,
    pub handshake: Duration,
    pub read_wait: Duration,
}

pub struct TcpSource {
    host: String,
    port: u16,
    timeouts: TcpTimeouts,
    stream: Option<TcpStream>,
    reader: PacketReader,
    chunks_emitted: u64,
    slot: Option<InterruptSlot>,
}

impl TcpSource {
    pub fn new(host: impl Into<String>, port: u16, timeouts: TcpTimeouts) -> Self {
        Self {
            host: host.into(),
            port,
            timeouts,
            stream: None,
            reader: PacketReader::new(
                "tcp",
                PacketLayout::new(TCP_CHANNEL_COUNT, POINTS_PER_PACKET),
                timeouts.read_wait,
            ),
            chunks_emitted: 0,
            slot: None,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn resolve(&self) -> BciResult<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| BciError::connection("tcp", format!("cannot resolve {}: {}", self.endpoint(), e)))?
            .collect();
        if addrs.is_empty() {
            return Err(BciError::connection("tcp", format!("no address for {}", self.endpoint())));
        }
        Ok(addrs)
    }

    fn open(&self) -> BciResult<TcpStream> {
        let mut last_error = None;
        for addr in self.resolve()? {
            match TcpStream::connect_timeout(&addr, self.timeouts.connect) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }
        let reason = match last_error {
            Some(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                format!("connection refused by {} (is the acquisition server running?)", self.endpoint())
            }
            Some(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => format!(
                "no response from {} within {} ms",
                self.endpoint(),
                self.timeouts.connect.as_millis()
            ),
            Some(e) => format!("cannot connect to {}: {}", self.endpoint(), e),
            None => format!("cannot connect to {}", self.endpoint()),
        };
        Err(BciError::connection("tcp", reason))
    }
}

/// Wait for the first bytes on a freshly connected stream
pub(crate) fn handshake(
    stream: &mut dyn PacketStream,
    transport: &str,
    endpoint: &str,
    wait: Duration,
) -> BciResult<()> {
    match stream.wait_readable(wait) {
        Ok(Readiness::Ready) => Ok(()),
        Ok(Readiness::Timeout) => Err(BciError::connection(
            transport,
            format!(
                "connected to {}, but no data stream arrived within {} ms (check device power and acquisition software)",
                endpoint,
                wait.as_millis()
            ),
        )),
        Ok(Readiness::Closed) => Err(BciError::connection(
            transport,
            format!("{} closed the connection during handshake", endpoint),
        )),
        Err(e) => Err(BciError::connection(transport, format!("handshake with {} failed: {}", endpoint, e))),
    }
}

impl TransportSource for TcpSource {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn connect(&mut self) -> BciResult<String> {
        let mut stream = self.open()?;
        let endpoint = self.endpoint();
        debug!(endpoint = %endpoint, "socket connected, waiting for data");
        if let (Some(slot), Some(interrupter)) = (&self.slot, PacketStream::interrupter(&stream)) {
            slot.register(interrupter);
        }

        if let Err(err) = handshake(&mut stream, "tcp", &endpoint, self.timeouts.handshake) {
            warn!(endpoint = %endpoint, error = %err, "tcp handshake failed");
            return Err(err);
        }
        info!(target: "mi_core::traffic", endpoint = %endpoint, "tcp handshake ok");

        self.stream = Some(stream);
        Ok(format!("connected (tcp) to {}: data stream ok", endpoint))
    }

    fn read_chunk(&mut self) -> BciResult<Option<SampleChunk>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| BciError::connection_lost("tcp", "socket is closed"))?;
        let block = self.reader.next_packet(stream)?;
        Ok(block.map(|b| {
            self.chunks_emitted += 1;
            SampleChunk::new(b)
        }))
    }

    fn interrupter(&self) -> Option<Interrupter> {
        self.stream.as_ref().and_then(|s| s.interrupter())
    }

    fn attach_interrupt_slot(&mut self, slot: InterruptSlot) {
        self.slot = Some(slot);
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            debug!(endpoint = %self.endpoint(), "tcp socket closed");
        }
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            bytes_received: self.reader.bytes_received,
            chunks_emitted: self.chunks_emitted,
            frames_dropped: self.reader.frames_dropped,
            lines_dropped: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::stream::testing::ScriptedStream;

    #[test]
    fn test_handshake_outcomes() {
        let wait = Duration::from_millis(5);

        let mut ready = ScriptedStream::new().packet(vec![0; 4]);
        assert!(handshake(&mut ready, "tcp", "dev:1", wait).is_ok());

        let mut silent = ScriptedStream::new().then(Readiness::Timeout);
        let err = handshake(&mut silent, "tcp", "dev:1", wait).unwrap_err();
        assert!(err.to_string().contains("no data stream"));

        let mut closed = ScriptedStream::new().then(Readiness::Closed);
        let err = handshake(&mut closed, "tcp", "dev:1", wait).unwrap_err();
        assert!(err.to_string().contains("closed the connection"));
    }

    #[test]
    fn test_read_without_connection_fails() {
        let timeouts = TcpTimeouts {
            connect: Duration::from_millis(10),
            handshake: Duration::from_millis(10),
            read_wait: Duration::from_millis(10),
        };
        let mut source = TcpSource::new("127.0.0.1", 1, timeouts);
        assert!(source.read_chunk().is_err());
        assert!(source.interrupter().is_none());
    }
}
