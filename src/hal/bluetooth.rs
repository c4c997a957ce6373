// src/hal/bluetooth.rs
//! Bluetooth RFCOMM transport
//!
//! Opening an RFCOMM socket is platform specific, so the socket itself comes
//! from a [`BluetoothConnector`]. Once open, the stream carries the same
//! little-endian packet framing as the TCP amplifier, sized to the session's
//! channel count.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::constants::hal::POINTS_PER_PACKET;
use crate::error::{BciError, BciResult};
use crate::hal::framing::PacketLayout;
use crate::hal::stream::{PacketReader, PacketStream};
use crate::hal::tcp_driver::handshake;
use crate::hal::traits::{InterruptSlot, Interrupter, TransportSource};
use crate::hal::types::{SampleChunk, TransportKind, TransportStats};

/// Opens RFCOMM streams to a device address
pub trait BluetoothConnector: Send + Sync {
    fn open(&self, address: &str, channel: u8, timeout: Duration) -> BciResult<Box<dyn PacketStream>>;
}

/// Connector used when no Bluetooth stack is available on this build
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedBluetooth;

impl BluetoothConnector for UnsupportedBluetooth {
    fn open(&self, address: &str, _channel: u8, _timeout: Duration) -> BciResult<Box<dyn PacketStream>> {
        Err(BciError::connection(
            "bluetooth",
            format!("missing Bluetooth capability: no RFCOMM connector installed (device {address})"),
        ))
    }
}

/// Bluetooth timing, mirroring the TCP phases
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BluetoothTimeouts {
    pub connect: Duration,
    pub handshake: Duration,
    pub read_wait: Duration,
}

pub struct BluetoothSource {
    address: String,
    channel: u8,
    timeouts: BluetoothTimeouts,
    connector: Arc<dyn BluetoothConnector>,
    stream: Option<Box<dyn PacketStream>>,
    reader: PacketReader,
    chunks_emitted: u64,
    slot: Option<InterruptSlot>,
}

impl BluetoothSource {
    pub fn new(
        address: impl Into<String>,
        channel: u8,
        channel_count: usize,
        timeouts: BluetoothTimeouts,
        connector: Arc<dyn BluetoothConnector>,
    ) -> Self {
        Self {
            address: address.into(),
            channel,
            timeouts,
            connector,
            stream: None,
            reader: PacketReader::new(
                "bluetooth",
                PacketLayout::new(channel_count, POINTS_PER_PACKET),
                timeouts.read_wait,
            ),
            chunks_emitted: 0,
            slot: None,
        }
    }
}

impl TransportSource for BluetoothSource {
    fn kind(&self) -> TransportKind {
        TransportKind::Bluetooth
    }

    fn connect(&mut self) -> BciResult<String> {
        let mut stream = self
            .connector
            .open(&self.address, self.channel, self.timeouts.connect)?;
        let endpoint = format!("{} ch{}", self.address, self.channel);
        if let (Some(slot), Some(interrupter)) = (&self.slot, stream.interrupter()) {
            slot.register(interrupter);
        }
        if let Err(err) = handshake(stream.as_mut(), "bluetooth", &endpoint, self.timeouts.handshake) {
            warn!(endpoint = %endpoint, error = %err, "bluetooth handshake failed");
            return Err(err);
        }
        info!(target: "mi_core::traffic", endpoint = %endpoint, "bluetooth handshake ok");
        self.stream = Some(stream);
        Ok(format!("connected (bluetooth) to {}: data stream ok", endpoint))
    }

    fn read_chunk(&mut self) -> BciResult<Option<SampleChunk>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| BciError::connection_lost("bluetooth", "socket is closed"))?;
        let block = self.reader.next_packet(stream.as_mut())?;
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
            if let Some(interrupter) = stream.interrupter() {
                interrupter.interrupt();
            }
            debug!(address = %self.address, "bluetooth socket closed");
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
