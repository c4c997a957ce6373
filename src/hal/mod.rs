// src/hal/mod.rs
//! Transport abstraction layer for EEG amplifiers

pub mod bluetooth;
pub mod framing;
pub mod serial_driver;
pub mod simulator;
pub mod stream;
pub mod tcp_driver;
pub mod traits;
pub mod types;

pub use bluetooth::{BluetoothConnector, BluetoothSource, UnsupportedBluetooth};
pub use framing::{FrameError, PacketLayout};
pub use serial_driver::SerialSource;
pub use simulator::DemoSource;
pub use tcp_driver::TcpSource;
pub use traits::*;
pub use types::*;

use std::sync::Arc;
use std::time::Duration;

use crate::config::AcquisitionSettings;

/// Builds the transport for a resolved session
pub struct TransportFactory;

impl TransportFactory {
    /// `session` must already be the effective session (TCP overrides applied).
    pub fn create(
        session: &SessionConfig,
        settings: &AcquisitionSettings,
        connector: Arc<dyn BluetoothConnector>,
    ) -> Box<dyn TransportSource> {
        let connect = Duration::from_millis(settings.connect_timeout_ms);
        let handshake = Duration::from_millis(settings.handshake_timeout_ms);
        let read_wait = Duration::from_millis(settings.read_wait_ms);

        match &session.transport {
            TransportConfig::Demo => Box::new(DemoSource::new(
                session.sample_rate_hz,
                session.channel_count,
                settings.demo_chunk_ms,
            )),
            TransportConfig::Serial { port, baud } => {
                Box::new(SerialSource::new(serial_driver::SerialSettings {
                    port: port.clone(),
                    baud: *baud,
                    channel_count: session.channel_count,
                    timeout: Duration::from_millis(settings.serial_timeout_ms),
                }))
            }
            TransportConfig::Bluetooth { address, channel } => Box::new(BluetoothSource::new(
                address.clone(),
                *channel,
                session.channel_count,
                bluetooth::BluetoothTimeouts {
                    connect,
                    handshake,
                    read_wait,
                },
                connector,
            )),
            TransportConfig::Tcp { host, port } => Box::new(TcpSource::new(
                host.clone(),
                *port,
                tcp_driver::TcpTimeouts {
                    connect,
                    handshake,
                    read_wait,
                },
            )),
        }
    }
}
