//! Native asynchronous serial port support.
//!
//! Uses the [`serial2-tokio`](https://crates.io/crates/serial2-tokio) crate.

use crate::transport::{Connector, StreamTransport, Transport};
use async_trait::async_trait;
use log::debug;
use serial2_tokio::{SerialPort, Settings};
use std::{io, sync::Arc};

/// Serial port transport.
pub type Port = StreamTransport<SerialPort>;

/// Opens a native serial port at the given path.
///
/// The port is configured for raw 8N1 operation at `baud` and any stale
/// input is discarded. Must be called from within a tokio runtime.
pub fn open(path: &str, baud: u32) -> io::Result<Arc<Port>> {
    let port = SerialPort::open(path, |mut settings: Settings| {
        settings.set_raw();
        settings.set_baud_rate(baud)?;

        Ok(settings)
    })?;

    port.discard_buffers()?;
    debug!("Opened {path} at {baud} baud");

    Ok(Arc::new(StreamTransport::new(port)))
}

/// Reopens a serial port, e.g. after a USB flight controller rebooted and
/// re-enumerated.
#[derive(Clone, Debug)]
pub struct SerialConnector {
    path: String,
    baud: u32,
}

impl SerialConnector {
    /// Constructs a connector for the port at the given path.
    pub fn new(path: impl Into<String>, baud: u32) -> Self {
        Self {
            path: path.into(),
            baud,
        }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self) -> io::Result<Arc<dyn Transport>> {
        let port: Arc<dyn Transport> = open(&self.path, self.baud)?;

        Ok(port)
    }
}
