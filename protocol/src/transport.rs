//! Byte-stream transports consumed by the engine.
//!
//! The engine never owns the physical link. It only needs to write bytes,
//! observe whether the link is open, and subscribe to received chunks,
//! whose boundaries are unrelated to frame boundaries.
//!
//! [`StreamTransport`] adapts any tokio stream (serial port, TCP socket)
//! to this contract by spawning a reader task that broadcasts every chunk.

use async_trait::async_trait;
use log::{debug, trace};
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf},
    net::TcpStream,
    sync::{Mutex, broadcast},
    task::JoinHandle,
};

/// A chunk of received bytes.
pub type Chunk = Vec<u8>;

/// Number of chunks buffered per subscriber before older ones are dropped.
const CHUNK_BACKLOG: usize = 256;

/// Size of the read buffer used by [`StreamTransport`].
const READ_BUFFER_SIZE: usize = 512;

/// Byte-stream transport contract.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Writes the given bytes.
    ///
    /// Fails if the transport is closed.
    async fn write(&self, bytes: &[u8]) -> io::Result<()>;

    /// Returns `true` while the transport is open.
    fn is_open(&self) -> bool;

    /// Subscribes to received chunks.
    ///
    /// Only chunks received after subscribing are delivered.
    fn subscribe(&self) -> broadcast::Receiver<Chunk>;
}

/// Re-establishes a transport, e.g. after the firmware rebooted.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a fresh transport.
    async fn connect(&self) -> io::Result<Arc<dyn Transport>>;
}

/// Transport over any asynchronous byte stream.
pub struct StreamTransport<S> {
    writer: Mutex<WriteHalf<S>>,
    open: Arc<AtomicBool>,
    chunks: broadcast::Sender<Chunk>,
    reader: JoinHandle<()>,
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> StreamTransport<S> {
    /// Wraps a stream and starts its reader task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(stream: S) -> Self {
        let (mut rd, wr) = tokio::io::split(stream);
        let (chunks, _) = broadcast::channel(CHUNK_BACKLOG);
        let open = Arc::new(AtomicBool::new(true));
        let reader = {
            let chunks = chunks.clone();
            let open = open.clone();

            tokio::spawn(async move {
                let mut buf = [0x00; READ_BUFFER_SIZE];

                loop {
                    match rd.read(&mut buf).await {
                        Ok(0) => {
                            debug!("Stream reached end-of-file");
                            break;
                        }
                        Ok(len) => {
                            trace!("Read from stream: {:02x?}", &buf[..len]);

                            // No subscribers is not an error
                            let _ = chunks.send(buf[..len].to_vec());
                        }
                        Err(err) => {
                            debug!("Error reading from stream: {err}");
                            break;
                        }
                    }
                }

                open.store(false, Ordering::SeqCst);
            })
        };

        Self {
            writer: Mutex::new(wr),
            open,
            chunks,
            reader,
        }
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Send + 'static> Transport for StreamTransport<S> {
    async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        if !self.is_open() {
            return Err(io::ErrorKind::NotConnected.into());
        }

        trace!("Write to stream: {bytes:02x?}");

        let mut writer = self.writer.lock().await;
        let res = async {
            writer.write_all(bytes).await?;
            writer.flush().await
        }
        .await;

        if res.is_err() {
            self.open.store(false, Ordering::SeqCst);
        }

        res
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<Chunk> {
        self.chunks.subscribe()
    }
}

impl<S> Drop for StreamTransport<S> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Connects to a flight controller exposed over TCP, e.g. a simulator or
/// a wireless UART bridge.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    /// Constructs a connector for the given `host:port` address.
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> io::Result<Arc<dyn Transport>> {
        let stream = TcpStream::connect(&self.addr).await?;

        stream.set_nodelay(true)?;
        debug!("Connected to {}", self.addr);

        Ok(Arc::new(StreamTransport::new(stream)))
    }
}
