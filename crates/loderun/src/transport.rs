//! # Client Transport
//!
//! Moves one request frame to a provider and waits for its one reply frame.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The transport knows nothing about datagrams or codecs.
//! - **Request-Response**: One `send` is one call. Each call gets its own
//!   connection, so a late reply can never be mistaken for another call's.
//! - **Bounded**: Connecting and waiting are both under a deadline; nothing
//!   here waits forever.

use std::fmt;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;

use crate::config::RpcConfig;
use crate::directory::ServiceLocation;
use crate::frame;

/// Errors that occur at the network layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// No connection could be made to the address.
    Connect { address: String, reason: String },
    /// The connection closed before a complete reply arrived.
    ConnectionLost(String),
    /// No reply within the call deadline, or no connection within the connect deadline.
    Timeout,
    /// A frame exceeded the configured maximum.
    PayloadTooLarge(usize),
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { address, reason } => write!(f, "connect to {} failed: {}", address, reason),
            Self::ConnectionLost(msg) => write!(f, "connection lost: {}", msg),
            Self::Timeout => write!(f, "request timed out"),
            Self::PayloadTooLarge(len) => write!(f, "frame of {} bytes exceeds the limit", len),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Sends a payload to a provider and returns its reply.
///
/// Object safe, shared as `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// # Invariants
    /// - Returns the raw reply bytes of exactly this request.
    /// - Does not interpret the payload.
    async fn send(&self, payload: &[u8], location: &ServiceLocation) -> Result<Vec<u8>>;
}

/// TCP with length-prefixed frames, one connection per call.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
    call_timeout: Duration,
    max_frame_len: usize,
}

impl TcpTransport {
    pub fn new(config: &RpcConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            call_timeout: config.call_timeout(),
            max_frame_len: config.max_frame_len,
        }
    }

    async fn connect(&self, address: &str) -> Result<TcpStream> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|e| Error::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(&RpcConfig::default())
    }
}

/// Aborts the reply reader however the call ends.
struct ReaderGuard(JoinHandle<()>);

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn send(&self, payload: &[u8], location: &ServiceLocation) -> Result<Vec<u8>> {
        let stream = self.connect(location.address()).await?;
        let (mut reader, mut writer) = stream.into_split();

        // The reader completes the gate exactly once: with the reply, or with
        // the error that ended the connection.
        let (gate, reply) = oneshot::channel();
        let max_frame_len = self.max_frame_len;
        let _reader = ReaderGuard(tokio::spawn(async move {
            let _ = gate.send(frame::read_frame(&mut reader, max_frame_len).await);
        }));

        frame::write_frame(&mut writer, payload, self.max_frame_len).await?;
        debug!(address = location.address(), bytes = payload.len(), "request sent");

        match timeout(self.call_timeout, reply).await {
            Ok(Ok(Ok(Some(bytes)))) => Ok(bytes),
            Ok(Ok(Ok(None))) => Err(Error::ConnectionLost("closed before reply".into())),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(Error::ConnectionLost("reply reader stopped".into())),
            Err(_) => Err(Error::Timeout),
        }
    }
}
