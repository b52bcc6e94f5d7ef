//! # RPC Server
//!
//! Accepts connections and answers every request frame on them with the
//! dispatcher's response frame. A connection may carry any number of calls;
//! calls on one connection are answered in order, connections run concurrently.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::net::TcpSocket;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::RpcConfig;
use crate::dispatch::Dispatcher;
use crate::frame;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The listen address could not be resolved or bound.
    Bind { address: String, reason: String },
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind { address, reason } => write!(f, "cannot listen on {}: {}", address, reason),
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

/// Stops a running server. Cloneable; any clone stops it.
#[derive(Clone)]
pub struct ShutdownHandle {
    stop: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }
}

pub struct RpcServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    max_frame_len: usize,
    stop: Arc<watch::Sender<bool>>,
}

impl RpcServer {
    /// Binds `bind_host:server_port` with the configured backlog.
    /// Port 0 picks a free port; see `local_addr`.
    pub async fn bind(config: &RpcConfig, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        let address = format!("{}:{}", config.bind_host, config.server_port);
        let bind_error = |reason: String| Error::Bind { address: address.clone(), reason };

        let addr: SocketAddr = tokio::net::lookup_host(address.as_str())
            .await
            .map_err(|e| bind_error(e.to_string()))?
            .next()
            .ok_or_else(|| bind_error("address does not resolve".into()))?;

        let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
        socket.set_reuseaddr(true)?;
        socket.bind(addr).map_err(|e| bind_error(e.to_string()))?;
        let listener = socket.listen(config.backlog).map_err(|e| bind_error(e.to_string()))?;
        let local_addr = listener.local_addr()?;

        info!(%local_addr, protocol = dispatcher.protocol().id(), "server listening");
        let (stop, _) = watch::channel(false);
        Ok(Self {
            listener,
            local_addr,
            dispatcher,
            max_frame_len: config.max_frame_len,
            stop: Arc::new(stop),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { stop: self.stop.clone() }
    }

    /// Serves until shut down. Open connections are dropped on the way out.
    pub async fn serve(self) -> Result<()> {
        let mut stop = self.stop.subscribe();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = stop.wait_for(|stopped| *stopped) => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(serve_connection(
                            stream,
                            peer,
                            self.dispatcher.clone(),
                            self.max_frame_len,
                        ));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(self.listener);
        connections.shutdown().await;
        info!(local_addr = %self.local_addr, "server stopped");
        Ok(())
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    max_frame_len: usize,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "nodelay not set");
    }
    let (mut reader, mut writer) = stream.split();
    debug!(%peer, "connection opened");

    loop {
        let request = match frame::read_frame(&mut reader, max_frame_len).await {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                warn!(%peer, error = %e, "bad frame, closing");
                break;
            }
        };
        let response = dispatcher.handle_bounded(&request, max_frame_len).await;
        if let Err(e) = frame::write_frame(&mut writer, &response, max_frame_len).await {
            warn!(%peer, error = %e, "reply not sent, closing");
            break;
        }
    }

    debug!(%peer, "connection closed");
}
