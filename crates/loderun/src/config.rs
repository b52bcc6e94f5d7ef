//! # Runtime Configuration
//!
//! One value carries every knob a provider or consumer process needs. It
//! deserializes from JSON with every field optional, so a config file only
//! names what it overrides.

use std::net::UdpSocket;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::directory::DirectoryLayout;

pub const DEFAULT_REGISTRY_ADDRESS: &str = "127.0.0.1:2379";
pub const DEFAULT_NAMESPACE: &str = "rpc";
pub const DEFAULT_SERVER_PORT: u16 = 19000;
pub const DEFAULT_PROTOCOL: &str = "binary";
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Where the coordination store listens.
    pub registry_address: String,
    /// Top-level directory segment, `/<namespace>/service/...`.
    pub namespace: String,
    /// Interface the server listens on.
    pub bind_host: String,
    pub server_port: u16,
    /// Host published to consumers. Detected when unset.
    pub advertise_host: Option<String>,
    /// Protocol id the server speaks and advertises.
    pub protocol: String,
    /// Pending connection queue length for the listener.
    pub backlog: u32,
    pub call_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_frame_len: usize,
    /// How long ephemeral entries survive a silent process.
    pub lease_ttl_secs: i64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            registry_address: DEFAULT_REGISTRY_ADDRESS.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            bind_host: "0.0.0.0".to_string(),
            server_port: DEFAULT_SERVER_PORT,
            advertise_host: None,
            protocol: DEFAULT_PROTOCOL.to_string(),
            backlog: 100,
            call_timeout_ms: 30_000,
            connect_timeout_ms: 5_000,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            lease_ttl_secs: 10,
        }
    }
}

impl RpcConfig {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn with_registry_address(mut self, address: impl Into<String>) -> Self {
        self.registry_address = address.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    pub fn with_server_port(mut self, port: u16) -> Self {
        self.server_port = port;
        self
    }

    pub fn with_advertise_host(mut self, host: impl Into<String>) -> Self {
        self.advertise_host = Some(host.into());
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn layout(&self) -> DirectoryLayout {
        DirectoryLayout::new(&self.namespace)
    }

    /// `host:port` published for a server bound to `port`.
    pub fn advertised_address(&self, port: u16) -> String {
        let host = self.advertise_host.clone().unwrap_or_else(detect_host);
        format!("{}:{}", host, port)
    }
}

/// Address of the interface that routes outward, or loopback.
///
/// Connecting a UDP socket only selects a route; nothing is sent.
pub fn detect_host() -> String {
    let probe = UdpSocket::bind("0.0.0.0:0").and_then(|socket| {
        socket.connect("8.8.8.8:80")?;
        socket.local_addr()
    });
    match probe {
        Ok(addr) if !addr.ip().is_unspecified() => addr.ip().to_string(),
        _ => "127.0.0.1".to_string(),
    }
}
