//! # Remote Call Proxy
//!
//! The client side of one call: resolve providers, pick one at random, build
//! the request, send it with the provider's advertised protocol, and unwrap
//! the response.
//!
//! The proxy is stateless between calls. Provider selection happens per call
//! and failed calls are not retried.
//!
//! ## Invariants
//! - No providers means `NoProviderAvailable` before any network I/O.
//! - A request is always marshalled with the protocol its target advertises.

use std::fmt;
use std::sync::Arc;

use lodepack::Value;
use lodepack::ValueType;
use loderpc::FailureReason;
use loderpc::Protocols;
use loderpc::RemoteError;
use loderpc::RequestDatagram;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::config::RpcConfig;
use crate::directory::ServiceLocation;
use crate::discovery::ServiceDiscoverer;
use crate::transport;
use crate::transport::TcpTransport;
use crate::transport::Transport;

/// Why a remote call did not produce a value.
#[derive(Debug, Clone, PartialEq)]
pub enum CallError {
    /// Discovery found no provider for the service.
    NoProviderAvailable(String),
    /// The chosen provider advertises a protocol this process lacks.
    UnsupportedProtocol(String),
    /// The request or response could not be (un)marshalled.
    Codec(loderpc::Error),
    Transport(transport::Error),
    /// The provider answered with NOT_FOUND or ERROR.
    Remote(RemoteError),
}

impl CallError {
    /// An application failure, as raised by a service implementation.
    pub fn raised(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote(RemoteError::raised(kind, message))
    }

    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(transport::Error::Timeout))
    }

    /// What a service implementation's failure looks like on the wire.
    pub fn into_remote(self) -> RemoteError {
        match self {
            Self::Remote(e) => e,
            Self::NoProviderAvailable(name) => {
                RemoteError::raised("NoProviderAvailable", format!("no provider for '{}'", name))
            }
            Self::UnsupportedProtocol(id) => RemoteError::raised("UnsupportedProtocol", id),
            Self::Codec(e) => RemoteError::raised("CodecError", e.to_string()),
            Self::Transport(e) => RemoteError::raised("TransportError", e.to_string()),
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoProviderAvailable(name) => write!(f, "no provider available for '{}'", name),
            Self::UnsupportedProtocol(id) => write!(f, "unsupported protocol '{}'", id),
            Self::Codec(e) => write!(f, "codec failure: {}", e),
            Self::Transport(e) => write!(f, "transport failure: {}", e),
            Self::Remote(e) => write!(f, "remote failure: {}", e),
        }
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            Self::Transport(e) => Some(e),
            Self::Remote(e) => Some(e),
            _ => None,
        }
    }
}

impl From<loderpc::Error> for CallError {
    fn from(e: loderpc::Error) -> Self { Self::Codec(e) }
}

impl From<lodepack::Error> for CallError {
    fn from(e: lodepack::Error) -> Self { Self::Codec(e.into()) }
}

impl From<transport::Error> for CallError {
    fn from(e: transport::Error) -> Self { Self::Transport(e) }
}

impl From<RemoteError> for CallError {
    fn from(e: RemoteError) -> Self { Self::Remote(e) }
}

pub type Result<T> = std::result::Result<T, CallError>;

/// Forwards calls on one interface to whichever provider discovery yields.
#[derive(Clone)]
pub struct Proxy {
    interface: Arc<str>,
    discoverer: Arc<ServiceDiscoverer>,
    protocols: Arc<Protocols>,
    transport: Arc<dyn Transport>,
}

impl Proxy {
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Calls `method(parameter_types)` on a randomly chosen provider.
    pub async fn invoke(
        &self,
        method: &str,
        parameter_types: Vec<ValueType>,
        arguments: Vec<Value>,
    ) -> Result<Value> {
        let providers = self.discoverer.resolve(&self.interface).await;
        let location = choose(&providers)
            .ok_or_else(|| CallError::NoProviderAvailable(self.interface.to_string()))?;

        let protocol = self
            .protocols
            .get(location.protocol())
            .ok_or_else(|| CallError::UnsupportedProtocol(location.protocol().to_string()))?;

        let request = RequestDatagram::new(location.name(), method, parameter_types, arguments);
        debug!(%location, signature = %request.signature(), "calling");

        let payload = protocol.marshal_request(&request)?;
        let reply = self.transport.send(&payload, &location).await?;
        let response = protocol.unmarshal_response(&reply)?;

        response.into_result().map_err(|e| {
            debug!(%location, status = %reason_status(&e.reason), error = %e, "remote failure");
            CallError::Remote(e)
        })
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy").field("interface", &self.interface).finish_non_exhaustive()
    }
}

fn choose(providers: &[ServiceLocation]) -> Option<ServiceLocation> {
    providers.choose(&mut rand::thread_rng()).cloned()
}

fn reason_status(reason: &FailureReason) -> &'static str {
    match reason {
        FailureReason::ServiceNotFound => "NOT FOUND",
        _ => "ERROR",
    }
}

/// A typed client that routes every call through a `Proxy`.
///
/// Implemented by the clients `service!` generates.
pub trait RemoteStub: Sized {
    const INTERFACE: &'static str;

    fn from_proxy(proxy: Proxy) -> Self;
}

/// Hands out proxies and typed clients sharing one discoverer and transport.
#[derive(Clone)]
pub struct ClientFactory {
    discoverer: Arc<ServiceDiscoverer>,
    protocols: Arc<Protocols>,
    transport: Arc<dyn Transport>,
}

impl ClientFactory {
    pub fn new(discoverer: Arc<ServiceDiscoverer>, protocols: Protocols, transport: Arc<dyn Transport>) -> Self {
        Self {
            discoverer,
            protocols: Arc::new(protocols),
            transport,
        }
    }

    /// TCP transport and every supported protocol.
    pub fn tcp(config: &RpcConfig, discoverer: Arc<ServiceDiscoverer>) -> Self {
        Self::new(discoverer, Protocols::supported(), Arc::new(TcpTransport::new(config)))
    }

    pub fn discoverer(&self) -> &Arc<ServiceDiscoverer> {
        &self.discoverer
    }

    pub fn proxy(&self, interface: &str) -> Proxy {
        Proxy {
            interface: Arc::from(interface),
            discoverer: self.discoverer.clone(),
            protocols: self.protocols.clone(),
            transport: self.transport.clone(),
        }
    }

    pub fn client<S: RemoteStub>(&self) -> S {
        S::from_proxy(self.proxy(S::INTERFACE))
    }
}
