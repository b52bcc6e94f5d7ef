//! # LodeRun
//!
//! The runtime around the lode rpc wire protocol: publish services into a
//! coordination store, discover them, and call them over TCP.
//!
//! ## Architecture
//!
//! - **Provider side**: `ServiceRegistrar` binds implementations and publishes
//!   their `ServiceLocation`; `RpcServer` accepts frames and hands them to the
//!   `Dispatcher`, which answers every request.
//! - **Consumer side**: `ClientFactory` hands out `Proxy`s and typed clients;
//!   each call resolves providers through the `ServiceDiscoverer`, picks one,
//!   and sends one frame over the `Transport`.
//! - **Coordination**: `CoordinationStore` is the seam to the shared directory,
//!   backed by `MemoryStore` in process or by etcd with the `etcd` feature.

pub mod config;
pub mod directory;
pub mod discovery;
pub mod dispatch;
pub mod frame;
pub mod proxy;
pub mod registrar;
pub mod registry;
pub mod server;
pub mod service;
pub mod transport;

#[cfg(test)]
mod tests;

pub use async_trait::async_trait;
pub use lodepack;
pub use loderpc;

pub use config::RpcConfig;
pub use directory::DirectoryLayout;
pub use directory::ServiceLocation;
pub use discovery::ServiceDiscoverer;
pub use dispatch::Dispatch;
pub use dispatch::Dispatcher;
pub use proxy::CallError;
pub use proxy::ClientFactory;
pub use proxy::Proxy;
pub use proxy::RemoteStub;
pub use registrar::LocalServices;
pub use registrar::ServiceBinding;
pub use registrar::ServiceRegistrar;
pub use registry::CoordinationStore;
pub use registry::memory::MemoryStore;
pub use server::RpcServer;
pub use server::ShutdownHandle;
pub use transport::TcpTransport;
pub use transport::Transport;
