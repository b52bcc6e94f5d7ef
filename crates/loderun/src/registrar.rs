//! # Service Registrar
//!
//! Makes local implementations callable: binds them for the dispatcher and
//! publishes their location as an ephemeral node, so the entry lives exactly
//! as long as the registrar's store session.
//!
//! ## Invariants
//! - At most one binding per service name; rebinding replaces.
//! - A service is bound locally before it is published.
//! - Re-registering the same location leaves exactly one node.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use tracing::info;

use crate::config::RpcConfig;
use crate::directory;
use crate::directory::DirectoryLayout;
use crate::directory::ServiceLocation;
use crate::dispatch::Dispatch;
use crate::registry;
use crate::registry::CoordinationStore;
use crate::registry::CreateMode;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Store(registry::Error),
    Directory(directory::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "publish failed: {}", e),
            Self::Directory(e) => write!(f, "location not publishable: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Directory(e) => Some(e),
        }
    }
}

impl From<registry::Error> for Error {
    fn from(e: registry::Error) -> Self { Self::Store(e) }
}

impl From<directory::Error> for Error {
    fn from(e: directory::Error) -> Self { Self::Directory(e) }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A local implementation and the name it is exposed under.
///
/// The name is always the implementation's interface name.
#[derive(Clone)]
pub struct ServiceBinding {
    name: String,
    instance: Arc<dyn Dispatch>,
}

impl ServiceBinding {
    pub fn new<D: Dispatch>(instance: D) -> Self {
        Self::from_arc(Arc::new(instance))
    }

    pub fn from_arc(instance: Arc<dyn Dispatch>) -> Self {
        Self { name: instance.interface().to_string(), instance }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The interface the instance implements; always equal to `name`.
    pub fn interface(&self) -> &str {
        self.instance.interface()
    }

    pub fn instance(&self) -> &Arc<dyn Dispatch> {
        &self.instance
    }
}

impl fmt::Debug for ServiceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBinding").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Name-keyed bindings shared by the registrar and the dispatcher.
#[derive(Default)]
pub struct LocalServices {
    bindings: DashMap<String, ServiceBinding>,
}

impl LocalServices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the binding this one replaced, if any.
    pub fn bind(&self, binding: ServiceBinding) -> Option<ServiceBinding> {
        self.bindings.insert(binding.name.clone(), binding)
    }

    pub fn unbind(&self, name: &str) -> Option<ServiceBinding> {
        self.bindings.remove(name).map(|(_, binding)| binding)
    }

    pub fn get(&self, name: &str) -> Option<ServiceBinding> {
        self.bindings.get(name).map(|entry| entry.value().clone())
    }

    /// Every binding, sorted by name.
    pub fn bindings(&self) -> Vec<ServiceBinding> {
        let mut bindings: Vec<ServiceBinding> = self.bindings.iter().map(|entry| entry.value().clone()).collect();
        bindings.sort_by(|a, b| a.name.cmp(&b.name));
        bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

pub struct ServiceRegistrar {
    services: Arc<LocalServices>,
    store: Arc<dyn CoordinationStore>,
    layout: DirectoryLayout,
    address: String,
    protocol: String,
}

impl ServiceRegistrar {
    /// `address` is the `host:port` consumers should connect to, usually
    /// `config.advertised_address(server.local_addr().port())`.
    pub fn new(config: &RpcConfig, store: Arc<dyn CoordinationStore>, address: impl Into<String>) -> Self {
        Self::with_services(config, store, address, Arc::new(LocalServices::new()))
    }

    /// Shares `services` with a dispatcher built before the address was known.
    pub fn with_services(
        config: &RpcConfig,
        store: Arc<dyn CoordinationStore>,
        address: impl Into<String>,
        services: Arc<LocalServices>,
    ) -> Self {
        Self {
            services,
            store,
            layout: config.layout(),
            address: address.into(),
            protocol: config.protocol.clone(),
        }
    }

    /// The bindings a `Dispatcher` for this process should serve.
    pub fn services(&self) -> Arc<LocalServices> {
        self.services.clone()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn location(&self, name: &str) -> ServiceLocation {
        ServiceLocation::new(name, &self.address, &self.protocol)
    }

    /// Binds `binding` locally, then publishes its location.
    ///
    /// A node left by an earlier registration of the same location is
    /// replaced, so the entry belongs to this session.
    pub async fn register(&self, binding: ServiceBinding) -> Result<ServiceLocation> {
        let location = self.location(binding.name());
        let path = self.layout.provider_path(&location)?;

        self.services.bind(binding);

        self.store.ensure_path(&self.layout.service_path(location.name())).await?;
        match self.store.delete(&path).await {
            Ok(()) => debug!(%location, "replaced existing entry"),
            Err(registry::Error::NoNode(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.store.create(&path, CreateMode::Ephemeral).await?;

        info!(%location, "service registered");
        Ok(location)
    }

    /// Withdraws the published entry and drops the local binding.
    pub async fn unregister(&self, name: &str) -> Result<Option<ServiceBinding>> {
        let path = self.layout.provider_path(&self.location(name))?;
        match self.store.delete(&path).await {
            Ok(()) | Err(registry::Error::NoNode(_)) => {}
            Err(e) => return Err(e.into()),
        }
        let removed = self.services.unbind(name);
        info!(service = name, "service unregistered");
        Ok(removed)
    }

    pub fn binding(&self, name: &str) -> Option<ServiceBinding> {
        self.services.get(name)
    }

    pub fn bindings(&self) -> Vec<ServiceBinding> {
        self.services.bindings()
    }

    /// Ends the store session. Every entry this registrar published disappears.
    pub async fn close(&self) {
        self.store.close().await;
        info!(address = %self.address, "registrar closed");
    }
}
