//! # Service Discovery
//!
//! Resolves a service name to its current providers.
//!
//! The first resolution of a name lists the service directory, caches the
//! result, and installs a child watch. Every change the watch reports
//! re-lists the directory and replaces the cached list wholesale, so the
//! cache converges on the store without per-event bookkeeping.
//!
//! ## Invariants
//! - A cached list is only ever replaced, never patched.
//! - At most one watch per name, and a list is cached only while its watch
//!   is live. When a watch ends, its cached list goes with it and the next
//!   resolve starts over.
//! - The first listing never overwrites a list a watch refresh already wrote.
//! - Failed lookups are not cached; a missing directory is an empty, cached result.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::directory::DirectoryLayout;
use crate::directory::ServiceLocation;
use crate::registry;
use crate::registry::ChildWatch;
use crate::registry::CoordinationStore;

type Cache = DashMap<String, Vec<ServiceLocation>>;
type Listeners = DashMap<String, Listener>;

/// A running watch task. `id` tells a finished task whether the entry is still its own.
struct Listener {
    id: u64,
    task: JoinHandle<()>,
}

pub struct ServiceDiscoverer {
    store: Arc<dyn CoordinationStore>,
    layout: DirectoryLayout,
    cache: Arc<Cache>,
    listeners: Arc<Listeners>,
    next_listener: AtomicU64,
}

impl ServiceDiscoverer {
    pub fn new(store: Arc<dyn CoordinationStore>, layout: DirectoryLayout) -> Self {
        Self {
            store,
            layout,
            cache: Arc::new(DashMap::new()),
            listeners: Arc::new(DashMap::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    /// Current providers of `name`, possibly empty.
    ///
    /// Store failures are logged and reported as no providers. Without a
    /// live watch the listing is returned but not cached.
    pub async fn resolve(&self, name: &str) -> Vec<ServiceLocation> {
        if let Some(hit) = self.cache.get(name) {
            return hit.value().clone();
        }

        let listener = self.listen(name).await;

        let locations = match list(self.store.as_ref(), &self.layout, name).await {
            Ok(locations) => locations,
            Err(e) => {
                warn!(service = name, error = %e, "lookup failed");
                return Vec::new();
            }
        };
        debug!(service = name, providers = locations.len(), "resolved");

        let Some(id) = listener else {
            return locations;
        };
        // A refresh that landed while we listed is at least as new as our listing.
        match self.listeners.get(name) {
            Some(current) if current.id == id => {
                self.cache.entry(name.to_string()).or_insert(locations).value().clone()
            }
            _ => locations,
        }
    }

    /// The cached list without touching the store.
    pub fn cached(&self, name: &str) -> Option<Vec<ServiceLocation>> {
        self.cache.get(name).map(|entry| entry.value().clone())
    }

    pub fn is_watching(&self, name: &str) -> bool {
        self.listeners.contains_key(name)
    }

    /// Drops the cached list and the watch for `name`.
    pub fn forget(&self, name: &str) {
        if let Some((_, listener)) = self.listeners.remove(name) {
            listener.task.abort();
        }
        self.cache.remove(name);
    }

    /// Stops every watch and ends the store session.
    pub async fn close(&self) {
        self.listeners.iter().for_each(|entry| entry.value().task.abort());
        self.listeners.clear();
        self.cache.clear();
        self.store.close().await;
        info!("discoverer closed");
    }

    /// Makes sure `name` is watched. Returns the id of the live listener,
    /// or `None` when no watch could be installed.
    async fn listen(&self, name: &str) -> Option<u64> {
        if let Some(listener) = self.listeners.get(name) {
            return Some(listener.id);
        }
        let path = self.layout.service_path(name);
        let watch = match self.store.watch_children(&path).await {
            Ok(watch) => watch,
            Err(e) => {
                warn!(service = name, error = %e, "watch not installed");
                return None;
            }
        };

        // A concurrent first resolve may have won; its watch stays, ours drops.
        match self.listeners.entry(name.to_string()) {
            Entry::Occupied(current) => Some(current.get().id),
            Entry::Vacant(slot) => {
                let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
                let task = refresh_on_change(
                    watch,
                    name.to_string(),
                    id,
                    self.store.clone(),
                    self.layout.clone(),
                    self.cache.clone(),
                    self.listeners.clone(),
                );
                slot.insert(Listener { id, task: tokio::spawn(task) });
                debug!(service = name, %path, "watching");
                Some(id)
            }
        }
    }
}

impl Drop for ServiceDiscoverer {
    fn drop(&mut self) {
        self.listeners.iter().for_each(|entry| entry.value().task.abort());
    }
}

async fn refresh_on_change(
    mut watch: ChildWatch,
    name: String,
    id: u64,
    store: Arc<dyn CoordinationStore>,
    layout: DirectoryLayout,
    cache: Arc<Cache>,
    listeners: Arc<Listeners>,
) {
    while let Some(event) = watch.recv().await {
        // Coalesce a burst into one re-list.
        let mut changes = 1;
        while watch.try_recv().is_ok() {
            changes += 1;
        }
        debug!(service = %name, child = event.child(), changes, "providers changed");

        match list(store.as_ref(), &layout, &name).await {
            Ok(locations) => {
                // Held across the write so `forget` cannot interleave.
                if let Some(current) = listeners.get(&name) {
                    if current.id == id {
                        cache.insert(name.clone(), locations);
                    }
                }
            }
            Err(e) => warn!(service = %name, error = %e, "refresh failed, keeping cached list"),
        }
    }

    if listeners.remove_if(&name, |_, listener| listener.id == id).is_some() {
        cache.remove(&name);
    }
    debug!(service = %name, "watch ended");
}

/// Lists and decodes the providers of `name`. Undecodable entries are skipped.
async fn list(
    store: &dyn CoordinationStore,
    layout: &DirectoryLayout,
    name: &str,
) -> registry::Result<Vec<ServiceLocation>> {
    let children = match store.children(&layout.service_path(name)).await {
        Ok(children) => children,
        Err(registry::Error::NoNode(_)) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let locations = children
        .iter()
        .filter_map(|child| match ServiceLocation::from_node_name(child) {
            Ok(location) => Some(location),
            Err(e) => {
                warn!(service = name, %child, error = %e, "skipping entry");
                None
            }
        })
        .collect();
    Ok(locations)
}
