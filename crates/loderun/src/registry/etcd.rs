//! # etcd Coordination Store
//!
//! Maps the node tree onto etcd keys: a node at `/a/b` is the key `/a/b`.
//! Ephemeral nodes are attached to one lease per session, kept alive by a
//! background task and revoked on close. Child watches are prefix watches
//! filtered down to direct children.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use etcd_client::Client;
use etcd_client::ConnectOptions;
use etcd_client::EventType;
use etcd_client::GetOptions;
use etcd_client::PutOptions;
use etcd_client::WatchOptions;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::ChildEvent;
use super::ChildWatch;
use super::CoordinationStore;
use super::CreateMode;
use super::Error;
use super::Result;
use super::child_prefix;
use super::parent;
use super::validate;
use crate::config::RpcConfig;

impl From<etcd_client::Error> for Error {
    fn from(e: etcd_client::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

pub struct EtcdStore {
    client: Client,
    lease: i64,
    keep_alive: JoinHandle<()>,
    closed: AtomicBool,
}

impl EtcdStore {
    /// Connects to `config.registry_address` (comma-separated endpoints)
    /// and opens a session lease of `config.lease_ttl_secs`.
    pub async fn connect(config: &RpcConfig) -> Result<Self> {
        let endpoints: Vec<&str> = config.registry_address.split(',').map(str::trim).collect();
        let options = ConnectOptions::new()
            .with_timeout(config.connect_timeout())
            .with_keep_alive(Duration::from_secs(30), Duration::from_secs(10));
        let mut client = Client::connect(endpoints, Some(options)).await?;

        let ttl = config.lease_ttl_secs.max(1);
        let lease = client.lease_grant(ttl, None).await?.id();
        let keep_alive = tokio::spawn(keep_lease_alive(client.clone(), lease, ttl));

        info!(registry = %config.registry_address, lease, "etcd session opened");
        Ok(Self {
            client,
            lease,
            keep_alive,
            closed: AtomicBool::new(false),
        })
    }

    fn client(&self) -> Result<Client> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::SessionClosed);
        }
        Ok(self.client.clone())
    }

    async fn child_names(&self, path: &str) -> Result<Vec<String>> {
        let prefix = child_prefix(path);
        let options = GetOptions::new().with_prefix().with_keys_only();
        let response = self.client()?.get(prefix.as_str(), Some(options)).await?;

        let mut names: Vec<String> = response
            .kvs()
            .iter()
            .filter_map(|kv| kv.key_str().ok())
            .filter_map(|key| direct_child(&prefix, key))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

async fn keep_lease_alive(mut client: Client, lease: i64, ttl: i64) {
    let (mut keeper, mut responses) = match client.lease_keep_alive(lease).await {
        Ok(pair) => pair,
        Err(e) => {
            warn!(lease, error = %e, "lease keep-alive could not start");
            return;
        }
    };
    let mut tick = tokio::time::interval(Duration::from_secs((ttl as u64 / 3).max(1)));
    loop {
        tick.tick().await;
        if let Err(e) = keeper.keep_alive().await {
            warn!(lease, error = %e, "lease keep-alive failed");
            return;
        }
        match responses.message().await {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(lease, "lease keep-alive stream ended");
                return;
            }
            Err(e) => {
                warn!(lease, error = %e, "lease keep-alive failed");
                return;
            }
        }
    }
}

/// The direct child named by `key` under `prefix`, if it is one.
fn direct_child(prefix: &str, key: &str) -> Option<String> {
    let rest = key.strip_prefix(prefix)?;
    (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
}

#[async_trait::async_trait]
impl CoordinationStore for EtcdStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        validate(path)?;
        if path == "/" {
            return Ok(true);
        }
        let options = GetOptions::new().with_count_only();
        Ok(self.client()?.get(path, Some(options)).await?.count() > 0)
    }

    async fn create(&self, path: &str, mode: CreateMode) -> Result<()> {
        validate(path)?;
        if self.exists(path).await? {
            return Err(Error::NodeExists(path.to_string()));
        }
        let parent = parent(path).ok_or_else(|| Error::InvalidPath(path.to_string()))?;
        if !self.exists(parent).await? {
            return Err(Error::NoNode(parent.to_string()));
        }
        let options = match mode {
            CreateMode::Persistent => PutOptions::new(),
            CreateMode::Ephemeral => PutOptions::new().with_lease(self.lease),
        };
        self.client()?.put(path, "", Some(options)).await?;
        Ok(())
    }

    async fn ensure_path(&self, path: &str) -> Result<()> {
        validate(path)?;
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            if !self.exists(&current).await? {
                self.client()?.put(current.as_str(), "", None).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        validate(path)?;
        if !self.child_names(path).await?.is_empty() {
            return Err(Error::NotEmpty(path.to_string()));
        }
        let response = self.client()?.delete(path, None).await?;
        if response.deleted() == 0 {
            return Err(Error::NoNode(path.to_string()));
        }
        Ok(())
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        validate(path)?;
        let names = self.child_names(path).await?;
        if names.is_empty() && !self.exists(path).await? {
            return Err(Error::NoNode(path.to_string()));
        }
        Ok(names)
    }

    async fn watch_children(&self, path: &str) -> Result<ChildWatch> {
        validate(path)?;
        let prefix = child_prefix(path);
        let options = WatchOptions::new().with_prefix();
        let (watcher, mut stream) = self.client()?.watch(prefix.as_str(), Some(options)).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            // The watch is cancelled when `watcher` drops with this task.
            let _watcher = watcher;
            loop {
                let message = tokio::select! {
                    _ = tx.closed() => break,
                    message = stream.message() => message,
                };
                let response = match message {
                    Ok(Some(response)) => response,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(prefix = %prefix, error = %e, "etcd watch failed");
                        break;
                    }
                };
                for event in response.events() {
                    let Some(child) = event
                        .kv()
                        .and_then(|kv| kv.key_str().ok())
                        .and_then(|key| direct_child(&prefix, key))
                    else {
                        continue;
                    };
                    let event = match event.event_type() {
                        EventType::Put => ChildEvent::Added(child),
                        EventType::Delete => ChildEvent::Removed(child),
                    };
                    if tx.send(event).is_err() {
                        return;
                    }
                }
            }
            debug!(prefix = %prefix, "etcd watch ended");
        });

        Ok(rx)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.keep_alive.abort();
        let mut client = self.client.clone();
        if let Err(e) = client.lease_revoke(self.lease).await {
            warn!(lease = self.lease, error = %e, "lease revoke failed, entries expire with the ttl");
        }
        info!(lease = self.lease, "etcd session closed");
    }
}

impl Drop for EtcdStore {
    fn drop(&mut self) {
        self.keep_alive.abort();
    }
}
