//! # In-Process Coordination Store
//!
//! A `MemoryStore` is one shared tree. Every `connect` opens an independent
//! session on it, so several sessions in one process behave like several
//! processes sharing a real store: each owns its ephemeral nodes and watches,
//! and closing or dropping a session removes them.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc;
use tracing::debug;

use super::ChildEvent;
use super::ChildWatch;
use super::CoordinationStore;
use super::CreateMode;
use super::Error;
use super::Result;
use super::child_prefix;
use super::leaf;
use super::parent;
use super::validate;

type SessionId = u64;

#[derive(Clone, Default)]
pub struct MemoryStore {
    tree: Arc<Tree>,
}

#[derive(Default)]
struct Tree {
    state: Mutex<State>,
    next_session: AtomicU64,
}

#[derive(Default)]
struct State {
    /// Path to owning session; `None` for persistent nodes.
    nodes: BTreeMap<String, Option<SessionId>>,
    watchers: HashMap<String, Vec<(SessionId, mpsc::UnboundedSender<ChildEvent>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new session on the shared tree.
    pub fn connect(&self) -> MemorySession {
        let id = self.tree.next_session.fetch_add(1, Ordering::Relaxed);
        MemorySession {
            tree: self.tree.clone(),
            id,
            closed: AtomicBool::new(false),
        }
    }

    /// Total node count, root excluded.
    pub fn len(&self) -> usize {
        self.tree.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Tree {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl State {
    fn exists(&self, path: &str) -> bool {
        path == "/" || self.nodes.contains_key(path)
    }

    fn children(&self, path: &str) -> Vec<String> {
        let prefix = child_prefix(path);
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn insert(&mut self, path: &str, owner: Option<SessionId>) -> Result<()> {
        if self.exists(path) {
            return Err(Error::NodeExists(path.to_string()));
        }
        let parent = parent(path).ok_or_else(|| Error::InvalidPath(path.to_string()))?;
        match self.nodes.get(parent) {
            Some(Some(_)) => return Err(Error::EphemeralParent(parent.to_string())),
            None if parent != "/" => return Err(Error::NoNode(parent.to_string())),
            _ => {}
        }
        self.nodes.insert(path.to_string(), owner);
        self.notify(parent, ChildEvent::Added(leaf(path).to_string()));
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        if !self.nodes.contains_key(path) {
            return Err(Error::NoNode(path.to_string()));
        }
        if !self.children(path).is_empty() {
            return Err(Error::NotEmpty(path.to_string()));
        }
        self.nodes.remove(path);
        if let Some(parent) = parent(path) {
            self.notify(parent, ChildEvent::Removed(leaf(path).to_string()));
        }
        Ok(())
    }

    fn notify(&mut self, path: &str, event: ChildEvent) {
        if let Some(watchers) = self.watchers.get_mut(path) {
            watchers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        }
    }
}

/// One session on a `MemoryStore`.
pub struct MemorySession {
    tree: Arc<Tree>,
    id: SessionId,
    closed: AtomicBool,
}

impl MemorySession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Ends the session at once, as if its process died.
    pub fn expire(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.tree.lock();

        let owned: Vec<String> = state
            .nodes
            .iter()
            .filter(|(_, owner)| **owner == Some(self.id))
            .map(|(path, _)| path.clone())
            .collect();
        for path in &owned {
            let _ = state.remove(path);
        }

        for watchers in state.watchers.values_mut() {
            watchers.retain(|(owner, _)| *owner != self.id);
        }
        state.watchers.retain(|_, watchers| !watchers.is_empty());

        debug!(session = self.id, ephemeral = owned.len(), "memory session closed");
    }

    fn open(&self) -> Result<MutexGuard<'_, State>> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        Ok(self.tree.lock())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.expire();
    }
}

#[async_trait::async_trait]
impl CoordinationStore for MemorySession {
    async fn exists(&self, path: &str) -> Result<bool> {
        validate(path)?;
        Ok(self.open()?.exists(path))
    }

    async fn create(&self, path: &str, mode: CreateMode) -> Result<()> {
        validate(path)?;
        let owner = match mode {
            CreateMode::Persistent => None,
            CreateMode::Ephemeral => Some(self.id),
        };
        self.open()?.insert(path, owner)
    }

    async fn ensure_path(&self, path: &str) -> Result<()> {
        validate(path)?;
        let mut state = self.open()?;
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            if !state.exists(&current) {
                state.insert(&current, None)?;
            }
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        validate(path)?;
        self.open()?.remove(path)
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        validate(path)?;
        let state = self.open()?;
        if !state.exists(path) {
            return Err(Error::NoNode(path.to_string()));
        }
        Ok(state.children(path))
    }

    async fn watch_children(&self, path: &str) -> Result<ChildWatch> {
        validate(path)?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.open()?
            .watchers
            .entry(path.to_string())
            .or_default()
            .push((self.id, tx));
        Ok(rx)
    }

    async fn close(&self) {
        self.expire();
    }
}
