//! # Coordination Store
//!
//! The hierarchical key space registrars publish into and discoverers watch.
//!
//! A store handle is one *session*. Ephemeral entries belong to the session
//! that created them and vanish when it closes or dies, which is how a dead
//! provider disappears from discovery without anyone deleting it.
//!
//! ## Invariants
//! - Paths are absolute, `/`-separated, without a trailing slash. `/` always exists.
//! - A node is created only under an existing parent.
//! - Ephemeral nodes have no children.
//! - Child events name the child relative to the watched path.

use std::fmt;

use tokio::sync::mpsc;

#[cfg(feature = "etcd")]
pub mod etcd;
pub mod memory;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    NoNode(String),
    NodeExists(String),
    /// Delete of a node that still has children.
    NotEmpty(String),
    /// Create under an ephemeral parent.
    EphemeralParent(String),
    InvalidPath(String),
    /// The session was closed or expired.
    SessionClosed,
    /// The backing service failed or is unreachable.
    Backend(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoNode(path) => write!(f, "no node at {}", path),
            Self::NodeExists(path) => write!(f, "node already exists at {}", path),
            Self::NotEmpty(path) => write!(f, "node at {} has children", path),
            Self::EphemeralParent(path) => write!(f, "ephemeral node {} cannot have children", path),
            Self::InvalidPath(path) => write!(f, "invalid path '{}'", path),
            Self::SessionClosed => write!(f, "session closed"),
            Self::Backend(msg) => write!(f, "coordination backend: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    /// Removed when the creating session ends.
    Ephemeral,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildEvent {
    Added(String),
    Removed(String),
}

impl ChildEvent {
    pub fn child(&self) -> &str {
        match self {
            Self::Added(child) | Self::Removed(child) => child,
        }
    }
}

/// Child events for one watched path. Dropping it cancels the watch.
pub type ChildWatch = mpsc::UnboundedReceiver<ChildEvent>;

#[async_trait::async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Creates one node. The parent must already exist.
    async fn create(&self, path: &str, mode: CreateMode) -> Result<()>;

    /// Creates `path` and any missing ancestors as persistent nodes.
    /// Succeeds if the path already exists.
    async fn ensure_path(&self, path: &str) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// Names of the direct children of `path`, sorted.
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    /// Subscribes to children being added to or removed from `path`.
    ///
    /// The path need not exist yet; the watch reports its children once it does.
    async fn watch_children(&self, path: &str) -> Result<ChildWatch>;

    /// Ends the session, dropping its ephemeral nodes. Idempotent.
    async fn close(&self);
}

pub(crate) fn validate(path: &str) -> Result<()> {
    let valid = path == "/"
        || (path.starts_with('/') && !path.ends_with('/') && !path[1..].split('/').any(str::is_empty));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidPath(path.to_string()))
    }
}

/// `None` for the root.
pub(crate) fn parent(path: &str) -> Option<&str> {
    match path.rsplit_once('/') {
        Some(("", "")) | None => None,
        Some(("", _)) => Some("/"),
        Some((parent, _)) => Some(parent),
    }
}

/// The final segment of `path`.
pub(crate) fn leaf(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, leaf)| leaf)
}

/// The prefix shared by every descendant of `path`.
pub(crate) fn child_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{}/", path)
    }
}
