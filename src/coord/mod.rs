//! Coordination service interface.
//!
//! Any tree-structured store with exclusive creates, session-bound ephemeral
//! nodes and one-shot child watches can back a work queue. ZooKeeper and
//! etcd-family stores both fit; [`memory`] provides an in-process service with
//! the same contract.

pub mod memory;

use crate::error::{Error, Result};
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

pub use memory::{MemorySession, MemoryStore};

/// What to do when a persistent create finds the node already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeExistsPolicy {
    /// Leave the existing node and its data untouched.
    Skip,
    /// Fail with [`Error::NodeExists`].
    Fail,
    /// Replace the existing node's data.
    Overwrite,
}

/// What to do when a delete finds nothing to delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMissingPolicy {
    Skip,
    Fail,
}

/// Session state changes delivered to every watcher a session registered.
/// Expiry is the only state a session reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionState {
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ChildrenChanged,
    NodeCreated,
    NodeDeleted,
    DataChanged,
    Session(SessionState),
}

/// A watch notification. Session events carry no path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub kind: EventKind,
    pub path: Option<String>,
}

impl WatchedEvent {
    pub fn node(kind: EventKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: Some(path.into()),
        }
    }

    pub fn session(state: SessionState) -> Self {
        Self {
            kind: EventKind::Session(state),
            path: None,
        }
    }
}

/// Delivery end of a watch registration.
///
/// A registration fires at most once. Registering the same watcher twice on
/// one path before it fires still yields a single notification.
#[derive(Debug, Clone)]
pub struct Watcher {
    tx: UnboundedSender<WatchedEvent>,
}

impl Watcher {
    pub fn new(tx: UnboundedSender<WatchedEvent>) -> Self {
        Self { tx }
    }

    /// Deliver an event. A dropped receiver is not an error.
    pub fn fire(&self, event: WatchedEvent) {
        let _ = self.tx.send(event);
    }

    pub fn same_as(&self, other: &Watcher) -> bool {
        self.tx.same_channel(&other.tx)
    }

    /// True once the receiving end is gone; nobody can observe a firing.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Client handle onto a coordination service session.
///
/// Ephemeral nodes created through a handle live exactly as long as its
/// session. All calls may block on I/O; timeouts and retries belong to the
/// implementation.
#[async_trait]
pub trait Coordinator: Send + Sync + 'static {
    /// Create a persistent node and any missing ancestors. Existing nodes are kept.
    async fn ensure_path(&self, path: &str) -> Result<()>;

    async fn create_persistent(
        &self,
        path: &str,
        data: &[u8],
        policy: NodeExistsPolicy,
    ) -> Result<()>;

    /// Create a session-bound node, failing with [`Error::NodeExists`] if present.
    async fn create_ephemeral(&self, path: &str, data: &[u8]) -> Result<()>;

    async fn get_data(&self, path: &str) -> Result<Vec<u8>>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// List child names, optionally arming a one-shot child watch on `path`.
    async fn get_children(&self, path: &str, watch: Option<Watcher>) -> Result<Vec<String>>;

    async fn delete_recursive(&self, path: &str, policy: NodeMissingPolicy) -> Result<()>;
}

/// Join a parent path and a child name.
pub fn join_path(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Parent of an absolute path; `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) if path.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(i) => Some(&path[..i]),
    }
}

/// Check that `name` can be used as a single path segment.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument("node name must not be empty".to_string()));
    }
    if name.contains('/') {
        return Err(Error::InvalidArgument(format!(
            "node name must not contain '/': {name}"
        )));
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidArgument(format!("node name is reserved: {name}")));
    }
    Ok(())
}

/// Check that `path` is absolute, normalized and not the root.
pub fn validate_path(path: &str) -> Result<()> {
    let Some(rest) = path.strip_prefix('/') else {
        return Err(Error::InvalidArgument(format!(
            "path must be absolute: {path}"
        )));
    };
    if rest.is_empty() {
        return Err(Error::InvalidArgument("path must not be the root".to_string()));
    }
    rest.split('/').try_for_each(validate_name)
}
