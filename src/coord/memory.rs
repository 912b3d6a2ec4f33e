//! In-process coordination service.
//!
//! A [`MemoryStore`] is one namespace tree shared by any number of
//! [`MemorySession`]s, each standing in for a separate client connection.
//! Ephemeral nodes are owned by the session that created them and vanish when
//! it expires, which is how a crashed worker's claims get released.

use super::{
    Coordinator, EventKind, NodeExistsPolicy, NodeMissingPolicy, SessionState, WatchedEvent,
    Watcher, join_path, parent_path, validate_path,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

type SessionId = u64;

struct Node {
    data: Vec<u8>,
    owner: Option<SessionId>,
    children: BTreeSet<String>,
}

impl Node {
    fn new(data: Vec<u8>, owner: Option<SessionId>) -> Self {
        Self {
            data,
            owner,
            children: BTreeSet::new(),
        }
    }
}

struct Tree {
    nodes: HashMap<String, Node>,
    child_watches: HashMap<String, Vec<(SessionId, Watcher)>>,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), Node::new(Vec::new(), None));
        Self {
            nodes,
            child_watches: HashMap::new(),
        }
    }

    fn create(&mut self, path: &str, data: &[u8], owner: Option<SessionId>) -> Result<()> {
        if self.nodes.contains_key(path) {
            return Err(Error::NodeExists(path.to_string()));
        }
        let parent = parent_path(path).ok_or_else(|| Error::NodeExists(path.to_string()))?;
        let name = &path[path.rfind('/').map_or(0, |i| i + 1)..];
        let parent_node = self
            .nodes
            .get_mut(parent)
            .ok_or_else(|| Error::NoNode(parent.to_string()))?;
        if parent_node.owner.is_some() {
            return Err(Error::Coordination(format!(
                "ephemeral node {parent} cannot have children"
            )));
        }
        parent_node.children.insert(name.to_string());
        self.nodes
            .insert(path.to_string(), Node::new(data.to_vec(), owner));
        self.fire_children_changed(parent);
        Ok(())
    }

    /// Remove `path` and everything below it, deepest first.
    fn remove_subtree(&mut self, path: &str) {
        let mut order = Vec::new();
        let mut stack = vec![path.to_string()];
        while let Some(p) = stack.pop() {
            if let Some(node) = self.nodes.get(&p) {
                stack.extend(node.children.iter().map(|c| join_path(&p, c)));
                order.push(p);
            }
        }
        for p in order.iter().rev() {
            self.remove_node(p);
        }
    }

    fn remove_node(&mut self, path: &str) {
        if self.nodes.remove(path).is_none() {
            return;
        }
        if let Some(watchers) = self.child_watches.remove(path) {
            for (_, w) in watchers {
                w.fire(WatchedEvent::node(EventKind::NodeDeleted, path));
            }
        }
        if let Some(parent) = parent_path(path) {
            let name = &path[path.rfind('/').map_or(0, |i| i + 1)..];
            if let Some(parent_node) = self.nodes.get_mut(parent) {
                parent_node.children.remove(name);
            }
            self.fire_children_changed(parent);
        }
    }

    fn fire_children_changed(&mut self, path: &str) {
        if let Some(watchers) = self.child_watches.remove(path) {
            for (_, w) in watchers {
                w.fire(WatchedEvent::node(EventKind::ChildrenChanged, path));
            }
        }
    }

    fn add_child_watch(&mut self, path: &str, session: SessionId, watcher: Watcher) {
        let entries = self.child_watches.entry(path.to_string()).or_default();
        // Receivers dropped before the path changed would otherwise linger.
        entries.retain(|(_, w)| !w.is_closed());
        if !entries.iter().any(|(_, w)| w.same_as(&watcher)) {
            entries.push((session, watcher));
        }
    }
}

/// Shared namespace tree. Cloning yields another handle onto the same tree.
#[derive(Clone)]
pub struct MemoryStore {
    tree: Arc<Mutex<Tree>>,
    next_session: Arc<AtomicU64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new())),
            next_session: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Open a new client session against this store.
    pub fn session(&self) -> MemorySession {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        debug!(session = id, "session opened");
        MemorySession {
            store: self.clone(),
            id,
            expired: AtomicBool::new(false),
        }
    }

    /// Watch registrations still waiting to fire, across all paths.
    pub fn watch_count(&self) -> usize {
        self.tree().child_watches.values().map(Vec::len).sum()
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One client session. Implements [`Coordinator`].
pub struct MemorySession {
    store: MemoryStore,
    id: SessionId,
    // Only flipped with the tree locked, so a call holding the lock sees a
    // stable value for its whole duration.
    expired: AtomicBool,
}

impl MemorySession {
    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }

    fn check_live(&self) -> Result<()> {
        if self.is_expired() {
            Err(Error::SessionExpired)
        } else {
            Ok(())
        }
    }

    /// End the session as if its lease ran out.
    ///
    /// Every ephemeral node it owns is deleted (firing the usual watches) and
    /// each of its own pending watchers receives a session-expired event.
    /// All further calls through this session fail with
    /// [`Error::SessionExpired`].
    pub fn expire(&self) {
        let mut tree = self.store.tree();
        if self.expired.swap(true, Ordering::AcqRel) {
            return;
        }

        // Detach this session's watchers first; they hear only about the expiry.
        let mut notified: Vec<Watcher> = Vec::new();
        for entries in tree.child_watches.values_mut() {
            entries.retain(|(session, w)| {
                if *session != self.id {
                    return true;
                }
                if !notified.iter().any(|n| n.same_as(w)) {
                    notified.push(w.clone());
                }
                false
            });
        }
        tree.child_watches.retain(|_, entries| !entries.is_empty());

        let mut owned: Vec<String> = tree
            .nodes
            .iter()
            .filter(|(_, n)| n.owner == Some(self.id))
            .map(|(p, _)| p.clone())
            .collect();
        owned.sort();
        for path in &owned {
            tree.remove_node(path);
        }
        drop(tree);

        for w in notified {
            w.fire(WatchedEvent::session(SessionState::Expired));
        }
        info!(session = self.id, released = owned.len(), "session expired");
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.expire();
    }
}

#[async_trait]
impl Coordinator for MemorySession {
    async fn ensure_path(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        let mut tree = self.store.tree();
        self.check_live()?;

        let mut prefix = String::new();
        for segment in path[1..].split('/') {
            prefix.push('/');
            prefix.push_str(segment);
            match tree.create(&prefix, &[], None) {
                Ok(()) | Err(Error::NodeExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn create_persistent(
        &self,
        path: &str,
        data: &[u8],
        policy: NodeExistsPolicy,
    ) -> Result<()> {
        validate_path(path)?;
        let mut tree = self.store.tree();
        self.check_live()?;

        match tree.create(path, data, None) {
            Err(Error::NodeExists(_)) if policy == NodeExistsPolicy::Skip => Ok(()),
            Err(Error::NodeExists(_)) if policy == NodeExistsPolicy::Overwrite => {
                if let Some(node) = tree.nodes.get_mut(path) {
                    node.data = data.to_vec();
                }
                Ok(())
            }
            other => other,
        }
    }

    async fn create_ephemeral(&self, path: &str, data: &[u8]) -> Result<()> {
        validate_path(path)?;
        let mut tree = self.store.tree();
        self.check_live()?;
        tree.create(path, data, Some(self.id))
    }

    async fn get_data(&self, path: &str) -> Result<Vec<u8>> {
        let tree = self.store.tree();
        self.check_live()?;
        tree.nodes
            .get(path)
            .map(|n| n.data.clone())
            .ok_or_else(|| Error::NoNode(path.to_string()))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let tree = self.store.tree();
        self.check_live()?;
        Ok(tree.nodes.contains_key(path))
    }

    async fn get_children(&self, path: &str, watch: Option<Watcher>) -> Result<Vec<String>> {
        let mut tree = self.store.tree();
        self.check_live()?;

        let children: Vec<String> = tree
            .nodes
            .get(path)
            .ok_or_else(|| Error::NoNode(path.to_string()))?
            .children
            .iter()
            .cloned()
            .collect();
        if let Some(watcher) = watch {
            tree.add_child_watch(path, self.id, watcher);
        }
        Ok(children)
    }

    async fn delete_recursive(&self, path: &str, policy: NodeMissingPolicy) -> Result<()> {
        validate_path(path)?;
        let mut tree = self.store.tree();
        self.check_live()?;

        if !tree.nodes.contains_key(path) {
            return match policy {
                NodeMissingPolicy::Skip => Ok(()),
                NodeMissingPolicy::Fail => Err(Error::NoNode(path.to_string())),
            };
        }
        tree.remove_subtree(path);
        Ok(())
    }
}
