//! In-Memory Coordination Service
//!
//! A single-process stand-in for a hierarchical coordination service:
//! persistent and ephemeral nodes, per-parent sequence counters, one-shot
//! children watches and session-scoped cleanup of ephemeral nodes.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::path;
use super::{CoordResult, Coordinator, Notification, Watcher};
use crate::error::CoordError;

/// Width of the zero-padded sequence suffix
const SEQUENCE_WIDTH: usize = 10;

/// A single node in the tree
struct Node {
    /// Session owning this node, if ephemeral
    owner: Option<Uuid>,
    /// Names of direct children
    children: BTreeSet<String>,
    /// Next sequence number handed to a sequential child
    next_sequence: u64,
}

impl Node {
    fn new(owner: Option<Uuid>) -> Self {
        Self {
            owner,
            children: BTreeSet::new(),
            next_sequence: 0,
        }
    }
}

/// Shared tree state
struct Tree {
    /// All nodes keyed by full path
    nodes: HashMap<String, Node>,
    /// Pending children watches keyed by path
    watches: HashMap<String, Vec<Watcher>>,
    /// Ephemeral nodes per live session, in creation order
    sessions: HashMap<Uuid, Vec<String>>,
    /// Whether clients can currently reach the service
    available: bool,
}

/// Watch notifications collected under the lock and delivered after it
type Fired = Vec<(Watcher, Notification)>;

impl Tree {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), Node::new(None));

        Self {
            nodes,
            watches: HashMap::new(),
            sessions: HashMap::new(),
            available: true,
        }
    }

    /// Fail unless the service is reachable and the session is live
    fn check(&self, session: Uuid) -> CoordResult<()> {
        if !self.available {
            return Err(CoordError::ConnectionLoss("service unreachable".into()));
        }
        if !self.sessions.contains_key(&session) {
            return Err(CoordError::SessionExpired);
        }
        Ok(())
    }

    fn trigger(&mut self, path: &str, notification: Notification, fired: &mut Fired) {
        if let Some(watchers) = self.watches.remove(path) {
            fired.extend(watchers.into_iter().map(|w| (w, notification)));
        }
    }

    fn insert(&mut self, full: String, owner: Option<Uuid>, fired: &mut Fired) -> CoordResult<()> {
        let parent_path = path::parent(&full)
            .ok_or_else(|| CoordError::NodeExists(full.clone()))?
            .to_string();
        let parent = self
            .nodes
            .get_mut(&parent_path)
            .ok_or_else(|| CoordError::NoNode(parent_path.clone()))?;
        if parent.owner.is_some() {
            // Ephemeral nodes cannot have children
            return Err(CoordError::BadPath(full));
        }
        parent.children.insert(path::basename(&full).to_string());

        self.nodes.insert(full.clone(), Node::new(owner));
        if let Some(owner) = owner {
            self.sessions.entry(owner).or_default().push(full);
        }
        self.trigger(&parent_path, Notification::ChildrenChanged, fired);
        Ok(())
    }

    fn delete(&mut self, full: &str, fired: &mut Fired) -> CoordResult<()> {
        let node = self
            .nodes
            .get(full)
            .ok_or_else(|| CoordError::NoNode(full.to_string()))?;
        if full == "/" {
            return Err(CoordError::BadPath(full.to_string()));
        }
        if !node.children.is_empty() {
            return Err(CoordError::NotEmpty(full.to_string()));
        }

        if let Some(node) = self.nodes.remove(full) {
            if let Some(owner) = node.owner {
                if let Some(owned) = self.sessions.get_mut(&owner) {
                    owned.retain(|p| p != full);
                }
            }
        }

        self.trigger(full, Notification::NodeDeleted, fired);
        if let Some(parent_path) = path::parent(full) {
            let parent_path = parent_path.to_string();
            if let Some(parent) = self.nodes.get_mut(&parent_path) {
                parent.children.remove(path::basename(full));
            }
            self.trigger(&parent_path, Notification::ChildrenChanged, fired);
        }
        Ok(())
    }
}

fn deliver(fired: Fired) {
    for (watcher, notification) in fired {
        watcher.fire(notification);
    }
}

/// In-process coordination service shared by any number of sessions
#[derive(Clone)]
pub struct MemoryService {
    tree: Arc<RwLock<Tree>>,
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryService {
    /// Create an empty service holding only the root node
    pub fn new() -> Self {
        Self {
            tree: Arc::new(RwLock::new(Tree::new())),
        }
    }

    /// Open a new client session
    pub async fn session(&self) -> MemorySession {
        let id = Uuid::new_v4();
        self.tree.write().await.sessions.insert(id, Vec::new());
        tracing::debug!("Opened coordination session {}", id);

        MemorySession {
            id,
            tree: Arc::clone(&self.tree),
        }
    }

    /// Make the service reachable or unreachable for every session
    pub async fn set_available(&self, available: bool) {
        self.tree.write().await.available = available;
    }

    /// Whether a node exists at `path`
    pub async fn exists(&self, path: &str) -> bool {
        self.tree.read().await.nodes.contains_key(path)
    }

    /// Children of `path` in name order, without registering a watch
    pub async fn children(&self, path: &str) -> Option<Vec<String>> {
        let tree = self.tree.read().await;
        tree.nodes
            .get(path)
            .map(|n| n.children.iter().cloned().collect())
    }
}

/// One client session against a [`MemoryService`]
pub struct MemorySession {
    id: Uuid,
    tree: Arc<RwLock<Tree>>,
}

impl MemorySession {
    /// Session identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// End the session, deleting its ephemeral nodes in creation order
    pub async fn close(&self) {
        let mut fired = Vec::new();
        {
            let mut tree = self.tree.write().await;
            let owned = tree.sessions.remove(&self.id).unwrap_or_default();
            for node in owned {
                if let Err(e) = tree.delete(&node, &mut fired) {
                    tracing::warn!("Failed to expire ephemeral node {}: {}", node, e);
                }
            }
        }
        tracing::debug!("Closed coordination session {}", self.id);
        deliver(fired);
    }
}

#[async_trait::async_trait]
impl Coordinator for MemorySession {
    async fn mkdirp(&self, target: &str) -> CoordResult<()> {
        let target = path::normalize(target)?;
        let mut fired = Vec::new();
        {
            let mut tree = self.tree.write().await;
            tree.check(self.id)?;

            let mut current = String::new();
            for segment in target.split('/').filter(|s| !s.is_empty()) {
                let parent = if current.is_empty() { "/" } else { current.as_str() };
                current = path::join(parent, segment);
                if !tree.nodes.contains_key(&current) {
                    tree.insert(current.clone(), None, &mut fired)?;
                }
            }
        }
        deliver(fired);
        Ok(())
    }

    async fn create_ephemeral_sequential(&self, parent: &str, prefix: &str) -> CoordResult<String> {
        let parent = path::normalize(parent)?;
        if prefix.contains('/') {
            return Err(CoordError::BadPath(format!("{}/{}", parent, prefix)));
        }

        let mut fired = Vec::new();
        let created = {
            let mut tree = self.tree.write().await;
            tree.check(self.id)?;

            let node = tree
                .nodes
                .get_mut(&parent)
                .ok_or_else(|| CoordError::NoNode(parent.clone()))?;
            let sequence = node.next_sequence;
            node.next_sequence += 1;

            let name = format!("{}{:0width$}", prefix, sequence, width = SEQUENCE_WIDTH);
            let full = path::join(&parent, &name);
            tree.insert(full.clone(), Some(self.id), &mut fired)?;
            full
        };
        deliver(fired);
        Ok(created)
    }

    async fn get_children(&self, target: &str, watcher: Watcher) -> CoordResult<Vec<String>> {
        let target = path::normalize(target)?;
        let mut tree = self.tree.write().await;
        tree.check(self.id)?;

        let children: Vec<String> = tree
            .nodes
            .get(&target)
            .ok_or_else(|| CoordError::NoNode(target.clone()))?
            .children
            .iter()
            .cloned()
            .collect();
        tree.watches.entry(target).or_default().push(watcher);
        Ok(children)
    }

    async fn remove(&self, target: &str) -> CoordResult<()> {
        let target = path::normalize(target)?;
        let mut fired = Vec::new();
        {
            let mut tree = self.tree.write().await;
            tree.check(self.id)?;
            tree.delete(&target, &mut fired)?;
        }
        deliver(fired);
        Ok(())
    }
}
