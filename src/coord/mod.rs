//! Coordination Service Module
//!
//! The capability surface the election needs from a hierarchical
//! coordination service, plus an in-process implementation of it.

pub mod memory;
pub mod path;

pub use memory::{MemoryService, MemorySession};

use serde::{Deserialize, Serialize};

use crate::error::CoordError;

/// Result type for coordination service calls
pub type CoordResult<T> = std::result::Result<T, CoordError>;

/// One-shot notification delivered to a watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
    /// The set of children under the watched path changed
    ChildrenChanged,
    /// The watched path itself was deleted
    NodeDeleted,
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notification::ChildrenChanged => write!(f, "CHILDREN_CHANGED"),
            Notification::NodeDeleted => write!(f, "NODE_DELETED"),
        }
    }
}

/// Callback attached to a children listing.
///
/// Consumed on delivery, so a watcher can fire at most once.
pub struct Watcher(Box<dyn FnOnce(Notification) + Send + Sync + 'static>);

impl Watcher {
    /// Wrap a callback
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Notification) + Send + Sync + 'static,
    {
        Self(Box::new(callback))
    }

    /// Deliver the notification
    pub fn fire(self, notification: Notification) {
        (self.0)(notification)
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Watcher")
    }
}

/// Client view of a coordination service session
#[async_trait::async_trait]
pub trait Coordinator: Send + Sync {
    /// Create `path` and any missing ancestors; existing nodes are kept
    async fn mkdirp(&self, path: &str) -> CoordResult<()>;

    /// Create an ephemeral node named `<parent>/<prefix><sequence>`.
    ///
    /// Returns the full path of the created node.
    async fn create_ephemeral_sequential(&self, parent: &str, prefix: &str) -> CoordResult<String>;

    /// List the children of `path` and leave `watcher` registered on it
    async fn get_children(&self, path: &str, watcher: Watcher) -> CoordResult<Vec<String>>;

    /// Remove the node at `path`
    async fn remove(&self, path: &str) -> CoordResult<()>;
}
