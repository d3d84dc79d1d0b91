//! Election Events
//!
//! Events are fanned out to explicit subscriptions. Each subscription is a
//! revocable handle over its own unbounded channel, so a slow consumer never
//! blocks the topology watcher.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::topology::Topology;
use crate::error::{Error, ErrorKind};

/// Event delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ElectionEvent {
    /// Group membership differs from the last delivered snapshot
    TopologyChanged { topology: Topology },
    /// The candidate immediately ahead of us changed
    LeaderChanged { leader: Option<String> },
    /// The candidate immediately behind us changed
    FollowerChanged { follower: Option<String> },
    /// We now hold the lowest sequence number in the group
    GlobalLeaderAcquired,
    /// Something went wrong in the background
    Error { kind: ErrorKind, detail: String },
}

impl ElectionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ElectionEvent::TopologyChanged { .. } => EventKind::Topology,
            ElectionEvent::LeaderChanged { .. } => EventKind::Leader,
            ElectionEvent::FollowerChanged { .. } => EventKind::Follower,
            ElectionEvent::GlobalLeaderAcquired => EventKind::GlobalLeader,
            ElectionEvent::Error { .. } => EventKind::Error,
        }
    }
}

impl From<&Error> for ElectionEvent {
    fn from(err: &Error) -> Self {
        ElectionEvent::Error {
            kind: err.kind(),
            detail: err.to_string(),
        }
    }
}

impl std::fmt::Display for ElectionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElectionEvent::TopologyChanged { topology } => write!(f, "topology {}", topology),
            ElectionEvent::LeaderChanged { leader } => {
                write!(f, "leader {}", leader.as_deref().unwrap_or("(none)"))
            }
            ElectionEvent::FollowerChanged { follower } => {
                write!(f, "follower {}", follower.as_deref().unwrap_or("(none)"))
            }
            ElectionEvent::GlobalLeaderAcquired => write!(f, "global leader"),
            ElectionEvent::Error { kind, detail } => write!(f, "error {}: {}", kind, detail),
        }
    }
}

/// Discriminant used for filtering subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Topology,
    Leader,
    Follower,
    GlobalLeader,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Topology,
        EventKind::Leader,
        EventKind::Follower,
        EventKind::GlobalLeader,
        EventKind::Error,
    ];

    /// Kinds that stop firing as soon as a participant leaves
    pub const MEMBERSHIP: [EventKind; 4] = [
        EventKind::Topology,
        EventKind::Leader,
        EventKind::Follower,
        EventKind::GlobalLeader,
    ];
}

/// Set of event kinds a subscription receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    kinds: Vec<EventKind>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self {
            kinds: EventKind::ALL.to_vec(),
        }
    }

    pub fn only(kinds: &[EventKind]) -> Self {
        let mut filter = Self { kinds: Vec::new() };
        for kind in kinds {
            if !filter.kinds.contains(kind) {
                filter.kinds.push(*kind);
            }
        }
        filter
    }

    pub fn matches(&self, kind: EventKind) -> bool {
        self.kinds.contains(&kind)
    }

    fn remove(&mut self, kinds: &[EventKind]) {
        self.kinds.retain(|k| !kinds.contains(k));
    }

    fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl From<EventKind> for EventFilter {
    fn from(kind: EventKind) -> Self {
        Self::only(&[kind])
    }
}

struct Subscriber {
    id: u64,
    filter: EventFilter,
    sender: mpsc::UnboundedSender<ElectionEvent>,
}

/// Fan-out of election events to subscriptions
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscription receiving the kinds in `filter`
    pub async fn subscribe(self: &Arc<Self>, filter: EventFilter) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();

        self.subscribers.write().await.push(Subscriber { id, filter, sender });

        Subscription {
            id,
            receiver,
            bus: Arc::downgrade(self),
        }
    }

    /// Deliver an event to every matching subscription
    pub async fn emit(&self, event: ElectionEvent) {
        let kind = event.kind();
        let mut subscribers = self.subscribers.write().await;

        // Dropped subscriptions are pruned as they are discovered
        subscribers.retain(|s| {
            if !s.filter.matches(kind) {
                return !s.sender.is_closed();
            }
            s.sender.send(event.clone()).is_ok()
        });
    }

    /// Stop delivering `kinds`; subscriptions left with nothing are closed
    pub async fn detach(&self, kinds: &[EventKind]) {
        let mut subscribers = self.subscribers.write().await;
        for subscriber in subscribers.iter_mut() {
            subscriber.filter.remove(kinds);
        }
        subscribers.retain(|s| !s.filter.is_empty());
    }

    /// Close every subscription
    pub async fn clear(&self) {
        self.subscribers.write().await.clear();
    }

    async fn unsubscribe(&self, id: u64) {
        self.subscribers.write().await.retain(|s| s.id != id);
    }

    /// Number of live subscriptions
    #[cfg(test)]
    async fn len(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

/// Handle to a stream of election events.
///
/// The stream ends once the participant detaches it (on `leave`) or the
/// handle is revoked with [`Subscription::unsubscribe`].
pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<ElectionEvent>,
    bus: Weak<EventBus>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event, `None` once detached
    pub async fn recv(&mut self) -> Option<ElectionEvent> {
        self.receiver.recv().await
    }

    /// Next already-delivered event, if any
    pub fn try_recv(&mut self) -> Option<ElectionEvent> {
        self.receiver.try_recv().ok()
    }

    /// Drain every already-delivered event
    pub fn drain(&mut self) -> Vec<ElectionEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }

    /// Revoke this subscription
    pub async fn unsubscribe(self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id).await;
        }
    }

    /// Consume the handle as a `Stream`
    pub fn into_stream(self) -> UnboundedReceiverStream<ElectionEvent> {
        UnboundedReceiverStream::new(self.receiver)
    }
}
