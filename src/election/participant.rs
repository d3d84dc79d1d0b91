//! Election Participant
//!
//! Membership control for one candidate in one election group: creating
//! and removing the candidate node, and owning the topology watcher that
//! keeps the candidate's role current.

use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

use super::events::{ElectionEvent, EventFilter, EventKind, Subscription};
use super::resolver::ParticipantState;
use super::topology::SEQUENCE_SEPARATOR;
use super::watcher::{ElectionContext, TopologyWatcher};
use crate::coord::{path, Coordinator};
use crate::error::{CoordError, Error, Result};

/// One candidate's handle on an election group
pub struct Participant {
    ctx: Arc<ElectionContext>,
    /// Running watcher; the lock also serializes join, observe and leave
    watcher: Mutex<Option<TopologyWatcher>>,
}

impl Participant {
    /// Create a participant for the group at `group`.
    ///
    /// Nothing is contacted until [`join`](Self::join) or
    /// [`observe`](Self::observe).
    pub fn new(group: &str, coordinator: Arc<dyn Coordinator>) -> Result<Self> {
        let group = path::normalize(group)?;

        Ok(Self {
            ctx: Arc::new(ElectionContext::new(group, coordinator)),
            watcher: Mutex::new(None),
        })
    }

    /// Normalized group path
    pub fn group_path(&self) -> &str {
        &self.ctx.group
    }

    /// Receive the events matching `filter` until the next leave
    pub async fn subscribe(&self, filter: impl Into<EventFilter>) -> Subscription {
        self.ctx.bus.subscribe(filter.into()).await
    }

    /// Vote in the election.
    ///
    /// Creates a fresh candidate node `<prefix>-<sequence>` even when already
    /// a member, then waits until the watcher has resolved a listing that
    /// includes it. Returns the new node's name.
    pub async fn join(&self, prefix: Option<&str>) -> Result<String> {
        let prefix = prefix.unwrap_or("");
        if prefix.contains('/') {
            return Err(Error::InvalidPath(format!("{}/{}", self.ctx.group, prefix)));
        }

        let mut watcher = self.watcher.lock().await;
        tracing::info!("Joining election {} with prefix {:?}", self.ctx.group, prefix);

        self.ctx.coordinator.mkdirp(&self.ctx.group).await?;
        let created = self
            .ctx
            .coordinator
            .create_ephemeral_sequential(&self.ctx.group, &format!("{}{}", prefix, SEQUENCE_SEPARATOR))
            .await?;
        let node = path::basename(&created).to_string();
        tracing::info!("Created election node {}", created);

        self.ensure_watcher(&mut watcher, Some(node.clone())).await?;
        Ok(node)
    }

    /// Follow the group's topology without voting
    pub async fn observe(&self) -> Result<()> {
        let mut watcher = self.watcher.lock().await;
        tracing::info!("Observing election {}", self.ctx.group);

        self.ctx.coordinator.mkdirp(&self.ctx.group).await?;
        self.ensure_watcher(&mut watcher, None).await
    }

    /// Fetch the group again and re-register the watch.
    ///
    /// Used to recover after a transient fetch failure left no watch behind.
    pub async fn refresh(&self) -> Result<()> {
        let watcher = self.watcher.lock().await;
        match watcher.as_ref() {
            Some(w) if w.is_running(self.ctx.current_generation()) => Self::resolve_now(w, None).await,
            _ => Err(Error::NotActive),
        }
    }

    /// Leave the election.
    ///
    /// Local state is reset and subscriptions are detached whether or not
    /// removing the candidate node succeeds. Leaving while not a member
    /// succeeds without contacting the service.
    pub async fn leave(&self) -> Result<()> {
        let mut watcher = self.watcher.lock().await;

        let node = {
            let mut state = self.ctx.state.lock().await;
            self.ctx.advance_generation();
            std::mem::take(&mut *state).self_node
        };
        if let Some(w) = watcher.take() {
            w.stop();
        }
        self.ctx.bus.detach(&EventKind::MEMBERSHIP).await;

        let node = match node {
            Some(node) => node,
            None => {
                self.ctx.bus.clear().await;
                return Ok(());
            }
        };

        let full = path::join(&self.ctx.group, &node);
        tracing::info!("Leaving election {}, removing {}", self.ctx.group, full);

        let result = match self.ctx.coordinator.remove(&full).await {
            Ok(()) => Ok(()),
            Err(CoordError::NoNode(_)) => {
                tracing::warn!("Election node {} was already gone", full);
                Ok(())
            }
            Err(e) => {
                let err = Error::from(e);
                tracing::error!("Unable to remove election node {}: {}", full, err);
                self.ctx.bus.emit(ElectionEvent::from(&err)).await;
                Err(err)
            }
        };

        self.ctx.bus.clear().await;
        result
    }

    /// Copy of the current election state
    pub async fn snapshot(&self) -> ParticipantState {
        self.ctx.state.lock().await.clone()
    }

    pub async fn self_node(&self) -> Option<String> {
        self.ctx.state.lock().await.self_node.clone()
    }

    pub async fn is_global_leader(&self) -> bool {
        self.ctx.state.lock().await.is_global_leader
    }

    /// Whether a topology watcher is currently running
    pub async fn is_watching(&self) -> bool {
        let watcher = self.watcher.lock().await;
        watcher
            .as_ref()
            .map_or(false, |w| w.is_running(self.ctx.current_generation()))
    }

    /// Start a watcher unless one is alive, then resolve a fresh listing
    async fn ensure_watcher(
        &self,
        slot: &mut Option<TopologyWatcher>,
        adopt: Option<String>,
    ) -> Result<()> {
        let generation = self.ctx.current_generation();
        let running = slot.as_ref().map_or(false, |w| w.is_running(generation));

        if !running {
            if let Some(stale) = slot.take() {
                stale.stop();
            }
            *slot = Some(TopologyWatcher::start(Arc::clone(&self.ctx)));
        }

        match slot.as_ref() {
            Some(w) => Self::resolve_now(w, adopt).await,
            None => Err(Error::NotActive),
        }
    }

    async fn resolve_now(watcher: &TopologyWatcher, adopt: Option<String>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        watcher.refresh(adopt, Some(tx))?;
        rx.await.map_err(|_| Error::NotActive)?
    }
}

impl Drop for Participant {
    fn drop(&mut self) {
        if let Some(w) = self.watcher.get_mut().take() {
            w.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{CoordResult, MemoryService, MemorySession, Watcher};
    use crate::election::topology::Topology;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn participant(service: &MemoryService) -> Participant {
        Participant::new("/election", Arc::new(service.session().await)).unwrap()
    }

    /// Session that counts how often the group is listed
    struct CountingSession {
        inner: MemorySession,
        listings: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Coordinator for CountingSession {
        async fn mkdirp(&self, path: &str) -> CoordResult<()> {
            self.inner.mkdirp(path).await
        }

        async fn create_ephemeral_sequential(&self, parent: &str, prefix: &str) -> CoordResult<String> {
            self.inner.create_ephemeral_sequential(parent, prefix).await
        }

        async fn get_children(&self, path: &str, watcher: Watcher) -> CoordResult<Vec<String>> {
            self.listings.fetch_add(1, Ordering::SeqCst);
            self.inner.get_children(path, watcher).await
        }

        async fn remove(&self, path: &str) -> CoordResult<()> {
            self.inner.remove(path).await
        }
    }

    async fn next_topology(sub: &mut Subscription) -> Topology {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), sub.recv())
                .await
                .unwrap();
            if let Some(ElectionEvent::TopologyChanged { topology }) = event {
                return topology;
            }
        }
    }

    #[tokio::test]
    async fn test_invalid_group_path() {
        let service = MemoryService::new();
        let session = Arc::new(service.session().await);

        assert!(matches!(
            Participant::new("election", session.clone()),
            Err(Error::InvalidPath(_))
        ));
        assert_eq!(
            Participant::new("/election/", session).unwrap().group_path(),
            "/election"
        );
    }

    #[tokio::test]
    async fn test_invalid_prefix() {
        let service = MemoryService::new();
        let p = participant(&service).await;

        assert!(matches!(p.join(Some("a/b")).await, Err(Error::InvalidPath(_))));
        assert!(!service.exists("/election").await);
    }

    #[tokio::test]
    async fn test_join_without_prefix() {
        let service = MemoryService::new();
        let p = participant(&service).await;

        let node = p.join(None).await.unwrap();
        assert_eq!(node, "-0000000000");
        assert!(p.is_global_leader().await);
        assert!(p.is_watching().await);

        let state = p.snapshot().await;
        assert_eq!(state.rank, Some(0));
        assert_eq!(state.last_topology.names(), &[node]);
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let service = MemoryService::new();
        let p = participant(&service).await;
        let node = p.join(Some("voter")).await.unwrap();
        let mut sub = p.subscribe(EventFilter::all()).await;

        p.leave().await.unwrap();
        p.leave().await.unwrap();

        assert_eq!(service.children("/election").await.unwrap(), Vec::<String>::new());
        assert!(!p.is_watching().await);
        assert_eq!(p.snapshot().await, ParticipantState::default());
        assert_eq!(sub.recv().await, None);
        assert!(!service.children("/election").await.unwrap().contains(&node));
    }

    #[tokio::test]
    async fn test_leave_when_never_joined() {
        let service = MemoryService::new();
        let p = participant(&service).await;

        p.leave().await.unwrap();
        assert!(!service.exists("/election").await);
    }

    #[tokio::test]
    async fn test_leave_reports_removal_failure() {
        let service = MemoryService::new();
        let p = participant(&service).await;
        p.join(Some("voter")).await.unwrap();
        let mut errors = p.subscribe(EventKind::Error).await;

        service.set_available(false).await;
        let err = p.leave().await.unwrap_err();
        assert!(err.is_retryable());

        // State is reset regardless
        assert_eq!(p.self_node().await, None);
        match errors.recv().await {
            Some(ElectionEvent::Error { kind, .. }) => {
                assert_eq!(kind, ErrorKind::CoordinationUnavailable)
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(errors.recv().await, None);

        service.set_available(true).await;
        p.leave().await.unwrap();
    }

    #[tokio::test]
    async fn test_join_unavailable() {
        let service = MemoryService::new();
        let p = participant(&service).await;

        service.set_available(false).await;
        let err = p.join(None).await.unwrap_err();
        assert!(matches!(err, Error::CoordinationUnavailable(_)));
        assert_eq!(p.self_node().await, None);
    }

    #[tokio::test]
    async fn test_refresh_requires_watcher() {
        let service = MemoryService::new();
        let p = participant(&service).await;

        assert!(matches!(p.refresh().await, Err(Error::NotActive)));
        p.observe().await.unwrap();
        p.refresh().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejoin_while_member_issues_new_node() {
        let service = MemoryService::new();
        let p = participant(&service).await;

        let first = p.join(Some("voter")).await.unwrap();
        let second = p.join(Some("voter")).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(p.self_node().await, Some(second.clone()));
        let state = p.snapshot().await;
        assert_eq!(state.rank, Some(1));
        assert_eq!(state.current_leader, Some(first));
        assert!(!state.is_global_leader);
    }

    #[tokio::test]
    async fn test_refresh_keeps_one_watch_driving() {
        let service = MemoryService::new();
        let listings = Arc::new(AtomicUsize::new(0));
        let session = CountingSession {
            inner: service.session().await,
            listings: Arc::clone(&listings),
        };
        let p = Participant::new("/election", Arc::new(session)).unwrap();
        let mut topology = p.subscribe(EventKind::Topology).await;

        p.observe().await.unwrap();
        p.join(Some("voter")).await.unwrap();
        for _ in 0..5 {
            p.refresh().await.unwrap();
        }
        next_topology(&mut topology).await;

        let other = service.session().await;
        for expected in 2..=3 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let before = listings.load(Ordering::SeqCst);

            other.create_ephemeral_sequential("/election", "other-").await.unwrap();
            assert_eq!(next_topology(&mut topology).await.len(), expected);
            tokio::time::sleep(Duration::from_millis(20)).await;

            // One membership change, one listing
            assert_eq!(listings.load(Ordering::SeqCst) - before, 1);
        }
    }
}
