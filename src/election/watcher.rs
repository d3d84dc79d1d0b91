//! Topology Watcher
//!
//! A single driver task per participant owns the watch on the group path.
//! Notifications and refresh requests arrive on one channel and are handled
//! strictly in order; each fetch re-registers the watch and its result is
//! resolved before the next message is looked at.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use super::events::{ElectionEvent, EventBus};
use super::resolver::{self, ParticipantState};
use crate::coord::{Coordinator, Notification, Watcher};
use crate::error::{Error, Result};

/// State shared between a participant and its watcher task
pub(crate) struct ElectionContext {
    /// Normalized group path
    pub group: String,
    pub coordinator: Arc<dyn Coordinator>,
    pub state: Mutex<ParticipantState>,
    /// Bumped on every leave; continuations from older runs are ignored
    pub generation: AtomicU64,
    pub bus: Arc<EventBus>,
}

impl ElectionContext {
    pub fn new(group: String, coordinator: Arc<dyn Coordinator>) -> Self {
        Self {
            group,
            coordinator,
            state: Mutex::new(ParticipantState::default()),
            generation: AtomicU64::new(0),
            bus: Arc::new(EventBus::new()),
        }
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Invalidate every in-flight continuation.
    ///
    /// Callers hold the state lock so no resolution straddles the bump.
    pub fn advance_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Reply channel for a refresh request
pub(crate) type Ack = oneshot::Sender<Result<()>>;

/// Messages consumed by the driver task
enum WatchMessage {
    /// The watch left by listing number `watch` fired
    Fired { watch: u64, notification: Notification },
    /// Optionally adopt a new candidate node, then fetch and resolve now
    Refresh { adopt: Option<String>, ack: Option<Ack> },
}

/// Whether the driver keeps running after a step
enum Flow {
    Continue,
    Stop,
}

/// Handle to a running watcher task
pub(crate) struct TopologyWatcher {
    sender: mpsc::UnboundedSender<WatchMessage>,
    task: JoinHandle<()>,
    generation: u64,
}

impl TopologyWatcher {
    /// Spawn the driver for the context's current generation.
    ///
    /// Nothing is fetched until the first [`refresh`](Self::refresh).
    pub fn start(ctx: Arc<ElectionContext>) -> Self {
        let generation = ctx.current_generation();
        let (sender, receiver) = mpsc::unbounded_channel();

        tracing::info!("Starting topology watcher on {} (generation {})", ctx.group, generation);

        let driver = Driver {
            ctx,
            generation,
            sender: sender.clone(),
            issued: 0,
            armed: None,
        };
        let task = tokio::spawn(driver.run(receiver));

        Self {
            sender,
            task,
            generation,
        }
    }

    /// Whether the driver is still alive for `generation`
    pub fn is_running(&self, generation: u64) -> bool {
        self.generation == generation && !self.task.is_finished()
    }

    /// Queue a fetch-and-resolve; the outcome is sent on `ack`.
    ///
    /// `adopt` becomes the participant's own node before the fetch, so no
    /// listing taken before the node existed is resolved against it.
    pub fn refresh(&self, adopt: Option<String>, ack: Option<Ack>) -> Result<()> {
        self.sender
            .send(WatchMessage::Refresh { adopt, ack })
            .map_err(|_| Error::NotActive)
    }

    /// Stop the driver without waiting for it
    pub fn stop(self) {
        tracing::info!("Stopping topology watcher (generation {})", self.generation);
        self.task.abort();
    }
}

struct Driver {
    ctx: Arc<ElectionContext>,
    generation: u64,
    sender: mpsc::UnboundedSender<WatchMessage>,
    /// Number of listings issued so far
    issued: u64,
    /// Listing whose watch is the one outstanding registration
    armed: Option<u64>,
}

impl Driver {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<WatchMessage>) {
        while let Some(message) = receiver.recv().await {
            if !self.is_current() {
                break;
            }

            let flow = match message {
                WatchMessage::Fired { watch, notification } => {
                    if self.armed != Some(watch) {
                        // Replaced by a later listing; its watch is now spent
                        tracing::debug!("Ignoring superseded watch {} on {}", watch, self.ctx.group);
                        continue;
                    }
                    tracing::debug!("Watch fired on {}: {}", self.ctx.group, notification);
                    // Re-arm before interpreting the notification
                    let fetched = self.fetch().await;
                    match notification {
                        Notification::NodeDeleted => {
                            self.fail(Error::GroupDeleted(self.ctx.group.clone())).await;
                            Flow::Stop
                        }
                        Notification::ChildrenChanged => self.apply(fetched).await.0,
                    }
                }
                WatchMessage::Refresh { adopt, ack } => {
                    if let Some(node) = adopt {
                        self.adopt(node).await;
                    }
                    let fetched = self.fetch().await;
                    let (flow, outcome) = self.apply(fetched).await;
                    if let Some(ack) = ack {
                        let _ = ack.send(outcome);
                    }
                    flow
                }
            };

            if let Flow::Stop = flow {
                break;
            }
        }

        tracing::debug!("Topology watcher on {} exited", self.ctx.group);
    }

    fn is_current(&self) -> bool {
        self.ctx.current_generation() == self.generation
    }

    /// List the group and leave a fresh watch behind.
    ///
    /// A successful listing supersedes any watch still outstanding from an
    /// earlier one, so at most one registration ever drives the loop.
    async fn fetch(&mut self) -> Result<Vec<String>> {
        self.issued += 1;
        let watch = self.issued;
        let sender = self.sender.clone();
        let watcher = Watcher::new(move |notification| {
            let _ = sender.send(WatchMessage::Fired { watch, notification });
        });

        let fetched = self
            .ctx
            .coordinator
            .get_children(&self.ctx.group, watcher)
            .await
            .map_err(Error::from);

        match &fetched {
            Ok(children) => {
                self.armed = Some(watch);
                tracing::debug!("Fetched {} children of {} (watch {})", children.len(), self.ctx.group, watch);
            }
            Err(e) => tracing::warn!("Failed to list children of {}: {}", self.ctx.group, e),
        }
        fetched
    }

    /// Resolve a fetch and publish its events
    async fn apply(&self, fetched: Result<Vec<String>>) -> (Flow, Result<()>) {
        let mut state = self.ctx.state.lock().await;
        if !self.is_current() {
            return (Flow::Stop, Err(Error::NotActive));
        }

        let resolution = resolver::resolve(&state, &self.ctx.group, fetched);
        let fatal = resolution.is_fatal();
        *state = resolution.state;

        // Emitted under the state lock so a concurrent leave cannot interleave
        for event in resolution.events {
            self.ctx.bus.emit(event).await;
        }

        match resolution.error {
            Some(e) if fatal => {
                tracing::error!("Topology watcher on {} stopping: {}", self.ctx.group, e);
                (Flow::Stop, Err(e))
            }
            Some(e) => (Flow::Continue, Err(e)),
            None => (Flow::Continue, Ok(())),
        }
    }

    async fn adopt(&self, node: String) {
        let mut state = self.ctx.state.lock().await;
        if self.is_current() {
            tracing::debug!("Adopting election node {}", node);
            *state = state.with_self_node(node);
        }
    }

    /// Publish a fatal error raised outside the resolver
    async fn fail(&self, err: Error) {
        let _state = self.ctx.state.lock().await;
        if !self.is_current() {
            return;
        }

        tracing::error!("Topology watcher on {} stopping: {}", self.ctx.group, err);
        self.ctx.bus.emit(ElectionEvent::from(&err)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::MemoryService;
    use crate::election::events::EventFilter;
    use crate::election::topology::Topology;

    async fn context(service: &MemoryService) -> Arc<ElectionContext> {
        let session = service.session().await;
        session.mkdirp("/election").await.unwrap();
        Arc::new(ElectionContext::new("/election".into(), Arc::new(session)))
    }

    async fn refresh(watcher: &TopologyWatcher) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        watcher.refresh(None, Some(tx)).unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_observes_changes() {
        let service = MemoryService::new();
        let ctx = context(&service).await;
        let mut sub = ctx.bus.subscribe(EventFilter::all()).await;

        let other = service.session().await;
        other.create_ephemeral_sequential("/election", "x-").await.unwrap();

        let watcher = TopologyWatcher::start(Arc::clone(&ctx));
        refresh(&watcher).await.unwrap();
        assert_eq!(
            sub.recv().await,
            Some(ElectionEvent::TopologyChanged {
                topology: Topology::from_children(vec!["x-0000000000".into()]).unwrap()
            })
        );

        other.create_ephemeral_sequential("/election", "y-").await.unwrap();

        match sub.recv().await {
            Some(ElectionEvent::TopologyChanged { topology }) => {
                assert_eq!(topology.names(), &["x-0000000000".to_string(), "y-0000000001".to_string()]);
            }
            other => panic!("unexpected event {:?}", other),
        }
        // Refreshing an unchanged group publishes nothing
        refresh(&watcher).await.unwrap();
        assert_eq!(sub.try_recv(), None);
        assert!(watcher.is_running(ctx.current_generation()));
    }

    #[tokio::test]
    async fn test_group_deleted_stops_watcher() {
        let service = MemoryService::new();
        let ctx = context(&service).await;
        let watcher = TopologyWatcher::start(Arc::clone(&ctx));
        refresh(&watcher).await.unwrap();

        let mut sub = ctx.bus.subscribe(EventFilter::all()).await;
        let admin = service.session().await;
        admin.remove("/election").await.unwrap();

        match sub.recv().await {
            Some(ElectionEvent::Error { kind, .. }) => {
                assert_eq!(kind, crate::error::ErrorKind::GroupDeleted)
            }
            other => panic!("unexpected event {:?}", other),
        }

        tokio::task::yield_now().await;
        for _ in 0..100 {
            if !watcher.is_running(ctx.current_generation()) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(!watcher.is_running(ctx.current_generation()));
        assert_eq!(sub.try_recv(), None);
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_running() {
        let service = MemoryService::new();
        let ctx = context(&service).await;
        let watcher = TopologyWatcher::start(Arc::clone(&ctx));

        service.set_available(false).await;
        let err = refresh(&watcher).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(watcher.is_running(ctx.current_generation()));

        service.set_available(true).await;
        refresh(&watcher).await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_generation_is_ignored() {
        let service = MemoryService::new();
        let ctx = context(&service).await;
        let watcher = TopologyWatcher::start(Arc::clone(&ctx));

        {
            let _state = ctx.state.lock().await;
            ctx.advance_generation();
        }

        let (tx, rx) = oneshot::channel();
        // Either the queue is already closed or the message is dropped unanswered
        if watcher.refresh(Some("-0000000000".into()), Some(tx)).is_ok() {
            assert!(rx.await.is_err());
        }
        assert_eq!(*ctx.state.lock().await, ParticipantState::default());
    }
}
