//! Role Resolver
//!
//! Pure transition from the previous participant state and a children
//! fetch to the next state plus the events that transition implies.
//! Feeding the same snapshot twice yields no events the second time.

use serde::{Deserialize, Serialize};

use super::events::ElectionEvent;
use super::topology::Topology;
use crate::error::{Error, Result};

/// Election state of one participant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantState {
    /// Our own candidate node name, `None` when not a member
    pub self_node: Option<String>,
    /// Index of `self_node` in `last_topology`
    pub rank: Option<usize>,
    /// Candidate immediately ahead of us
    pub current_leader: Option<String>,
    /// Candidate immediately behind us
    pub current_follower: Option<String>,
    /// Whether we hold rank 0
    pub is_global_leader: bool,
    /// Last snapshot delivered to subscribers
    pub last_topology: Topology,
}

impl ParticipantState {
    /// Fresh state for a newly created node, keeping the last topology
    pub fn with_self_node(&self, node: String) -> Self {
        Self {
            self_node: Some(node),
            ..self.clone()
        }
    }
}

/// Outcome of one resolution step
#[derive(Debug)]
pub struct Resolution {
    pub state: ParticipantState,
    pub events: Vec<ElectionEvent>,
    /// Failure surfaced by this step, already present in `events`
    pub error: Option<Error>,
}

impl Resolution {
    fn failed(state: &ParticipantState, err: Error) -> Self {
        Self {
            state: state.clone(),
            events: vec![ElectionEvent::from(&err)],
            error: Some(err),
        }
    }

    /// Whether the watcher must stop after this step
    pub fn is_fatal(&self) -> bool {
        self.error.as_ref().map_or(false, Error::is_fatal)
    }
}

/// Resolve a children fetch for the group at `group`
pub fn resolve(state: &ParticipantState, group: &str, fetched: Result<Vec<String>>) -> Resolution {
    let topology = match fetched.and_then(Topology::from_children) {
        Ok(topology) => topology,
        Err(e) => return Resolution::failed(state, e),
    };

    let mut next = state.clone();
    let mut events = Vec::new();

    if let Some(me) = state.self_node.as_deref() {
        let idx = match topology.position(me) {
            Some(idx) => idx,
            None => {
                let err = Error::SelfNodeMissing {
                    group: group.to_string(),
                    node: me.to_string(),
                };
                return Resolution::failed(state, err);
            }
        };

        let new_leader = match idx {
            0 => None,
            _ => topology.get(idx - 1).map(str::to_string),
        };
        let new_follower = topology.get(idx + 1).map(str::to_string);
        let is_global_leader = idx == 0;

        tracing::debug!(
            "Resolving {} at rank {}: leader {:?} -> {:?}, follower {:?} -> {:?}",
            me,
            idx,
            state.current_leader,
            new_leader,
            state.current_follower,
            new_follower
        );

        if is_global_leader && !state.is_global_leader {
            // Acquisition subsumes losing our leader
            next.current_leader = None;
            events.push(ElectionEvent::GlobalLeaderAcquired);
        }
        next.is_global_leader = is_global_leader;

        if new_follower != next.current_follower {
            next.current_follower = new_follower.clone();
            events.push(ElectionEvent::FollowerChanged { follower: new_follower });
        }
        if new_leader != next.current_leader {
            next.current_leader = new_leader.clone();
            events.push(ElectionEvent::LeaderChanged { leader: new_leader });
        }
        next.rank = Some(idx);
    }

    if topology != state.last_topology {
        tracing::debug!("Topology changed: {} -> {}", state.last_topology, topology);
        events.push(ElectionEvent::TopologyChanged {
            topology: topology.clone(),
        });
    }
    next.last_topology = topology;

    Resolution {
        state: next,
        events,
        error: None,
    }
}
