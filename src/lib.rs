//! WolfElect - Leader Election over a Coordination Service
//!
//! Candidates join an election group by creating ephemeral, sequentially
//! numbered nodes under a shared path. The coordination service's sequence
//! numbers give a total order: the lowest-numbered candidate is the global
//! leader, and every other candidate follows the one immediately ahead of it.
//!
//! # Architecture
//!
//! Each [`Participant`] runs one topology watcher task that keeps a watch
//! armed on the group path, re-registering it before reacting to any
//! notification. Every listing goes through a pure resolver that derives
//! the candidate's role and decides which events to publish.
//!
//! # Features
//!
//! - Numeric ordering of candidate names, robust to dashes in labels
//! - Edge-triggered global leader, leader and follower events
//! - Topology events only on genuine membership changes
//! - Observer mode for processes that watch without voting
//! - In-memory coordination service for tests and simulation

pub mod config;
pub mod coord;
pub mod election;
pub mod error;

pub use config::WolfElectConfig;
pub use election::Participant;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfElectConfig;
    pub use crate::coord::{Coordinator, MemoryService, Notification, Watcher};
    pub use crate::election::{ElectionEvent, EventFilter, EventKind, Participant, Subscription, Topology};
    pub use crate::error::{Error, ErrorKind, Result};
}
