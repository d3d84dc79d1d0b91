//! Election Module
//!
//! Leader election over ephemeral sequential nodes: candidates are ordered
//! by the sequence number the coordination service assigns, the lowest is
//! the global leader, and every candidate tracks its immediate neighbours.

pub mod events;
pub mod resolver;
pub mod topology;
mod participant;
mod watcher;

pub use events::{ElectionEvent, EventFilter, EventKind, Subscription};
pub use participant::Participant;
pub use resolver::{resolve, ParticipantState, Resolution};
pub use topology::{parse_sequence, Topology};
