//! Real-time Fan-out Hub
//!
//! ```text
//! pipeline ──publish(topic, msg)──▶ Hub ──try_send──▶ [queue] ──▶ subscriber A
//!                                      └─try_send──▶ [queue] ──▶ subscriber B
//! ```
//!
//! The hub map has its own lock, separate from the history store. A slow
//! subscriber only loses its own messages.

pub mod fanout;
pub mod types;

pub use fanout::{
    Connection, ConnectionId, ConnectionState, Hub, HubCounters, HubError, HubResult,
    PublishReport, SharedHub,
};
pub use types::{parse_topics, ClientMessage, ConflictQuery, HubMessage, StatusSnapshot, Topic};
