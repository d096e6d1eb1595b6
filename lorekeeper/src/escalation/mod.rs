//! Escalation — channel tables, sinks and fire-and-forget dispatch
//!
//! ```text
//! ConflictAnalysisResult.escalationChannels
//!     │
//!     ▼
//! EscalationRouter ──┬─▶ sink("discord")   ─ timeout ─▶ Delivered | Failed
//!                    ├─▶ sink("langchain") ─ timeout ─▶ Delivered | Failed
//!                    └─▶ sink("tiktok")    ─ timeout ─▶ Delivered | Failed
//! ```
//!
//! Every channel is dispatched independently. A failing or slow sink is
//! logged and counted; it never blocks or rolls back its siblings.

pub mod channels;
pub mod router;
pub mod sink;

pub use channels::ChannelTable;
pub use router::{
    CountersSnapshot, DispatchCounters, DispatchOutcome, DispatchStatus, EscalationReport,
    EscalationRouter, SharedEscalationRouter,
};
pub use sink::{ChannelSink, LogSink, SinkError, SinkResult, WebhookSink};
