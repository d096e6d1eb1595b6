//! Lorekeeper: lore-event conflict detection core
//!
//! This library provides:
//! - A deterministic, rule-ordered conflict analyzer for narrative events
//! - Fire-and-forget escalation to pluggable channel sinks with timeouts
//! - A bounded conflict history with cumulative statistics
//! - A topic-based fan-out hub for live subscribers
//!
//! # Flow
//!
//! ```text
//! LoreEventPayload ──validate──▶ LoreEvent ──▶ Lorekeeper::ingest
//!                                               │
//!                 HistoryStore::commit ◀────────┤ (analyze + record)
//!                 EscalationRouter::route ◀─────┤ (spawned)
//!                 Hub::publish ◀────────────────┘ (analysis / conflicts)
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use lorekeeper::{LoreEventPayload, Lorekeeper, LorekeeperConfig};
//!
//! # async fn run() -> Result<(), lorekeeper::PipelineError> {
//! let lorekeeper = Lorekeeper::new(LorekeeperConfig::default())?.shared();
//! lorekeeper.start_background();
//!
//! let result = lorekeeper
//!     .analyze(LoreEventPayload::with_content("Reality is fracturing"))
//!     .await?;
//! assert!(result.conflict_detected);
//!
//! lorekeeper.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod config;
pub mod escalation;
pub mod event;
pub mod health;
pub mod history;
pub mod hub;
pub mod pipeline;
pub mod tasks;

pub use analyzer::{ConflictAnalysisResult, ConflictAnalyzer, ConflictType, EntryPoint, Severity};
pub use config::{ConfigError, LorekeeperConfig};
pub use escalation::{ChannelSink, EscalationRouter, SinkError};
pub use event::{LoreEvent, LoreEventPayload, ValidationError};
pub use health::{ComponentStatus, HealthProbe, HealthReport};
pub use history::{ConflictRecord, HistoryStore, Statistics, StoreError};
pub use hub::{ClientMessage, Hub, HubError, HubMessage, StatusSnapshot, Topic};
pub use pipeline::{Lorekeeper, PipelineError, PipelineResult, SharedLorekeeper};
