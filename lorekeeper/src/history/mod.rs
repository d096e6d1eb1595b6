//! History & Statistics Store
//!
//! Bounded retention of conflict records plus a raw intake log, with
//! counters that stay cumulative across retention sweeps.

pub mod stats;
pub mod store;

pub use stats::Statistics;
pub use store::{
    Commit, ConflictRecord, ConflictStatus, HistoryStore, HistoryView, IntakeEntry,
    SharedHistoryStore, StoreError, StoreResult, TrimReport, DEFAULT_PAGE_LIMIT,
};
