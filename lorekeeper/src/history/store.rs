//! Bounded conflict history with cumulative statistics
//!
//! All state sits behind one mutex: the record list, the raw intake log,
//! the id sequence and the counters. [`HistoryStore::commit`] runs the
//! analyzer under that lock so that analysis, intake logging and record
//! append form a single step, and ids follow arrival order even when many
//! connections ingest at once.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::stats::{StatsAccumulator, Statistics};
use crate::analyzer::ConflictAnalysisResult;
use crate::config::RetentionConfig;
use crate::event::LoreEvent;

/// Default page size for [`HistoryStore::list`]
pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// Error type for history operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Conflict record not found: {0}")]
    NotFound(u64),

    #[error("Conflict record already resolved: {0}")]
    AlreadyResolved(u64),

    #[error("Analysis did not detect a conflict; nothing to record")]
    NotAConflict,
}

/// Result type for history operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to HistoryStore
pub type SharedHistoryStore = Arc<HistoryStore>;

/// Lifecycle of a conflict record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Pending,
    Resolved,
}

/// Persisted history entry, created only for detected conflicts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub id: u64,
    pub event: LoreEvent,
    pub analysis: ConflictAnalysisResult,
    pub created_at: DateTime<Utc>,
    pub status: ConflictStatus,
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl ConflictRecord {
    pub fn new(id: u64, event: LoreEvent, analysis: ConflictAnalysisResult) -> Self {
        Self {
            id,
            event,
            analysis,
            created_at: Utc::now(),
            status: ConflictStatus::Pending,
            resolved_at: None,
            resolution: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ConflictStatus::Pending
    }
}

/// Raw intake log entry; every validated event gets one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeEntry {
    pub sequence: u64,
    pub event: LoreEvent,
    pub received_at: DateTime<Utc>,
}

/// Read-only view of retained history handed to the analyzer
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryView<'a> {
    records: &'a [ConflictRecord],
    intake: &'a [IntakeEntry],
}

impl<'a> HistoryView<'a> {
    pub fn new(records: &'a [ConflictRecord], intake: &'a [IntakeEntry]) -> Self {
        Self { records, intake }
    }

    /// Retained conflict records, oldest first.
    pub fn records(&self) -> &'a [ConflictRecord] {
        self.records
    }

    /// Whether any retained record or logged event references `location`.
    pub fn location_seen(&self, location: &str) -> bool {
        self.records
            .iter()
            .any(|r| r.event.location() == Some(location))
            || self
                .intake
                .iter()
                .any(|e| e.event.location() == Some(location))
    }
}

/// Result of [`HistoryStore::commit`]
#[derive(Debug, Clone)]
pub struct Commit {
    pub sequence: u64,
    pub analysis: ConflictAnalysisResult,
    /// Present iff the analysis detected a conflict
    pub record: Option<ConflictRecord>,
}

/// What a retention sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimReport {
    pub records_dropped: usize,
    pub intake_dropped: usize,
}

impl TrimReport {
    pub fn is_empty(&self) -> bool {
        self.records_dropped == 0 && self.intake_dropped == 0
    }
}

#[derive(Debug, Default)]
struct HistoryInner {
    records: Vec<ConflictRecord>,
    intake: Vec<IntakeEntry>,
    next_id: u64,
    next_sequence: u64,
    stats: StatsAccumulator,
}

impl HistoryInner {
    fn view(&self) -> HistoryView<'_> {
        HistoryView::new(&self.records, &self.intake)
    }

    fn log_intake(&mut self, event: LoreEvent) -> u64 {
        self.next_sequence += 1;
        let sequence = self.next_sequence;
        self.intake.push(IntakeEntry {
            sequence,
            event,
            received_at: Utc::now(),
        });
        self.stats.record_event();
        sequence
    }

    fn push_record(&mut self, event: LoreEvent, analysis: ConflictAnalysisResult) -> ConflictRecord {
        self.next_id += 1;
        let record = ConflictRecord::new(self.next_id, event, analysis);
        self.stats.record_conflict(&record);
        self.records.push(record.clone());
        record
    }

    fn trim(&mut self, max_records: usize, max_intake: usize) -> TrimReport {
        TrimReport {
            records_dropped: drop_oldest(&mut self.records, max_records),
            intake_dropped: drop_oldest(&mut self.intake, max_intake),
        }
    }

    fn position(&self, id: u64) -> Option<usize> {
        self.records.binary_search_by_key(&id, |r| r.id).ok()
    }
}

/// Keep the newest `keep` items, preserving order.
fn drop_oldest<T>(items: &mut Vec<T>, keep: usize) -> usize {
    let excess = items.len().saturating_sub(keep);
    if excess > 0 {
        items.drain(..excess);
    }
    excess
}

/// Bounded, mutex-guarded conflict history
#[derive(Debug)]
pub struct HistoryStore {
    inner: Mutex<HistoryInner>,
    retention: RetentionConfig,
}

impl HistoryStore {
    pub fn new(retention: RetentionConfig) -> Self {
        Self {
            inner: Mutex::new(HistoryInner::default()),
            retention,
        }
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedHistoryStore {
        Arc::new(self)
    }

    pub fn retention(&self) -> &RetentionConfig {
        &self.retention
    }

    fn lock(&self) -> MutexGuard<'_, HistoryInner> {
        // Mutations only happen after analysis returns, so a panic inside
        // an analyzer leaves the state consistent.
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("History lock poisoned; recovering");
            poisoned.into_inner()
        })
    }

    /// Analyze `event` against current history and record it, atomically.
    pub fn commit<F>(&self, event: LoreEvent, analyze: F) -> Commit
    where
        F: FnOnce(&LoreEvent, &HistoryView<'_>) -> ConflictAnalysisResult,
    {
        let mut inner = self.lock();
        let analysis = analyze(&event, &inner.view());

        let record = analysis
            .conflict_detected
            .then(|| inner.push_record(event.clone(), analysis.clone()));
        let sequence = inner.log_intake(event);
        self.enforce_ceiling(&mut inner);

        if let Some(record) = &record {
            debug!(id = record.id, conflict_type = %record.analysis.conflict_type, "Conflict recorded");
        }
        Commit {
            sequence,
            analysis,
            record,
        }
    }

    /// Append a record for an already-analyzed event.
    pub fn append(&self, event: LoreEvent, analysis: ConflictAnalysisResult) -> StoreResult<ConflictRecord> {
        if !analysis.conflict_detected {
            return Err(StoreError::NotAConflict);
        }
        let mut inner = self.lock();
        let record = inner.push_record(event, analysis);
        self.enforce_ceiling(&mut inner);
        Ok(record)
    }

    /// Hard ceiling between sweeps: past twice the cap, trim right away.
    fn enforce_ceiling(&self, inner: &mut HistoryInner) {
        let records_ceiling = self.retention.max_records.saturating_mul(2);
        let intake_ceiling = self.retention.max_intake.saturating_mul(2);
        if inner.records.len() > records_ceiling || inner.intake.len() > intake_ceiling {
            let report = inner.trim(self.retention.max_records, self.retention.max_intake);
            debug!(
                records_dropped = report.records_dropped,
                intake_dropped = report.intake_dropped,
                "History ceiling reached; trimmed early"
            );
        }
    }

    /// Page through retained records, oldest first.
    pub fn list(&self, limit: usize, offset: usize) -> Vec<ConflictRecord> {
        let inner = self.lock();
        inner
            .records
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// The newest `n` records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<ConflictRecord> {
        let inner = self.lock();
        let start = inner.records.len().saturating_sub(n);
        inner.records[start..].to_vec()
    }

    pub fn get(&self, id: u64) -> StoreResult<ConflictRecord> {
        let inner = self.lock();
        inner
            .position(id)
            .map(|i| inner.records[i].clone())
            .ok_or(StoreError::NotFound(id))
    }

    /// Retained record count.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retained intake log length.
    pub fn intake_len(&self) -> usize {
        self.lock().intake.len()
    }

    /// Cumulative count of conflicts ever recorded.
    pub fn total_conflicts(&self) -> u64 {
        self.lock().stats.total()
    }

    /// Cumulative count of validated events ever committed.
    pub fn events_processed(&self) -> u64 {
        self.lock().stats.events_processed()
    }

    /// Move a pending record to resolved.
    pub fn resolve(&self, id: u64, note: Option<String>) -> StoreResult<ConflictRecord> {
        let mut inner = self.lock();
        let index = inner.position(id).ok_or(StoreError::NotFound(id))?;
        let record = &mut inner.records[index];
        if !record.is_pending() {
            return Err(StoreError::AlreadyResolved(id));
        }
        record.status = ConflictStatus::Resolved;
        record.resolved_at = Some(Utc::now());
        record.resolution = note;
        let resolved = record.clone();
        inner.stats.record_resolution(&resolved);

        info!(id, "Conflict resolved");
        Ok(resolved)
    }

    pub fn stats(&self) -> Statistics {
        let inner = self.lock();
        inner.stats.snapshot(inner.records.len())
    }

    /// Retention sweep: keep the newest records and intake entries.
    pub fn trim(&self) -> TrimReport {
        let mut inner = self.lock();
        inner.trim(self.retention.max_records, self.retention.max_intake)
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(RetentionConfig::default())
    }
}
