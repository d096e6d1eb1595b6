//! Cumulative conflict statistics
//!
//! Counters are maintained incrementally on append and resolve, so they
//! keep reflecting everything ever recorded after retention trims the
//! detailed record list.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::ConflictRecord;
use crate::analyzer::{ConflictType, Severity};

/// Aggregate view over all conflict records ever appended
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_conflicts: u64,
    pub pending_conflicts: u64,
    pub resolved_conflicts: u64,
    pub conflicts_by_type: BTreeMap<ConflictType, u64>,
    pub conflicts_by_severity: BTreeMap<Severity, u64>,
    /// Milliseconds, over resolved records only
    pub average_resolution_time: f64,
    pub last_conflict_detected: Option<DateTime<Utc>>,
    /// Validated events seen since start, conflicting or not
    pub events_processed: u64,
    /// Records currently held after retention
    pub retained_conflicts: usize,
}

/// Incrementally maintained counters behind [`Statistics`]
#[derive(Debug, Clone, Default)]
pub(crate) struct StatsAccumulator {
    total: u64,
    resolved: u64,
    by_type: BTreeMap<ConflictType, u64>,
    by_severity: BTreeMap<Severity, u64>,
    resolution_ms_total: i64,
    last_conflict: Option<DateTime<Utc>>,
    events_processed: u64,
}

impl StatsAccumulator {
    pub(crate) fn record_event(&mut self) {
        self.events_processed += 1;
    }

    pub(crate) fn record_conflict(&mut self, record: &ConflictRecord) {
        self.total += 1;
        *self
            .by_type
            .entry(record.analysis.conflict_type)
            .or_insert(0) += 1;
        *self
            .by_severity
            .entry(record.analysis.severity)
            .or_insert(0) += 1;
        self.last_conflict = Some(record.created_at);
    }

    pub(crate) fn record_resolution(&mut self, record: &ConflictRecord) {
        self.resolved += 1;
        if let Some(resolved_at) = record.resolved_at {
            let elapsed = (resolved_at - record.created_at).num_milliseconds();
            self.resolution_ms_total += elapsed.max(0);
        }
    }

    pub(crate) fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub(crate) fn total(&self) -> u64 {
        self.total
    }

    pub(crate) fn snapshot(&self, retained: usize) -> Statistics {
        let average_resolution_time = if self.resolved == 0 {
            0.0
        } else {
            self.resolution_ms_total as f64 / self.resolved as f64
        };
        Statistics {
            total_conflicts: self.total,
            pending_conflicts: self.total - self.resolved,
            resolved_conflicts: self.resolved,
            conflicts_by_type: self.by_type.clone(),
            conflicts_by_severity: self.by_severity.clone(),
            average_resolution_time,
            last_conflict_detected: self.last_conflict,
            events_processed: self.events_processed,
            retained_conflicts: retained,
        }
    }
}
