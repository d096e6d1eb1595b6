//! Conflict Analyzer — deterministic rule evaluation for lore events
//!
//! The analyzer is a pure function of an event and a read-only view of the
//! retained history. It holds no shared state; the history store calls it
//! under its own lock so that analysis and recording are one atomic step.
//!
//! # Rule precedence
//!
//! ```text
//! event
//!   │
//!   ├─ 1. contradiction keyword in content   → contradiction_detected (high)
//!   ├─ 2. metadata.location already seen     → location_conflict      (medium)
//!   ├─ 3. priority ≥ 9 or cursedLevel ≥ 9    → high_priority_event    (critical)
//!   ├─ 4. priority ≥ 7 or cursedLevel ≥ 7    → medium_priority_event  (medium)
//!   ├─ 5. type == "cursed_output"            → cursed_content         (high)
//!   └─ otherwise                             → none                   (low)
//! ```
//!
//! The first matching rule wins. The order is the same for both entry
//! points; [`EntryPoint::Escalate`] only relabels rule 3 as
//! `critical_escalation`.

pub mod rules;

pub use rules::{Rule, RuleKind, RuleMatch};

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AnalyzerConfig;
use crate::escalation::ChannelTable;
use crate::event::LoreEvent;
use crate::history::HistoryView;

/// Closed set of conflict classifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// No rule matched
    None,
    ContradictionDetected,
    LocationConflict,
    HighPriorityEvent,
    /// Rule 3 reached through the escalation entry point
    CriticalEscalation,
    MediumPriorityEvent,
    CursedContent,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ContradictionDetected => "contradiction_detected",
            Self::LocationConflict => "location_conflict",
            Self::HighPriorityEvent => "high_priority_event",
            Self::CriticalEscalation => "critical_escalation",
            Self::MediumPriorityEvent => "medium_priority_event",
            Self::CursedContent => "cursed_content",
        }
    }

    /// Fixed follow-up actions suggested for this classification.
    pub fn recommendations(&self) -> Vec<String> {
        let items: &[&str] = match self {
            Self::None => &["No action required"],
            Self::ContradictionDetected => &["Resolve contradiction", "Update lore consistency"],
            Self::LocationConflict => &[
                "Verify location timeline",
                "Consolidate duplicate location references",
            ],
            Self::HighPriorityEvent | Self::CriticalEscalation => &[
                "Escalate to lore council immediately",
                "Freeze dependent storylines until reviewed",
            ],
            Self::MediumPriorityEvent => &["Monitor for escalation", "Review event priority"],
            Self::CursedContent => &[
                "Review cursed output",
                "Quarantine content pending moderation",
            ],
        };
        items.iter().map(|s| s.to_string()).collect()
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordinal severity: `low < medium < high < critical`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Which ingestion call produced an analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPoint {
    #[default]
    Analyze,
    Escalate,
}

/// Outcome of analyzing a single event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictAnalysisResult {
    pub conflict_detected: bool,
    pub conflict_type: ConflictType,
    pub severity: Severity,
    /// Human-readable summary
    pub analysis: String,
    /// 0.0–1.0
    pub confidence: f64,
    pub recommendations: Vec<String>,
    /// Ids of retained conflict records related to this event
    pub related_events: Vec<u64>,
    pub escalation_required: bool,
    pub escalation_channels: BTreeSet<String>,
    pub timestamp: DateTime<Utc>,
}

impl ConflictAnalysisResult {
    /// Result for an event no rule matched.
    pub fn clear(confidence: f64) -> Self {
        Self {
            conflict_detected: false,
            conflict_type: ConflictType::None,
            severity: Severity::Low,
            analysis: "No conflicts detected".to_string(),
            confidence,
            recommendations: ConflictType::None.recommendations(),
            related_events: Vec::new(),
            escalation_required: false,
            escalation_channels: BTreeSet::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Confidence reported when no rule matches.
const CLEAR_CONFIDENCE: f64 = 0.95;

/// Ordered rule evaluator
#[derive(Debug, Clone)]
pub struct ConflictAnalyzer {
    rules: Vec<Rule>,
    channels: ChannelTable,
    max_related: usize,
}

impl ConflictAnalyzer {
    /// Build the analyzer from configuration.
    pub fn new(config: &AnalyzerConfig, channels: ChannelTable) -> Self {
        let rules = config
            .rule_order
            .iter()
            .map(|kind| Rule::from_config(*kind, config))
            .collect();
        Self {
            rules,
            channels,
            max_related: config.max_related,
        }
    }

    /// Analyzer with default thresholds, keywords and channel table.
    pub fn with_defaults() -> Self {
        Self::new(&AnalyzerConfig::default(), ChannelTable::default())
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Analyze through the regular entry point.
    pub fn analyze(&self, event: &LoreEvent, history: &HistoryView<'_>) -> ConflictAnalysisResult {
        self.analyze_for(event, history, EntryPoint::Analyze)
    }

    /// Evaluate rules top-down; the first match decides the outcome.
    pub fn analyze_for(
        &self,
        event: &LoreEvent,
        history: &HistoryView<'_>,
        entry: EntryPoint,
    ) -> ConflictAnalysisResult {
        let Some((rule, matched)) = self
            .rules
            .iter()
            .find_map(|rule| rule.evaluate(event, history).map(|m| (rule, m)))
        else {
            debug!(content = %event.preview(), "No rule matched");
            return ConflictAnalysisResult::clear(CLEAR_CONFIDENCE);
        };

        let conflict_type = rule.conflict_type(entry);
        let escalation_channels = self.channels.channels_for(conflict_type);
        let related_events = related_records(event, history, self.max_related);

        debug!(
            rule = rule.kind().as_str(),
            conflict_type = %conflict_type,
            related = related_events.len(),
            "Rule matched"
        );

        ConflictAnalysisResult {
            conflict_detected: true,
            conflict_type,
            severity: rule.severity(),
            analysis: matched.summary,
            confidence: rule.confidence(),
            recommendations: conflict_type.recommendations(),
            related_events,
            escalation_required: !escalation_channels.is_empty(),
            escalation_channels,
            timestamp: Utc::now(),
        }
    }
}

impl Default for ConflictAnalyzer {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Retained records sharing the event's session or any of its tags,
/// most recent first.
fn related_records(event: &LoreEvent, history: &HistoryView<'_>, limit: usize) -> Vec<u64> {
    history
        .records()
        .iter()
        .rev()
        .filter(|r| event.same_session(&r.event) || event.shares_tag_with(&r.event))
        .map(|r| r.id)
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{ConflictRecord, IntakeEntry};

    fn analyze(event: LoreEvent) -> ConflictAnalysisResult {
        ConflictAnalyzer::with_defaults().analyze(&event, &HistoryView::default())
    }

    #[test]
    fn test_ordinary_event_is_clear() {
        let result = analyze(
            LoreEvent::new("ordinary text")
                .with_priority(2)
                .with_cursed_level(1),
        );
        assert!(!result.conflict_detected);
        assert_eq!(result.conflict_type, ConflictType::None);
        assert_eq!(result.severity, Severity::Low);
        assert!(result.escalation_channels.is_empty());
        assert!(!result.escalation_required);
    }

    #[test]
    fn test_contradiction_wins_over_extreme_priority() {
        let result = analyze(
            LoreEvent::new("Reality is fracturing")
                .with_priority(10)
                .with_cursed_level(10),
        );
        assert!(result.conflict_detected);
        assert_eq!(result.conflict_type, ConflictType::ContradictionDetected);
        assert_eq!(result.severity, Severity::High);
        assert!(result.escalation_channels.contains("discord"));
        assert!(result.escalation_channels.contains("langchain"));
        assert_eq!(
            result.recommendations,
            vec!["Resolve contradiction", "Update lore consistency"]
        );
    }

    #[test]
    fn test_contradiction_is_case_insensitive() {
        let result = analyze(LoreEvent::new("The king IS SIMULTANEOUSLY dead and alive"));
        assert_eq!(result.conflict_type, ConflictType::ContradictionDetected);
    }

    #[test]
    fn test_extreme_signal_is_critical() {
        for event in [
            LoreEvent::new("a storm").with_priority(9),
            LoreEvent::new("a storm").with_cursed_level(9),
            LoreEvent::new("a storm").with_priority(10).with_cursed_level(0),
        ] {
            let result = analyze(event);
            assert_eq!(result.severity, Severity::Critical);
            assert_eq!(result.conflict_type, ConflictType::HighPriorityEvent);
            assert!(result.escalation_channels.contains("discord"));
            assert!(result.confidence > 0.5);
        }
    }

    #[test]
    fn test_escalate_entry_relabels_extreme_signal_only() {
        let analyzer = ConflictAnalyzer::with_defaults();
        let view = HistoryView::default();

        let extreme = LoreEvent::new("a storm").with_priority(9);
        let result = analyzer.analyze_for(&extreme, &view, EntryPoint::Escalate);
        assert_eq!(result.conflict_type, ConflictType::CriticalEscalation);
        assert_eq!(result.severity, Severity::Critical);

        // Precedence is unchanged: contradiction still wins.
        let both = LoreEvent::new("an impossible storm").with_priority(10);
        let result = analyzer.analyze_for(&both, &view, EntryPoint::Escalate);
        assert_eq!(result.conflict_type, ConflictType::ContradictionDetected);
    }

    #[test]
    fn test_elevated_signal_is_medium() {
        let result = analyze(LoreEvent::new("rumors").with_cursed_level(7));
        assert_eq!(result.conflict_type, ConflictType::MediumPriorityEvent);
        assert_eq!(result.severity, Severity::Medium);
        assert_eq!(
            result.escalation_channels.iter().collect::<Vec<_>>(),
            vec!["discord"]
        );
    }

    #[test]
    fn test_cursed_output_type() {
        let result = analyze(LoreEvent::new("whispers").with_type("cursed_output"));
        assert_eq!(result.conflict_type, ConflictType::CursedContent);
        assert_eq!(result.severity, Severity::High);
        assert!(result.escalation_channels.contains("tiktok"));
    }

    #[test]
    fn test_location_conflict_requires_prior_sighting() {
        let analyzer = ConflictAnalyzer::with_defaults();
        let first = LoreEvent::new("The party rests").with_location("northern_caves");

        let result = analyzer.analyze(&first, &HistoryView::default());
        assert!(!result.conflict_detected);

        let intake = vec![IntakeEntry {
            sequence: 1,
            event: first.clone(),
            received_at: Utc::now(),
        }];
        let view = HistoryView::new(&[], &intake);
        let second = LoreEvent::new("The party fights").with_location("northern_caves");
        let result = analyzer.analyze(&second, &view);
        assert_eq!(result.conflict_type, ConflictType::LocationConflict);
        assert_eq!(result.severity, Severity::Medium);

        let elsewhere = LoreEvent::new("Meanwhile").with_location("southern_docks");
        assert!(!analyzer.analyze(&elsewhere, &view).conflict_detected);
    }

    #[test]
    fn test_related_events_by_session_and_tags() {
        let analyzer = ConflictAnalyzer::with_defaults();
        let prior = |id: u64, event: LoreEvent| {
            let analysis = analyzer.analyze(&event, &HistoryView::default());
            ConflictRecord::new(id, event, analysis)
        };
        let records = vec![
            prior(1, LoreEvent::new("impossible").with_session("s-1")),
            prior(2, LoreEvent::new("impossible").with_tags(["dragons"])),
            prior(3, LoreEvent::new("impossible").with_session("s-2")),
        ];
        let view = HistoryView::new(&records, &[]);

        let event = LoreEvent::new("a contradiction")
            .with_session("s-1")
            .with_tags(["dragons", "gold"]);
        let result = analyzer.analyze(&event, &view);
        assert_eq!(result.related_events, vec![2, 1]);
    }
}
