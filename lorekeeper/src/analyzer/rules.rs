//! Detection rules as tagged variants
//!
//! Each [`Rule`] pairs a predicate with a fixed outcome (type, severity,
//! confidence). The analyzer walks them in configured order.

use serde::{Deserialize, Serialize};

use super::{ConflictType, EntryPoint, Severity};
use crate::config::AnalyzerConfig;
use crate::event::LoreEvent;
use crate::history::HistoryView;

/// Rule identifiers, used to configure evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Contradiction,
    LocationConflict,
    ExtremeSignal,
    ElevatedSignal,
    CursedOutput,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contradiction => "contradiction",
            Self::LocationConflict => "location_conflict",
            Self::ExtremeSignal => "extreme_signal",
            Self::ElevatedSignal => "elevated_signal",
            Self::CursedOutput => "cursed_output",
        }
    }

    /// Default evaluation order.
    pub fn default_order() -> Vec<RuleKind> {
        vec![
            Self::Contradiction,
            Self::LocationConflict,
            Self::ExtremeSignal,
            Self::ElevatedSignal,
            Self::CursedOutput,
        ]
    }
}

/// A rule that fired, with its human-readable summary
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub summary: String,
}

/// One detection rule
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// Content contains any keyword (stored lowercased)
    Contradiction { keywords: Vec<String> },
    /// `metadata.location` already referenced by retained history
    LocationConflict,
    /// `priority` or `cursedLevel` at or above `threshold`
    ExtremeSignal { threshold: u8 },
    /// `priority` or `cursedLevel` at or above `threshold`
    ElevatedSignal { threshold: u8 },
    /// Event `type` equals `event_type`
    CursedOutput { event_type: String },
}

impl Rule {
    pub fn from_config(kind: RuleKind, config: &AnalyzerConfig) -> Self {
        match kind {
            RuleKind::Contradiction => Self::Contradiction {
                keywords: config
                    .contradiction_keywords
                    .iter()
                    .map(|k| k.to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect(),
            },
            RuleKind::LocationConflict => Self::LocationConflict,
            RuleKind::ExtremeSignal => Self::ExtremeSignal {
                threshold: config.extreme_threshold,
            },
            RuleKind::ElevatedSignal => Self::ElevatedSignal {
                threshold: config.elevated_threshold,
            },
            RuleKind::CursedOutput => Self::CursedOutput {
                event_type: config.cursed_event_type.clone(),
            },
        }
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            Self::Contradiction { .. } => RuleKind::Contradiction,
            Self::LocationConflict => RuleKind::LocationConflict,
            Self::ExtremeSignal { .. } => RuleKind::ExtremeSignal,
            Self::ElevatedSignal { .. } => RuleKind::ElevatedSignal,
            Self::CursedOutput { .. } => RuleKind::CursedOutput,
        }
    }

    /// Test the predicate; `Some` carries the summary when it fires.
    pub fn evaluate(&self, event: &LoreEvent, history: &HistoryView<'_>) -> Option<RuleMatch> {
        let summary = match self {
            Self::Contradiction { keywords } => {
                let content = event.content.to_lowercase();
                let keyword = keywords.iter().find(|k| content.contains(k.as_str()))?;
                format!("Contradiction detected: content mentions \"{keyword}\"")
            }
            Self::LocationConflict => {
                let location = event.location()?;
                if !history.location_seen(location) {
                    return None;
                }
                format!("Location conflict: '{location}' is already referenced by earlier lore")
            }
            Self::ExtremeSignal { threshold } => {
                signal_exceeds(event, *threshold)?;
                format!(
                    "Critical signal: priority {} / cursed level {} at or above {}",
                    event.priority, event.cursed_level, threshold
                )
            }
            Self::ElevatedSignal { threshold } => {
                signal_exceeds(event, *threshold)?;
                format!(
                    "Elevated signal: priority {} / cursed level {} at or above {}",
                    event.priority, event.cursed_level, threshold
                )
            }
            Self::CursedOutput { event_type } => {
                if event.event_type != *event_type {
                    return None;
                }
                format!("Event of type '{event_type}' flagged as cursed content")
            }
        };
        Some(RuleMatch { summary })
    }

    pub fn conflict_type(&self, entry: EntryPoint) -> ConflictType {
        match (self, entry) {
            (Self::Contradiction { .. }, _) => ConflictType::ContradictionDetected,
            (Self::LocationConflict, _) => ConflictType::LocationConflict,
            (Self::ExtremeSignal { .. }, EntryPoint::Analyze) => ConflictType::HighPriorityEvent,
            (Self::ExtremeSignal { .. }, EntryPoint::Escalate) => ConflictType::CriticalEscalation,
            (Self::ElevatedSignal { .. }, _) => ConflictType::MediumPriorityEvent,
            (Self::CursedOutput { .. }, _) => ConflictType::CursedContent,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::Contradiction { .. } => Severity::High,
            Self::LocationConflict => Severity::Medium,
            Self::ExtremeSignal { .. } => Severity::Critical,
            Self::ElevatedSignal { .. } => Severity::Medium,
            Self::CursedOutput { .. } => Severity::High,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Self::Contradiction { .. } => 0.75,
            Self::LocationConflict => 0.70,
            Self::ExtremeSignal { .. } => 0.90,
            Self::ElevatedSignal { .. } => 0.65,
            Self::CursedOutput { .. } => 0.80,
        }
    }
}

fn signal_exceeds(event: &LoreEvent, threshold: u8) -> Option<()> {
    (event.priority >= threshold || event.cursed_level >= threshold).then_some(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(kind: RuleKind) -> Rule {
        Rule::from_config(kind, &AnalyzerConfig::default())
    }

    #[test]
    fn test_default_order_is_contradiction_first() {
        let order = RuleKind::default_order();
        assert_eq!(order.first(), Some(&RuleKind::Contradiction));
        assert_eq!(order.len(), 5);
    }

    #[test]
    fn test_contradiction_keywords() {
        let rule = rule(RuleKind::Contradiction);
        let view = HistoryView::default();
        assert!(rule
            .evaluate(&LoreEvent::new("He cannot exist in two places"), &view)
            .is_some());
        assert!(rule
            .evaluate(&LoreEvent::new("A quiet morning"), &view)
            .is_none());
    }

    #[test]
    fn test_signal_thresholds_are_inclusive() {
        let view = HistoryView::default();
        let elevated = rule(RuleKind::ElevatedSignal);
        assert!(elevated
            .evaluate(&LoreEvent::new("x").with_priority(7), &view)
            .is_some());
        assert!(elevated
            .evaluate(&LoreEvent::new("x").with_priority(6).with_cursed_level(6), &view)
            .is_none());

        let extreme = rule(RuleKind::ExtremeSignal);
        assert!(extreme
            .evaluate(&LoreEvent::new("x").with_cursed_level(9), &view)
            .is_some());
        assert!(extreme
            .evaluate(&LoreEvent::new("x").with_priority(8), &view)
            .is_none());
    }

    #[test]
    fn test_location_rule_ignores_events_without_location() {
        let rule = rule(RuleKind::LocationConflict);
        assert!(rule
            .evaluate(&LoreEvent::new("x"), &HistoryView::default())
            .is_none());
    }

    #[test]
    fn test_cursed_output_matches_exact_type() {
        let rule = rule(RuleKind::CursedOutput);
        let view = HistoryView::default();
        assert!(rule
            .evaluate(&LoreEvent::new("x").with_type("cursed_output"), &view)
            .is_some());
        assert!(rule
            .evaluate(&LoreEvent::new("x").with_type("cursed_outputs"), &view)
            .is_none());
    }

    #[test]
    fn test_detected_confidence_above_half() {
        for kind in RuleKind::default_order() {
            assert!(rule(kind).confidence() > 0.5, "{}", kind.as_str());
        }
    }
}
