//! Conflict type → escalation channel table

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::analyzer::ConflictType;

/// Chat-style channel (Discord-equivalent)
pub const CHAT_CHANNEL: &str = "discord";
/// Workflow automation channel (LangChain-equivalent)
pub const WORKFLOW_CHANNEL: &str = "langchain";
/// Social broadcast channel (TikTok-equivalent)
pub const SOCIAL_CHANNEL: &str = "tiktok";

/// Named channels notified per conflict type.
///
/// Types absent from the table escalate nowhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelTable(BTreeMap<ConflictType, Vec<String>>);

impl ChannelTable {
    pub fn new(table: BTreeMap<ConflictType, Vec<String>>) -> Self {
        Self(table)
    }

    pub fn channels_for(&self, conflict_type: ConflictType) -> BTreeSet<String> {
        if conflict_type == ConflictType::None {
            return BTreeSet::new();
        }
        self.0
            .get(&conflict_type)
            .map(|names| names.iter().filter(|n| !n.is_empty()).cloned().collect())
            .unwrap_or_default()
    }

    /// Every channel name mentioned anywhere in the table.
    pub fn all_channels(&self) -> BTreeSet<String> {
        self.0.values().flatten().cloned().collect()
    }
}

impl Default for ChannelTable {
    fn default() -> Self {
        let names = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let critical = names(&[CHAT_CHANNEL, SOCIAL_CHANNEL, WORKFLOW_CHANNEL]);

        let mut table = BTreeMap::new();
        table.insert(
            ConflictType::ContradictionDetected,
            names(&[CHAT_CHANNEL, WORKFLOW_CHANNEL]),
        );
        table.insert(ConflictType::LocationConflict, names(&[CHAT_CHANNEL]));
        table.insert(ConflictType::HighPriorityEvent, critical.clone());
        table.insert(ConflictType::CriticalEscalation, critical);
        table.insert(ConflictType::MediumPriorityEvent, names(&[CHAT_CHANNEL]));
        table.insert(
            ConflictType::CursedContent,
            names(&[CHAT_CHANNEL, SOCIAL_CHANNEL]),
        );
        Self(table)
    }
}
