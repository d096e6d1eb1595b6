//! Fan-out wire types
//!
//! Server → subscriber messages are tagged by `type`; subscriber → server
//! messages use the single-key form (`{"subscribe": [...]}`,
//! `{"get_conflicts": {}}`, `"ping"`).

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analyzer::ConflictAnalysisResult;
use crate::event::LoreEvent;
use crate::history::ConflictRecord;

/// Subscription topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Conflicts,
    Analysis,
    SystemStatus,
}

impl Topic {
    pub fn all() -> &'static [Topic] {
        &[Topic::Conflicts, Topic::Analysis, Topic::SystemStatus]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conflicts => "conflicts",
            Self::Analysis => "analysis",
            Self::SystemStatus => "system_status",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "conflicts" => Ok(Self::Conflicts),
            "analysis" => Ok(Self::Analysis),
            "system_status" => Ok(Self::SystemStatus),
            other => Err(other.to_string()),
        }
    }
}

/// Periodic system snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub active_connections: usize,
    pub total_conflicts: u64,
    pub events_processed: u64,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

/// Server → subscriber messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum HubMessage {
    Welcome {
        client_id: String,
        conflicts_in_history: usize,
    },
    Subscribed {
        subscribed: Vec<Topic>,
    },
    Unsubscribed {
        unsubscribed: Topic,
    },
    ConflictDetected {
        conflict: ConflictRecord,
    },
    ConflictAnalysis {
        event: LoreEvent,
        analysis: ConflictAnalysisResult,
    },
    SystemStatus(StatusSnapshot),
    Conflicts {
        conflicts: Vec<ConflictRecord>,
        total: usize,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

impl HubMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::Subscribed { .. } => "subscribed",
            Self::Unsubscribed { .. } => "unsubscribed",
            Self::ConflictDetected { .. } => "conflict_detected",
            Self::ConflictAnalysis { .. } => "conflict_analysis",
            Self::SystemStatus(_) => "system_status",
            Self::Conflicts { .. } => "conflicts",
            Self::Pong { .. } => "pong",
            Self::Error { .. } => "error",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Optional arguments for an on-demand history query
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConflictQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Subscriber → server messages
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    /// Topic names; unknown names are reported and skipped
    Subscribe(Vec<String>),
    Unsubscribe(String),
    GetConflicts(Option<ConflictQuery>),
    Ping,
}

/// Split topic names into known topics and rejected names.
pub fn parse_topics(names: &[String]) -> (BTreeSet<Topic>, Vec<String>) {
    let mut topics = BTreeSet::new();
    let mut unknown = Vec::new();
    for name in names {
        match name.parse::<Topic>() {
            Ok(topic) => {
                topics.insert(topic);
            }
            Err(name) => unknown.push(name),
        }
    }
    (topics, unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_wire_forms() {
        let sub: ClientMessage =
            serde_json::from_str(r#"{"subscribe": ["conflicts", "analysis"]}"#).unwrap();
        assert_eq!(
            sub,
            ClientMessage::Subscribe(vec!["conflicts".into(), "analysis".into()])
        );

        let get: ClientMessage = serde_json::from_str(r#"{"get_conflicts": null}"#).unwrap();
        assert_eq!(get, ClientMessage::GetConflicts(None));

        let get: ClientMessage = serde_json::from_str(r#"{"get_conflicts": {"limit": 5}}"#).unwrap();
        assert_eq!(
            get,
            ClientMessage::GetConflicts(Some(ConflictQuery { limit: Some(5) }))
        );

        let ping: ClientMessage = serde_json::from_str(r#""ping""#).unwrap();
        assert_eq!(ping, ClientMessage::Ping);
    }

    #[test]
    fn test_welcome_serializes_camel_case() {
        let msg = HubMessage::Welcome {
            client_id: "abc".into(),
            conflicts_in_history: 3,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "welcome");
        assert_eq!(json["clientId"], "abc");
        assert_eq!(json["conflictsInHistory"], 3);
    }

    #[test]
    fn test_status_snapshot_is_inlined() {
        let msg = HubMessage::SystemStatus(StatusSnapshot {
            active_connections: 2,
            total_conflicts: 7,
            events_processed: 11,
            uptime_seconds: 60,
            timestamp: Utc::now(),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "system_status");
        assert_eq!(json["activeConnections"], 2);
        assert_eq!(msg.kind(), "system_status");
    }

    #[test]
    fn test_parse_topics_splits_unknown() {
        let (topics, unknown) =
            parse_topics(&["conflicts".into(), "gossip".into(), "system_status".into()]);
        assert_eq!(topics.len(), 2);
        assert_eq!(unknown, vec!["gossip"]);
    }
}
