//! Lore event model and inbound validation
//!
//! Events arrive as loosely-typed [`LoreEventPayload`]s (every field optional,
//! the way the content pipeline emits them) and are turned into immutable
//! [`LoreEvent`]s by [`LoreEventPayload::validate`]. Only validated events
//! ever reach the analyzer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound for the 0–10 scales (`priority`, `loreLevel`, `cursedLevel`).
pub const MAX_LEVEL: u8 = 10;

/// Metadata key carrying the in-world location of an event.
pub const LOCATION_KEY: &str = "location";

/// Errors raised while validating an inbound payload
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field `{0}` must not be empty")]
    EmptyField(&'static str),

    #[error("Field `{field}` out of range: {value} (expected {expected})")]
    OutOfRange {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Result type for validation
pub type ValidationResult<T> = Result<T, ValidationError>;

/// A validated narrative/content-state update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoreEvent {
    /// Free-form event tag (e.g. `lore_update`, `cursed_output`)
    #[serde(rename = "type")]
    pub event_type: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    /// 0–10
    pub priority: u8,
    pub tags: Vec<String>,
    pub user_id: Option<String>,
    pub channel_id: Option<String>,
    /// 0–10
    pub lore_level: u8,
    /// -1.0..=1.0
    pub sentiment: f64,
    /// 0–10
    pub cursed_level: u8,
    pub session_id: Option<String>,
    pub session_event_count: u64,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl LoreEvent {
    /// Start a minimal event with the given content. Used by tests and
    /// programmatic producers; every other field takes its default.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            event_type: DEFAULT_EVENT_TYPE.to_string(),
            content: content.into(),
            timestamp: Utc::now(),
            source: DEFAULT_SOURCE.to_string(),
            priority: 0,
            tags: Vec::new(),
            user_id: None,
            channel_id: None,
            lore_level: 0,
            sentiment: 0.0,
            cursed_level: 0,
            session_id: None,
            session_event_count: 0,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(MAX_LEVEL);
        self
    }

    pub fn with_cursed_level(mut self, level: u8) -> Self {
        self.cursed_level = level.min(MAX_LEVEL);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.metadata.insert(
            LOCATION_KEY.to_string(),
            serde_json::Value::String(location.into()),
        );
        self
    }

    /// `metadata.location`, when present as a non-empty string.
    pub fn location(&self) -> Option<&str> {
        self.metadata
            .get(LOCATION_KEY)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Whether this event shares at least one tag with `other`.
    pub fn shares_tag_with(&self, other: &LoreEvent) -> bool {
        self.tags.iter().any(|t| other.tags.contains(t))
    }

    /// Whether both events carry the same non-empty session id.
    pub fn same_session(&self, other: &LoreEvent) -> bool {
        match (&self.session_id, &other.session_id) {
            (Some(a), Some(b)) => !a.is_empty() && a == b,
            _ => false,
        }
    }

    /// Short content preview for log lines.
    pub fn preview(&self) -> String {
        const PREVIEW_CHARS: usize = 60;
        if self.content.chars().count() <= PREVIEW_CHARS {
            self.content.clone()
        } else {
            let head: String = self.content.chars().take(PREVIEW_CHARS).collect();
            format!("{head}…")
        }
    }
}

const DEFAULT_EVENT_TYPE: &str = "lore_update";
const DEFAULT_SOURCE: &str = "unknown";

/// Inbound event shape as posted by producers. Every field is optional so
/// that malformed input surfaces as a [`ValidationError`] rather than a
/// deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoreEventPayload {
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub lore_level: Option<i64>,
    #[serde(default)]
    pub sentiment: Option<f64>,
    #[serde(default)]
    pub cursed_level: Option<i64>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub session_event_count: Option<u64>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

impl LoreEventPayload {
    /// Payload carrying only `content`.
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Apply defaults and reject malformed input.
    pub fn validate(self) -> ValidationResult<LoreEvent> {
        let content = self.content.ok_or(ValidationError::MissingField("content"))?;
        if content.trim().is_empty() {
            return Err(ValidationError::EmptyField("content"));
        }

        let priority = level("priority", self.priority)?;
        let lore_level = level("loreLevel", self.lore_level)?;
        let cursed_level = level("cursedLevel", self.cursed_level)?;

        let sentiment = self.sentiment.unwrap_or(0.0);
        if !(-1.0..=1.0).contains(&sentiment) {
            return Err(ValidationError::OutOfRange {
                field: "sentiment",
                value: sentiment.to_string(),
                expected: "-1.0..=1.0",
            });
        }

        let event_type = self
            .event_type
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string());
        let source = self
            .source
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SOURCE.to_string());

        Ok(LoreEvent {
            event_type,
            content,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            source,
            priority,
            tags: self.tags.unwrap_or_default(),
            user_id: self.user_id,
            channel_id: self.channel_id,
            lore_level,
            sentiment,
            cursed_level,
            session_id: self.session_id,
            session_event_count: self.session_event_count.unwrap_or(0),
            metadata: self.metadata.unwrap_or_default(),
        })
    }
}

fn level(field: &'static str, value: Option<i64>) -> ValidationResult<u8> {
    let value = value.unwrap_or(0);
    if !(0..=i64::from(MAX_LEVEL)).contains(&value) {
        return Err(ValidationError::OutOfRange {
            field,
            value: value.to_string(),
            expected: "0..=10",
        });
    }
    Ok(value as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_content_rejected() {
        let err = LoreEventPayload::default().validate().unwrap_err();
        assert_eq!(err, ValidationError::MissingField("content"));
    }

    #[test]
    fn test_blank_content_rejected() {
        let err = LoreEventPayload::with_content("   ").validate().unwrap_err();
        assert_eq!(err, ValidationError::EmptyField("content"));
    }

    #[test]
    fn test_defaults_applied() {
        let event = LoreEventPayload::with_content("The tower stands")
            .validate()
            .unwrap();
        assert_eq!(event.event_type, "lore_update");
        assert_eq!(event.source, "unknown");
        assert_eq!(event.priority, 0);
        assert!(event.tags.is_empty());
        assert!(event.location().is_none());
    }

    #[test]
    fn test_out_of_range_levels_rejected() {
        let payload = LoreEventPayload {
            priority: Some(11),
            ..LoreEventPayload::with_content("x")
        };
        assert!(matches!(
            payload.validate(),
            Err(ValidationError::OutOfRange { field: "priority", .. })
        ));

        let payload = LoreEventPayload {
            cursed_level: Some(-1),
            ..LoreEventPayload::with_content("x")
        };
        assert!(matches!(
            payload.validate(),
            Err(ValidationError::OutOfRange { field: "cursedLevel", .. })
        ));

        let payload = LoreEventPayload {
            sentiment: Some(1.5),
            ..LoreEventPayload::with_content("x")
        };
        assert!(matches!(
            payload.validate(),
            Err(ValidationError::OutOfRange { field: "sentiment", .. })
        ));
    }

    #[test]
    fn test_camel_case_wire_format() {
        let json = serde_json::json!({
            "type": "cursed_output",
            "content": "whispers",
            "cursedLevel": 4,
            "sessionId": "s-1",
            "metadata": { "location": "northern_caves" }
        });
        let payload: LoreEventPayload = serde_json::from_value(json).unwrap();
        let event = payload.validate().unwrap();
        assert_eq!(event.event_type, "cursed_output");
        assert_eq!(event.cursed_level, 4);
        assert_eq!(event.session_id.as_deref(), Some("s-1"));
        assert_eq!(event.location(), Some("northern_caves"));

        let out = serde_json::to_value(&event).unwrap();
        assert_eq!(out["type"], "cursed_output");
        assert_eq!(out["cursedLevel"], 4);
    }

    #[test]
    fn test_session_and_tag_overlap() {
        let a = LoreEvent::new("a").with_session("s").with_tags(["dragons", "north"]);
        let b = LoreEvent::new("b").with_tags(["north"]);
        let c = LoreEvent::new("c").with_session("s");
        assert!(a.shares_tag_with(&b));
        assert!(!b.same_session(&a));
        assert!(a.same_session(&c));
    }

    #[test]
    fn test_preview_truncates() {
        let event = LoreEvent::new("x".repeat(200));
        assert!(event.preview().chars().count() <= 61);
    }
}
