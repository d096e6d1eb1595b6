//! Configuration
//!
//! Layering: built-in defaults, then an optional TOML file, then
//! `LOREKEEPER_*` environment variables. The gateway applies CLI flags last.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analyzer::RuleKind;
use crate::escalation::ChannelTable;
use crate::hub::Topic;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LorekeeperConfig {
    pub analyzer: AnalyzerConfig,
    pub escalation: EscalationConfig,
    pub retention: RetentionConfig,
    pub hub: HubConfig,
}

/// Analyzer thresholds and keywords
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Case-insensitive substrings that mark a contradiction
    pub contradiction_keywords: Vec<String>,
    /// `priority`/`cursedLevel` at or above this is critical
    pub extreme_threshold: u8,
    /// `priority`/`cursedLevel` at or above this is medium
    pub elevated_threshold: u8,
    /// Event `type` flagged as cursed content
    pub cursed_event_type: String,
    /// Cap on `relatedEvents`
    pub max_related: usize,
    /// Rule evaluation order; first match wins
    pub rule_order: Vec<RuleKind>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            contradiction_keywords: [
                "cannot exist in two places",
                "fracturing",
                "simultaneously",
                "impossible",
                "contradiction",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            extreme_threshold: 9,
            elevated_threshold: 7,
            cursed_event_type: "cursed_output".to_string(),
            max_related: 10,
            rule_order: RuleKind::default_order(),
        }
    }
}

/// Webhook target for one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
}

/// Escalation channel table and sink settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Per-dispatch timeout
    pub sink_timeout_secs: u64,
    /// Conflict type → channel names
    pub channels: ChannelTable,
    /// Channel name → webhook; channels without one go to the log sink
    pub webhooks: BTreeMap<String, WebhookConfig>,
}

impl EscalationConfig {
    pub fn sink_timeout(&self) -> Duration {
        Duration::from_secs(self.sink_timeout_secs)
    }
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            sink_timeout_secs: 5,
            channels: ChannelTable::default(),
            webhooks: BTreeMap::new(),
        }
    }
}

/// Sliding-window retention
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Conflict records kept after a sweep
    pub max_records: usize,
    /// Raw intake entries kept after a sweep
    pub max_intake: usize,
    pub sweep_interval_secs: u64,
}

impl RetentionConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_records: 500,
            max_intake: 1000,
            sweep_interval_secs: 60,
        }
    }
}

/// Fan-out hub settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Bounded queue per subscriber; full queues drop messages
    pub subscriber_queue: usize,
    pub status_interval_secs: u64,
    /// Max records returned by an on-demand history query
    pub history_query_limit: usize,
    /// Topics a new connection starts subscribed to
    pub default_topics: Vec<Topic>,
}

impl HubConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_queue: 64,
            status_interval_secs: 30,
            history_query_limit: 50,
            default_topics: Topic::all().to_vec(),
        }
    }
}

impl LorekeeperConfig {
    /// Load a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: LorekeeperConfig = toml::from_str(&content)?;
        debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Defaults or file, then environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply `LOREKEEPER_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (unparseable or zero values are ignored).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let positive = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|v| *v > 0)
        };

        if let Some(v) = positive("LOREKEEPER_MAX_RECORDS") {
            self.retention.max_records = v as usize;
        }
        if let Some(v) = positive("LOREKEEPER_MAX_INTAKE") {
            self.retention.max_intake = v as usize;
        }
        if let Some(v) = positive("LOREKEEPER_SWEEP_INTERVAL_SECS") {
            self.retention.sweep_interval_secs = v;
        }
        if let Some(v) = positive("LOREKEEPER_STATUS_INTERVAL_SECS") {
            self.hub.status_interval_secs = v;
        }
        if let Some(v) = positive("LOREKEEPER_SUBSCRIBER_QUEUE") {
            self.hub.subscriber_queue = v as usize;
        }
        if let Some(v) = positive("LOREKEEPER_SINK_TIMEOUT_SECS") {
            self.escalation.sink_timeout_secs = v;
        }
        if let Some(keywords) = lookup("LOREKEEPER_CONTRADICTION_KEYWORDS") {
            let keywords: Vec<String> = keywords
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
            if !keywords.is_empty() {
                self.analyzer.contradiction_keywords = keywords;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.retention.max_records == 0 || self.retention.max_intake == 0 {
            return invalid("retention caps must be positive");
        }
        if self.retention.sweep_interval_secs == 0 || self.hub.status_interval_secs == 0 {
            return invalid("timer intervals must be positive");
        }
        if self.hub.subscriber_queue == 0 {
            return invalid("hub.subscriber_queue must be positive");
        }
        if self.escalation.sink_timeout_secs == 0 {
            return invalid("escalation.sink_timeout_secs must be positive");
        }
        if self.analyzer.elevated_threshold > self.analyzer.extreme_threshold {
            return invalid("analyzer.elevated_threshold must not exceed extreme_threshold");
        }
        let mut seen = std::collections::HashSet::new();
        if !self.analyzer.rule_order.iter().all(|k| seen.insert(*k)) {
            return invalid("analyzer.rule_order contains duplicates");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ConflictType;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = LorekeeperConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retention.max_records, 500);
        assert_eq!(config.retention.max_intake, 1000);
        assert_eq!(config.retention.sweep_interval_secs, 60);
        assert_eq!(config.hub.status_interval_secs, 30);
        assert_eq!(config.hub.history_query_limit, 50);
    }

    #[test]
    fn test_partial_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[retention]
max_records = 20

[analyzer]
contradiction_keywords = ["paradox"]

[escalation.channels]
contradiction_detected = ["ops"]

[escalation.webhooks.ops]
url = "http://localhost:9999/hook"
"#
        )
        .unwrap();

        let config = LorekeeperConfig::from_file(file.path()).unwrap();
        assert_eq!(config.retention.max_records, 20);
        assert_eq!(config.retention.max_intake, 1000);
        assert_eq!(config.analyzer.contradiction_keywords, vec!["paradox"]);
        assert_eq!(config.analyzer.extreme_threshold, 9);
        assert!(config
            .escalation
            .channels
            .channels_for(ConflictType::ContradictionDetected)
            .contains("ops"));
        assert_eq!(config.escalation.webhooks["ops"].url, "http://localhost:9999/hook");
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = LorekeeperConfig::from_file(Path::new("/nonexistent/lorekeeper.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("LOREKEEPER_MAX_RECORDS", "42"),
            ("LOREKEEPER_STATUS_INTERVAL_SECS", "0"),
            ("LOREKEEPER_SINK_TIMEOUT_SECS", "abc"),
            ("LOREKEEPER_CONTRADICTION_KEYWORDS", "paradox, rift ,"),
        ]);
        let mut config = LorekeeperConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.retention.max_records, 42);
        assert_eq!(config.hub.status_interval_secs, 30);
        assert_eq!(config.escalation.sink_timeout_secs, 5);
        assert_eq!(config.analyzer.contradiction_keywords, vec!["paradox", "rift"]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = LorekeeperConfig::default();
        config.retention.max_records = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = LorekeeperConfig::default();
        config.analyzer.elevated_threshold = 10;
        assert!(config.validate().is_err());

        let mut config = LorekeeperConfig::default();
        config.analyzer.rule_order = vec![RuleKind::Contradiction, RuleKind::Contradiction];
        assert!(config.validate().is_err());
    }
}
