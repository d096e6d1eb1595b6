//! Channel sinks — the narrow seam to external notification systems

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::analyzer::{ConflictAnalysisResult, Severity};
use crate::event::LoreEvent;

/// Error type for sink dispatch
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SinkError {
    #[error("Sink timed out after {0:?}")]
    Timeout(Duration),

    #[error("Sink rejected notification with status {status}")]
    Rejected { status: u16 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No sink configured for channel {0}")]
    NotConfigured(String),
}

/// Result type for sink dispatch
pub type SinkResult<T> = Result<T, SinkError>;

/// Receiver of escalation notifications for one or more named channels.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelSink: Send + Sync {
    /// Identifier used in logs and dispatch outcomes.
    fn name(&self) -> &str;

    /// Deliver one notification.
    async fn send(
        &self,
        channel: &str,
        event: &LoreEvent,
        result: &ConflictAnalysisResult,
    ) -> SinkResult<()>;
}

/// Sink that records escalations in the structured log.
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl ChannelSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(
        &self,
        channel: &str,
        event: &LoreEvent,
        result: &ConflictAnalysisResult,
    ) -> SinkResult<()> {
        if result.severity >= Severity::High {
            warn!(
                channel,
                conflict_type = %result.conflict_type,
                severity = %result.severity,
                content = %event.preview(),
                "Escalation"
            );
        } else {
            info!(
                channel,
                conflict_type = %result.conflict_type,
                severity = %result.severity,
                content = %event.preview(),
                "Escalation"
            );
        }
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookBody<'a> {
    channel: &'a str,
    event: &'a LoreEvent,
    analysis: &'a ConflictAnalysisResult,
}

/// Generic JSON webhook: POSTs `{channel, event, analysis}` to a URL.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    name: String,
    url: String,
    http: reqwest::Client,
}

impl WebhookSink {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> SinkResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            http,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ChannelSink for WebhookSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(
        &self,
        channel: &str,
        event: &LoreEvent,
        result: &ConflictAnalysisResult,
    ) -> SinkResult<()> {
        let body = WebhookBody {
            channel,
            event,
            analysis: result,
        };
        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SinkError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}
