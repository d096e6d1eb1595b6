//! Escalation Router — per-channel dispatch with bounded timeouts

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::sink::{ChannelSink, LogSink, SinkError, WebhookSink};
use crate::analyzer::ConflictAnalysisResult;
use crate::config::EscalationConfig;
use crate::event::LoreEvent;

/// Shared reference to EscalationRouter
pub type SharedEscalationRouter = Arc<EscalationRouter>;

/// How one channel's dispatch ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DispatchStatus {
    Delivered,
    Failed(String),
    TimedOut,
    /// No sink registered and no fallback
    NoSink,
}

/// Outcome for a single channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub channel: String,
    pub sink: Option<String>,
    pub status: DispatchStatus,
    pub elapsed_ms: u64,
}

impl DispatchOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == DispatchStatus::Delivered
    }
}

/// Per-channel outcomes for one escalation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EscalationReport {
    pub outcomes: Vec<DispatchOutcome>,
}

impl EscalationReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }

    pub fn outcome(&self, channel: &str) -> Option<&DispatchOutcome> {
        self.outcomes.iter().find(|o| o.channel == channel)
    }
}

/// Cumulative dispatch counters
#[derive(Debug, Default)]
pub struct DispatchCounters {
    attempted: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

/// Point-in-time copy of [`DispatchCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountersSnapshot {
    pub attempted: u64,
    pub delivered: u64,
    /// Includes timeouts and missing sinks
    pub failed: u64,
    pub timed_out: u64,
}

impl DispatchCounters {
    fn record(&self, status: &DispatchStatus) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
        match status {
            DispatchStatus::Delivered => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            DispatchStatus::TimedOut => {
                self.timed_out.fetch_add(1, Ordering::Relaxed);
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            DispatchStatus::Failed(_) | DispatchStatus::NoSink => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            attempted: self.attempted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

/// Dispatches escalations to registered channel sinks
pub struct EscalationRouter {
    sinks: HashMap<String, Arc<dyn ChannelSink>>,
    fallback: Option<Arc<dyn ChannelSink>>,
    timeout: Duration,
    counters: DispatchCounters,
}

impl EscalationRouter {
    /// Router with no sinks; every channel reports [`DispatchStatus::NoSink`].
    pub fn new(timeout: Duration) -> Self {
        Self {
            sinks: HashMap::new(),
            fallback: None,
            timeout,
            counters: DispatchCounters::default(),
        }
    }

    /// Webhook sinks from config; every other channel falls back to the log.
    pub fn from_config(config: &EscalationConfig) -> Result<Self, SinkError> {
        let timeout = config.sink_timeout();
        let mut router = Self::new(timeout).with_fallback(Arc::new(LogSink));
        for (channel, hook) in &config.webhooks {
            let sink = WebhookSink::new(format!("webhook:{channel}"), &hook.url, timeout)?;
            router = router.with_sink(channel.clone(), Arc::new(sink));
        }
        Ok(router)
    }

    pub fn with_sink(mut self, channel: impl Into<String>, sink: Arc<dyn ChannelSink>) -> Self {
        self.sinks.insert(channel.into(), sink);
        self
    }

    pub fn with_fallback(mut self, sink: Arc<dyn ChannelSink>) -> Self {
        self.fallback = Some(sink);
        self
    }

    /// Create a shared reference to this router
    pub fn shared(self) -> SharedEscalationRouter {
        Arc::new(self)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    fn sink_for(&self, channel: &str) -> Option<&Arc<dyn ChannelSink>> {
        self.sinks.get(channel).or(self.fallback.as_ref())
    }

    /// Dispatch to every channel in `result.escalation_channels` concurrently.
    pub async fn route(&self, event: &LoreEvent, result: &ConflictAnalysisResult) -> EscalationReport {
        let dispatches = result
            .escalation_channels
            .iter()
            .map(|channel| self.dispatch_one(channel, event, result));
        let outcomes = join_all(dispatches).await;

        let report = EscalationReport { outcomes };
        if report.failed() > 0 {
            warn!(
                conflict_type = %result.conflict_type,
                delivered = report.delivered(),
                failed = report.failed(),
                "Escalation partially failed"
            );
        } else if !report.outcomes.is_empty() {
            info!(
                conflict_type = %result.conflict_type,
                channels = report.outcomes.len(),
                "Escalation delivered"
            );
        }
        report
    }

    async fn dispatch_one(
        &self,
        channel: &str,
        event: &LoreEvent,
        result: &ConflictAnalysisResult,
    ) -> DispatchOutcome {
        let started = Instant::now();
        let Some(sink) = self.sink_for(channel) else {
            warn!(channel, "No sink configured for channel");
            let status = DispatchStatus::NoSink;
            self.counters.record(&status);
            return DispatchOutcome {
                channel: channel.to_string(),
                sink: None,
                status,
                elapsed_ms: 0,
            };
        };

        let status = match tokio::time::timeout(self.timeout, sink.send(channel, event, result)).await
        {
            Ok(Ok(())) => DispatchStatus::Delivered,
            Ok(Err(e)) => {
                warn!(channel, sink = sink.name(), error = %e, "Sink dispatch failed");
                DispatchStatus::Failed(e.to_string())
            }
            Err(_) => {
                warn!(
                    channel,
                    sink = sink.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Sink dispatch timed out"
                );
                DispatchStatus::TimedOut
            }
        };
        self.counters.record(&status);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(channel, sink = sink.name(), elapsed_ms, "Dispatch finished");

        DispatchOutcome {
            channel: channel.to_string(),
            sink: Some(sink.name().to_string()),
            status,
            elapsed_ms,
        }
    }
}

impl std::fmt::Debug for EscalationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut channels: Vec<&String> = self.sinks.keys().collect();
        channels.sort();
        f.debug_struct("EscalationRouter")
            .field("channels", &channels)
            .field("fallback", &self.fallback.as_ref().map(|s| s.name().to_string()))
            .field("timeout", &self.timeout)
            .finish()
    }
}
