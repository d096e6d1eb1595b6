//! Ingestion pipeline: validate → analyze + record → escalate → fan out
//!
//! ```text
//! payload ─validate─▶ LoreEvent
//!                        │
//!                        ▼
//!              HistoryStore::commit  (analysis + intake + append, one lock)
//!                        │
//!          ┌─────────────┼──────────────────────┐
//!          ▼             ▼                      ▼
//!   spawn escalation   publish `analysis`   publish `conflicts`
//!   (tracked, not      (always)             (only when a record
//!    awaited)                                was appended)
//! ```

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::analyzer::{ConflictAnalysisResult, ConflictAnalyzer, EntryPoint};
use crate::config::{ConfigError, LorekeeperConfig};
use crate::escalation::{EscalationRouter, SharedEscalationRouter};
use crate::event::{LoreEvent, LoreEventPayload, ValidationError};
use crate::health::{ComponentStatus, HealthReport, SharedHealthProbe};
use crate::history::{HistoryStore, SharedHistoryStore};
use crate::hub::{Hub, HubMessage, SharedHub, StatusSnapshot, Topic};
use crate::tasks;

/// Extra time granted to in-flight dispatches beyond the sink timeout.
const DISPATCH_GRACE: Duration = Duration::from_secs(1);

/// Error type for ingestion
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Lorekeeper is shutting down; event rejected")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Shared reference to Lorekeeper
pub type SharedLorekeeper = Arc<Lorekeeper>;

/// The assembled core: analyzer, store, router and hub
pub struct Lorekeeper {
    config: LorekeeperConfig,
    analyzer: ConflictAnalyzer,
    store: SharedHistoryStore,
    router: SharedEscalationRouter,
    hub: SharedHub,
    accepting: AtomicBool,
    ingestions: TaskTracker,
    dispatches: TaskTracker,
    cancel: CancellationToken,
    started: Instant,
    background: Mutex<Vec<JoinHandle<()>>>,
    probes: Vec<SharedHealthProbe>,
}

impl Lorekeeper {
    /// Assemble the core from configuration.
    pub fn new(config: LorekeeperConfig) -> PipelineResult<Self> {
        config.validate()?;
        let router = EscalationRouter::from_config(&config.escalation)
            .map_err(|e| ConfigError::Invalid(format!("escalation sink: {e}")))?;
        let analyzer = ConflictAnalyzer::new(&config.analyzer, config.escalation.channels.clone());
        let store = HistoryStore::new(config.retention.clone()).shared();
        let hub = Hub::new(config.hub.clone()).shared();

        info!(
            rules = analyzer.rules().len(),
            max_records = config.retention.max_records,
            max_intake = config.retention.max_intake,
            "Lorekeeper assembled"
        );

        Ok(Self {
            config,
            analyzer,
            store,
            router: router.shared(),
            hub,
            accepting: AtomicBool::new(true),
            ingestions: TaskTracker::new(),
            dispatches: TaskTracker::new(),
            cancel: CancellationToken::new(),
            started: Instant::now(),
            background: Mutex::new(Vec::new()),
            probes: Vec::new(),
        })
    }

    /// Replace the escalation router (custom sinks).
    pub fn with_router(mut self, router: EscalationRouter) -> Self {
        self.router = router.shared();
        self
    }

    /// Register an external health probe.
    pub fn with_probe(mut self, probe: SharedHealthProbe) -> Self {
        self.probes.push(probe);
        self
    }

    /// Create a shared reference to this pipeline
    pub fn shared(self) -> SharedLorekeeper {
        Arc::new(self)
    }

    pub fn config(&self) -> &LorekeeperConfig {
        &self.config
    }

    pub fn analyzer(&self) -> &ConflictAnalyzer {
        &self.analyzer
    }

    pub fn store(&self) -> &SharedHistoryStore {
        &self.store
    }

    pub fn router(&self) -> &SharedEscalationRouter {
        &self.router
    }

    pub fn hub(&self) -> &SharedHub {
        &self.hub
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Start the retention sweeper and status ticker. Idempotent.
    pub fn start_background(&self) {
        let mut background = self.background_handles();
        if !background.is_empty() || self.cancel.is_cancelled() {
            return;
        }
        background.push(tasks::spawn_retention_sweeper(
            self.store.clone(),
            self.config.retention.sweep_interval(),
            self.cancel.clone(),
        ));
        background.push(tasks::spawn_status_ticker(
            self.store.clone(),
            self.hub.clone(),
            self.started,
            self.config.hub.status_interval(),
            self.cancel.clone(),
        ));
        info!(
            sweep_secs = self.config.retention.sweep_interval_secs,
            status_secs = self.config.hub.status_interval_secs,
            "Background timers started"
        );
    }

    /// Validate and process a payload through the regular entry point.
    pub async fn analyze(&self, payload: LoreEventPayload) -> PipelineResult<ConflictAnalysisResult> {
        self.ingest(payload, EntryPoint::Analyze).await
    }

    /// Validate and process a payload through the escalation entry point.
    pub async fn escalate(&self, payload: LoreEventPayload) -> PipelineResult<ConflictAnalysisResult> {
        self.ingest(payload, EntryPoint::Escalate).await
    }

    pub async fn ingest(
        &self,
        payload: LoreEventPayload,
        entry: EntryPoint,
    ) -> PipelineResult<ConflictAnalysisResult> {
        if !self.is_accepting() {
            return Err(PipelineError::ShuttingDown);
        }
        let event = payload.validate().inspect_err(|e| {
            debug!(error = %e, "Payload rejected");
        })?;
        self.ingest_event(event, entry).await
    }

    /// Process an already-validated event.
    pub async fn ingest_event(
        &self,
        event: LoreEvent,
        entry: EntryPoint,
    ) -> PipelineResult<ConflictAnalysisResult> {
        // Held until fan-out completes so shutdown can wait for us.
        let _inflight = self.ingestions.token();
        if !self.is_accepting() {
            return Err(PipelineError::ShuttingDown);
        }

        let analyzer = &self.analyzer;
        let commit = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.store
                .commit(event.clone(), |e, view| analyzer.analyze_for(e, view, entry))
        }))
        .map_err(|_| {
            error!(content = %event.preview(), "Analyzer panicked; event dropped");
            PipelineError::Internal("conflict analysis failed".to_string())
        })?;

        let analysis = commit.analysis;
        info!(
            sequence = commit.sequence,
            conflict_type = %analysis.conflict_type,
            severity = %analysis.severity,
            record_id = commit.record.as_ref().map(|r| r.id),
            ?entry,
            "Event analyzed"
        );

        if analysis.escalation_required {
            let router = self.router.clone();
            let event = event.clone();
            let result = analysis.clone();
            self.dispatches.spawn(async move {
                let report = router.route(&event, &result).await;
                debug!(
                    delivered = report.delivered(),
                    failed = report.failed(),
                    "Escalation finished"
                );
            });
        }

        self.hub
            .publish(
                Topic::Analysis,
                HubMessage::ConflictAnalysis {
                    event,
                    analysis: analysis.clone(),
                },
            )
            .await;
        if let Some(record) = commit.record {
            self.hub
                .publish(Topic::Conflicts, HubMessage::ConflictDetected { conflict: record })
                .await;
        }

        Ok(analysis)
    }

    /// Current system snapshot.
    pub async fn status(&self) -> StatusSnapshot {
        tasks::status_snapshot(&self.store, &self.hub, self.started).await
    }

    /// Internal component checks plus registered probes.
    pub async fn health(&self) -> HealthReport {
        let mut components = BTreeMap::new();

        components.insert("store".to_string(), ComponentStatus::Healthy);
        let hub_status = if self.hub.is_closed() {
            ComponentStatus::unhealthy("closed")
        } else {
            ComponentStatus::Healthy
        };
        components.insert("hub".to_string(), hub_status);
        let pipeline_status = if self.is_accepting() {
            ComponentStatus::Healthy
        } else {
            ComponentStatus::unhealthy("shutting down")
        };
        components.insert("pipeline".to_string(), pipeline_status);

        let counters = self.router.counters();
        let escalation_status = if counters.attempted > 0 && counters.delivered == 0 {
            ComponentStatus::degraded(format!("{} dispatches, none delivered", counters.attempted))
        } else {
            ComponentStatus::Healthy
        };
        components.insert("escalation".to_string(), escalation_status);

        for probe in &self.probes {
            components.insert(probe.name().to_string(), probe.check().await);
        }

        HealthReport::from_components(components)
    }

    /// Graceful stop. Safe to call more than once.
    pub async fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Shutdown requested; no longer accepting events");

        self.ingestions.close();
        self.ingestions.wait().await;
        debug!("In-flight ingestions drained");

        self.cancel.cancel();
        let handles: Vec<_> = self.background_handles().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        self.dispatches.close();
        let budget = self.router.timeout() + DISPATCH_GRACE;
        if tokio::time::timeout(budget, self.dispatches.wait()).await.is_err() {
            warn!(
                pending = self.dispatches.len(),
                "Escalation dispatches still running at shutdown"
            );
        }

        self.hub.close_all().await;
        info!(
            events_processed = self.store.events_processed(),
            total_conflicts = self.store.total_conflicts(),
            "Lorekeeper stopped"
        );
    }

    fn background_handles(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for Lorekeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lorekeeper")
            .field("accepting", &self.is_accepting())
            .field("retained", &self.store.len())
            .field("probes", &self.probes.len())
            .finish()
    }
}
