//! End-to-end tests for the ingestion pipeline: analysis, recording,
//! escalation dispatch and live fan-out working together.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lorekeeper::config::RetentionConfig;
use lorekeeper::escalation::{ChannelSink, EscalationRouter, SinkResult};
use lorekeeper::hub::Connection;
use lorekeeper::{
    ConflictAnalysisResult, ConflictType, HubMessage, LoreEvent, LoreEventPayload, Lorekeeper,
    LorekeeperConfig, Severity, Topic,
};
use serde_json::json;

/// Sink that remembers every channel it was asked to deliver to.
#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<(String, ConflictType)>>,
}

impl RecordingSink {
    fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|(c, _)| c.clone())
            .collect();
        channels.sort();
        channels
    }
}

#[async_trait]
impl ChannelSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(
        &self,
        channel: &str,
        _event: &LoreEvent,
        result: &ConflictAnalysisResult,
    ) -> SinkResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push((channel.to_string(), result.conflict_type));
        Ok(())
    }
}

/// Sink that never completes.
struct StalledSink;

#[async_trait]
impl ChannelSink for StalledSink {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn send(
        &self,
        _channel: &str,
        _event: &LoreEvent,
        _result: &ConflictAnalysisResult,
    ) -> SinkResult<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("lorekeeper=debug")
        .with_test_writer()
        .try_init();
}

fn lorekeeper_with(sink: Arc<dyn ChannelSink>, config: LorekeeperConfig) -> Lorekeeper {
    init_tracing();
    let router = EscalationRouter::new(config.escalation.sink_timeout()).with_fallback(sink);
    Lorekeeper::new(config).unwrap().with_router(router)
}

fn payload(value: serde_json::Value) -> LoreEventPayload {
    serde_json::from_value(value).unwrap()
}

async fn subscriber(lk: &Lorekeeper) -> Connection {
    let mut conn = lk.hub().connect(lk.store().len()).await.unwrap();
    assert!(matches!(
        conn.receiver.recv().await,
        Some(HubMessage::Welcome { .. })
    ));
    conn
}

async fn wait_for_dispatches(lk: &Lorekeeper, expected: u64) {
    for _ in 0..100 {
        if lk.router().counters().attempted >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("dispatches did not finish");
}

// ── Rule precedence scenarios ───────────────────────────────────────

#[tokio::test]
async fn contradiction_wins_over_extreme_signal() {
    let sink = Arc::new(RecordingSink::default());
    let lk = lorekeeper_with(sink.clone(), LorekeeperConfig::default());
    let mut conn = subscriber(&lk).await;

    let result = lk
        .analyze(payload(json!({
            "content": "Reality is fracturing",
            "priority": 10,
            "cursedLevel": 10
        })))
        .await
        .unwrap();

    assert!(result.conflict_detected);
    assert_eq!(result.conflict_type, ConflictType::ContradictionDetected);
    assert_eq!(result.severity, Severity::High);
    assert!(result.confidence > 0.5);
    assert_eq!(lk.store().len(), 1);

    assert_eq!(conn.receiver.recv().await.unwrap().kind(), "conflict_analysis");
    match conn.receiver.recv().await.unwrap() {
        HubMessage::ConflictDetected { conflict } => assert_eq!(conflict.id, 1),
        other => panic!("expected conflict_detected, got {other:?}"),
    }

    wait_for_dispatches(&lk, 2).await;
    assert_eq!(sink.channels(), vec!["discord", "langchain"]);
}

#[tokio::test]
async fn ordinary_text_is_broadcast_but_not_recorded() {
    let lk = Lorekeeper::new(LorekeeperConfig::default()).unwrap();
    let mut conn = subscriber(&lk).await;

    let result = lk
        .analyze(payload(json!({
            "content": "ordinary text",
            "priority": 2,
            "cursedLevel": 1
        })))
        .await
        .unwrap();

    assert!(!result.conflict_detected);
    assert!(!result.escalation_required);
    assert!(lk.store().is_empty());

    match conn.receiver.recv().await.unwrap() {
        HubMessage::ConflictAnalysis { analysis, .. } => {
            assert_eq!(analysis.conflict_type, ConflictType::None)
        }
        other => panic!("expected conflict_analysis, got {other:?}"),
    }
    assert!(conn.receiver.try_recv().is_err());
    assert_eq!(lk.router().counters().attempted, 0);
}

#[tokio::test]
async fn repeated_location_is_a_medium_conflict() {
    let lk = Lorekeeper::new(LorekeeperConfig::default()).unwrap();
    let event = json!({
        "content": "A lantern flickers",
        "metadata": { "location": "northern_caves" }
    });

    let first = lk.analyze(payload(event.clone())).await.unwrap();
    assert!(!first.conflict_detected);

    let second = lk.analyze(payload(event)).await.unwrap();
    assert_eq!(second.conflict_type, ConflictType::LocationConflict);
    assert_eq!(second.severity, Severity::Medium);
}

#[tokio::test]
async fn extreme_signal_is_critical_and_reaches_chat() {
    let lk = Lorekeeper::new(LorekeeperConfig::default()).unwrap();
    let result = lk
        .analyze(payload(json!({ "content": "the seal weakens", "cursedLevel": 9 })))
        .await
        .unwrap();

    assert_eq!(result.conflict_type, ConflictType::HighPriorityEvent);
    assert_eq!(result.severity, Severity::Critical);
    assert!(result.escalation_channels.contains("discord"));
}

// ── History invariants ──────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ingestion_yields_gap_free_ids() {
    let lk = Lorekeeper::new(LorekeeperConfig::default()).unwrap().shared();

    let handles: Vec<_> = (0..40)
        .map(|i| {
            let lk = lk.clone();
            tokio::spawn(async move {
                lk.analyze(LoreEventPayload::with_content(format!("impossible #{i}")))
                    .await
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let ids: Vec<u64> = lk.store().list(100, 0).iter().map(|r| r.id).collect();
    assert_eq!(ids, (1..=40).collect::<Vec<u64>>());
    assert_eq!(lk.store().events_processed(), 40);
}

#[tokio::test]
async fn trimming_keeps_cumulative_totals() {
    let config = LorekeeperConfig {
        retention: RetentionConfig {
            max_records: 5,
            max_intake: 50,
            sweep_interval_secs: 60,
        },
        ..LorekeeperConfig::default()
    };
    let lk = Lorekeeper::new(config).unwrap();

    for i in 0..8 {
        lk.analyze(LoreEventPayload::with_content(format!("contradiction {i}")))
            .await
            .unwrap();
    }
    lk.store().trim();

    let retained = lk.store().list(15, 0);
    assert_eq!(retained.len(), 5);
    assert_eq!(retained.first().map(|r| r.id), Some(4));

    let stats = lk.store().stats();
    assert_eq!(stats.total_conflicts, 8);
    assert_eq!(stats.retained_conflicts, 5);
    assert_eq!(
        stats.conflicts_by_type[&ConflictType::ContradictionDetected],
        8
    );
}

#[tokio::test]
async fn resolving_updates_statistics() {
    let lk = Lorekeeper::new(LorekeeperConfig::default()).unwrap();
    for text in ["impossible a", "impossible b"] {
        lk.analyze(LoreEventPayload::with_content(text)).await.unwrap();
    }

    let resolved = lk.store().resolve(1, Some("retconned".into())).unwrap();
    assert!(resolved.resolved_at.is_some());

    let stats = lk.store().stats();
    assert_eq!(stats.pending_conflicts, 1);
    assert_eq!(stats.resolved_conflicts, 1);
    assert!(stats.average_resolution_time >= 0.0);
}

// ── Escalation isolation ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stalled_sink_never_blocks_ingestion() {
    let lk = lorekeeper_with(Arc::new(StalledSink), LorekeeperConfig::default());

    let result = lk
        .analyze(LoreEventPayload::with_content("Two suns rise simultaneously"))
        .await
        .unwrap();
    assert!(result.escalation_required);
    assert_eq!(lk.router().counters().attempted, 0);

    // Sink timeout is 5s; auto-advance carries the dispatch past it.
    tokio::time::sleep(Duration::from_secs(6)).await;
    let counters = lk.router().counters();
    assert_eq!(counters.timed_out, 2);
    assert_eq!(counters.delivered, 0);
}

// ── Fan-out and shutdown ────────────────────────────────────────────

#[tokio::test]
async fn disconnected_subscriber_receives_nothing() {
    let lk = Lorekeeper::new(LorekeeperConfig::default()).unwrap();
    let conn = subscriber(&lk).await;
    lk.hub().disconnect(&conn.id).await;

    lk.analyze(LoreEventPayload::with_content("impossible"))
        .await
        .unwrap();

    let report = lk
        .hub()
        .publish(Topic::Conflicts, HubMessage::error("probe"))
        .await;
    assert_eq!(report.delivered, 0);
    assert_eq!(lk.hub().counters().messages_delivered, 0);
}

#[tokio::test]
async fn shutdown_waits_for_dispatch_then_closes_hub() {
    let sink = Arc::new(RecordingSink::default());
    let lk = lorekeeper_with(sink.clone(), LorekeeperConfig::default());
    lk.start_background();
    let mut conn = subscriber(&lk).await;

    lk.analyze(payload(json!({ "content": "omen", "type": "cursed_output" })))
        .await
        .unwrap();
    lk.shutdown().await;

    assert_eq!(sink.channels(), vec!["discord", "tiktok"]);
    assert!(lk.hub().is_closed());

    // Queued messages are still readable, then the stream ends.
    while let Some(message) = conn.receiver.recv().await {
        assert_ne!(message.kind(), "welcome");
    }
}
