//! Background timers: retention sweep and status broadcast
//!
//! Both loops skip the immediate first tick and exit when the shared
//! cancellation token fires.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::history::SharedHistoryStore;
use crate::hub::{HubMessage, SharedHub, StatusSnapshot, Topic};

/// Current system snapshot.
pub async fn status_snapshot(
    store: &SharedHistoryStore,
    hub: &SharedHub,
    started: Instant,
) -> StatusSnapshot {
    StatusSnapshot {
        active_connections: hub.connection_count().await,
        total_conflicts: store.total_conflicts(),
        events_processed: store.events_processed(),
        uptime_seconds: started.elapsed().as_secs(),
        timestamp: Utc::now(),
    }
}

/// Periodically trim the store to its retention caps.
pub fn spawn_retention_sweeper(
    store: SharedHistoryStore,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = store.trim();
                    if report.is_empty() {
                        debug!("Retention sweep: nothing to trim");
                    } else {
                        info!(
                            records_dropped = report.records_dropped,
                            intake_dropped = report.intake_dropped,
                            retained = store.len(),
                            "Retention sweep"
                        );
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("Retention sweeper shutdown");
                    break;
                }
            }
        }
    })
}

/// Periodically publish a `system_status` snapshot.
pub fn spawn_status_ticker(
    store: SharedHistoryStore,
    hub: SharedHub,
    started: Instant,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = status_snapshot(&store, &hub, started).await;
                    let report = hub
                        .publish(Topic::SystemStatus, HubMessage::SystemStatus(snapshot))
                        .await;
                    debug!(delivered = report.delivered, "Status broadcast");
                }
                _ = cancel.cancelled() => {
                    debug!("Status ticker shutdown");
                    break;
                }
            }
        }
    })
}
