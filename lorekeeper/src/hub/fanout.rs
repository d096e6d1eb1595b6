//! Fan-out hub: connections, topic subscriptions, non-blocking delivery
//!
//! Each connection owns a bounded queue. Publishing never waits on a
//! subscriber: a full queue drops the message for that subscriber only,
//! and a closed queue marks the connection for removal.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::{parse_topics, ClientMessage, HubMessage, Topic};
use crate::config::HubConfig;
use crate::history::HistoryStore;

/// Connection identifier (uuid v4)
pub type ConnectionId = String;

/// Shared reference to Hub
pub type SharedHub = Arc<Hub>;

/// Error type for hub operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HubError {
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// The subscriber is live but its queue is full; the message was dropped.
    #[error("Subscriber queue full: {0}")]
    QueueFull(ConnectionId),

    #[error("Hub is closed")]
    Closed,
}

/// Result type for hub operations
pub type HubResult<T> = Result<T, HubError>;

/// Per-connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// Terminal
    Disconnected,
}

/// Subscriber side of a connection
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub receiver: mpsc::Receiver<HubMessage>,
}

/// Delivery counts for one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Debug)]
struct Subscriber {
    topics: BTreeSet<Topic>,
    sender: mpsc::Sender<HubMessage>,
    state: ConnectionState,
    connected_at: DateTime<Utc>,
}

/// Cumulative hub counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubCounters {
    pub connections_opened: u64,
    pub messages_delivered: u64,
    pub messages_dropped: u64,
}

/// Topic-based fan-out to live subscribers
#[derive(Debug)]
pub struct Hub {
    subscribers: RwLock<HashMap<ConnectionId, Subscriber>>,
    config: HubConfig,
    closed: AtomicBool,
    connections_opened: AtomicU64,
    messages_delivered: AtomicU64,
    messages_dropped: AtomicU64,
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            config,
            closed: AtomicBool::new(false),
            connections_opened: AtomicU64::new(0),
            messages_delivered: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    /// Create a shared reference to this hub
    pub fn shared(self) -> SharedHub {
        Arc::new(self)
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Register a connection and queue its welcome message.
    pub async fn connect(&self, conflicts_in_history: usize) -> HubResult<Connection> {
        if self.is_closed() {
            return Err(HubError::Closed);
        }
        let id = Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::channel(self.config.subscriber_queue.max(1));

        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(
            id.clone(),
            Subscriber {
                topics: BTreeSet::new(),
                sender,
                state: ConnectionState::Connecting,
                connected_at: Utc::now(),
            },
        );

        let Some(subscriber) = subscribers.get_mut(&id) else {
            return Err(HubError::UnknownConnection(id));
        };
        let welcome = HubMessage::Welcome {
            client_id: id.clone(),
            conflicts_in_history,
        };
        // Fresh queue with capacity >= 1; the welcome always fits.
        let _ = subscriber.sender.try_send(welcome);
        subscriber.topics = self.config.default_topics.iter().copied().collect();
        subscriber.state = ConnectionState::Connected;
        drop(subscribers);

        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        info!(client_id = %id, "Subscriber connected");
        Ok(Connection { id, receiver })
    }

    /// Add topics to a connection; returns the topics now subscribed.
    pub async fn subscribe(&self, id: &str, topics: &BTreeSet<Topic>) -> HubResult<BTreeSet<Topic>> {
        let mut subscribers = self.subscribers.write().await;
        let subscriber = live_mut(&mut subscribers, id)?;
        subscriber.topics.extend(topics.iter().copied());
        debug!(client_id = id, ?topics, "Subscribed");
        Ok(subscriber.topics.clone())
    }

    pub async fn unsubscribe(&self, id: &str, topic: Topic) -> HubResult<()> {
        let mut subscribers = self.subscribers.write().await;
        let subscriber = live_mut(&mut subscribers, id)?;
        subscriber.topics.remove(&topic);
        debug!(client_id = id, %topic, "Unsubscribed");
        Ok(())
    }

    /// Topics a connection is subscribed to.
    pub async fn topics(&self, id: &str) -> HubResult<BTreeSet<Topic>> {
        let subscribers = self.subscribers.read().await;
        subscribers
            .get(id)
            .map(|s| s.topics.clone())
            .ok_or_else(|| HubError::UnknownConnection(id.to_string()))
    }

    pub async fn state(&self, id: &str) -> ConnectionState {
        let subscribers = self.subscribers.read().await;
        subscribers
            .get(id)
            .map(|s| s.state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Deliver to every connected subscriber of `topic` without blocking.
    pub async fn publish(&self, topic: Topic, message: HubMessage) -> PublishReport {
        let mut report = PublishReport::default();
        let mut stale = Vec::new();

        {
            let subscribers = self.subscribers.read().await;
            for (id, subscriber) in subscribers.iter() {
                if subscriber.state != ConnectionState::Connected
                    || !subscriber.topics.contains(&topic)
                {
                    continue;
                }
                match subscriber.sender.try_send(message.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(client_id = %id, %topic, "Subscriber queue full; message dropped");
                        report.dropped += 1;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        report.dropped += 1;
                        stale.push(id.clone());
                    }
                }
            }
        }

        for id in stale {
            self.disconnect(&id).await;
        }

        self.messages_delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.messages_dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        debug!(
            %topic,
            kind = message.kind(),
            delivered = report.delivered,
            dropped = report.dropped,
            "Published"
        );
        report
    }

    /// Direct reply to one connection.
    pub async fn send_to(&self, id: &str, message: HubMessage) -> HubResult<()> {
        let subscribers = self.subscribers.read().await;
        let subscriber = subscribers
            .get(id)
            .filter(|s| s.state == ConnectionState::Connected)
            .ok_or_else(|| HubError::UnknownConnection(id.to_string()))?;
        subscriber.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                warn!(client_id = id, "Reply dropped; queue full");
                self.messages_dropped.fetch_add(1, Ordering::Relaxed);
                HubError::QueueFull(id.to_string())
            }
            mpsc::error::TrySendError::Closed(_) => HubError::UnknownConnection(id.to_string()),
        })?;
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Terminal: remove from every topic; later publishes skip it.
    pub async fn disconnect(&self, id: &str) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(mut subscriber) = subscribers.remove(id) {
            subscriber.state = ConnectionState::Disconnected;
            subscriber.topics.clear();
            let lifetime = Utc::now() - subscriber.connected_at;
            info!(
                client_id = id,
                connected_secs = lifetime.num_seconds(),
                "Subscriber disconnected"
            );
        }
    }

    /// Like [`Hub::send_to`], but a full queue only drops this reply.
    async fn reply(&self, id: &str, message: HubMessage) -> HubResult<()> {
        match self.send_to(id, message).await {
            Err(HubError::QueueFull(_)) => Ok(()),
            other => other,
        }
    }

    /// Apply one subscriber protocol message.
    pub async fn handle_client_message(
        &self,
        id: &str,
        message: ClientMessage,
        store: &HistoryStore,
    ) -> HubResult<()> {
        match message {
            ClientMessage::Subscribe(names) => {
                let (topics, unknown) = parse_topics(&names);
                if !unknown.is_empty() {
                    self.reply(id, HubMessage::error(format!("Unknown topics: {}", unknown.join(", "))))
                        .await?;
                }
                self.subscribe(id, &topics).await?;
                self.reply(
                    id,
                    HubMessage::Subscribed {
                        subscribed: topics.into_iter().collect(),
                    },
                )
                .await
            }
            ClientMessage::Unsubscribe(name) => {
                let topic = name.parse::<Topic>().map_err(HubError::UnknownTopic)?;
                self.unsubscribe(id, topic).await?;
                self.reply(id, HubMessage::Unsubscribed { unsubscribed: topic })
                    .await
            }
            ClientMessage::GetConflicts(query) => {
                let cap = self.config.history_query_limit;
                let limit = query.and_then(|q| q.limit).unwrap_or(cap).min(cap);
                let conflicts = store.recent(limit);
                let total = store.len();
                self.reply(id, HubMessage::Conflicts { conflicts, total })
                    .await
            }
            ClientMessage::Ping => {
                self.reply(
                    id,
                    HubMessage::Pong {
                        timestamp: Utc::now(),
                    },
                )
                .await
            }
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub fn counters(&self) -> HubCounters {
        HubCounters {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
        }
    }

    /// Refuse new connections and drop every existing one.
    pub async fn close_all(&self) {
        self.closed.store(true, Ordering::Release);
        let mut subscribers = self.subscribers.write().await;
        let count = subscribers.len();
        subscribers.clear();
        info!(count, "Hub closed all subscriber connections");
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

fn live_mut<'a>(
    subscribers: &'a mut HashMap<ConnectionId, Subscriber>,
    id: &str,
) -> HubResult<&'a mut Subscriber> {
    subscribers
        .get_mut(id)
        .filter(|s| s.state == ConnectionState::Connected)
        .ok_or_else(|| HubError::UnknownConnection(id.to_string()))
}
