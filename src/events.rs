//! Notifications published by the orchestrator
//!
//! Phase transitions, map warnings and team lifecycle changes are published
//! fire-and-forget through a [`NotificationSink`]. Publishing never fails from
//! the caller's point of view: a sink that cannot deliver logs and drops.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default notification channel capacity
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1000;

/// What a notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Phase changed (automatic or manual)
    PhaseTransition,
    /// A document crossed the too-long threshold
    MapThreshold,
    /// Project map regenerated
    MapUpdated,
    TeamStarted,
    TeamStopped,
    /// An agent cycle failed
    AgentError,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PhaseTransition => write!(f, "phase_transition"),
            Self::MapThreshold => write!(f, "map_threshold"),
            Self::MapUpdated => write!(f, "map_updated"),
            Self::TeamStarted => write!(f, "team_started"),
            Self::TeamStopped => write!(f, "team_stopped"),
            Self::AgentError => write!(f, "agent_error"),
        }
    }
}

/// A published notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    /// Create a notification stamped now
    pub fn new(kind: NotificationKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Destination for notifications
pub trait NotificationSink: Send + Sync {
    /// Publish without blocking; must not fail the caller
    fn publish(&self, notification: Notification);
}

/// Sink backed by a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Notification>,
    capacity: usize,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Get a notification subscriber
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CHANNEL_CAPACITY)
    }
}

impl NotificationSink for BroadcastSink {
    fn publish(&self, notification: Notification) {
        let kind = notification.kind;
        match self.tx.send(notification) {
            Ok(_) => {
                // Warn if getting close to capacity (80% threshold)
                let len = self.tx.len();
                if len > self.capacity * 80 / 100 {
                    tracing::warn!(
                        current = len,
                        capacity = self.capacity,
                        threshold_pct = 80,
                        "Notification channel nearing capacity"
                    );
                }
            }
            Err(_) => {
                tracing::debug!(kind = %kind, "Notification published with no subscribers");
            }
        }
    }
}

/// Sink that writes notifications to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn publish(&self, notification: Notification) {
        tracing::info!(
            kind = %notification.kind,
            payload = %notification.payload,
            "Notification"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscriber() {
        let sink = BroadcastSink::new(16);
        let mut rx = sink.subscribe();

        sink.publish(Notification::new(
            NotificationKind::MapUpdated,
            json!({"total_tokens": 42}),
        ));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, NotificationKind::MapUpdated);
        assert_eq!(received.payload["total_tokens"], 42);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let sink = BroadcastSink::default();
        // Must not panic or error
        sink.publish(Notification::new(NotificationKind::TeamStopped, json!({})));
        LogSink.publish(Notification::new(NotificationKind::TeamStopped, json!({})));
    }

    #[test]
    fn test_kind_serialization() {
        let n = Notification::new(NotificationKind::PhaseTransition, json!({"to": "convergence"}));
        let text = serde_json::to_string(&n).unwrap();
        assert!(text.contains("\"type\":\"phase_transition\""));
        assert_eq!(NotificationKind::MapThreshold.to_string(), "map_threshold");
    }
}
