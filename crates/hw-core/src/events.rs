//! Side-channel notifications.
//!
//! Long-running bulk work emits progress so clients do not mistake it for a
//! hung request, and the correlation engine announces bundles and disabled
//! rules. Emission is best-effort: a failed emit never aborts the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

/// Errors that can occur when emitting events.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventBusError {
    #[error("Failed to send event: {0}")]
    SendError(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Events emitted by the triage core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriageEvent {
    /// A bulk transition has processed `processed` of `total` hits.
    Progress {
        transition: String,
        processed: usize,
        total: usize,
    },

    /// A bulk transition finished.
    HitsTransitioned {
        transition: String,
        succeeded: usize,
        failed: usize,
    },

    /// Hits were ingested.
    HitsCreated { count: usize },

    /// A correlation run created or extended a bundle.
    BundleUpdated {
        bundle_id: String,
        analytic: String,
        size: usize,
        created: bool,
    },

    /// A correlation rule failed and was removed from the schedule.
    RuleDisabled {
        analytic_id: String,
        analytic: String,
        error: String,
    },
}

impl TriageEvent {
    /// Event name used on the notification channel.
    pub fn name(&self) -> &'static str {
        match self {
            TriageEvent::Progress { .. } => "hits:progress",
            TriageEvent::HitsTransitioned { .. } => "hits:transitioned",
            TriageEvent::HitsCreated { .. } => "hits:created",
            TriageEvent::BundleUpdated { .. } => "bundles:updated",
            TriageEvent::RuleDisabled { .. } => "rules:disabled",
        }
    }

    /// JSON payload of the event.
    pub fn payload(&self) -> Result<serde_json::Value, EventBusError> {
        serde_json::to_value(self).map_err(|e| EventBusError::SerializationError(e.to_string()))
    }
}

/// Receiver of triage notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Emits one event.
    async fn emit(&self, event: TriageEvent) -> Result<(), EventBusError>;
}

/// Emits an event, logging instead of failing.
pub async fn emit_best_effort(notifier: &dyn Notifier, event: TriageEvent) {
    let name = event.name();
    if let Err(e) = notifier.emit(event).await {
        warn!(event = name, error = %e, "Failed to emit event");
    }
}

/// In-process notifier backed by a broadcast channel with a bounded history.
pub struct EventBus {
    broadcast_tx: broadcast::Sender<TriageEvent>,
    history_size: usize,
    history: Arc<RwLock<Vec<TriageEvent>>>,
    published: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus {
    /// Creates a new event bus with the specified broadcast capacity.
    pub fn new(capacity: usize) -> Self {
        Self::with_history_size(capacity, 1000)
    }

    /// Creates a new event bus with custom history size.
    pub fn with_history_size(capacity: usize, history_size: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            broadcast_tx,
            history_size,
            history: Arc::new(RwLock::new(Vec::with_capacity(history_size))),
            published: AtomicU64::new(0),
        }
    }

    /// Subscribes to all events.
    pub fn subscribe(&self) -> broadcast::Receiver<TriageEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Returns recent events, oldest first.
    pub async fn history(&self) -> Vec<TriageEvent> {
        self.history.read().await.clone()
    }

    /// Number of events published since creation.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Notifier for EventBus {
    async fn emit(&self, event: TriageEvent) -> Result<(), EventBusError> {
        {
            let mut history = self.history.write().await;
            if self.history_size > 0 {
                if history.len() >= self.history_size {
                    history.remove(0);
                }
                history.push(event.clone());
            }
        }
        self.published.fetch_add(1, Ordering::Relaxed);

        // No subscribers is not a failure
        if self.broadcast_tx.send(event).is_err() {
            debug!("Event published with no active subscribers");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn emit(&self, _event: TriageEvent) -> Result<(), EventBusError> {
            Err(EventBusError::ChannelClosed)
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.emit(TriageEvent::HitsCreated { count: 3 }).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), TriageEvent::HitsCreated { count: 3 });
        assert_eq!(bus.published_count(), 1);
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_succeeds() {
        let bus = EventBus::with_history_size(4, 2);
        for count in 0..3 {
            bus.emit(TriageEvent::HitsCreated { count }).await.unwrap();
        }
        let history = bus.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], TriageEvent::HitsCreated { count: 1 });
    }

    #[tokio::test]
    async fn test_best_effort_swallows_errors() {
        emit_best_effort(
            &FailingNotifier,
            TriageEvent::Progress {
                transition: "assess".into(),
                processed: 25,
                total: 100,
            },
        )
        .await;
    }

    #[test]
    fn test_payload_shape() {
        let event = TriageEvent::Progress {
            transition: "assess".into(),
            processed: 25,
            total: 100,
        };
        assert_eq!(event.name(), "hits:progress");
        assert_eq!(
            event.payload().unwrap(),
            serde_json::json!({
                "type": "progress",
                "transition": "assess",
                "processed": 25,
                "total": 100
            })
        );
    }
}
