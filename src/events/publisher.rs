use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::constants::system::DEFAULT_EVENT_CHANNEL_CAPACITY;

/// Fan-out of engine events (assignment transitions, notification decisions, formation
/// lifecycle) to in-process observers. Events are dropped when nobody listens.
///
/// ```rust
/// use formation_engine::events::EventPublisher;
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let publisher = EventPublisher::new(16);
/// let mut events = publisher.subscribe();
/// publisher.publish("assignment.transitioned", json!({"to": "READY"})).await.unwrap();
///
/// let event = events.recv().await.unwrap();
/// assert_eq!(event.sequence, 1);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
    sequence: Arc<AtomicU64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedEvent {
    /// Monotonic per publisher, starting at 1
    pub sequence: u64,
    pub name: String,
    /// Taken from the context's `formation_id` when present
    pub formation_id: Option<Uuid>,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl PublishedEvent {
    pub fn concerns(&self, formation_id: Uuid) -> bool {
        self.formation_id == Some(formation_id)
    }
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn publish(
        &self,
        event_name: impl Into<String>,
        context: Value,
    ) -> Result<(), PublishError> {
        let formation_id = match context.get("formation_id") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                Uuid::deserialize(value)
                    .map_err(|e| PublishError::InvalidContext(e.to_string()))?,
            ),
        };
        let event = PublishedEvent {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            name: event_name.into(),
            formation_id,
            context,
            published_at: chrono::Utc::now(),
        };

        // send() only fails when nobody is subscribed
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            trace!(event = %event.name, sequence = event.sequence, "No event subscribers");
        }
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CHANNEL_CAPACITY)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Event context is malformed: {0}")]
    InvalidContext(String),
}
