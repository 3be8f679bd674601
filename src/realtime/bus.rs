use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream, StreamExt};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::redis::RedisPool;

pub const EVENTS_CHANNEL: &str = "deployform:events";

/// Change notifications fanned out to every connected client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RealtimeEvent {
    PresenceChanged {
        room: String,
    },
    FormChanged {
        key: String,
        value: Value,
        updated_at: DateTime<Utc>,
    },
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: &RealtimeEvent) -> Result<()>;

    /// Events published after this call returns. The stream ends when the
    /// underlying connection goes away.
    async fn subscribe(&self) -> Result<BoxStream<'static, RealtimeEvent>>;
}

pub struct RedisEventBus {
    pool: RedisPool,
    client: redis::Client,
}

impl RedisEventBus {
    pub fn new(pool: RedisPool, client: redis::Client) -> Self {
        Self { pool, client }
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, event: &RealtimeEvent) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let serialized = serde_json::to_string(event)?;
        let subscriber_count: usize = conn.publish(EVENTS_CHANNEL, serialized).await?;
        debug!("Published {:?} to {} subscribers", event, subscriber_count);
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, RealtimeEvent>> {
        // Pub/Sub needs its own connection, pooled ones can't be used
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(EVENTS_CHANNEL).await?;

        let events = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    error!("Failed to read Redis message payload: {}", e);
                    return None;
                }
            };
            match serde_json::from_str::<RealtimeEvent>(&payload) {
                Ok(event) => Some(event),
                Err(e) => {
                    error!("Failed to deserialize realtime event: {}", e);
                    None
                }
            }
        });
        Ok(events.boxed())
    }
}

/// Single-process bus on a tokio broadcast channel.
#[derive(Clone)]
pub struct MemoryEventBus {
    sender: broadcast::Sender<RealtimeEvent>,
}

impl MemoryEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: &RealtimeEvent) -> Result<()> {
        // No receivers is not an error, it just means nobody is connected.
        let _ = self.sender.send(event.clone());
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, RealtimeEvent>> {
        let receiver = self.sender.subscribe();
        let events = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Realtime subscriber lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(events.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscriber_receives_published_events() {
        let bus = MemoryEventBus::default();
        let mut events = bus.subscribe().await.unwrap();

        let event = RealtimeEvent::PresenceChanged {
            room: "deploy".to_string(),
        };
        bus.publish(&event).await.unwrap();

        assert_eq!(events.next().await, Some(event));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = MemoryEventBus::default();
        let event = RealtimeEvent::FormChanged {
            key: "version".to_string(),
            value: json!("1.2.0"),
            updated_at: Utc::now(),
        };
        assert!(bus.publish(&event).await.is_ok());
    }

    #[test]
    fn test_event_wire_format() {
        let event = RealtimeEvent::PresenceChanged {
            room: "deploy".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "event": "presence_changed", "room": "deploy" })
        );
    }
}
