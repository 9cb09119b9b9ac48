use async_trait::async_trait;
use futures::StreamExt;
use redis::{AsyncCommands, Client, RedisError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::delivery::model::{DeliveryError, NotificationMessage};
use crate::delivery::router::RealtimePublisher;
use crate::websocket::registry::ConnectionRegistry;

const UNREAD_COUNT_PREFIX: &str = "notifications:unread";
const USER_CHANNEL_PREFIX: &str = "notifications:user:";
const UNREAD_COUNT_TTL_SECONDS: u64 = 300; // 5 minutes

pub fn user_channel(user_id: Uuid) -> String {
    format!("{}{}", USER_CHANNEL_PREFIX, user_id)
}

/// Parses the recipient out of a `notifications:user:{id}` channel name.
pub fn recipient_from_channel(channel: &str) -> Option<Uuid> {
    channel
        .strip_prefix(USER_CHANNEL_PREFIX)
        .and_then(|id| Uuid::parse_str(id).ok())
}

#[derive(Debug, Clone)]
pub struct RedisCache {
    client: Client,
}

impl RedisCache {
    pub fn new(client: Client) -> Self {
        // Connection validation happens on first use
        Self { client }
    }

    pub fn get_client(&self) -> &Client {
        &self.client
    }

    pub async fn get_unread_count(&self, user_id: Uuid) -> Result<Option<i64>, RedisError> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let key = format!("{}:{}", UNREAD_COUNT_PREFIX, user_id);
        let result: Option<i64> = connection.get(key).await?;

        if result.is_some() {
            debug!("Cache hit for unread count of {}", user_id);
        }
        Ok(result)
    }

    pub async fn cache_unread_count(&self, user_id: Uuid, count: i64) -> Result<(), RedisError> {
        let key = format!("{}:{}", UNREAD_COUNT_PREFIX, user_id);
        self.client
            .get_multiplexed_async_connection()
            .await?
            .set_ex(key, count, UNREAD_COUNT_TTL_SECONDS)
            .await
            .map(|_: ()| ())
    }

    pub async fn invalidate_unread_counts(&self, user_ids: &[Uuid]) -> Result<(), RedisError> {
        if user_ids.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = user_ids
            .iter()
            .map(|id| format!("{}:{}", UNREAD_COUNT_PREFIX, id))
            .collect();
        self.client
            .get_multiplexed_async_connection()
            .await?
            .del(keys)
            .await
            .map(|_: ()| ())
    }

    /// Publishes to the recipient's channel; returns the number of subscribed instances.
    pub async fn publish_notification(
        &self,
        recipient_id: Uuid,
        message: &NotificationMessage,
    ) -> Result<usize, RedisError> {
        let payload = serde_json::to_string(message).map_err(|e| {
            RedisError::from((
                redis::ErrorKind::TypeError,
                "notification serialization failed",
                e.to_string(),
            ))
        })?;
        let receivers: usize = self
            .client
            .get_multiplexed_async_connection()
            .await?
            .publish(user_channel(recipient_id), payload)
            .await?;
        Ok(receivers)
    }
}

#[async_trait]
impl RealtimePublisher for RedisCache {
    async fn publish(
        &self,
        recipient_id: Uuid,
        message: &NotificationMessage,
    ) -> Result<usize, DeliveryError> {
        self.publish_notification(recipient_id, message)
            .await
            .map_err(|e| DeliveryError::ChannelUnreachable(e.to_string()))
    }
}

/// Forwards every `notifications:user:*` message into this instance's local sockets.
/// Reconnects after a pause when the subscription drops.
pub fn spawn_relay(cache: Arc<RedisCache>, registry: Arc<ConnectionRegistry>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = relay_once(&cache, &registry).await {
                error!("Redis notification relay failed: {}", e);
            } else {
                warn!("Redis notification relay stream ended");
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    })
}

async fn relay_once(cache: &RedisCache, registry: &ConnectionRegistry) -> Result<(), RedisError> {
    let mut pubsub = cache.get_client().get_async_pubsub().await?;
    let pattern = format!("{}*", USER_CHANNEL_PREFIX);
    pubsub.psubscribe(&pattern).await?;
    info!("Subscribed to Redis pattern: {}", pattern);

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let Some(recipient_id) = recipient_from_channel(msg.get_channel_name()) else {
            warn!("Ignoring message on unexpected channel {}", msg.get_channel_name());
            continue;
        };
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to read Redis payload: {}", e);
                continue;
            }
        };
        match serde_json::from_str::<NotificationMessage>(&payload) {
            Ok(message) => {
                let reached = registry.deliver_local(recipient_id, &message);
                debug!("Relayed notification to {} local socket(s)", reached);
            }
            Err(e) => error!("Failed to parse relayed notification: {}", e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name_round_trip() {
        let user = Uuid::new_v4();
        let channel = user_channel(user);
        assert!(channel.starts_with("notifications:user:"));
        assert_eq!(recipient_from_channel(&channel), Some(user));
        assert_eq!(recipient_from_channel("notifications:user:nope"), None);
        assert_eq!(recipient_from_channel("other:channel"), None);
    }
}
