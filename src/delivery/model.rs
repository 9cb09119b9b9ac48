use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::event::model::EventType;
use crate::notification::model::NotificationRecord;

/// Browser push subscription (WebPush endpoint plus its keys).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub id: i64,
    pub user_id: Uuid,
    pub endpoint: String,
    pub p256dh_key: String,
    pub auth_key: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct SubscribePushRequest {
    #[schema(example = "https://push.example.com/send/abc")]
    pub endpoint: String,
    pub keys: PushKeys,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct UnsubscribePushRequest {
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PushSubscriptionResponse {
    pub success: bool,
    pub message: String,
}

/// Payload sent to a push endpoint and over the real-time socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub notification_id: i64,
    pub event_type: EventType,
    pub actor_id: Uuid,
    pub subject_entity_id: Option<i64>,
    pub title: String,
    pub body: String,
    pub action_url: String,
    pub created_at: DateTime<Utc>,
}

impl NotificationMessage {
    pub fn from_record(record: &NotificationRecord) -> Self {
        let (title, body) = match record.event_type {
            EventType::PostCreated => ("New post", "Someone you follow just posted"),
            EventType::Liked => ("New like", "Someone liked your post"),
            EventType::Followed => ("New follower", "Someone started following you"),
            EventType::Mentioned => ("You were mentioned", "Someone mentioned you in a post"),
            EventType::Commented => ("New comment", "Someone commented on your post"),
            EventType::Retweeted => ("New retweet", "Someone retweeted your post"),
        };

        let action_url = match (record.event_type, record.subject_entity_id) {
            (EventType::Followed, _) => format!("/profile/{}/", record.actor_id),
            (_, Some(subject)) => format!("/posts/{}/", subject),
            (_, None) => "/".to_string(),
        };

        Self {
            kind: "notification".to_string(),
            notification_id: record.id,
            event_type: record.event_type,
            actor_id: record.actor_id,
            subject_entity_id: record.subject_entity_id,
            title: title.to_string(),
            body: body.to_string(),
            action_url,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushJobState {
    Queued,
    Delivered,
    NoSubscriptions,
    Failed,
}

impl PushJobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushJobState::Queued => "queued",
            PushJobState::Delivered => "delivered",
            PushJobState::NoSubscriptions => "no_subscriptions",
            PushJobState::Failed => "failed",
        }
    }

    pub fn from_str(state: &str) -> Result<Self, String> {
        match state {
            "queued" => Ok(PushJobState::Queued),
            "delivered" => Ok(PushJobState::Delivered),
            "no_subscriptions" => Ok(PushJobState::NoSubscriptions),
            "failed" => Ok(PushJobState::Failed),
            _ => Err(format!("Invalid push job state: {}", state)),
        }
    }
}

/// Persisted outcome of a push job, one per notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushJobStatus {
    pub notification_id: i64,
    pub state: PushJobState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum PushError {
    /// Endpoint no longer exists; the subscription is deactivated.
    #[error("Push endpoint gone")]
    Gone,

    #[error("Push endpoint unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Channel unreachable: {0}")]
    ChannelUnreachable(String),

    #[error("Delivery gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),
}
