use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::fanout::FanoutError;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PostCreated,
    Liked,
    Followed,
    Mentioned,
    Commented,
    Retweeted,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::PostCreated,
        EventType::Liked,
        EventType::Followed,
        EventType::Mentioned,
        EventType::Commented,
        EventType::Retweeted,
    ];

    pub fn from_str(event_type: &str) -> Result<Self, String> {
        match event_type.to_lowercase().as_str() {
            "post_created" => Ok(EventType::PostCreated),
            "liked" => Ok(EventType::Liked),
            "followed" => Ok(EventType::Followed),
            "mentioned" => Ok(EventType::Mentioned),
            "commented" => Ok(EventType::Commented),
            "retweeted" => Ok(EventType::Retweeted),
            _ => Err(format!("Invalid event type: {}", event_type)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PostCreated => "post_created",
            EventType::Liked => "liked",
            EventType::Followed => "followed",
            EventType::Mentioned => "mentioned",
            EventType::Commented => "commented",
            EventType::Retweeted => "retweeted",
        }
    }

    /// Heading used when grouping digest entries.
    pub fn digest_heading(&self) -> &'static str {
        match self {
            EventType::PostCreated => "New posts from people you follow",
            EventType::Liked => "Likes",
            EventType::Followed => "New followers",
            EventType::Mentioned => "Mentions",
            EventType::Commented => "Comments",
            EventType::Retweeted => "Retweets",
        }
    }

    /// Whether the event needs a target user to be meaningful.
    pub fn requires_target(&self) -> bool {
        !matches!(self, EventType::PostCreated)
    }

    /// Whether the event refers to a post or comment.
    pub fn requires_subject(&self) -> bool {
        !matches!(self, EventType::Followed)
    }
}

/// Domain event, immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: EventType,
    pub actor_id: Uuid,
    pub target_id: Option<Uuid>,
    pub subject_entity_id: Option<i64>,
    pub hashtags: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Same event as `other`, ignoring when it was submitted.
    pub fn same_as(&self, other: &Event) -> bool {
        let mut tags = self.hashtags.clone();
        let mut other_tags = other.hashtags.clone();
        tags.sort();
        other_tags.sort();

        self.id == other.id
            && self.event_type == other.event_type
            && self.actor_id == other.actor_id
            && self.target_id == other.target_id
            && self.subject_entity_id == other.subject_entity_id
            && tags == other_tags
    }
}

/// Body of `POST /api/events`. The actor is always the authenticated user.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct SubmitEventRequest {
    /// Producer supplied id; re-submitting the same event under this id is a no-op,
    /// re-using it for a different event is rejected
    #[schema(value_type = Option<UuidWrapper>)]
    pub id: Option<Uuid>,
    #[schema(example = "post_created")]
    pub event_type: EventType,
    #[schema(value_type = Option<UuidWrapper>)]
    pub target_id: Option<Uuid>,
    #[schema(example = "42")]
    pub subject_entity_id: Option<i64>,
    /// Post text; hashtags are extracted from it
    #[schema(example = "Shipping today #launch")]
    pub content: Option<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[schema(value_type = Option<DateTimeWrapper>)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitEventResponse {
    #[schema(value_type = UuidWrapper)]
    pub event_id: Uuid,
    pub accepted: bool,
    pub notifications_created: usize,
    pub duplicates_suppressed: usize,
    /// Earlier records that had never been routed and were queued again
    pub notifications_requeued: usize,
    pub skipped_disabled: usize,
    pub skipped_missing: usize,
    pub hashtags: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// The event id is already taken by a different event.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Social graph unavailable: {0}")]
    GraphUnavailable(String),
}

impl From<FanoutError> for EventError {
    fn from(err: FanoutError) -> Self {
        match err {
            FanoutError::Store(e) => EventError::Store(e),
            FanoutError::Graph(e) => EventError::GraphUnavailable(e.to_string()),
        }
    }
}
