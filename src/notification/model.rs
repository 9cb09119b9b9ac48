use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::event::model::EventType;
use crate::store::StoreError;

/// Delivery channel a notification can go out on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Realtime,
    WebPush,
    Digest,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Realtime, Channel::WebPush, Channel::Digest];

    pub fn from_str(channel: &str) -> Result<Self, String> {
        match channel.to_lowercase().as_str() {
            "realtime" => Ok(Channel::Realtime),
            "web_push" | "webpush" | "push" => Ok(Channel::WebPush),
            "digest" => Ok(Channel::Digest),
            _ => Err(format!("Invalid channel: {}", channel)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Realtime => "realtime",
            Channel::WebPush => "web_push",
            Channel::Digest => "digest",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Channel::Realtime => 0b001,
            Channel::WebPush => 0b010,
            Channel::Digest => 0b100,
        }
    }
}

/// Small bit set of channels. Serialized as a list of channel names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChannelSet(u8);

impl ChannelSet {
    pub const EMPTY: ChannelSet = ChannelSet(0);
    pub const ALL: ChannelSet = ChannelSet(0b111);

    pub fn from_bits(bits: i16) -> Self {
        ChannelSet((bits as u8) & Self::ALL.0)
    }

    pub fn bits(&self) -> i16 {
        self.0 as i16
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.0 & channel.bit() != 0
    }

    pub fn insert(&mut self, channel: Channel) {
        self.0 |= channel.bit();
    }

    pub fn remove(&mut self, channel: Channel) {
        self.0 &= !channel.bit();
    }

    pub fn intersection(&self, other: ChannelSet) -> ChannelSet {
        ChannelSet(self.0 & other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Channel> + '_ {
        Channel::ALL.into_iter().filter(|c| self.contains(*c))
    }
}

impl FromIterator<Channel> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = Channel>>(iter: I) -> Self {
        let mut set = ChannelSet::EMPTY;
        for channel in iter {
            set.insert(channel);
        }
        set
    }
}

impl Serialize for ChannelSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for ChannelSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let channels = Vec::<Channel>::deserialize(deserializer)?;
        Ok(channels.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReadState {
    Unread,
    Read,
}

impl ReadState {
    pub fn from_str(state: &str) -> Result<Self, String> {
        match state.to_lowercase().as_str() {
            "unread" => Ok(ReadState::Unread),
            "read" => Ok(ReadState::Read),
            _ => Err(format!("Invalid read state: {}", state)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadState::Unread => "unread",
            ReadState::Read => "read",
        }
    }
}

/// One recipient's copy of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NotificationRecord {
    pub id: i64,
    #[schema(value_type = UuidWrapper)]
    pub event_id: Uuid,
    #[schema(value_type = UuidWrapper)]
    pub recipient_id: Uuid,
    pub event_type: EventType,
    #[schema(value_type = UuidWrapper)]
    pub actor_id: Uuid,
    pub subject_entity_id: Option<i64>,
    /// Channels selected at fan-out time.
    #[schema(value_type = Vec<Channel>)]
    pub channel_set: ChannelSet,
    /// Channels the delivery router actually attempted.
    #[schema(value_type = Vec<Channel>)]
    pub attempted_channels: ChannelSet,
    pub read_state: ReadState,
    #[schema(value_type = DateTimeWrapper)]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = Option<DateTimeWrapper>)]
    pub read_at: Option<DateTime<Utc>>,
    #[schema(value_type = Option<DateTimeWrapper>)]
    pub archived_at: Option<DateTime<Utc>>,
}

/// Insert payload produced by the fan-out engine.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub event_id: Uuid,
    pub recipient_id: Uuid,
    pub event_type: EventType,
    pub actor_id: Uuid,
    pub subject_entity_id: Option<i64>,
    pub channel_set: ChannelSet,
    pub created_at: DateTime<Utc>,
}

/// Filter for listing notifications.
#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    pub read_state: Option<ReadState>,
    pub event_type: Option<EventType>,
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct NotificationQueryParams {
    /// Page number, starting at 1
    #[schema(example = "1")]
    pub page: Option<i64>,
    /// Page size (max 100)
    #[schema(example = "20")]
    pub limit: Option<i64>,
    /// `read` or `unread`
    pub read_state: Option<String>,
    /// Event type filter, e.g. `liked`
    #[serde(rename = "type")]
    pub event_type: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationListResponse {
    pub notifications: Vec<NotificationRecord>,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub has_next: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UnreadCountResponse {
    pub unread_count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MarkAllReadResponse {
    pub updated: u64,
}

/// Result of the retention sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct CleanupReport {
    pub read_deleted: u64,
    pub unread_deleted: u64,
    pub batches_deleted: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cache error: {0}")]
    CacheError(#[from] redis::RedisError),

    #[error("Notification not found")]
    NotFound,

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_set_serializes_as_names() {
        let set: ChannelSet = [Channel::Digest, Channel::Realtime].into_iter().collect();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["realtime","digest"]"#);

        let parsed: ChannelSet = serde_json::from_str(r#"["web_push"]"#).unwrap();
        assert!(parsed.contains(Channel::WebPush));
        assert!(!parsed.contains(Channel::Realtime));
    }

    #[test]
    fn test_channel_set_intersection_and_bits() {
        let enabled: ChannelSet = [Channel::Realtime, Channel::WebPush].into_iter().collect();
        let available: ChannelSet = [Channel::WebPush, Channel::Digest].into_iter().collect();
        let both = enabled.intersection(available);
        assert_eq!(both.iter().collect::<Vec<_>>(), vec![Channel::WebPush]);
        assert_eq!(ChannelSet::from_bits(both.bits()), both);
        assert!(ChannelSet::EMPTY.is_empty());
    }

    #[test]
    fn test_channel_and_read_state_parsing() {
        assert_eq!(Channel::from_str("PUSH").unwrap(), Channel::WebPush);
        assert!(Channel::from_str("sms").is_err());
        assert_eq!(ReadState::from_str("Unread").unwrap(), ReadState::Unread);
        assert!(ReadState::from_str("maybe").is_err());
    }
}
