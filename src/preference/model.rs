use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::event::model::EventType;
use crate::notification::model::{Channel, ChannelSet};
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DigestFrequency {
    None,
    Daily,
    Weekly,
    Monthly,
}

impl DigestFrequency {
    /// Frequencies that actually produce digests.
    pub const SCHEDULED: [DigestFrequency; 3] = [
        DigestFrequency::Daily,
        DigestFrequency::Weekly,
        DigestFrequency::Monthly,
    ];

    pub fn from_str(frequency: &str) -> Result<Self, String> {
        match frequency.to_lowercase().as_str() {
            "none" | "never" => Ok(DigestFrequency::None),
            "daily" => Ok(DigestFrequency::Daily),
            "weekly" => Ok(DigestFrequency::Weekly),
            "monthly" => Ok(DigestFrequency::Monthly),
            _ => Err(format!("Invalid digest frequency: {}", frequency)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DigestFrequency::None => "none",
            DigestFrequency::Daily => "daily",
            DigestFrequency::Weekly => "weekly",
            DigestFrequency::Monthly => "monthly",
        }
    }
}

/// A recipient's settings for one event type. An empty channel set disables the type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Preference {
    #[schema(value_type = UuidWrapper)]
    pub recipient_id: Uuid,
    pub event_type: EventType,
    #[schema(value_type = Vec<Channel>)]
    pub channel_enabled_set: ChannelSet,
    pub digest_frequency: DigestFrequency,
    /// UTC hour (0-23) at which quiet hours begin.
    #[serde(default)]
    #[schema(example = 22)]
    pub quiet_hours_start: Option<u32>,
    /// UTC hour (0-23) at which quiet hours end, exclusive.
    #[serde(default)]
    #[schema(example = 7)]
    pub quiet_hours_end: Option<u32>,
    #[schema(value_type = Option<DateTimeWrapper>)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Preference {
    /// Used when the recipient never saved a row for this type.
    pub fn default_for(recipient_id: Uuid, event_type: EventType) -> Self {
        Self {
            recipient_id,
            event_type,
            channel_enabled_set: ChannelSet::ALL,
            digest_frequency: DigestFrequency::Weekly,
            quiet_hours_start: None,
            quiet_hours_end: None,
            updated_at: None,
        }
    }

    pub fn quiet_hours(&self) -> Option<QuietHours> {
        match (self.quiet_hours_start, self.quiet_hours_end) {
            (Some(start_hour), Some(end_hour)) => Some(QuietHours {
                start_hour,
                end_hour,
            }),
            _ => None,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.channel_enabled_set.is_empty()
    }

    /// Channels a notification of this type should use, given what the deployment offers.
    pub fn effective_channels(&self, available: ChannelSet) -> ChannelSet {
        let mut channels = self.channel_enabled_set.intersection(available);
        if self.digest_frequency == DigestFrequency::None {
            channels.remove(Channel::Digest);
        }
        channels
    }
}

/// Daily window, in whole UTC hours, during which immediate channels stay silent.
/// A window whose start is after its end wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl QuietHours {
    pub fn validate(start_hour: u32, end_hour: u32) -> Result<Self, String> {
        if start_hour > 23 || end_hour > 23 {
            return Err("quiet hours must be between 0 and 23".to_string());
        }
        if start_hour == end_hour {
            return Err("quiet hours must start and end at different hours".to_string());
        }
        Ok(Self {
            start_hour,
            end_hour,
        })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let hour = at.hour();
        if self.start_hour <= self.end_hour {
            self.start_hour <= hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Replaces the stored settings for one event type. Omitted quiet hours clear them.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct PreferenceUpdate {
    pub event_type: EventType,
    #[schema(value_type = Vec<Channel>)]
    pub channels: ChannelSet,
    pub digest_frequency: Option<DigestFrequency>,
    #[serde(default)]
    pub quiet_hours_start: Option<u32>,
    #[serde(default)]
    pub quiet_hours_end: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct UpdatePreferencesRequest {
    pub preferences: Vec<PreferenceUpdate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PreferencesResponse {
    pub preferences: Vec<Preference>,
}

#[derive(Debug, thiserror::Error)]
pub enum PreferenceError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Push subscription not found")]
    SubscriptionNotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_enables_everything_weekly() {
        let pref = Preference::default_for(Uuid::new_v4(), EventType::Liked);
        assert_eq!(pref.channel_enabled_set, ChannelSet::ALL);
        assert_eq!(pref.digest_frequency, DigestFrequency::Weekly);
        assert!(!pref.is_disabled());
    }

    #[test]
    fn test_effective_channels_drops_digest_without_frequency() {
        let mut pref = Preference::default_for(Uuid::new_v4(), EventType::Liked);
        pref.digest_frequency = DigestFrequency::None;
        let channels = pref.effective_channels(ChannelSet::ALL);
        assert!(!channels.contains(Channel::Digest));
        assert!(channels.contains(Channel::Realtime));
    }

    #[test]
    fn test_effective_channels_respects_availability() {
        let pref = Preference::default_for(Uuid::new_v4(), EventType::Followed);
        let available: ChannelSet = [Channel::Realtime].into_iter().collect();
        assert_eq!(
            pref.effective_channels(available).iter().collect::<Vec<_>>(),
            vec![Channel::Realtime]
        );
    }

    fn at_hour(hour: u32) -> DateTime<Utc> {
        use chrono::TimeZone;
        Utc.with_ymd_and_hms(2026, 10, 19, hour, 30, 0).unwrap()
    }

    #[test]
    fn test_quiet_hours_within_one_day() {
        let quiet = QuietHours::validate(13, 15).unwrap();
        assert!(!quiet.contains(at_hour(12)));
        assert!(quiet.contains(at_hour(13)));
        assert!(quiet.contains(at_hour(14)));
        assert!(!quiet.contains(at_hour(15)));
    }

    #[test]
    fn test_quiet_hours_wrap_past_midnight() {
        let quiet = QuietHours::validate(22, 7).unwrap();
        assert!(quiet.contains(at_hour(23)));
        assert!(quiet.contains(at_hour(0)));
        assert!(quiet.contains(at_hour(6)));
        assert!(!quiet.contains(at_hour(7)));
        assert!(!quiet.contains(at_hour(21)));
    }

    #[test]
    fn test_quiet_hours_need_both_ends_and_valid_hours() {
        let mut pref = Preference::default_for(Uuid::new_v4(), EventType::Liked);
        pref.quiet_hours_start = Some(22);
        assert_eq!(pref.quiet_hours(), None);
        pref.quiet_hours_end = Some(6);
        assert_eq!(
            pref.quiet_hours(),
            Some(QuietHours {
                start_hour: 22,
                end_hour: 6
            })
        );
        assert!(QuietHours::validate(24, 6).is_err());
        assert!(QuietHours::validate(5, 5).is_err());
    }

    #[test]
    fn test_frequency_parsing_accepts_never() {
        assert_eq!(
            DigestFrequency::from_str("never").unwrap(),
            DigestFrequency::None
        );
        assert!(DigestFrequency::from_str("hourly").is_err());
    }
}
