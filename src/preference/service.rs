use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::delivery::model::{PushSubscriptionResponse, SubscribePushRequest, UnsubscribePushRequest};
use crate::event::model::EventType;
use crate::preference::model::{
    Preference, PreferenceError, PreferencesResponse, QuietHours, UpdatePreferencesRequest,
};
use crate::store::NotificationStore;

const MAX_ENDPOINT_LEN: usize = 2048;

pub struct PreferenceService {
    store: Arc<dyn NotificationStore>,
}

impl PreferenceService {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }

    /// One entry per event type; types without a stored row show the defaults.
    pub async fn get(&self, user_id: Uuid) -> Result<PreferencesResponse, PreferenceError> {
        let stored = self.store.preferences_for(user_id).await?;
        let preferences = EventType::ALL
            .into_iter()
            .map(|event_type| {
                stored
                    .iter()
                    .find(|p| p.event_type == event_type)
                    .cloned()
                    .unwrap_or_else(|| Preference::default_for(user_id, event_type))
            })
            .collect();
        Ok(PreferencesResponse { preferences })
    }

    pub async fn update(
        &self,
        user_id: Uuid,
        request: UpdatePreferencesRequest,
    ) -> Result<PreferencesResponse, PreferenceError> {
        if request.preferences.is_empty() {
            return Err(PreferenceError::ValidationError(
                "at least one preference is required".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for update in &request.preferences {
            if !seen.insert(update.event_type) {
                return Err(PreferenceError::ValidationError(format!(
                    "duplicate entry for {}",
                    update.event_type.as_str()
                )));
            }
            match (update.quiet_hours_start, update.quiet_hours_end) {
                (Some(start), Some(end)) => {
                    QuietHours::validate(start, end).map_err(PreferenceError::ValidationError)?;
                }
                (None, None) => {}
                _ => {
                    return Err(PreferenceError::ValidationError(
                        "quiet_hours_start and quiet_hours_end go together".to_string(),
                    ))
                }
            }
        }

        let current = self.get(user_id).await?.preferences;
        for update in request.preferences {
            let mut preference = current
                .iter()
                .find(|p| p.event_type == update.event_type)
                .cloned()
                .unwrap_or_else(|| Preference::default_for(user_id, update.event_type));
            preference.channel_enabled_set = update.channels;
            if let Some(frequency) = update.digest_frequency {
                preference.digest_frequency = frequency;
            }
            preference.quiet_hours_start = update.quiet_hours_start;
            preference.quiet_hours_end = update.quiet_hours_end;
            self.store.upsert_preference(&preference).await?;
        }

        info!("Updated notification preferences for {}", user_id);
        self.get(user_id).await
    }

    pub async fn subscribe_push(
        &self,
        user_id: Uuid,
        request: SubscribePushRequest,
    ) -> Result<PushSubscriptionResponse, PreferenceError> {
        let endpoint = request.endpoint.trim();
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://"))
            || endpoint.len() > MAX_ENDPOINT_LEN
        {
            return Err(PreferenceError::ValidationError(
                "endpoint must be an http(s) URL".to_string(),
            ));
        }
        if request.keys.p256dh.trim().is_empty() || request.keys.auth.trim().is_empty() {
            return Err(PreferenceError::ValidationError(
                "p256dh and auth keys are required".to_string(),
            ));
        }

        let (_, created) = self
            .store
            .upsert_push_subscription(user_id, endpoint, &request.keys.p256dh, &request.keys.auth)
            .await?;

        Ok(PushSubscriptionResponse {
            success: true,
            message: if created {
                "Subscription created".to_string()
            } else {
                "Subscription updated".to_string()
            },
        })
    }

    pub async fn unsubscribe_push(
        &self,
        user_id: Uuid,
        request: UnsubscribePushRequest,
    ) -> Result<PushSubscriptionResponse, PreferenceError> {
        if !self
            .store
            .remove_push_subscription(user_id, request.endpoint.trim())
            .await?
        {
            return Err(PreferenceError::SubscriptionNotFound);
        }
        Ok(PushSubscriptionResponse {
            success: true,
            message: "Subscription removed".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::model::PushKeys;
    use crate::notification::model::{Channel, ChannelSet};
    use crate::preference::model::{DigestFrequency, PreferenceUpdate};
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn test_get_fills_defaults_for_every_type() {
        let service = PreferenceService::new(Arc::new(MemoryStore::new()));
        let prefs = service.get(Uuid::new_v4()).await.unwrap().preferences;
        assert_eq!(prefs.len(), EventType::ALL.len());
        assert!(prefs.iter().all(|p| p.channel_enabled_set == ChannelSet::ALL));
    }

    #[tokio::test]
    async fn test_update_keeps_frequency_when_omitted() {
        let service = PreferenceService::new(Arc::new(MemoryStore::new()));
        let user = Uuid::new_v4();

        let realtime_only: ChannelSet = [Channel::Realtime].into_iter().collect();
        let updated = service
            .update(
                user,
                UpdatePreferencesRequest {
                    preferences: vec![PreferenceUpdate {
                        event_type: EventType::Liked,
                        channels: realtime_only,
                        digest_frequency: None,
                        quiet_hours_start: None,
                        quiet_hours_end: None,
                    }],
                },
            )
            .await
            .unwrap();

        let liked = updated
            .preferences
            .iter()
            .find(|p| p.event_type == EventType::Liked)
            .unwrap();
        assert_eq!(liked.channel_enabled_set, realtime_only);
        assert_eq!(liked.digest_frequency, DigestFrequency::Weekly);
        assert!(liked.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_update_rejects_duplicates() {
        let service = PreferenceService::new(Arc::new(MemoryStore::new()));
        let update = PreferenceUpdate {
            event_type: EventType::Followed,
            channels: ChannelSet::EMPTY,
            digest_frequency: None,
            quiet_hours_start: None,
            quiet_hours_end: None,
        };
        let result = service
            .update(
                Uuid::new_v4(),
                UpdatePreferencesRequest {
                    preferences: vec![update.clone(), update],
                },
            )
            .await;
        assert!(matches!(result, Err(PreferenceError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_update_stores_and_validates_quiet_hours() {
        let service = PreferenceService::new(Arc::new(MemoryStore::new()));
        let user = Uuid::new_v4();
        let update = |start: Option<u32>, end: Option<u32>| UpdatePreferencesRequest {
            preferences: vec![PreferenceUpdate {
                event_type: EventType::Mentioned,
                channels: ChannelSet::ALL,
                digest_frequency: None,
                quiet_hours_start: start,
                quiet_hours_end: end,
            }],
        };

        let updated = service.update(user, update(Some(22), Some(7))).await.unwrap();
        let mentioned = updated
            .preferences
            .iter()
            .find(|p| p.event_type == EventType::Mentioned)
            .unwrap();
        assert_eq!(mentioned.quiet_hours_start, Some(22));
        assert_eq!(mentioned.quiet_hours_end, Some(7));

        for (start, end) in [(Some(22), None), (Some(25), Some(7)), (Some(3), Some(3))] {
            assert!(matches!(
                service.update(user, update(start, end)).await,
                Err(PreferenceError::ValidationError(_))
            ));
        }

        let cleared = service.update(user, update(None, None)).await.unwrap();
        assert!(cleared.preferences.iter().all(|p| p.quiet_hours().is_none()));
    }

    #[tokio::test]
    async fn test_push_subscribe_then_unsubscribe() {
        let service = PreferenceService::new(Arc::new(MemoryStore::new()));
        let user = Uuid::new_v4();
        let request = SubscribePushRequest {
            endpoint: "https://push.example.com/abc".to_string(),
            keys: PushKeys {
                p256dh: "key".to_string(),
                auth: "secret".to_string(),
            },
        };

        let created = service.subscribe_push(user, request.clone()).await.unwrap();
        assert_eq!(created.message, "Subscription created");
        let updated = service.subscribe_push(user, request.clone()).await.unwrap();
        assert_eq!(updated.message, "Subscription updated");

        let unsubscribe = UnsubscribePushRequest {
            endpoint: request.endpoint.clone(),
        };
        assert!(service.unsubscribe_push(user, unsubscribe.clone()).await.is_ok());
        assert!(matches!(
            service.unsubscribe_push(user, unsubscribe).await,
            Err(PreferenceError::SubscriptionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_push_subscribe_validates_endpoint() {
        let service = PreferenceService::new(Arc::new(MemoryStore::new()));
        let result = service
            .subscribe_push(
                Uuid::new_v4(),
                SubscribePushRequest {
                    endpoint: "ftp://nope".to_string(),
                    keys: PushKeys {
                        p256dh: "k".to_string(),
                        auth: "a".to_string(),
                    },
                },
            )
            .await;
        assert!(matches!(result, Err(PreferenceError::ValidationError(_))));
    }
}
