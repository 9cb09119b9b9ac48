use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::redis::RedisCache;
use crate::event::model::EventType;
use crate::notification::model::{
    CleanupReport, MarkAllReadResponse, NotificationError, NotificationFilter,
    NotificationListResponse, NotificationQueryParams, NotificationRecord, ReadState,
};
use crate::store::{NotificationStore, RetentionCutoffs, StoreError};

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

const READ_RETENTION_DAYS: i64 = 30;
const UNREAD_RETENTION_DAYS: i64 = 90;
const BATCH_RETENTION_DAYS: i64 = 60;

/// Recipient-facing reads and read-state transitions.
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    redis_cache: Option<RedisCache>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn NotificationStore>, redis_cache: Option<RedisCache>) -> Self {
        Self { store, redis_cache }
    }

    pub async fn list(
        &self,
        user_id: Uuid,
        params: &NotificationQueryParams,
    ) -> Result<NotificationListResponse, NotificationError> {
        let page = params.page.unwrap_or(1);
        if page < 1 {
            return Err(NotificationError::ValidationError(
                "page must be at least 1".to_string(),
            ));
        }
        let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let (offset, end) = match ((page - 1).checked_mul(limit), page.checked_mul(limit)) {
            (Some(offset), Some(end)) => (offset, end),
            _ => {
                return Err(NotificationError::ValidationError(
                    "page is out of range".to_string(),
                ))
            }
        };

        let filter = NotificationFilter {
            read_state: params
                .read_state
                .as_deref()
                .map(ReadState::from_str)
                .transpose()
                .map_err(NotificationError::ValidationError)?,
            event_type: params
                .event_type
                .as_deref()
                .map(EventType::from_str)
                .transpose()
                .map_err(NotificationError::ValidationError)?,
        };

        let (notifications, total) = self
            .store
            .list_notifications(user_id, &filter, offset, limit)
            .await?;

        Ok(NotificationListResponse {
            has_next: end < total,
            notifications,
            page,
            limit,
            total,
        })
    }

    /// Owner only: someone else's notification looks exactly like a missing one.
    pub async fn mark_read(
        &self,
        user_id: Uuid,
        notification_id: i64,
    ) -> Result<NotificationRecord, NotificationError> {
        let record = match self.store.mark_read(user_id, notification_id, Utc::now()).await {
            Ok(record) => record,
            Err(StoreError::NotFound) => return Err(NotificationError::NotFound),
            Err(e) => return Err(e.into()),
        };
        self.invalidate_unread(&[user_id]).await;
        Ok(record)
    }

    pub async fn mark_all_read(&self, user_id: Uuid) -> Result<MarkAllReadResponse, NotificationError> {
        let updated = self.store.mark_all_read(user_id, Utc::now()).await?;
        self.invalidate_unread(&[user_id]).await;
        info!("Marked {} notifications read for {}", updated, user_id);
        Ok(MarkAllReadResponse { updated })
    }

    pub async fn unread_count(&self, user_id: Uuid) -> Result<i64, NotificationError> {
        if let Some(cache) = &self.redis_cache {
            match cache.get_unread_count(user_id).await {
                Ok(Some(count)) => return Ok(count),
                Ok(None) => {}
                Err(e) => warn!("Unread count cache read failed: {}", e),
            }
        }

        let count = self.store.unread_count(user_id).await?;

        if let Some(cache) = &self.redis_cache {
            if let Err(e) = cache.cache_unread_count(user_id, count).await {
                warn!("Unread count cache write failed: {}", e);
            }
        }
        Ok(count)
    }

    /// Drops cached counts; a cache failure only costs a stale count until the TTL.
    pub async fn invalidate_unread(&self, user_ids: &[Uuid]) {
        if let Some(cache) = &self.redis_cache {
            if let Err(e) = cache.invalidate_unread_counts(user_ids).await {
                warn!("Unread count invalidation failed: {}", e);
            }
        }
    }

    /// Deletes read notifications after 30 days, unread after 90, sent digest batches after 60.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<CleanupReport, NotificationError> {
        let report = self
            .store
            .cleanup(RetentionCutoffs {
                read_before: now - Duration::days(READ_RETENTION_DAYS),
                unread_before: now - Duration::days(UNREAD_RETENTION_DAYS),
                batches_before: now - Duration::days(BATCH_RETENTION_DAYS),
            })
            .await?;
        info!(
            "Cleanup removed {} read, {} unread notifications and {} digest batches",
            report.read_deleted, report.unread_deleted, report.batches_deleted
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::model::{ChannelSet, NewNotification};
    use crate::store::memory::MemoryStore;

    async fn seed(store: &MemoryStore, recipient: Uuid, event_type: EventType) -> NotificationRecord {
        store
            .insert_notification(NewNotification {
                event_id: Uuid::new_v4(),
                recipient_id: recipient,
                event_type,
                actor_id: Uuid::new_v4(),
                subject_entity_id: Some(1),
                channel_set: ChannelSet::ALL,
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    fn params(page: Option<i64>, limit: Option<i64>) -> NotificationQueryParams {
        NotificationQueryParams {
            page,
            limit,
            read_state: None,
            event_type: None,
        }
    }

    #[tokio::test]
    async fn test_list_paginates_and_filters() {
        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        for _ in 0..3 {
            seed(&store, user, EventType::Liked).await;
        }
        seed(&store, user, EventType::Followed).await;
        let service = NotificationService::new(store.clone(), None);

        let first = service.list(user, &params(Some(1), Some(3))).await.unwrap();
        assert_eq!(first.notifications.len(), 3);
        assert_eq!(first.total, 4);
        assert!(first.has_next);

        let mut only_follows = params(None, None);
        only_follows.event_type = Some("followed".to_string());
        let follows = service.list(user, &only_follows).await.unwrap();
        assert_eq!(follows.total, 1);
        assert!(!follows.has_next);
    }

    #[tokio::test]
    async fn test_list_rejects_bad_filters() {
        let service = NotificationService::new(Arc::new(MemoryStore::new()), None);
        let mut bad = params(None, None);
        bad.read_state = Some("maybe".to_string());
        assert!(matches!(
            service.list(Uuid::new_v4(), &bad).await,
            Err(NotificationError::ValidationError(_))
        ));
        assert!(matches!(
            service.list(Uuid::new_v4(), &params(Some(0), None)).await,
            Err(NotificationError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_list_rejects_page_past_offset_range() {
        let service = NotificationService::new(Arc::new(MemoryStore::new()), None);
        assert!(matches!(
            service.list(Uuid::new_v4(), &params(Some(i64::MAX), Some(20))).await,
            Err(NotificationError::ValidationError(_))
        ));

        let last_page = i64::MAX / 20;
        let empty = service
            .list(Uuid::new_v4(), &params(Some(last_page), Some(20)))
            .await
            .unwrap();
        assert!(empty.notifications.is_empty());
        assert!(!empty.has_next);
    }

    #[tokio::test]
    async fn test_mark_read_is_owner_only_and_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        let record = seed(&store, owner, EventType::Mentioned).await;
        let service = NotificationService::new(store.clone(), None);

        assert!(matches!(
            service.mark_read(Uuid::new_v4(), record.id).await,
            Err(NotificationError::NotFound)
        ));

        let read = service.mark_read(owner, record.id).await.unwrap();
        let again = service.mark_read(owner, record.id).await.unwrap();
        assert_eq!(read.read_at, again.read_at);
        assert_eq!(service.unread_count(owner).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_all_read() {
        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        seed(&store, user, EventType::Liked).await;
        seed(&store, user, EventType::Retweeted).await;
        let service = NotificationService::new(store.clone(), None);

        assert_eq!(service.unread_count(user).await.unwrap(), 2);
        assert_eq!(service.mark_all_read(user).await.unwrap().updated, 2);
        assert_eq!(service.unread_count(user).await.unwrap(), 0);
    }
}
