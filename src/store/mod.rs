pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::delivery::model::{PushJobState, PushJobStatus, PushSubscription};
use crate::digest::model::ClaimedBatch;
use crate::event::model::{Event, EventType};
use crate::notification::model::{
    Channel, CleanupReport, NewNotification, NotificationFilter, NotificationRecord,
};
use crate::preference::model::{DigestFrequency, Preference};
use crate::trending::model::TrendingCounter;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness constraint rejected the write.
    #[error("Duplicate record")]
    Duplicate,

    /// The row, or a row it references, does not exist.
    #[error("Record not found")]
    NotFound,

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Retention thresholds for [`NotificationStore::cleanup`].
#[derive(Debug, Clone, Copy)]
pub struct RetentionCutoffs {
    pub read_before: DateTime<Utc>,
    pub unread_before: DateTime<Utc>,
    pub batches_before: DateTime<Utc>,
}

/// Durable state of the notification pipeline.
///
/// Implementations must enforce uniqueness of `(event_id, recipient_id)` for
/// notifications and of `(recipient_id, period_key)` for digest batches.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    /// Stores the event; returns false if an event with the same id already exists.
    async fn insert_event(&self, event: &Event) -> Result<bool, StoreError>;

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>, StoreError>;

    /// Creates a notification, or fails with [`StoreError::Duplicate`].
    async fn insert_notification(
        &self,
        notification: NewNotification,
    ) -> Result<NotificationRecord, StoreError>;

    async fn get_notification(&self, id: i64) -> Result<Option<NotificationRecord>, StoreError>;

    /// The notification created for `recipient_id` by `event_id`, if any.
    async fn find_notification(
        &self,
        event_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<Option<NotificationRecord>, StoreError>;

    /// Returns the page and the total number of matching rows.
    async fn list_notifications(
        &self,
        recipient_id: Uuid,
        filter: &NotificationFilter,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<NotificationRecord>, i64), StoreError>;

    /// Marks one of the recipient's notifications read. Idempotent.
    async fn mark_read(
        &self,
        recipient_id: Uuid,
        notification_id: i64,
        at: DateTime<Utc>,
    ) -> Result<NotificationRecord, StoreError>;

    async fn mark_all_read(&self, recipient_id: Uuid, at: DateTime<Utc>)
        -> Result<u64, StoreError>;

    async fn unread_count(&self, recipient_id: Uuid) -> Result<i64, StoreError>;

    /// Adds `channel` to the record's attempted channels.
    async fn record_attempt(&self, notification_id: i64, channel: Channel)
        -> Result<(), StoreError>;

    async fn preferences_for(&self, recipient_id: Uuid) -> Result<Vec<Preference>, StoreError>;

    /// Stored preferences of many recipients for one event type. Missing recipients
    /// have no stored row.
    async fn preferences_for_many(
        &self,
        recipients: &[Uuid],
        event_type: EventType,
    ) -> Result<HashMap<Uuid, Preference>, StoreError>;

    async fn upsert_preference(&self, preference: &Preference) -> Result<Preference, StoreError>;

    /// Appends the record to the recipient's digest queue. Idempotent per notification.
    async fn enqueue_digest(
        &self,
        record: &NotificationRecord,
        frequency: DigestFrequency,
    ) -> Result<(), StoreError>;

    /// Recipients with unconsumed digest entries of this frequency.
    async fn digest_recipients(&self, frequency: DigestFrequency) -> Result<Vec<Uuid>, StoreError>;

    /// Returns the recipient's unsent batch for this frequency if one exists, otherwise
    /// moves every unclaimed entry into a new batch for `period_key`. Returns `None` when
    /// there is nothing to send or the period already has a sent batch.
    async fn claim_digest_batch(
        &self,
        recipient_id: Uuid,
        frequency: DigestFrequency,
        period_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ClaimedBatch>, StoreError>;

    /// Marks the batch sent, its entries consumed and their notifications archived.
    async fn complete_digest_batch(
        &self,
        batch_id: i64,
        subject: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn upsert_push_subscription(
        &self,
        user_id: Uuid,
        endpoint: &str,
        p256dh_key: &str,
        auth_key: &str,
    ) -> Result<(PushSubscription, bool), StoreError>;

    async fn remove_push_subscription(&self, user_id: Uuid, endpoint: &str)
        -> Result<bool, StoreError>;

    async fn active_push_subscriptions(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<PushSubscription>, StoreError>;

    async fn deactivate_push_subscription(&self, subscription_id: i64) -> Result<(), StoreError>;

    async fn record_push_job(
        &self,
        notification_id: i64,
        state: PushJobState,
        attempts: u32,
        last_error: Option<String>,
    ) -> Result<(), StoreError>;

    async fn push_job(&self, notification_id: i64) -> Result<Option<PushJobStatus>, StoreError>;

    async fn save_trending_snapshot(
        &self,
        counters: &[TrendingCounter],
        evicted: &[String],
    ) -> Result<(), StoreError>;

    async fn load_trending_snapshot(&self) -> Result<Vec<TrendingCounter>, StoreError>;

    async fn cleanup(&self, cutoffs: RetentionCutoffs) -> Result<CleanupReport, StoreError>;
}
