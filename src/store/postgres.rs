use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use super::{NotificationStore, RetentionCutoffs, StoreError};
use crate::delivery::model::{PushJobState, PushJobStatus, PushSubscription};
use crate::digest::model::{ClaimedBatch, DigestBatch, DigestEntry};
use crate::event::model::{Event, EventType};
use crate::notification::model::{
    Channel, ChannelSet, CleanupReport, NewNotification, NotificationFilter, NotificationRecord,
    ReadState,
};
use crate::preference::model::{DigestFrequency, Preference};
use crate::trending::model::TrendingCounter;

const NOTIFICATION_COLUMNS: &str = "id, event_id, recipient_id, event_type, actor_id, \
     subject_entity_id, channel_set, attempted_channels, is_read, created_at, read_at, archived_at";

const DIGEST_ENTRY_COLUMNS: &str = "id, recipient_id, notification_id, event_type, actor_id, \
     subject_entity_id, frequency, created_at, batch_id, consumed_at";

const PREFERENCE_COLUMNS: &str = "recipient_id, event_type, channels, digest_frequency, \
     quiet_hours_start, quiet_hours_end, updated_at";

const BATCH_COLUMNS: &str = "id, recipient_id, frequency, period_key, created_at, sent_at";

const SUBSCRIPTION_COLUMNS: &str =
    "id, user_id, endpoint, p256dh_key, auth_key, is_active, created_at";

/// Postgres backed store. Tables live in the `global` schema (see `db/schema.sql`).
#[derive(Debug, Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Maps constraint violations onto the store's own variants.
fn map_write_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        match db.code().as_deref() {
            Some("23505") => return StoreError::Duplicate,
            Some("23503") => return StoreError::NotFound,
            _ => {}
        }
    }
    StoreError::Database(e)
}

fn event_type_from(raw: &str) -> Result<EventType, StoreError> {
    EventType::from_str(raw).map_err(StoreError::Corrupt)
}

fn frequency_from(raw: &str) -> Result<DigestFrequency, StoreError> {
    DigestFrequency::from_str(raw).map_err(StoreError::Corrupt)
}

fn notification_from_row(row: &PgRow) -> Result<NotificationRecord, StoreError> {
    let is_read: bool = row.try_get("is_read")?;
    Ok(NotificationRecord {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        recipient_id: row.try_get("recipient_id")?,
        event_type: event_type_from(row.try_get("event_type")?)?,
        actor_id: row.try_get("actor_id")?,
        subject_entity_id: row.try_get("subject_entity_id")?,
        channel_set: ChannelSet::from_bits(row.try_get("channel_set")?),
        attempted_channels: ChannelSet::from_bits(row.try_get("attempted_channels")?),
        read_state: if is_read {
            ReadState::Read
        } else {
            ReadState::Unread
        },
        created_at: row.try_get("created_at")?,
        read_at: row.try_get("read_at")?,
        archived_at: row.try_get("archived_at")?,
    })
}

fn event_from_row(row: &PgRow) -> Result<Event, StoreError> {
    Ok(Event {
        id: row.try_get("id")?,
        event_type: event_type_from(row.try_get("event_type")?)?,
        actor_id: row.try_get("actor_id")?,
        target_id: row.try_get("target_id")?,
        subject_entity_id: row.try_get("subject_entity_id")?,
        hashtags: row.try_get("hashtags")?,
        timestamp: row.try_get("occurred_at")?,
    })
}

fn hour_from(raw: Option<i16>) -> Option<u32> {
    raw.and_then(|h| u32::try_from(h).ok())
}

fn preference_from_row(row: &PgRow) -> Result<Preference, StoreError> {
    Ok(Preference {
        recipient_id: row.try_get("recipient_id")?,
        event_type: event_type_from(row.try_get("event_type")?)?,
        channel_enabled_set: ChannelSet::from_bits(row.try_get("channels")?),
        digest_frequency: frequency_from(row.try_get("digest_frequency")?)?,
        quiet_hours_start: hour_from(row.try_get("quiet_hours_start")?),
        quiet_hours_end: hour_from(row.try_get("quiet_hours_end")?),
        updated_at: row.try_get("updated_at")?,
    })
}

fn digest_entry_from_row(row: &PgRow) -> Result<DigestEntry, StoreError> {
    Ok(DigestEntry {
        id: row.try_get("id")?,
        recipient_id: row.try_get("recipient_id")?,
        notification_id: row.try_get("notification_id")?,
        event_type: event_type_from(row.try_get("event_type")?)?,
        actor_id: row.try_get("actor_id")?,
        subject_entity_id: row.try_get("subject_entity_id")?,
        frequency: frequency_from(row.try_get("frequency")?)?,
        created_at: row.try_get("created_at")?,
        batch_id: row.try_get("batch_id")?,
        consumed_at: row.try_get("consumed_at")?,
    })
}

fn batch_from_row(row: &PgRow) -> Result<DigestBatch, StoreError> {
    Ok(DigestBatch {
        id: row.try_get("id")?,
        recipient_id: row.try_get("recipient_id")?,
        frequency: frequency_from(row.try_get("frequency")?)?,
        period_key: row.try_get("period_key")?,
        created_at: row.try_get("created_at")?,
        sent_at: row.try_get("sent_at")?,
    })
}

fn subscription_from_row(row: &PgRow) -> Result<PushSubscription, StoreError> {
    Ok(PushSubscription {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        endpoint: row.try_get("endpoint")?,
        p256dh_key: row.try_get("p256dh_key")?,
        auth_key: row.try_get("auth_key")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_event(&self, event: &Event) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO global.events (id, event_type, actor_id, target_id, subject_entity_id, hashtags, occurred_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(event.id)
        .bind(event.event_type.as_str())
        .bind(event.actor_id)
        .bind(event.target_id)
        .bind(event.subject_entity_id)
        .bind(&event.hashtags)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query(
            "SELECT id, event_type, actor_id, target_id, subject_entity_id, hashtags, occurred_at
             FROM global.events WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn insert_notification(
        &self,
        notification: NewNotification,
    ) -> Result<NotificationRecord, StoreError> {
        let sql = format!(
            "INSERT INTO global.notifications
                (event_id, recipient_id, event_type, actor_id, subject_entity_id, channel_set, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (event_id, recipient_id) DO NOTHING
             RETURNING {NOTIFICATION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(notification.event_id)
            .bind(notification.recipient_id)
            .bind(notification.event_type.as_str())
            .bind(notification.actor_id)
            .bind(notification.subject_entity_id)
            .bind(notification.channel_set.bits())
            .bind(notification.created_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_write_error)?;

        match row {
            Some(row) => notification_from_row(&row),
            None => Err(StoreError::Duplicate),
        }
    }

    async fn get_notification(&self, id: i64) -> Result<Option<NotificationRecord>, StoreError> {
        let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM global.notifications WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(notification_from_row).transpose()
    }

    async fn find_notification(
        &self,
        event_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<Option<NotificationRecord>, StoreError> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM global.notifications
             WHERE event_id = $1 AND recipient_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(event_id)
            .bind(recipient_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(notification_from_row).transpose()
    }

    async fn list_notifications(
        &self,
        recipient_id: Uuid,
        filter: &NotificationFilter,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<NotificationRecord>, i64), StoreError> {
        let is_read = filter.read_state.map(|s| s == ReadState::Read);
        let event_type = filter.event_type.map(|t| t.as_str());
        let predicate = "recipient_id = $1
             AND ($2::boolean IS NULL OR is_read = $2)
             AND ($3::varchar IS NULL OR event_type = $3)";

        let total: i64 = sqlx::query(&format!(
            "SELECT COUNT(*) FROM global.notifications WHERE {predicate}"
        ))
        .bind(recipient_id)
        .bind(is_read)
        .bind(event_type)
        .fetch_one(&self.pool)
        .await?
        .try_get(0)?;

        let rows = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM global.notifications
             WHERE {predicate}
             ORDER BY created_at DESC, id DESC
             LIMIT $4 OFFSET $5"
        ))
        .bind(recipient_id)
        .bind(is_read)
        .bind(event_type)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .iter()
            .map(notification_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((records, total))
    }

    async fn mark_read(
        &self,
        recipient_id: Uuid,
        notification_id: i64,
        at: DateTime<Utc>,
    ) -> Result<NotificationRecord, StoreError> {
        let sql = format!(
            "UPDATE global.notifications
             SET is_read = true, read_at = COALESCE(read_at, $3)
             WHERE id = $1 AND recipient_id = $2
             RETURNING {NOTIFICATION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(notification_id)
            .bind(recipient_id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        notification_from_row(&row)
    }

    async fn mark_all_read(
        &self,
        recipient_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE global.notifications SET is_read = true, read_at = $2
             WHERE recipient_id = $1 AND is_read = false",
        )
        .bind(recipient_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn unread_count(&self, recipient_id: Uuid) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) FROM global.notifications WHERE recipient_id = $1 AND is_read = false",
        )
        .bind(recipient_id)
        .fetch_one(&self.pool)
        .await?
        .try_get(0)?;
        Ok(count)
    }

    async fn record_attempt(
        &self,
        notification_id: i64,
        channel: Channel,
    ) -> Result<(), StoreError> {
        let bits = [channel].into_iter().collect::<ChannelSet>().bits();
        let result = sqlx::query(
            "UPDATE global.notifications SET attempted_channels = attempted_channels | $2 WHERE id = $1",
        )
        .bind(notification_id)
        .bind(bits)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn preferences_for(&self, recipient_id: Uuid) -> Result<Vec<Preference>, StoreError> {
        let sql = format!(
            "SELECT {PREFERENCE_COLUMNS}
             FROM global.notification_preferences WHERE recipient_id = $1
             ORDER BY event_type"
        );
        let rows = sqlx::query(&sql)
            .bind(recipient_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(preference_from_row).collect()
    }

    async fn preferences_for_many(
        &self,
        recipients: &[Uuid],
        event_type: EventType,
    ) -> Result<HashMap<Uuid, Preference>, StoreError> {
        if recipients.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            "SELECT {PREFERENCE_COLUMNS}
             FROM global.notification_preferences
             WHERE recipient_id = ANY($1) AND event_type = $2"
        );
        let rows = sqlx::query(&sql)
            .bind(recipients)
            .bind(event_type.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| preference_from_row(row).map(|p| (p.recipient_id, p)))
            .collect()
    }

    async fn upsert_preference(&self, preference: &Preference) -> Result<Preference, StoreError> {
        let sql = format!(
            "INSERT INTO global.notification_preferences
                (recipient_id, event_type, channels, digest_frequency, quiet_hours_start, quiet_hours_end, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, NOW())
             ON CONFLICT (recipient_id, event_type) DO UPDATE
             SET channels = EXCLUDED.channels,
                 digest_frequency = EXCLUDED.digest_frequency,
                 quiet_hours_start = EXCLUDED.quiet_hours_start,
                 quiet_hours_end = EXCLUDED.quiet_hours_end,
                 updated_at = NOW()
             RETURNING {PREFERENCE_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(preference.recipient_id)
            .bind(preference.event_type.as_str())
            .bind(preference.channel_enabled_set.bits())
            .bind(preference.digest_frequency.as_str())
            .bind(preference.quiet_hours_start.map(|h| h as i16))
            .bind(preference.quiet_hours_end.map(|h| h as i16))
            .fetch_one(&self.pool)
            .await
            .map_err(map_write_error)?;
        preference_from_row(&row)
    }

    async fn enqueue_digest(
        &self,
        record: &NotificationRecord,
        frequency: DigestFrequency,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO global.digest_entries
                (recipient_id, notification_id, event_type, actor_id, subject_entity_id, frequency, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (notification_id) DO NOTHING",
        )
        .bind(record.recipient_id)
        .bind(record.id)
        .bind(record.event_type.as_str())
        .bind(record.actor_id)
        .bind(record.subject_entity_id)
        .bind(frequency.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn digest_recipients(
        &self,
        frequency: DigestFrequency,
    ) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            "SELECT DISTINCT recipient_id FROM global.digest_entries
             WHERE frequency = $1 AND consumed_at IS NULL
             ORDER BY recipient_id",
        )
        .bind(frequency.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get("recipient_id").map_err(StoreError::from))
            .collect()
    }

    async fn claim_digest_batch(
        &self,
        recipient_id: Uuid,
        frequency: DigestFrequency,
        period_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ClaimedBatch>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serializes claims per recipient across instances.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("digest:{}", recipient_id))
            .execute(&mut *tx)
            .await?;

        let unsent = sqlx::query(&format!(
            "SELECT {BATCH_COLUMNS} FROM global.digest_batches
             WHERE recipient_id = $1 AND frequency = $2 AND sent_at IS NULL
             ORDER BY created_at, id
             LIMIT 1"
        ))
        .bind(recipient_id)
        .bind(frequency.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let (batch, resumed) = match unsent {
            Some(row) => (batch_from_row(&row)?, true),
            None => {
                let pending: bool = sqlx::query(
                    "SELECT EXISTS(
                        SELECT 1 FROM global.digest_entries
                        WHERE recipient_id = $1 AND frequency = $2 AND batch_id IS NULL)",
                )
                .bind(recipient_id)
                .bind(frequency.as_str())
                .fetch_one(&mut *tx)
                .await?
                .try_get(0)?;
                if !pending {
                    return Ok(None);
                }

                let inserted = sqlx::query(&format!(
                    "INSERT INTO global.digest_batches (recipient_id, frequency, period_key, created_at)
                     VALUES ($1, $2, $3, $4)
                     ON CONFLICT (recipient_id, period_key) DO NOTHING
                     RETURNING {BATCH_COLUMNS}"
                ))
                .bind(recipient_id)
                .bind(frequency.as_str())
                .bind(period_key)
                .bind(now)
                .fetch_optional(&mut *tx)
                .await?;

                // Period already has a sent batch; new entries wait for the next one.
                let Some(row) = inserted else {
                    return Ok(None);
                };
                let batch = batch_from_row(&row)?;

                sqlx::query(
                    "UPDATE global.digest_entries SET batch_id = $1
                     WHERE recipient_id = $2 AND frequency = $3 AND batch_id IS NULL",
                )
                .bind(batch.id)
                .bind(recipient_id)
                .bind(frequency.as_str())
                .execute(&mut *tx)
                .await?;

                (batch, false)
            }
        };

        let rows = sqlx::query(&format!(
            "SELECT {DIGEST_ENTRY_COLUMNS} FROM global.digest_entries
             WHERE batch_id = $1 ORDER BY created_at, id"
        ))
        .bind(batch.id)
        .fetch_all(&mut *tx)
        .await?;
        let entries = rows
            .iter()
            .map(digest_entry_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        tx.commit().await?;
        debug!(
            "Claimed digest batch {} ({} entries, resumed: {})",
            batch.id,
            entries.len(),
            resumed
        );

        Ok(Some(ClaimedBatch {
            batch,
            entries,
            resumed,
        }))
    }

    async fn complete_digest_batch(
        &self,
        batch_id: i64,
        subject: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE global.digest_batches SET sent_at = $2, subject = $3
             WHERE id = $1 AND sent_at IS NULL",
        )
        .bind(batch_id)
        .bind(now)
        .bind(subject)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let exists: bool =
                sqlx::query("SELECT EXISTS(SELECT 1 FROM global.digest_batches WHERE id = $1)")
                    .bind(batch_id)
                    .fetch_one(&mut *tx)
                    .await?
                    .try_get(0)?;
            return if exists {
                Ok(())
            } else {
                Err(StoreError::NotFound)
            };
        }

        sqlx::query("UPDATE global.digest_entries SET consumed_at = $2 WHERE batch_id = $1")
            .bind(batch_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE global.notifications SET archived_at = $2
             WHERE id IN (SELECT notification_id FROM global.digest_entries WHERE batch_id = $1)",
        )
        .bind(batch_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn upsert_push_subscription(
        &self,
        user_id: Uuid,
        endpoint: &str,
        p256dh_key: &str,
        auth_key: &str,
    ) -> Result<(PushSubscription, bool), StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO global.push_subscriptions (user_id, endpoint, p256dh_key, auth_key)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_id, endpoint) DO UPDATE
             SET p256dh_key = EXCLUDED.p256dh_key,
                 auth_key = EXCLUDED.auth_key,
                 is_active = true
             RETURNING {SUBSCRIPTION_COLUMNS}, (xmax = 0) AS created"
        ))
        .bind(user_id)
        .bind(endpoint)
        .bind(p256dh_key)
        .bind(auth_key)
        .fetch_one(&self.pool)
        .await
        .map_err(map_write_error)?;

        let created: bool = row.try_get("created")?;
        Ok((subscription_from_row(&row)?, created))
    }

    async fn remove_push_subscription(
        &self,
        user_id: Uuid,
        endpoint: &str,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM global.push_subscriptions WHERE user_id = $1 AND endpoint = $2")
                .bind(user_id)
                .bind(endpoint)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn active_push_subscriptions(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<PushSubscription>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM global.push_subscriptions
             WHERE user_id = $1 AND is_active = true
             ORDER BY id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(subscription_from_row).collect()
    }

    async fn deactivate_push_subscription(&self, subscription_id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE global.push_subscriptions SET is_active = false WHERE id = $1")
            .bind(subscription_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_push_job(
        &self,
        notification_id: i64,
        state: PushJobState,
        attempts: u32,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO global.push_jobs (notification_id, state, attempts, last_error, updated_at)
             VALUES ($1, $2, $3, $4, NOW())
             ON CONFLICT (notification_id) DO UPDATE
             SET state = EXCLUDED.state,
                 attempts = EXCLUDED.attempts,
                 last_error = EXCLUDED.last_error,
                 updated_at = NOW()",
        )
        .bind(notification_id)
        .bind(state.as_str())
        .bind(attempts as i32)
        .bind(last_error)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn push_job(&self, notification_id: i64) -> Result<Option<PushJobStatus>, StoreError> {
        let row = sqlx::query(
            "SELECT notification_id, state, attempts, last_error, updated_at
             FROM global.push_jobs WHERE notification_id = $1",
        )
        .bind(notification_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let state: String = row.try_get("state")?;
        let attempts: i32 = row.try_get("attempts")?;
        Ok(Some(PushJobStatus {
            notification_id: row.try_get("notification_id")?,
            state: PushJobState::from_str(&state).map_err(StoreError::Corrupt)?,
            attempts: attempts.max(0) as u32,
            last_error: row.try_get("last_error")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    async fn save_trending_snapshot(
        &self,
        counters: &[TrendingCounter],
        evicted: &[String],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        if !evicted.is_empty() {
            sqlx::query("DELETE FROM global.trending_counters WHERE hashtag = ANY($1)")
                .bind(evicted)
                .execute(&mut *tx)
                .await?;
        }

        for counter in counters {
            sqlx::query(
                "INSERT INTO global.trending_counters (hashtag, windowed_count, decay_timestamp, last_occurrence)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (hashtag) DO UPDATE
                 SET windowed_count = EXCLUDED.windowed_count,
                     decay_timestamp = EXCLUDED.decay_timestamp,
                     last_occurrence = EXCLUDED.last_occurrence",
            )
            .bind(&counter.hashtag)
            .bind(counter.windowed_count)
            .bind(counter.decay_timestamp)
            .bind(counter.last_occurrence)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            "Saved trending snapshot: {} counters, {} evicted",
            counters.len(),
            evicted.len()
        );
        Ok(())
    }

    async fn load_trending_snapshot(&self) -> Result<Vec<TrendingCounter>, StoreError> {
        let rows = sqlx::query(
            "SELECT hashtag, windowed_count, decay_timestamp, last_occurrence
             FROM global.trending_counters",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(TrendingCounter {
                    hashtag: row.try_get("hashtag")?,
                    windowed_count: row.try_get("windowed_count")?,
                    decay_timestamp: row.try_get("decay_timestamp")?,
                    last_occurrence: row.try_get("last_occurrence")?,
                })
            })
            .collect()
    }

    async fn cleanup(&self, cutoffs: RetentionCutoffs) -> Result<CleanupReport, StoreError> {
        let read = sqlx::query(
            "DELETE FROM global.notifications WHERE is_read = true AND read_at < $1",
        )
        .bind(cutoffs.read_before)
        .execute(&self.pool)
        .await?;

        let unread = sqlx::query(
            "DELETE FROM global.notifications WHERE is_read = false AND created_at < $1",
        )
        .bind(cutoffs.unread_before)
        .execute(&self.pool)
        .await?;

        let batches = sqlx::query(
            "DELETE FROM global.digest_batches WHERE sent_at IS NOT NULL AND sent_at < $1",
        )
        .bind(cutoffs.batches_before)
        .execute(&self.pool)
        .await?;

        let report = CleanupReport {
            read_deleted: read.rows_affected(),
            unread_deleted: unread.rows_affected(),
            batches_deleted: batches.rows_affected(),
        };
        info!("Retention cleanup finished: {:?}", report);
        Ok(report)
    }
}
