use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
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

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    events: HashMap<Uuid, Event>,
    notifications: BTreeMap<i64, NotificationRecord>,
    notification_keys: HashMap<(Uuid, Uuid), i64>,
    preferences: HashMap<(Uuid, EventType), Preference>,
    digest_entries: BTreeMap<i64, DigestEntry>,
    digested: HashSet<i64>,
    batches: BTreeMap<i64, DigestBatch>,
    push_subscriptions: BTreeMap<i64, PushSubscription>,
    push_jobs: HashMap<i64, PushJobStatus>,
    trending: BTreeMap<String, TrendingCounter>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Process-local store. Used when no database is configured and by the pipeline tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage: every call fails with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }

    async fn insert_event(&self, event: &Event) -> Result<bool, StoreError> {
        self.check()?;
        let mut inner = self.inner.lock();
        if inner.events.contains_key(&event.id) {
            return Ok(false);
        }
        inner.events.insert(event.id, event.clone());
        Ok(true)
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        self.check()?;
        Ok(self.inner.lock().events.get(&id).cloned())
    }

    async fn insert_notification(
        &self,
        notification: NewNotification,
    ) -> Result<NotificationRecord, StoreError> {
        self.check()?;
        let mut inner = self.inner.lock();
        let key = (notification.event_id, notification.recipient_id);
        if inner.notification_keys.contains_key(&key) {
            return Err(StoreError::Duplicate);
        }

        let id = inner.next_id();
        let record = NotificationRecord {
            id,
            event_id: notification.event_id,
            recipient_id: notification.recipient_id,
            event_type: notification.event_type,
            actor_id: notification.actor_id,
            subject_entity_id: notification.subject_entity_id,
            channel_set: notification.channel_set,
            attempted_channels: ChannelSet::EMPTY,
            read_state: ReadState::Unread,
            created_at: notification.created_at,
            read_at: None,
            archived_at: None,
        };
        inner.notification_keys.insert(key, id);
        inner.notifications.insert(id, record.clone());
        Ok(record)
    }

    async fn get_notification(&self, id: i64) -> Result<Option<NotificationRecord>, StoreError> {
        self.check()?;
        Ok(self.inner.lock().notifications.get(&id).cloned())
    }

    async fn find_notification(
        &self,
        event_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<Option<NotificationRecord>, StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        Ok(inner
            .notification_keys
            .get(&(event_id, recipient_id))
            .and_then(|id| inner.notifications.get(id))
            .cloned())
    }

    async fn list_notifications(
        &self,
        recipient_id: Uuid,
        filter: &NotificationFilter,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<NotificationRecord>, i64), StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        let mut matching: Vec<&NotificationRecord> = inner
            .notifications
            .values()
            .filter(|n| n.recipient_id == recipient_id)
            .filter(|n| filter.read_state.map_or(true, |s| n.read_state == s))
            .filter(|n| filter.event_type.map_or(true, |t| n.event_type == t))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn mark_read(
        &self,
        recipient_id: Uuid,
        notification_id: i64,
        at: DateTime<Utc>,
    ) -> Result<NotificationRecord, StoreError> {
        self.check()?;
        let mut inner = self.inner.lock();
        match inner.notifications.get_mut(&notification_id) {
            Some(record) if record.recipient_id == recipient_id => {
                if record.read_state == ReadState::Unread {
                    record.read_state = ReadState::Read;
                    record.read_at = Some(at);
                }
                Ok(record.clone())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn mark_all_read(
        &self,
        recipient_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.check()?;
        let mut inner = self.inner.lock();
        let mut updated = 0;
        for record in inner.notifications.values_mut() {
            if record.recipient_id == recipient_id && record.read_state == ReadState::Unread {
                record.read_state = ReadState::Read;
                record.read_at = Some(at);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn unread_count(&self, recipient_id: Uuid) -> Result<i64, StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        Ok(inner
            .notifications
            .values()
            .filter(|n| n.recipient_id == recipient_id && n.read_state == ReadState::Unread)
            .count() as i64)
    }

    async fn record_attempt(
        &self,
        notification_id: i64,
        channel: Channel,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.inner.lock();
        let record = inner
            .notifications
            .get_mut(&notification_id)
            .ok_or(StoreError::NotFound)?;
        record.attempted_channels.insert(channel);
        Ok(())
    }

    async fn preferences_for(&self, recipient_id: Uuid) -> Result<Vec<Preference>, StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        let mut prefs: Vec<Preference> = inner
            .preferences
            .values()
            .filter(|p| p.recipient_id == recipient_id)
            .cloned()
            .collect();
        prefs.sort_by_key(|p| p.event_type);
        Ok(prefs)
    }

    async fn preferences_for_many(
        &self,
        recipients: &[Uuid],
        event_type: EventType,
    ) -> Result<HashMap<Uuid, Preference>, StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        Ok(recipients
            .iter()
            .filter_map(|r| {
                inner
                    .preferences
                    .get(&(*r, event_type))
                    .map(|p| (*r, p.clone()))
            })
            .collect())
    }

    async fn upsert_preference(&self, preference: &Preference) -> Result<Preference, StoreError> {
        self.check()?;
        let mut stored = preference.clone();
        stored.updated_at = Some(Utc::now());
        self.inner.lock().preferences.insert(
            (preference.recipient_id, preference.event_type),
            stored.clone(),
        );
        Ok(stored)
    }

    async fn enqueue_digest(
        &self,
        record: &NotificationRecord,
        frequency: DigestFrequency,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.inner.lock();
        if !inner.digested.insert(record.id) {
            return Ok(());
        }
        let id = inner.next_id();
        inner.digest_entries.insert(
            id,
            DigestEntry {
                id,
                recipient_id: record.recipient_id,
                notification_id: record.id,
                event_type: record.event_type,
                actor_id: record.actor_id,
                subject_entity_id: record.subject_entity_id,
                frequency,
                created_at: record.created_at,
                batch_id: None,
                consumed_at: None,
            },
        );
        Ok(())
    }

    async fn digest_recipients(
        &self,
        frequency: DigestFrequency,
    ) -> Result<Vec<Uuid>, StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        let mut recipients: Vec<Uuid> = inner
            .digest_entries
            .values()
            .filter(|e| e.frequency == frequency && e.consumed_at.is_none())
            .map(|e| e.recipient_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        recipients.sort();
        Ok(recipients)
    }

    async fn claim_digest_batch(
        &self,
        recipient_id: Uuid,
        frequency: DigestFrequency,
        period_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ClaimedBatch>, StoreError> {
        self.check()?;
        let mut inner = self.inner.lock();

        let unsent = inner
            .batches
            .values()
            .filter(|b| {
                b.recipient_id == recipient_id && b.frequency == frequency && b.sent_at.is_none()
            })
            .min_by_key(|b| (b.created_at, b.id))
            .cloned();

        let (batch, resumed) = match unsent {
            Some(batch) => (batch, true),
            None => {
                let period_done = inner
                    .batches
                    .values()
                    .any(|b| b.recipient_id == recipient_id && b.period_key == period_key);
                if period_done {
                    return Ok(None);
                }

                let pending: Vec<i64> = inner
                    .digest_entries
                    .values()
                    .filter(|e| {
                        e.recipient_id == recipient_id
                            && e.frequency == frequency
                            && e.batch_id.is_none()
                    })
                    .map(|e| e.id)
                    .collect();
                if pending.is_empty() {
                    return Ok(None);
                }

                let id = inner.next_id();
                let batch = DigestBatch {
                    id,
                    recipient_id,
                    frequency,
                    period_key: period_key.to_string(),
                    created_at: now,
                    sent_at: None,
                };
                inner.batches.insert(id, batch.clone());
                for entry_id in pending {
                    if let Some(entry) = inner.digest_entries.get_mut(&entry_id) {
                        entry.batch_id = Some(id);
                    }
                }
                (batch, false)
            }
        };

        let entries = inner
            .digest_entries
            .values()
            .filter(|e| e.batch_id == Some(batch.id))
            .cloned()
            .collect();

        Ok(Some(ClaimedBatch {
            batch,
            entries,
            resumed,
        }))
    }

    async fn complete_digest_batch(
        &self,
        batch_id: i64,
        _subject: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.inner.lock();
        let batch = inner.batches.get_mut(&batch_id).ok_or(StoreError::NotFound)?;
        if batch.sent_at.is_some() {
            return Ok(());
        }
        batch.sent_at = Some(now);

        let mut consumed = Vec::new();
        for entry in inner.digest_entries.values_mut() {
            if entry.batch_id == Some(batch_id) {
                entry.consumed_at = Some(now);
                consumed.push(entry.notification_id);
            }
        }
        for notification_id in consumed {
            if let Some(record) = inner.notifications.get_mut(&notification_id) {
                record.archived_at = Some(now);
            }
        }
        Ok(())
    }

    async fn upsert_push_subscription(
        &self,
        user_id: Uuid,
        endpoint: &str,
        p256dh_key: &str,
        auth_key: &str,
    ) -> Result<(PushSubscription, bool), StoreError> {
        self.check()?;
        let mut inner = self.inner.lock();
        if let Some(existing) = inner
            .push_subscriptions
            .values_mut()
            .find(|s| s.user_id == user_id && s.endpoint == endpoint)
        {
            existing.p256dh_key = p256dh_key.to_string();
            existing.auth_key = auth_key.to_string();
            existing.is_active = true;
            return Ok((existing.clone(), false));
        }

        let id = inner.next_id();
        let subscription = PushSubscription {
            id,
            user_id,
            endpoint: endpoint.to_string(),
            p256dh_key: p256dh_key.to_string(),
            auth_key: auth_key.to_string(),
            is_active: true,
            created_at: Utc::now(),
        };
        inner.push_subscriptions.insert(id, subscription.clone());
        Ok((subscription, true))
    }

    async fn remove_push_subscription(
        &self,
        user_id: Uuid,
        endpoint: &str,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut inner = self.inner.lock();
        let before = inner.push_subscriptions.len();
        inner
            .push_subscriptions
            .retain(|_, s| !(s.user_id == user_id && s.endpoint == endpoint));
        Ok(inner.push_subscriptions.len() < before)
    }

    async fn active_push_subscriptions(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<PushSubscription>, StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        Ok(inner
            .push_subscriptions
            .values()
            .filter(|s| s.user_id == user_id && s.is_active)
            .cloned()
            .collect())
    }

    async fn deactivate_push_subscription(&self, subscription_id: i64) -> Result<(), StoreError> {
        self.check()?;
        if let Some(subscription) = self.inner.lock().push_subscriptions.get_mut(&subscription_id) {
            subscription.is_active = false;
        }
        Ok(())
    }

    async fn record_push_job(
        &self,
        notification_id: i64,
        state: PushJobState,
        attempts: u32,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner.lock().push_jobs.insert(
            notification_id,
            PushJobStatus {
                notification_id,
                state,
                attempts,
                last_error,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn push_job(&self, notification_id: i64) -> Result<Option<PushJobStatus>, StoreError> {
        self.check()?;
        Ok(self.inner.lock().push_jobs.get(&notification_id).cloned())
    }

    async fn save_trending_snapshot(
        &self,
        counters: &[TrendingCounter],
        evicted: &[String],
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.inner.lock();
        for hashtag in evicted {
            inner.trending.remove(hashtag);
        }
        for counter in counters {
            inner.trending.insert(counter.hashtag.clone(), counter.clone());
        }
        Ok(())
    }

    async fn load_trending_snapshot(&self) -> Result<Vec<TrendingCounter>, StoreError> {
        self.check()?;
        Ok(self.inner.lock().trending.values().cloned().collect())
    }

    async fn cleanup(&self, cutoffs: RetentionCutoffs) -> Result<CleanupReport, StoreError> {
        self.check()?;
        let mut inner = self.inner.lock();
        let mut report = CleanupReport::default();

        let doomed: Vec<(i64, bool)> = inner
            .notifications
            .values()
            .filter_map(|n| match (n.read_state, n.read_at) {
                (ReadState::Read, Some(read_at)) if read_at < cutoffs.read_before => {
                    Some((n.id, true))
                }
                (ReadState::Unread, _) if n.created_at < cutoffs.unread_before => {
                    Some((n.id, false))
                }
                _ => None,
            })
            .collect();
        for (id, was_read) in doomed {
            if let Some(record) = inner.notifications.remove(&id) {
                inner
                    .notification_keys
                    .remove(&(record.event_id, record.recipient_id));
                if was_read {
                    report.read_deleted += 1;
                } else {
                    report.unread_deleted += 1;
                }
            }
        }

        let old_batches: Vec<i64> = inner
            .batches
            .values()
            .filter(|b| b.sent_at.map_or(false, |at| at < cutoffs.batches_before))
            .map(|b| b.id)
            .collect();
        for batch_id in old_batches {
            inner.batches.remove(&batch_id);
            inner
                .digest_entries
                .retain(|_, e| e.batch_id != Some(batch_id));
            report.batches_deleted += 1;
        }

        Ok(report)
    }
}
