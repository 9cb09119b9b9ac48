use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::model::{DeliveryError, NotificationMessage, PushJobState};
use super::push::PushDispatcher;
use super::retry::{RetryConfig, RetryPolicy};
use super::DeliveryJob;
use crate::notification::model::{Channel, ChannelSet, NotificationRecord};
use crate::preference::model::DigestFrequency;
use crate::store::NotificationStore;

/// Real-time transport. Returns how many connections (or subscribers) were reached.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RealtimePublisher: Send + Sync {
    async fn publish(
        &self,
        recipient_id: Uuid,
        message: &NotificationMessage,
    ) -> Result<usize, DeliveryError>;
}

/// What the router did with one record.
#[derive(Debug)]
pub struct RouteOutcome {
    pub attempted: ChannelSet,
    pub realtime_reached: usize,
    /// Immediate channels held back by the recipient's quiet hours.
    pub silenced: ChannelSet,
    /// Background push job, if one was started.
    pub push_job: Option<JoinHandle<Option<PushJobState>>>,
}

/// Dispatches a record to every channel in its channel set. Real-time first.
/// During the recipient's quiet hours only the digest is written.
pub struct DeliveryRouter {
    store: Arc<dyn NotificationStore>,
    realtime: Arc<dyn RealtimePublisher>,
    push: Arc<PushDispatcher>,
    push_slots: Arc<Semaphore>,
    digest_retry: RetryPolicy,
}

impl DeliveryRouter {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        realtime: Arc<dyn RealtimePublisher>,
        push: Arc<PushDispatcher>,
        push_concurrency: usize,
    ) -> Self {
        Self {
            store,
            realtime,
            push,
            push_slots: Arc::new(Semaphore::new(push_concurrency.max(1))),
            digest_retry: RetryPolicy::new(RetryConfig {
                max_attempts: u32::MAX,
                initial_delay: Duration::from_millis(200),
                max_delay: Duration::from_secs(60),
                ..RetryConfig::default()
            }),
        }
    }

    pub async fn route(&self, job: &DeliveryJob) -> RouteOutcome {
        self.route_at(job, Utc::now()).await
    }

    pub async fn route_at(&self, job: &DeliveryJob, now: DateTime<Utc>) -> RouteOutcome {
        let record = &job.record;
        let mut outcome = RouteOutcome {
            attempted: ChannelSet::EMPTY,
            realtime_reached: 0,
            silenced: ChannelSet::EMPTY,
            push_job: None,
        };

        let mut channels = record.channel_set;
        if job.quiet_hours.map_or(false, |quiet| quiet.contains(now)) {
            for channel in [Channel::Realtime, Channel::WebPush] {
                if channels.contains(channel) {
                    channels.remove(channel);
                    outcome.silenced.insert(channel);
                }
            }
            debug!("Quiet hours for {}, skipping immediate channels", record.recipient_id);
        }

        if channels.contains(Channel::Realtime) {
            let message = NotificationMessage::from_record(record);
            match self.realtime.publish(record.recipient_id, &message).await {
                Ok(reached) => {
                    outcome.realtime_reached = reached;
                    debug!(
                        "Notification {} reached {} live connection(s)",
                        record.id, reached
                    );
                }
                // At-most-once: a missed real-time message is not retried.
                Err(e) => warn!("Real-time publish for {} failed: {}", record.id, e),
            }
            self.mark_attempted(record.id, Channel::Realtime, &mut outcome.attempted)
                .await;
        }

        if channels.contains(Channel::WebPush) {
            outcome.push_job = self.spawn_push(record.clone()).await;
            self.mark_attempted(record.id, Channel::WebPush, &mut outcome.attempted)
                .await;
        }

        if channels.contains(Channel::Digest) {
            self.append_digest(record, job.digest_frequency).await;
            self.mark_attempted(record.id, Channel::Digest, &mut outcome.attempted)
                .await;
        }

        outcome
    }

    async fn mark_attempted(&self, notification_id: i64, channel: Channel, attempted: &mut ChannelSet) {
        attempted.insert(channel);
        if let Err(e) = self.store.record_attempt(notification_id, channel).await {
            warn!(
                "Could not record {} attempt for notification {}: {}",
                channel.as_str(),
                notification_id,
                e
            );
        }
    }

    /// Waits for a free push slot before spawning, so a push backlog holds up the
    /// delivery worker instead of piling up parked tasks.
    async fn spawn_push(
        &self,
        record: NotificationRecord,
    ) -> Option<JoinHandle<Option<PushJobState>>> {
        let permit = match self.push_slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("Push slots closed, dropping push for {}: {}", record.id, e);
                return None;
            }
        };
        let push = self.push.clone();
        Some(tokio::spawn(async move {
            let _permit = permit;
            match push.deliver(&record).await {
                Ok(state) => Some(state),
                Err(DeliveryError::Exhausted { .. }) => Some(PushJobState::Failed),
                Err(e) => {
                    error!("Push job for notification {} aborted: {}", record.id, e);
                    None
                }
            }
        }))
    }

    /// Digest entries are never dropped: a failed append keeps retrying in the background.
    async fn append_digest(&self, record: &NotificationRecord, frequency: DigestFrequency) {
        let first = match self.store.enqueue_digest(record, frequency).await {
            Ok(()) => return,
            Err(e) => e,
        };
        warn!(
            "Digest append for notification {} failed, retrying in background: {}",
            record.id, first
        );

        let store = self.store.clone();
        let policy = self.digest_retry.clone();
        let record = record.clone();
        tokio::spawn(async move {
            let mut attempt = 1;
            loop {
                tokio::time::sleep(policy.delay_for(attempt)).await;
                match store.enqueue_digest(&record, frequency).await {
                    Ok(()) => {
                        debug!(
                            "Digest append for notification {} succeeded on attempt {}",
                            record.id,
                            attempt + 1
                        );
                        return;
                    }
                    Err(e) => {
                        attempt = attempt.saturating_add(1);
                        warn!(
                            "Digest append for notification {} still failing: {}",
                            record.id, e
                        );
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::sender::MockPushSender;
    use crate::event::model::EventType;
    use crate::notification::model::NewNotification;
    use crate::preference::model::QuietHours;
    use crate::store::memory::MemoryStore;
    use chrono::TimeZone;

    async fn record_with(store: &MemoryStore, channels: ChannelSet) -> NotificationRecord {
        store
            .insert_notification(NewNotification {
                event_id: Uuid::new_v4(),
                recipient_id: Uuid::new_v4(),
                event_type: EventType::Mentioned,
                actor_id: Uuid::new_v4(),
                subject_entity_id: Some(9),
                channel_set: channels,
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    fn job(
        record: &NotificationRecord,
        digest_frequency: DigestFrequency,
        quiet_hours: Option<QuietHours>,
    ) -> DeliveryJob {
        DeliveryJob {
            record: record.clone(),
            digest_frequency,
            quiet_hours,
        }
    }

    fn at_hour(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, hour, 15, 0).unwrap()
    }

    fn router(
        store: Arc<MemoryStore>,
        realtime: MockRealtimePublisher,
        sender: MockPushSender,
    ) -> DeliveryRouter {
        let push = PushDispatcher::new(
            store.clone(),
            Arc::new(sender),
            RetryPolicy::new(RetryConfig {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                jitter: false,
                ..RetryConfig::default()
            }),
        );
        DeliveryRouter::new(store, Arc::new(realtime), Arc::new(push), 4)
    }

    #[tokio::test]
    async fn test_routes_only_selected_channels() {
        let store = Arc::new(MemoryStore::new());
        let channels: ChannelSet = [Channel::Realtime, Channel::Digest].into_iter().collect();
        let record = record_with(&store, channels).await;

        let mut realtime = MockRealtimePublisher::new();
        realtime.expect_publish().times(1).returning(|_, _| Ok(1));
        let sender = MockPushSender::new();

        let outcome = router(store.clone(), realtime, sender)
            .route(&job(&record, DigestFrequency::Daily, None))
            .await;

        assert_eq!(outcome.attempted, channels);
        assert_eq!(outcome.realtime_reached, 1);
        assert!(outcome.push_job.is_none());
        assert_eq!(
            store.digest_recipients(DigestFrequency::Daily).await.unwrap(),
            vec![record.recipient_id]
        );
        let stored = store.get_notification(record.id).await.unwrap().unwrap();
        assert_eq!(stored.attempted_channels, channels);
    }

    #[tokio::test]
    async fn test_realtime_failure_does_not_block_other_channels() {
        let store = Arc::new(MemoryStore::new());
        let record = record_with(&store, ChannelSet::ALL).await;
        store
            .upsert_push_subscription(record.recipient_id, "https://push/a", "p", "a")
            .await
            .unwrap();

        let mut realtime = MockRealtimePublisher::new();
        realtime
            .expect_publish()
            .returning(|_, _| Err(DeliveryError::ChannelUnreachable("redis down".to_string())));
        let mut sender = MockPushSender::new();
        sender.expect_send().times(1).returning(|_, _| Ok(()));

        let outcome = router(store.clone(), realtime, sender)
            .route(&job(&record, DigestFrequency::Weekly, None))
            .await;

        assert_eq!(outcome.attempted, ChannelSet::ALL);
        let state = outcome.push_job.unwrap().await.unwrap();
        assert_eq!(state, Some(PushJobState::Delivered));
    }

    #[tokio::test]
    async fn test_offline_recipient_realtime_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let channels: ChannelSet = [Channel::Realtime].into_iter().collect();
        let record = record_with(&store, channels).await;

        let registry = Arc::new(crate::websocket::registry::ConnectionRegistry::new());
        let push = PushDispatcher::new(
            store.clone(),
            Arc::new(MockPushSender::new()),
            RetryPolicy::new(RetryConfig::default()),
        );
        let router = DeliveryRouter::new(store.clone(), registry, Arc::new(push), 1);

        let outcome = router.route(&job(&record, DigestFrequency::None, None)).await;
        assert_eq!(outcome.realtime_reached, 0);
        assert!(outcome.attempted.contains(Channel::Realtime));
    }
    #[tokio::test]
    async fn test_quiet_hours_keep_only_the_digest() {
        let store = Arc::new(MemoryStore::new());
        let record = record_with(&store, ChannelSet::ALL).await;
        store
            .upsert_push_subscription(record.recipient_id, "https://push/a", "p", "a")
            .await
            .unwrap();

        let mut realtime = MockRealtimePublisher::new();
        realtime.expect_publish().times(0);
        let mut sender = MockPushSender::new();
        sender.expect_send().times(0);

        let night = QuietHours::validate(22, 7).unwrap();
        let outcome = router(store.clone(), realtime, sender)
            .route_at(&job(&record, DigestFrequency::Daily, Some(night)), at_hour(2))
            .await;

        let immediate: ChannelSet = [Channel::Realtime, Channel::WebPush].into_iter().collect();
        assert_eq!(outcome.silenced, immediate);
        assert_eq!(outcome.attempted.iter().collect::<Vec<_>>(), vec![Channel::Digest]);
        assert!(outcome.push_job.is_none());
        assert_eq!(
            store.digest_recipients(DigestFrequency::Daily).await.unwrap(),
            vec![record.recipient_id]
        );
    }

    #[tokio::test]
    async fn test_outside_quiet_hours_routes_everything() {
        let store = Arc::new(MemoryStore::new());
        let record = record_with(&store, ChannelSet::ALL).await;
        store
            .upsert_push_subscription(record.recipient_id, "https://push/a", "p", "a")
            .await
            .unwrap();

        let mut realtime = MockRealtimePublisher::new();
        realtime.expect_publish().times(1).returning(|_, _| Ok(1));
        let mut sender = MockPushSender::new();
        sender.expect_send().times(1).returning(|_, _| Ok(()));

        let night = QuietHours::validate(22, 7).unwrap();
        let outcome = router(store.clone(), realtime, sender)
            .route_at(&job(&record, DigestFrequency::Daily, Some(night)), at_hour(12))
            .await;

        assert_eq!(outcome.silenced, ChannelSet::EMPTY);
        assert_eq!(outcome.attempted, ChannelSet::ALL);
        assert_eq!(
            outcome.push_job.unwrap().await.unwrap(),
            Some(PushJobState::Delivered)
        );
    }

    #[tokio::test]
    async fn test_push_waits_for_a_free_slot_before_spawning() {
        let store = Arc::new(MemoryStore::new());
        let channels: ChannelSet = [Channel::WebPush].into_iter().collect();
        let record = record_with(&store, channels).await;
        store
            .upsert_push_subscription(record.recipient_id, "https://push/a", "p", "a")
            .await
            .unwrap();

        let mut sender = MockPushSender::new();
        sender.expect_send().times(1).returning(|_, _| Ok(()));
        let push = PushDispatcher::new(
            store.clone(),
            Arc::new(sender),
            RetryPolicy::new(RetryConfig::default()),
        );
        let router = Arc::new(DeliveryRouter::new(
            store.clone(),
            Arc::new(MockRealtimePublisher::new()),
            Arc::new(push),
            1,
        ));

        let held = router.push_slots.clone().acquire_owned().await.unwrap();
        let routing = tokio::spawn({
            let router = router.clone();
            let job = job(&record, DigestFrequency::None, None);
            async move { router.route(&job).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!routing.is_finished());
        assert!(store.push_job(record.id).await.unwrap().is_none());

        drop(held);
        let outcome = routing.await.unwrap();
        assert_eq!(
            outcome.push_job.unwrap().await.unwrap(),
            Some(PushJobState::Delivered)
        );
        assert_eq!(router.push_slots.available_permits(), 1);
    }
}
