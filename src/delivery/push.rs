use std::sync::Arc;
use tracing::{debug, error, warn};

use super::model::{DeliveryError, NotificationMessage, PushError, PushJobState};
use super::retry::RetryPolicy;
use super::sender::PushSender;
use crate::notification::model::NotificationRecord;
use crate::store::NotificationStore;

/// Runs one push job: every active subscription of the recipient, retried with backoff.
pub struct PushDispatcher {
    store: Arc<dyn NotificationStore>,
    sender: Arc<dyn PushSender>,
    policy: RetryPolicy,
}

impl PushDispatcher {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        sender: Arc<dyn PushSender>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            sender,
            policy,
        }
    }

    /// Only subscriptions that failed transiently are retried. A `Gone` endpoint is
    /// deactivated and never retried. Exhaustion is persisted and logged.
    pub async fn deliver(&self, record: &NotificationRecord) -> Result<PushJobState, DeliveryError> {
        self.store
            .record_push_job(record.id, PushJobState::Queued, 0, None)
            .await?;

        let mut pending = self
            .store
            .active_push_subscriptions(record.recipient_id)
            .await?;
        if pending.is_empty() {
            self.store
                .record_push_job(record.id, PushJobState::NoSubscriptions, 0, None)
                .await?;
            return Ok(PushJobState::NoSubscriptions);
        }

        let message = NotificationMessage::from_record(record);
        let mut attempts = 0;
        let mut delivered = 0;
        let mut last_error = String::new();

        loop {
            attempts += 1;
            let mut failed = Vec::new();

            for subscription in pending {
                match self.sender.send(&subscription, &message).await {
                    Ok(()) => delivered += 1,
                    Err(PushError::Gone) => {
                        debug!(
                            "Push subscription {} is gone, deactivating",
                            subscription.id
                        );
                        self.store
                            .deactivate_push_subscription(subscription.id)
                            .await?;
                    }
                    Err(PushError::Unreachable(e)) => {
                        last_error = e;
                        failed.push(subscription);
                    }
                }
            }

            pending = failed;
            if pending.is_empty() || !self.policy.should_retry(attempts) {
                break;
            }

            let delay = self.policy.delay_for(attempts);
            warn!(
                "Push for notification {} failed on attempt {}, retrying in {:?}",
                record.id, attempts, delay
            );
            tokio::time::sleep(delay).await;
        }

        if pending.is_empty() {
            let state = if delivered > 0 {
                PushJobState::Delivered
            } else {
                PushJobState::NoSubscriptions
            };
            self.store
                .record_push_job(record.id, state, attempts, None)
                .await?;
            return Ok(state);
        }

        error!(
            "Push for notification {} failed after {} attempts ({} delivered, {} unreachable): {}",
            record.id,
            attempts,
            delivered,
            pending.len(),
            last_error
        );
        self.store
            .record_push_job(
                record.id,
                PushJobState::Failed,
                attempts,
                Some(last_error.clone()),
            )
            .await?;

        Err(DeliveryError::Exhausted {
            attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::retry::RetryConfig;
    use crate::delivery::sender::MockPushSender;
    use crate::event::model::EventType;
    use crate::notification::model::{ChannelSet, NewNotification};
    use crate::store::memory::MemoryStore;
    use chrono::Utc;
    use std::time::Duration;
    use uuid::Uuid;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
            jitter: false,
        })
    }

    async fn seeded_record(store: &MemoryStore) -> NotificationRecord {
        store
            .insert_notification(NewNotification {
                event_id: Uuid::new_v4(),
                recipient_id: Uuid::new_v4(),
                event_type: EventType::Liked,
                actor_id: Uuid::new_v4(),
                subject_entity_id: Some(1),
                channel_set: ChannelSet::ALL,
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_push_fails_after_five_attempts_and_is_recorded() {
        let store = Arc::new(MemoryStore::new());
        let record = seeded_record(&store).await;
        store
            .upsert_push_subscription(record.recipient_id, "https://push/x", "p", "a")
            .await
            .unwrap();

        let mut sender = MockPushSender::new();
        sender
            .expect_send()
            .times(5)
            .returning(|_, _| Err(PushError::Unreachable("connection refused".to_string())));

        let dispatcher = PushDispatcher::new(store.clone(), Arc::new(sender), fast_policy());
        let result = dispatcher.deliver(&record).await;
        assert!(matches!(
            result,
            Err(DeliveryError::Exhausted { attempts: 5, .. })
        ));

        let job = store.push_job(record.id).await.unwrap().unwrap();
        assert_eq!(job.state, PushJobState::Failed);
        assert_eq!(job.attempts, 5);
        assert_eq!(job.last_error.as_deref(), Some("connection refused"));
        assert!(store.get_notification(record.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_push_recovers_after_transient_failure() {
        let store = Arc::new(MemoryStore::new());
        let record = seeded_record(&store).await;
        store
            .upsert_push_subscription(record.recipient_id, "https://push/x", "p", "a")
            .await
            .unwrap();

        let mut sender = MockPushSender::new();
        let mut seq = mockall::Sequence::new();
        sender
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(PushError::Unreachable("503".to_string())));
        sender
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let dispatcher = PushDispatcher::new(store.clone(), Arc::new(sender), fast_policy());
        assert_eq!(
            dispatcher.deliver(&record).await.unwrap(),
            PushJobState::Delivered
        );
        assert_eq!(store.push_job(record.id).await.unwrap().unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn test_gone_subscription_is_deactivated_without_retry() {
        let store = Arc::new(MemoryStore::new());
        let record = seeded_record(&store).await;
        store
            .upsert_push_subscription(record.recipient_id, "https://push/old", "p", "a")
            .await
            .unwrap();

        let mut sender = MockPushSender::new();
        sender
            .expect_send()
            .times(1)
            .returning(|_, _| Err(PushError::Gone));

        let dispatcher = PushDispatcher::new(store.clone(), Arc::new(sender), fast_policy());
        assert_eq!(
            dispatcher.deliver(&record).await.unwrap(),
            PushJobState::NoSubscriptions
        );
        assert!(store
            .active_push_subscriptions(record.recipient_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_no_subscriptions_skips_sender() {
        let store = Arc::new(MemoryStore::new());
        let record = seeded_record(&store).await;
        let sender = MockPushSender::new();

        let dispatcher = PushDispatcher::new(store.clone(), Arc::new(sender), fast_policy());
        assert_eq!(
            dispatcher.deliver(&record).await.unwrap(),
            PushJobState::NoSubscriptions
        );
    }
}
