use chrono::{DateTime, Utc};
use html_escape::encode_text;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::model::{ClaimedBatch, DigestEmail, DigestEntry, DigestError, DigestRunReport};
use super::schedule::period_key;
use crate::delivery::model::DeliveryError;
use crate::delivery::retry::RetryPolicy;
use crate::delivery::sender::EmailSender;
use crate::event::model::EventType;
use crate::preference::model::DigestFrequency;
use crate::store::NotificationStore;

/// Items listed per event type before collapsing into "and N more".
const ITEMS_PER_GROUP: usize = 10;

pub struct DigestAggregator {
    store: Arc<dyn NotificationStore>,
    email: Arc<dyn EmailSender>,
    retry: RetryPolicy,
}

impl DigestAggregator {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        email: Arc<dyn EmailSender>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            email,
            retry,
        }
    }

    /// Sends one digest per recipient with pending entries of `frequency`.
    /// Per-recipient failures are counted and left for the next run.
    pub async fn run(
        &self,
        frequency: DigestFrequency,
        now: DateTime<Utc>,
    ) -> Result<DigestRunReport, DigestError> {
        let key = period_key(frequency, now)?;
        let recipients = self.store.digest_recipients(frequency).await?;

        let mut report = DigestRunReport {
            frequency: Some(frequency),
            period_key: key.clone(),
            recipients: recipients.len(),
            ..DigestRunReport::default()
        };

        for recipient_id in recipients {
            match self.send_for(recipient_id, frequency, &key, now).await {
                Ok(Some(consumed)) => {
                    report.batches_sent += 1;
                    report.entries_consumed += consumed;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(
                        "Digest {} for user {} failed: {}",
                        key, recipient_id, e
                    );
                    report.failures += 1;
                }
            }
        }

        info!(
            "Digest run {}: {} recipients, {} sent, {} entries, {} failures",
            key, report.recipients, report.batches_sent, report.entries_consumed, report.failures
        );
        Ok(report)
    }

    async fn send_for(
        &self,
        recipient_id: Uuid,
        frequency: DigestFrequency,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<usize>, DigestError> {
        let Some(claimed) = self
            .store
            .claim_digest_batch(recipient_id, frequency, key, now)
            .await?
        else {
            debug!("Nothing to send to {} for {}", recipient_id, key);
            return Ok(None);
        };

        if claimed.resumed {
            warn!(
                "Re-dispatching unsent digest batch {} ({})",
                claimed.batch.id,
                claimed.dedupe_key()
            );
        }

        let email = render(&claimed);
        self.send_with_retry(&email).await?;
        self.store
            .complete_digest_batch(claimed.batch.id, &email.subject, now)
            .await?;

        Ok(Some(claimed.entries.len()))
    }

    async fn send_with_retry(&self, email: &DigestEmail) -> Result<(), DeliveryError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.email.send(email).await {
                Ok(()) => return Ok(()),
                Err(e) if self.retry.should_retry(attempts) => {
                    let delay = self.retry.delay_for(attempts);
                    warn!(
                        "Digest email {} failed ({}), retrying in {:?}",
                        email.dedupe_key, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(DeliveryError::Exhausted {
                        attempts,
                        last_error: e.to_string(),
                    })
                }
            }
        }
    }
}

fn describe(entry: &DigestEntry) -> String {
    let subject = entry
        .subject_entity_id
        .map(|id| format!(" #{}", id))
        .unwrap_or_default();
    match entry.event_type {
        EventType::PostCreated => format!("{} published a new post{}", entry.actor_id, subject),
        EventType::Liked => format!("{} liked your post{}", entry.actor_id, subject),
        EventType::Followed => format!("{} started following you", entry.actor_id),
        EventType::Mentioned => format!("{} mentioned you in post{}", entry.actor_id, subject),
        EventType::Commented => format!("{} commented on your post{}", entry.actor_id, subject),
        EventType::Retweeted => format!("{} retweeted your post{}", entry.actor_id, subject),
    }
}

/// Builds the summary e-mail: one section per event type, newest items first.
pub fn render(claimed: &ClaimedBatch) -> DigestEmail {
    let mut groups: BTreeMap<EventType, Vec<&DigestEntry>> = BTreeMap::new();
    for entry in &claimed.entries {
        groups.entry(entry.event_type).or_default().push(entry);
    }

    let total = claimed.entries.len();
    let label = match claimed.batch.frequency {
        DigestFrequency::Daily => "daily",
        DigestFrequency::Weekly => "weekly",
        DigestFrequency::Monthly => "monthly",
        DigestFrequency::None => "",
    };
    let noun = if total == 1 {
        "notification"
    } else {
        "notifications"
    };
    let subject = format!("Your {} digest - {} new {}", label, total, noun);

    let mut html = format!("<h1>{}</h1>\n", encode_text(&subject));
    let mut text = format!("{}\n", subject);

    for (event_type, mut entries) in groups {
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let heading = event_type.digest_heading();
        html.push_str(&format!(
            "<h2>{} ({})</h2>\n<ul>\n",
            encode_text(heading),
            entries.len()
        ));
        text.push_str(&format!("\n{} ({})\n", heading, entries.len()));

        for entry in entries.iter().take(ITEMS_PER_GROUP) {
            let line = describe(entry);
            html.push_str(&format!("<li>{}</li>\n", encode_text(&line)));
            text.push_str(&format!("- {}\n", line));
        }
        if entries.len() > ITEMS_PER_GROUP {
            let more = format!("and {} more", entries.len() - ITEMS_PER_GROUP);
            html.push_str(&format!("<li>{}</li>\n", more));
            text.push_str(&format!("  {}\n", more));
        }
        html.push_str("</ul>\n");
    }

    DigestEmail {
        recipient_id: claimed.batch.recipient_id,
        dedupe_key: claimed.dedupe_key(),
        subject,
        html_body: html,
        text_body: text,
        entry_count: total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::retry::RetryConfig;
    use crate::delivery::sender::MockEmailSender;
    use crate::notification::model::{ChannelSet, NewNotification};
    use crate::store::memory::MemoryStore;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: false,
            ..RetryConfig::default()
        })
    }

    async fn queue_entries(store: &MemoryStore, recipient: Uuid, event_type: EventType, count: usize) {
        for _ in 0..count {
            let record = store
                .insert_notification(NewNotification {
                    event_id: Uuid::new_v4(),
                    recipient_id: recipient,
                    event_type,
                    actor_id: Uuid::new_v4(),
                    subject_entity_id: Some(3),
                    channel_set: ChannelSet::ALL,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
            store
                .enqueue_digest(&record, DigestFrequency::Daily)
                .await
                .unwrap();
        }
    }

    fn morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_daily_digest_sends_once_then_nothing() {
        let store = Arc::new(MemoryStore::new());
        let recipient = Uuid::new_v4();
        queue_entries(&store, recipient, EventType::Liked, 3).await;

        let sent = Arc::new(Mutex::new(Vec::new()));
        let captured = sent.clone();
        let mut email = MockEmailSender::new();
        email.expect_send().times(1).returning(move |mail| {
            captured.lock().push(mail.clone());
            Ok(())
        });

        let aggregator = DigestAggregator::new(store.clone(), Arc::new(email), fast_retry(3));
        let first = aggregator.run(DigestFrequency::Daily, morning()).await.unwrap();
        assert_eq!(first.batches_sent, 1);
        assert_eq!(first.entries_consumed, 3);

        let second = aggregator.run(DigestFrequency::Daily, morning()).await.unwrap();
        assert_eq!(second.batches_sent, 0);
        assert_eq!(second.recipients, 0);

        let sent = sent.lock();
        assert_eq!(sent[0].entry_count, 3);
        assert_eq!(sent[0].dedupe_key, format!("digest:{}:daily:2024-03-05", recipient));
        assert!(sent[0].subject.contains("3 new notifications"));
    }

    #[tokio::test]
    async fn test_failed_send_is_resumed_with_same_dedupe_key() {
        let store = Arc::new(MemoryStore::new());
        let recipient = Uuid::new_v4();
        queue_entries(&store, recipient, EventType::Commented, 2).await;

        let keys = Arc::new(Mutex::new(Vec::new()));
        let mut email = MockEmailSender::new();
        let mut seq = mockall::Sequence::new();
        let first_keys = keys.clone();
        email
            .expect_send()
            .times(2)
            .in_sequence(&mut seq)
            .returning(move |mail| {
                first_keys.lock().push(mail.dedupe_key.clone());
                Err(DeliveryError::ChannelUnreachable("smtp down".to_string()))
            });
        let second_keys = keys.clone();
        email
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |mail| {
                second_keys.lock().push(mail.dedupe_key.clone());
                Ok(())
            });

        let aggregator = DigestAggregator::new(store.clone(), Arc::new(email), fast_retry(2));
        let failed = aggregator.run(DigestFrequency::Daily, morning()).await.unwrap();
        assert_eq!(failed.failures, 1);
        assert_eq!(failed.batches_sent, 0);

        // new entry arriving after the claim waits for a later batch
        queue_entries(&store, recipient, EventType::Liked, 1).await;

        let later = morning() + chrono::Duration::hours(1);
        let resumed = aggregator.run(DigestFrequency::Daily, later).await.unwrap();
        assert_eq!(resumed.batches_sent, 1);
        assert_eq!(resumed.entries_consumed, 2);

        let keys = keys.lock();
        assert_eq!(keys.len(), 3);
        assert!(keys.iter().all(|k| k == &keys[0]));
    }

    #[test]
    fn test_render_groups_and_escapes() {
        let recipient = Uuid::new_v4();
        let entry = |event_type| DigestEntry {
            id: 1,
            recipient_id: recipient,
            notification_id: 1,
            event_type,
            actor_id: Uuid::nil(),
            subject_entity_id: Some(5),
            frequency: DigestFrequency::Weekly,
            created_at: Utc::now(),
            batch_id: Some(1),
            consumed_at: None,
        };
        let claimed = ClaimedBatch {
            batch: crate::digest::model::DigestBatch {
                id: 1,
                recipient_id: recipient,
                frequency: DigestFrequency::Weekly,
                period_key: "weekly:2024-W10".to_string(),
                created_at: Utc::now(),
                sent_at: None,
            },
            entries: vec![
                entry(EventType::Liked),
                entry(EventType::Liked),
                entry(EventType::Followed),
            ],
            resumed: false,
        };

        let email = render(&claimed);
        assert_eq!(email.entry_count, 3);
        assert!(email.subject.starts_with("Your weekly digest"));
        assert!(email.html_body.contains("<h2>Likes (2)</h2>"));
        assert!(email.html_body.contains("<h2>New followers (1)</h2>"));
        assert!(email.text_body.contains("started following you"));
        assert_eq!(
            email.dedupe_key,
            format!("digest:{}:weekly:2024-W10", recipient)
        );
    }
}
