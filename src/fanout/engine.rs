use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::delivery::DeliveryJob;
use crate::event::model::{Event, EventType};
use crate::graph::{GraphError, SocialGraph};
use crate::notification::model::{ChannelSet, NewNotification};
use crate::preference::model::Preference;
use crate::store::{NotificationStore, StoreError};

const FOLLOWER_PAGE_SIZE: usize = 500;
const INSERT_CONCURRENCY: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Social graph error: {0}")]
    Graph(#[from] GraphError),
}

#[derive(Debug, Default)]
pub struct FanoutReport {
    pub event_id: Uuid,
    pub created: usize,
    pub suppressed_duplicates: usize,
    pub skipped_disabled: usize,
    pub skipped_missing: usize,
    /// Duplicates that were stored earlier but never routed; handed out again.
    pub requeued: usize,
    /// Records ready for the delivery router: new ones plus requeued ones.
    pub records: Vec<DeliveryJob>,
}

enum InsertOutcome {
    Created(DeliveryJob),
    Duplicate(Option<DeliveryJob>),
    Missing,
}

/// Turns one event into per-recipient notification records.
pub struct FanoutEngine {
    store: Arc<dyn NotificationStore>,
    graph: Arc<dyn SocialGraph>,
    available: ChannelSet,
}

impl FanoutEngine {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        graph: Arc<dyn SocialGraph>,
        available: ChannelSet,
    ) -> Self {
        Self {
            store,
            graph,
            available,
        }
    }

    pub async fn fanout(&self, event: &Event) -> Result<FanoutReport, FanoutError> {
        let mut report = FanoutReport {
            event_id: event.id,
            ..FanoutReport::default()
        };

        match event.event_type {
            EventType::PostCreated => {
                let mut seen = HashSet::new();
                let mut cursor = None;
                loop {
                    let page = self
                        .graph
                        .followers(event.actor_id, cursor, FOLLOWER_PAGE_SIZE)
                        .await?;
                    let recipients: Vec<Uuid> = page
                        .followers
                        .into_iter()
                        .filter(|id| *id != event.actor_id && seen.insert(*id))
                        .collect();
                    self.deliver_to(event, &recipients, &mut report).await?;

                    match page.next_cursor {
                        Some(next) => cursor = Some(next),
                        None => break,
                    }
                }
            }
            _ => {
                let Some(target) = event.target_id else {
                    return Ok(report);
                };
                if target == event.actor_id {
                    debug!("Skipping self notification for event {}", event.id);
                } else if self.graph.user_exists(target).await? {
                    self.deliver_to(event, &[target], &mut report).await?;
                } else {
                    report.skipped_missing += 1;
                }
            }
        }

        info!(
            "Fan-out of {} event {}: {} created, {} duplicates ({} requeued), {} disabled, {} missing",
            event.event_type.as_str(),
            event.id,
            report.created,
            report.suppressed_duplicates,
            report.requeued,
            report.skipped_disabled,
            report.skipped_missing
        );
        Ok(report)
    }

    async fn deliver_to(
        &self,
        event: &Event,
        recipients: &[Uuid],
        report: &mut FanoutReport,
    ) -> Result<(), FanoutError> {
        if recipients.is_empty() {
            return Ok(());
        }

        let stored = self
            .store
            .preferences_for_many(recipients, event.event_type)
            .await?;

        let mut inserts = Vec::with_capacity(recipients.len());
        for recipient_id in recipients {
            let preference = stored
                .get(recipient_id)
                .cloned()
                .unwrap_or_else(|| Preference::default_for(*recipient_id, event.event_type));
            if preference.is_disabled() {
                report.skipped_disabled += 1;
                continue;
            }
            inserts.push((
                NewNotification {
                    event_id: event.id,
                    recipient_id: *recipient_id,
                    event_type: event.event_type,
                    actor_id: event.actor_id,
                    subject_entity_id: event.subject_entity_id,
                    channel_set: preference.effective_channels(self.available),
                    created_at: event.timestamp,
                },
                preference.digest_frequency,
                preference.quiet_hours(),
            ));
        }

        let results: Vec<Result<InsertOutcome, StoreError>> = stream::iter(inserts)
            .map(|(notification, digest_frequency, quiet_hours)| async move {
                let (event_id, recipient_id) = (notification.event_id, notification.recipient_id);
                match self.store.insert_notification(notification).await {
                    Ok(record) => Ok(InsertOutcome::Created(DeliveryJob {
                        record,
                        digest_frequency,
                        quiet_hours,
                    })),
                    Err(StoreError::Duplicate) => {
                        let unrouted = self
                            .store
                            .find_notification(event_id, recipient_id)
                            .await?
                            .filter(|record| {
                                record.attempted_channels.is_empty() && !record.channel_set.is_empty()
                            });
                        Ok(InsertOutcome::Duplicate(unrouted.map(|record| DeliveryJob {
                            record,
                            digest_frequency,
                            quiet_hours,
                        })))
                    }
                    Err(StoreError::NotFound) => Ok(InsertOutcome::Missing),
                    Err(e) => Err(e),
                }
            })
            .buffer_unordered(INSERT_CONCURRENCY)
            .collect()
            .await;

        for result in results {
            match result? {
                InsertOutcome::Created(job) => {
                    report.created += 1;
                    report.records.push(job);
                }
                InsertOutcome::Duplicate(unrouted) => {
                    report.suppressed_duplicates += 1;
                    if let Some(job) = unrouted {
                        debug!("Requeueing unrouted notification {}", job.record.id);
                        report.requeued += 1;
                        report.records.push(job);
                    }
                }
                InsertOutcome::Missing => {
                    warn!("Recipient vanished during fan-out of {}", event.id);
                    report.skipped_missing += 1;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::memory::MemoryGraph;
    use crate::graph::MockSocialGraph;
    use crate::notification::model::{Channel, NotificationFilter};
    use crate::preference::model::{DigestFrequency, QuietHours};
    use crate::store::memory::MemoryStore;
    use chrono::Utc;

    fn event(event_type: EventType, actor_id: Uuid, target_id: Option<Uuid>) -> Event {
        Event {
            id: Uuid::new_v4(),
            event_type,
            actor_id,
            target_id,
            subject_entity_id: Some(11),
            hashtags: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_post_fans_out_to_all_followers_once() {
        let store = Arc::new(MemoryStore::new());
        let graph = Arc::new(MemoryGraph::new());
        let author = Uuid::new_v4();
        for _ in 0..1200 {
            graph.follow(Uuid::new_v4(), author);
        }

        let engine = FanoutEngine::new(store.clone(), graph, ChannelSet::ALL);
        let post = event(EventType::PostCreated, author, None);

        let first = engine.fanout(&post).await.unwrap();
        assert_eq!(first.created, 1200);
        assert_eq!(first.records.len(), 1200);

        // nothing was routed yet, so a replay hands every record out again
        let second = engine.fanout(&post).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.suppressed_duplicates, 1200);
        assert_eq!(second.requeued, 1200);

        for job in &second.records {
            store
                .record_attempt(job.record.id, Channel::Realtime)
                .await
                .unwrap();
        }
        let third = engine.fanout(&post).await.unwrap();
        assert_eq!(third.suppressed_duplicates, 1200);
        assert_eq!(third.requeued, 0);
        assert!(third.records.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_type_creates_no_record() {
        let store = Arc::new(MemoryStore::new());
        let graph = Arc::new(MemoryGraph::new());
        let (actor, owner) = (Uuid::new_v4(), Uuid::new_v4());
        graph.add_user(owner);

        let mut muted = Preference::default_for(owner, EventType::Liked);
        muted.channel_enabled_set = ChannelSet::EMPTY;
        store.upsert_preference(&muted).await.unwrap();

        let engine = FanoutEngine::new(store.clone(), graph, ChannelSet::ALL);
        let report = engine
            .fanout(&event(EventType::Liked, actor, Some(owner)))
            .await
            .unwrap();

        assert_eq!(report.created, 0);
        assert_eq!(report.skipped_disabled, 1);
        let (records, total) = store
            .list_notifications(owner, &NotificationFilter::default(), 0, 10)
            .await
            .unwrap();
        assert!(records.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_channel_set_respects_preference_and_availability() {
        let store = Arc::new(MemoryStore::new());
        let graph = Arc::new(MemoryGraph::new());
        let (actor, owner) = (Uuid::new_v4(), Uuid::new_v4());
        graph.add_user(owner);

        let mut pref = Preference::default_for(owner, EventType::Commented);
        pref.digest_frequency = DigestFrequency::None;
        pref.quiet_hours_start = Some(22);
        pref.quiet_hours_end = Some(6);
        store.upsert_preference(&pref).await.unwrap();

        let available: ChannelSet = [Channel::Realtime, Channel::Digest].into_iter().collect();
        let engine = FanoutEngine::new(store.clone(), graph, available);
        let report = engine
            .fanout(&event(EventType::Commented, actor, Some(owner)))
            .await
            .unwrap();

        let channels = report.records[0].record.channel_set;
        assert!(channels.contains(Channel::Realtime));
        assert!(!channels.contains(Channel::Digest));
        assert!(!channels.contains(Channel::WebPush));
        assert_eq!(
            report.records[0].quiet_hours,
            Some(QuietHours {
                start_hour: 22,
                end_hour: 6
            })
        );
    }

    #[tokio::test]
    async fn test_self_and_missing_targets_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let graph = Arc::new(MemoryGraph::new());
        let actor = Uuid::new_v4();
        graph.add_user(actor);
        let engine = FanoutEngine::new(store.clone(), graph, ChannelSet::ALL);

        let own = engine
            .fanout(&event(EventType::Liked, actor, Some(actor)))
            .await
            .unwrap();
        assert_eq!(own.created, 0);
        assert_eq!(own.skipped_missing, 0);

        let ghost = engine
            .fanout(&event(EventType::Followed, actor, Some(Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(ghost.created, 0);
        assert_eq!(ghost.skipped_missing, 1);
    }

    #[tokio::test]
    async fn test_store_outage_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        let mut graph = MockSocialGraph::new();
        graph.expect_user_exists().returning(|_| Ok(true));
        store.set_unavailable(true);

        let engine = FanoutEngine::new(store.clone(), Arc::new(graph), ChannelSet::ALL);
        let result = engine
            .fanout(&event(EventType::Mentioned, Uuid::new_v4(), Some(Uuid::new_v4())))
            .await;
        assert!(matches!(
            result,
            Err(FanoutError::Store(StoreError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_graph_failure_propagates() {
        let store = Arc::new(MemoryStore::new());
        let mut graph = MockSocialGraph::new();
        graph
            .expect_followers()
            .returning(|_, _, _| Err(GraphError::Unavailable("timeout".to_string())));

        let engine = FanoutEngine::new(store, Arc::new(graph), ChannelSet::ALL);
        let result = engine
            .fanout(&event(EventType::PostCreated, Uuid::new_v4(), None))
            .await;
        assert!(matches!(result, Err(FanoutError::Graph(_))));
    }
}
