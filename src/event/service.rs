use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::delivery::DeliveryQueue;
use crate::event::model::{Event, EventError, EventType, SubmitEventRequest, SubmitEventResponse};
use crate::fanout::FanoutEngine;
use crate::notification::service::NotificationService;
use crate::store::{NotificationStore, StoreError};
use crate::trending::model::{extract_hashtags, normalize_hashtag};
use crate::trending::service::TrendingService;

const MAX_CONTENT_LEN: usize = 10_000;
const MAX_HASHTAGS: usize = 30;
const MAX_CLOCK_SKEW_SECS: i64 = 300;

/// Ingestion entry point: validate, persist, fan out, then hand records to delivery.
pub struct EventService {
    store: Arc<dyn NotificationStore>,
    fanout: Arc<FanoutEngine>,
    trending: Arc<TrendingService>,
    notifications: Arc<NotificationService>,
    delivery: DeliveryQueue,
}

impl EventService {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        fanout: Arc<FanoutEngine>,
        trending: Arc<TrendingService>,
        notifications: Arc<NotificationService>,
        delivery: DeliveryQueue,
    ) -> Self {
        Self {
            store,
            fanout,
            trending,
            notifications,
            delivery,
        }
    }

    /// Returns once every record is durable. Delivery continues on the work queue.
    /// Re-submitting an event re-runs fan-out over the stored copy, which fills gaps
    /// and requeues records that were never routed. An id already used by a different
    /// event is a conflict.
    pub async fn submit(
        &self,
        actor_id: Uuid,
        request: SubmitEventRequest,
    ) -> Result<SubmitEventResponse, EventError> {
        let submitted = build_event(actor_id, request)?;

        let inserted = self.store.insert_event(&submitted).await?;
        let event = if inserted {
            submitted
        } else {
            let stored = self
                .store
                .get_event(submitted.id)
                .await?
                .ok_or(StoreError::NotFound)?;
            if !stored.same_as(&submitted) {
                warn!(
                    "Rejecting event {} from {}: id belongs to a different event",
                    submitted.id, actor_id
                );
                return Err(EventError::Conflict(format!(
                    "event id {} is already used by a different event",
                    submitted.id
                )));
            }
            stored
        };
        let hashtags = if inserted && event.event_type == EventType::PostCreated {
            self.trending.record_all(&event.hashtags, event.timestamp)
        } else {
            Vec::new()
        };

        let report = self.fanout.fanout(&event).await?;

        let recipients: Vec<Uuid> = report
            .records
            .iter()
            .map(|job| job.record.recipient_id)
            .collect();
        self.notifications.invalidate_unread(&recipients).await;

        for job in report.records {
            let id = job.record.id;
            if let Err(e) = self.delivery.enqueue(job).await {
                warn!("Notification {} stored but not queued for delivery: {}", id, e);
            }
        }

        info!(
            "Accepted {} event {} from {} (new: {})",
            event.event_type.as_str(),
            event.id,
            actor_id,
            inserted
        );

        Ok(SubmitEventResponse {
            event_id: event.id,
            accepted: inserted,
            notifications_created: report.created,
            duplicates_suppressed: report.suppressed_duplicates,
            notifications_requeued: report.requeued,
            skipped_disabled: report.skipped_disabled,
            skipped_missing: report.skipped_missing,
            hashtags,
        })
    }
}

fn build_event(actor_id: Uuid, request: SubmitEventRequest) -> Result<Event, EventError> {
    let event_type = request.event_type;
    if event_type.requires_target() && request.target_id.is_none() {
        return Err(EventError::ValidationError(format!(
            "{} events need a target_id",
            event_type.as_str()
        )));
    }
    if event_type.requires_subject() && request.subject_entity_id.is_none() {
        return Err(EventError::ValidationError(format!(
            "{} events need a subject_entity_id",
            event_type.as_str()
        )));
    }

    let now = Utc::now();
    let timestamp = request.timestamp.unwrap_or(now);
    if timestamp > now + Duration::seconds(MAX_CLOCK_SKEW_SECS) {
        return Err(EventError::ValidationError(
            "timestamp is in the future".to_string(),
        ));
    }

    let content = request.content.unwrap_or_default();
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(EventError::ValidationError(format!(
            "content exceeds {} characters",
            MAX_CONTENT_LEN
        )));
    }

    let mut hashtags = extract_hashtags(&content);
    for raw in &request.hashtags {
        let tag = normalize_hashtag(raw)
            .ok_or_else(|| EventError::ValidationError(format!("invalid hashtag: {}", raw)))?;
        if !hashtags.contains(&tag) {
            hashtags.push(tag);
        }
    }
    if hashtags.len() > MAX_HASHTAGS {
        return Err(EventError::ValidationError(format!(
            "at most {} hashtags per event",
            MAX_HASHTAGS
        )));
    }

    Ok(Event {
        id: request.id.unwrap_or_else(Uuid::new_v4),
        event_type,
        actor_id,
        target_id: request.target_id,
        subject_entity_id: request.subject_entity_id,
        hashtags,
        timestamp,
    })
}
