use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::delivery::model::DeliveryError;
use crate::event::model::EventType;
use crate::preference::model::DigestFrequency;
use crate::store::StoreError;

/// One notification waiting in a recipient's digest queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestEntry {
    pub id: i64,
    pub recipient_id: Uuid,
    pub notification_id: i64,
    pub event_type: EventType,
    pub actor_id: Uuid,
    pub subject_entity_id: Option<i64>,
    pub frequency: DigestFrequency,
    pub created_at: DateTime<Utc>,
    pub batch_id: Option<i64>,
    pub consumed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestBatch {
    pub id: i64,
    pub recipient_id: Uuid,
    pub frequency: DigestFrequency,
    pub period_key: String,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// A batch with the entries it owns. Re-claiming an unsent batch returns the same entries.
#[derive(Debug, Clone)]
pub struct ClaimedBatch {
    pub batch: DigestBatch,
    pub entries: Vec<DigestEntry>,
    pub resumed: bool,
}

impl ClaimedBatch {
    pub fn dedupe_key(&self) -> String {
        format!(
            "digest:{}:{}",
            self.batch.recipient_id, self.batch.period_key
        )
    }
}

/// Rendered summary handed to the e-mail collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestEmail {
    pub recipient_id: Uuid,
    pub dedupe_key: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    pub entry_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DigestRunReport {
    pub frequency: Option<DigestFrequency>,
    pub period_key: String,
    pub recipients: usize,
    pub batches_sent: usize,
    pub entries_consumed: usize,
    pub failures: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Delivery failure: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Frequency {0} has no schedule")]
    Unscheduled(String),
}
