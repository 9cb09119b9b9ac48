pub mod model;
pub mod push;
pub mod retry;
pub mod router;
pub mod sender;

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::notification::model::NotificationRecord;
use crate::preference::model::{DigestFrequency, QuietHours};
use model::DeliveryError;
use router::DeliveryRouter;

/// One record waiting to be routed, with the recipient's settings at fan-out time.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub record: NotificationRecord,
    pub digest_frequency: DigestFrequency,
    pub quiet_hours: Option<QuietHours>,
}

/// Producer side of the bounded delivery queue.
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    sender: mpsc::Sender<DeliveryJob>,
}

impl DeliveryQueue {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<DeliveryJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Waits for room when the queue is full.
    pub async fn enqueue(&self, job: DeliveryJob) -> Result<(), DeliveryError> {
        self.sender
            .send(job)
            .await
            .map_err(|_| DeliveryError::ChannelUnreachable("delivery worker stopped".to_string()))
    }
}

/// Drains the queue until every producer is gone.
pub fn spawn_delivery_worker(
    router: Arc<DeliveryRouter>,
    mut receiver: mpsc::Receiver<DeliveryJob>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Delivery worker started");
        while let Some(job) = receiver.recv().await {
            let outcome = router.route(&job).await;
            debug!(
                "Routed notification {} over {:?}",
                job.record.id,
                outcome.attempted.iter().map(|c| c.as_str()).collect::<Vec<_>>()
            );
        }
        warn!("Delivery queue closed, worker exiting");
    })
}
