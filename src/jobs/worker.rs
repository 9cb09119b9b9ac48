use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::Job;
use crate::digest::aggregator::DigestAggregator;
use crate::notification::service::NotificationService;
use crate::preference::model::DigestFrequency;
use crate::trending::service::TrendingService;

pub struct JobWorker {
    digest: Arc<DigestAggregator>,
    trending: Arc<TrendingService>,
    notifications: Arc<NotificationService>,
}

fn respond<T>(job: &str, reply: Option<oneshot::Sender<Result<T, String>>>, result: Result<T, String>) {
    if let Err(e) = &result {
        error!("{} job failed: {}", job, e);
    }
    if let Some(reply) = reply {
        // requester may have gone away
        let _ = reply.send(result);
    }
}

impl JobWorker {
    pub fn new(
        digest: Arc<DigestAggregator>,
        trending: Arc<TrendingService>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            digest,
            trending,
            notifications,
        }
    }

    pub async fn handle(&self, job: Job) {
        let now = Utc::now();
        let name = job.name();
        match job {
            Job::Digest { frequency, reply } => {
                let frequencies = match frequency {
                    Some(f) => vec![f],
                    None => DigestFrequency::SCHEDULED.to_vec(),
                };
                let mut reports = Vec::with_capacity(frequencies.len());
                let mut outcome = Ok(());
                for frequency in frequencies {
                    match self.digest.run(frequency, now).await {
                        Ok(report) => reports.push(report),
                        Err(e) => {
                            outcome = Err(e.to_string());
                            break;
                        }
                    }
                }
                respond(name, reply, outcome.map(|_| reports));
            }
            Job::TrendingSweep { reply } => {
                let result = self.trending.sweep(now).await.map_err(|e| e.to_string());
                respond(name, reply, result);
            }
            Job::Cleanup { reply } => {
                let result = self
                    .notifications
                    .cleanup(now)
                    .await
                    .map_err(|e| e.to_string());
                respond(name, reply, result);
            }
        }
    }
}

/// Runs jobs one at a time until every [`super::JobQueue`] is dropped.
pub fn spawn_job_worker(worker: Arc<JobWorker>, mut receiver: mpsc::Receiver<Job>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Job worker started");
        while let Some(job) = receiver.recv().await {
            worker.handle(job).await;
        }
        info!("Job queue closed, worker exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::retry::{RetryConfig, RetryPolicy};
    use crate::delivery::sender::MockEmailSender;
    use crate::event::model::EventType;
    use crate::jobs::{JobError, JobQueue};
    use crate::notification::model::{ChannelSet, NewNotification};
    use crate::store::memory::MemoryStore;
    use crate::store::NotificationStore;
    use crate::trending::model::DecayPolicy;
    use crate::trending::tracker::TrendingTracker;
    use std::time::Duration;
    use uuid::Uuid;

    fn worker(store: Arc<MemoryStore>, email: MockEmailSender) -> Arc<JobWorker> {
        let retry = RetryPolicy::new(RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryConfig::default()
        });
        let tracker = Arc::new(TrendingTracker::new(DecayPolicy::FixedWindow {
            window: Duration::from_secs(3600),
        }));
        Arc::new(JobWorker::new(
            Arc::new(DigestAggregator::new(store.clone(), Arc::new(email), retry)),
            Arc::new(TrendingService::new(tracker, store.clone())),
            Arc::new(NotificationService::new(store, None)),
        ))
    }

    #[tokio::test]
    async fn test_admin_digest_request_gets_report() {
        let store = Arc::new(MemoryStore::new());
        let recipient = Uuid::new_v4();
        let record = store
            .insert_notification(NewNotification {
                event_id: Uuid::new_v4(),
                recipient_id: recipient,
                event_type: EventType::Liked,
                actor_id: Uuid::new_v4(),
                subject_entity_id: Some(5),
                channel_set: ChannelSet::ALL,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .enqueue_digest(&record, DigestFrequency::Daily)
            .await
            .unwrap();

        let mut email = MockEmailSender::new();
        email.expect_send().times(1).returning(|_| Ok(()));

        let (queue, rx) = JobQueue::bounded(4);
        spawn_job_worker(worker(store, email), rx);

        let reports = queue.run_digest(Some(DigestFrequency::Daily)).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].batches_sent, 1);
        assert_eq!(reports[0].entries_consumed, 1);
    }

    #[tokio::test]
    async fn test_failures_are_reported_to_the_caller() {
        let store = Arc::new(MemoryStore::new());
        let (queue, rx) = JobQueue::bounded(4);
        spawn_job_worker(worker(store.clone(), MockEmailSender::new()), rx);

        assert!(queue.sweep_trending().await.is_ok());

        store.set_unavailable(true);
        assert!(matches!(queue.cleanup().await, Err(JobError::Failed(_))));
    }

    #[tokio::test]
    async fn test_stopped_worker() {
        let (queue, rx) = JobQueue::bounded(1);
        drop(rx);
        assert!(matches!(queue.sweep_trending().await, Err(JobError::Stopped)));
    }
}
