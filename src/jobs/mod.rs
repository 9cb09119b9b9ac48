//! Background maintenance: digest runs, trending sweeps and retention cleanup.
//!
//! Everything funnels through one bounded queue drained by a single worker, so a
//! scheduled run and an admin-triggered run of the same job never overlap.

pub mod controller;
pub mod scheduler;
pub mod worker;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::digest::model::DigestRunReport;
use crate::notification::model::CleanupReport;
use crate::preference::model::DigestFrequency;
use crate::trending::model::SweepReport;

type Reply<T> = Option<oneshot::Sender<Result<T, String>>>;

#[derive(Debug)]
pub enum Job {
    /// `None` runs every scheduled frequency.
    Digest {
        frequency: Option<DigestFrequency>,
        reply: Reply<Vec<DigestRunReport>>,
    },
    TrendingSweep {
        reply: Reply<SweepReport>,
    },
    Cleanup {
        reply: Reply<CleanupReport>,
    },
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::Digest { .. } => "digest",
            Job::TrendingSweep { .. } => "trending_sweep",
            Job::Cleanup { .. } => "cleanup",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job worker is not running")]
    Stopped,

    #[error("Job failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<Job>,
}

impl JobQueue {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Job>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Fire-and-forget submission used by the scheduler. A full queue skips the tick.
    pub fn submit(&self, job: Job) {
        let name = job.name();
        if let Err(e) = self.sender.try_send(job) {
            warn!("Skipping {} job: {}", name, e);
        }
    }

    pub async fn run_digest(
        &self,
        frequency: Option<DigestFrequency>,
    ) -> Result<Vec<DigestRunReport>, JobError> {
        let (tx, rx) = oneshot::channel();
        self.request(Job::Digest {
            frequency,
            reply: Some(tx),
        }, rx)
        .await
    }

    pub async fn sweep_trending(&self) -> Result<SweepReport, JobError> {
        let (tx, rx) = oneshot::channel();
        self.request(Job::TrendingSweep { reply: Some(tx) }, rx).await
    }

    pub async fn cleanup(&self) -> Result<CleanupReport, JobError> {
        let (tx, rx) = oneshot::channel();
        self.request(Job::Cleanup { reply: Some(tx) }, rx).await
    }

    async fn request<T>(
        &self,
        job: Job,
        rx: oneshot::Receiver<Result<T, String>>,
    ) -> Result<T, JobError> {
        self.sender.send(job).await.map_err(|_| JobError::Stopped)?;
        rx.await
            .map_err(|_| JobError::Stopped)?
            .map_err(JobError::Failed)
    }
}
