use chrono::Utc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use super::{Job, JobQueue};
use crate::digest::schedule::due_frequencies;

const DIGEST_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy)]
pub struct ScheduleConfig {
    pub digest_hour: u32,
    pub trending_sweep_interval: Duration,
}

/// Submits periodic jobs. Digests are checked hourly and only the frequencies due at
/// the configured UTC hour are queued; re-running a period is harmless.
pub fn spawn_scheduler(queue: JobQueue, config: ScheduleConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Scheduler started (digest hour {} UTC, trending sweep every {:?})",
            config.digest_hour, config.trending_sweep_interval
        );

        let mut digest_tick = time::interval(DIGEST_CHECK_INTERVAL);
        let mut sweep_tick = time::interval(config.trending_sweep_interval.max(Duration::from_secs(1)));
        let mut cleanup_tick = time::interval(CLEANUP_INTERVAL);
        for tick in [&mut digest_tick, &mut sweep_tick, &mut cleanup_tick] {
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        loop {
            tokio::select! {
                _ = digest_tick.tick() => {
                    for frequency in due_frequencies(Utc::now(), config.digest_hour) {
                        debug!("Queueing {} digest", frequency.as_str());
                        queue.submit(Job::Digest { frequency: Some(frequency), reply: None });
                    }
                }
                _ = sweep_tick.tick() => queue.submit(Job::TrendingSweep { reply: None }),
                _ = cleanup_tick.tick() => queue.submit(Job::Cleanup { reply: None }),
            }
        }
    })
}
