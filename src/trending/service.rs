use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use super::model::{SweepReport, TrendingError, TrendingResponse};
use super::tracker::TrendingTracker;
use crate::store::NotificationStore;

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;

/// Owns the in-memory tracker and persists its state on every sweep.
pub struct TrendingService {
    tracker: Arc<TrendingTracker>,
    store: Arc<dyn NotificationStore>,
}

impl TrendingService {
    pub fn new(tracker: Arc<TrendingTracker>, store: Arc<dyn NotificationStore>) -> Self {
        Self { tracker, store }
    }

    /// Records each hashtag once; returns the normalised tags that were counted.
    pub fn record_all(&self, hashtags: &[String], at: DateTime<Utc>) -> Vec<String> {
        let recorded: Vec<String> = hashtags
            .iter()
            .filter_map(|tag| self.tracker.record(tag, at))
            .collect();
        if !recorded.is_empty() {
            debug!("Recorded hashtags {:?}", recorded);
        }
        recorded
    }

    pub fn top(
        &self,
        limit: Option<usize>,
        scope: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TrendingResponse, TrendingError> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT);
        if limit == 0 || limit > MAX_LIMIT {
            return Err(TrendingError::ValidationError(format!(
                "limit must be between 1 and {}",
                MAX_LIMIT
            )));
        }
        let scope = scope.map(str::trim).filter(|s| !s.is_empty());

        Ok(TrendingResponse {
            policy: self.tracker.policy().name().to_string(),
            hashtags: self.tracker.top(limit, scope, now),
        })
    }

    /// Decays and evicts, then writes the surviving counters to the store.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, TrendingError> {
        let report = self.tracker.sweep(now);
        let snapshot = self.tracker.snapshot(now);
        self.store
            .save_trending_snapshot(&snapshot, &report.evicted)
            .await?;
        info!(
            "Trending sweep: {} tracked, {} evicted",
            report.tracked,
            report.evicted.len()
        );
        Ok(report)
    }

    /// Reloads the last persisted snapshot into the tracker.
    pub async fn restore(&self) -> Result<usize, TrendingError> {
        let counters = self.store.load_trending_snapshot().await?;
        let restored = counters.len();
        self.tracker.restore(counters);
        info!("Restored {} trending counters", restored);
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::trending::model::DecayPolicy;
    use std::time::Duration;

    fn service(store: Arc<MemoryStore>) -> TrendingService {
        let tracker = Arc::new(TrendingTracker::new(DecayPolicy::FixedWindow {
            window: Duration::from_secs(3600),
        }));
        TrendingService::new(tracker, store)
    }

    #[tokio::test]
    async fn test_top_validates_limit() {
        let trending = service(Arc::new(MemoryStore::new()));
        assert!(trending.top(Some(0), None, Utc::now()).is_err());
        assert!(trending.top(Some(101), None, Utc::now()).is_err());
        assert!(trending.top(None, None, Utc::now()).unwrap().hashtags.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_snapshot_survives_restart() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let first = service(store.clone());
        first.record_all(&["#Launch".to_string(), "rust".to_string()], now);
        first.record_all(&["launch".to_string()], now);
        first.sweep(now).await.unwrap();

        let second = service(store.clone());
        assert_eq!(second.restore().await.unwrap(), 2);
        let top = second.top(Some(5), None, now).unwrap();
        assert_eq!(top.hashtags[0].hashtag, "launch");
        assert_eq!(top.hashtags[0].windowed_count, 2.0);
        assert_eq!(top.policy, "fixed_window");
    }

    #[tokio::test]
    async fn test_invalid_tags_are_not_recorded() {
        let trending = service(Arc::new(MemoryStore::new()));
        let recorded = trending.record_all(&["#".to_string(), "two words".to_string()], Utc::now());
        assert!(recorded.is_empty());
    }
}
