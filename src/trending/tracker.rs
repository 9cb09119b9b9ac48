use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::trending::model::{normalize_hashtag, DecayPolicy, SweepReport, TrendingCounter};

/// Entry of the rank index. Ordered by score (desc), then most recent occurrence (desc),
/// then hashtag. Carries enough to answer a read without touching the counter map.
///
/// For a fixed window the score is the bucket total as of the last write or sweep, which
/// never undercounts the live total; `buckets` lets a read prune it to the read time.
#[derive(Debug, Clone)]
struct RankKey {
    score: f64,
    last_occurrence_ms: i64,
    decay_timestamp_ms: i64,
    hashtag: String,
    buckets: Vec<(i64, u64)>,
}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.last_occurrence_ms.cmp(&self.last_occurrence_ms))
            .then_with(|| self.hashtag.cmp(&other.hashtag))
    }
}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RankKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankKey {}

/// Rank order for reads, plus the same keys by hashtag for prefix scans.
#[derive(Debug, Default)]
struct RankIndex {
    ranked: BTreeSet<RankKey>,
    by_tag: BTreeMap<String, RankKey>,
}

impl RankIndex {
    fn insert(&mut self, key: RankKey) {
        self.by_tag.insert(key.hashtag.clone(), key.clone());
        self.ranked.insert(key);
    }

    fn remove(&mut self, key: &RankKey) {
        self.ranked.remove(key);
        self.by_tag.remove(&key.hashtag);
    }

    /// Keys whose hashtag starts with `prefix`, in hashtag order.
    fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a RankKey> + 'a {
        self.by_tag
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |(tag, _)| tag.starts_with(prefix))
            .map(|(_, key)| key)
    }
}

#[derive(Debug)]
struct CounterState {
    /// Fixed window: minute index -> occurrences.
    buckets: BTreeMap<i64, u64>,
    windowed: u64,
    /// Exponential: decayed count as of `decay_timestamp`.
    value: f64,
    decay_timestamp: DateTime<Utc>,
    last_occurrence: DateTime<Utc>,
    rank: Option<RankKey>,
}

impl CounterState {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            buckets: BTreeMap::new(),
            windowed: 0,
            value: 0.0,
            decay_timestamp: at,
            last_occurrence: at,
            rank: None,
        }
    }
}

/// Decayed per-hashtag occurrence counters.
///
/// Counters live in a sharded map, so writers to different hashtags never contend. A
/// separate ordered index serves top-N reads. Lock order is always counter shard first,
/// then index; readers of the index never take a shard lock.
///
/// With exponential decay the index score is the count in log2 space shifted by the
/// time of the last refresh (`log2(value) + t / half_life`). That keeps the relative
/// order of counters fixed as time passes, so the index only changes on writes.
#[derive(Debug)]
pub struct TrendingTracker {
    policy: DecayPolicy,
    counters: DashMap<String, CounterState>,
    index: RwLock<RankIndex>,
}

impl TrendingTracker {
    pub fn new(policy: DecayPolicy) -> Self {
        Self {
            policy: policy.normalized(),
            counters: DashMap::new(),
            index: RwLock::new(RankIndex::default()),
        }
    }

    pub fn policy(&self) -> DecayPolicy {
        self.policy
    }

    pub fn tracked(&self) -> usize {
        self.counters.len()
    }

    /// Records one occurrence. Returns the normalised hashtag, or `None` if the input is
    /// not a valid hashtag or the occurrence is already outside the window.
    pub fn record(&self, raw: &str, at: DateTime<Utc>) -> Option<String> {
        let hashtag = normalize_hashtag(raw)?;
        let mut state = self
            .counters
            .entry(hashtag.clone())
            .or_insert_with(|| CounterState::new(at));

        let accepted = match self.policy {
            DecayPolicy::FixedWindow { window } => {
                let newest = state.last_occurrence.max(at);
                let cutoff = minute_of(newest - to_chrono(window));
                if minute_of(at) < cutoff {
                    false
                } else {
                    *state.buckets.entry(minute_of(at)).or_insert(0) += 1;
                    state.windowed += 1;
                    prune_buckets(&mut state, cutoff);
                    true
                }
            }
            DecayPolicy::Exponential { half_life, window } => {
                let window = to_chrono(window);
                if state.value > 0.0 && at - state.last_occurrence >= window {
                    state.value = 0.0;
                }
                if state.value > 0.0 && state.last_occurrence - at >= window {
                    false
                } else {
                    if at >= state.decay_timestamp {
                        let elapsed = seconds_between(state.decay_timestamp, at);
                        state.value = state.value * decay_factor(elapsed, half_life) + 1.0;
                        state.decay_timestamp = at;
                    } else {
                        let age = seconds_between(at, state.decay_timestamp);
                        state.value += decay_factor(age, half_life);
                    }
                    true
                }
            }
        };

        if !accepted {
            debug!("Dropping stale occurrence of #{} at {}", hashtag, at);
            return None;
        }

        if at > state.last_occurrence {
            state.last_occurrence = at;
        }
        self.reindex(&hashtag, &mut state);
        Some(hashtag)
    }

    /// Current windowed count for one hashtag; zero if untracked.
    pub fn count(&self, raw: &str, now: DateTime<Utc>) -> f64 {
        let Some(hashtag) = normalize_hashtag(raw) else {
            return 0.0;
        };
        self.counters
            .get(&hashtag)
            .and_then(|state| state.rank.as_ref().map(|key| self.count_for(key, now)))
            .unwrap_or(0.0)
    }

    /// Top `limit` hashtags by windowed count, ties broken by most recent occurrence.
    /// `scope` restricts the result to hashtags starting with the given prefix; a scoped
    /// read visits only the matching keys.
    pub fn top(&self, limit: usize, scope: Option<&str>, now: DateTime<Utc>) -> Vec<TrendingCounter> {
        if limit == 0 {
            return Vec::new();
        }
        let index = self.index.read();
        match scope {
            Some(raw) => match normalize_hashtag(raw) {
                Some(prefix) => self.select(index.with_prefix(&prefix), false, limit, now),
                None => Vec::new(),
            },
            None => self.select(index.ranked.iter(), true, limit, now),
        }
    }

    /// Recomputes the live count of each candidate and keeps the best `limit`. When the
    /// candidates come in index order the walk stops at the first score that cannot
    /// beat the weakest pick, since index scores never undercount.
    fn select<'a>(
        &self,
        candidates: impl Iterator<Item = &'a RankKey>,
        ordered: bool,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Vec<TrendingCounter> {
        let mut picked: Vec<(f64, &RankKey)> = Vec::new();
        for key in candidates {
            let count = self.count_for(key, now);
            if picked.len() >= limit {
                let weakest = picked[limit - 1].0;
                if ordered && self.upper_bound(key, now) < weakest {
                    break;
                }
                if count < weakest {
                    continue;
                }
            }
            if count <= 0.0 {
                continue;
            }
            let at = picked
                .binary_search_by(|(c, k)| by_live_count((*c, *k), (count, key)))
                .unwrap_or_else(|i| i);
            picked.insert(at, (count, key));
            picked.truncate(limit);
        }
        picked
            .into_iter()
            .map(|(count, key)| self.to_counter(key, count))
            .collect()
    }

    /// Count of `key` before the window cutoff applies.
    fn upper_bound(&self, key: &RankKey, now: DateTime<Utc>) -> f64 {
        match self.policy {
            DecayPolicy::FixedWindow { .. } => key.score,
            DecayPolicy::Exponential { half_life, .. } => {
                let now_secs = now.timestamp_millis().max(key.decay_timestamp_ms) as f64 / 1000.0;
                (key.score - now_secs / half_life.as_secs_f64()).exp2().max(0.0)
            }
        }
    }

    /// Ages every counter to `now` and evicts the ones whose window has elapsed.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let keys: Vec<String> = self.counters.iter().map(|e| e.key().clone()).collect();
        let mut evicted = Vec::new();

        for hashtag in keys {
            let expired = match self.counters.get_mut(&hashtag) {
                Some(mut state) => {
                    if let DecayPolicy::FixedWindow { window } = self.policy {
                        let cutoff = minute_of(now - to_chrono(window));
                        if prune_buckets(&mut state, cutoff) && state.windowed > 0 {
                            self.reindex(&hashtag, &mut state);
                        }
                    }

                    let live = state
                        .rank
                        .as_ref()
                        .map_or(false, |key| self.count_for(key, now) > 0.0);
                    if !live {
                        if let Some(old) = state.rank.take() {
                            self.index.write().remove(&old);
                        }
                    }
                    !live
                }
                None => false,
            };

            if expired && self
                .counters
                .remove_if(&hashtag, |_, state| state.rank.is_none())
                .is_some()
            {
                evicted.push(hashtag);
            }
        }

        SweepReport {
            tracked: self.counters.len(),
            evicted,
        }
    }

    /// Snapshot of every live counter, highest first.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<TrendingCounter> {
        self.top(usize::MAX, None, now)
    }

    /// Loads counters persisted by an earlier process.
    pub fn restore(&self, counters: Vec<TrendingCounter>) {
        for counter in counters {
            let Some(hashtag) = normalize_hashtag(&counter.hashtag) else {
                continue;
            };
            if counter.windowed_count <= 0.0 {
                continue;
            }
            let mut state = self
                .counters
                .entry(hashtag.clone())
                .or_insert_with(|| CounterState::new(counter.decay_timestamp));

            match self.policy {
                DecayPolicy::FixedWindow { .. } => {
                    let occurrences = counter.windowed_count.round().max(1.0) as u64;
                    *state
                        .buckets
                        .entry(minute_of(counter.last_occurrence))
                        .or_insert(0) += occurrences;
                    state.windowed += occurrences;
                }
                DecayPolicy::Exponential { .. } => {
                    state.value = counter.windowed_count;
                    state.decay_timestamp = counter.decay_timestamp;
                }
            }
            state.last_occurrence = state.last_occurrence.max(counter.last_occurrence);
            self.reindex(&hashtag, &mut state);
        }
    }

    fn reindex(&self, hashtag: &str, state: &mut CounterState) {
        let key = RankKey {
            score: self.score_of(state),
            last_occurrence_ms: state.last_occurrence.timestamp_millis(),
            decay_timestamp_ms: state.decay_timestamp.timestamp_millis(),
            hashtag: hashtag.to_string(),
            buckets: state.buckets.iter().map(|(m, n)| (*m, *n)).collect(),
        };
        let mut index = self.index.write();
        if let Some(old) = state.rank.take() {
            index.remove(&old);
        }
        index.insert(key.clone());
        state.rank = Some(key);
    }

    fn score_of(&self, state: &CounterState) -> f64 {
        match self.policy {
            DecayPolicy::FixedWindow { .. } => state.windowed as f64,
            DecayPolicy::Exponential { half_life, .. } => {
                let t = state.decay_timestamp.timestamp_millis() as f64 / 1000.0;
                state.value.max(f64::MIN_POSITIVE).log2() + t / half_life.as_secs_f64()
            }
        }
    }

    fn count_for(&self, key: &RankKey, now: DateTime<Utc>) -> f64 {
        let window_ms = self.policy.window().as_millis() as i64;
        if now.timestamp_millis() - key.last_occurrence_ms >= window_ms {
            return 0.0;
        }
        match self.policy {
            DecayPolicy::FixedWindow { window } => {
                let cutoff = minute_of(now - to_chrono(window));
                key.buckets
                    .iter()
                    .filter(|(minute, _)| *minute >= cutoff)
                    .map(|(_, n)| *n as f64)
                    .sum()
            }
            DecayPolicy::Exponential { .. } => self.upper_bound(key, now),
        }
    }

    fn to_counter(&self, key: &RankKey, count: f64) -> TrendingCounter {
        TrendingCounter {
            hashtag: key.hashtag.clone(),
            windowed_count: count,
            decay_timestamp: from_millis(key.decay_timestamp_ms),
            last_occurrence: from_millis(key.last_occurrence_ms),
        }
    }
}

/// Live count desc, then most recent occurrence desc, then hashtag.
fn by_live_count(a: (f64, &RankKey), b: (f64, &RankKey)) -> Ordering {
    b.0.total_cmp(&a.0)
        .then_with(|| b.1.last_occurrence_ms.cmp(&a.1.last_occurrence_ms))
        .then_with(|| a.1.hashtag.cmp(&b.1.hashtag))
}

/// Drops buckets older than `cutoff`. Returns true if anything was removed.
fn prune_buckets(state: &mut CounterState, cutoff: i64) -> bool {
    let stale: Vec<i64> = state.buckets.range(..cutoff).map(|(m, _)| *m).collect();
    for minute in &stale {
        if let Some(n) = state.buckets.remove(minute) {
            state.windowed = state.windowed.saturating_sub(n);
        }
    }
    !stale.is_empty()
}

fn minute_of(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(60)
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

fn decay_factor(elapsed_secs: f64, half_life: std::time::Duration) -> f64 {
    (-elapsed_secs / half_life.as_secs_f64()).exp2()
}

fn to_chrono(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}
