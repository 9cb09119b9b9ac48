use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

const MAX_HASHTAG_LEN: usize = 100;
pub const MIN_HALF_LIFE: Duration = Duration::from_secs(1);

/// How occurrence counters age out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecayPolicy {
    /// Count of occurrences inside the trailing window, bucketed per minute.
    FixedWindow { window: Duration },
    /// Exponentially decayed count; drops to zero once `window` passes without occurrences.
    Exponential { half_life: Duration, window: Duration },
}

impl DecayPolicy {
    pub fn window(&self) -> Duration {
        match self {
            DecayPolicy::FixedWindow { window } => *window,
            DecayPolicy::Exponential { window, .. } => *window,
        }
    }

    /// Same policy with the half-life raised to at least one second.
    pub fn normalized(self) -> Self {
        match self {
            DecayPolicy::Exponential { half_life, window } => DecayPolicy::Exponential {
                half_life: half_life.max(MIN_HALF_LIFE),
                window,
            },
            fixed => fixed,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DecayPolicy::FixedWindow { .. } => "fixed_window",
            DecayPolicy::Exponential { .. } => "exponential",
        }
    }
}

/// Snapshot of one hashtag's counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TrendingCounter {
    #[schema(example = "launch")]
    pub hashtag: String,
    pub windowed_count: f64,
    #[schema(value_type = DateTimeWrapper)]
    pub decay_timestamp: DateTime<Utc>,
    #[schema(value_type = DateTimeWrapper)]
    pub last_occurrence: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct TrendingQueryParams {
    /// Number of hashtags to return (max 100)
    #[schema(example = "10")]
    pub limit: Option<usize>,
    /// Only hashtags starting with this prefix
    #[schema(example = "rust")]
    pub scope: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TrendingResponse {
    pub policy: String,
    pub hashtags: Vec<TrendingCounter>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SweepReport {
    pub tracked: usize,
    pub evicted: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TrendingError {
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Lowercases and strips the leading `#`. Returns `None` for anything that is not a
/// 1..=100 character run of alphanumerics and underscores.
pub fn normalize_hashtag(raw: &str) -> Option<String> {
    let tag = raw.trim().trim_start_matches('#');
    if tag.is_empty() || tag.chars().count() > MAX_HASHTAG_LEN {
        return None;
    }
    if !tag.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    Some(tag.to_lowercase())
}

/// Pulls `#tags` out of free text, deduplicated, in order of first appearance.
pub fn extract_hashtags(content: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut chars = content.char_indices().peekable();
    let mut prev: Option<char> = None;

    while let Some((i, c)) = chars.next() {
        let starts_tag = c == '#' && !prev.map_or(false, |p| p.is_alphanumeric() || p == '_');
        prev = Some(c);
        if !starts_tag {
            continue;
        }

        let start = i + c.len_utf8();
        let mut end = start;
        while let Some(&(j, next)) = chars.peek() {
            if next.is_alphanumeric() || next == '_' {
                end = j + next.len_utf8();
                prev = Some(next);
                chars.next();
            } else {
                break;
            }
        }

        if let Some(tag) = normalize_hashtag(&content[start..end]) {
            if !found.contains(&tag) {
                found.push(tag);
            }
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_hashtag() {
        assert_eq!(normalize_hashtag("#Launch"), Some("launch".to_string()));
        assert_eq!(normalize_hashtag("rust_lang"), Some("rust_lang".to_string()));
        assert_eq!(normalize_hashtag("#"), None);
        assert_eq!(normalize_hashtag("two words"), None);
        assert_eq!(normalize_hashtag(&"a".repeat(101)), None);
    }

    #[test]
    fn test_extract_hashtags_from_content() {
        let tags = extract_hashtags("Big day! #Launch #rust, see #launch again");
        assert_eq!(tags, vec!["launch".to_string(), "rust".to_string()]);
    }

    #[test]
    fn test_extract_ignores_mid_word_hash_and_bare_hash() {
        let tags = extract_hashtags("issue#12 and # alone and C# but #ok");
        assert_eq!(tags, vec!["ok".to_string()]);
    }
}
