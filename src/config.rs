use std::{env, fmt::Display, str::FromStr, time::Duration};

use tracing::{info, warn};

use crate::delivery::retry::RetryConfig;
use crate::notification::model::{Channel, ChannelSet};
use crate::trending::model::DecayPolicy;

/// Runtime configuration, read from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub available_channels: ChannelSet,
    pub trending_policy: DecayPolicy,
    pub trending_sweep_interval: Duration,
    pub push_retry: RetryConfig,
    pub email_retry: RetryConfig,
    pub push_gateway_url: Option<String>,
    pub email_gateway_url: Option<String>,
    pub digest_hour: u32,
    pub delivery_queue_size: usize,
    pub push_concurrency: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let window = positive_secs("TRENDING_WINDOW_SECS", 24 * 60 * 60);
        let trending_policy = match optional("TRENDING_POLICY").as_deref() {
            Some("fixed_window") | Some("fixed") => DecayPolicy::FixedWindow { window },
            Some("exponential") | None => DecayPolicy::Exponential {
                half_life: positive_secs("TRENDING_HALF_LIFE_SECS", 6 * 60 * 60),
                window,
            },
            Some(other) => {
                warn!("Unknown TRENDING_POLICY {other}, using exponential decay");
                DecayPolicy::Exponential {
                    half_life: Duration::from_secs(6 * 60 * 60),
                    window,
                }
            }
        };

        let push_retry = RetryConfig {
            max_attempts: try_load("PUSH_MAX_ATTEMPTS", 5),
            initial_delay: Duration::from_millis(try_load("PUSH_INITIAL_BACKOFF_MS", 500)),
            max_delay: Duration::from_millis(try_load("PUSH_MAX_BACKOFF_MS", 30_000)),
            ..RetryConfig::default()
        };

        Self {
            port: try_load("PORT", 9500),
            database_url: optional("DATABASE_URL"),
            redis_url: optional("REDIS_URL"),
            available_channels: parse_channels(optional("AVAILABLE_CHANNELS").as_deref()),
            trending_policy,
            trending_sweep_interval: Duration::from_secs(try_load("TRENDING_SWEEP_SECS", 60)),
            push_retry,
            email_retry: RetryConfig {
                max_attempts: 3,
                ..RetryConfig::default()
            },
            push_gateway_url: optional("PUSH_GATEWAY_URL"),
            email_gateway_url: optional("EMAIL_GATEWAY_URL"),
            digest_hour: try_load::<u32>("DIGEST_HOUR", 8).min(23),
            delivery_queue_size: try_load("DELIVERY_QUEUE_SIZE", 1024),
            push_concurrency: try_load("PUSH_CONCURRENCY", 32),
        }
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
            default
        }),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            default
        }
    }
}

/// Like `try_load` for a duration in seconds, but zero falls back to the default.
fn positive_secs(key: &str, default: u64) -> Duration {
    match try_load(key, default) {
        0 => {
            warn!("{key} must be at least 1 second, using default: {default}");
            Duration::from_secs(default)
        }
        secs => Duration::from_secs(secs),
    }
}

/// Parses a comma separated channel list. Unknown names are logged and ignored;
/// an unset variable enables every channel.
pub fn parse_channels(raw: Option<&str>) -> ChannelSet {
    let Some(raw) = raw else {
        return ChannelSet::ALL;
    };

    let mut set = ChannelSet::EMPTY;
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match Channel::from_str(name) {
            Ok(channel) => set.insert(channel),
            Err(e) => warn!("Ignoring channel in AVAILABLE_CHANNELS: {e}"),
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_channels_defaults_to_all() {
        assert_eq!(parse_channels(None), ChannelSet::ALL);
    }

    #[test]
    fn test_parse_channels_subset() {
        let set = parse_channels(Some("realtime, digest ,bogus"));
        assert!(set.contains(Channel::Realtime));
        assert!(set.contains(Channel::Digest));
        assert!(!set.contains(Channel::WebPush));
    }

    #[test]
    fn test_try_load_falls_back_on_garbage() {
        env::set_var("SOCIAL_NOTIFY_TEST_PORT", "not-a-number");
        assert_eq!(try_load::<u16>("SOCIAL_NOTIFY_TEST_PORT", 1234), 1234);
        env::set_var("SOCIAL_NOTIFY_TEST_PORT", "4321");
        assert_eq!(try_load::<u16>("SOCIAL_NOTIFY_TEST_PORT", 1234), 4321);
    }

    #[test]
    fn test_zero_duration_falls_back_to_default() {
        env::set_var("SOCIAL_NOTIFY_TEST_HALF_LIFE", "0");
        assert_eq!(
            positive_secs("SOCIAL_NOTIFY_TEST_HALF_LIFE", 3600),
            Duration::from_secs(3600)
        );
        env::set_var("SOCIAL_NOTIFY_TEST_HALF_LIFE", "90");
        assert_eq!(
            positive_secs("SOCIAL_NOTIFY_TEST_HALF_LIFE", 3600),
            Duration::from_secs(90)
        );
    }
}
