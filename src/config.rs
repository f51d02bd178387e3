//! Runtime configuration
//!
//! Defaults match the behaviour collaborators rely on; environment variables
//! can override them per process.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Default TTL for every cached read
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default number of file records kept in the LRU map
pub const DEFAULT_METADATA_CAPACITY: u64 = 128;

/// Default number of attempts per remote call
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry; doubles per attempt
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default HTTP request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Cache sizing and lifetimes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL for folder listings
    pub listing_ttl: Duration,
    /// TTL for search results
    pub search_ttl: Duration,
    /// TTL for file metadata (both the TTL map and the LRU map)
    pub metadata_ttl: Duration,
    /// Capacity of the LRU metadata map
    pub metadata_capacity: u64,
}

impl CacheConfig {
    /// Same TTL for every kind of entry
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            listing_ttl: ttl,
            search_ttl: ttl,
            metadata_ttl: ttl,
            ..Self::default()
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            listing_ttl: DEFAULT_CACHE_TTL,
            search_ttl: DEFAULT_CACHE_TTL,
            metadata_ttl: DEFAULT_CACHE_TTL,
            metadata_capacity: DEFAULT_METADATA_CAPACITY,
        }
    }
}

/// Retry budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

/// Top-level configuration for one drive session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveConfig {
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub request_timeout: Duration,
}

impl DriveConfig {
    /// Defaults overlaid with environment overrides
    ///
    /// Recognised variables:
    /// - `DRIVE_CACHE_TTL_SECS`
    /// - `DRIVE_METADATA_CACHE_CAPACITY`
    /// - `DRIVE_MAX_RETRIES`
    /// - `DRIVE_RETRY_BASE_DELAY_MS`
    /// - `DRIVE_REQUEST_TIMEOUT_SECS`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64, _>(&lookup, "DRIVE_CACHE_TTL_SECS") {
            config.cache = CacheConfig {
                metadata_capacity: config.cache.metadata_capacity,
                ..CacheConfig::with_ttl(Duration::from_secs(secs))
            };
        }
        if let Some(capacity) = parse_var::<u64, _>(&lookup, "DRIVE_METADATA_CACHE_CAPACITY") {
            config.cache.metadata_capacity = capacity.max(1);
        }
        if let Some(attempts) = parse_var::<u32, _>(&lookup, "DRIVE_MAX_RETRIES") {
            config.retry.max_attempts = attempts.max(1);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "DRIVE_RETRY_BASE_DELAY_MS") {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "DRIVE_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs.max(1));
        }

        config
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Parse one variable, warning and falling back to the default on bad input
fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = key, value = %raw, "Ignoring unparsable configuration value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DriveConfig::default();
        assert_eq!(config.cache.listing_ttl, Duration::from_secs(300));
        assert_eq!(config.cache.metadata_capacity, 128);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let config = DriveConfig::from_lookup(lookup_from(&[
            ("DRIVE_CACHE_TTL_SECS", "60"),
            ("DRIVE_METADATA_CACHE_CAPACITY", "16"),
            ("DRIVE_MAX_RETRIES", "5"),
            ("DRIVE_RETRY_BASE_DELAY_MS", "250"),
            ("DRIVE_REQUEST_TIMEOUT_SECS", "10"),
        ]));
        assert_eq!(config.cache.listing_ttl, Duration::from_secs(60));
        assert_eq!(config.cache.search_ttl, Duration::from_secs(60));
        assert_eq!(config.cache.metadata_ttl, Duration::from_secs(60));
        assert_eq!(config.cache.metadata_capacity, 16);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let config = DriveConfig::from_lookup(lookup_from(&[
            ("DRIVE_CACHE_TTL_SECS", "five minutes"),
            ("DRIVE_MAX_RETRIES", "0"),
        ]));
        assert_eq!(config.cache.listing_ttl, DEFAULT_CACHE_TTL);
        // Zero attempts would never call the remote store
        assert_eq!(config.retry.max_attempts, 1);
    }
}
