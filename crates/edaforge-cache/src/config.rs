//! Configuration for the result cache.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// What happens when a different result is written under an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// The newer result replaces the stored one.
    #[default]
    LastWriteWins,
    /// The stored result is kept and the write is rejected.
    RejectConflicting,
}

/// Configuration for the result cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Whether result caching is enabled. A disabled cache always misses.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Maximum number of entries before the least-recently-used one is evicted (default: 10000).
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Seconds an entry stays valid after it was stored. `None` keeps entries until evicted.
    #[serde(default)]
    pub ttl_secs: Option<u64>,

    /// How often the expiry sweep runs in seconds (default: 300 = 5 minutes).
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Conflict policy for writes to an existing key.
    #[serde(default)]
    pub write_policy: WritePolicy,
}

fn default_enabled() -> bool {
    true
}

fn default_max_entries() -> usize {
    10_000
}

fn default_cleanup_interval_secs() -> u64 {
    300 // 5 minutes
}

/// Errors that can occur during cache configuration validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheConfigError {
    /// Invalid max entries (must be > 0).
    #[error("Invalid max entries: must be greater than 0")]
    InvalidMaxEntries,

    /// Invalid TTL (must be > 0 when set).
    #[error("Invalid TTL: must be greater than 0 when set")]
    InvalidTtl,

    /// Invalid cleanup interval (must be > 0).
    #[error("Invalid cleanup interval: must be greater than 0")]
    InvalidCleanupInterval,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_entries: default_max_entries(),
            ttl_secs: None,
            cleanup_interval_secs: default_cleanup_interval_secs(),
            write_policy: WritePolicy::default(),
        }
    }
}

impl CacheConfig {
    /// Validate the cache configuration.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), CacheConfigError> {
        if self.max_entries == 0 {
            return Err(CacheConfigError::InvalidMaxEntries);
        }

        if self.ttl_secs == Some(0) {
            return Err(CacheConfigError::InvalidTtl);
        }

        if self.cleanup_interval_secs == 0 {
            return Err(CacheConfigError::InvalidCleanupInterval);
        }

        Ok(())
    }

    /// Get the TTL as a Duration, if configured.
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    /// Get the cleanup interval as a Duration.
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_default() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_entries, 10_000);
        assert_eq!(config.ttl_secs, None);
        assert_eq!(config.cleanup_interval_secs, 300);
        assert_eq!(config.write_policy, WritePolicy::LastWriteWins);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cache_config_validation_invalid_max_entries() {
        let config = CacheConfig { max_entries: 0, ..CacheConfig::default() };
        assert_eq!(config.validate(), Err(CacheConfigError::InvalidMaxEntries));
    }

    #[test]
    fn test_cache_config_validation_invalid_ttl() {
        let config = CacheConfig { ttl_secs: Some(0), ..CacheConfig::default() };
        assert_eq!(config.validate(), Err(CacheConfigError::InvalidTtl));
    }

    #[test]
    fn test_cache_config_validation_invalid_cleanup_interval() {
        let config = CacheConfig { cleanup_interval_secs: 0, ..CacheConfig::default() };
        assert_eq!(config.validate(), Err(CacheConfigError::InvalidCleanupInterval));
    }

    #[test]
    fn test_cache_config_from_toml() {
        let config: CacheConfig = toml::from_str(
            r#"
max_entries = 50
ttl_secs = 3600
write_policy = "reject_conflicting"
"#,
        )
        .unwrap();

        assert!(config.enabled);
        assert_eq!(config.max_entries, 50);
        assert_eq!(config.ttl(), Some(Duration::from_secs(3600)));
        assert_eq!(config.write_policy, WritePolicy::RejectConflicting);
    }
}
