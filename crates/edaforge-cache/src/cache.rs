//! ResultCache implementation with LRU eviction, TTL expiry and an explicit
//! write-conflict policy.

use edaforge_abstraction::ToolOutput;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::{CacheConfig, CacheConfigError, WritePolicy};
use super::types::{CacheEntry, CacheKey, CacheStats, PutOutcome};

/// Errors surfaced by cache backends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The backing storage cannot be used. Callers treat this as a miss.
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// A different result is already stored and the policy rejects overwrites.
    #[error("Conflicting result for cache key {key}")]
    Conflict {
        /// Display form of the key.
        key: String,
    },
}

/// Storage contract used by the task queue.
///
/// Implementations must be safe to share across workers. Any `Err` from `get`
/// is handled by callers as a miss.
pub trait CacheBackend: Send + Sync {
    /// Looks up a stored result.
    fn get(&self, key: &CacheKey) -> Result<Option<ToolOutput>, CacheError>;

    /// Stores a result under `key`.
    fn put(&self, key: &CacheKey, result: &ToolOutput) -> Result<PutOutcome, CacheError>;

    /// Number of live entries.
    fn len(&self) -> usize;

    /// Whether the cache holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry.
    fn clear(&self);
}

/// In-memory result cache.
#[derive(Debug)]
pub struct ResultCache {
    /// The cache storage (digest -> entry).
    entries: Arc<RwLock<HashMap<CacheKey, CacheEntry>>>,
    /// Cache configuration.
    config: CacheConfig,
    /// Cache statistics.
    stats: Arc<RwLock<CacheStats>>,
}

impl ResultCache {
    /// Create a new result cache with the given configuration.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if the configuration is invalid.
    pub fn new(config: CacheConfig) -> Result<Self, CacheConfigError> {
        config.validate()?;

        Ok(Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            config,
            stats: Arc::new(RwLock::new(CacheStats::default())),
        })
    }

    /// Get the cache configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn poisoned() -> CacheError {
        CacheError::Unavailable("cache lock poisoned".to_string())
    }

    fn record(&self, f: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            f(&mut stats);
        }
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        self.config.ttl().is_some_and(|ttl| entry.inserted.elapsed() >= ttl)
    }

    /// Find the least-recently-used key in the cache.
    fn find_lru_key(entries: &HashMap<CacheKey, CacheEntry>) -> Option<CacheKey> {
        entries.iter().min_by_key(|(_, entry)| entry.last_accessed).map(|(key, _)| key.clone())
    }

    /// Remove every entry whose TTL has elapsed.
    ///
    /// # Returns
    /// The number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let Some(ttl) = self.config.ttl() else {
            return 0;
        };
        let Ok(mut entries) = self.entries.write() else {
            warn!("Cache lock poisoned, skipping expiry sweep");
            return 0;
        };

        let before = entries.len();
        entries.retain(|_, entry| entry.inserted.elapsed() < ttl);
        let removed = before - entries.len();
        let size = entries.len();
        drop(entries);

        if removed > 0 {
            self.record(|s| {
                s.total_evictions += removed as u64;
                s.cache_size = size;
            });
            debug!(removed, "Expired cache entries purged");
        }
        removed
    }

    /// Remove a specific entry.
    ///
    /// # Returns
    /// `true` if the entry was removed, `false` if it was not found.
    pub fn remove(&self, key: &CacheKey) -> bool {
        let Ok(mut entries) = self.entries.write() else {
            return false;
        };
        let removed = entries.remove(key).is_some();
        let size = entries.len();
        drop(entries);
        if removed {
            self.record(|s| s.cache_size = size);
            info!(key = %key, "Removed result from cache");
        }
        removed
    }

    /// Get current cache statistics.
    #[must_use]
    pub fn get_stats(&self) -> CacheStats {
        let mut result = self.stats.read().map(|s| s.clone()).unwrap_or_default();
        result.cache_size = self.len();
        result
    }

    /// Spawns the periodic expiry sweep. The task stops when `shutdown` is cancelled.
    pub fn spawn_cleanup(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let interval = self.config.cleanup_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        cache.purge_expired();
                    }
                }
            }
            debug!("Cache cleanup task stopped");
        })
    }
}

impl CacheBackend for ResultCache {
    fn get(&self, key: &CacheKey) -> Result<Option<ToolOutput>, CacheError> {
        if !self.config.enabled {
            return Ok(None);
        }

        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        let expired = entries.get(key).is_some_and(|entry| self.is_expired(entry));
        if expired {
            entries.remove(key);
            let size = entries.len();
            drop(entries);
            self.record(|s| {
                s.total_misses += 1;
                s.total_evictions += 1;
                s.cache_size = size;
            });
            debug!(key = %key, "Cache entry expired");
            return Ok(None);
        }

        match entries.get_mut(key) {
            Some(entry) => {
                entry.touch();
                let result = entry.result.clone();
                drop(entries);
                self.record(|s| s.total_hits += 1);
                debug!(key = %key, "Cache hit");
                Ok(Some(result))
            }
            None => {
                drop(entries);
                self.record(|s| s.total_misses += 1);
                debug!(key = %key, "Cache miss");
                Ok(None)
            }
        }
    }

    fn put(&self, key: &CacheKey, result: &ToolOutput) -> Result<PutOutcome, CacheError> {
        if !self.config.enabled {
            return Ok(PutOutcome::Skipped);
        }

        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;

        if let Some(existing) = entries.get_mut(key) {
            if existing.result == *result {
                return Ok(PutOutcome::Unchanged);
            }
            return match self.config.write_policy {
                WritePolicy::LastWriteWins => {
                    *existing = CacheEntry::new(key.clone(), result.clone());
                    drop(entries);
                    debug!(key = %key, "Cache entry overwritten");
                    Ok(PutOutcome::Overwritten)
                }
                WritePolicy::RejectConflicting => {
                    drop(entries);
                    self.record(|s| s.total_conflicts += 1);
                    warn!(key = %key, "Rejected conflicting cache write");
                    Err(CacheError::Conflict { key: key.to_string() })
                }
            };
        }

        // Check if cache is full and evict LRU if needed
        if entries.len() >= self.config.max_entries {
            if let Some(lru_key) = Self::find_lru_key(&entries) {
                entries.remove(&lru_key);
                self.record(|s| s.total_evictions += 1);
                info!(key = %lru_key, "Evicted LRU result from cache");
            }
        }

        entries.insert(key.clone(), CacheEntry::new(key.clone(), result.clone()));
        let size = entries.len();
        drop(entries);
        self.record(|s| s.cache_size = size);
        debug!(key = %key, "Result cached");
        Ok(PutOutcome::Inserted)
    }

    fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    fn clear(&self) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        let cleared_count = entries.len();
        entries.clear();
        drop(entries);
        self.record(|s| s.cache_size = 0);
        info!(cleared_count, "Cleared all results from cache");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edaforge_abstraction::{Metrics, ParamValue, Parameters};
    use std::time::Duration;

    fn key(level: i64) -> CacheKey {
        let mut params = Parameters::new();
        params.insert("optimization_level".to_string(), ParamValue::Int(level));
        CacheKey::new("verilator", &params, "no-inputs")
    }

    fn output(time: f64) -> ToolOutput {
        let mut metrics = Metrics::new();
        metrics.insert("execution_time".to_string(), time);
        ToolOutput::from_metrics(metrics)
    }

    #[test]
    fn test_get_put_round_trip_and_stats() {
        let cache = ResultCache::new(CacheConfig::default()).unwrap();

        assert_eq!(cache.get(&key(1)).unwrap(), None);
        assert_eq!(cache.put(&key(1), &output(10.0)).unwrap(), PutOutcome::Inserted);
        assert_eq!(cache.get(&key(1)).unwrap(), Some(output(10.0)));

        let stats = cache.get_stats();
        assert_eq!(stats.total_hits, 1);
        assert_eq!(stats.total_misses, 1);
        assert_eq!(stats.cache_size, 1);
    }

    #[test]
    fn test_put_is_idempotent() {
        let cache = ResultCache::new(CacheConfig::default()).unwrap();
        cache.put(&key(1), &output(10.0)).unwrap();

        assert_eq!(cache.put(&key(1), &output(10.0)).unwrap(), PutOutcome::Unchanged);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_last_write_wins_overwrites() {
        let cache = ResultCache::new(CacheConfig::default()).unwrap();
        cache.put(&key(1), &output(10.0)).unwrap();

        assert_eq!(cache.put(&key(1), &output(12.0)).unwrap(), PutOutcome::Overwritten);
        assert_eq!(cache.get(&key(1)).unwrap(), Some(output(12.0)));
    }

    #[test]
    fn test_reject_conflicting_keeps_first_result() {
        let config = CacheConfig { write_policy: WritePolicy::RejectConflicting, ..CacheConfig::default() };
        let cache = ResultCache::new(config).unwrap();
        cache.put(&key(1), &output(10.0)).unwrap();

        let err = cache.put(&key(1), &output(12.0)).unwrap_err();
        assert!(matches!(err, CacheError::Conflict { .. }));
        assert_eq!(cache.get(&key(1)).unwrap(), Some(output(10.0)));
        assert_eq!(cache.get_stats().total_conflicts, 1);
    }

    #[test]
    fn test_lru_eviction_when_cache_full() {
        let config = CacheConfig { max_entries: 2, ..CacheConfig::default() };
        let cache = ResultCache::new(config).unwrap();

        cache.put(&key(1), &output(1.0)).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        cache.put(&key(2), &output(2.0)).unwrap();
        std::thread::sleep(Duration::from_millis(2));

        // Touch key 1 so key 2 becomes least recently used
        assert!(cache.get(&key(1)).unwrap().is_some());
        cache.put(&key(3), &output(3.0)).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key(2)).unwrap().is_none());
        assert!(cache.get(&key(1)).unwrap().is_some());
        assert_eq!(cache.get_stats().total_evictions, 1);
    }

    #[test]
    fn test_ttl_expiry() {
        let config = CacheConfig { ttl_secs: Some(1), ..CacheConfig::default() };
        let cache = ResultCache::new(config).unwrap();
        cache.put(&key(1), &output(1.0)).unwrap();
        assert_eq!(cache.purge_expired(), 0);

        std::thread::sleep(Duration::from_millis(1100));

        assert!(cache.get(&key(1)).unwrap().is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_disabled_cache_always_misses() {
        let config = CacheConfig { enabled: false, ..CacheConfig::default() };
        let cache = ResultCache::new(config).unwrap();

        assert_eq!(cache.put(&key(1), &output(1.0)).unwrap(), PutOutcome::Skipped);
        assert_eq!(cache.get(&key(1)).unwrap(), None);
    }

    #[test]
    fn test_clear_and_remove() {
        let cache = ResultCache::new(CacheConfig::default()).unwrap();
        cache.put(&key(1), &output(1.0)).unwrap();
        cache.put(&key(2), &output(2.0)).unwrap();

        assert!(cache.remove(&key(1)));
        assert!(!cache.remove(&key(1)));
        cache.clear();
        assert!(cache.is_empty());
    }
}
