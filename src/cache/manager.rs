use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::strategy::InvalidationStrategy;
use crate::infrastructure::error::{ResourceError, ResourceResult};
use crate::infrastructure::events::EventBus;
use crate::infrastructure::scheduler::PeriodicTask;

const HOT_KEY_LIMIT: usize = 10;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    pub max_entries: usize,
    /// TTL applied when `set` is called without one; 0 disables expiry
    pub default_ttl_ms: u64,
    pub enable_statistics: bool,
    /// Encoded values at least this large are gzip-compressed; 0 disables
    pub compression_threshold: usize,
    pub cleanup_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl_ms: 5 * 60 * 1000,
            enable_statistics: true,
            compression_threshold: 1024,
            cleanup_interval_ms: 60 * 1000,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> ResourceResult<()> {
        if self.max_entries == 0 {
            return Err(ResourceError::validation(
                "maxEntries must be at least 1",
                Some("cache.maxEntries"),
            ));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(ResourceError::validation(
                "cleanupIntervalMs must be positive",
                Some("cache.cleanupIntervalMs"),
            ));
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl_ms > 0).then(|| Duration::from_millis(self.default_ttl_ms))
    }
}

/// Cache entry with metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    data: Vec<u8>,
    pub compressed: bool,
    pub created_at: Instant,
    pub expires_at: Option<Instant>,
    pub last_accessed: Instant,
    pub access_count: u64,
    /// Approximate footprint: encoded value plus key
    pub size: usize,
}

impl CacheEntry {
    fn new(key: &str, data: Vec<u8>, compressed: bool, ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            size: data.len() + key.len(),
            data,
            compressed,
            created_at: now,
            expires_at: ttl.map(|ttl| now + ttl),
            last_accessed: now,
            access_count: 0,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |expires_at| now >= expires_at)
    }

    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.created_at)
    }

    fn touch(&mut self, now: Instant) {
        self.access_count += 1;
        self.last_accessed = now;
    }
}

/// Lifecycle notifications published by the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Hit { key: String },
    Miss { key: String },
    Evicted { key: String },
    Expired { key: String },
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entry_count: usize,
    pub max_entries: usize,
    pub memory_usage: usize,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidations: u64,
    pub sets: u64,
    pub deletes: u64,
}

/// Derived efficiency figures
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachePerformanceMetrics {
    pub hit_rate: f64,
    pub memory_usage_mb: f64,
    pub avg_entry_size: usize,
    pub utilization: f64,
    /// Encoded bytes after compression divided by bytes before, 1.0 when nothing was compressed
    pub compression_ratio: f64,
    pub eviction_rate: f64,
    pub hot_keys: Vec<HotKey>,
    pub age_distribution: AgeDistribution,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HotKey {
    pub key: String,
    pub access_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgeDistribution {
    pub under_one_minute: usize,
    pub under_ten_minutes: usize,
    pub under_one_hour: usize,
    pub older: usize,
}

/// Result of a bulk write; one bad value never blocks the rest
#[derive(Debug, Default)]
pub struct BulkSetOutcome {
    pub applied: usize,
    pub failed: Vec<(String, ResourceError)>,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    invalidations: u64,
    sets: u64,
    deletes: u64,
    bytes_before_compression: u64,
    bytes_after_compression: u64,
}

struct CacheState {
    entries: LruCache<String, CacheEntry>,
    memory_usage: usize,
    counters: CacheCounters,
}

impl CacheState {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.memory_usage = self.memory_usage.saturating_sub(entry.size);
        Some(entry)
    }
}

struct CacheShared {
    config: CacheConfig,
    state: Mutex<CacheState>,
    events: EventBus<CacheEvent>,
    cleanup_task: Mutex<Option<PeriodicTask>>,
    disposed: AtomicBool,
}

enum Lookup<T> {
    Hit(T),
    Expired,
    Corrupt,
    Miss,
}

/// In-memory LRU/TTL cache
///
/// Cloning yields another handle to the same store. Reads and writes never
/// suspend: every operation runs under one short lock, which also makes
/// `invalidate` atomic with respect to concurrent readers.
#[derive(Clone)]
pub struct CacheManager {
    shared: Arc<CacheShared>,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> ResourceResult<Self> {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.max_entries).ok_or_else(|| {
            ResourceError::validation("maxEntries must be at least 1", Some("cache.maxEntries"))
        })?;

        Ok(Self {
            shared: Arc::new(CacheShared {
                state: Mutex::new(CacheState {
                    entries: LruCache::new(capacity),
                    memory_usage: 0,
                    counters: CacheCounters::default(),
                }),
                config,
                events: EventBus::new(),
                cleanup_task: Mutex::new(None),
                disposed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.shared.events.subscribe()
    }

    /// Get data from cache
    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let now = Instant::now();
        let stats_enabled = self.shared.config.enable_statistics;
        let mut state = self.shared.state.lock();

        let lookup = match state.entries.get_mut(key) {
            Some(entry) if entry.is_expired_at(now) => Lookup::Expired,
            Some(entry) => match decode::<T>(&entry.data, entry.compressed) {
                Ok(value) => {
                    entry.touch(now);
                    Lookup::Hit(value)
                }
                Err(_) => Lookup::Corrupt,
            },
            None => Lookup::Miss,
        };

        let expired = matches!(lookup, Lookup::Expired);
        let result = match lookup {
            Lookup::Hit(value) => Some(value),
            Lookup::Expired => {
                state.remove(key);
                state.counters.expirations += 1;
                None
            }
            Lookup::Corrupt => {
                // Type mismatch or damaged payload; drop it so the next set starts clean
                state.remove(key);
                warn!(key, "dropping cache entry that failed to decode");
                None
            }
            Lookup::Miss => None,
        };

        if stats_enabled {
            if result.is_some() {
                state.counters.hits += 1;
            } else {
                state.counters.misses += 1;
            }
        }
        drop(state);

        if expired {
            self.shared.events.emit_with(|| CacheEvent::Expired { key: key.to_string() });
        }
        if result.is_some() {
            self.shared.events.emit_with(|| CacheEvent::Hit { key: key.to_string() });
        } else {
            self.shared.events.emit_with(|| CacheEvent::Miss { key: key.to_string() });
        }
        result
    }

    /// Set data in cache. `ttl` of `None` (or zero) uses the configured default.
    pub fn set<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> ResourceResult<()>
    where
        T: Serialize + ?Sized,
    {
        let encoded = encode(value, self.shared.config.compression_threshold).map_err(|e| {
            ResourceError::CacheCodec {
                key: key.to_string(),
                message: e.to_string(),
            }
        })?;
        let ttl = ttl
            .filter(|ttl| !ttl.is_zero())
            .or_else(|| self.shared.config.default_ttl());
        let entry = CacheEntry::new(key, encoded.data, encoded.compressed, ttl, Instant::now());

        let evicted = {
            let mut state = self.shared.state.lock();
            state.counters.sets += 1;
            if encoded.compressed {
                state.counters.bytes_before_compression += encoded.raw_len as u64;
                state.counters.bytes_after_compression += entry.data.len() as u64;
            }
            state.memory_usage += entry.size;

            match state.entries.push(key.to_string(), entry) {
                Some((old_key, old_entry)) => {
                    state.memory_usage = state.memory_usage.saturating_sub(old_entry.size);
                    if old_key != key {
                        state.counters.evictions += 1;
                        Some(old_key)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };

        if let Some(old_key) = evicted {
            debug!(key = %old_key, "evicted least recently used entry");
            self.shared.events.emit(CacheEvent::Evicted { key: old_key });
        }
        Ok(())
    }

    /// Remove data from cache
    pub fn delete(&self, key: &str) -> bool {
        let mut state = self.shared.state.lock();
        let removed = state.remove(key).is_some();
        if removed {
            state.counters.deletes += 1;
        }
        removed
    }

    /// Remove every entry selected by `strategy`, returning how many went away.
    pub fn invalidate(&self, strategy: &InvalidationStrategy) -> usize {
        let mut state = self.shared.state.lock();
        let doomed: Vec<String> = state
            .entries
            .iter()
            .filter(|(key, entry)| strategy.matches(key, entry))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            state.remove(key);
        }
        state.counters.invalidations += doomed.len() as u64;
        drop(state);

        if !doomed.is_empty() {
            debug!(removed = doomed.len(), "invalidated cache entries");
        }
        doomed.len()
    }

    pub fn mget<T, K>(&self, keys: &[K]) -> Vec<Option<T>>
    where
        T: DeserializeOwned,
        K: AsRef<str>,
    {
        keys.iter().map(|key| self.get(key.as_ref())).collect()
    }

    pub fn mset<T>(&self, entries: Vec<(String, T, Option<Duration>)>) -> BulkSetOutcome
    where
        T: Serialize,
    {
        let mut outcome = BulkSetOutcome::default();
        for (key, value, ttl) in entries {
            match self.set(&key, &value, ttl) {
                Ok(()) => outcome.applied += 1,
                Err(e) => {
                    warn!(key = %key, error = %e, "bulk set skipped entry");
                    outcome.failed.push((key, e));
                }
            }
        }
        outcome
    }

    /// Check if cache contains a live entry without touching its LRU position
    pub fn contains_key(&self, key: &str) -> bool {
        let state = self.shared.state.lock();
        state
            .entries
            .peek(key)
            .map_or(false, |entry| !entry.is_expired())
    }

    /// Live keys, most recently used first
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let state = self.shared.state.lock();
        state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all cache data; statistics are kept
    pub fn clear(&self) {
        let mut state = self.shared.state.lock();
        state.entries.clear();
        state.memory_usage = 0;
    }

    /// Cleanup expired entries
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut state = self.shared.state.lock();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.remove(key);
        }
        state.counters.expirations += expired.len() as u64;
        drop(state);

        for key in &expired {
            self.shared.events.emit_with(|| CacheEvent::Expired { key: key.clone() });
        }
        if !expired.is_empty() {
            debug!(removed = expired.len(), "removed expired cache entries");
        }
        expired.len()
    }

    /// Pre-populate the cache from an asynchronous supplier
    pub async fn warm<F, Fut, T>(&self, supplier: F) -> BulkSetOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Vec<(String, T)>>,
        T: Serialize,
    {
        let pairs = supplier().await;
        let outcome = self.mset(pairs.into_iter().map(|(key, value)| (key, value, None)).collect());
        info!(applied = outcome.applied, failed = outcome.failed.len(), "cache warmed");
        outcome
    }

    /// Get cache statistics
    pub fn statistics(&self) -> CacheStatistics {
        let state = self.shared.state.lock();
        let counters = &state.counters;
        CacheStatistics {
            hits: counters.hits,
            misses: counters.misses,
            hit_rate: ratio(counters.hits, counters.hits + counters.misses),
            entry_count: state.entries.len(),
            max_entries: self.shared.config.max_entries,
            memory_usage: state.memory_usage,
            evictions: counters.evictions,
            expirations: counters.expirations,
            invalidations: counters.invalidations,
            sets: counters.sets,
            deletes: counters.deletes,
        }
    }

    /// Get detailed performance metrics
    pub fn performance_metrics(&self) -> CachePerformanceMetrics {
        let now = Instant::now();
        let state = self.shared.state.lock();
        let counters = &state.counters;
        let entry_count = state.entries.len();

        let mut hot_keys: Vec<HotKey> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.access_count > 0)
            .map(|(key, entry)| HotKey {
                key: key.clone(),
                access_count: entry.access_count,
            })
            .collect();
        hot_keys.sort_by(|a, b| b.access_count.cmp(&a.access_count).then_with(|| a.key.cmp(&b.key)));
        hot_keys.truncate(HOT_KEY_LIMIT);

        let mut age_distribution = AgeDistribution::default();
        for (_, entry) in state.entries.iter() {
            let age = now.saturating_duration_since(entry.created_at);
            if age < Duration::from_secs(60) {
                age_distribution.under_one_minute += 1;
            } else if age < Duration::from_secs(600) {
                age_distribution.under_ten_minutes += 1;
            } else if age < Duration::from_secs(3600) {
                age_distribution.under_one_hour += 1;
            } else {
                age_distribution.older += 1;
            }
        }

        let compression_ratio = if counters.bytes_before_compression == 0 {
            1.0
        } else {
            counters.bytes_after_compression as f64 / counters.bytes_before_compression as f64
        };

        CachePerformanceMetrics {
            hit_rate: ratio(counters.hits, counters.hits + counters.misses),
            memory_usage_mb: state.memory_usage as f64 / (1024.0 * 1024.0),
            avg_entry_size: if entry_count == 0 { 0 } else { state.memory_usage / entry_count },
            utilization: entry_count as f64 / self.shared.config.max_entries as f64,
            compression_ratio,
            eviction_rate: ratio(counters.evictions, counters.sets),
            hot_keys,
            age_distribution,
        }
    }

    /// Start the periodic expired-entry sweep. Calling it again is a no-op.
    pub fn start_cleanup_task(&self) {
        if self.shared.disposed.load(Ordering::SeqCst) {
            return;
        }
        let mut slot = self.shared.cleanup_task.lock();
        if slot.is_some() {
            return;
        }

        let weak: Weak<CacheShared> = Arc::downgrade(&self.shared);
        let period = Duration::from_millis(self.shared.config.cleanup_interval_ms);
        *slot = Some(PeriodicTask::spawn("cache-cleanup", period, move || {
            let weak = weak.clone();
            async move {
                if let Some(shared) = weak.upgrade() {
                    CacheManager { shared }.cleanup();
                }
            }
        }));
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    /// Stop timers and release every entry. Safe to call more than once.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.shared.cleanup_task.lock().take() {
            task.stop();
        }
        self.clear();
        info!("cache disposed");
    }
}

struct Encoded {
    data: Vec<u8>,
    raw_len: usize,
    compressed: bool,
}

fn encode<T>(value: &T, compression_threshold: usize) -> anyhow::Result<Encoded>
where
    T: Serialize + ?Sized,
{
    let raw = bincode::serialize(value).map_err(|e| anyhow::anyhow!("Serialization error: {}", e))?;
    let raw_len = raw.len();

    if compression_threshold > 0 && raw_len >= compression_threshold {
        let compressed = compress_data(&raw)?;
        if compressed.len() < raw_len {
            return Ok(Encoded {
                data: compressed,
                raw_len,
                compressed: true,
            });
        }
    }

    Ok(Encoded {
        data: raw,
        raw_len,
        compressed: false,
    })
}

fn decode<T>(data: &[u8], compressed: bool) -> anyhow::Result<T>
where
    T: DeserializeOwned,
{
    let value = if compressed {
        bincode::deserialize(&decompress_data(data)?)
    } else {
        bincode::deserialize(data)
    };
    value.map_err(|e| anyhow::anyhow!("Deserialization error: {}", e))
}

fn compress_data(data: &[u8]) -> anyhow::Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn decompress_data(data: &[u8]) -> anyhow::Result<Vec<u8>> {
    use flate2::read::GzDecoder;
    use std::io::Read;

    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;

    pub fn entry() -> CacheEntry {
        CacheEntry::new("test", vec![0; 4], false, None, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn small_cache(max_entries: usize) -> CacheManager {
        CacheManager::new(CacheConfig {
            max_entries,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_cache_basic_operations() {
        let cache = small_cache(10);

        cache.set("key1", "value1", None).unwrap();
        let result: Option<String> = cache.get("key1");
        assert_eq!(result, Some("value1".to_string()));

        let result: Option<String> = cache.get("nonexistent");
        assert_eq!(result, None);

        assert!(cache.contains_key("key1"));
        assert!(!cache.contains_key("nonexistent"));

        assert!(cache.delete("key1"));
        assert!(!cache.delete("key1"));
        let result: Option<String> = cache.get("key1");
        assert_eq!(result, None);
    }

    #[test]
    fn test_lru_eviction_respects_reads() {
        let cache = small_cache(5);
        for i in 1..=5 {
            cache.set(&format!("key{}", i), &i, None).unwrap();
        }

        let touched: Option<i32> = cache.get("key1");
        assert_eq!(touched, Some(1));

        cache.set("key6", &6, None).unwrap();

        assert_eq!(cache.get::<i32>("key2"), None);
        assert_eq!(cache.get::<i32>("key1"), Some(1));
        assert_eq!(cache.get::<i32>("key6"), Some(6));
        assert_eq!(cache.len(), 5);
        assert_eq!(cache.statistics().evictions, 1);
    }

    #[test]
    fn test_lru_eviction_without_reads_drops_oldest() {
        let cache = small_cache(3);
        for i in 1..=4 {
            cache.set(&format!("key{}", i), &i, None).unwrap();
        }
        assert!(!cache.contains_key("key1"));
        for i in 2..=4 {
            assert!(cache.contains_key(&format!("key{}", i)));
        }
    }

    #[test]
    fn test_overwrite_is_not_an_eviction() {
        let cache = small_cache(2);
        cache.set("a", &1, None).unwrap();
        cache.set("b", &2, None).unwrap();
        cache.set("a", &10, None).unwrap();

        assert_eq!(cache.get::<i32>("a"), Some(10));
        assert_eq!(cache.get::<i32>("b"), Some(2));
        assert_eq!(cache.statistics().evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = small_cache(10);
        cache.set("key1", "value1", Some(Duration::from_millis(100))).unwrap();

        tokio::time::advance(Duration::from_millis(99)).await;
        assert_eq!(cache.get::<String>("key1"), Some("value1".to_string()));

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(cache.get::<String>("key1"), None);

        let stats = cache.statistics();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.entry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_removes_only_expired() {
        let cache = CacheManager::new(CacheConfig {
            default_ttl_ms: 0,
            ..Default::default()
        })
        .unwrap();
        cache.set("short", "v", Some(Duration::from_millis(50))).unwrap();
        cache.set("forever", "v", None).unwrap();

        tokio::time::advance(Duration::from_millis(100)).await;

        assert_eq!(cache.cleanup(), 1);
        assert!(!cache.contains_key("short"));
        assert!(cache.contains_key("forever"));
    }

    #[test]
    fn test_pattern_invalidation() {
        let cache = small_cache(10);
        cache.set("user:1", "a", None).unwrap();
        cache.set("user:2", "b", None).unwrap();
        cache.set("post:1", "c", None).unwrap();

        let removed = cache.invalidate(&InvalidationStrategy::Pattern(Regex::new("^user:").unwrap()));
        assert_eq!(removed, 2);
        assert!(cache.contains_key("post:1"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_predicate_invalidation() {
        let cache = small_cache(10);
        cache.set("a", &1, None).unwrap();
        cache.set("b", &2, None).unwrap();
        let _: Option<i32> = cache.get("a");

        let removed = cache.invalidate(&InvalidationStrategy::predicate(|_, entry| entry.access_count == 0));
        assert_eq!(removed, 1);
        assert!(cache.contains_key("a"));
    }

    #[test]
    fn test_statistics_invariant() {
        let cache = small_cache(4);
        cache.set("a", &1, None).unwrap();
        let keys = ["a", "b", "a", "c", "a"];
        for key in keys {
            let _: Option<i32> = cache.get(key);
        }

        let stats = cache.statistics();
        assert_eq!(stats.hits + stats.misses, keys.len() as u64);
        assert_eq!(stats.hits, 3);
        assert!((stats.hit_rate - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn test_mget_and_mset() {
        let cache = small_cache(10);
        let outcome = cache.mset(vec![
            ("x".to_string(), 1u32, None),
            ("y".to_string(), 2u32, Some(Duration::from_secs(60))),
        ]);
        assert_eq!(outcome.applied, 2);
        assert!(outcome.failed.is_empty());

        let values: Vec<Option<u32>> = cache.mget(&["x", "missing", "y"]);
        assert_eq!(values, vec![Some(1), None, Some(2)]);
    }

    #[test]
    fn test_compression_round_trip() {
        let cache = CacheManager::new(CacheConfig {
            compression_threshold: 10,
            ..Default::default()
        })
        .unwrap();

        let large = "x".repeat(1000);
        cache.set("large", &large, None).unwrap();
        assert_eq!(cache.get::<String>("large"), Some(large));

        let metrics = cache.performance_metrics();
        assert!(metrics.compression_ratio > 0.0);
        assert!(metrics.compression_ratio < 1.0);
    }

    #[test]
    fn test_type_mismatch_is_a_miss() {
        let cache = small_cache(10);
        cache.set("n", "not a number", None).unwrap();
        let value: Option<Vec<u64>> = cache.get("n");
        assert_eq!(value, None);
        assert!(!cache.contains_key("n"));
    }

    #[test]
    fn test_hot_keys_ordering() {
        let cache = small_cache(10);
        cache.set("cold", &0, None).unwrap();
        cache.set("warm", &0, None).unwrap();
        cache.set("hot", &0, None).unwrap();
        for _ in 0..3 {
            let _: Option<i32> = cache.get("hot");
        }
        let _: Option<i32> = cache.get("warm");

        let metrics = cache.performance_metrics();
        let keys: Vec<&str> = metrics.hot_keys.iter().map(|k| k.key.as_str()).collect();
        assert_eq!(keys, vec!["hot", "warm"]);
        assert_eq!(metrics.age_distribution.under_one_minute, 3);
    }

    #[tokio::test]
    async fn test_warm_inserts_everything() {
        let cache = small_cache(10);
        let outcome = cache
            .warm(|| async { vec![("k1".to_string(), 1), ("k2".to_string(), 2)] })
            .await;
        assert_eq!(outcome.applied, 2);
        assert_eq!(cache.get::<i32>("k2"), Some(2));
    }

    #[tokio::test]
    async fn test_events_for_hit_and_miss() {
        let cache = small_cache(10);
        let mut events = cache.subscribe();
        cache.set("k", &1, None).unwrap();
        let _: Option<i32> = cache.get("k");
        let _: Option<i32> = cache.get("nope");

        assert_eq!(events.recv().await.unwrap(), CacheEvent::Hit { key: "k".to_string() });
        assert_eq!(events.recv().await.unwrap(), CacheEvent::Miss { key: "nope".to_string() });
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_read_emits_expired_then_miss() {
        let cache = small_cache(10);
        let mut events = cache.subscribe();
        cache.set("short", &1, Some(Duration::from_millis(50))).unwrap();
        tokio::time::advance(Duration::from_millis(100)).await;

        assert_eq!(cache.get::<i32>("short"), None);
        assert_eq!(events.recv().await.unwrap(), CacheEvent::Expired { key: "short".to_string() });
        assert_eq!(events.recv().await.unwrap(), CacheEvent::Miss { key: "short".to_string() });
        assert_eq!(cache.statistics().expirations, 1);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let cache = small_cache(10);
        cache.start_cleanup_task();
        cache.set("k", &1, None).unwrap();

        cache.dispose();
        cache.dispose();

        assert!(cache.is_disposed());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = CacheManager::new(CacheConfig {
            max_entries: 0,
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err, ResourceError::Validation { .. }));
    }
}
