//! Drive Cache Implementation
//!
//! Read-through cache for listings, searches and file metadata using Moka.
//! Uses synchronous caches to match the blocking facade.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use moka::Expiry;
use tracing::{debug, trace};

use super::keys::{CacheKey, CachedValue};
use crate::config::CacheConfig;
use crate::drive::{FileList, FileRecord};

/// Per-kind TTL, restarted on every insert or overwrite
struct KindExpiry {
    listing_ttl: Duration,
    search_ttl: Duration,
    metadata_ttl: Duration,
}

impl KindExpiry {
    fn ttl_for(&self, key: &CacheKey) -> Duration {
        match key {
            CacheKey::Listing { .. } => self.listing_ttl,
            CacheKey::Search { .. } => self.search_ttl,
            CacheKey::Metadata { .. } => self.metadata_ttl,
        }
    }
}

impl Expiry<CacheKey, CachedValue> for KindExpiry {
    fn expire_after_create(
        &self,
        key: &CacheKey,
        _value: &CachedValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(self.ttl_for(key))
    }

    fn expire_after_update(
        &self,
        key: &CacheKey,
        _value: &CachedValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(self.ttl_for(key))
    }
}

/// Hit/miss counters and entry counts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Percentage of lookups served from cache
    pub hit_rate: f64,
    pub entries: u64,
    pub records: u64,
}

/// Drive cache with TTL support
///
/// Holds two structures:
/// - a TTL map from typed keys to listings, searches and metadata
/// - a bounded LRU map of file records by id, also TTL-bounded
pub struct DriveCache {
    /// TTL map keyed by operation and parameters
    entries: Cache<CacheKey, CachedValue>,
    /// Bounded LRU map of file records by id
    records: Cache<String, FileRecord>,
    /// Cache hit counter
    hits: AtomicU64,
    /// Cache miss counter
    misses: AtomicU64,
    /// Bumped before every invalidation; fills started earlier are dropped
    generation: AtomicU64,
}

impl DriveCache {
    /// Create a cache; `name` identifies the owning session in metrics
    pub fn new(name: &str, config: &CacheConfig) -> Self {
        let entries = Cache::builder()
            .name(&format!("{}_entries", name))
            .expire_after(KindExpiry {
                listing_ttl: config.listing_ttl,
                search_ttl: config.search_ttl,
                metadata_ttl: config.metadata_ttl,
            })
            .build();

        let records = Cache::builder()
            .name(&format!("{}_records", name))
            .max_capacity(config.metadata_capacity)
            .time_to_live(config.metadata_ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self {
            entries,
            records,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    /// Current invalidation generation
    ///
    /// Read it before a remote fetch and pass it to [`set_since`](Self::set_since)
    /// or [`store_metadata_since`](Self::store_metadata_since) afterwards.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Get a live entry
    ///
    /// Expired entries are never returned. Updates hit/miss counters.
    pub fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        match self.entries.get(key) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key = ?key, "Cache HIT");
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(key = ?key, "Cache MISS");
                None
            }
        }
    }

    /// Insert or overwrite an entry; its TTL starts now
    pub fn set(&self, key: CacheKey, value: CachedValue) {
        debug!(key = ?key, "Cached entry");
        self.entries.insert(key, value);
    }

    /// Get a cached listing page
    pub fn get_listing(&self, key: &CacheKey) -> Option<FileList> {
        match self.get(key)? {
            CachedValue::Listing(page) => Some(page),
            _ => None,
        }
    }

    /// Get cached search results
    pub fn get_search(&self, key: &CacheKey) -> Option<Vec<FileRecord>> {
        match self.get(key)? {
            CachedValue::Search(files) => Some(files),
            _ => None,
        }
    }

    /// Insert an entry fetched after `generation` was read
    ///
    /// If an invalidation ran in the meantime the entry may predate the
    /// mutation, so it is removed again. Returns whether it was kept.
    pub fn set_since(&self, generation: u64, key: CacheKey, value: CachedValue) -> bool {
        self.entries.insert(key.clone(), value);
        if self.generation() != generation {
            self.entries.invalidate(&key);
            debug!(key = ?key, "Dropped fill raced by an invalidation");
            return false;
        }
        debug!(key = ?key, "Cached entry");
        true
    }

    /// Look up a file record without fetching
    ///
    /// Checks the LRU map first, then the TTL map. A TTL hit is not copied
    /// back into the LRU map, which would restart its lifetime.
    pub fn cached_metadata(&self, file_id: &str) -> Option<FileRecord> {
        if let Some(record) = self.records.get(file_id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(file_id = file_id, "Record cache HIT");
            return Some(record);
        }

        match self.get(&CacheKey::metadata(file_id))? {
            CachedValue::Metadata(record) => Some(record),
            _ => None,
        }
    }

    /// Store a file record in both maps
    pub fn store_metadata(&self, record: &FileRecord) {
        self.records.insert(record.id.clone(), record.clone());
        self.entries.insert(
            CacheKey::metadata(&record.id),
            CachedValue::Metadata(record.clone()),
        );
        debug!(file_id = %record.id, "Cached file metadata");
    }

    /// Store a record fetched after `generation` was read
    ///
    /// Same race rule as [`set_since`](Self::set_since). Returns whether it was kept.
    pub fn store_metadata_since(&self, generation: u64, record: &FileRecord) -> bool {
        self.store_metadata(record);
        if self.generation() != generation {
            self.records.invalidate(&record.id);
            self.entries.invalidate(&CacheKey::metadata(&record.id));
            debug!(file_id = %record.id, "Dropped metadata raced by an invalidation");
            return false;
        }
        true
    }

    /// Return the cached record for `file_id`, or fetch and cache it
    ///
    /// Nothing is cached when `fetch` returns `None`.
    pub fn get_or_fetch_metadata<F>(&self, file_id: &str, fetch: F) -> Option<FileRecord>
    where
        F: FnOnce() -> Option<FileRecord>,
    {
        if let Some(record) = self.cached_metadata(file_id) {
            return Some(record);
        }

        let generation = self.generation();
        let record = fetch()?;
        self.store_metadata_since(generation, &record);
        Some(record)
    }

    /// Invalidate entries affected by a change
    ///
    /// With a scope, removes every entry whose key references it and empties
    /// the LRU map, which has no scoping. Without a scope, clears everything.
    pub fn invalidate(&self, scope: Option<&str>) {
        // Bump first so a concurrent fill either sees the new generation or
        // lands before the scan below
        self.generation.fetch_add(1, Ordering::SeqCst);
        let Some(scope) = scope else {
            self.clear();
            return;
        };

        let stale: Vec<_> = self
            .entries
            .iter()
            .filter(|(key, _)| key.references(scope))
            .map(|(key, _)| key)
            .collect();
        for key in &stale {
            self.entries.invalidate(key.as_ref());
        }
        self.records.invalidate_all();

        debug!(scope = scope, removed = stale.len(), "Invalidated cache scope");
    }

    /// Clear all caches
    ///
    /// Call this on sign-out or when resetting state.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.invalidate_all();
        self.records.invalidate_all();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        debug!("Cleared all drive caches");
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        CacheStats {
            hits,
            misses,
            hit_rate,
            entries: self.entries.entry_count(),
            records: self.records.entry_count(),
        }
    }

    /// Log current cache metrics
    pub fn log_metrics(&self) {
        let stats = self.stats();
        debug!(
            hits = stats.hits,
            misses = stats.misses,
            hit_rate = format!("{:.1}%", stats.hit_rate),
            entries = stats.entries,
            records = stats.records,
            "Cache metrics"
        );
    }

    /// Apply pending evictions so entry counts are exact
    pub fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks();
        self.records.run_pending_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::ListingFilter;
    use std::thread;

    fn record(id: &str) -> FileRecord {
        FileRecord {
            id: id.to_string(),
            name: format!("{}.txt", id),
            mime_type: "text/plain".to_string(),
            size: Some(1024),
            created_time: None,
            modified_time: None,
            parents: vec!["root".to_string()],
            owners: Vec::new(),
            web_view_link: None,
        }
    }

    fn listing(ids: &[&str]) -> CachedValue {
        CachedValue::Listing(FileList {
            files: ids.iter().map(|id| record(id)).collect(),
            next_page_token: None,
        })
    }

    fn listing_key(folder: &str) -> CacheKey {
        CacheKey::listing(folder, ListingFilter::All, 100, None)
    }

    #[test]
    fn test_cache_hit_miss() {
        let cache = DriveCache::new("test", &CacheConfig::default());

        // Initially miss
        assert!(cache.get(&listing_key("F1")).is_none());
        assert_eq!(cache.stats().hit_rate, 0.0);

        // Insert and hit
        cache.set(listing_key("F1"), listing(&["a"]));
        assert!(cache.get_listing(&listing_key("F1")).is_some());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!(stats.hit_rate > 49.0 && stats.hit_rate < 51.0); // ~50%
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let config = CacheConfig::with_ttl(Duration::from_millis(200));
        let cache = DriveCache::new("test", &config);

        cache.set(listing_key("F1"), listing(&["a"]));
        cache.store_metadata(&record("a"));
        assert!(cache.get(&listing_key("F1")).is_some());
        assert!(cache.cached_metadata("a").is_some());

        thread::sleep(Duration::from_millis(350));

        assert!(cache.get(&listing_key("F1")).is_none());
        // The LRU path obeys the same TTL
        assert!(cache.cached_metadata("a").is_none());
    }

    #[test]
    fn test_overwrite_restarts_ttl() {
        let config = CacheConfig::with_ttl(Duration::from_millis(300));
        let cache = DriveCache::new("test", &config);

        cache.set(listing_key("F1"), listing(&["a"]));
        thread::sleep(Duration::from_millis(200));
        cache.set(listing_key("F1"), listing(&["a", "b"]));
        thread::sleep(Duration::from_millis(200));

        let page = cache.get_listing(&listing_key("F1")).unwrap();
        assert_eq!(page.files.len(), 2);
    }

    #[test]
    fn test_scoped_invalidation() {
        let cache = DriveCache::new("test", &CacheConfig::default());

        cache.set(listing_key("F1"), listing(&["a"]));
        cache.set(listing_key("F2"), listing(&["b"]));
        cache.set(
            CacheKey::listing("F1", ListingFilter::All, 100, Some("page-2")),
            listing(&["c"]),
        );

        cache.invalidate(Some("F1"));

        assert!(cache.get(&listing_key("F1")).is_none());
        assert!(cache
            .get(&CacheKey::listing("F1", ListingFilter::All, 100, Some("page-2")))
            .is_none());
        assert!(cache.get(&listing_key("F2")).is_some());
    }

    #[test]
    fn test_scoped_invalidation_clears_record_map() {
        let cache = DriveCache::new("test", &CacheConfig::default());

        cache.store_metadata(&record("a"));
        cache.store_metadata(&record("b"));
        cache.invalidate(Some("a"));

        // "a" is gone from both maps
        assert!(cache.cached_metadata("a").is_none());
        // "b" survives in the TTL map even though the LRU map was emptied
        assert!(cache.cached_metadata("b").is_some());
    }

    #[test]
    fn test_unscoped_search_invalidated_by_any_scope() {
        let cache = DriveCache::new("test", &CacheConfig::default());
        let global = CacheKey::search("report", None);
        let scoped = CacheKey::search("report", Some("F2"));

        cache.set(global.clone(), CachedValue::Search(vec![record("a")]));
        cache.set(scoped.clone(), CachedValue::Search(vec![record("b")]));
        cache.invalidate(Some("F1"));

        assert!(cache.get_search(&global).is_none());
        assert!(cache.get_search(&scoped).is_some());
    }

    #[test]
    fn test_get_or_fetch_populates_once() {
        let cache = DriveCache::new("test", &CacheConfig::default());
        let mut fetches = 0;

        let first = cache.get_or_fetch_metadata("a", || {
            fetches += 1;
            Some(record("a"))
        });
        assert_eq!(first.unwrap().id, "a");

        let second = cache.get_or_fetch_metadata("a", || {
            fetches += 1;
            Some(record("a"))
        });
        assert!(second.is_some());
        assert_eq!(fetches, 1);
    }

    #[test]
    fn test_get_or_fetch_does_not_cache_failures() {
        let cache = DriveCache::new("test", &CacheConfig::default());

        assert!(cache.get_or_fetch_metadata("missing", || None).is_none());
        assert!(cache.cached_metadata("missing").is_none());
        assert!(cache
            .get_or_fetch_metadata("missing", || Some(record("missing")))
            .is_some());
    }

    #[test]
    fn test_ttl_hit_does_not_extend_record_lifetime() {
        let config = CacheConfig::with_ttl(Duration::from_millis(300));
        let cache = DriveCache::new("test", &config);

        cache.store_metadata(&record("a"));
        // Empties the LRU map; "a" survives in the TTL map only
        cache.invalidate(Some("unrelated"));
        thread::sleep(Duration::from_millis(250));
        assert!(cache.cached_metadata("a").is_some());

        thread::sleep(Duration::from_millis(200));
        assert!(cache.cached_metadata("a").is_none());
    }

    #[test]
    fn test_fill_raced_by_invalidation_is_dropped() {
        let cache = DriveCache::new("test", &CacheConfig::default());

        let generation = cache.generation();
        cache.invalidate(Some("F1"));
        assert!(!cache.set_since(generation, listing_key("F1"), listing(&["stale"])));
        assert!(cache.get(&listing_key("F1")).is_none());

        let generation = cache.generation();
        assert!(cache.set_since(generation, listing_key("F1"), listing(&["fresh"])));
        assert!(cache.get(&listing_key("F1")).is_some());
    }

    #[test]
    fn test_metadata_raced_by_clear_is_dropped() {
        let cache = DriveCache::new("test", &CacheConfig::default());

        let generation = cache.generation();
        cache.clear();
        assert!(!cache.store_metadata_since(generation, &record("a")));
        assert!(cache.cached_metadata("a").is_none());
    }

    #[test]
    fn test_record_map_is_bounded() {
        let config = CacheConfig {
            metadata_capacity: 4,
            ..CacheConfig::default()
        };
        let cache = DriveCache::new("test", &config);

        for i in 0..20 {
            cache.records.insert(format!("id-{}", i), record(&format!("id-{}", i)));
        }
        cache.run_pending_tasks();

        assert!(cache.records.entry_count() <= 4);
    }

    #[test]
    fn test_cache_clear() {
        let cache = DriveCache::new("test", &CacheConfig::default());

        cache.set(listing_key("F1"), listing(&["a"]));
        cache.store_metadata(&record("a"));
        cache.get(&listing_key("F1"));

        cache.invalidate(None);

        assert!(cache.get(&listing_key("F1")).is_none());
        assert!(cache.cached_metadata("a").is_none());

        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }
}
