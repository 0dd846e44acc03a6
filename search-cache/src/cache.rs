use crate::Error;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "graphql")]
use async_graphql::SimpleObject;

/// Configuration for a cached search instance
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// How long the search query has to stay unchanged before it is fetched
    pub debounce: Duration,
    /// Maximum number of cached entries
    pub max_entries: usize,
    /// How long a cached entry stays valid, `None` keeps entries until evicted
    pub entry_ttl: Option<Duration>,
    /// Whether caching is enabled
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::milliseconds(300),
            max_entries: 10,
            entry_ttl: None,
            enabled: true,
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration
    pub fn new(debounce: Duration, max_entries: usize) -> Self {
        Self {
            debounce,
            max_entries,
            ..Self::default()
        }
    }

    pub fn with_entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = Some(ttl);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Debounce window as a timer-friendly duration
    pub fn debounce_delay(&self) -> Result<std::time::Duration, Error> {
        self.debounce.to_std().map_err(|_| {
            Error::InvalidConfig(format!("debounce must not be negative, got {}", self.debounce))
        })
    }

    /// Check the configuration for values a cache cannot work with
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_entries == 0 {
            return Err(Error::InvalidConfig(
                "max_entries must be at least 1".to_string(),
            ));
        }
        self.debounce_delay()?;
        if let Some(ttl) = self.entry_ttl {
            if ttl <= Duration::zero() {
                return Err(Error::InvalidConfig(format!(
                    "entry_ttl must be positive, got {}",
                    ttl
                )));
            }
        }
        Ok(())
    }
}

/// Cache key for a filter set combined with a search query.
///
/// Object keys are sorted at every level before hashing, so two filter values
/// that only differ in field order map to the same key.
#[derive(Hash, Eq, PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Generate a cache key for any serializable filter value and a search query
    pub fn from_query<F>(filters: &F, search_query: &str) -> Result<Self, Error>
    where
        F: Serialize + ?Sized,
    {
        let filters = serde_json::to_value(filters)?;
        Self::from_value(&filters, search_query)
    }

    /// Generate a cache key for filters that were already converted to JSON
    pub fn from_value(filters: &Value, search_query: &str) -> Result<Self, Error> {
        let mut canonical = String::from("{\"filters\":");
        write_canonical(filters, &mut canonical)?;
        canonical.push_str(",\"searchQuery\":");
        canonical.push_str(&serde_json::to_string(search_query)?);
        canonical.push('}');

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(CacheKey(hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn write_canonical(value: &Value, out: &mut String) -> Result<(), serde_json::Error> {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<_> = map.iter().collect();
            fields.sort_by(|(a, _), (b, _)| a.cmp(b));

            out.push('{');
            for (i, (name, field)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(name)?);
                out.push(':');
                write_canonical(field, out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

/// Cached fetch result with metadata
#[derive(Clone, Debug, Getters)]
#[get = "pub"]
pub struct CacheEntry<T> {
    key: CacheKey,
    data: T,
    timestamp: DateTime<Utc>,
    #[getset(skip)]
    sequence: u64,
}

impl<T> CacheEntry<T> {
    fn new(key: CacheKey, data: T, sequence: u64) -> Self {
        Self {
            key,
            data,
            timestamp: Utc::now(),
            sequence,
        }
    }

    /// Replace the data but keep the insertion position
    fn refresh(&mut self, data: T) {
        self.data = data;
        self.timestamp = Utc::now();
    }

    pub fn into_data(self) -> T {
        self.data
    }

    /// Check if the entry is still valid under the given TTL
    pub fn is_valid(&self, ttl: Option<Duration>) -> bool {
        match ttl {
            // An expiry past the representable range never comes
            Some(ttl) => self
                .timestamp
                .checked_add_signed(ttl)
                .map_or(true, |expires_at| Utc::now() < expires_at),
            None => true,
        }
    }
}

/// Capacity-bounded store that evicts in insertion order
pub struct CacheStore<T> {
    entries: DashMap<CacheKey, CacheEntry<T>>,
    next_sequence: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    pub config: CacheConfig,
}

impl<T: Clone> CacheStore<T> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            next_sequence: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            config,
        }
    }

    /// Get cached entry if available and valid
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        if !self.config.enabled {
            return None;
        }

        let expired = match self.entries.get(key) {
            Some(entry) if entry.is_valid(self.config.entry_ttl) => {
                log::debug!("Cache hit for key: {}", key);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value().clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            log::debug!("Cache expired for key: {}", key);
            self.entries.remove(key);
        }

        log::debug!("Cache miss for key: {}", key);
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Whether a valid entry exists, without touching hit/miss counters
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.config.enabled
            && self
                .entries
                .get(key)
                .is_some_and(|entry| entry.is_valid(self.config.entry_ttl))
    }

    /// Store data in cache, overwriting an existing entry in place
    pub fn insert(&self, key: CacheKey, data: T) {
        if !self.config.enabled {
            return;
        }

        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => occupied.get_mut().refresh(data),
            Entry::Vacant(vacant) => {
                let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
                vacant.insert(CacheEntry::new(key.clone(), data, sequence));
            }
        }
        log::debug!("Stored in cache with key: {}", key);

        if self.entries.len() > self.config.max_entries {
            self.evict_expired();
        }
        while self.entries.len() > self.config.max_entries {
            if !self.evict_oldest() {
                break;
            }
        }
    }

    pub fn remove(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    /// Remove expired entries from cache
    pub fn evict_expired(&self) -> usize {
        if self.config.entry_ttl.is_none() {
            return 0;
        }

        let expired_keys: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_valid(self.config.entry_ttl))
            .map(|entry| entry.key().clone())
            .collect();

        let expired_count = expired_keys.len();
        for key in expired_keys {
            self.entries.remove(&key);
        }

        if expired_count > 0 {
            log::debug!("Evicted {} expired cache entries", expired_count);
        }
        expired_count
    }

    /// Remove the entry that was inserted first
    fn evict_oldest(&self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().sequence)
            .map(|entry| entry.key().clone());

        match oldest {
            Some(key) => {
                self.entries.remove(&key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                log::debug!("Evicted oldest cache entry: {}", key);
                true
            }
            None => false,
        }
    }

    /// Clear all cache entries
    pub fn clear(&self) {
        self.entries.clear();
        log::info!("Cache cleared");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let total_entries = self.entries.len();
        let expired_entries = self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_valid(self.config.entry_ttl))
            .count();

        CacheStats {
            total_entries,
            valid_entries: total_entries - expired_entries,
            expired_entries,
            max_entries: self.config.max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "graphql", derive(SimpleObject))]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::Error as _;
    use serde_json::{json, Map};

    fn key(name: &str) -> CacheKey {
        CacheKey::from_query(&json!({ "name": name }), "").unwrap()
    }

    fn store(max_entries: usize) -> CacheStore<String> {
        CacheStore::new(CacheConfig::new(Duration::milliseconds(50), max_entries))
    }

    #[test]
    fn test_cache_key_ignores_field_order() {
        let mut forward = Map::new();
        forward.insert("search".to_string(), json!("beethoven"));
        forward.insert("page".to_string(), json!(1));
        forward.insert("sort".to_string(), json!({ "field": "title", "dir": "asc" }));

        let mut backward = Map::new();
        backward.insert("sort".to_string(), json!({ "dir": "asc", "field": "title" }));
        backward.insert("page".to_string(), json!(1));
        backward.insert("search".to_string(), json!("beethoven"));

        let key1 = CacheKey::from_query(&forward, "moonlight").unwrap();
        let key2 = CacheKey::from_query(&backward, "moonlight").unwrap();
        assert_eq!(key1, key2);
    }

    #[test]
    fn test_cache_key_matches_struct_and_map() {
        #[derive(Serialize)]
        struct Filters {
            search: &'static str,
            page: u32,
        }

        let from_struct = CacheKey::from_query(
            &Filters {
                search: "chopin",
                page: 2,
            },
            "",
        )
        .unwrap();
        let from_map = CacheKey::from_query(&json!({ "page": 2, "search": "chopin" }), "").unwrap();
        assert_eq!(from_struct, from_map);
    }

    #[test]
    fn test_cache_key_depends_on_query_and_filters() {
        let filters = json!({ "search": "beethoven", "page": 1 });
        let base = CacheKey::from_query(&filters, "sonata").unwrap();

        assert_ne!(base, CacheKey::from_query(&filters, "symphony").unwrap());
        assert_ne!(
            base,
            CacheKey::from_query(&json!({ "search": "beethoven", "page": 2 }), "sonata").unwrap()
        );
        // Empty filters and null filters are different inputs
        assert_ne!(
            CacheKey::from_query(&json!({}), "").unwrap(),
            CacheKey::from_query(&json!(null), "").unwrap()
        );
        assert_eq!(base.as_str().len(), 64);
    }

    #[test]
    fn test_cache_key_rejects_unserializable_filters() {
        struct Broken;

        impl Serialize for Broken {
            fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
                Err(S::Error::custom("filters cannot be serialized"))
            }
        }

        let result = CacheKey::from_query(&Broken, "query");
        assert!(matches!(result, Err(Error::KeyDerivation(_))));
    }

    #[test]
    fn test_store_evicts_first_inserted() {
        let store = store(3);
        for name in ["a", "b", "c", "d"] {
            store.insert(key(name), name.to_string());
            assert!(store.len() <= 3);
        }

        assert!(!store.contains(&key("a")));
        assert!(store.contains(&key("b")));
        assert!(store.contains(&key("d")));
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn test_store_ignores_access_order() {
        let store = store(3);
        for name in ["a", "b", "c"] {
            store.insert(key(name), name.to_string());
        }

        // Reads and overwrites do not move an entry to the back
        assert!(store.get(&key("a")).is_some());
        store.insert(key("a"), "a2".to_string());
        store.insert(key("d"), "d".to_string());

        assert!(store.get(&key("a")).is_none());
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_store_overwrite_refreshes_data() {
        let store = store(3);
        store.insert(key("a"), "first".to_string());
        store.insert(key("a"), "second".to_string());

        let entry = store.get(&key("a")).unwrap();
        assert_eq!(entry.data(), "second");
        assert_eq!(entry.key(), &key("a"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_cached_entry_validity() {
        let entry = CacheEntry::new(key("a"), (), 0);
        assert!(entry.is_valid(None));
        assert!(entry.is_valid(Some(Duration::seconds(1))));

        // Simulate expired entry
        let expired_entry = CacheEntry {
            key: key("a"),
            data: (),
            timestamp: Utc::now() - Duration::seconds(2),
            sequence: 0,
        };

        assert!(!expired_entry.is_valid(Some(Duration::seconds(1))));
        assert!(expired_entry.is_valid(None));
    }

    #[test]
    fn test_unbounded_ttl_never_expires() {
        let config = CacheConfig::new(Duration::milliseconds(50), 1).with_entry_ttl(Duration::MAX);
        let store: CacheStore<String> = CacheStore::new(config);
        assert!(store.config.validate().is_ok());

        store.insert(key("a"), "a".to_string());
        assert!(store.contains(&key("a")));
        assert_eq!(store.stats().expired_entries, 0);

        // Over capacity runs the expired sweep before FIFO eviction
        store.insert(key("b"), "b".to_string());
        assert!(store.get(&key("b")).is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_drops_expired_entries() {
        let config = CacheConfig::default().with_entry_ttl(Duration::seconds(1));
        let store: CacheStore<String> = CacheStore::new(config);
        store.insert(key("old"), "old".to_string());
        store.insert(key("new"), "new".to_string());

        if let Some(mut entry) = store.entries.get_mut(&key("old")) {
            entry.timestamp = Utc::now() - Duration::seconds(5);
        }

        let stats = store.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.expired_entries, 1);

        assert!(!store.contains(&key("old")));
        assert!(store.get(&key("old")).is_none());
        assert_eq!(store.len(), 1);
        assert_eq!(store.evict_expired(), 0);
    }

    #[test]
    fn test_disabled_store_keeps_nothing() {
        let store: CacheStore<String> =
            CacheStore::new(CacheConfig::default().with_enabled(false));
        store.insert(key("a"), "a".to_string());

        assert!(store.is_empty());
        assert!(store.get(&key("a")).is_none());
    }

    #[test]
    fn test_stats_count_hits_and_misses() {
        let store = store(3);
        store.insert(key("a"), "a".to_string());
        store.get(&key("a"));
        store.get(&key("b"));
        store.clear();

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.max_entries, 3);
    }

    #[test]
    fn test_config_validation() {
        assert!(CacheConfig::default().validate().is_ok());
        assert!(matches!(
            CacheConfig::new(Duration::milliseconds(50), 0).validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            CacheConfig::new(Duration::milliseconds(-1), 3).validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            CacheConfig::default()
                .with_entry_ttl(Duration::zero())
                .validate(),
            Err(Error::InvalidConfig(_))
        ));
    }
}
