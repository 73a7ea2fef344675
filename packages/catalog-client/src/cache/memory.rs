//! In-memory byte-budgeted LRU tier (spec §4.3).

use bytes::Bytes;
use dashmap::DashSet;
use quick_cache::sync::Cache;
use quick_cache::Weighter;

#[derive(Clone, Copy)]
struct BytesWeighter;

impl Weighter<String, Bytes> for BytesWeighter {
    fn weight(&self, _key: &String, value: &Bytes) -> u64 {
        value.len().max(1) as u64
    }
}

/// In-memory tier: a byte-weighted LRU. Never holds TTL or protection
/// bookkeeping -- those live only in the disk tier, since the memory tier
/// is a pure performance cache and is dropped on process exit.
///
/// `known_keys` mirrors the cache's key set so `remove_keys_with_prefix`
/// doesn't depend on the underlying LRU exposing iteration; entries quietly
/// evicted by `quick_cache` itself are reconciled lazily on next lookup.
pub struct MemoryCache {
    inner: Cache<String, Bytes, BytesWeighter>,
    known_keys: DashSet<String>,
}

impl MemoryCache {
    #[must_use]
    pub fn new(max_bytes: u64) -> Self {
        Self {
            inner: Cache::with_weighter(1024, max_bytes.max(1), BytesWeighter),
            known_keys: DashSet::new(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let hit = self.inner.get(key);
        if hit.is_none() {
            self.known_keys.remove(key);
        }
        hit
    }

    pub fn put(&self, key: String, value: Bytes) {
        self.known_keys.insert(key.clone());
        self.inner.insert(key, value);
    }

    pub fn remove(&self, key: &str) {
        self.known_keys.remove(key);
        self.inner.remove(key);
    }

    pub fn remove_prefix(&self, prefix: &str) {
        let victims: Vec<String> = self
            .known_keys
            .iter()
            .filter(|k| k.starts_with(prefix))
            .map(|k| k.clone())
            .collect();
        for key in victims {
            self.remove(&key);
        }
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn clear(&self) {
        self.inner.clear();
        self.known_keys.clear();
    }

    #[must_use]
    pub fn weight(&self) -> u64 {
        self.inner.weight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_roundtrips() {
        let cache = MemoryCache::new(1024);
        cache.put("k".to_string(), Bytes::from_static(b"value"));
        assert_eq!(cache.get("k"), Some(Bytes::from_static(b"value")));
    }

    #[test]
    fn remove_prefix_drops_matching_keys() {
        let cache = MemoryCache::new(1024);
        cache.put("a::1".to_string(), Bytes::from_static(b"1"));
        cache.put("a::2".to_string(), Bytes::from_static(b"2"));
        cache.put("b::1".to_string(), Bytes::from_static(b"3"));
        cache.remove_prefix("a::");
        assert!(cache.get("a::1").is_none());
        assert!(cache.get("a::2").is_none());
        assert!(cache.get("b::1").is_some());
    }

    #[test]
    fn byte_budget_evicts_when_exceeded() {
        let cache = MemoryCache::new(16);
        for i in 0..10 {
            cache.put(format!("k{i}"), Bytes::from(vec![0u8; 8]));
        }
        assert!(cache.weight() <= 32);
    }
}
