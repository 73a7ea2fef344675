//! Mutable on-disk KV tier: TTL sidecar records, LRU eviction, and the
//! durable protected-set bookkeeping (spec §4.3).

use catalog_core::cache_key::{is_internal_key, INTERNAL_PREFIX, PROTECTED_PREFIX};
use catalog_core::{ApiError, ErrorKind};
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::types::{is_expired, now_unix_millis, EvictionPolicy, NO_EXPIRY, EVICTION_TARGET_RATIO};

const DATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("data");
const EXPIRY_TABLE: TableDefinition<&str, u64> = TableDefinition::new("expiry");
const ACCESS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("access");

fn io_error(err: impl std::fmt::Display) -> ApiError {
    ApiError::new(ErrorKind::Unknown, -1, format!("disk cache I/O error: {err}"))
}

/// Size of one `EXPIRY_TABLE` record (a `u64` millisecond timestamp).
const EXPIRY_RECORD_BYTES: u64 = std::mem::size_of::<u64>() as u64;

fn entry_byte_size(key: &str, value_len: usize, has_expiry: bool) -> u64 {
    key.len() as u64 + value_len as u64 + if has_expiry { EXPIRY_RECORD_BYTES } else { 0 }
}

/// Mutable on-disk tier. Every key written here also gets an `ACCESS_TABLE`
/// timestamp used for LRU ordering, and an optional `EXPIRY_TABLE` record
/// if a finite TTL was supplied.
pub struct DiskCache {
    db: Arc<Database>,
    max_bytes: AtomicU64,
    policy: EvictionPolicy,
}

impl DiskCache {
    pub fn open(path: impl AsRef<Path>, max_bytes: u64, policy: EvictionPolicy) -> Result<Self, ApiError> {
        let db = Database::create(path).map_err(io_error)?;
        {
            let txn = db.begin_write().map_err(io_error)?;
            txn.open_table(DATA_TABLE).map_err(io_error)?;
            txn.open_table(EXPIRY_TABLE).map_err(io_error)?;
            txn.open_table(ACCESS_TABLE).map_err(io_error)?;
            txn.commit().map_err(io_error)?;
        }
        Ok(Self {
            db: Arc::new(db),
            max_bytes: AtomicU64::new(max_bytes),
            policy,
        })
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ApiError> {
        let (result, expired) = {
            let txn = self.db.begin_read().map_err(io_error)?;
            let data = txn.open_table(DATA_TABLE).map_err(io_error)?;
            let expiry = txn.open_table(EXPIRY_TABLE).map_err(io_error)?;
            let expires_at = expiry.get(key).map_err(io_error)?.map(|g| g.value());
            match expires_at {
                Some(expires_at) if is_expired(expires_at, now_unix_millis()) => (None, true),
                _ => (data.get(key).map_err(io_error)?.map(|g| g.value().to_vec()), false),
            }
        };

        if expired {
            self.remove(key)?;
            return Ok(None);
        }
        if result.is_some() && !is_internal_key(key) {
            let txn = self.db.begin_write().map_err(io_error)?;
            {
                let mut access = txn.open_table(ACCESS_TABLE).map_err(io_error)?;
                access.insert(key, now_unix_millis()).map_err(io_error)?;
            }
            txn.commit().map_err(io_error)?;
        }
        Ok(result)
    }

    pub fn put(&self, key: &str, value: &[u8], expiry: u64) -> Result<(), ApiError> {
        let txn = self.db.begin_write().map_err(io_error)?;
        {
            let mut data = txn.open_table(DATA_TABLE).map_err(io_error)?;
            data.insert(key, value).map_err(io_error)?;
            let mut expiry_table = txn.open_table(EXPIRY_TABLE).map_err(io_error)?;
            if expiry == NO_EXPIRY {
                expiry_table.remove(key).map_err(io_error)?;
            } else {
                expiry_table.insert(key, expiry).map_err(io_error)?;
            }
            if !is_internal_key(key) {
                let mut access = txn.open_table(ACCESS_TABLE).map_err(io_error)?;
                access.insert(key, now_unix_millis()).map_err(io_error)?;
            }
        }
        txn.commit().map_err(io_error)?;
        if self.policy == EvictionPolicy::LeastRecentlyUsed {
            self.evict()?;
        }
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<(), ApiError> {
        let txn = self.db.begin_write().map_err(io_error)?;
        {
            let mut data = txn.open_table(DATA_TABLE).map_err(io_error)?;
            data.remove(key).map_err(io_error)?;
            let mut expiry = txn.open_table(EXPIRY_TABLE).map_err(io_error)?;
            expiry.remove(key).map_err(io_error)?;
            let mut access = txn.open_table(ACCESS_TABLE).map_err(io_error)?;
            access.remove(key).map_err(io_error)?;
        }
        txn.commit().map_err(io_error)
    }

    pub fn remove_keys_with_prefix(&self, prefix: &str) -> Result<(), ApiError> {
        let victims = self.keys_with_prefix(prefix)?;
        for key in victims {
            self.remove(&key)?;
        }
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, ApiError> {
        let txn = self.db.begin_read().map_err(io_error)?;
        let data = txn.open_table(DATA_TABLE).map_err(io_error)?;
        let mut keys = Vec::new();
        for entry in data.iter().map_err(io_error)? {
            let (k, _) = entry.map_err(io_error)?;
            if k.value().starts_with(prefix) {
                keys.push(k.value().to_string());
            }
        }
        Ok(keys)
    }

    pub fn contains(&self, key: &str) -> Result<bool, ApiError> {
        Ok(self.get(key)?.is_some())
    }

    /// `Σ len(key) + len(value) + expiry_overhead(key)` (spec §3's cache
    /// size invariant): every entry's key and value bytes, plus the
    /// on-disk expiry-table record size for keys that carry a finite TTL.
    pub fn size(&self) -> Result<u64, ApiError> {
        let txn = self.db.begin_read().map_err(io_error)?;
        let data = txn.open_table(DATA_TABLE).map_err(io_error)?;
        let expiry = txn.open_table(EXPIRY_TABLE).map_err(io_error)?;
        let mut total = 0u64;
        for entry in data.iter().map_err(io_error)? {
            let (k, v) = entry.map_err(io_error)?;
            let has_expiry = expiry.get(k.value()).map_err(io_error)?.is_some();
            total += entry_byte_size(k.value(), v.value().len(), has_expiry);
        }
        Ok(total)
    }

    /// Logically reduces the byte budget and performs one eviction pass
    /// (spec §4.3: "`size(new_max_bytes)` ... returns the number of bytes
    /// freed").
    pub fn set_max_bytes(&self, new_max: u64) -> Result<u64, ApiError> {
        self.max_bytes.store(new_max, Ordering::Release);
        let before = self.size()?;
        if self.policy == EvictionPolicy::LeastRecentlyUsed {
            self.evict()?;
        }
        let after = self.size()?;
        Ok(before.saturating_sub(after))
    }

    fn evict(&self) -> Result<(), ApiError> {
        let max_bytes = self.max_bytes.load(Ordering::Acquire);
        let target = (max_bytes as f64 * EVICTION_TARGET_RATIO) as u64;
        let now = now_unix_millis();

        let protected = self.protected_set()?;

        // pass 1: expired, non-protected entries.
        let expired = self.expired_keys(now)?;
        for key in expired {
            if is_internal_key(&key) || is_protected_key(&key, &protected) {
                continue;
            }
            self.remove(&key)?;
        }

        if self.size()? <= target {
            return Ok(());
        }

        // pass 2: least-recently-used non-protected, non-internal entries.
        let mut by_access = self.access_ordered_keys()?;
        by_access.retain(|(key, _)| !is_internal_key(key) && !is_protected_key(key, &protected));

        let mut current = self.size()?;
        for (key, _) in by_access {
            if current <= target {
                break;
            }
            let txn = self.db.begin_read().map_err(io_error)?;
            let data = txn.open_table(DATA_TABLE).map_err(io_error)?;
            let expiry = txn.open_table(EXPIRY_TABLE).map_err(io_error)?;
            let freed = match data.get(key.as_str()).map_err(io_error)? {
                Some(g) => {
                    let has_expiry = expiry.get(key.as_str()).map_err(io_error)?.is_some();
                    entry_byte_size(&key, g.value().len(), has_expiry)
                }
                None => 0,
            };
            drop(data);
            drop(expiry);
            drop(txn);
            self.remove(&key)?;
            current = current.saturating_sub(freed);
            debug!(key, freed, "evicted disk cache entry");
        }
        Ok(())
    }

    fn expired_keys(&self, now: u64) -> Result<Vec<String>, ApiError> {
        let txn = self.db.begin_read().map_err(io_error)?;
        let expiry = txn.open_table(EXPIRY_TABLE).map_err(io_error)?;
        let mut keys = Vec::new();
        for entry in expiry.iter().map_err(io_error)? {
            let (k, v) = entry.map_err(io_error)?;
            if is_expired(v.value(), now) {
                keys.push(k.value().to_string());
            }
        }
        Ok(keys)
    }

    fn access_ordered_keys(&self) -> Result<Vec<(String, u64)>, ApiError> {
        let txn = self.db.begin_read().map_err(io_error)?;
        let access = txn.open_table(ACCESS_TABLE).map_err(io_error)?;
        let mut entries: Vec<(String, u64)> = Vec::new();
        for entry in access.iter().map_err(io_error)? {
            let (k, v) = entry.map_err(io_error)?;
            entries.push((k.value().to_string(), v.value()));
        }
        entries.sort_by_key(|(_, ts)| *ts);
        Ok(entries)
    }

    // --- protected set ---

    fn protected_set(&self) -> Result<BTreeSet<String>, ApiError> {
        match self.get(PROTECTED_PREFIX)? {
            Some(bytes) => {
                let list: Vec<String> = serde_json::from_slice(&bytes).unwrap_or_default();
                Ok(list.into_iter().collect())
            }
            None => Ok(BTreeSet::new()),
        }
    }

    fn save_protected_set(&self, set: &BTreeSet<String>) -> Result<(), ApiError> {
        let list: Vec<&String> = set.iter().collect();
        let bytes = serde_json::to_vec(&list).map_err(io_error)?;
        self.put(PROTECTED_PREFIX, &bytes, NO_EXPIRY)
    }

    /// Returns `false` if `key_or_prefix` is already covered by an existing
    /// protected prefix (spec §4.3).
    pub fn protect(&self, key_or_prefix: &str) -> Result<bool, ApiError> {
        let mut set = self.protected_set()?;
        if set.iter().any(|existing| is_prefix_of(existing, key_or_prefix)) {
            return Ok(false);
        }
        set.insert(key_or_prefix.to_string());
        self.save_protected_set(&set)?;
        Ok(true)
    }

    /// Returns `false` if `key_or_prefix` is only transitively protected via
    /// a broader prefix that must be released instead (spec §4.3).
    pub fn release(&self, key_or_prefix: &str) -> Result<bool, ApiError> {
        let mut set = self.protected_set()?;
        if set.remove(key_or_prefix) {
            self.save_protected_set(&set)?;
            return Ok(true);
        }
        if set.iter().any(|existing| is_prefix_of(existing, key_or_prefix)) {
            return Ok(false);
        }
        Ok(false)
    }

    pub fn is_protected(&self, key: &str) -> Result<bool, ApiError> {
        let set = self.protected_set()?;
        Ok(is_protected_key(key, &set))
    }

    pub fn clear(&self) -> Result<(), ApiError> {
        let keys = self.keys_with_prefix("")?;
        for key in keys {
            self.remove(&key)?;
        }
        Ok(())
    }

    /// Compacts the backing file. Requires exclusive access to the
    /// `redb::Database`; a no-op (with a debug log) if other handles to
    /// this cache are still live.
    pub fn compact(&mut self) -> Result<(), ApiError> {
        match Arc::get_mut(&mut self.db) {
            Some(db) => {
                db.compact().map_err(io_error)?;
                Ok(())
            }
            None => {
                debug!("skipping compact: disk cache handle is shared");
                Ok(())
            }
        }
    }
}

fn is_prefix_of(prefix_or_key: &str, candidate: &str) -> bool {
    prefix_or_key == candidate || candidate.starts_with(prefix_or_key)
}

fn is_protected_key(key: &str, protected: &BTreeSet<String>) -> bool {
    protected.iter().any(|entry| is_prefix_of(entry, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_cache() -> (tempfile::TempDir, DiskCache) {
        let dir = tempdir().unwrap();
        let cache = DiskCache::open(dir.path().join("cache.redb"), 1024, EvictionPolicy::LeastRecentlyUsed).unwrap();
        (dir, cache)
    }

    #[test]
    fn put_then_get_roundtrips() {
        let (_dir, cache) = open_cache();
        cache.put("k", b"value", NO_EXPIRY).unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(b"value".to_vec()));
    }

    #[test]
    fn expired_entries_read_as_absent() {
        let (_dir, cache) = open_cache();
        cache.put("k", b"value", now_unix_millis().saturating_sub(1)).unwrap();
        assert_eq!(cache.get("k").unwrap(), None);
    }

    #[test]
    fn protect_prevents_duplicate_under_prefix() {
        let (_dir, cache) = open_cache();
        assert!(cache.protect("a::").unwrap());
        assert!(!cache.protect("a::b").unwrap());
        assert!(cache.is_protected("a::b").unwrap());
    }

    #[test]
    fn release_of_transitively_protected_key_fails() {
        let (_dir, cache) = open_cache();
        cache.protect("a::").unwrap();
        assert!(!cache.release("a::b").unwrap());
        assert!(cache.release("a::").unwrap());
        assert!(!cache.is_protected("a::b").unwrap());
    }

    #[test]
    fn internal_keys_bypass_lru_eviction() {
        let (_dir, cache) = open_cache();
        cache.put(&format!("{INTERNAL_PREFIX}bookkeeping"), &vec![0u8; 2000], NO_EXPIRY).unwrap();
        assert!(cache.contains(&format!("{INTERNAL_PREFIX}bookkeeping")).unwrap());
    }
}
