//! Three-tier cache orchestrator: memory -> mutable disk -> protected disk
//! (spec §4.3).

use bytes::Bytes;
use catalog_core::cache_key::is_internal_key;
use catalog_core::{ApiError, ErrorKind};
use parking_lot::Mutex;
use std::path::PathBuf;

use super::disk::DiskCache;
use super::memory::MemoryCache;
use super::protected::ProtectedCache;
use super::types::{CacheType, EvictionPolicy, NO_EXPIRY};

fn not_open(cache_type: CacheType) -> ApiError {
    ApiError::new(
        ErrorKind::PreconditionFailed,
        412,
        format!("{cache_type:?} tier is not open"),
    )
}

/// Construction-time configuration for the disk tiers.
pub struct CacheConfig {
    pub memory_max_bytes: u64,
    pub disk_path: PathBuf,
    pub disk_max_bytes: u64,
    pub disk_eviction_policy: EvictionPolicy,
    pub protected_path: Option<PathBuf>,
}

/// Read order memory -> mutable disk -> protected disk. Writes land in
/// memory and mutable disk; the protected tier is never written.
pub struct CacheManager {
    memory: MemoryCache,
    disk: Mutex<Option<DiskCache>>,
    protected: Mutex<Option<ProtectedCache>>,
    config: CacheConfig,
}

impl CacheManager {
    /// Opens the mutable disk tier (and the protected tier, if configured)
    /// immediately.
    pub fn open_all(config: CacheConfig) -> Result<Self, ApiError> {
        let manager = Self {
            memory: MemoryCache::new(config.memory_max_bytes),
            disk: Mutex::new(None),
            protected: Mutex::new(None),
            config,
        };
        manager.open(CacheType::Disk)?;
        if manager.config.protected_path.is_some() {
            manager.open(CacheType::Protected)?;
        }
        Ok(manager)
    }

    pub fn open(&self, cache_type: CacheType) -> Result<(), ApiError> {
        match cache_type {
            CacheType::Memory => Ok(()),
            CacheType::Disk => {
                let mut slot = self.disk.lock();
                if slot.is_none() {
                    *slot = Some(DiskCache::open(
                        &self.config.disk_path,
                        self.config.disk_max_bytes,
                        self.config.disk_eviction_policy,
                    )?);
                }
                Ok(())
            }
            CacheType::Protected => {
                let Some(path) = &self.config.protected_path else {
                    return Err(ApiError::invalid_argument("no protected cache path configured"));
                };
                let mut slot = self.protected.lock();
                if slot.is_none() {
                    *slot = Some(ProtectedCache::open(path)?);
                }
                Ok(())
            }
        }
    }

    pub fn close(&self, cache_type: CacheType) {
        match cache_type {
            CacheType::Memory => self.memory.clear(),
            CacheType::Disk => *self.disk.lock() = None,
            CacheType::Protected => *self.protected.lock() = None,
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<Bytes>, ApiError> {
        if let Some(hit) = self.memory.get(key) {
            return Ok(Some(hit));
        }

        if let Some(disk) = self.disk.lock().as_ref() {
            if let Some(bytes) = disk.get(key)? {
                let bytes = Bytes::from(bytes);
                self.memory.put(key.to_string(), bytes.clone());
                return Ok(Some(bytes));
            }
        }

        if let Some(protected) = self.protected.lock().as_ref() {
            if let Some(bytes) = protected.get(key)? {
                let bytes = Bytes::from(bytes);
                self.memory.put(key.to_string(), bytes.clone());
                return Ok(Some(bytes));
            }
        }

        Ok(None)
    }

    /// Typed overload: bytes are always what's stored; `decoder` only runs
    /// on a hit (spec §4.3).
    pub fn get_decoded<T>(&self, key: &str, decoder: impl FnOnce(&[u8]) -> Option<T>) -> Result<Option<T>, ApiError> {
        Ok(self.get(key)?.and_then(|bytes| decoder(&bytes)))
    }

    pub fn put(&self, key: &str, value: Bytes, expiry: u64) -> Result<(), ApiError> {
        self.memory.put(key.to_string(), value.clone());
        if let Some(disk) = self.disk.lock().as_ref() {
            disk.put(key, &value, expiry)?;
        }
        Ok(())
    }

    pub fn put_encoded<T>(&self, key: &str, value: &T, encoder: impl FnOnce(&T) -> Vec<u8>, expiry: u64) -> Result<(), ApiError> {
        self.put(key, Bytes::from(encoder(value)), expiry)
    }

    pub fn remove(&self, key: &str) -> Result<(), ApiError> {
        self.memory.remove(key);
        if let Some(disk) = self.disk.lock().as_ref() {
            disk.remove(key)?;
        }
        Ok(())
    }

    pub fn remove_keys_with_prefix(&self, prefix: &str) -> Result<(), ApiError> {
        self.memory.remove_prefix(prefix);
        if let Some(disk) = self.disk.lock().as_ref() {
            disk.remove_keys_with_prefix(prefix)?;
        }
        Ok(())
    }

    pub fn contains(&self, key: &str) -> Result<bool, ApiError> {
        Ok(self.get(key)?.is_some())
    }

    /// Fails if neither a mutable nor a protected layer is configured, and
    /// if any key is already covered by an existing protected prefix (spec
    /// §4.3).
    pub fn protect(&self, keys_or_prefixes: &[String]) -> Result<bool, ApiError> {
        if self.disk.lock().is_none() && self.protected.lock().is_none() {
            return Err(not_open(CacheType::Disk));
        }
        let disk = self.disk.lock();
        let Some(disk) = disk.as_ref() else {
            return Ok(false);
        };
        let mut all = true;
        for key in keys_or_prefixes {
            all &= disk.protect(key)?;
        }
        Ok(all)
    }

    /// An individually-protected key releases cleanly; a key only pinned
    /// transitively through a prefix cannot be released on its own (spec
    /// §4.3) -- release the prefix instead.
    pub fn release(&self, keys_or_prefixes: &[String]) -> Result<bool, ApiError> {
        let disk = self.disk.lock();
        let Some(disk) = disk.as_ref() else {
            return Err(not_open(CacheType::Disk));
        };
        let mut all = true;
        for key in keys_or_prefixes {
            all &= disk.release(key)?;
        }
        Ok(all)
    }

    pub fn is_protected(&self, key: &str) -> Result<bool, ApiError> {
        if is_internal_key(key) {
            return Ok(true);
        }
        match self.disk.lock().as_ref() {
            Some(disk) => disk.is_protected(key),
            None => Ok(false),
        }
    }

    pub fn size(&self, cache_type: CacheType) -> Result<u64, ApiError> {
        match cache_type {
            CacheType::Memory => Ok(self.memory.weight()),
            CacheType::Disk => match self.disk.lock().as_ref() {
                Some(disk) => disk.size(),
                None => Err(not_open(CacheType::Disk)),
            },
            CacheType::Protected => match self.protected.lock().as_ref() {
                Some(protected) => protected.size(),
                None => Ok(0),
            },
        }
    }

    /// Reduces the mutable disk tier's byte budget and runs one eviction
    /// pass, returning bytes freed (spec §4.3).
    pub fn set_disk_max_bytes(&self, new_max: u64) -> Result<u64, ApiError> {
        match self.disk.lock().as_ref() {
            Some(disk) => disk.set_max_bytes(new_max),
            None => Err(not_open(CacheType::Disk)),
        }
    }

    pub fn clear(&self) -> Result<(), ApiError> {
        self.memory.clear();
        if let Some(disk) = self.disk.lock().as_ref() {
            disk.clear()?;
        }
        Ok(())
    }

    pub fn compact(&self) -> Result<(), ApiError> {
        if let Some(disk) = self.disk.lock().as_mut() {
            disk.compact()?;
        }
        Ok(())
    }
}

pub const UNBOUNDED_EXPIRY: u64 = NO_EXPIRY;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager() -> (tempfile::TempDir, CacheManager) {
        let dir = tempdir().unwrap();
        let config = CacheConfig {
            memory_max_bytes: 4096,
            disk_path: dir.path().join("cache.redb"),
            disk_max_bytes: 65536,
            disk_eviction_policy: EvictionPolicy::LeastRecentlyUsed,
            protected_path: None,
        };
        (dir, CacheManager::open_all(config).unwrap())
    }

    #[test]
    fn put_then_get_roundtrips_through_memory() {
        let (_dir, cache) = manager();
        cache.put("k", Bytes::from_static(b"v"), UNBOUNDED_EXPIRY).unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(Bytes::from_static(b"v")));
    }

    #[test]
    fn disk_hit_backfills_memory() {
        let (_dir, cache) = manager();
        cache.put("k", Bytes::from_static(b"v"), UNBOUNDED_EXPIRY).unwrap();
        cache.close(CacheType::Memory);
        assert_eq!(cache.get("k").unwrap(), Some(Bytes::from_static(b"v")));
    }

    #[test]
    fn protect_and_release_roundtrip() {
        let (_dir, cache) = manager();
        assert!(cache.protect(&["a::".to_string()]).unwrap());
        assert!(cache.is_protected("a::b").unwrap());
        assert!(!cache.release(&["a::b".to_string()]).unwrap());
        assert!(cache.release(&["a::".to_string()]).unwrap());
        assert!(!cache.is_protected("a::b").unwrap());
    }

    #[test]
    fn remove_keys_with_prefix_clears_both_tiers() {
        let (_dir, cache) = manager();
        cache.put("a::1", Bytes::from_static(b"1"), UNBOUNDED_EXPIRY).unwrap();
        cache.put("a::2", Bytes::from_static(b"2"), UNBOUNDED_EXPIRY).unwrap();
        cache.remove_keys_with_prefix("a::").unwrap();
        assert!(!cache.contains("a::1").unwrap());
        assert!(!cache.contains("a::2").unwrap());
    }
}
