//! Shared cache types (spec §4.3).

use std::time::{SystemTime, UNIX_EPOCH};

/// Which tier an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheType {
    Memory,
    Disk,
    Protected,
}

/// Eviction policy for a disk-backed tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    None,
    LeastRecentlyUsed,
}

/// Sentinel expiry meaning "no TTL record is stored" (spec §4.3: "`put`
/// with `expiry = max_time_t` stores no expiry record").
pub const NO_EXPIRY: u64 = u64::MAX;

/// Fraction of `max_bytes` an LRU eviction pass reduces the tier to (spec
/// §4.3: "until total size ≤ `max_disk_storage × 0.85`").
pub const EVICTION_TARGET_RATIO: f64 = 0.85;

#[must_use]
pub fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[must_use]
pub fn is_expired(expiry: u64, now: u64) -> bool {
    expiry != NO_EXPIRY && expiry <= now
}
