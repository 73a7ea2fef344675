//! Catalog data model (spec §3).

use serde::{Deserialize, Serialize};

/// Opaque catalog resource name. Participates in every cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hrn(String);

impl Hrn {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Hrn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Hrn {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Hrn {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Monotone non-negative catalog version. `NOT_RESOLVED` (`-1`) is the
/// sentinel for "not yet resolved" (spec §3).
pub type CatalogVersion = i64;

/// Sentinel catalog version meaning "not yet resolved".
pub const VERSION_NOT_RESOLVED: CatalogVersion = -1;

/// A partition record as returned by the metadata service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    #[serde(rename = "partition")]
    pub partition_id: String,
    #[serde(rename = "dataHandle")]
    pub data_handle: String,
    pub version: CatalogVersion,
    #[serde(rename = "dataSize", skip_serializing_if = "Option::is_none")]
    pub data_size: Option<i64>,
    #[serde(rename = "compressedDataSize", skip_serializing_if = "Option::is_none")]
    pub compressed_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crc: Option<String>,
}

/// Accumulated network I/O counters, carried alongside responses (spec §9).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStatistics {
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
}

impl NetworkStatistics {
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            bytes_uploaded: self.bytes_uploaded.saturating_add(other.bytes_uploaded),
            bytes_downloaded: self.bytes_downloaded.saturating_add(other.bytes_downloaded),
        }
    }

    pub fn accumulate(&mut self, other: Self) {
        *self = self.merge(other);
    }
}

/// Controls whether a read consults the cache, the network, or both
/// (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOption {
    CacheOnly,
    OnlineOnly,
    OnlineIfNotFound,
    /// Invalid for versioned layers; every versioned-layer operation
    /// rejects this with `InvalidArgument` (spec §4.6, open question D.3).
    CacheWithUpdate,
}

impl FetchOption {
    #[must_use]
    pub fn is_valid_for_versioned_layer(self) -> bool {
        !matches!(self, FetchOption::CacheWithUpdate)
    }
}

/// Which string fields of a quadtree [`crate::quadtree::IndexData`]-like
/// record to materialize (spec §4.4's `get_index_data(field_mask)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMask(u8);

impl FieldMask {
    pub const DATA_HANDLE: Self = Self(1 << 0);
    pub const ADDITIONAL_METADATA: Self = Self(1 << 1);
    pub const CRC: Self = Self(1 << 2);
    pub const CHECKSUM: Self = Self(1 << 3);
    pub const ALL: Self = Self(
        Self::DATA_HANDLE.0 | Self::ADDITIONAL_METADATA.0 | Self::CRC.0 | Self::CHECKSUM.0,
    );

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl Default for FieldMask {
    fn default() -> Self {
        Self::ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_with_update_is_invalid_for_versioned_layers() {
        assert!(!FetchOption::CacheWithUpdate.is_valid_for_versioned_layer());
        assert!(FetchOption::CacheOnly.is_valid_for_versioned_layer());
        assert!(FetchOption::OnlineOnly.is_valid_for_versioned_layer());
        assert!(FetchOption::OnlineIfNotFound.is_valid_for_versioned_layer());
    }

    #[test]
    fn field_mask_union_and_contains() {
        let mask = FieldMask::DATA_HANDLE.union(FieldMask::CRC);
        assert!(mask.contains(FieldMask::DATA_HANDLE));
        assert!(mask.contains(FieldMask::CRC));
        assert!(!mask.contains(FieldMask::CHECKSUM));
        assert!(FieldMask::ALL.contains(mask));
    }

    #[test]
    fn network_statistics_merge_accumulates() {
        let mut stats = NetworkStatistics {
            bytes_uploaded: 10,
            bytes_downloaded: 20,
        };
        stats.accumulate(NetworkStatistics {
            bytes_uploaded: 5,
            bytes_downloaded: 7,
        });
        assert_eq!(stats.bytes_uploaded, 15);
        assert_eq!(stats.bytes_downloaded, 27);
    }
}
