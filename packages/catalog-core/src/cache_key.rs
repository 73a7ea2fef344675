//! Canonical cache-key construction (spec §6).
//!
//! Keys are colon-delimited strings. Centralizing construction here keeps
//! the cache, the repositories, and the prefetch engine from drifting on
//! the exact delimiter/field order.

use crate::model::{CatalogVersion, Hrn};
use crate::tile_key::TileKey;

/// Reserved prefix for cache entries that bypass the LRU index entirely
/// (spec §3/§4.3): the protected-set bookkeeping key and similar
/// SDK-internal bookkeeping live under this prefix.
pub const INTERNAL_PREFIX: &str = "internal::";

/// Prefix under which protect/release pins are durably recorded.
pub const PROTECTED_PREFIX: &str = "internal::protected::";

#[must_use]
pub fn partition_key(hrn: &Hrn, layer: &str, partition_id: &str, version: CatalogVersion) -> String {
    format!("{hrn}::{layer}::{partition_id}::{version}::partition")
}

#[must_use]
pub fn quadtree_key(hrn: &Hrn, layer: &str, tile_here_string: &str, version: CatalogVersion, depth: u8) -> String {
    format!("{hrn}::{layer}::{tile_here_string}::{version}::{depth}::quadtree")
}

#[must_use]
pub fn blob_key(hrn: &Hrn, layer: &str, data_handle: &str) -> String {
    format!("{hrn}::{layer}::{data_handle}::Data")
}

#[must_use]
pub fn protected_key(key_or_prefix: &str) -> String {
    format!("{PROTECTED_PREFIX}{key_or_prefix}")
}

/// Renders a [`TileKey`] the way the source SDK's `HereTile` string does:
/// `"<level>_<quadkey>"`. Used as the `tile_here_string` component of
/// [`quadtree_key`].
#[must_use]
pub fn tile_here_string(tile: &TileKey) -> String {
    tile.to_string()
}

#[must_use]
pub fn is_internal_key(key: &str) -> bool {
    key.starts_with(INTERNAL_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_key_format() {
        let hrn = Hrn::new("hrn:here:data:::my-catalog");
        let key = partition_key(&hrn, "my-layer", "p1", 5);
        assert_eq!(key, "hrn:here:data:::my-catalog::my-layer::p1::5::partition");
    }

    #[test]
    fn quadtree_key_format() {
        let hrn = Hrn::new("hrn:here:data:::cat");
        let tile = TileKey::new(4, 7);
        let key = quadtree_key(&hrn, "layer", &tile_here_string(&tile), 3, 4);
        assert_eq!(key, "hrn:here:data:::cat::layer::4_7::3::4::quadtree");
    }

    #[test]
    fn blob_key_format() {
        let hrn = Hrn::new("hrn:here:data:::cat");
        assert_eq!(blob_key(&hrn, "layer", "abc123"), "hrn:here:data:::cat::layer::abc123::Data");
    }

    #[test]
    fn internal_keys_are_detected() {
        assert!(is_internal_key(&protected_key("foo")));
        assert!(!is_internal_key("hrn::layer::p::1::partition"));
    }
}
