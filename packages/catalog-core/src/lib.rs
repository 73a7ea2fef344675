//! Catalog SDK core -- data model, wire DTOs, cache-key builders, and the
//! shared error taxonomy for the versioned layer read/prefetch/cache client.
//!
//! - **Model** ([`model`]): `Hrn`, `CatalogVersion`, `Partition`,
//!   `NetworkStatistics`, `FetchOption`, `FieldMask`
//! - **`TileKey`** ([`tile_key`]): quadtree tile addressing and Morton-coded
//!   sub-quadkey arithmetic
//! - **Cache keys** ([`cache_key`]): canonical colon-delimited key builders
//! - **Error** ([`error`]): `ApiError` / `ErrorKind`
//! - **Messages** ([`messages`]): JSON wire DTOs for the metadata endpoints

pub mod cache_key;
pub mod error;
pub mod messages;
pub mod model;
pub mod tile_key;

pub use error::{ApiError, ErrorKind};
pub use model::{CatalogVersion, FetchOption, FieldMask, Hrn, NetworkStatistics, Partition, VERSION_NOT_RESOLVED};
pub use tile_key::TileKey;

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {}
}
