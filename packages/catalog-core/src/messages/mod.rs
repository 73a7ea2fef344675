//! JSON wire DTOs for the metadata/lookup/blob endpoints (spec §6).

pub mod catalog;
pub mod lookup;
pub mod partitions;
pub mod quadtree;

pub use catalog::LatestVersionResponse;
pub use lookup::LookupResult;
pub use partitions::PartitionsResponse;
pub use quadtree::{ParentQuadDto, QuadTreeResponse, SubQuadDto};
