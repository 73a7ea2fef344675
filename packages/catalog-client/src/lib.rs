//! Versioned layer client: the HTTP retry/coalescing stack, endpoint
//! resolver, three-tier layered cache, binary quadtree index, streaming
//! partition parser, task scheduling primitives, metadata repositories,
//! the two-stage prefetch engine, and the `VersionedLayerClient` façade
//! tying them together.
//!
//! - **HTTP** ([`http`]): `Transport`, retry/backoff, cancellation,
//!   request coalescing, `HttpClient::call_api`
//! - **Endpoint** ([`endpoint`]): `(catalog, api, version) -> base_url`
//!   resolution with TTL and stale-on-error grace
//! - **Cache** ([`cache`]): memory LRU, mutable disk KV, read-only
//!   protected tier, orchestrated by `CacheManager`
//! - **QuadTree** ([`quadtree`]): binary index codec and the streaming
//!   SAX-style partition parser
//! - **Task** ([`task`]): priority task sink, pending-requests registry,
//!   named mutex
//! - **Repositories** ([`repositories`]): `PartitionsRepository`,
//!   `DataRepository`, `CatalogRepository`
//! - **Prefetch** ([`prefetch`]): query/download pipeline for tile and
//!   partition prefetch
//! - **Client** ([`client`]): `VersionedLayerClient`, the public façade

pub mod cache;
pub mod client;
pub mod endpoint;
pub mod http;
pub mod prefetch;
pub mod quadtree;
pub mod repositories;
pub mod task;

pub use client::VersionedLayerClient;

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {}
}
