//! Metadata repositories: partitions, blob data, and latest catalog
//! version (spec §4.5, §4.6).

pub mod catalog;
pub mod data;
pub mod partitions;

pub use catalog::CatalogRepository;
pub use data::{DataRepository, DataRequest};
pub use partitions::PartitionsRepository;

use std::sync::Arc;

use crate::cache::CacheManager;
use crate::endpoint::EndpointResolving;
use crate::http::HttpClient;
use crate::task::NamedMutexStorage;
use catalog_core::Hrn;

/// Shared wiring every repository composes: HTTP client, endpoint
/// resolver, cache, and the catalog/layer this instance is scoped to
/// (spec §2: "Each composes HTTP Client + Cache + Endpoint Resolver").
#[derive(Clone)]
pub struct RepositoryContext {
    pub http: Arc<HttpClient>,
    pub resolver: Arc<dyn EndpointResolving>,
    pub cache: Arc<CacheManager>,
    pub named_mutex: Arc<NamedMutexStorage>,
    pub catalog: Hrn,
    pub layer: String,
}
