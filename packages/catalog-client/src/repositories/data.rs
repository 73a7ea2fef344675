//! Blob fetch with cache-first reads (spec §4.6).

use bytes::Bytes;
use catalog_core::cache_key::blob_key;
use catalog_core::{ApiError, CatalogVersion, FetchOption};
use std::collections::BTreeMap;

use super::partitions::PartitionsRepository;
use super::RepositoryContext;
use crate::cache::UNBOUNDED_EXPIRY;
use crate::http::cancellation::CancellationContext;
use crate::http::{ApiRequest, Method};

const BLOB_API: &str = "blob";
const BLOB_API_VERSION: &str = "v1";

/// A blob fetch request. `data_handle` may be left empty, in which case
/// it is resolved from `partition_id` via [`PartitionsRepository`] first
/// (spec §4.6, step 1).
pub struct DataRequest {
    pub partition_id: Option<String>,
    pub data_handle: String,
}

#[derive(Clone)]
pub struct DataRepository {
    ctx: RepositoryContext,
}

impl DataRepository {
    #[must_use]
    pub fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    /// Implements the 4-step flow of spec §4.6. `CacheWithUpdate` is
    /// rejected up front: it is invalid for versioned layers.
    pub async fn get_versioned_data(
        &self,
        request: DataRequest,
        version: CatalogVersion,
        fetch_option: FetchOption,
        cancel: CancellationContext,
    ) -> Result<Bytes, ApiError> {
        if !fetch_option.is_valid_for_versioned_layer() {
            return Err(ApiError::invalid_argument(
                "CacheWithUpdate is not valid for versioned layers",
            ));
        }

        let data_handle = if request.data_handle.is_empty() {
            let partition_id = request
                .partition_id
                .as_deref()
                .ok_or_else(|| ApiError::invalid_argument("data_handle or partition_id is required"))?;
            let partitions = PartitionsRepository::new(self.ctx.clone());
            let ids = [partition_id.to_string()];
            let found = partitions.get_partitions(&ids, version, cancel.clone()).await?;
            found
                .into_iter()
                .find(|p| p.partition_id == partition_id)
                .map(|p| p.data_handle)
                .ok_or_else(|| ApiError::not_found(format!("partition {partition_id} not found")))?
        } else {
            request.data_handle
        };

        let key = blob_key(&self.ctx.catalog, &self.ctx.layer, &data_handle);

        if let Some(bytes) = self.ctx.cache.get(&key)? {
            return Ok(bytes);
        }

        if matches!(fetch_option, FetchOption::CacheOnly) {
            return Err(ApiError::not_found(format!("blob {data_handle} not in cache")));
        }

        let bytes = self.fetch_blob(&data_handle, cancel).await?;
        self.ctx.cache.put(&key, bytes.clone(), UNBOUNDED_EXPIRY)?;
        Ok(bytes)
    }

    async fn fetch_blob(&self, data_handle: &str, cancel: CancellationContext) -> Result<Bytes, ApiError> {
        let base_url = self.ctx.resolver.resolve(&self.ctx.catalog, BLOB_API, BLOB_API_VERSION).await?;
        let request = ApiRequest {
            base_url,
            path: format!("/layers/{}/data/{data_handle}", self.ctx.layer),
            method: Method::Get,
            query: vec![],
            headers: BTreeMap::new(),
            body: Bytes::new(),
            content_type: None,
        };
        let (_, _, body, _) = self.ctx.http.call_api(request, cancel).await?;
        Ok(body)
    }
}
