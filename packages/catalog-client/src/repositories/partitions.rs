//! Partition listing and tile metadata lookup (spec §4.5).

use bytes::Bytes;
use catalog_core::cache_key::{partition_key, quadtree_key, tile_here_string};
use catalog_core::messages::{PartitionsResponse, QuadTreeResponse};
use catalog_core::model::{CatalogVersion, FieldMask};
use catalog_core::{ApiError, NetworkStatistics, Partition, TileKey};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

use super::RepositoryContext;
use crate::cache::UNBOUNDED_EXPIRY;
use crate::http::cancellation::CancellationContext;
use crate::http::{ApiRequest, Method};
use crate::quadtree::{stream_partitions, IndexData, QuadTreeIndex};

const QUERY_API: &str = "query";
const QUERY_API_VERSION: &str = "v1";
const PARTITION_BATCH_SIZE: usize = 100;
const TILE_DEPTH: u8 = 4;

#[derive(Clone)]
pub struct PartitionsRepository {
    ctx: RepositoryContext,
}

impl PartitionsRepository {
    #[must_use]
    pub fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    /// The named-mutex storage backing this repository's context, shared
    /// with the owning client for cross-repository invariants like
    /// `remove_from_cache` (spec §4.9 "Removal semantics").
    #[must_use]
    pub fn named_mutex(&self) -> &crate::task::NamedMutexStorage {
        &self.ctx.named_mutex
    }

    /// Reads cached partition records, fetching the rest in batches of at
    /// most [`PARTITION_BATCH_SIZE`], merging and persisting the result
    /// (spec §4.5). Concurrent fetches for the same `(layer, version)`
    /// bundle are serialized by a named mutex.
    pub async fn get_partitions(
        &self,
        partition_ids: &[String],
        version: CatalogVersion,
        cancel: CancellationContext,
    ) -> Result<Vec<Partition>, ApiError> {
        let mutex_name = format!("{}::{}::partitions::{version}", self.ctx.catalog.as_str(), self.ctx.layer);
        let guard = self.ctx.named_mutex.lock(&mutex_name, cancel.token()).await?;

        match self.get_partitions_locked(partition_ids, version, cancel).await {
            Ok(found) => {
                self.ctx.named_mutex.clear_error(&mutex_name);
                Ok(found)
            }
            Err(err) => {
                guard.publish_error(err.clone());
                Err(err)
            }
        }
    }

    /// Body of [`Self::get_partitions`] run under the named-mutex guard; a
    /// failure here is published to concurrent waiters by the caller
    /// (spec §4.7).
    async fn get_partitions_locked(
        &self,
        partition_ids: &[String],
        version: CatalogVersion,
        cancel: CancellationContext,
    ) -> Result<Vec<Partition>, ApiError> {
        let mut found = Vec::with_capacity(partition_ids.len());
        let mut missing = Vec::new();
        for id in partition_ids {
            let key = partition_key(&self.ctx.catalog, &self.ctx.layer, id, version);
            match self.ctx.cache.get_decoded(&key, |bytes| serde_json::from_slice::<Partition>(bytes).ok())? {
                Some(partition) => found.push(partition),
                None => missing.push(id.clone()),
            }
        }

        for chunk in missing.chunks(PARTITION_BATCH_SIZE) {
            let fetched = self.fetch_partitions(chunk, version, cancel.clone()).await?;
            for partition in fetched {
                let key = partition_key(&self.ctx.catalog, &self.ctx.layer, &partition.partition_id, version);
                let encoded = serde_json::to_vec(&partition).unwrap_or_default();
                self.ctx.cache.put(&key, Bytes::from(encoded), UNBOUNDED_EXPIRY)?;
                found.push(partition);
            }
        }

        Ok(found)
    }

    async fn fetch_partitions(
        &self,
        ids: &[String],
        version: CatalogVersion,
        cancel: CancellationContext,
    ) -> Result<Vec<Partition>, ApiError> {
        let base_url = self.ctx.resolver.resolve(&self.ctx.catalog, QUERY_API, QUERY_API_VERSION).await?;
        let mut query: Vec<(String, String)> =
            ids.iter().map(|id| ("partition".to_string(), id.clone())).collect();
        query.push(("version".to_string(), version.to_string()));

        let request = ApiRequest {
            base_url,
            path: format!("/layers/{}/partitions", self.ctx.layer),
            method: Method::Get,
            query,
            headers: BTreeMap::new(),
            body: Bytes::new(),
            content_type: None,
        };
        let (_, _, body, _) = self.ctx.http.call_api(request, cancel).await?;
        let response: PartitionsResponse =
            serde_json::from_slice(&body).map_err(|err| ApiError::invalid_argument(format!("malformed partitions response: {err}")))?;
        Ok(response.partitions)
    }

    /// Streams an unbounded partition listing, emitting each decoded
    /// [`Partition`] onto the returned channel (spec §4.5's "streaming
    /// partitions").
    pub fn stream_partitions(&self, version: CatalogVersion, cancel: CancellationContext) -> mpsc::Receiver<Result<Partition, ApiError>> {
        let (tx, rx) = mpsc::channel(64);
        let base_url_fut = self.ctx.resolver.resolve(&self.ctx.catalog, QUERY_API, QUERY_API_VERSION);
        let http = std::sync::Arc::clone(&self.ctx.http);
        let layer = self.ctx.layer.clone();

        tokio::spawn(async move {
            let base_url = match base_url_fut.await {
                Ok(url) => url,
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            };
            let request = ApiRequest {
                base_url,
                path: format!("/layers/{layer}/partitions"),
                method: Method::Get,
                query: vec![("version".to_string(), version.to_string())],
                headers: BTreeMap::new(),
                body: Bytes::new(),
                content_type: None,
            };
            match http.call_api(request, cancel).await {
                Ok((_, _, body, _)) => {
                    let chunk: Result<Bytes, std::io::Error> = Ok(body);
                    stream_partitions(futures_util::stream::iter(vec![chunk]), tx).await;
                }
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                }
            }
        });

        rx
    }

    /// Nearest depth-4-aligned root covering `tile`; fetches (or reads
    /// from cache) that quadtree blob and looks up `tile` directly
    /// (spec §4.5 "Get tile").
    pub async fn get_tile(&self, tile: TileKey, version: CatalogVersion, cancel: CancellationContext) -> Result<Option<IndexData>, ApiError> {
        let root = tile.nearest_aligned_ancestor(TILE_DEPTH as u32);
        let (index, _stats) = self.load_quadtree(root, version, cancel).await?;
        Ok(index.find(tile, false))
    }

    /// As `get_tile`, but chain-loads ancestor quadtrees (walking up by
    /// [`TILE_DEPTH`] levels) until a covering entry is found or the root
    /// is exhausted, accumulating [`NetworkStatistics`] across every hop
    /// (spec §4.8 "Aggregated subquad loading").
    pub async fn get_aggregated_tile(
        &self,
        tile: TileKey,
        version: CatalogVersion,
        cancel: CancellationContext,
    ) -> Result<(Option<IndexData>, NetworkStatistics), ApiError> {
        let mut root = tile.nearest_aligned_ancestor(TILE_DEPTH as u32);
        let mut stats = NetworkStatistics::default();
        loop {
            let (index, hop_stats) = self.load_quadtree(root, version, cancel.clone()).await?;
            stats.accumulate(hop_stats);
            if let Some(entry) = index.find(tile, true) {
                return Ok((Some(entry), stats));
            }
            if index.root().is_root() {
                return Ok((None, stats));
            }
            root = index.root().changed_level_by(-(TILE_DEPTH as i32)).nearest_aligned_ancestor(TILE_DEPTH as u32);
        }
    }

    /// Every entry of the depth-4 quadtree covering `root`, used by the
    /// tile-prefetch query stage to enumerate `(item_key, data_handle)`
    /// pairs in one shot rather than one `find` per tile (spec §4.8
    /// "QueryJob").
    pub async fn list_quadtree(
        &self,
        root: TileKey,
        version: CatalogVersion,
        cancel: CancellationContext,
    ) -> Result<(Vec<IndexData>, NetworkStatistics), ApiError> {
        let (index, stats) = self.load_quadtree(root.nearest_aligned_ancestor(TILE_DEPTH as u32), version, cancel).await?;
        Ok((index.get_index_data(FieldMask::ALL), stats))
    }

    async fn load_quadtree(&self, root: TileKey, version: CatalogVersion, cancel: CancellationContext) -> Result<(QuadTreeIndex, NetworkStatistics), ApiError> {
        let key = quadtree_key(&self.ctx.catalog, &self.ctx.layer, &tile_here_string(&root), version, TILE_DEPTH);
        if let Some(bytes) = self.ctx.cache.get(&key)? {
            return Ok((QuadTreeIndex::decode(bytes)?, NetworkStatistics::default()));
        }

        let base_url = self.ctx.resolver.resolve(&self.ctx.catalog, QUERY_API, QUERY_API_VERSION).await?;
        let request = ApiRequest {
            base_url,
            path: format!("/layers/{}/versions/{version}/quadkeys/{}/depths/{TILE_DEPTH}", self.ctx.layer, tile_here_string(&root)),
            method: Method::Get,
            query: vec![],
            headers: BTreeMap::new(),
            body: Bytes::new(),
            content_type: None,
        };
        let (_, _, body, stats) = self.ctx.http.call_api(request, cancel).await?;
        let response: QuadTreeResponse =
            serde_json::from_slice(&body).map_err(|err| ApiError::invalid_argument(format!("malformed quadtree response: {err}")))?;
        let index = QuadTreeIndex::from_response(root, TILE_DEPTH, response);
        self.ctx.cache.put(&key, index.encode(), UNBOUNDED_EXPIRY)?;
        Ok((index, stats))
    }
}
