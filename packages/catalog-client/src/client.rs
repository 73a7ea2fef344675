//! `VersionedLayerClient`: the public façade composing every repository,
//! the layered cache, and the client-wide latched catalog version
//! (spec §4.9).

use bytes::Bytes;
use catalog_core::cache_key::{blob_key, partition_key, quadtree_key, tile_here_string};
use catalog_core::model::{FieldMask, VERSION_NOT_RESOLVED};
use catalog_core::{ApiError, CatalogVersion, ErrorKind, FetchOption, Hrn, Partition, TileKey};
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use std::time::Duration;

use crate::cache::CacheManager;
use crate::endpoint::{EndpointResolver, EndpointResolving, HttpLookupService};
use crate::http::cancellation::CancellationContext;
use crate::http::HttpClient;
use crate::prefetch::{
    self, PrefetchPartitionOutcome, PrefetchPartitionsRequest, PrefetchTileOutcome, PrefetchTilesRequest, ProgressEvent,
};
use crate::quadtree::{IndexData, QuadTreeIndex};
use crate::repositories::{CatalogRepository, DataRepository, DataRequest, PartitionsRepository, RepositoryContext};
use crate::task::{NamedMutexStorage, PendingRequests, Priority, TaskSink};

const QUADTREE_DEPTH: u8 = 4;
const TASK_SINK_WORKERS: usize = 4;

fn not_resolved() -> ApiError {
    ApiError::new(ErrorKind::PreconditionFailed, 412, "no catalog version resolved yet")
}

/// Resolves the catalog version against an owned `(catalog_repo,
/// version_cell)` pair: the caller-supplied value if given, else the
/// already-latched value, else a fresh lookup latched via atomic
/// compare-and-swap so concurrent first callers agree on one winner (spec
/// §4.9 "Version resolution"). Free function (rather than a `&self`
/// method) so it can run inside a `'static` future dispatched onto the
/// task sink.
async fn resolve_version_for(
    catalog_repo: &CatalogRepository,
    version_cell: &AtomicI64,
    requested: Option<CatalogVersion>,
    cancel: CancellationContext,
) -> Result<CatalogVersion, ApiError> {
    if let Some(version) = requested {
        version_cell.store(version, Ordering::SeqCst);
        return Ok(version);
    }

    let current = version_cell.load(Ordering::SeqCst);
    if current != VERSION_NOT_RESOLVED {
        return Ok(current);
    }

    let fetched = catalog_repo.get_latest_version(cancel).await?;
    match version_cell.compare_exchange(VERSION_NOT_RESOLVED, fetched, Ordering::SeqCst, Ordering::SeqCst) {
        Ok(_) => Ok(fetched),
        Err(existing) => Ok(existing),
    }
}

/// A versioned-layer client: one per `(catalog, layer)` pair, owning its
/// own task-tracking and named-mutex state (spec §5: "named-mutex storage
/// is per-client"). `Get`/`Prefetch` operations are dispatched onto a
/// priority [`TaskSink`]; `protect`/`release` are plain synchronous cache
/// mutations and run inline (spec §4.9, §2 component 6).
pub struct VersionedLayerClient {
    catalog: Hrn,
    layer: String,
    cache: Arc<CacheManager>,
    pending: Arc<PendingRequests>,
    task_sink: Arc<TaskSink>,
    version: Arc<AtomicI64>,
    catalog_repo: CatalogRepository,
    partitions_repo: PartitionsRepository,
    data_repo: DataRepository,
}

impl VersionedLayerClient {
    #[must_use]
    pub fn new(
        catalog: Hrn,
        layer: String,
        http: Arc<HttpClient>,
        lookup_base_url: String,
        lookup_ttl: Duration,
        cache: Arc<CacheManager>,
        version: Option<CatalogVersion>,
    ) -> Self {
        let resolver: Arc<dyn EndpointResolving> = Arc::new(EndpointResolver::new(
            Arc::new(HttpLookupService::new(Arc::clone(&http), lookup_base_url)),
            lookup_ttl,
        ));
        let named_mutex = Arc::new(NamedMutexStorage::new());
        let ctx = RepositoryContext {
            http,
            resolver,
            cache: Arc::clone(&cache),
            named_mutex,
            catalog: catalog.clone(),
            layer: layer.clone(),
        };
        Self {
            catalog,
            layer,
            cache,
            pending: PendingRequests::new(),
            task_sink: Arc::new(TaskSink::new(TASK_SINK_WORKERS)),
            version: Arc::new(AtomicI64::new(version.unwrap_or(VERSION_NOT_RESOLVED))),
            catalog_repo: CatalogRepository::new(ctx.clone()),
            partitions_repo: PartitionsRepository::new(ctx.clone()),
            data_repo: DataRepository::new(ctx),
        }
    }

    /// Races `future` against this client's shared cancellation (armed by
    /// [`Self::cancel_pending_requests`]), registering it with the
    /// pending-requests set for the duration (spec §4.9/§5). Used by
    /// operations that are not dispatched through the task sink.
    async fn run_tracked<T, F>(&self, future: F) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        let (token, _guard) = self.pending.register();
        tokio::select! {
            biased;
            () = token.cancelled() => Err(ApiError::cancelled()),
            result = future => result,
        }
    }

    /// Submits `future` onto the priority task sink at `priority`,
    /// returning its result once the sink runs it (spec §4.9 "dispatches
    /// Get/Prefetch/Protect operations onto the task sink", restricted
    /// here to the Get/Prefetch operations, which are async I/O; `cancel`
    /// both races the wait and is handed to the sink as the task's own
    /// cancellation context.
    async fn dispatch<T, F>(&self, priority: Priority, cancel: CancellationContext, future: F) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, ApiError>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let sink_cancel = cancel.clone();
        self.task_sink.add_task(
            async move {
                let _ = tx.send(future.await);
            },
            priority,
            Some(sink_cancel),
        );
        tokio::select! {
            biased;
            () = cancel.token().cancelled() => Err(ApiError::cancelled()),
            result = rx => result.unwrap_or_else(|_| Err(ApiError::cancelled())),
        }
    }

    /// Resolves the catalog version (see [`resolve_version_for`]) against
    /// this client's own state.
    async fn resolve_version(&self, requested: Option<CatalogVersion>, cancel: CancellationContext) -> Result<CatalogVersion, ApiError> {
        resolve_version_for(&self.catalog_repo, &self.version, requested, cancel).await
    }

    fn require_resolved_version(&self) -> Result<CatalogVersion, ApiError> {
        match self.version.load(Ordering::SeqCst) {
            VERSION_NOT_RESOLVED => Err(not_resolved()),
            version => Ok(version),
        }
    }

    /// `get_data(DataRequest)` (spec §4.9).
    pub async fn get_data(
        &self,
        request: DataRequest,
        version: Option<CatalogVersion>,
        fetch_option: FetchOption,
        cancel: CancellationContext,
    ) -> Result<Bytes, ApiError> {
        let catalog_repo = self.catalog_repo.clone();
        let data_repo = self.data_repo.clone();
        let version_cell = Arc::clone(&self.version);
        self.dispatch(Priority::Normal, cancel.clone(), async move {
            let version = resolve_version_for(&catalog_repo, &version_cell, version, cancel.clone()).await?;
            data_repo.get_versioned_data(request, version, fetch_option, cancel).await
        })
        .await
    }

    /// `get_data(TileRequest)` (spec §4.9): resolves the tile's
    /// `data_handle` via the non-aggregated quadtree lookup, then fetches
    /// the blob.
    pub async fn get_tile_data(
        &self,
        tile: TileKey,
        version: Option<CatalogVersion>,
        fetch_option: FetchOption,
        cancel: CancellationContext,
    ) -> Result<Bytes, ApiError> {
        let catalog_repo = self.catalog_repo.clone();
        let partitions_repo = self.partitions_repo.clone();
        let data_repo = self.data_repo.clone();
        let version_cell = Arc::clone(&self.version);
        self.dispatch(Priority::Normal, cancel.clone(), async move {
            let version = resolve_version_for(&catalog_repo, &version_cell, version, cancel.clone()).await?;
            let index = partitions_repo
                .get_tile(tile, version, cancel.clone())
                .await?
                .ok_or_else(|| ApiError::not_found(format!("tile {tile} not found")))?;
            let request = DataRequest {
                partition_id: None,
                data_handle: index.data_handle,
            };
            data_repo.get_versioned_data(request, version, fetch_option, cancel).await
        })
        .await
    }

    /// `get_aggregated_data(TileRequest)` (spec §4.9): as
    /// [`Self::get_tile_data`] but via the aggregated (nearest-ancestor)
    /// quadtree lookup.
    pub async fn get_aggregated_data(&self, tile: TileKey, version: Option<CatalogVersion>, cancel: CancellationContext) -> Result<Bytes, ApiError> {
        let catalog_repo = self.catalog_repo.clone();
        let partitions_repo = self.partitions_repo.clone();
        let data_repo = self.data_repo.clone();
        let version_cell = Arc::clone(&self.version);
        self.dispatch(Priority::Normal, cancel.clone(), async move {
            let version = resolve_version_for(&catalog_repo, &version_cell, version, cancel.clone()).await?;
            let (index, stats) = partitions_repo.get_aggregated_tile(tile, version, cancel.clone()).await?;
            let index = index.ok_or_else(|| ApiError::not_found(format!("no aggregated ancestor for tile {tile}")))?;
            tracing::debug!(
                bytes_downloaded = stats.bytes_downloaded,
                bytes_uploaded = stats.bytes_uploaded,
                "aggregated tile lookup chain complete"
            );
            let request = DataRequest {
                partition_id: None,
                data_handle: index.data_handle,
            };
            data_repo.get_versioned_data(request, version, FetchOption::OnlineIfNotFound, cancel).await
        })
        .await
    }

    /// `get_partitions(PartitionsRequest)` (spec §4.9).
    pub async fn get_partitions(&self, partition_ids: Vec<String>, version: Option<CatalogVersion>, cancel: CancellationContext) -> Result<Vec<Partition>, ApiError> {
        let catalog_repo = self.catalog_repo.clone();
        let partitions_repo = self.partitions_repo.clone();
        let version_cell = Arc::clone(&self.version);
        self.dispatch(Priority::Normal, cancel.clone(), async move {
            let version = resolve_version_for(&catalog_repo, &version_cell, version, cancel.clone()).await?;
            partitions_repo.get_partitions(&partition_ids, version, cancel).await
        })
        .await
    }

    /// `stream_layer_partitions` (spec §4.9): resolves the version, then
    /// hands back a channel streaming each decoded [`Partition`].
    pub async fn stream_layer_partitions(&self, version: Option<CatalogVersion>, cancel: CancellationContext) -> Result<mpsc::Receiver<Result<Partition, ApiError>>, ApiError> {
        let version = self.resolve_version(version, cancel.clone()).await?;
        Ok(self.partitions_repo.stream_partitions(version, cancel))
    }

    /// `quad_tree_index(TileRequest)` (spec §4.9).
    pub async fn quad_tree_index(&self, tile: TileKey, version: Option<CatalogVersion>, aggregated: bool, cancel: CancellationContext) -> Result<Option<IndexData>, ApiError> {
        self.run_tracked(async move {
            let version = self.resolve_version(version, cancel.clone()).await?;
            if aggregated {
                let (index, _stats) = self.partitions_repo.get_aggregated_tile(tile, version, cancel).await?;
                Ok(index)
            } else {
                self.partitions_repo.get_tile(tile, version, cancel).await
            }
        })
        .await
    }

    /// `prefetch_tiles` (spec §4.9, §4.8).
    pub async fn prefetch_tiles(
        &self,
        request: PrefetchTilesRequest,
        version: Option<CatalogVersion>,
        on_progress: Option<Arc<dyn Fn(ProgressEvent) + Send + Sync>>,
        cancel: CancellationContext,
    ) -> Result<Vec<PrefetchTileOutcome>, ApiError> {
        let catalog_repo = self.catalog_repo.clone();
        let partitions_repo = self.partitions_repo.clone();
        let data_repo = self.data_repo.clone();
        let version_cell = Arc::clone(&self.version);
        self.dispatch(Priority::Low, cancel.clone(), async move {
            let version = resolve_version_for(&catalog_repo, &version_cell, version, cancel.clone()).await?;
            prefetch::prefetch_tiles(&partitions_repo, &data_repo, request, version, on_progress, cancel).await
        })
        .await
    }

    /// `prefetch_partitions` (spec §4.9, §4.8).
    pub async fn prefetch_partitions(
        &self,
        request: PrefetchPartitionsRequest,
        version: Option<CatalogVersion>,
        on_progress: Option<Arc<dyn Fn(ProgressEvent) + Send + Sync>>,
        cancel: CancellationContext,
    ) -> Result<Vec<PrefetchPartitionOutcome>, ApiError> {
        let catalog_repo = self.catalog_repo.clone();
        let partitions_repo = self.partitions_repo.clone();
        let data_repo = self.data_repo.clone();
        let version_cell = Arc::clone(&self.version);
        self.dispatch(Priority::Low, cancel.clone(), async move {
            let version = resolve_version_for(&catalog_repo, &version_cell, version, cancel.clone()).await?;
            prefetch::prefetch_partitions(&partitions_repo, &data_repo, request, version, on_progress, cancel).await
        })
        .await
    }

    /// `is_cached` (spec §4.9): requires an already-resolved version.
    pub fn is_cached(&self, key: &str) -> Result<bool, ApiError> {
        self.require_resolved_version()?;
        self.cache.contains(key)
    }

    /// `protect` (spec §4.9): requires an already-resolved version.
    pub fn protect(&self, keys_or_prefixes: &[String]) -> Result<bool, ApiError> {
        self.require_resolved_version()?;
        self.cache.protect(keys_or_prefixes)
    }

    /// `release` (spec §4.9): requires an already-resolved version.
    pub fn release(&self, keys_or_prefixes: &[String]) -> Result<bool, ApiError> {
        self.require_resolved_version()?;
        self.cache.release(keys_or_prefixes)
    }

    /// `remove_from_cache(partition_id)` (spec §4.9 "Removal semantics"):
    /// serialized by the per-partition named mutex; absence of either
    /// entry is not an error.
    pub async fn remove_partition_from_cache(&self, partition_id: &str, cancel: CancellationContext) -> Result<(), ApiError> {
        let version = self.require_resolved_version()?;
        let mutex_name = format!("{}::{}::remove-partition::{partition_id}", self.catalog.as_str(), self.layer);
        let guard = self
            .partitions_repo_named_mutex()
            .lock(&mutex_name, cancel.token())
            .await?;

        let result = (|| {
            let key = partition_key(&self.catalog, &self.layer, partition_id, version);
            if let Some(bytes) = self.cache.get(&key)? {
                if let Ok(partition) = serde_json::from_slice::<Partition>(&bytes) {
                    let data_key = blob_key(&self.catalog, &self.layer, &partition.data_handle);
                    self.cache.remove(&data_key)?;
                }
            }
            self.cache.remove(&key)
        })();

        match result {
            Ok(()) => {
                self.partitions_repo_named_mutex().clear_error(&mutex_name);
                Ok(())
            }
            Err(err) => {
                guard.publish_error(err.clone());
                Err(err)
            }
        }
    }

    /// `remove_from_cache(tile)` (spec §4.9 "Removal semantics"): the
    /// quadtree blob is removed only if no other tile it covers still has
    /// its own blob cached.
    pub async fn remove_tile_from_cache(&self, tile: TileKey, cancel: CancellationContext) -> Result<(), ApiError> {
        let version = self.require_resolved_version()?;
        let root = tile.nearest_aligned_ancestor(u32::from(QUADTREE_DEPTH));
        let mutex_name = format!("{}::{}::remove-quadtree::{root}", self.catalog.as_str(), self.layer);
        let guard = self
            .partitions_repo_named_mutex()
            .lock(&mutex_name, cancel.token())
            .await?;

        let result = (|| {
            let quadtree_cache_key = quadtree_key(&self.catalog, &self.layer, &tile_here_string(&root), version, QUADTREE_DEPTH);
            let Some(bytes) = self.cache.get(&quadtree_cache_key)? else {
                return Ok(());
            };
            let index = QuadTreeIndex::decode(bytes)?;

            if let Some(entry) = index.find(tile, false) {
                let data_key = blob_key(&self.catalog, &self.layer, &entry.data_handle);
                self.cache.remove(&data_key)?;
            }

            let mut any_still_cached = false;
            for entry in index.get_index_data(FieldMask::DATA_HANDLE) {
                let data_key = blob_key(&self.catalog, &self.layer, &entry.data_handle);
                if self.cache.contains(&data_key)? {
                    any_still_cached = true;
                    break;
                }
            }
            if !any_still_cached {
                self.cache.remove(&quadtree_cache_key)?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.partitions_repo_named_mutex().clear_error(&mutex_name);
                Ok(())
            }
            Err(err) => {
                guard.publish_error(err.clone());
                Err(err)
            }
        }
    }

    /// `cancel_pending_requests` (spec §4.9): cancels every call in
    /// flight without waiting for them to drain, including operations
    /// currently queued on or running under the task sink.
    pub fn cancel_pending_requests(&self) {
        self.pending.cancel_all();
        self.task_sink.pending().cancel_all();
    }

    /// As [`Self::cancel_pending_requests`], but blocks until every
    /// cancelled call has finished unwinding (spec §5's client-destructor
    /// `cancel_all_and_wait`).
    pub async fn cancel_pending_requests_and_wait(&self) {
        self.pending.cancel_all_and_wait().await;
        self.task_sink.pending().cancel_all_and_wait().await;
    }

    fn partitions_repo_named_mutex(&self) -> &NamedMutexStorage {
        self.partitions_repo.named_mutex()
    }
}
