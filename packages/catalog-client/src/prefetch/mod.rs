//! Two-stage (query, then download) prefetch engine for tiles and
//! partition-ID batches (spec §4.8).

pub mod download_job;
pub mod query_job;
pub mod tiles;

pub use download_job::ProgressEvent;

use catalog_core::{ApiError, CatalogVersion, TileKey};
use std::collections::HashMap;
use std::sync::Arc;

use crate::http::cancellation::CancellationContext;
use crate::repositories::{DataRepository, PartitionsRepository};

const PARTITION_BATCH_SIZE: usize = 100;

pub struct PrefetchTilesRequest {
    pub tiles: Vec<TileKey>,
    pub min_level: u32,
    pub max_level: u32,
    pub data_aggregation: bool,
}

pub struct PrefetchTileOutcome {
    pub tile: TileKey,
    pub result: Result<(), ApiError>,
}

pub struct PrefetchPartitionsRequest {
    pub partition_ids: Vec<String>,
}

pub struct PrefetchPartitionOutcome {
    pub partition_id: String,
    pub result: Result<(), ApiError>,
}

/// Runs the tile-prefetch pipeline: slice roots, query covering
/// quadtrees, filter to the user's tiles (resolving aggregation), then
/// download every resolved blob (spec §4.8).
pub async fn prefetch_tiles(
    partitions_repository: &PartitionsRepository,
    data_repository: &DataRepository,
    request: PrefetchTilesRequest,
    version: CatalogVersion,
    on_progress: Option<Arc<dyn Fn(ProgressEvent) + Send + Sync>>,
    cancel: CancellationContext,
) -> Result<Vec<PrefetchTileOutcome>, ApiError> {
    if request.tiles.is_empty() {
        return Err(ApiError::invalid_argument("prefetch_tiles requires at least one tile"));
    }

    let roots = tiles::slice_tile_roots(&request.tiles, request.min_level, request.max_level);
    let (found, query_stats) = query_job::run_tile_query(partitions_repository, roots, version, cancel.clone()).await?;
    tracing::debug!(
        bytes_downloaded = query_stats.bytes_downloaded,
        bytes_uploaded = query_stats.bytes_uploaded,
        "tile prefetch query stage complete, handing filtered set to the download stage"
    );
    let found = tiles::filter_by_level(found, request.min_level, request.max_level, &request.tiles);
    let resolved = tiles::filter_by_list(&found, &request.tiles, request.data_aggregation);

    let mut download_items = Vec::new();
    for (tile, index) in &resolved {
        if let Some(index) = index {
            download_items.push((tile.to_string(), index.data_handle.clone()));
        }
    }

    let outcomes = download_job::run_download_job(data_repository, download_items, version, on_progress, cancel).await?;
    let mut by_key: HashMap<String, Result<(), ApiError>> = outcomes.into_iter().map(|o| (o.item_key, o.result)).collect();

    Ok(resolved
        .into_iter()
        .map(|(tile, index)| {
            let result = match index {
                Some(_) => by_key
                    .remove(&tile.to_string())
                    .unwrap_or_else(|| Err(ApiError::not_found(format!("tile {tile} missing from download results")))),
                None => Err(ApiError::not_found(format!("tile {tile} not found"))),
            };
            PrefetchTileOutcome { tile, result }
        })
        .collect())
}

/// Runs the partition-prefetch pipeline: query in batches of at most
/// [`PARTITION_BATCH_SIZE`], then download every resolved blob. Requesting
/// zero partition IDs is a caller error (spec §8); a non-empty request
/// whose batches all fail propagates the batch error instead (spec §4.8
/// "Error policy", enforced by `query_job::run_partition_query`).
pub async fn prefetch_partitions(
    partitions_repository: &PartitionsRepository,
    data_repository: &DataRepository,
    request: PrefetchPartitionsRequest,
    version: CatalogVersion,
    on_progress: Option<Arc<dyn Fn(ProgressEvent) + Send + Sync>>,
    cancel: CancellationContext,
) -> Result<Vec<PrefetchPartitionOutcome>, ApiError> {
    if request.partition_ids.is_empty() {
        return Err(ApiError::invalid_argument("prefetch_partitions requires at least one partition id"));
    }

    let batches: Vec<Vec<String>> = request
        .partition_ids
        .chunks(PARTITION_BATCH_SIZE)
        .map(<[String]>::to_vec)
        .collect();
    let partitions = query_job::run_partition_query(partitions_repository, batches, version, cancel.clone()).await?;

    let download_items: Vec<(String, String)> = partitions.iter().map(|p| (p.partition_id.clone(), p.data_handle.clone())).collect();
    let outcomes = download_job::run_download_job(data_repository, download_items, version, on_progress, cancel).await?;

    if outcomes.is_empty() {
        // Every batch queried successfully but resolved to zero partitions
        // server-side (all requested IDs unknown), distinct from the
        // all-batches-failed case `run_partition_query` already rejects.
        return Err(ApiError::not_found("No partitions were prefetched"));
    }

    Ok(outcomes
        .into_iter()
        .map(|o| PrefetchPartitionOutcome {
            partition_id: o.item_key,
            result: o.result,
        })
        .collect())
}
