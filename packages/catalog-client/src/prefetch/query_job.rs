//! Query stage of the prefetch pipeline: fan out one task per root,
//! aggregate `(item_key, data_handle)` pairs, apply the job-specific
//! error policy (spec §4.8 "QueryJob").

use catalog_core::{ApiError, CatalogVersion, NetworkStatistics, Partition, TileKey};
use std::collections::BTreeMap;
use tokio::task::JoinSet;

use crate::http::cancellation::CancellationContext;
use crate::quadtree::IndexData;
use crate::repositories::PartitionsRepository;

/// Queries every root concurrently, accumulating each root's
/// [`NetworkStatistics`] into one total the caller hands off to the
/// download stage (spec §4.8 "QueryJob"). Tile prefetch's error policy:
/// any single non-cancellation failure aborts the whole query (spec §4.8
/// "Error policy").
pub async fn run_tile_query(
    repository: &PartitionsRepository,
    roots: BTreeMap<TileKey, u32>,
    version: CatalogVersion,
    cancel: CancellationContext,
) -> Result<(Vec<IndexData>, NetworkStatistics), ApiError> {
    let mut join_set = JoinSet::new();
    for (root, _depth) in roots {
        let repository = repository.clone();
        let cancel = cancel.clone();
        join_set.spawn(async move { repository.list_quadtree(root, version, cancel).await });
    }

    let mut items = Vec::new();
    let mut stats = NetworkStatistics::default();
    while let Some(joined) = join_set.join_next().await {
        let outcome = joined.map_err(|err| ApiError::new(catalog_core::ErrorKind::Unknown, -1, format!("query task panicked: {err}")))?;
        match outcome {
            Ok((mut found, hop_stats)) => {
                items.append(&mut found);
                stats.accumulate(hop_stats);
            }
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                join_set.abort_all();
                return Err(err);
            }
        }
    }
    Ok((items, stats))
}

/// Queries every partition-ID batch concurrently. Partition prefetch's
/// error policy: the job only fails when **every** batch fails; partial
/// success proceeds with whatever batches succeeded (spec §4.8 "Error
/// policy").
pub async fn run_partition_query(
    repository: &PartitionsRepository,
    batches: Vec<Vec<String>>,
    version: CatalogVersion,
    cancel: CancellationContext,
) -> Result<Vec<Partition>, ApiError> {
    let total_batches = batches.len();
    let mut join_set = JoinSet::new();
    for batch in batches {
        let repository = repository.clone();
        let cancel = cancel.clone();
        join_set.spawn(async move { repository.get_partitions(&batch, version, cancel).await });
    }

    let mut partitions = Vec::new();
    let mut failures = 0usize;
    let mut last_error = None;
    while let Some(joined) = join_set.join_next().await {
        let outcome = joined.map_err(|err| ApiError::new(catalog_core::ErrorKind::Unknown, -1, format!("query task panicked: {err}")))?;
        match outcome {
            Ok(mut found) => partitions.append(&mut found),
            Err(err) if err.is_cancelled() => {
                join_set.abort_all();
                return Err(err);
            }
            Err(err) => {
                failures += 1;
                last_error = Some(err);
            }
        }
    }

    if failures == total_batches && total_batches > 0 {
        return Err(last_error.unwrap_or_else(|| ApiError::invalid_argument("no partition batches were queried")));
    }
    Ok(partitions)
}
